use chrono::Utc;
use serde_json::Value;
use stepflow::{
    process::ProcessBuilder,
    router::RouteTarget,
    step::{StepContext, StepDefinition, StepError, StepFunction},
};
use tracing_subscriber::EnvFilter;

async fn generate_number(_ctx: StepContext, _input: ()) -> Result<u32, StepError> {
    // Good enough for a demo, no need for a real RNG.
    let number = Utc::now().timestamp_subsec_nanos() % 20 + 1;
    tracing::info!(number, "Generated number");
    Ok(number)
}

async fn make_decision(ctx: StepContext, number: u32) -> Result<(), StepError> {
    if number > 10 {
        ctx.emit_event("HighOutcome", &number)
    } else {
        ctx.emit_event("LowOutcome", &number)
    }
}

async fn handle_high(_ctx: StepContext, number: u32) -> Result<String, StepError> {
    Ok(format!("{number} is high, taking the bold path"))
}

async fn handle_low(_ctx: StepContext, number: u32) -> Result<String, StepError> {
    Ok(format!("{number} is low, playing it safe"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut builder = ProcessBuilder::new("RandomDecisionMaking");
    builder
        .add_step(
            StepDefinition::new("GenerateRandomNumber")
                .with_function(StepFunction::typed("Generate", generate_number)),
        )
        .add_step(
            StepDefinition::new("MakeDecision")
                .with_function(StepFunction::typed("Decide", make_decision)),
        )
        .add_step(
            StepDefinition::new("HandleHigh").with_function(StepFunction::typed("Handle", handle_high)),
        )
        .add_step(
            StepDefinition::new("HandleLow").with_function(StepFunction::typed("Handle", handle_low)),
        );

    builder
        .on_input_event("StartProcess")
        .send_event_to(RouteTarget::step("GenerateRandomNumber"))?;
    builder
        .on_function_result("GenerateRandomNumber", "Generate")
        .send_event_to(RouteTarget::step("MakeDecision"))?;
    builder
        .on_event("MakeDecision", "HighOutcome")
        .send_event_to(RouteTarget::step("HandleHigh"))?;
    builder
        .on_event("MakeDecision", "LowOutcome")
        .send_event_to(RouteTarget::step("HandleLow"))?;
    let process = builder.build()?;

    let outcome = process.start("StartProcess", Value::Null).await?;

    // Both handlers expose `Handle`, so ask for the step that produced it.
    let verdict: String = match outcome.output_from("HandleHigh", "Handle.OnResult") {
        Ok(verdict) => verdict,
        Err(_) => outcome.output_from("HandleLow", "Handle.OnResult")?,
    };
    let path = outcome
        .history
        .iter()
        .map(|execution| execution.step.as_str())
        .collect::<Vec<_>>()
        .join(" -> ");
    println!("{verdict}");
    println!("Path: {path}");
    println!("Mermaid graph:\n{}", process.to_mermaid());

    Ok(())
}
