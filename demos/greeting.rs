use serde_json::Value;
use stepflow::{
    process::ProcessBuilder,
    router::RouteTarget,
    step::{StepContext, StepDefinition, StepError, StepFunction},
};
use tracing_subscriber::EnvFilter;

async fn get_name(_ctx: StepContext, _input: ()) -> Result<String, StepError> {
    Ok("Willem".to_owned())
}

async fn generate_greeting(_ctx: StepContext, name: String) -> Result<String, StepError> {
    Ok(format!("Hello, {name}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut builder = ProcessBuilder::new("GreetingProcess");
    builder
        .add_step(StepDefinition::new("GetName").with_function(StepFunction::typed("GetName", get_name)))
        .add_step(
            StepDefinition::new("GenerateGreeting")
                .with_function(StepFunction::typed("GenerateGreeting", generate_greeting)),
        );
    builder
        .on_input_event("StartProcess")
        .send_event_to(RouteTarget::step("GetName"))?;
    builder
        .on_function_result("GetName", "GetName")
        .send_event_to(RouteTarget::step("GenerateGreeting"))?;
    let process = builder.build()?;

    let outcome = process.start("StartProcess", Value::Null).await?;

    let greeting: String = outcome.output_from("GenerateGreeting", "GenerateGreeting.OnResult")?;
    println!("{greeting}");
    println!("Mermaid graph:\n{}", process.to_mermaid());

    Ok(())
}
