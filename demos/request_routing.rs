use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use stepflow::{
    event::Event,
    process::ProcessBuilder,
    router::RouteTarget,
    step::{StepContext, StepDefinition, StepError, StepFunction},
};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
struct Prompt {
    text: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Answer {
    handler: String,
    text: String,
}

/// Local stand-in for a classifier model.
fn is_complex(prompt: &str) -> bool {
    const MARKERS: [&str; 4] = ["why", "explain", "compare", "design"];
    let lower = prompt.to_lowercase();
    prompt.split_whitespace().count() > 12 || MARKERS.iter().any(|marker| lower.contains(marker))
}

async fn route_prompt(ctx: StepContext, prompt: Prompt) -> Result<(), StepError> {
    let complex = is_complex(&prompt.text);
    tracing::info!(complex, "Classified prompt");
    let event = if complex {
        "HandleComplexPrompt"
    } else {
        "HandleBasicPrompt"
    };
    ctx.emit(Event::from_data(event, &prompt)?);
    Ok(())
}

async fn answer_basic(ctx: StepContext, prompt: Prompt) -> Result<(), StepError> {
    ctx.emit_event(
        "Answered",
        &Answer {
            handler: ctx.step_id().to_owned(),
            text: format!("Quick answer to: {}", prompt.text),
        },
    )
}

async fn answer_complex(ctx: StepContext, prompt: Prompt) -> Result<(), StepError> {
    ctx.emit_event(
        "Answered",
        &Answer {
            handler: ctx.step_id().to_owned(),
            text: format!("Let's break this down step by step: {}", prompt.text),
        },
    )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut builder = ProcessBuilder::new("AnswerQuestion");
    builder
        .add_step(StepDefinition::new("RoutePrompt").with_function(StepFunction::typed("Route", route_prompt)))
        .add_step(
            StepDefinition::new("BasicPromptHandler")
                .with_function(StepFunction::typed("Answer", answer_basic)),
        )
        .add_step(
            StepDefinition::new("ComplexPromptHandler")
                .with_function(StepFunction::typed("Answer", answer_complex)),
        );
    builder
        .on_input_event("PromptReceived")
        .send_event_to(RouteTarget::step("RoutePrompt"))?;
    builder
        .on_event("RoutePrompt", "HandleBasicPrompt")
        .send_event_to(RouteTarget::step("BasicPromptHandler"))?;
    builder
        .on_event("RoutePrompt", "HandleComplexPrompt")
        .send_event_to(RouteTarget::step("ComplexPromptHandler"))?;
    let process = builder.build()?;

    let prompts = [
        "What time is it in Lisbon?",
        "Explain why event-driven pipelines are easier to test than nested callbacks",
    ];
    for text in prompts {
        let prompt = Prompt {
            text: text.to_owned(),
        };
        let outcome = process
            .start_with(Event::from_data("PromptReceived", &prompt)?)
            .await?;
        let answer: Answer = outcome.output("Answered")?;
        println!("[{}] {}", answer.handler, answer.text);
    }

    println!("Dot graph:\n{}", process.to_dot());
    println!("Mermaid graph:\n{}", process.to_mermaid());

    Ok(())
}
