use std::collections::VecDeque;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;
use stepflow::{
    config::ProcessConfig,
    process::ProcessBuilder,
    router::RouteTarget,
    step::{StepContext, StepDefinition, StepError, StepFunction},
};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
struct Research {
    topic: String,
    notes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
struct Outline {
    topic: String,
    title: String,
    sections: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
struct SectionRequest {
    topic: String,
    section: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
struct SectionResearch {
    section: String,
    notes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
struct Section {
    heading: String,
    body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
struct Draft {
    title: String,
    sections: Vec<Section>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
enum ContentStatus {
    #[default]
    Idle,
    Writing,
    Complete,
}

/// State of the content step, kept for the whole run.
#[derive(Debug, Default, Serialize, Deserialize)]
struct ContentState {
    topic: String,
    title: String,
    pending_sections: VecDeque<String>,
    generated_sections: Vec<Section>,
    status: ContentStatus,
}

// The language model is replaced by canned text so the demo runs offline.

async fn research_topic(_ctx: StepContext, topic: String) -> Result<Research, StepError> {
    tracing::info!(%topic, "Researching topic");
    Ok(Research {
        notes: vec![
            format!("{topic} has a long history"),
            format!("{topic} is changing quickly"),
        ],
        topic,
    })
}

async fn create_outline(_ctx: StepContext, research: Research) -> Result<Outline, StepError> {
    tracing::info!(notes = research.notes.len(), "Creating outline");
    Ok(Outline {
        title: format!("A Short Guide to {}", research.topic),
        sections: vec![
            "Origins".to_owned(),
            "Where Things Stand".to_owned(),
            "What Comes Next".to_owned(),
        ],
        topic: research.topic,
    })
}

async fn start_content(ctx: StepContext, outline: Outline) -> Result<(), StepError> {
    ctx.set_state(&ContentState {
        topic: outline.topic,
        title: outline.title,
        pending_sections: outline.sections.into(),
        generated_sections: Vec::new(),
        status: ContentStatus::Writing,
    })
    .await?;
    request_next_section(&ctx).await
}

async fn continue_content(ctx: StepContext, section: Section) -> Result<(), StepError> {
    ctx.update_state(|state: &mut ContentState| state.generated_sections.push(section))
        .await?;
    request_next_section(&ctx).await
}

/// Ask for the next pending section, or hand the draft on once all are written.
async fn request_next_section(ctx: &StepContext) -> Result<(), StepError> {
    let request = ctx
        .update_state(|state: &mut ContentState| {
            let section = state.pending_sections.pop_front();
            if section.is_none() {
                state.status = ContentStatus::Complete;
            }
            section.map(|section| SectionRequest {
                topic: state.topic.clone(),
                section,
            })
        })
        .await?;

    match request {
        Some(request) => ctx.emit_event("SectionRequested", &request),
        None => {
            let state: ContentState = ctx.state().await?;
            ctx.emit_event(
                "ContentComplete",
                &Draft {
                    title: state.title,
                    sections: state.generated_sections,
                },
            )
        }
    }
}

async fn research_section(
    _ctx: StepContext,
    request: SectionRequest,
) -> Result<SectionResearch, StepError> {
    tracing::info!(section = %request.section, "Researching section");
    Ok(SectionResearch {
        notes: vec![format!(
            "{} matters for anyone curious about {}",
            request.section, request.topic
        )],
        section: request.section,
    })
}

async fn write_section(_ctx: StepContext, research: SectionResearch) -> Result<Section, StepError> {
    Ok(Section {
        body: research.notes.join(" "),
        heading: research.section,
    })
}

async fn finalize_article(_ctx: StepContext, draft: Draft) -> Result<String, StepError> {
    let mut article = format!("# {}\n", draft.title);
    for section in draft.sections {
        article.push_str(&format!("\n## {}\n\n{}\n", section.heading, section.body));
    }
    Ok(article)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut builder = ProcessBuilder::new("CreateArticle").with_config(
        ProcessConfig::builder()
            .description("Research a topic and write an article section by section")
            .max_dispatches(100)
            .build(),
    );
    builder
        .add_step(
            StepDefinition::new("ResearchTopic")
                .with_function(StepFunction::typed("Research", research_topic)),
        )
        .add_step(
            StepDefinition::new("CreateOutline")
                .with_function(StepFunction::typed("Outline", create_outline)),
        )
        .add_step(
            StepDefinition::new("GenerateContent")
                .with_function(StepFunction::typed("StartGenerateContent", start_content))
                .with_function(StepFunction::typed("ContinueGenerateContent", continue_content))
                .with_state(&ContentState::default())?,
        )
        .add_step(
            StepDefinition::new("ResearchSection")
                .with_function(StepFunction::typed("ResearchSection", research_section)),
        )
        .add_step(
            StepDefinition::new("WriteSection")
                .with_function(StepFunction::typed("WriteSection", write_section)),
        )
        .add_step(
            StepDefinition::new("FinalizeArticle")
                .with_function(StepFunction::typed("Finalize", finalize_article)),
        );

    builder
        .on_input_event("CreateArticle")
        .send_event_to(RouteTarget::step("ResearchTopic"))?;
    builder
        .on_function_result("ResearchTopic", "Research")
        .send_event_to(RouteTarget::step("CreateOutline"))?;
    builder
        .on_function_result("CreateOutline", "Outline")
        .send_event_to(RouteTarget::function("GenerateContent", "StartGenerateContent"))?;
    builder
        .on_event("GenerateContent", "SectionRequested")
        .send_event_to(RouteTarget::step("ResearchSection"))?;
    builder
        .on_function_result("ResearchSection", "ResearchSection")
        .send_event_to(RouteTarget::step("WriteSection"))?;
    builder
        .on_function_result("WriteSection", "WriteSection")
        .send_event_to(RouteTarget::function(
            "GenerateContent",
            "ContinueGenerateContent",
        ))?;
    builder
        .on_event("GenerateContent", "ContentComplete")
        .send_event_to(RouteTarget::step("FinalizeArticle"))?;
    let process = builder.build()?;

    let outcome = process
        .start("CreateArticle", json!("Tide Pools"))
        .await?;

    let article: String = outcome.output("Finalize.OnResult")?;
    println!("{article}");
    println!("Steps run: {}", outcome.dispatches());
    println!("Mermaid graph:\n{}", process.to_mermaid());

    Ok(())
}
