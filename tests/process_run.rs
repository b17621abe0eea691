use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use stepflow::{
    config::ProcessConfig,
    event::Event,
    observer::ProcessObserver,
    process::{Process, ProcessBuilder},
    router::{ConfigurationError, RouteTarget},
    runner::{ProcessError, ProcessOutcome, StepExecution},
    snapshot::ProcessSnapshot,
    step::{StepContext, StepDefinition, StepError, StepFunction},
};
use uuid::Uuid;

#[derive(Default)]
struct RecordingObserver {
    log: Mutex<Vec<String>>,
}

impl RecordingObserver {
    fn entries(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn push(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }
}

impl ProcessObserver for RecordingObserver {
    fn on_run_started(&self, _run_id: Uuid, process: &str, event: &Event) {
        self.push(format!("run started: {process} <- {}", event.name));
    }

    fn on_step_started(&self, _run_id: Uuid, step: &str, function: &str) {
        self.push(format!("step started: {step}.{function}"));
    }

    fn on_step_completed(&self, _run_id: Uuid, execution: &StepExecution) {
        self.push(format!(
            "step completed: {} -> {}",
            execution.step,
            execution.emitted.join(",")
        ));
    }

    fn on_event_dropped(&self, _run_id: Uuid, step: &str, event: &Event) {
        self.push(format!("dropped: {step}/{}", event.name));
    }

    fn on_run_finished(&self, outcome: &ProcessOutcome) {
        self.push(format!("run finished: {}", outcome.dispatches()));
    }

    fn on_run_failed(&self, _run_id: Uuid, error: &ProcessError) {
        self.push(format!("run failed: {error}"));
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Article {
    title: String,
    sections: Vec<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Writer {
    pending: Vec<String>,
    written: Vec<String>,
}

async fn outline(_ctx: StepContext, topic: String) -> Result<Vec<String>, StepError> {
    Ok(vec![format!("{topic}: background"), format!("{topic}: outlook")])
}

async fn start_writing(ctx: StepContext, sections: Vec<String>) -> Result<(), StepError> {
    ctx.set_state(&Writer {
        pending: sections,
        written: Vec::new(),
    })
    .await?;
    next_section(&ctx).await
}

async fn section_written(ctx: StepContext, section: String) -> Result<(), StepError> {
    ctx.update_state(|writer: &mut Writer| writer.written.push(section))
        .await?;
    next_section(&ctx).await
}

async fn next_section(ctx: &StepContext) -> Result<(), StepError> {
    let next = ctx
        .update_state(|writer: &mut Writer| writer.pending.pop())
        .await?;
    match next {
        Some(section) => ctx.emit_event("SectionRequested", &section),
        None => {
            let writer: Writer = ctx.state().await?;
            ctx.emit_event(
                "ArticleReady",
                &Article {
                    title: "Draft".to_owned(),
                    sections: writer.written,
                },
            )
        }
    }
}

async fn write_section(_ctx: StepContext, section: String) -> Result<String, StepError> {
    Ok(section.to_uppercase())
}

fn article_builder() -> ProcessBuilder {
    let mut builder = ProcessBuilder::new("CreateArticle");
    builder
        .add_step(
            StepDefinition::new("Outline").with_function(StepFunction::typed("Outline", outline)),
        )
        .add_step(
            StepDefinition::new("Content")
                .with_function(StepFunction::typed("Start", start_writing))
                .with_function(StepFunction::typed("Continue", section_written))
                .with_state(&Writer::default())
                .unwrap(),
        )
        .add_step(
            StepDefinition::new("WriteSection")
                .with_function(StepFunction::typed("Write", write_section)),
        );
    builder
        .on_input_event("CreateArticle")
        .send_event_to(RouteTarget::step("Outline"))
        .unwrap();
    builder
        .on_function_result("Outline", "Outline")
        .send_event_to(RouteTarget::function("Content", "Start"))
        .unwrap();
    builder
        .on_event("Content", "SectionRequested")
        .send_event_to(RouteTarget::step("WriteSection"))
        .unwrap();
    builder
        .on_function_result("WriteSection", "Write")
        .send_event_to(RouteTarget::function("Content", "Continue"))
        .unwrap();
    builder
}

fn article_process() -> Process {
    article_builder().build().unwrap()
}

#[tokio::test]
async fn test_article_loop_returns_typed_result() {
    let process = article_process();

    let outcome = process
        .start("CreateArticle", json!("rust"))
        .await
        .unwrap();

    let article: Article = outcome.output("ArticleReady").unwrap();
    assert_eq!(article.sections, ["RUST: OUTLOOK", "RUST: BACKGROUND"]);
    // Outline, Start, then Write + Continue for each section.
    assert_eq!(outcome.dispatches(), 6);
    assert_eq!(outcome.terminal_events.len(), 1);
    let writer: Writer = outcome.state("Content").unwrap();
    assert!(writer.pending.is_empty());
}

#[tokio::test]
async fn test_observer_records_run_in_order() {
    let observer = Arc::new(RecordingObserver::default());
    let process = article_builder()
        .observer(Arc::clone(&observer) as Arc<dyn ProcessObserver>)
        .build()
        .unwrap();

    process
        .start("CreateArticle", json!("tides"))
        .await
        .unwrap();

    let entries = observer.entries();
    assert_eq!(entries.first().unwrap(), "run started: CreateArticle <- CreateArticle");
    assert_eq!(entries[1], "step started: Outline.Outline");
    assert_eq!(entries[2], "step completed: Outline -> Outline.OnResult");
    assert_eq!(entries[3], "step started: Content.Start");
    assert!(entries.contains(&"dropped: Content/ArticleReady".to_owned()));
    assert_eq!(entries.last().unwrap(), "run finished: 6");
}

#[tokio::test]
async fn test_runs_of_one_process_do_not_share_state() {
    let process = article_process();

    let (first, second) = tokio::join!(
        process.start("CreateArticle", json!("moss")),
        process.start("CreateArticle", json!("lichen"))
    );

    let first: Article = first.unwrap().output("ArticleReady").unwrap();
    let second: Article = second.unwrap().output("ArticleReady").unwrap();
    assert!(first.sections.iter().all(|section| section.starts_with("MOSS")));
    assert!(second.sections.iter().all(|section| section.starts_with("LICHEN")));
}

#[tokio::test]
async fn test_invalid_input_aborts_with_step_error() {
    let process = article_process();

    let err = process
        .start("CreateArticle", json!({ "not": "a topic" }))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ProcessError::StepExecution {
            source: StepError::InvalidInput { .. },
            ..
        }
    ));
}

#[tokio::test]
async fn test_unknown_input_event_is_a_configuration_error() {
    let observer = Arc::new(RecordingObserver::default());
    let process = article_builder()
        .observer(Arc::clone(&observer) as Arc<dyn ProcessObserver>)
        .build()
        .unwrap();

    let err = process.start("Publish", Value::Null).await.unwrap_err();

    assert!(matches!(
        err,
        ProcessError::Configuration(ConfigurationError::MissingEntry(_))
    ));
    assert_eq!(observer.entries().len(), 1);
    assert!(observer.entries()[0].starts_with("run failed"));
}

#[test]
fn test_ambiguous_target_is_rejected_at_build_time() {
    let mut builder = article_builder();
    builder
        .on_event("Outline", "Retry")
        .send_event_to(RouteTarget::step("Content"))
        .unwrap();

    let err = builder.build().unwrap_err();

    assert!(matches!(err, ConfigurationError::AmbiguousTarget { ref step, .. } if step == "Content"));
}

#[tokio::test]
async fn test_snapshot_round_trip_through_autosave() {
    let dir = tempfile::tempdir().unwrap();
    let process = article_builder()
        .with_config(
            ProcessConfig::builder()
                .description("Writes short articles")
                .enable_autosave()
                .save_state_dir(dir.path())
                .build(),
        )
        .build()
        .unwrap();

    let outcome = process
        .start("CreateArticle", json!("kelp"))
        .await
        .unwrap();

    let path = dir
        .path()
        .join(format!("CreateArticle-{}.snapshot", outcome.run_id));
    let snapshot = ProcessSnapshot::load(&path).await.unwrap();
    snapshot.verify(&process).unwrap();
    assert_eq!(snapshot.states, outcome.states);
    assert_eq!(snapshot.terminal_events, outcome.terminal_events);
}

#[test]
fn test_mermaid_export_shows_the_loop() {
    let mermaid = article_process().to_mermaid();

    assert!(mermaid.contains("SectionRequested → Write"));
    assert!(mermaid.contains("Write.OnResult → Continue"));
    assert!(mermaid.contains("Outline.OnResult → Start"));
}
