//! Event-driven step orchestration for multi-stage workflows.
//!
//! Stepflow runs *processes*: directed graphs of named steps connected by
//! named events. At a high level, it provides a few major components:
//!
//! * [Steps][step] made of one or more named functions, with optional
//!   state that lives for the duration of a run.
//! * A static [event router][router] built before a process runs, mapping
//!   `(step, event)` pairs to the step function that handles them.
//! * A [runner][runner] that drains a run's event queue one invocation at a
//!   time and hands back a typed [`ProcessOutcome`].
//! * [Visualization][graph] of the process graph as DOT or Mermaid text.
//! * [Persistence][snapshot] of a run's step state outside the process.
//!
//! [step]: crate::step
//! [router]: crate::router
//! [runner]: crate::runner
//! [graph]: crate::graph
//! [snapshot]: crate::snapshot
//! [`ProcessOutcome`]: crate::runner::ProcessOutcome
//!
//! # A Tour of Stepflow
//!
//! ## Building a Process
//!
//! A [`ProcessBuilder`] collects [`StepDefinition`]s and routing edges. Edges
//! come from three places:
//!
//! * `on_input_event` routes an event sent by the caller starting a run.
//! * `on_event` routes an event a step emits explicitly through its
//!   [`StepContext`].
//! * `on_function_result` routes the implicit completion event produced when
//!   a step function returns without emitting anything.
//!
//! [`ProcessBuilder::build`] checks the graph once and freezes it into a
//! [`Process`]. Ambiguous or dangling edges are reported as a
//! [`ConfigurationError`].
//!
//! [`ProcessBuilder`]: crate::process::ProcessBuilder
//! [`ProcessBuilder::build`]: crate::process::ProcessBuilder::build
//! [`Process`]: crate::process::Process
//! [`StepDefinition`]: crate::step::StepDefinition
//! [`StepContext`]: crate::step::StepContext
//! [`ConfigurationError`]: crate::router::ConfigurationError
//!
//! ### Example: Routing on a Decision
//!
//! ```rust,no_run
//! use serde_json::Value;
//! use stepflow::process::ProcessBuilder;
//! use stepflow::router::RouteTarget;
//! use stepflow::step::{StepContext, StepDefinition, StepError, StepFunction};
//!
//! async fn generate(_ctx: StepContext, _input: ()) -> Result<u32, StepError> {
//!     Ok(14)
//! }
//!
//! async fn decide(ctx: StepContext, value: u32) -> Result<(), StepError> {
//!     let outcome = if value > 10 { "HighOutcome" } else { "LowOutcome" };
//!     ctx.emit_event(outcome, &value)
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut builder = ProcessBuilder::new("RandomDecisionMaking");
//! builder
//!     .add_step(StepDefinition::new("GenerateNumber").with_function(StepFunction::typed("Generate", generate)))
//!     .add_step(StepDefinition::new("MakeDecision").with_function(StepFunction::typed("Decide", decide)));
//! builder
//!     .on_input_event("StartProcess")
//!     .send_event_to(RouteTarget::step("GenerateNumber"))?;
//! builder
//!     .on_function_result("GenerateNumber", "Generate")
//!     .send_event_to(RouteTarget::step("MakeDecision"))?;
//! let process = builder.build()?;
//!
//! let outcome = process.start("StartProcess", Value::Null).await?;
//! let value: u32 = outcome.output("HighOutcome")?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Running a Process
//!
//! Each call to `Process::start` creates an independent run with fresh step
//! state. The run:
//!
//! 1. resolves the input event, failing before any step runs when nothing
//!    subscribes to it;
//! 2. pops one dispatch at a time from a FIFO queue and awaits the step
//!    function to completion;
//! 3. routes every event the invocation produced, in emission order, and
//!    keeps the ones nobody subscribes to as terminal events;
//! 4. finishes when the queue is empty.
//!
//! There is no cycle detection. A step may route its own completion back to
//! itself and stop once its state says there is nothing left to do. Limits on
//! the number of invocations and on the duration of a single invocation are
//! available through [`ProcessConfig`].
//!
//! [`ProcessConfig`]: crate::config::ProcessConfig
//!
//! ## Observing Runs
//!
//! Every run logs through `tracing` inside a `process_run` span. For custom
//! telemetry, register a [`ProcessObserver`] on the builder.
//!
//! [`ProcessObserver`]: crate::observer::ProcessObserver
//!
//! For complete processes, see the demos/ directory in the repository.
//!

pub mod config;
pub mod event;
pub mod graph;
pub mod observer;
pub mod persistence;
pub mod process;
pub mod router;
pub mod runner;
pub mod snapshot;
pub mod step;
