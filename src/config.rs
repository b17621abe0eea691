use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

#[derive(Clone)]
pub struct ProcessConfigBuilder {
    config: ProcessConfig,
}

impl ProcessConfigBuilder {
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.config.description = Some(description.into());
        self
    }

    /// Abort a run after this many step invocations.
    pub fn max_dispatches(mut self, max_dispatches: usize) -> Self {
        self.config.max_dispatches = Some(max_dispatches);
        self
    }

    /// Abort a run when a single step invocation takes longer than `timeout`.
    pub fn step_timeout(mut self, timeout: Duration) -> Self {
        self.config.step_timeout = Some(timeout);
        self
    }

    pub fn enable_autosave(mut self) -> Self {
        self.config.autosave = true;
        self
    }

    pub fn save_state_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.save_state_dir = Some(path.into());
        self
    }

    pub fn build(self) -> ProcessConfig {
        self.config
    }
}

/// Process configuration
///
/// Every limit is off by default: a run ends only when its queue is empty or
/// a step fails.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessConfig {
    /// Description of the process
    pub description: Option<String>,
    /// Maximum number of step invocations in one run
    pub max_dispatches: Option<usize>,
    /// Maximum duration of a single step invocation
    pub step_timeout: Option<Duration>,
    /// Write a snapshot after every successful run
    pub autosave: bool,
    /// Directory autosaved snapshots are written to
    pub save_state_dir: Option<PathBuf>,
}

impl ProcessConfig {
    pub fn builder() -> ProcessConfigBuilder {
        ProcessConfigBuilder {
            config: ProcessConfig::default(),
        }
    }

    /// Directory snapshots are written to after a successful run, if autosave is on.
    pub fn autosave_dir(&self) -> Option<&PathBuf> {
        self.save_state_dir.as_ref().filter(|_| self.autosave)
    }
}
