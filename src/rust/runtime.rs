use std::env;
use std::thread;
use std::time::Duration;

use crate::classifier::TrainParams;
use crate::features::DEFAULT_FEATURE_WIDTH;

/// Settings of a [`TrainingOrchestrator`](crate::TrainingOrchestrator).
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    /// Trainings allowed to run at once; further requests wait in `training-pending`.
    pub max_concurrent_trainings: usize,
    pub train_params: TrainParams,
    /// Number of hash buckets used by the featurizer.
    pub feature_width: usize,
    /// How long a finished session stays pollable before
    /// [`prune_terminal`](crate::TrainingOrchestrator::prune_terminal) drops it.
    pub terminal_retention: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_concurrent_trainings: thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
            train_params: TrainParams::default(),
            feature_width: DEFAULT_FEATURE_WIDTH,
            terminal_retention: Duration::from_secs(10 * 60),
        }
    }
}

impl RuntimeConfig {
    /// Defaults overridden by `INTENTFORGE_MAX_TRAININGS` and
    /// `INTENTFORGE_TRAINING_EPOCHS` when they hold positive integers.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(n) = positive_env("INTENTFORGE_MAX_TRAININGS") {
            config.max_concurrent_trainings = n;
        }
        if let Some(n) = positive_env("INTENTFORGE_TRAINING_EPOCHS") {
            config.train_params.epochs = n;
        }
        config
    }

    pub fn with_max_concurrent_trainings(mut self, n: usize) -> Self {
        self.max_concurrent_trainings = n.max(1);
        self
    }

    pub fn with_train_params(mut self, params: TrainParams) -> Self {
        self.train_params = params;
        self
    }

    pub fn with_feature_width(mut self, width: usize) -> Self {
        self.feature_width = width.max(1);
        self
    }

    pub fn with_terminal_retention(mut self, retention: Duration) -> Self {
        self.terminal_retention = retention;
        self
    }
}

fn positive_env(name: &str) -> Option<usize> {
    let value = env::var(name).ok()?;
    match value.trim().parse::<usize>() {
        Ok(n) if n > 0 => Some(n),
        _ => {
            log::warn!("Ignoring {}={:?}: expected a positive integer", name, value);
            None
        }
    }
}
