use admix_core::{ComponentId, InvalidShardInfo};
use thiserror::Error;

/// Invalid configuration, detected before any dataset graph is built.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigurationError {
    #[error("source has not been set on task builder {task}")]
    MissingSource { task: String },

    #[error("preprocessors have not been set on task builder {task}")]
    MissingPreprocessors { task: String },

    #[error(
        "mixture {mixture} must have same number of tasks and proportions. tasks: {tasks}, proportions: {proportions}"
    )]
    MismatchedProportions {
        mixture: String,
        tasks: usize,
        proportions: usize,
    },

    #[error("mixture {mixture} has duplicate component {component} ({id})")]
    DuplicateComponent {
        mixture: String,
        component: String,
        id: ComponentId,
    },

    #[error("mixture {mixture} has invalid proportion {proportion} for {component}")]
    InvalidProportion {
        mixture: String,
        component: String,
        proportion: f64,
    },

    #[error("repeating indefinitely with shuffling turned on isn't supported (mixture {mixture})")]
    InfiniteShuffle { mixture: String },

    #[error("num_epochs must be at least 1, or unset to repeat indefinitely")]
    ZeroEpochs,

    #[error("invalid shard info: {0}")]
    InvalidShard(#[from] InvalidShardInfo),

    #[error("invalid packing configuration: {0}")]
    InvalidPacking(String),

    #[error("no task or mixture named {0}")]
    UnknownProvider(String),

    #[error("a task or mixture named {0} is already registered")]
    DuplicateProvider(String),

    #[error("mixture definition is cyclic: {0}")]
    CyclicMixture(String),
}

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Data(#[from] anyhow::Error),
}

impl DatasetError {
    pub fn as_configuration(&self) -> Option<&ConfigurationError> {
        match self {
            DatasetError::Configuration(e) => Some(e),
            DatasetError::Data(_) => None,
        }
    }
}
