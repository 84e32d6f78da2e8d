use std::sync::Arc;

use admix_core::ComponentId;

use crate::{
    error::DatasetError, feature_converter::FeatureConverter, loader::DatasetIterator,
    mixture::Mixture, options::DatasetOptions, task::Task, traits::DatasetProvider,
};

/// Either a task or a mixture.
#[derive(Clone, Debug)]
pub enum Provider {
    Task(Arc<Task>),
    Mixture(Arc<Mixture>),
}

impl Provider {
    pub fn id(&self) -> ComponentId {
        match self {
            Provider::Task(task) => task.id(),
            Provider::Mixture(mixture) => mixture.id(),
        }
    }

    pub fn as_task(&self) -> Option<&Arc<Task>> {
        match self {
            Provider::Task(task) => Some(task),
            Provider::Mixture(_) => None,
        }
    }

    pub fn as_mixture(&self) -> Option<&Arc<Mixture>> {
        match self {
            Provider::Task(_) => None,
            Provider::Mixture(mixture) => Some(mixture),
        }
    }
}

impl DatasetProvider for Provider {
    fn name(&self) -> &str {
        match self {
            Provider::Task(task) => task.name(),
            Provider::Mixture(mixture) => mixture.name(),
        }
    }

    fn splits(&self) -> Vec<String> {
        match self {
            Provider::Task(task) => task.splits(),
            Provider::Mixture(mixture) => mixture.splits(),
        }
    }

    fn num_input_examples(&self, split: &str) -> Result<Option<usize>, DatasetError> {
        match self {
            Provider::Task(task) => task.num_input_examples(split),
            Provider::Mixture(mixture) => mixture.num_input_examples(split),
        }
    }

    fn get_dataset(
        &self,
        options: &DatasetOptions,
        feature_converter: Option<&dyn FeatureConverter>,
    ) -> Result<DatasetIterator, DatasetError> {
        match self {
            Provider::Task(task) => task.get_dataset(options, feature_converter),
            Provider::Mixture(mixture) => mixture.get_dataset(options, feature_converter),
        }
    }
}

impl From<Task> for Provider {
    fn from(task: Task) -> Self {
        Provider::Task(Arc::new(task))
    }
}

impl From<Arc<Task>> for Provider {
    fn from(task: Arc<Task>) -> Self {
        Provider::Task(task)
    }
}

impl From<Mixture> for Provider {
    fn from(mixture: Mixture) -> Self {
        Provider::Mixture(Arc::new(mixture))
    }
}

impl From<Arc<Mixture>> for Provider {
    fn from(mixture: Arc<Mixture>) -> Self {
        Provider::Mixture(mixture)
    }
}

/// Reads `provider` with `options`, whichever kind it is.
pub fn get_dataset(
    provider: &Provider,
    options: &DatasetOptions,
    feature_converter: Option<&dyn FeatureConverter>,
) -> Result<DatasetIterator, DatasetError> {
    provider.get_dataset(options, feature_converter)
}
