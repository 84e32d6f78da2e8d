use std::{fmt, sync::Arc};

use crate::{
    error::ConfigurationError, preprocessors::Preprocessor, task::Task, traits::DataSource,
    traits::DatasetProvider,
};

/// Collects the parts of a [`Task`] and checks they are all there.
#[derive(Clone)]
pub struct TaskBuilder {
    task_name: String,
    source: Option<Arc<dyn DataSource>>,
    preprocessors: Option<Vec<Preprocessor>>,
}

impl TaskBuilder {
    pub fn new(task_name: impl Into<String>) -> Self {
        Self {
            task_name: task_name.into(),
            source: None,
            preprocessors: None,
        }
    }

    /// A builder holding the name, source and preprocessors of `task`.
    pub fn from_task(task: &Task) -> Self {
        Self {
            task_name: task.name().to_owned(),
            source: Some(task.source().clone()),
            preprocessors: Some(task.get_preprocessors()),
        }
    }

    pub fn set_task_name(mut self, task_name: impl Into<String>) -> Self {
        self.task_name = task_name.into();
        self
    }

    pub fn set_data_source(mut self, source: Arc<dyn DataSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn set_preprocessors(mut self, preprocessors: Vec<Preprocessor>) -> Self {
        self.preprocessors = Some(preprocessors);
        self
    }

    /// A new task with its own id.
    pub fn build(self) -> Result<Task, ConfigurationError> {
        let Some(source) = self.source else {
            return Err(ConfigurationError::MissingSource {
                task: self.task_name,
            });
        };
        let Some(preprocessors) = self.preprocessors else {
            return Err(ConfigurationError::MissingPreprocessors {
                task: self.task_name,
            });
        };
        Ok(Task::new(self.task_name, source, preprocessors))
    }
}

impl fmt::Debug for TaskBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TaskBuilder(task_name={}, source={:?}, preprocessors={:?})",
            self.task_name, self.source, self.preprocessors
        )
    }
}
