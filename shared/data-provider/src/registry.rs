use std::{collections::BTreeMap, sync::Arc};

use tracing::debug;

use crate::{
    data_provider::Provider, error::ConfigurationError, mixture::Mixture, task::Task,
    traits::DatasetProvider,
};

/// A catalog of tasks and mixture definitions, addressed by name.
///
/// Mixtures are defined by the names of their components, so they may be
/// added in any order; they are built on first use and kept.
#[derive(Debug, Default)]
pub struct Registry {
    tasks: BTreeMap<String, Arc<Task>>,
    mixtures: BTreeMap<String, Vec<(String, f64)>>,
    built: BTreeMap<String, Arc<Mixture>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_free(&self, name: &str) -> Result<(), ConfigurationError> {
        if self.tasks.contains_key(name) || self.mixtures.contains_key(name) {
            return Err(ConfigurationError::DuplicateProvider(name.to_owned()));
        }
        Ok(())
    }

    pub fn add_task(&mut self, task: impl Into<Arc<Task>>) -> Result<(), ConfigurationError> {
        let task = task.into();
        self.check_free(task.name())?;
        self.tasks.insert(task.name().to_owned(), task);
        Ok(())
    }

    pub fn add_mixture(
        &mut self,
        name: impl Into<String>,
        components: Vec<(String, f64)>,
    ) -> Result<(), ConfigurationError> {
        let name = name.into();
        self.check_free(&name)?;
        self.mixtures.insert(name, components);
        Ok(())
    }

    /// Names of all tasks and mixtures, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .tasks
            .keys()
            .chain(self.mixtures.keys())
            .map(String::as_str)
            .collect();
        names.sort();
        names
    }

    pub fn get_task(&self, name: &str) -> Result<Arc<Task>, ConfigurationError> {
        self.tasks
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigurationError::UnknownProvider(name.to_owned()))
    }

    pub fn get(&mut self, name: &str) -> Result<Provider, ConfigurationError> {
        self.resolve(name, &mut Vec::new())
    }

    fn resolve(
        &mut self,
        name: &str,
        path: &mut Vec<String>,
    ) -> Result<Provider, ConfigurationError> {
        if let Some(task) = self.tasks.get(name) {
            return Ok(Provider::Task(task.clone()));
        }
        if let Some(mixture) = self.built.get(name) {
            return Ok(Provider::Mixture(mixture.clone()));
        }
        if path.iter().any(|n| n == name) {
            path.push(name.to_owned());
            return Err(ConfigurationError::CyclicMixture(path.join(" -> ")));
        }
        let definition = self
            .mixtures
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigurationError::UnknownProvider(name.to_owned()))?;

        path.push(name.to_owned());
        let mut components = Vec::with_capacity(definition.len());
        let mut weights = Vec::with_capacity(definition.len());
        for (component, weight) in definition {
            components.push(self.resolve(&component, path)?);
            weights.push(weight);
        }
        path.pop();

        let mixture = Arc::new(Mixture::new(name, components, weights)?);
        debug!(mixture = name, leaves = mixture.leaf_tasks().len(), "built mixture");
        self.built.insert(name.to_owned(), mixture.clone());
        Ok(Provider::Mixture(mixture))
    }
}
