//! Weighted, arbitrarily nested compositions of tasks.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    sync::Arc,
};

use admix_core::{split_seed, ComponentId};
use tracing::{debug, info};

use crate::{
    data_provider::Provider,
    error::{ConfigurationError, DatasetError},
    feature_converter::FeatureConverter,
    lazy::{ConcatDataset, DatasetRef, MixedDataset, RepeatDataset, ShardDataset, ShuffleDataset},
    loader::{DataLoader, DatasetIterator},
    options::DatasetOptions,
    preprocessors::apply_operations,
    sampler::IndexSampler,
    task::Task,
    traits::DatasetProvider,
};

pub struct Mixture {
    id: ComponentId,
    name: String,
    components: Vec<(ComponentId, Provider)>,
    proportions: BTreeMap<ComponentId, f64>,
    leaf_tasks: Vec<Arc<Task>>,
    total_proportion: f64,
    splits: Vec<String>,
}

impl Mixture {
    pub fn new(
        name: impl Into<String>,
        tasks: Vec<Provider>,
        proportions: Vec<f64>,
    ) -> Result<Self, ConfigurationError> {
        let name = name.into();
        if tasks.len() != proportions.len() {
            return Err(ConfigurationError::MismatchedProportions {
                mixture: name,
                tasks: tasks.len(),
                proportions: proportions.len(),
            });
        }

        let mut components = Vec::with_capacity(tasks.len());
        let mut proportion_table = BTreeMap::new();
        for (component, proportion) in tasks.into_iter().zip(proportions) {
            let id = component.id();
            if !proportion.is_finite() || proportion < 0.0 {
                return Err(ConfigurationError::InvalidProportion {
                    mixture: name,
                    component: component.name().to_owned(),
                    proportion,
                });
            }
            if proportion_table.insert(id, proportion).is_some() {
                return Err(ConfigurationError::DuplicateComponent {
                    mixture: name,
                    component: component.name().to_owned(),
                    id,
                });
            }
            components.push((id, component));
        }

        let mut leaves = BTreeMap::new();
        for (_, component) in &components {
            match component {
                Provider::Task(task) => {
                    leaves.insert(task.id(), task.clone());
                }
                Provider::Mixture(mixture) => {
                    for task in &mixture.leaf_tasks {
                        leaves.insert(task.id(), task.clone());
                    }
                }
            }
        }
        let mut leaf_tasks: Vec<Arc<Task>> = leaves.into_values().collect();
        leaf_tasks.sort_by(|a, b| a.name().cmp(b.name()).then(a.id().cmp(&b.id())));

        let splits: BTreeSet<String> = components.iter().flat_map(|(_, c)| c.splits()).collect();

        Ok(Self {
            id: ComponentId::next(),
            name,
            total_proportion: proportion_table.values().sum(),
            components,
            proportions: proportion_table,
            leaf_tasks,
            splits: splits.into_iter().collect(),
        })
    }

    pub fn id(&self) -> ComponentId {
        self.id
    }

    /// Direct components, in construction order.
    pub fn tasks_or_mixtures(&self) -> impl Iterator<Item = &Provider> {
        self.components.iter().map(|(_, component)| component)
    }

    /// Every task reachable through any nesting depth, once each, sorted by
    /// name (ties by id).
    pub fn leaf_tasks(&self) -> &[Arc<Task>] {
        &self.leaf_tasks
    }

    /// Sum of the direct proportions.
    pub fn total_proportion(&self) -> f64 {
        self.total_proportion
    }

    fn contains_leaf(&self, task: &Task) -> bool {
        self.leaf_tasks.iter().any(|leaf| leaf.id() == task.id())
    }

    /// Weight of `task` in this mixture. Direct weights are taken as is; each
    /// sub-mixture's share is split among its leaves by their weights
    /// normalized to that sub-mixture's total.
    pub fn get_proportion(&self, task: &Task) -> f64 {
        if !self.contains_leaf(task) {
            return 0.0;
        }
        let mut proportion = self.proportions.get(&task.id()).copied().unwrap_or(0.0);
        for (id, component) in &self.components {
            let Provider::Mixture(sub) = component else {
                continue;
            };
            if sub.total_proportion > 0.0 && sub.contains_leaf(task) {
                proportion +=
                    self.proportions[id] * sub.get_proportion(task) / sub.total_proportion;
            }
        }
        proportion
    }

    /// The records of one task as this mixture would read them: sharded,
    /// repeated once per epoch, and preprocessed then shuffled per epoch with
    /// seeds split off the request seed.
    ///
    /// An unbounded epoch count yields a single pass; repeating is left to the
    /// mixed dataset.
    pub fn get_task_lazy_dataset(
        &self,
        task: &Task,
        options: &DatasetOptions,
        feature_converter: Option<&dyn FeatureConverter>,
    ) -> Result<DatasetRef, DatasetError> {
        options.check_epochs()?;
        let mut ds = task.source_dataset(&options.split)?;
        if let Some(shard_info) = options.shard_info {
            ds = Arc::new(ShardDataset::new(ds, shard_info));
        }

        let ops = task.operations(options, feature_converter);
        let mut running_seed = options.resolve_seed();
        let mut epochs: Vec<DatasetRef> = Vec::new();
        for _ in 0..options.num_epochs.unwrap_or(1) {
            let (next_epoch_seed, prep_seed) = split_seed(running_seed);
            running_seed = next_epoch_seed;
            let (prep_seed, shuffle_seed) = split_seed(prep_seed);

            let mut epoch = apply_operations(ds.clone(), &ops, Some(prep_seed));
            if options.shuffle {
                epoch = Arc::new(ShuffleDataset::new(epoch, shuffle_seed));
            }
            epochs.push(epoch);
        }

        debug!(
            mixture = %self.name,
            task = %task.name(),
            epochs = epochs.len(),
            num_ops = ops.len(),
            "built task lazy dataset"
        );
        Ok(match epochs.len() {
            1 => epochs.remove(0),
            _ => Arc::new(ConcatDataset::new(epochs)),
        })
    }

    /// All leaf tasks mixed by their resolved proportions, stopping at the
    /// first exhausted task, then post-processed.
    ///
    /// Post-mix operations (feature conversion, batching) run without a seed,
    /// so any randomness they draw is not reproducible.
    pub fn get_lazy_dataset(
        &self,
        options: &DatasetOptions,
        feature_converter: Option<&dyn FeatureConverter>,
    ) -> Result<DatasetRef, DatasetError> {
        if options.num_epochs.is_none() && options.shuffle {
            return Err(ConfigurationError::InfiniteShuffle {
                mixture: self.name.clone(),
            }
            .into());
        }
        options.check_epochs()?;

        let task_options = options
            .clone()
            .with_seed(Some(options.resolve_seed()))
            .with_batch_size(None);
        let mut datasets = Vec::with_capacity(self.leaf_tasks.len());
        let mut proportions = Vec::with_capacity(self.leaf_tasks.len());
        for task in &self.leaf_tasks {
            datasets.push(self.get_task_lazy_dataset(task, &task_options, None)?);
            proportions.push(self.get_proportion(task));
        }
        info!(
            mixture = %self.name,
            seed = ?task_options.seed,
            proportions = ?self
                .leaf_tasks
                .iter()
                .map(|t| t.name())
                .zip(&proportions)
                .collect::<Vec<_>>(),
            "building mixture dataset"
        );

        let mixed: DatasetRef = Arc::new(MixedDataset::new(datasets, &proportions, true));

        let mut post_mix_ops = feature_converter
            .map(|converter| converter.get_transforms(options.sequence_lengths.as_ref()))
            .unwrap_or_default();
        post_mix_ops.extend(options.batch_op());
        let ds = apply_operations(mixed, &post_mix_ops, None);

        Ok(match options.num_epochs {
            None => Arc::new(RepeatDataset::new(ds, None)),
            Some(_) => ds,
        })
    }
}

impl DatasetProvider for Mixture {
    fn name(&self) -> &str {
        &self.name
    }

    fn splits(&self) -> Vec<String> {
        self.splits.clone()
    }

    /// Sum over the direct components that have `split`; unknown if any of
    /// them does not know its count.
    fn num_input_examples(&self, split: &str) -> Result<Option<usize>, DatasetError> {
        let mut total = 0usize;
        for component in self.tasks_or_mixtures() {
            if !component.splits().iter().any(|s| s == split) {
                continue;
            }
            match component.num_input_examples(split)? {
                Some(n) => total += n,
                None => return Ok(None),
            }
        }
        Ok(Some(total))
    }

    fn get_dataset(
        &self,
        options: &DatasetOptions,
        feature_converter: Option<&dyn FeatureConverter>,
    ) -> Result<DatasetIterator, DatasetError> {
        let ds = self.get_lazy_dataset(options, feature_converter)?;
        let sampler = IndexSampler::new(ds.len(), None, false, Some(1), 0);
        Ok(DataLoader::new(ds, sampler, &[]).into_iter())
    }
}

impl fmt::Debug for Mixture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mixture")
            .field("id", &self.id)
            .field("name", &self.name)
            .field(
                "components",
                &self
                    .components
                    .iter()
                    .map(|(id, c)| (c.name(), self.proportions[id]))
                    .collect::<Vec<_>>(),
            )
            .field("total_proportion", &self.total_proportion)
            .finish()
    }
}
