use std::{fmt, sync::Arc};

use admix_core::ComponentId;
use anyhow::Result;
use tracing::{debug, trace};

use crate::{
    error::DatasetError,
    feature_converter::FeatureConverter,
    lazy::{DatasetRef, SourceDataset},
    loader::{DataLoader, DatasetIterator},
    options::{DatasetOptions, DEFAULT_NUM_RECORDS_TO_INSPECT, MAX_NUM_RECORDS_TO_INSPECT},
    preprocessors::Preprocessor,
    record::Record,
    sampler::IndexSampler,
    traits::{DataSource, DatasetProvider},
};

/// A data source bound to an ordered chain of preprocessors.
pub struct Task {
    id: ComponentId,
    name: String,
    source: Arc<dyn DataSource>,
    preprocessors: Vec<Preprocessor>,
}

impl Task {
    pub fn new(
        name: impl Into<String>,
        source: Arc<dyn DataSource>,
        preprocessors: Vec<Preprocessor>,
    ) -> Self {
        Self {
            id: ComponentId::next(),
            name: name.into(),
            source,
            preprocessors,
        }
    }

    pub fn id(&self) -> ComponentId {
        self.id
    }

    pub fn source(&self) -> &Arc<dyn DataSource> {
        &self.source
    }

    /// A copy of the preprocessing chain.
    pub fn get_preprocessors(&self) -> Vec<Preprocessor> {
        self.preprocessors.clone()
    }

    /// The split as an unprocessed lazy dataset, in source order.
    pub(crate) fn source_dataset(&self, split: &str) -> Result<DatasetRef> {
        let source = self.source.get_data_source(split)?;
        Ok(Arc::new(SourceDataset::new(source)))
    }

    /// The task's chain, then the converter's transforms, then batching.
    /// Step `k` of [`Task::get_dataset_by_step`] is the output of `operations[k - 1]`.
    pub fn operations(
        &self,
        options: &DatasetOptions,
        feature_converter: Option<&dyn FeatureConverter>,
    ) -> Vec<Preprocessor> {
        let mut ops = self.get_preprocessors();
        if let Some(converter) = feature_converter {
            ops.extend(converter.get_transforms(options.sequence_lengths.as_ref()));
        }
        ops.extend(options.batch_op());
        ops
    }

    /// Record count of `split`; read from the split itself when the source
    /// does not report it.
    fn num_records(&self, split: &str, source: &DatasetRef) -> Result<usize> {
        Ok(self
            .source
            .num_input_examples(split)?
            .unwrap_or_else(|| source.len()))
    }

    /// Materializes the first `num_records` records after each prefix of the
    /// operation chain. Step 0 holds the raw records and step `k` the records
    /// after the first `k` operations, each step re-run from scratch.
    ///
    /// `num_records` below 1 falls back to [`DEFAULT_NUM_RECORDS_TO_INSPECT`];
    /// it is capped at [`MAX_NUM_RECORDS_TO_INSPECT`] and at the size of the
    /// split. Sharding and epochs are ignored.
    pub fn get_dataset_by_step(
        &self,
        num_records: usize,
        options: &DatasetOptions,
        feature_converter: Option<&dyn FeatureConverter>,
    ) -> Result<Vec<Vec<Record>>, DatasetError> {
        let requested = match num_records {
            0 => DEFAULT_NUM_RECORDS_TO_INSPECT,
            n => n.min(MAX_NUM_RECORDS_TO_INSPECT),
        };
        let source = self.source_dataset(&options.split)?;
        let num_records = requested.min(self.num_records(&options.split, &source)?);
        let seed = options.resolve_seed();
        let ops = self.operations(options, feature_converter);

        let mut steps = Vec::with_capacity(ops.len() + 1);
        for k in 0..=ops.len() {
            let sampler = IndexSampler::new(num_records, None, options.shuffle, Some(1), seed);
            let step = DataLoader::new(source.clone(), sampler, &ops[..k])
                .into_iter()
                .collect::<Result<Vec<_>>>()?;
            trace!(
                task = %self.name,
                step = k,
                op = ?k.checked_sub(1).map(|i| ops[i].name()),
                records = step.len(),
                "inspected step"
            );
            steps.push(step);
        }
        Ok(steps)
    }
}

impl DatasetProvider for Task {
    fn name(&self) -> &str {
        &self.name
    }

    fn splits(&self) -> Vec<String> {
        self.source.splits()
    }

    fn num_input_examples(&self, split: &str) -> Result<Option<usize>, DatasetError> {
        Ok(self.source.num_input_examples(split)?)
    }

    fn get_dataset(
        &self,
        options: &DatasetOptions,
        feature_converter: Option<&dyn FeatureConverter>,
    ) -> Result<DatasetIterator, DatasetError> {
        options.check_epochs()?;
        let source = self.source_dataset(&options.split)?;
        let num_records = self.num_records(&options.split, &source)?;
        let seed = options.resolve_seed();
        let sampler = IndexSampler::new(
            num_records,
            options.shard_info,
            options.shuffle,
            options.num_epochs,
            seed,
        );
        let ops = self.operations(options, feature_converter);
        debug!(
            task = %self.name,
            split = %options.split,
            num_records,
            num_ops = ops.len(),
            seed,
            "building task dataset"
        );
        Ok(DataLoader::new(source, sampler, &ops).into_iter())
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("source", &self.source)
            .field("preprocessors", &self.preprocessors)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        in_memory::InMemoryDataSource,
        preprocessors::{rename_feature, truncate_feature},
        record::{record, Value},
    };
    use pretty_assertions::assert_eq;

    fn source(n: usize) -> Arc<dyn DataSource> {
        let records = (0..n)
            .map(|i| record([("tokens", vec![i as i32; 3])]))
            .collect();
        Arc::new(InMemoryDataSource::from_records("train", records))
    }

    #[test]
    fn test_same_name_distinct_ids() {
        let a = Task::new("t", source(1), vec![]);
        let b = Task::new("t", source(1), vec![]);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_preprocessors_are_copied() {
        let task = Task::new("t", source(1), vec![rename_feature("tokens", "x")]);
        let mut ops = task.get_preprocessors();
        ops.clear();
        assert_eq!(task.get_preprocessors().len(), 1);
    }

    #[test]
    fn test_operations_order() {
        let task = Task::new("t", source(1), vec![truncate_feature("tokens", 1)]);
        let options = DatasetOptions::default().with_batch_size(Some(2));
        let names: Vec<String> = task
            .operations(&options, None)
            .iter()
            .map(|op| op.name().to_owned())
            .collect();
        assert_eq!(names, vec!["truncate(tokens,1)", "batch"]);
    }

    #[test]
    fn test_unsharded_single_epoch_reads_everything() {
        let task = Task::new("t", source(5), vec![]);
        let options = DatasetOptions::default().with_shuffle(false);
        let records: Vec<Record> = task
            .get_dataset(&options, None)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        let firsts: Vec<Value> = records
            .iter()
            .map(|r| Value::Int(r["tokens"].as_tokens().unwrap()[0] as i64))
            .collect();
        assert_eq!(firsts, (0..5).map(Value::Int).collect::<Vec<_>>());
    }

    #[test]
    fn test_missing_split_is_data_error() {
        let task = Task::new("t", source(5), vec![]);
        let err = task
            .get_dataset(&DatasetOptions::default().with_split("nope"), None)
            .unwrap_err();
        assert!(err.as_configuration().is_none());
    }
}
