use std::{fmt, sync::Arc};

use anyhow::Result;

use crate::{
    error::DatasetError, feature_converter::FeatureConverter, loader::DatasetIterator,
    options::DatasetOptions, record::Record,
};

/// Random access to the records of one split.
pub trait RecordSource: Send + Sync {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, index: usize) -> Result<Record>;
}

/// A named collection of splits.
pub trait DataSource: Send + Sync + fmt::Debug {
    fn splits(&self) -> Vec<String>;

    /// Number of records in `split`, if the source knows it without reading.
    fn num_input_examples(&self, split: &str) -> Result<Option<usize>>;

    fn get_data_source(&self, split: &str) -> Result<Arc<dyn RecordSource>>;
}

/// Anything that can hand out a dataset: a task, a mixture, or either.
pub trait DatasetProvider {
    fn name(&self) -> &str;

    fn splits(&self) -> Vec<String>;

    fn num_input_examples(&self, split: &str) -> Result<Option<usize>, DatasetError>;

    fn get_dataset(
        &self,
        options: &DatasetOptions,
        feature_converter: Option<&dyn FeatureConverter>,
    ) -> Result<DatasetIterator, DatasetError>;
}
