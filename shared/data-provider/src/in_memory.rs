use std::{collections::BTreeMap, sync::Arc};

use anyhow::{anyhow, Result};

use crate::{
    lazy::check_index,
    record::Record,
    traits::{DataSource, RecordSource},
};

impl RecordSource for Vec<Record> {
    fn len(&self) -> usize {
        Vec::len(self)
    }

    fn get(&self, index: usize) -> Result<Record> {
        check_index(index, Vec::len(self))?;
        Ok(self[index].clone())
    }
}

/// Splits held in memory.
#[derive(Clone, Debug, Default)]
pub struct InMemoryDataSource {
    splits: BTreeMap<String, Arc<Vec<Record>>>,
}

impl InMemoryDataSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(split: impl Into<String>, records: Vec<Record>) -> Self {
        Self::new().with_split(split, records)
    }

    pub fn with_split(mut self, split: impl Into<String>, records: Vec<Record>) -> Self {
        self.splits.insert(split.into(), Arc::new(records));
        self
    }
}

impl DataSource for InMemoryDataSource {
    fn splits(&self) -> Vec<String> {
        self.splits.keys().cloned().collect()
    }

    fn num_input_examples(&self, split: &str) -> Result<Option<usize>> {
        Ok(self.splits.get(split).map(|records| records.len()))
    }

    fn get_data_source(&self, split: &str) -> Result<Arc<dyn RecordSource>> {
        let records = self
            .splits
            .get(split)
            .ok_or_else(|| anyhow!("unknown split {split}"))?;
        Ok(records.clone())
    }
}
