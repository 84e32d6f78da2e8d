use std::sync::Arc;

use anyhow::{bail, Result};

use crate::{
    lazy::check_index,
    record::{Record, Value},
    traits::{DataSource, RecordSource},
};

/// Synthetic records `{id, tokens}` for smoke runs. Every split has the same
/// number of records, and the source does not advertise that number.
#[derive(Clone, Debug)]
pub struct DummyDataSource {
    splits: Vec<String>,
    num_records: usize,
    seq_len: usize,
}

impl DummyDataSource {
    pub fn new(splits: &[&str], num_records: usize, seq_len: usize) -> Self {
        Self {
            splits: splits.iter().map(|s| s.to_string()).collect(),
            num_records,
            seq_len,
        }
    }
}

struct DummySplit {
    num_records: usize,
    seq_len: usize,
}

impl RecordSource for DummySplit {
    fn len(&self) -> usize {
        self.num_records
    }

    fn get(&self, index: usize) -> Result<Record> {
        check_index(index, self.num_records)?;
        let tokens = (0..self.seq_len)
            .map(|i| ((index + i) % 1024) as i32)
            .collect();
        Ok(Record::from([
            ("id".to_owned(), Value::Int(index as i64)),
            ("tokens".to_owned(), Value::Tokens(tokens)),
        ]))
    }
}

impl DataSource for DummyDataSource {
    fn splits(&self) -> Vec<String> {
        self.splits.clone()
    }

    fn num_input_examples(&self, _split: &str) -> Result<Option<usize>> {
        Ok(None)
    }

    fn get_data_source(&self, split: &str) -> Result<Arc<dyn RecordSource>> {
        if !self.splits.iter().any(|s| s == split) {
            bail!("unknown split {split}");
        }
        Ok(Arc::new(DummySplit {
            num_records: self.num_records,
            seq_len: self.seq_len,
        }))
    }
}
