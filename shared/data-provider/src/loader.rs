use std::{fmt, sync::Arc};

use admix_core::split_seed;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{
    lazy::DatasetRef,
    preprocessors::{apply_operations, Preprocessor},
    record::Record,
    sampler::{IndexSampler, SampledDataset},
};

/// Reads a source through a sampler and a chain of operations.
///
/// Operation seeds are derived from the sampler seed: the chain starts from
/// the second half of its split and advances after each operation, so the
/// sampler's permutations and the operations never share key material.
pub struct DataLoader {
    dataset: DatasetRef,
}

impl DataLoader {
    pub fn new(source: DatasetRef, sampler: IndexSampler, operations: &[Preprocessor]) -> Self {
        let (_, prep_seed) = split_seed(sampler.seed());
        let sampled: DatasetRef = Arc::new(SampledDataset::new(source, Arc::new(sampler)));
        Self {
            dataset: apply_operations(sampled, operations, Some(prep_seed)),
        }
    }

    /// The fully assembled dataset graph.
    pub fn dataset(&self) -> &DatasetRef {
        &self.dataset
    }
}

impl IntoIterator for DataLoader {
    type Item = Result<Record>;
    type IntoIter = DatasetIterator;

    fn into_iter(self) -> Self::IntoIter {
        DatasetIterator::new(self.dataset)
    }
}

/// Position of a [`DatasetIterator`], for checkpointing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IteratorState {
    pub next_index: usize,
}

/// Pulls records from a dataset in index order, skipping sparse slots.
///
/// A failing element is yielded as an error and iteration moves on past it,
/// so a consumer may choose to skip bad records.
pub struct DatasetIterator {
    dataset: DatasetRef,
    next_index: usize,
}

impl DatasetIterator {
    pub fn new(dataset: DatasetRef) -> Self {
        Self {
            dataset,
            next_index: 0,
        }
    }

    pub fn state(&self) -> IteratorState {
        IteratorState {
            next_index: self.next_index,
        }
    }

    pub fn restore(&mut self, state: IteratorState) {
        self.next_index = state.next_index;
    }

    /// Upper bound on the records left; sparse slots make the real count lower.
    pub fn len_hint(&self) -> usize {
        self.dataset.len().saturating_sub(self.next_index)
    }

    pub fn dataset(&self) -> &DatasetRef {
        &self.dataset
    }
}

impl fmt::Debug for DatasetIterator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatasetIterator")
            .field("next_index", &self.next_index)
            .field("len", &self.dataset.len())
            .finish()
    }
}

impl Iterator for DatasetIterator {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.next_index < self.dataset.len() {
            let index = self.next_index;
            self.next_index += 1;
            match self
                .dataset
                .get(index)
                .with_context(|| format!("failed to read element {index}"))
            {
                Ok(Some(record)) => return Some(Ok(record)),
                Ok(None) => continue,
                Err(err) => return Some(Err(err)),
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.len_hint()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        lazy::tests::range,
        preprocessors::{filter_empty, Preprocessor},
        record::Value,
    };
    use anyhow::bail;
    use pretty_assertions::assert_eq;

    fn collect_ids(iter: impl Iterator<Item = Result<Record>>) -> Vec<i64> {
        iter.map(|r| r.unwrap()["id"].as_int().unwrap()).collect()
    }

    #[test]
    fn test_loader_applies_ops_in_order() {
        let double = Preprocessor::map("double", |mut r| {
            let id = r["id"].as_int().unwrap();
            r.insert("id".into(), Value::Int(id * 2));
            Ok(r)
        });
        let odd_only = Preprocessor::filter("odd", |r| Ok(r["id"].as_int().unwrap() % 2 == 1));
        let sampler = IndexSampler::new(5, None, false, Some(1), 0);
        let ids = collect_ids(DataLoader::new(range(5), sampler, &[odd_only, double]).into_iter());
        assert_eq!(ids, vec![2, 6]);
    }

    #[test]
    fn test_sparse_slots_are_skipped() {
        let sampler = IndexSampler::new(3, None, false, Some(1), 0);
        let iter = DataLoader::new(range(3), sampler, &[filter_empty("missing")]).into_iter();
        assert_eq!(iter.len_hint(), 3);
        assert_eq!(iter.count(), 0);
    }

    #[test]
    fn test_resume_from_state() {
        let sampler = || IndexSampler::new(10, None, true, Some(1), 3);
        let full = collect_ids(DataLoader::new(range(10), sampler(), &[]).into_iter());

        let mut iter = DataLoader::new(range(10), sampler(), &[]).into_iter();
        let head = collect_ids(iter.by_ref().take(4));
        let state = iter.state();
        let json = serde_json::to_string(&state).unwrap();

        let mut resumed = DataLoader::new(range(10), sampler(), &[]).into_iter();
        resumed.restore(serde_json::from_str(&json).unwrap());
        let tail = collect_ids(resumed);

        assert_eq!([head, tail].concat(), full);
    }

    #[test]
    fn test_errors_are_yielded_and_skipped() {
        let fail_on_one = Preprocessor::map("fail", |r| {
            if r["id"].as_int() == Some(1) {
                bail!("bad record");
            }
            Ok(r)
        });
        let sampler = IndexSampler::new(3, None, false, Some(1), 0);
        let results: Vec<_> = DataLoader::new(range(3), sampler, &[fail_on_one])
            .into_iter()
            .collect();
        assert_eq!(results.len(), 3);
        assert!(results[1].is_err());
        let message = format!("{:#}", results[1].as_ref().unwrap_err());
        assert!(message.contains("failed to read element 1"), "{message}");
        assert!(message.contains("bad record"), "{message}");
    }
}
