//! Lazily evaluated, index-addressable datasets.
//!
//! Building a graph of these never reads a record; records are read when an
//! index is requested, usually by a [`crate::DatasetIterator`].

use std::sync::Arc;

use admix_core::{seed_bytes, Permutation, ShardInfo};
use anyhow::{bail, Result};

use crate::{record::Record, traits::RecordSource};

mod mix;
mod ops;

pub use mix::MixedDataset;
pub use ops::{BatchDataset, FilterDataset, MapDataset, RandomMapDataset};

/// A dataset of known length whose elements can be read in any order.
///
/// `get` returns `Ok(None)` for sparse slots (e.g. records dropped by a
/// filter); iteration skips them.
pub trait LazyMapDataset: Send + Sync {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, index: usize) -> Result<Option<Record>>;
}

pub type DatasetRef = Arc<dyn LazyMapDataset>;

pub(crate) fn check_index(index: usize, len: usize) -> Result<()> {
    if index >= len {
        bail!("index {index} is out of bounds, we only have {len} records.");
    }
    Ok(())
}

/// The records of a [`RecordSource`], in source order.
pub struct SourceDataset {
    source: Arc<dyn RecordSource>,
}

impl SourceDataset {
    pub fn new(source: Arc<dyn RecordSource>) -> Self {
        Self { source }
    }
}

impl LazyMapDataset for SourceDataset {
    fn len(&self) -> usize {
        self.source.len()
    }

    fn get(&self, index: usize) -> Result<Option<Record>> {
        check_index(index, self.len())?;
        self.source.get(index).map(Some)
    }
}

/// The contiguous block of the parent owned by one shard.
pub struct ShardDataset {
    parent: DatasetRef,
    start: usize,
    len: usize,
}

impl ShardDataset {
    pub fn new(parent: DatasetRef, shard_info: ShardInfo) -> Self {
        let range = shard_info.range(parent.len());
        Self {
            parent,
            start: range.start,
            len: range.len(),
        }
    }
}

impl LazyMapDataset for ShardDataset {
    fn len(&self) -> usize {
        self.len
    }

    fn get(&self, index: usize) -> Result<Option<Record>> {
        check_index(index, self.len)?;
        self.parent.get(self.start + index)
    }
}

/// A seeded permutation of the parent.
pub struct ShuffleDataset {
    parent: DatasetRef,
    permutation: Permutation,
}

impl ShuffleDataset {
    pub fn new(parent: DatasetRef, seed: u64) -> Self {
        let permutation = Permutation::new(parent.len() as u64, seed_bytes(seed));
        Self {
            parent,
            permutation,
        }
    }
}

impl LazyMapDataset for ShuffleDataset {
    fn len(&self) -> usize {
        self.parent.len()
    }

    fn get(&self, index: usize) -> Result<Option<Record>> {
        check_index(index, self.len())?;
        self.parent.get(self.permutation.apply(index as u64) as usize)
    }
}

/// The parents, one after another.
pub struct ConcatDataset {
    parents: Vec<DatasetRef>,
    // exclusive end offset of each parent
    ends: Vec<usize>,
}

impl ConcatDataset {
    pub fn new(parents: Vec<DatasetRef>) -> Self {
        let ends = parents
            .iter()
            .scan(0usize, |total, p| {
                *total = total.saturating_add(p.len());
                Some(*total)
            })
            .collect();
        Self { parents, ends }
    }
}

impl LazyMapDataset for ConcatDataset {
    fn len(&self) -> usize {
        self.ends.last().copied().unwrap_or(0)
    }

    fn get(&self, index: usize) -> Result<Option<Record>> {
        check_index(index, self.len())?;
        let parent = self.ends.partition_point(|&end| end <= index);
        let start = if parent == 0 { 0 } else { self.ends[parent - 1] };
        self.parents[parent].get(index - start)
    }
}

/// The parent repeated `num_epochs` times, or forever when `None`.
/// An unbounded repeat reports `usize::MAX` as its length.
pub struct RepeatDataset {
    parent: DatasetRef,
    num_epochs: Option<usize>,
}

impl RepeatDataset {
    pub fn new(parent: DatasetRef, num_epochs: Option<usize>) -> Self {
        Self { parent, num_epochs }
    }
}

impl LazyMapDataset for RepeatDataset {
    fn len(&self) -> usize {
        let parent_len = self.parent.len();
        if parent_len == 0 {
            return 0;
        }
        match self.num_epochs {
            Some(n) => parent_len.saturating_mul(n),
            None => usize::MAX,
        }
    }

    fn get(&self, index: usize) -> Result<Option<Record>> {
        check_index(index, self.len())?;
        self.parent.get(index % self.parent.len())
    }
}
