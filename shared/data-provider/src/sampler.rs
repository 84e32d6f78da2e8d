use std::{
    ops::Range,
    sync::{Arc, Mutex},
};

use admix_core::{derive_seed_bytes, Permutation, ShardInfo};
use anyhow::{anyhow, Result};

use crate::{
    lazy::{check_index, DatasetRef, LazyMapDataset},
    record::Record,
};

/// Maps positions of an epoch-aware, per-shard record stream to record
/// indices of a source.
///
/// Each epoch visits every record of the shard once. When shuffling, each
/// epoch is an independent permutation of the shard keyed by `(seed, epoch)`.
#[derive(Debug)]
pub struct IndexSampler {
    num_records: usize,
    shard_info: Option<ShardInfo>,
    shuffle: bool,
    num_epochs: Option<usize>,
    seed: u64,
    shard: Range<usize>,
    // the permutation of the most recently visited epoch
    epoch_permutation: Mutex<Option<(usize, Arc<Permutation>)>>,
}

impl IndexSampler {
    pub fn new(
        num_records: usize,
        shard_info: Option<ShardInfo>,
        shuffle: bool,
        num_epochs: Option<usize>,
        seed: u64,
    ) -> Self {
        let shard = match shard_info {
            Some(info) => info.range(num_records),
            None => 0..num_records,
        };
        Self {
            num_records,
            shard_info,
            shuffle,
            num_epochs,
            seed,
            shard,
            epoch_permutation: Mutex::new(None),
        }
    }

    pub fn num_records(&self) -> usize {
        self.num_records
    }

    pub fn shard_info(&self) -> Option<ShardInfo> {
        self.shard_info
    }

    pub fn shuffle(&self) -> bool {
        self.shuffle
    }

    pub fn num_epochs(&self) -> Option<usize> {
        self.num_epochs
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Number of positions in the stream; `usize::MAX` when unbounded.
    pub fn len(&self) -> usize {
        let shard_len = self.shard.len();
        if shard_len == 0 {
            return 0;
        }
        match self.num_epochs {
            Some(n) => shard_len.saturating_mul(n),
            None => usize::MAX,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The source record index read at `position`.
    pub fn record_index(&self, position: usize) -> Result<usize> {
        check_index(position, self.len())?;
        let shard_len = self.shard.len();
        let epoch = position / shard_len;
        let offset = position % shard_len;
        let offset = if self.shuffle {
            self.permutation(epoch)?.apply(offset as u64) as usize
        } else {
            offset
        };
        Ok(self.shard.start + offset)
    }

    fn permutation(&self, epoch: usize) -> Result<Arc<Permutation>> {
        let mut cached = self
            .epoch_permutation
            .lock()
            .map_err(|_| anyhow!("sampler permutation cache poisoned"))?;
        if let Some((cached_epoch, permutation)) = cached.as_ref() {
            if *cached_epoch == epoch {
                return Ok(permutation.clone());
            }
        }
        let permutation = Arc::new(Permutation::new(
            self.shard.len() as u64,
            derive_seed_bytes(self.seed, epoch as u64),
        ));
        *cached = Some((epoch, permutation.clone()));
        Ok(permutation)
    }
}

/// A dataset read in the order an [`IndexSampler`] dictates.
pub struct SampledDataset {
    parent: DatasetRef,
    sampler: Arc<IndexSampler>,
}

impl SampledDataset {
    pub fn new(parent: DatasetRef, sampler: Arc<IndexSampler>) -> Self {
        Self { parent, sampler }
    }
}

impl LazyMapDataset for SampledDataset {
    fn len(&self) -> usize {
        self.sampler.len()
    }

    fn get(&self, index: usize) -> Result<Option<Record>> {
        let record_index = self.sampler.record_index(index)?;
        self.parent.get(record_index)
    }
}
