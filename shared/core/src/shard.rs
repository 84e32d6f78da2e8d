use std::ops::Range;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidShardInfo {
    #[error("num_shards must be at least 1")]
    NoShards,

    #[error("shard index {index} is out of range for {num_shards} shards")]
    IndexOutOfRange { index: usize, num_shards: usize },
}

/// Which slice of a source one worker reads.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawShardInfo")]
pub struct ShardInfo {
    index: usize,
    num_shards: usize,
}

#[derive(Deserialize)]
struct RawShardInfo {
    index: usize,
    num_shards: usize,
}

impl TryFrom<RawShardInfo> for ShardInfo {
    type Error = InvalidShardInfo;

    fn try_from(raw: RawShardInfo) -> Result<Self, Self::Error> {
        ShardInfo::new(raw.index, raw.num_shards)
    }
}

impl ShardInfo {
    pub fn new(index: usize, num_shards: usize) -> Result<Self, InvalidShardInfo> {
        if num_shards == 0 {
            return Err(InvalidShardInfo::NoShards);
        }
        if index >= num_shards {
            return Err(InvalidShardInfo::IndexOutOfRange { index, num_shards });
        }
        Ok(Self { index, num_shards })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn num_shards(&self) -> usize {
        self.num_shards
    }

    /// The contiguous block of `0..len` owned by this shard. The first
    /// `len % num_shards` shards own one extra record.
    pub fn range(&self, len: usize) -> Range<usize> {
        let base = len / self.num_shards;
        let extra = len % self.num_shards;
        let start = self.index * base + self.index.min(extra);
        let size = base + usize::from(self.index < extra);
        start..start + size
    }
}

impl std::fmt::Display for ShardInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "shard {}/{}", self.index, self.num_shards)
    }
}
