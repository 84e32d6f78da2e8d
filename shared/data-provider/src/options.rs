use std::collections::BTreeMap;

use admix_core::ShardInfo;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{error::ConfigurationError, preprocessors::Preprocessor};

pub const DEFAULT_SPLIT: &str = "train";
pub const DEFAULT_NUM_RECORDS_TO_INSPECT: usize = 2;
pub const MAX_NUM_RECORDS_TO_INSPECT: usize = 1000;

/// Maximum length of each sequence feature, by feature key.
pub type SequenceLengths = BTreeMap<String, usize>;

/// Parameters of a dataset request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetOptions {
    pub sequence_lengths: Option<SequenceLengths>,
    pub split: String,
    pub batch_size: Option<usize>,
    pub shuffle: bool,
    pub seed: Option<u64>,
    pub shard_info: Option<ShardInfo>,
    /// `None` repeats forever. In config files, write `"unbounded"`.
    #[serde(with = "epochs")]
    pub num_epochs: Option<usize>,
}

impl Default for DatasetOptions {
    fn default() -> Self {
        Self {
            sequence_lengths: None,
            split: DEFAULT_SPLIT.to_owned(),
            batch_size: None,
            shuffle: true,
            seed: Some(0),
            shard_info: None,
            num_epochs: Some(1),
        }
    }
}

impl DatasetOptions {
    pub fn with_split(mut self, split: impl Into<String>) -> Self {
        self.split = split.into();
        self
    }

    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_num_epochs(mut self, num_epochs: Option<usize>) -> Self {
        self.num_epochs = num_epochs;
        self
    }

    pub fn with_shard_info(mut self, shard_info: Option<ShardInfo>) -> Self {
        self.shard_info = shard_info;
        self
    }

    pub fn with_batch_size(mut self, batch_size: Option<usize>) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_sequence_lengths(mut self, sequence_lengths: Option<SequenceLengths>) -> Self {
        self.sequence_lengths = sequence_lengths;
        self
    }

    /// The configured seed, or a fresh one from the thread rng.
    pub(crate) fn resolve_seed(&self) -> u64 {
        match self.seed {
            Some(seed) => seed,
            None => {
                let seed = rand::random();
                debug!(seed, "no seed configured, drew a fresh one");
                seed
            }
        }
    }

    pub(crate) fn check_epochs(&self) -> Result<(), ConfigurationError> {
        match self.num_epochs {
            Some(0) => Err(ConfigurationError::ZeroEpochs),
            _ => Ok(()),
        }
    }

    /// The trailing batch op, if batching was requested. A batch size of 0
    /// disables batching.
    pub(crate) fn batch_op(&self) -> Option<Preprocessor> {
        self.batch_size
            .filter(|&size| size > 0)
            .map(|size| Preprocessor::batch(size, false))
    }
}

mod epochs {
    use serde::{de, Deserialize, Deserializer, Serializer};

    const UNBOUNDED: &str = "unbounded";

    pub fn serialize<S: Serializer>(value: &Option<usize>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(n) => s.serialize_u64(*n as u64),
            None => s.serialize_str(UNBOUNDED),
        }
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Count(usize),
        Keyword(String),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<usize>, D::Error> {
        match Raw::deserialize(d)? {
            Raw::Count(n) => Ok(Some(n)),
            Raw::Keyword(k) if k == UNBOUNDED => Ok(None),
            Raw::Keyword(k) => Err(de::Error::custom(format!(
                "num_epochs must be a count or \"{UNBOUNDED}\", got \"{k}\""
            ))),
        }
    }
}
