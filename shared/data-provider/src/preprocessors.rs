use std::{fmt, sync::Arc};

use admix_core::SeedStream;
use anyhow::{anyhow, Result};
use rand_chacha::ChaCha8Rng;
use tracing::trace;

use crate::{
    lazy::{BatchDataset, DatasetRef, FilterDataset, MapDataset, RandomMapDataset},
    packing::{PackDataset, PackOp},
    record::{Record, Value},
};

pub type MapFn = Arc<dyn Fn(Record) -> Result<Record> + Send + Sync>;
pub type RandomMapFn = Arc<dyn Fn(Record, &mut ChaCha8Rng) -> Result<Record> + Send + Sync>;
pub type FilterFn = Arc<dyn Fn(&Record) -> Result<bool> + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BatchOp {
    pub batch_size: usize,
    pub drop_remainder: bool,
}

/// One step of a preprocessing chain.
#[derive(Clone)]
pub enum Preprocessor {
    Map { name: String, f: MapFn },
    RandomMap { name: String, f: RandomMapFn },
    Filter { name: String, f: FilterFn },
    Batch(BatchOp),
    Pack(PackOp),
}

impl Preprocessor {
    pub fn map(
        name: impl Into<String>,
        f: impl Fn(Record) -> Result<Record> + Send + Sync + 'static,
    ) -> Self {
        Self::Map {
            name: name.into(),
            f: Arc::new(f),
        }
    }

    pub fn random_map(
        name: impl Into<String>,
        f: impl Fn(Record, &mut ChaCha8Rng) -> Result<Record> + Send + Sync + 'static,
    ) -> Self {
        Self::RandomMap {
            name: name.into(),
            f: Arc::new(f),
        }
    }

    pub fn filter(
        name: impl Into<String>,
        f: impl Fn(&Record) -> Result<bool> + Send + Sync + 'static,
    ) -> Self {
        Self::Filter {
            name: name.into(),
            f: Arc::new(f),
        }
    }

    /// # Panics
    /// If `batch_size` is 0.
    pub fn batch(batch_size: usize, drop_remainder: bool) -> Self {
        assert!(batch_size > 0, "batch_size must be positive");
        Self::Batch(BatchOp {
            batch_size,
            drop_remainder,
        })
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Map { name, .. } | Self::RandomMap { name, .. } | Self::Filter { name, .. } => {
                name
            }
            Self::Batch(_) => "batch",
            Self::Pack(_) => "pack",
        }
    }

    /// Wraps `ds` in this operation. Random operations applied without a seed
    /// draw a fresh one, so their output is not reproducible.
    pub fn apply(&self, ds: DatasetRef, seed: Option<u64>) -> DatasetRef {
        match self {
            Self::Map { name, f } => Arc::new(MapDataset::new(ds, name.clone(), f.clone())),
            Self::RandomMap { name, f } => {
                let seed = seed.unwrap_or_else(rand::random);
                Arc::new(RandomMapDataset::new(ds, name.clone(), f.clone(), seed))
            }
            Self::Filter { name, f } => Arc::new(FilterDataset::new(ds, name.clone(), f.clone())),
            Self::Batch(op) => Arc::new(BatchDataset::new(ds, op.batch_size, op.drop_remainder)),
            Self::Pack(op) => Arc::new(PackDataset::new(ds, op.clone())),
        }
    }
}

impl fmt::Debug for Preprocessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Map { name, .. } => f.debug_tuple("Map").field(name).finish(),
            Self::RandomMap { name, .. } => f.debug_tuple("RandomMap").field(name).finish(),
            Self::Filter { name, .. } => f.debug_tuple("Filter").field(name).finish(),
            Self::Batch(op) => f.debug_tuple("Batch").field(op).finish(),
            Self::Pack(op) => f.debug_tuple("Pack").field(op).finish(),
        }
    }
}

/// Applies `ops` in order. The first op gets `seed`; each later op gets the
/// first half of the split of its predecessor's seed.
pub fn apply_operations(ds: DatasetRef, ops: &[Preprocessor], seed: Option<u64>) -> DatasetRef {
    ops.iter()
        .zip(SeedStream::new(seed))
        .fold(ds, |ds, (op, seed)| {
            trace!(op = op.name(), ?seed, "applying preprocessor");
            op.apply(ds, seed)
        })
}

pub fn rename_feature(from: impl Into<String>, to: impl Into<String>) -> Preprocessor {
    let (from, to) = (from.into(), to.into());
    Preprocessor::map(format!("rename({from}->{to})"), move |mut record| {
        let value = record
            .remove(&from)
            .ok_or_else(|| anyhow!("feature {from} is missing"))?;
        record.insert(to.clone(), value);
        Ok(record)
    })
}

pub fn drop_features(features: Vec<String>) -> Preprocessor {
    Preprocessor::map(format!("drop({})", features.join(",")), move |mut record| {
        for feature in &features {
            record.remove(feature);
        }
        Ok(record)
    })
}

/// Cuts a token or text feature down to at most `length` elements.
pub fn truncate_feature(feature: impl Into<String>, length: usize) -> Preprocessor {
    let feature = feature.into();
    Preprocessor::map(format!("truncate({feature},{length})"), move |mut record| {
        match record.get_mut(&feature) {
            Some(Value::Tokens(tokens)) => tokens.truncate(length),
            Some(Value::List(values)) => values.truncate(length),
            Some(Value::Text(text)) => {
                if let Some((cut, _)) = text.char_indices().nth(length) {
                    text.truncate(cut);
                }
            }
            Some(other) => {
                return Err(anyhow!(
                    "cannot truncate {} feature {feature}",
                    other.kind()
                ))
            }
            None => return Err(anyhow!("feature {feature} is missing")),
        }
        Ok(record)
    })
}

/// Drops records whose `feature` is missing or empty.
pub fn filter_empty(feature: impl Into<String>) -> Preprocessor {
    let feature = feature.into();
    Preprocessor::filter(format!("filter_empty({feature})"), move |record| {
        Ok(match record.get(&feature) {
            Some(Value::Tokens(tokens)) => !tokens.is_empty(),
            Some(Value::Text(text)) => !text.is_empty(),
            Some(Value::List(values)) => !values.is_empty(),
            Some(_) => true,
            None => false,
        })
    })
}
