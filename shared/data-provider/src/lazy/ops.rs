use admix_core::derive_seed_bytes;
use anyhow::{bail, Context, Result};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use super::{check_index, DatasetRef, LazyMapDataset};
use crate::{
    preprocessors::{FilterFn, MapFn, RandomMapFn},
    record::{Record, Value},
};

pub struct MapDataset {
    parent: DatasetRef,
    name: String,
    f: MapFn,
}

impl MapDataset {
    pub fn new(parent: DatasetRef, name: impl Into<String>, f: MapFn) -> Self {
        Self {
            parent,
            name: name.into(),
            f,
        }
    }
}

impl LazyMapDataset for MapDataset {
    fn len(&self) -> usize {
        self.parent.len()
    }

    fn get(&self, index: usize) -> Result<Option<Record>> {
        let Some(record) = self.parent.get(index)? else {
            return Ok(None);
        };
        (self.f)(record)
            .with_context(|| format!("{} failed on element {index}", self.name))
            .map(Some)
    }
}

/// A map that also receives a generator. The generator for element `i` is
/// keyed by `(seed, i)`, so an element sees the same randomness no matter
/// the order it is read in.
pub struct RandomMapDataset {
    parent: DatasetRef,
    name: String,
    f: RandomMapFn,
    seed: u64,
}

impl RandomMapDataset {
    pub fn new(parent: DatasetRef, name: impl Into<String>, f: RandomMapFn, seed: u64) -> Self {
        Self {
            parent,
            name: name.into(),
            f,
            seed,
        }
    }
}

impl LazyMapDataset for RandomMapDataset {
    fn len(&self) -> usize {
        self.parent.len()
    }

    fn get(&self, index: usize) -> Result<Option<Record>> {
        let Some(record) = self.parent.get(index)? else {
            return Ok(None);
        };
        let mut rng = ChaCha8Rng::from_seed(derive_seed_bytes(self.seed, index as u64));
        (self.f)(record, &mut rng)
            .with_context(|| format!("{} failed on element {index}", self.name))
            .map(Some)
    }
}

/// Keeps the length of its parent; rejected elements become sparse slots.
pub struct FilterDataset {
    parent: DatasetRef,
    name: String,
    f: FilterFn,
}

impl FilterDataset {
    pub fn new(parent: DatasetRef, name: impl Into<String>, f: FilterFn) -> Self {
        Self {
            parent,
            name: name.into(),
            f,
        }
    }
}

impl LazyMapDataset for FilterDataset {
    fn len(&self) -> usize {
        self.parent.len()
    }

    fn get(&self, index: usize) -> Result<Option<Record>> {
        let Some(record) = self.parent.get(index)? else {
            return Ok(None);
        };
        let keep =
            (self.f)(&record).with_context(|| format!("{} failed on element {index}", self.name))?;
        Ok(keep.then_some(record))
    }
}

/// Groups consecutive elements; each feature of a batch is the list of that
/// feature's values. Sparse slots are skipped inside a batch, and a batch
/// made only of sparse slots is itself sparse.
pub struct BatchDataset {
    parent: DatasetRef,
    batch_size: usize,
    drop_remainder: bool,
}

impl BatchDataset {
    pub fn new(parent: DatasetRef, batch_size: usize, drop_remainder: bool) -> Self {
        assert!(batch_size > 0, "batch_size must be positive");
        Self {
            parent,
            batch_size,
            drop_remainder,
        }
    }
}

impl LazyMapDataset for BatchDataset {
    fn len(&self) -> usize {
        let n = self.parent.len();
        let full = n / self.batch_size;
        if self.drop_remainder || n % self.batch_size == 0 {
            full
        } else {
            full + 1
        }
    }

    fn get(&self, index: usize) -> Result<Option<Record>> {
        check_index(index, self.len())?;
        let start = index * self.batch_size;
        let end = (start + self.batch_size).min(self.parent.len());
        let mut records = Vec::with_capacity(end - start);
        for i in start..end {
            if let Some(record) = self.parent.get(i)? {
                records.push(record);
            }
        }
        if records.is_empty() {
            return Ok(None);
        }
        stack(records)
            .with_context(|| format!("failed to batch elements {start}..{end}"))
            .map(Some)
    }
}

fn stack(records: Vec<Record>) -> Result<Record> {
    let keys: Vec<String> = records[0].keys().cloned().collect();
    let mut columns: Vec<Vec<Value>> = vec![Vec::with_capacity(records.len()); keys.len()];
    for mut record in records {
        if record.len() != keys.len() {
            bail!("records in a batch must have the same features");
        }
        for (key, column) in keys.iter().zip(columns.iter_mut()) {
            match record.remove(key) {
                Some(value) => column.push(value),
                None => bail!("feature {key} is missing from some records of the batch"),
            }
        }
    }
    Ok(keys
        .into_iter()
        .zip(columns)
        .map(|(key, column)| (key, Value::List(column)))
        .collect())
}
