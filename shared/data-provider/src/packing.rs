//! Packing of several short token sequences into fewer long ones.
//!
//! Records are pooled in groups of `pool_size` consecutive elements and each
//! pool is packed on its own, so the packed dataset stays index-addressable.
//! A pool yields between one and `pool_size` packed records; the rest of its
//! slots are sparse.

use std::{
    collections::{BTreeMap, VecDeque},
    sync::{Arc, Mutex},
};

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::{
    error::ConfigurationError,
    lazy::{check_index, DatasetRef, LazyMapDataset},
    options::SequenceLengths,
    record::{Record, Value},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PackerKind {
    /// First-fit into a bounded queue of partially packed records. Packed
    /// features gain `{key}_segment_ids` and `{key}_positions` companions.
    MultiBin { num_partial_examples: usize },
    /// Concatenate and slice. A record may be split across packed records,
    /// and only packed features are kept.
    Noam,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PackOp {
    pub pool_size: usize,
    pub packer: PackerKind,
    pub feature_lengths: SequenceLengths,
}

impl PackOp {
    pub fn new(
        pool_size: usize,
        packer: PackerKind,
        feature_lengths: SequenceLengths,
    ) -> Result<Self, ConfigurationError> {
        if pool_size == 0 {
            return Err(ConfigurationError::InvalidPacking(
                "pool_size must be at least 1".to_owned(),
            ));
        }
        if feature_lengths.is_empty() {
            return Err(ConfigurationError::InvalidPacking(
                "no features to pack".to_owned(),
            ));
        }
        if let Some((feature, _)) = feature_lengths.iter().find(|(_, &len)| len == 0) {
            return Err(ConfigurationError::InvalidPacking(format!(
                "packed length of {feature} must be at least 1"
            )));
        }
        Ok(Self {
            pool_size,
            packer,
            feature_lengths,
        })
    }

    /// Packs one pool of records.
    pub fn pack_pool(&self, pool: Vec<Record>) -> Result<Vec<Record>> {
        let mut packed = match self.packer {
            PackerKind::MultiBin {
                num_partial_examples,
            } => {
                let mut packer = MultiBinPacker::new(&self.feature_lengths, num_partial_examples);
                run_packer(&mut packer, pool)?
            }
            PackerKind::Noam => run_packer(&mut NoamPacker::new(&self.feature_lengths), pool)?,
        };
        packed.truncate(self.pool_size);
        Ok(packed)
    }
}

trait Packer {
    fn fit(&mut self, record: Record) -> Result<Vec<Record>>;

    /// The next partially packed record, once no more input is coming.
    fn flush(&mut self) -> Option<Record>;
}

fn run_packer(packer: &mut impl Packer, pool: Vec<Record>) -> Result<Vec<Record>> {
    let mut packed = Vec::new();
    for record in pool {
        packed.extend(packer.fit(record)?);
    }
    while let Some(record) = packer.flush() {
        packed.push(record);
    }
    Ok(packed)
}

/// Token features of one record, split from the features that are not packed.
struct Split {
    tokens: BTreeMap<String, Vec<i32>>,
    passthrough: Record,
}

fn split_record(mut record: Record, lengths: &SequenceLengths) -> Result<Split> {
    let mut tokens = BTreeMap::new();
    for feature in lengths.keys() {
        match record.remove(feature) {
            Some(Value::Tokens(t)) => {
                tokens.insert(feature.clone(), t);
            }
            Some(other) => bail!("cannot pack {} feature {feature}", other.kind()),
            None => bail!("feature {feature} is missing"),
        }
    }
    Ok(Split {
        tokens,
        passthrough: record,
    })
}

/// Records sharing one packed record, plus the room left per feature.
struct PartialExample {
    segments: BTreeMap<String, Vec<Vec<i32>>>,
    passthrough: BTreeMap<String, Vec<Value>>,
    available: BTreeMap<String, usize>,
}

impl PartialExample {
    fn new(lengths: &SequenceLengths) -> Self {
        Self {
            segments: lengths.keys().map(|k| (k.clone(), Vec::new())).collect(),
            passthrough: BTreeMap::new(),
            available: lengths.clone(),
        }
    }

    fn fits(&self, example: &Split) -> bool {
        example
            .tokens
            .iter()
            .all(|(k, t)| self.available.get(k).is_some_and(|&room| room >= t.len()))
    }

    fn add(&mut self, example: Split) {
        for (key, tokens) in example.tokens {
            if let Some(room) = self.available.get_mut(&key) {
                *room = room.saturating_sub(tokens.len());
            }
            self.segments.entry(key).or_default().push(tokens);
        }
        for (key, value) in example.passthrough {
            self.passthrough.entry(key).or_default().push(value);
        }
    }

    fn is_full(&self) -> bool {
        self.available.values().all(|&room| room == 0)
    }

    fn is_empty(&self) -> bool {
        self.segments
            .values()
            .all(|segments| segments.iter().all(Vec::is_empty))
    }

    /// Concatenated tokens per feature, with segment ids (1-based) and
    /// positions within each segment.
    fn pack_with_markers(self) -> Record {
        let mut packed = Record::new();
        for (key, segments) in self.segments {
            let mut tokens = Vec::new();
            let mut segment_ids = Vec::new();
            let mut positions = Vec::new();
            for (i, segment) in segments.into_iter().enumerate() {
                segment_ids.extend(std::iter::repeat(i as i32 + 1).take(segment.len()));
                positions.extend(0..segment.len() as i32);
                tokens.extend(segment);
            }
            packed.insert(format!("{key}_segment_ids"), Value::Tokens(segment_ids));
            packed.insert(format!("{key}_positions"), Value::Tokens(positions));
            packed.insert(key, Value::Tokens(tokens));
        }
        for (key, values) in self.passthrough {
            packed.entry(key).or_insert(Value::List(values));
        }
        packed
    }

    fn concatenated(self) -> BTreeMap<String, Vec<i32>> {
        self.segments
            .into_iter()
            .map(|(key, segments)| (key, segments.concat()))
            .collect()
    }
}

struct MultiBinPacker<'a> {
    lengths: &'a SequenceLengths,
    num_partial_examples: usize,
    queue: VecDeque<PartialExample>,
}

impl<'a> MultiBinPacker<'a> {
    fn new(lengths: &'a SequenceLengths, num_partial_examples: usize) -> Self {
        Self {
            lengths,
            num_partial_examples,
            queue: VecDeque::new(),
        }
    }
}

impl Packer for MultiBinPacker<'_> {
    fn fit(&mut self, record: Record) -> Result<Vec<Record>> {
        let mut packed = Vec::new();
        while self.queue.len() > self.num_partial_examples {
            packed.extend(self.flush());
        }

        let mut example = split_record(record, self.lengths)?;
        for (key, tokens) in example.tokens.iter_mut() {
            tokens.truncate(self.lengths[key]);
        }

        match self.queue.iter().position(|partial| partial.fits(&example)) {
            Some(i) => {
                self.queue[i].add(example);
                if self.queue[i].is_full() {
                    let full = self
                        .queue
                        .remove(i)
                        .ok_or_else(|| anyhow!("partial example {i} vanished"))?;
                    packed.push(full.pack_with_markers());
                }
            }
            None => {
                let mut partial = PartialExample::new(self.lengths);
                partial.add(example);
                if partial.is_full() {
                    packed.push(partial.pack_with_markers());
                } else {
                    self.queue.push_back(partial);
                }
            }
        }
        Ok(packed)
    }

    fn flush(&mut self) -> Option<Record> {
        self.queue.pop_front().map(PartialExample::pack_with_markers)
    }
}

struct NoamPacker<'a> {
    lengths: &'a SequenceLengths,
    partial: PartialExample,
}

impl<'a> NoamPacker<'a> {
    fn new(lengths: &'a SequenceLengths) -> Self {
        Self {
            lengths,
            partial: PartialExample::new(lengths),
        }
    }

    /// Emits the first packed-length slice and carries the rest over.
    fn slice(&mut self) -> Record {
        let partial = std::mem::replace(&mut self.partial, PartialExample::new(self.lengths));
        let mut packed = Record::new();
        let mut remainder = BTreeMap::new();
        for (key, mut tokens) in partial.concatenated() {
            let rest = tokens.split_off(self.lengths[&key].min(tokens.len()));
            remainder.insert(key.clone(), rest);
            packed.insert(key, Value::Tokens(tokens));
        }
        if remainder.values().any(|rest| !rest.is_empty()) {
            self.partial.add(Split {
                tokens: remainder,
                passthrough: Record::new(),
            });
        }
        packed
    }
}

impl Packer for NoamPacker<'_> {
    fn fit(&mut self, record: Record) -> Result<Vec<Record>> {
        let example = split_record(record, self.lengths)?;
        self.partial.add(Split {
            tokens: example.tokens,
            passthrough: Record::new(),
        });
        let mut packed = Vec::new();
        while self.partial.is_full() {
            packed.push(self.slice());
        }
        Ok(packed)
    }

    fn flush(&mut self) -> Option<Record> {
        if self.partial.is_empty() {
            None
        } else {
            Some(self.slice())
        }
    }
}

/// The parent, packed pool by pool. The most recently packed pool is kept,
/// since its slots are usually read one after another.
pub struct PackDataset {
    parent: DatasetRef,
    op: PackOp,
    last_pool: Mutex<Option<(usize, Arc<Vec<Record>>)>>,
}

impl PackDataset {
    pub fn new(parent: DatasetRef, op: PackOp) -> Self {
        Self {
            parent,
            op,
            last_pool: Mutex::new(None),
        }
    }

    fn pool(&self, pool_index: usize) -> Result<Arc<Vec<Record>>> {
        let mut last = self
            .last_pool
            .lock()
            .map_err(|_| anyhow!("pack cache poisoned"))?;
        if let Some((index, packed)) = last.as_ref() {
            if *index == pool_index {
                return Ok(packed.clone());
            }
        }

        let start = pool_index * self.op.pool_size;
        let end = start
            .saturating_add(self.op.pool_size)
            .min(self.parent.len());
        let mut records = Vec::with_capacity(end - start);
        for i in start..end {
            if let Some(record) = self.parent.get(i)? {
                records.push(record);
            }
        }
        let packed = Arc::new(
            self.op
                .pack_pool(records)
                .with_context(|| format!("failed to pack elements {start}..{end}"))?,
        );
        *last = Some((pool_index, packed.clone()));
        Ok(packed)
    }
}

impl LazyMapDataset for PackDataset {
    fn len(&self) -> usize {
        self.parent
            .len()
            .div_ceil(self.op.pool_size)
            .saturating_mul(self.op.pool_size)
    }

    fn get(&self, index: usize) -> Result<Option<Record>> {
        check_index(index, self.len())?;
        let packed = self.pool(index / self.op.pool_size)?;
        Ok(packed.get(index % self.op.pool_size).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        in_memory::InMemoryDataSource,
        lazy::SourceDataset,
        record::record,
        traits::DataSource,
    };
    use pretty_assertions::assert_eq;

    fn lengths(n: usize) -> SequenceLengths {
        SequenceLengths::from([("inputs".to_owned(), n)])
    }

    fn tokens(r: &Record, key: &str) -> Vec<i32> {
        r[key].as_tokens().unwrap().to_vec()
    }

    fn examples(seqs: &[&[i32]]) -> Vec<Record> {
        seqs.iter()
            .enumerate()
            .map(|(i, s)| {
                let mut r = record([("inputs", s.to_vec())]);
                r.insert("id".into(), Value::Int(i as i64));
                r
            })
            .collect()
    }

    #[test]
    fn test_invalid_pack_op() {
        assert!(PackOp::new(0, PackerKind::Noam, lengths(4)).is_err());
        assert!(PackOp::new(2, PackerKind::Noam, SequenceLengths::new()).is_err());
        assert!(PackOp::new(2, PackerKind::Noam, lengths(0)).is_err());
    }

    #[test]
    fn test_multi_bin_first_fit() {
        let op = PackOp::new(
            8,
            PackerKind::MultiBin {
                num_partial_examples: 4,
            },
            lengths(4),
        )
        .unwrap();
        let packed = op
            .pack_pool(examples(&[&[1, 2, 3], &[4, 5], &[6], &[7, 8]]))
            .unwrap();
        // [1 2 3 6] fills up as soon as 6 arrives; [4 5 7 8] fills next
        assert_eq!(packed.len(), 2);
        assert_eq!(tokens(&packed[0], "inputs"), vec![1, 2, 3, 6]);
        assert_eq!(tokens(&packed[0], "inputs_segment_ids"), vec![1, 1, 1, 2]);
        assert_eq!(tokens(&packed[0], "inputs_positions"), vec![0, 1, 2, 0]);
        assert_eq!(
            packed[0]["id"],
            Value::List(vec![Value::Int(0), Value::Int(2)])
        );
        assert_eq!(tokens(&packed[1], "inputs"), vec![4, 5, 7, 8]);
    }

    #[test]
    fn test_multi_bin_trims_long_examples() {
        let op = PackOp::new(
            2,
            PackerKind::MultiBin {
                num_partial_examples: 1,
            },
            lengths(3),
        )
        .unwrap();
        let packed = op.pack_pool(examples(&[&[1, 2, 3, 4, 5], &[6]])).unwrap();
        assert_eq!(tokens(&packed[0], "inputs"), vec![1, 2, 3]);
        assert_eq!(tokens(&packed[1], "inputs"), vec![6]);
    }

    #[test]
    fn test_multi_bin_releases_oldest_partial() {
        let op = PackOp::new(
            8,
            PackerKind::MultiBin {
                num_partial_examples: 1,
            },
            lengths(4),
        )
        .unwrap();
        let packed = op
            .pack_pool(examples(&[&[1, 2, 3], &[4, 5, 6], &[7, 8]]))
            .unwrap();
        // the queue holds two partials when [7 8] arrives, so [1 2 3] goes out
        let all: Vec<Vec<i32>> = packed.iter().map(|r| tokens(r, "inputs")).collect();
        assert_eq!(all, vec![vec![1, 2, 3], vec![4, 5, 6], vec![7, 8]]);
    }

    #[test]
    fn test_noam_concatenates_and_slices() {
        let op = PackOp::new(4, PackerKind::Noam, lengths(3)).unwrap();
        let packed = op
            .pack_pool(examples(&[&[1, 2], &[3, 4, 5, 6], &[7]]))
            .unwrap();
        let all: Vec<Vec<i32>> = packed.iter().map(|r| tokens(r, "inputs")).collect();
        assert_eq!(all, vec![vec![1, 2, 3], vec![4, 5, 6], vec![7]]);
        assert!(packed.iter().all(|r| r.len() == 1));
    }

    #[test]
    fn test_pack_dataset_is_sparse() {
        let source = InMemoryDataSource::from_records(
            "train",
            examples(&[&[1], &[2], &[3], &[4], &[5]]),
        );
        let parent: DatasetRef =
            Arc::new(SourceDataset::new(source.get_data_source("train").unwrap()));
        let op = PackOp::new(
            2,
            PackerKind::MultiBin {
                num_partial_examples: 2,
            },
            lengths(2),
        )
        .unwrap();
        let ds = PackDataset::new(parent, op);
        assert_eq!(ds.len(), 6);
        let present: Vec<Vec<i32>> = (0..ds.len())
            .filter_map(|i| ds.get(i).unwrap())
            .map(|r| tokens(&r, "inputs"))
            .collect();
        assert_eq!(present, vec![vec![1, 2], vec![3, 4], vec![5]]);
        assert!(ds.get(1).unwrap().is_none());
    }

    #[test]
    fn test_missing_feature_fails() {
        let op = PackOp::new(2, PackerKind::Noam, lengths(3)).unwrap();
        assert!(op.pack_pool(vec![record([("other", 1i64)])]).is_err());
    }
}
