//! Deterministic seed derivation.
//!
//! Every random decision in a pipeline is keyed by a seed derived from the
//! single root seed of a dataset request. Derivation is a pure function of
//! its input, so the same root seed always produces the same tree of seeds
//! on every platform.

use crate::sha256::{sha256v, sha256v_u64};

const SPLIT_DOMAIN: &[u8] = b"admix/split-seed";
const KEY_DOMAIN: &[u8] = b"admix/seed-key";

/// Derives two independent sub-seeds from `seed`.
pub fn split_seed(seed: u64) -> (u64, u64) {
    let seed = seed.to_le_bytes();
    (
        sha256v_u64(&[SPLIT_DOMAIN, &seed, &[0]]),
        sha256v_u64(&[SPLIT_DOMAIN, &seed, &[1]]),
    )
}

/// 32 bytes of key material for `seed`, suitable for a permutation or a
/// ChaCha generator.
pub fn seed_bytes(seed: u64) -> [u8; 32] {
    sha256v(&[KEY_DOMAIN, &seed.to_le_bytes()])
}

/// Key material for the `counter`-th member of a family keyed by `seed`
/// (e.g. one key per epoch or per record).
pub fn derive_seed_bytes(seed: u64, counter: u64) -> [u8; 32] {
    sha256v(&[KEY_DOMAIN, &seed.to_le_bytes(), &counter.to_le_bytes()])
}

/// Successive operation seeds: yields `seed`, then the first half of its
/// split, and so on. An unset seed stays unset.
#[derive(Clone, Copy, Debug)]
pub struct SeedStream {
    next: Option<u64>,
}

impl SeedStream {
    pub fn new(seed: Option<u64>) -> Self {
        Self { next: seed }
    }
}

impl Iterator for SeedStream {
    type Item = Option<u64>;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next;
        self.next = current.map(|seed| split_seed(seed).0);
        Some(current)
    }
}
