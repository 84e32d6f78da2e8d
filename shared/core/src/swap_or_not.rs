use crate::sha256::{sha256v, sha256v_u64};

const SHUFFLE_ROUND_COUNT: u8 = 90;

/// Swap-or-not shuffle: a keyed permutation of `0..len` that maps any index
/// without materializing the permutation. The per-round pivots are computed
/// once, so repeated lookups only hash the position bits.
#[derive(Clone, Debug)]
pub struct Permutation {
    len: u64,
    seed: [u8; 32],
    pivots: Vec<u64>,
}

impl Permutation {
    pub fn new(len: u64, seed: [u8; 32]) -> Self {
        let pivots = if len == 0 {
            Vec::new()
        } else {
            (0..SHUFFLE_ROUND_COUNT)
                .map(|round| sha256v_u64(&[&seed, &[round]]) % len)
                .collect()
        };
        Self { len, seed, pivots }
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn apply(&self, index: u64) -> u64 {
        assert!(index < self.len);

        let mut current_index = index;
        for (current_round, pivot) in self.pivots.iter().enumerate() {
            let flip = (pivot + self.len - current_index) % self.len;
            let position = current_index.max(flip);

            let source = sha256v(&[
                &self.seed,
                &[current_round as u8],
                &(position / 256).to_le_bytes()[0..4],
            ]);

            let byte = source[(position % 256) as usize / 8];
            let bit = (byte >> (position % 8)) % 2;

            current_index = if bit == 1 { flip } else { current_index };
        }

        current_index
    }
}
