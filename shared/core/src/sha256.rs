use sha2::{Digest, Sha256};

pub fn sha256v(data: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for val in data {
        hasher.update(val)
    }
    hasher.finalize().into()
}

/// First eight bytes of the digest of `data`, little-endian.
pub fn sha256v_u64(data: &[&[u8]]) -> u64 {
    let digest = sha256v(data);
    u64::from_le_bytes(
        digest[0..8]
            .try_into()
            .expect("a sha256 digest is always 32 bytes"),
    )
}
