mod component_id;
mod seed;
mod sha256;
mod shard;
mod swap_or_not;

pub use component_id::ComponentId;
pub use seed::{derive_seed_bytes, seed_bytes, split_seed, SeedStream};
pub use sha256::{sha256v, sha256v_u64};
pub use shard::{InvalidShardInfo, ShardInfo};
pub use swap_or_not::Permutation;
