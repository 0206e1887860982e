pub use ethereum_types::{Address, Bloom, H32, H64, H128, H160, H256, H264, H512, H520, Signature};
pub use ethereum_types::U256;

pub use bytes::Bytes;

pub mod types;
pub mod utils;

pub use utils::{u256_from_big_endian, u256_to_big_endian, u256_to_h256};
