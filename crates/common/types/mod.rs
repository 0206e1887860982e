mod account;

pub use account::{
    Account, AccountUpdate, Code, EMPTY_CODE_HASH, EMPTY_ROOT_HASH, code_hash,
    decode_storage_value, encode_storage_value,
};
