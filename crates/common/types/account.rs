use crate::{Address, H256, U256};
use ethrex_rlp::{
    decode::RLPDecode,
    encode::RLPEncode,
    error::{RLPDecodeError, RLPEncodeError},
    structs::{Decoder, Encoder},
};
use ethrex_crypto::keccak::keccak_hash;
use serde::{Deserialize, Serialize};

/// RLP of the empty string, `Keccak256([])`.
pub const EMPTY_CODE_HASH: H256 = H256([
    0xc5, 0xd2, 0x46, 0x01, 0x86, 0xf7, 0x23, 0x3c, 0x92, 0x7e, 0x7d, 0xb2, 0xdc, 0xc7, 0x03, 0xc0,
    0xe5, 0x00, 0xb6, 0x53, 0xca, 0x82, 0x27, 0x3b, 0x7b, 0xfa, 0xd8, 0x04, 0x5d, 0x85, 0xa4, 0x70,
]);

/// Keccak of the RLP of the empty string; the conventional "no trie" root.
pub const EMPTY_ROOT_HASH: H256 = H256([
    0x56, 0xe8, 0x1f, 0x17, 0x1b, 0xcc, 0x55, 0xa6, 0xff, 0x83, 0x45, 0xe6, 0x92, 0xc0, 0xf8, 0x6e,
    0x5b, 0x48, 0xe0, 0x1b, 0x99, 0x6c, 0xad, 0xc0, 0x01, 0x62, 0x2f, 0xb5, 0xe3, 0x63, 0xb4, 0x21,
]);

pub type Code = bytes::Bytes;

pub fn code_hash(code: &[u8]) -> H256 {
    H256(keccak_hash(code))
}

/// The committed view of an account: what lives in the account trie.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub nonce: u64,
    pub balance: U256,
    pub storage_root: H256,
    pub code_hash: H256,
}

impl Account {
    pub fn new_empty_with_balance(balance: U256) -> Self {
        Account {
            nonce: 0,
            balance,
            storage_root: EMPTY_ROOT_HASH,
            code_hash: EMPTY_CODE_HASH,
        }
    }

    /// An account is empty iff it has no nonce, no balance and carries no code.
    pub fn is_empty(&self) -> bool {
        self.nonce == 0
            && self.balance.is_zero()
            && (self.code_hash == EMPTY_CODE_HASH || self.code_hash.is_zero())
    }

    /// Slim-RLP: empty code-hash/storage-root are replaced by the empty byte
    /// string so both sides of a diff agree bit-exactly on "no code"/"no storage".
    pub fn encode_slim(&self) -> Vec<u8> {
        let storage_root = if self.storage_root == EMPTY_ROOT_HASH {
            None
        } else {
            Some(self.storage_root)
        };
        let code_hash = if self.code_hash == EMPTY_CODE_HASH {
            None
        } else {
            Some(self.code_hash)
        };

        let mut buf = Vec::new();
        Encoder::new(&mut buf)
            .encode_field(&self.nonce)
            .encode_field(&self.balance)
            .encode_optional_field(&storage_root)
            .encode_optional_field(&code_hash)
            .finish();
        buf
    }

    pub fn decode_slim(rlp: &[u8]) -> Result<Self, RLPDecodeError> {
        let decoder = Decoder::new(rlp)?;
        let (nonce, decoder) = decoder.decode_field("nonce")?;
        let (balance, decoder) = decoder.decode_field("balance")?;
        let (storage_root, decoder) = decoder.decode_optional_field::<H256>();
        let (code_hash, decoder) = decoder.decode_optional_field::<H256>();
        decoder.finish()?;
        Ok(Account {
            nonce,
            balance,
            storage_root: storage_root.unwrap_or(EMPTY_ROOT_HASH),
            code_hash: code_hash.unwrap_or(EMPTY_CODE_HASH),
        })
    }
}

impl RLPEncode for Account {
    fn encode(&self, buf: &mut dyn bytes::BufMut) {
        Encoder::new(buf)
            .encode_field(&self.nonce)
            .encode_field(&self.balance)
            .encode_field(&self.storage_root)
            .encode_field(&self.code_hash)
            .finish();
    }
}

impl RLPDecode for Account {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let decoder = Decoder::new(rlp)?;
        let (nonce, decoder) = decoder.decode_field("nonce")?;
        let (balance, decoder) = decoder.decode_field("balance")?;
        let (storage_root, decoder) = decoder.decode_field("storage_root")?;
        let (code_hash, decoder) = decoder.decode_field("code_hash")?;
        let remaining = decoder.finish()?;
        Ok((
            Account {
                nonce,
                balance,
                storage_root,
                code_hash,
            },
            remaining,
        ))
    }
}

/// Leading-zero-trimmed big-endian RLP of a storage slot value.
/// An empty byte string means "delete this slot".
pub fn encode_storage_value(value: U256) -> Vec<u8> {
    if value.is_zero() {
        return Vec::new();
    }
    value.encode_to_vec()
}

pub fn decode_storage_value(rlp: &[u8]) -> Result<U256, RLPEncodeError> {
    if rlp.is_empty() {
        return Ok(U256::zero());
    }
    U256::decode(rlp).map_err(|_| RLPEncodeError::UnsupportedType)
}

/// A pending change to one account's committed view, produced by `Finalise`
/// and consumed by whatever drives the cache's commit pipeline.
#[derive(Default, Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccountUpdate {
    pub address: Address,
    #[serde(skip)]
    pub hashed_address: Option<H256>,
    pub removed: bool,
    pub info: Option<Account>,
    pub code: Option<Code>,
    pub added_storage: rustc_hash::FxHashMap<H256, U256>,
    pub removed_storage: bool,
}

impl AccountUpdate {
    pub fn new(address: Address) -> Self {
        AccountUpdate {
            address,
            ..Default::default()
        }
    }

    pub fn new_with_hash(address: Address, hashed_address: H256) -> Self {
        AccountUpdate {
            address,
            hashed_address: Some(hashed_address),
            ..Default::default()
        }
    }

    pub fn removed(address: Address) -> Self {
        AccountUpdate {
            address,
            removed: true,
            ..Default::default()
        }
    }

    pub fn removed_with_hash(address: Address, hashed_address: H256) -> Self {
        AccountUpdate {
            address,
            hashed_address: Some(hashed_address),
            removed: true,
            ..Default::default()
        }
    }

    pub fn merge(&mut self, other: AccountUpdate) {
        if other.removed {
            *self = other;
            return;
        }
        if let Some(info) = other.info {
            self.info = Some(info);
        }
        if let Some(code) = other.code {
            self.code = Some(code);
        }
        self.added_storage.extend(other.added_storage);
        self.removed_storage |= other.removed_storage;
        self.removed = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_account_is_empty() {
        let acc = Account::default();
        assert!(acc.is_empty());
    }

    #[test]
    fn nonzero_balance_is_not_empty() {
        let acc = Account::new_empty_with_balance(U256::from(1));
        assert!(!acc.is_empty());
    }

    #[test]
    fn slim_encoding_round_trips_and_omits_empty_fields() {
        let acc = Account::new_empty_with_balance(U256::from(42));
        let encoded = acc.encode_slim();
        let decoded = Account::decode_slim(&encoded).unwrap();
        assert_eq!(acc, decoded);

        // A fully empty account's slim encoding is just (0, 0, "", "").
        let empty = Account::default();
        let encoded_empty = empty.encode_slim();
        let decoded_empty = Account::decode_slim(&encoded_empty).unwrap();
        assert_eq!(empty, decoded_empty);
    }

    #[test]
    fn full_encoding_round_trips() {
        let acc = Account {
            nonce: 7,
            balance: U256::from(1000u64),
            storage_root: EMPTY_ROOT_HASH,
            code_hash: EMPTY_CODE_HASH,
        };
        let encoded = acc.encode_to_vec();
        let decoded = Account::decode(&encoded).unwrap();
        assert_eq!(acc, decoded);
    }

    #[test]
    fn storage_value_zero_encodes_empty() {
        assert!(encode_storage_value(U256::zero()).is_empty());
        assert_eq!(decode_storage_value(&[]).unwrap(), U256::zero());
    }

    #[test]
    fn account_update_merge_prefers_later_non_removal() {
        let addr = Address::zero();
        let mut a = AccountUpdate::new(addr);
        a.info = Some(Account::new_empty_with_balance(U256::from(1)));

        let mut b = AccountUpdate::new(addr);
        b.info = Some(Account::new_empty_with_balance(U256::from(2)));
        b.added_storage.insert(H256::zero(), U256::from(5));

        a.merge(b);
        assert_eq!(a.info.unwrap().balance, U256::from(2));
        assert_eq!(a.added_storage.get(&H256::zero()), Some(&U256::from(5)));
    }
}
