use serde::{Deserialize, Serialize};

use super::rlp;
use super::units::parse_quantity;
use super::Address;
use crate::crypto::{keccak256, AccountKey};
use crate::errors::{WalletError, WalletResult};

/// Transaction fields as supplied by a page through `eth_sendTransaction`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRequest {
    pub from: Address,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, alias = "gasLimit", skip_serializing_if = "Option::is_none")]
    pub gas: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_price: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

impl TransactionRequest {
    pub fn value_wei(&self) -> WalletResult<u128> {
        self.value.as_deref().map(parse_quantity).unwrap_or(Ok(0))
    }

    pub fn data_bytes(&self) -> WalletResult<Vec<u8>> {
        match self.data.as_deref() {
            None | Some("") | Some("0x") => Ok(Vec::new()),
            Some(data) => {
                let body = data.strip_prefix("0x").ok_or_else(|| {
                    WalletError::InvalidParams("data must be 0x-prefixed hex".to_string())
                })?;
                hex::decode(body)
                    .map_err(|_| WalletError::InvalidParams("data is not valid hex".to_string()))
            }
        }
    }
}

/// Pre-EIP-1559 transaction signed with EIP-155 replay protection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyTransaction {
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
    pub to: Option<Address>,
    pub value: u128,
    pub data: Vec<u8>,
    pub chain_id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub raw: Vec<u8>,
    pub hash: [u8; 32],
}

impl SignedTransaction {
    pub fn raw_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.raw))
    }

    pub fn hash_hex(&self) -> String {
        format!("0x{}", hex::encode(self.hash))
    }
}

impl LegacyTransaction {
    fn base_fields(&self) -> Vec<Vec<u8>> {
        let to = match &self.to {
            Some(address) => rlp::encode_bytes(address.as_bytes()),
            None => rlp::encode_bytes(&[]),
        };
        vec![
            rlp::encode_uint(self.nonce as u128),
            rlp::encode_uint(self.gas_price),
            rlp::encode_uint(self.gas_limit as u128),
            to,
            rlp::encode_uint(self.value),
            rlp::encode_bytes(&self.data),
        ]
    }

    /// `rlp([nonce, gasPrice, gas, to, value, data, chainId, 0, 0])`.
    pub fn signing_payload(&self) -> Vec<u8> {
        let mut fields = self.base_fields();
        fields.push(rlp::encode_uint(self.chain_id as u128));
        fields.push(rlp::encode_uint(0));
        fields.push(rlp::encode_uint(0));
        rlp::encode_list(&fields)
    }

    pub fn signing_hash(&self) -> [u8; 32] {
        keccak256(&self.signing_payload())
    }

    pub fn sign(&self, key: &AccountKey) -> WalletResult<SignedTransaction> {
        let signature = key.sign_digest(&self.signing_hash())?;
        let v = (self.chain_id as u128)
            .checked_mul(2)
            .and_then(|v| v.checked_add(35 + signature.recovery_id as u128))
            .ok_or_else(|| WalletError::InvalidParams("chain id too large".to_string()))?;

        let mut fields = self.base_fields();
        fields.push(rlp::encode_uint(v));
        fields.push(rlp::encode_uint_bytes(&signature.r));
        fields.push(rlp::encode_uint_bytes(&signature.s));
        let raw = rlp::encode_list(&fields);
        let hash = keccak256(&raw);
        Ok(SignedTransaction { raw, hash })
    }
}
