//! The on-chain JSON-RPC capability the wallet depends on but does not implement.
use async_trait::async_trait;

use crate::errors::{WalletError, WalletResult};
use crate::ethereum::Address;
use crate::models::Network;

pub const DEFAULT_GAS_PRICE_WEI: u128 = 20_000_000_000;
pub const TRANSFER_GAS: u64 = 21_000;
pub const CONTRACT_CALL_GAS: u64 = 60_000;

const SELECTOR_NAME: [u8; 4] = [0x06, 0xfd, 0xde, 0x03];
const SELECTOR_SYMBOL: [u8; 4] = [0x95, 0xd8, 0x9b, 0x41];
const SELECTOR_DECIMALS: [u8; 4] = [0x31, 0x3c, 0xe5, 0x67];
const SELECTOR_BALANCE_OF: [u8; 4] = [0x70, 0xa0, 0x82, 0x31];

/// JSON-RPC client for a network. Injected into the vault; each call names
/// the network it targets so one client can serve every registered chain.
#[async_trait]
pub trait ChainProvider: Send + Sync {
    async fn get_balance(&self, network: &Network, address: Address) -> WalletResult<u128>;

    async fn get_transaction_count(&self, network: &Network, address: Address)
        -> WalletResult<u64>;

    /// Returns the transaction hash.
    async fn send_raw_transaction(&self, network: &Network, raw: &[u8]) -> WalletResult<String>;

    async fn call(&self, network: &Network, to: Address, data: &[u8]) -> WalletResult<Vec<u8>>;

    async fn gas_price(&self, _network: &Network) -> WalletResult<u128> {
        Ok(DEFAULT_GAS_PRICE_WEI)
    }

    async fn estimate_gas(
        &self,
        _network: &Network,
        _from: Address,
        _to: Option<Address>,
        data: &[u8],
    ) -> WalletResult<u64> {
        Ok(if data.is_empty() {
            TRANSFER_GAS
        } else {
            CONTRACT_CALL_GAS
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Erc20Metadata {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

pub async fn fetch_erc20_metadata(
    provider: &dyn ChainProvider,
    network: &Network,
    contract: Address,
) -> WalletResult<Erc20Metadata> {
    let name = decode_abi_string(&provider.call(network, contract, &SELECTOR_NAME).await?)?;
    let symbol = decode_abi_string(&provider.call(network, contract, &SELECTOR_SYMBOL).await?)?;
    let decimals = decode_abi_uint(&provider.call(network, contract, &SELECTOR_DECIMALS).await?)?;
    let decimals = u8::try_from(decimals)
        .map_err(|_| WalletError::ChainError(format!("decimals out of range: {}", decimals)))?;

    Ok(Erc20Metadata {
        name,
        symbol,
        decimals,
    })
}

pub async fn fetch_erc20_balance(
    provider: &dyn ChainProvider,
    network: &Network,
    contract: Address,
    owner: Address,
) -> WalletResult<u128> {
    let mut data = Vec::with_capacity(36);
    data.extend_from_slice(&SELECTOR_BALANCE_OF);
    data.extend_from_slice(&[0u8; 12]);
    data.extend_from_slice(owner.as_bytes());
    decode_abi_uint(&provider.call(network, contract, &data).await?)
}

/// Decode a single `uint256` return word. Values above `u128::MAX` are rejected.
pub fn decode_abi_uint(data: &[u8]) -> WalletResult<u128> {
    if data.len() < 32 {
        return Err(WalletError::ChainError(format!(
            "expected a 32-byte word, got {} bytes",
            data.len()
        )));
    }
    let word = &data[..32];
    if word[..16].iter().any(|b| *b != 0) {
        return Err(WalletError::ChainError("uint256 exceeds u128".to_string()));
    }
    let mut low = [0u8; 16];
    low.copy_from_slice(&word[16..]);
    Ok(u128::from_be_bytes(low))
}

/// Decode an ABI `string` return value. Legacy tokens that return a
/// null-padded `bytes32` are accepted too.
pub fn decode_abi_string(data: &[u8]) -> WalletResult<String> {
    if data.len() == 32 {
        let end = data.iter().position(|b| *b == 0).unwrap_or(32);
        return String::from_utf8(data[..end].to_vec())
            .map_err(|_| WalletError::ChainError("string is not UTF-8".to_string()));
    }

    let offset = decode_abi_uint(data)? as usize;
    let length_word = data
        .get(offset..offset.saturating_add(32))
        .ok_or_else(|| WalletError::ChainError("string offset out of bounds".to_string()))?;
    let length = decode_abi_uint(length_word)? as usize;
    let start = offset.saturating_add(32);
    let bytes = data
        .get(start..start.saturating_add(length))
        .ok_or_else(|| WalletError::ChainError("string length out of bounds".to_string()))?;
    String::from_utf8(bytes.to_vec())
        .map_err(|_| WalletError::ChainError("string is not UTF-8".to_string()))
}
