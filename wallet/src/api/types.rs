use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ethereum::Address;
use crate::models::{Account, AccountKind, Network, Token};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountInfo {
    pub address: Address,
    pub name: String,
    pub derivation_index: u32,
    pub kind: AccountKind,
}

impl From<&Account> for AccountInfo {
    fn from(account: &Account) -> Self {
        Self {
            address: account.address,
            name: account.name.clone(),
            derivation_index: account.derivation_index,
            kind: account.kind,
        }
    }
}

/// Everything the UI or a page may learn about the wallet without a password.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletSnapshot {
    pub is_initialized: bool,
    pub is_locked: bool,
    pub accounts: Vec<AccountInfo>,
    #[serde(default)]
    pub current_account: Option<Address>,
    pub network: Network,
    /// `0x`-prefixed hex.
    pub chain_id: String,
    pub tokens: Vec<Token>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddNetworkRequest {
    pub name: String,
    pub rpc_url: String,
    pub chain_id: u64,
    pub symbol: String,
    #[serde(default)]
    pub block_explorer_url: Option<String>,
    /// Derived from the name when absent.
    #[serde(default)]
    pub is_mainnet: Option<bool>,
}

// Bridge payloads

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestAccountsResponse {
    pub accounts: Vec<Address>,
    #[serde(default)]
    pub current_account: Option<Address>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendTransactionResponse {
    pub transaction_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureResponse {
    pub signature: String,
}

/// Carried by `ETH_SIGN` and `ETH_SIGN_TYPED_DATA`: the provider method
/// name plus its raw params.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignRequest {
    pub method: String,
    #[serde(default)]
    pub params: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchAssetOptions {
    pub address: Address,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub decimals: Option<u8>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub token_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchAssetParams {
    #[serde(rename = "type")]
    pub kind: String,
    pub options: WatchAssetOptions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NativeCurrency {
    #[serde(default)]
    pub name: Option<String>,
    pub symbol: String,
    #[serde(default)]
    pub decimals: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddEthereumChainParams {
    /// `0x`-prefixed hex.
    pub chain_id: String,
    pub chain_name: String,
    pub rpc_urls: Vec<String>,
    pub native_currency: NativeCurrency,
    #[serde(default)]
    pub block_explorer_urls: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwitchEthereumChainParams {
    pub chain_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainResponse {
    pub chain_id: String,
    pub network_version: String,
}

impl From<&Network> for ChainResponse {
    fn from(network: &Network) -> Self {
        Self {
            chain_id: network.hex_chain_id(),
            network_version: network.chain_id.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_chain_params_use_dapp_field_names() {
        let raw = serde_json::json!({
            "chainId": "0x1",
            "chainName": "Ethereum Mainnet",
            "rpcUrls": ["https://eth.llamarpc.com"],
            "nativeCurrency": { "name": "Ether", "symbol": "ETH", "decimals": 18 }
        });
        let params: AddEthereumChainParams = serde_json::from_value(raw).unwrap();
        assert_eq!(params.chain_id, "0x1");
        assert_eq!(params.native_currency.symbol, "ETH");
        assert!(params.block_explorer_urls.is_none());
    }

    #[test]
    fn watch_asset_type_is_renamed() {
        let raw = serde_json::json!({
            "type": "ERC20",
            "options": {
                "address": "0xdac17f958d2ee523a2206206994597c13d831ec7",
                "symbol": "USDT",
                "decimals": 6
            }
        });
        let params: WatchAssetParams = serde_json::from_value(raw).unwrap();
        assert_eq!(params.kind, "ERC20");
        assert_eq!(params.options.decimals, Some(6));
    }

    #[test]
    fn chain_response_reports_hex_and_decimal() {
        let response = ChainResponse::from(&Network::sepolia());
        assert_eq!(response.chain_id, "0xaa36a7");
        assert_eq!(response.network_version, "11155111");
    }
}
