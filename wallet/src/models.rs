//! Durable wallet records.
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{WalletError, WalletResult};
use crate::ethereum::{to_quantity, Address};
use crate::secret_codec::{CipherText, PasswordHash};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountKind {
    /// Derived from the vault mnemonic.
    Hd,
    Imported,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub address: Address,
    pub encrypted_private_key: CipherText,
    pub name: String,
    pub derivation_index: u32,
    pub kind: AccountKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Network {
    pub id: String,
    pub name: String,
    pub rpc_url: String,
    pub chain_id: u64,
    pub symbol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_explorer_url: Option<String>,
    #[serde(default)]
    pub is_mainnet: bool,
}

impl Network {
    pub fn sepolia() -> Self {
        Self {
            id: "sepolia".to_string(),
            name: "Ethereum Sepolia Testnet".to_string(),
            rpc_url: "https://rpc.sepolia.org".to_string(),
            chain_id: 11_155_111,
            symbol: "ETH".to_string(),
            block_explorer_url: Some("https://sepolia.etherscan.io".to_string()),
            is_mainnet: false,
        }
    }

    pub fn defaults() -> Vec<Network> {
        vec![Self::sepolia()]
    }

    /// Display id derived from a chain name: lowercase, whitespace runs to `-`.
    pub fn id_from_name(name: &str) -> String {
        name.split_whitespace()
            .map(|part| part.to_lowercase())
            .collect::<Vec<_>>()
            .join("-")
    }

    pub fn hex_chain_id(&self) -> String {
        to_quantity(self.chain_id as u128)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenKind {
    ERC20,
    ERC721,
    ERC1155,
    Native,
}

impl TokenKind {
    /// Asset types a page may register through `wallet_watchAsset`.
    pub fn parse_watchable(kind: &str) -> WalletResult<Self> {
        match kind {
            "ERC20" => Ok(TokenKind::ERC20),
            "ERC721" => Ok(TokenKind::ERC721),
            "ERC1155" => Ok(TokenKind::ERC1155),
            other => Err(WalletError::UnsupportedAssetType(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Token {
    /// Zero address for the native token.
    pub contract_address: Address,
    pub symbol: String,
    pub name: String,
    pub decimals: u8,
    pub kind: TokenKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_balance: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl Token {
    pub fn native() -> Self {
        Self {
            contract_address: Address::ZERO,
            symbol: "ETH".to_string(),
            name: "Ethereum".to_string(),
            decimals: 18,
            kind: TokenKind::Native,
            cached_balance: Some("0".to_string()),
            token_id: None,
            image: None,
        }
    }

    pub fn is_native(&self) -> bool {
        self.kind == TokenKind::Native || self.contract_address.is_zero()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    pub hash: String,
    pub from: Address,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Address>,
    /// Decimal wei.
    pub value: String,
    pub chain_id: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultRecord {
    pub locked: bool,
    pub accounts: Vec<Account>,
    pub current_account_index: Option<usize>,
    pub encrypted_mnemonic: Option<CipherText>,
    pub password_hash: Option<PasswordHash>,
    /// Next unused index on the mnemonic's derivation path.
    #[serde(default)]
    pub next_hd_index: u32,
}

impl VaultRecord {
    pub fn is_initialized(&self) -> bool {
        !self.accounts.is_empty() || self.password_hash.is_some()
    }

    pub fn current_account(&self) -> Option<&Account> {
        self.current_account_index
            .and_then(|index| self.accounts.get(index))
    }

    pub fn find_account(&self, address: &Address) -> Option<(usize, &Account)> {
        self.accounts
            .iter()
            .enumerate()
            .find(|(_, account)| account.address == *address)
    }
}

/// Everything written to `wallet.state`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
    pub vault: VaultRecord,
    pub networks: Vec<Network>,
    pub current_network_id: String,
    pub tokens: Vec<Token>,
    /// Origin → accounts the origin may see.
    #[serde(default)]
    pub permissions: BTreeMap<String, Vec<Address>>,
    #[serde(default)]
    pub transactions: Vec<TransactionRecord>,
}

impl Default for PersistedState {
    fn default() -> Self {
        let networks = Network::defaults();
        let current_network_id = networks
            .first()
            .map(|network| network.id.clone())
            .unwrap_or_default();
        Self {
            vault: VaultRecord::default(),
            networks,
            current_network_id,
            tokens: vec![Token::native()],
            permissions: BTreeMap::new(),
            transactions: Vec::new(),
        }
    }
}

impl PersistedState {
    pub fn current_network(&self) -> WalletResult<&Network> {
        self.networks
            .iter()
            .find(|network| network.id == self.current_network_id)
            .ok_or_else(|| WalletError::NetworkNotFound(self.current_network_id.clone()))
    }

    /// Restore the default network set when empty and repoint a dangling
    /// active network at the first entry.
    pub fn ensure_networks(&mut self) {
        if self.networks.is_empty() {
            self.networks = Network::defaults();
        }
        let active_known = self
            .networks
            .iter()
            .any(|network| network.id == self.current_network_id);
        if !active_known {
            if let Some(first) = self.networks.first() {
                self.current_network_id = first.id.clone();
            }
        }
    }

    /// The native token always exists and sits first.
    pub fn ensure_native_token(&mut self) {
        if !self.tokens.iter().any(Token::is_native) {
            self.tokens.insert(0, Token::native());
        }
    }

    /// Drop a current-account pointer that no longer refers to a live account.
    pub fn ensure_account_pointer(&mut self) {
        let vault = &mut self.vault;
        let current = vault.current_account_index;
        match current {
            Some(index) if index < vault.accounts.len() => {}
            _ if vault.accounts.is_empty() => vault.current_account_index = None,
            _ => vault.current_account_index = Some(0),
        }
    }

    pub fn repair(&mut self) {
        self.ensure_networks();
        self.ensure_native_token();
        self.ensure_account_pointer();
    }

    pub fn check_invariants(&self) -> WalletResult<()> {
        if !self.vault.accounts.is_empty() && self.vault.password_hash.is_none() {
            return Err(WalletError::ValidationError(
                "accounts exist without a password".to_string(),
            ));
        }
        if let Some(index) = self.vault.current_account_index {
            if index >= self.vault.accounts.len() {
                return Err(WalletError::ValidationError(
                    "current account index out of range".to_string(),
                ));
            }
        }
        self.current_network()?;
        if self.tokens.iter().filter(|token| token.is_native()).count() != 1 {
            return Err(WalletError::ValidationError(
                "exactly one native token must exist".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_state_satisfies_invariants() {
        let state = PersistedState::default();
        state.check_invariants().unwrap();
        assert_eq!(state.current_network().unwrap().chain_id, 11_155_111);
        assert!(state.tokens[0].is_native());
    }

    #[test]
    fn repair_restores_removed_defaults() {
        let mut state = PersistedState::default();
        state.networks.clear();
        state.tokens.clear();
        state.current_network_id = "gone".to_string();

        state.repair();
        state.check_invariants().unwrap();
        assert_eq!(state.current_network_id, "sepolia");
        assert_eq!(state.tokens.len(), 1);
    }

    #[test]
    fn network_ids_are_derived_from_names() {
        assert_eq!(Network::id_from_name("Ethereum  Mainnet"), "ethereum-mainnet");
        assert_eq!(Network::sepolia().hex_chain_id(), "0xaa36a7");
    }

    #[test]
    fn only_standard_asset_types_are_watchable() {
        assert_eq!(TokenKind::parse_watchable("ERC20").unwrap(), TokenKind::ERC20);
        assert!(matches!(
            TokenKind::parse_watchable("ERC777"),
            Err(WalletError::UnsupportedAssetType(_))
        ));
        assert!(TokenKind::parse_watchable("Native").is_err());
    }
}
