//! The trusted wallet. Owns accounts, the encrypted mnemonic and keys, the
//! lock state, and the network, token and permission registries.
//!
//! Every mutating call works on a copy of [`PersistedState`], checks the
//! invariants, writes it through [`StateStore`] and only then swaps it in,
//! so a failed write leaves memory and disk in agreement.
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroizing;

use crate::api::types::{AccountInfo, AddNetworkRequest, WalletSnapshot};
use crate::chain_provider::{
    self, ChainProvider, Erc20Metadata, CONTRACT_CALL_GAS, DEFAULT_GAS_PRICE_WEI, TRANSFER_GAS,
};
use crate::crypto::{self, AccountKey, MnemonicPhrase, RecoverableSignature};
use crate::errors::{WalletError, WalletResult};
use crate::ethereum::{
    format_units, hash_personal_message, parse_quantity, Address, LegacyTransaction,
    SignedTransaction, TransactionRequest, TypedData, TypedDataVersion,
};
use crate::models::{
    Account, AccountKind, Network, PersistedState, Token, TokenKind, TransactionRecord,
};
use crate::secret_codec::{CipherText, PasswordHash, SecretCodec};
use crate::session::SessionManager;
use crate::storage::StateStore;
use crate::validation::InputValidator;

const IMPORTED_ACCOUNT_NAME: &str = "Private Account";
const MAX_TRANSACTION_HISTORY: usize = 100;

/// Returned once by [`WalletVault::create_wallet`]. The plaintext phrase is
/// not kept anywhere else.
#[derive(Debug)]
pub struct CreatedWallet {
    pub mnemonic: MnemonicPhrase,
    pub account: AccountInfo,
}

pub struct WalletVault {
    state: RwLock<PersistedState>,
    store: StateStore,
    codec: SecretCodec,
    session: SessionManager,
    validator: InputValidator,
    chain: Option<Arc<dyn ChainProvider>>,
}

impl WalletVault {
    /// Load persisted state, repairing missing defaults. An initialized
    /// wallet always comes up locked.
    pub fn open(
        store: StateStore,
        codec: SecretCodec,
        session: SessionManager,
    ) -> WalletResult<Self> {
        let mut state = store.load_or_recover()?.unwrap_or_default();
        state.repair();
        state.check_invariants()?;
        if state.vault.is_initialized() {
            state.vault.locked = true;
        }
        session.lock();

        log::info!(
            "wallet state opened: {} account(s), network {}",
            state.vault.accounts.len(),
            state.current_network_id
        );

        Ok(Self {
            state: RwLock::new(state),
            store,
            codec,
            session,
            validator: InputValidator::new()?,
            chain: None,
        })
    }

    pub fn with_chain_provider(mut self, provider: Arc<dyn ChainProvider>) -> Self {
        self.chain = Some(provider);
        self
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn is_initialized(&self) -> bool {
        self.state.read().vault.is_initialized()
    }

    pub fn is_locked(&self) -> bool {
        self.session.is_locked()
    }

    // Lifecycle

    pub fn create_wallet(&self, password: &SecretString) -> WalletResult<CreatedWallet> {
        self.validator.validate_password(password.expose_secret())?;
        self.ensure_uninitialized()?;

        let mnemonic = crypto::generate_mnemonic()?;
        let account = self.install_mnemonic(&mnemonic, password)?;
        log::info!("created wallet with account {}", account.address);
        Ok(CreatedWallet { mnemonic, account })
    }

    /// Restore from an existing phrase. The checksum is verified before
    /// anything else.
    pub fn import_wallet(&self, phrase: &str, password: &SecretString) -> WalletResult<AccountInfo> {
        let mnemonic = crypto::parse_mnemonic(phrase)?;
        self.validator.validate_password(password.expose_secret())?;
        self.ensure_uninitialized()?;

        let account = self.install_mnemonic(&mnemonic, password)?;
        log::info!("imported wallet with account {}", account.address);
        Ok(account)
    }

    /// Append a raw-key account. On an empty vault the password becomes the
    /// vault password; otherwise it must match it.
    pub fn import_private_key(
        &self,
        hex_key: &str,
        password: &SecretString,
        name: Option<&str>,
    ) -> WalletResult<AccountInfo> {
        let key = crypto::import_raw_key(hex_key)?;
        let name = match name {
            Some(name) => self.checked_label(name)?,
            None => IMPORTED_ACCOUNT_NAME.to_string(),
        };

        let existing_hash = self.state.read().vault.password_hash.clone();
        let new_hash = match existing_hash {
            Some(_) => {
                self.verify_gate(password)?;
                None
            }
            None => {
                self.validator.validate_password(password.expose_secret())?;
                Some(self.codec.hash_password(password)?)
            }
        };
        let first_password = new_hash.is_some();

        let address = key.address();
        let mut account = self.seal_account(&key, password, name, 0, AccountKind::Imported)?;
        let info = self.mutate(move |state| {
            if state.vault.find_account(&address).is_some() {
                return Err(WalletError::AlreadyExists(format!("account {}", address)));
            }
            if let Some(hash) = new_hash {
                if state.vault.password_hash.is_some() {
                    return Err(WalletError::AlreadyExists("vault password".to_string()));
                }
                state.vault.password_hash = Some(hash);
                state.vault.locked = false;
            }
            account.derivation_index = state.vault.accounts.len() as u32;
            let info = AccountInfo::from(&account);
            state.vault.accounts.push(account);
            state.vault.current_account_index = Some(state.vault.accounts.len() - 1);
            Ok(info)
        })?;

        if first_password {
            self.session.open(password);
        }
        log::info!("imported private key account {}", info.address);
        Ok(info)
    }

    /// Idempotent.
    pub fn lock(&self) -> WalletResult<()> {
        self.session.lock();
        if self.state.read().vault.locked {
            return Ok(());
        }
        self.mutate(|state| {
            state.vault.locked = true;
            Ok(())
        })?;
        log::info!("wallet locked");
        Ok(())
    }

    pub fn unlock(&self, password: &SecretString) -> WalletResult<()> {
        if !self.is_initialized() {
            return Err(WalletError::NotInitialized);
        }
        self.verify_gate(password)?;

        if self.state.read().vault.locked {
            self.mutate(|state| {
                state.vault.locked = false;
                Ok(())
            })?;
        }
        self.session.open(password);
        log::info!("wallet unlocked");
        Ok(())
    }

    /// Pure check; lock state and backoff are untouched.
    pub fn is_valid_password(&self, password: &SecretString) -> bool {
        match self.state.read().vault.password_hash.as_ref() {
            Some(hash) => self.codec.verify_password(password, hash),
            None => false,
        }
    }

    pub fn change_password(
        &self,
        current: &SecretString,
        new_password: &SecretString,
    ) -> WalletResult<()> {
        self.verify_gate(current)?;
        self.validator.validate_password(new_password.expose_secret())?;

        let snapshot = self.state.read().vault.clone();
        let encrypted_mnemonic = match &snapshot.encrypted_mnemonic {
            Some(cipher) => Some(self.reseal(cipher, current, new_password)?),
            None => None,
        };
        let mut resealed = Vec::with_capacity(snapshot.accounts.len());
        for account in &snapshot.accounts {
            resealed.push((
                account.address,
                self.reseal(&account.encrypted_private_key, current, new_password)?,
            ));
        }
        let password_hash = self.codec.hash_password(new_password)?;
        let was_unlocked = !self.session.is_locked();

        self.mutate(move |state| {
            let unchanged = state
                .vault
                .accounts
                .iter()
                .map(|account| account.address)
                .eq(resealed.iter().map(|(address, _)| *address));
            if !unchanged {
                return Err(WalletError::Internal(
                    "accounts changed during password change".to_string(),
                ));
            }
            for (account, (_, cipher)) in state.vault.accounts.iter_mut().zip(resealed) {
                account.encrypted_private_key = cipher;
            }
            state.vault.encrypted_mnemonic = encrypted_mnemonic;
            state.vault.password_hash = Some(password_hash);
            Ok(())
        })?;

        // Older copies are still sealed under the replaced password.
        let purged = self.store.paths().purge_backups()?;
        log::info!("password changed; {} state backup(s) removed", purged);

        if was_unlocked {
            self.session.open(new_password);
        }
        log::info!("vault password changed");
        Ok(())
    }

    // Sensitive disclosure. Both re-verify the password even while unlocked.

    pub fn reveal_mnemonic(&self, password: &SecretString) -> WalletResult<MnemonicPhrase> {
        self.verify_gate(password)?;
        let cipher = self
            .state
            .read()
            .vault
            .encrypted_mnemonic
            .clone()
            .ok_or_else(|| WalletError::NotFound("recovery phrase".to_string()))?;
        let phrase = self.codec.decrypt_string(&cipher, password)?;
        crypto::parse_mnemonic(&phrase)
    }

    pub fn reveal_private_key(
        &self,
        password: &SecretString,
        address: &Address,
    ) -> WalletResult<Zeroizing<String>> {
        self.verify_gate(password)?;
        let cipher = self.account_cipher(address)?;
        let key = self.open_account_key(*address, &cipher, password)?;
        Ok(key.private_key_hex())
    }

    // Accounts

    /// Derive the next account from the vault mnemonic. Needs an unlocked session.
    pub fn add_account(&self, name: Option<&str>) -> WalletResult<AccountInfo> {
        let name = name.map(|name| self.checked_label(name)).transpose()?;
        let (cipher, index) = {
            let state = self.state.read();
            (
                state.vault.encrypted_mnemonic.clone(),
                state.vault.next_hd_index,
            )
        };

        let mut account = self.session.with_password(|password| {
            let cipher =
                cipher.ok_or_else(|| WalletError::NotFound("recovery phrase".to_string()))?;
            let phrase = self.codec.decrypt_string(&cipher, password)?;
            let mnemonic = crypto::parse_mnemonic(&phrase)?;
            let seed = crypto::derive_seed(&mnemonic, "")?;
            let key = crypto::derive_account(&seed, index)?;
            self.seal_account(&key, password, String::new(), index, AccountKind::Hd)
        })?;

        let info = self.mutate(move |state| {
            if state.vault.next_hd_index != index {
                return Err(WalletError::Internal(
                    "concurrent account derivation".to_string(),
                ));
            }
            if state.vault.find_account(&account.address).is_some() {
                return Err(WalletError::AlreadyExists(format!(
                    "account {}",
                    account.address
                )));
            }
            account.name =
                name.unwrap_or_else(|| format!("Account {}", state.vault.accounts.len() + 1));
            let info = AccountInfo::from(&account);
            state.vault.accounts.push(account);
            state.vault.current_account_index = Some(state.vault.accounts.len() - 1);
            state.vault.next_hd_index = index + 1;
            Ok(info)
        })?;

        log::info!("derived account {} at index {}", info.address, index);
        Ok(info)
    }

    pub fn accounts(&self) -> Vec<AccountInfo> {
        self.state
            .read()
            .vault
            .accounts
            .iter()
            .map(AccountInfo::from)
            .collect()
    }

    pub fn current_account(&self) -> Option<AccountInfo> {
        self.state.read().vault.current_account().map(AccountInfo::from)
    }

    pub fn current_address(&self) -> Option<Address> {
        self.state
            .read()
            .vault
            .current_account()
            .map(|account| account.address)
    }

    pub fn switch_current_account(&self, address: &Address) -> WalletResult<AccountInfo> {
        let address = *address;
        self.mutate(move |state| {
            let (index, account) = state
                .vault
                .find_account(&address)
                .ok_or_else(|| WalletError::NotFound(format!("account {}", address)))?;
            let info = AccountInfo::from(account);
            state.vault.current_account_index = Some(index);
            Ok(info)
        })
    }

    // Signing. All of these fail with `Locked` before looking at anything else.

    pub fn sign_digest(
        &self,
        address: &Address,
        digest: &[u8; 32],
    ) -> WalletResult<RecoverableSignature> {
        self.with_account_key(*address, |key| key.sign_digest(digest))
    }

    /// EIP-191 personal message signature as `0x` hex.
    pub fn sign_message(&self, address: &Address, message: &[u8]) -> WalletResult<String> {
        let digest = hash_personal_message(message);
        Ok(self.sign_digest(address, &digest)?.to_hex())
    }

    pub fn sign_typed_data(
        &self,
        address: &Address,
        typed: &TypedData,
        version: TypedDataVersion,
    ) -> WalletResult<String> {
        if self.session.is_locked() {
            return Err(WalletError::Locked);
        }
        if let Some(chain_id) = typed.domain_chain_id() {
            let active = self.current_network()?.chain_id;
            if chain_id != active {
                return Err(WalletError::InvalidParams(format!(
                    "typed data is for chain {} but the active chain is {}",
                    chain_id, active
                )));
            }
        }
        let digest = typed.signing_hash(version)?;
        Ok(self.sign_digest(address, &digest)?.to_hex())
    }

    /// Fill in missing nonce, gas price and gas limit, then sign for the
    /// active chain.
    pub async fn sign_transaction(
        &self,
        request: &TransactionRequest,
    ) -> WalletResult<SignedTransaction> {
        if self.session.is_locked() {
            return Err(WalletError::Locked);
        }
        self.account_cipher(&request.from)?;

        let network = self.current_network()?;
        let value = request.value_wei()?;
        let data = request.data_bytes()?;

        let nonce = match request.nonce.as_deref() {
            Some(nonce) => quantity_u64(nonce)?,
            None => {
                self.require_chain()?
                    .get_transaction_count(&network, request.from)
                    .await?
            }
        };
        let gas_price = match (request.gas_price.as_deref(), &self.chain) {
            (Some(price), _) => parse_quantity(price)?,
            (None, Some(chain)) => chain.gas_price(&network).await?,
            (None, None) => DEFAULT_GAS_PRICE_WEI,
        };
        let gas_limit = match (request.gas.as_deref(), &self.chain) {
            (Some(gas), _) => quantity_u64(gas)?,
            (None, Some(chain)) => {
                chain
                    .estimate_gas(&network, request.from, request.to, &data)
                    .await?
            }
            (None, None) if data.is_empty() => TRANSFER_GAS,
            (None, None) => CONTRACT_CALL_GAS,
        };

        let transaction = LegacyTransaction {
            nonce,
            gas_price,
            gas_limit,
            to: request.to,
            value,
            data,
            chain_id: network.chain_id,
        };
        self.with_account_key(request.from, |key| transaction.sign(key))
    }

    /// Sign, broadcast and record. Returns the transaction hash.
    pub async fn send_transaction(&self, request: &TransactionRequest) -> WalletResult<String> {
        let provider = self.require_chain()?;
        let signed = self.sign_transaction(request).await?;
        let network = self.current_network()?;
        let hash = provider.send_raw_transaction(&network, &signed.raw).await?;

        let record = TransactionRecord {
            hash: hash.clone(),
            from: request.from,
            to: request.to,
            value: request.value_wei()?.to_string(),
            chain_id: network.chain_id,
            timestamp: Utc::now(),
        };
        self.mutate(move |state| {
            state.transactions.push(record);
            let overflow = state
                .transactions
                .len()
                .saturating_sub(MAX_TRANSACTION_HISTORY);
            state.transactions.drain(..overflow);
            Ok(())
        })?;

        log::info!("broadcast transaction {} on chain {}", hash, network.chain_id);
        Ok(hash)
    }

    pub fn transactions(&self) -> Vec<TransactionRecord> {
        self.state.read().transactions.clone()
    }

    // Networks

    pub fn networks(&self) -> Vec<Network> {
        self.state.read().networks.clone()
    }

    pub fn current_network(&self) -> WalletResult<Network> {
        self.state.read().current_network().cloned()
    }

    pub fn find_network_by_chain_id(&self, chain_id: u64) -> Option<Network> {
        self.state
            .read()
            .networks
            .iter()
            .find(|network| network.chain_id == chain_id)
            .cloned()
    }

    pub fn add_network(&self, request: AddNetworkRequest) -> WalletResult<Network> {
        let name = self.checked_label(&request.name)?;
        self.validator.validate_rpc_url(&request.rpc_url)?;
        self.validator.validate_symbol(&request.symbol)?;
        if let Some(explorer) = request.block_explorer_url.as_deref() {
            self.validator.validate_rpc_url(explorer)?;
        }
        if request.chain_id == 0 {
            return Err(WalletError::ValidationError(
                "Chain id must be positive".to_string(),
            ));
        }

        let network = Network {
            id: Network::id_from_name(&name),
            is_mainnet: request
                .is_mainnet
                .unwrap_or_else(|| name.contains("Mainnet")),
            name,
            rpc_url: request.rpc_url,
            chain_id: request.chain_id,
            symbol: request.symbol,
            block_explorer_url: request.block_explorer_url,
        };

        let added = self.mutate(move |state| {
            if state.networks.iter().any(|known| known.id == network.id) {
                return Err(WalletError::AlreadyExists(format!("network {}", network.id)));
            }
            if state
                .networks
                .iter()
                .any(|known| known.chain_id == network.chain_id)
            {
                return Err(WalletError::AlreadyExists(format!(
                    "chain {}",
                    network.chain_id
                )));
            }
            state.networks.push(network.clone());
            Ok(network)
        })?;

        log::info!("added network {} (chain {})", added.id, added.chain_id);
        Ok(added)
    }

    /// Match by chain id (hex or decimal), network id, or display name.
    pub fn switch_network(&self, selector: &str) -> WalletResult<Network> {
        let selector = selector.trim();
        let chain_id = parse_chain_selector(selector);
        self.switch_where(selector, |network| {
            Some(network.chain_id) == chain_id
                || network.id == selector
                || network.name.eq_ignore_ascii_case(selector)
        })
    }

    pub fn switch_network_by_chain_id(&self, chain_id: u64) -> WalletResult<Network> {
        self.switch_where(&format!("0x{:x}", chain_id), |network| {
            network.chain_id == chain_id
        })
    }

    fn switch_where<P>(&self, label: &str, predicate: P) -> WalletResult<Network>
    where
        P: Fn(&Network) -> bool,
    {
        let network = self.mutate(|state| {
            let network = state
                .networks
                .iter()
                .find(|network| predicate(*network))
                .cloned()
                .ok_or_else(|| WalletError::NetworkNotFound(label.to_string()))?;
            state.current_network_id = network.id.clone();
            Ok(network)
        })?;
        log::info!("switched to network {} (chain {})", network.id, network.chain_id);
        Ok(network)
    }

    // Tokens

    pub fn tokens(&self) -> Vec<Token> {
        self.state.read().tokens.clone()
    }

    /// Fails with `DuplicateToken` when the contract is already listed.
    pub fn add_token(&self, token: Token) -> WalletResult<()> {
        if token.is_native() {
            return Err(WalletError::DuplicateToken(token.contract_address.to_string()));
        }
        self.validator.validate_symbol(&token.symbol)?;

        self.mutate(move |state| {
            if state
                .tokens
                .iter()
                .any(|known| known.contract_address == token.contract_address)
            {
                return Err(WalletError::DuplicateToken(token.contract_address.to_string()));
            }
            log::info!("added token {} ({})", token.symbol, token.contract_address);
            state.tokens.push(token);
            Ok(())
        })
    }

    /// Insert or replace by contract address. Returns true when the token
    /// was not listed before. The native entry is never replaced.
    pub fn upsert_token(&self, token: Token) -> WalletResult<bool> {
        if token.is_native() {
            return Ok(false);
        }
        self.validator.validate_symbol(&token.symbol)?;

        self.mutate(move |state| {
            match state
                .tokens
                .iter_mut()
                .find(|known| known.contract_address == token.contract_address)
            {
                Some(existing) => {
                    *existing = token;
                    Ok(false)
                }
                None => {
                    state.tokens.push(token);
                    Ok(true)
                }
            }
        })
    }

    /// The native token is never removed; asking for it is a no-op.
    pub fn remove_token(&self, contract: &Address) -> WalletResult<bool> {
        let contract = *contract;
        let listed = self.state.read().tokens.iter().any(|token| {
            token.contract_address == contract && !token.is_native()
        });
        if !listed {
            return Ok(false);
        }

        self.mutate(move |state| {
            state
                .tokens
                .retain(|token| token.is_native() || token.contract_address != contract);
            Ok(true)
        })
    }

    pub fn update_balance(&self, contract: &Address, balance: String) -> WalletResult<()> {
        let contract = *contract;
        self.mutate(move |state| {
            let token = state
                .tokens
                .iter_mut()
                .find(|token| token.contract_address == contract)
                .ok_or_else(|| WalletError::NotFound(format!("token {}", contract)))?;
            token.cached_balance = Some(balance);
            Ok(())
        })
    }

    /// Query native and ERC-20 balances for the current account. Tokens
    /// whose query fails keep their previous cached value.
    pub async fn refresh_balances(&self) -> WalletResult<Vec<Token>> {
        let provider = self.require_chain()?;
        let owner = self.current_address().ok_or(WalletError::NotInitialized)?;
        let network = self.current_network()?;

        let mut updates = Vec::new();
        for token in self.tokens() {
            let queried = match token.kind {
                TokenKind::Native => provider.get_balance(&network, owner).await,
                TokenKind::ERC20 => {
                    chain_provider::fetch_erc20_balance(
                        provider.as_ref(),
                        &network,
                        token.contract_address,
                        owner,
                    )
                    .await
                }
                TokenKind::ERC721 | TokenKind::ERC1155 => continue,
            };
            match queried {
                Ok(raw) => updates.push((token.contract_address, format_units(raw, token.decimals))),
                Err(err) => log::warn!("balance refresh failed for {}: {}", token.symbol, err),
            }
        }

        self.mutate(move |state| {
            for (contract, balance) in updates {
                if let Some(token) = state
                    .tokens
                    .iter_mut()
                    .find(|token| token.contract_address == contract)
                {
                    token.cached_balance = Some(balance);
                }
            }
            Ok(state.tokens.clone())
        })
    }

    pub async fn fetch_token_metadata(&self, contract: &Address) -> WalletResult<Erc20Metadata> {
        let provider = self.require_chain()?;
        let network = self.current_network()?;
        chain_provider::fetch_erc20_metadata(provider.as_ref(), &network, *contract).await
    }

    // Per-origin permissions

    /// Extend an origin's grant. Every account must exist in the vault.
    pub fn grant_permission(&self, origin: &str, accounts: &[Address]) -> WalletResult<Vec<Address>> {
        self.validator.validate_origin(origin)?;
        let origin = origin.to_string();
        let accounts = accounts.to_vec();

        let granted = self.mutate(move |state| {
            for account in &accounts {
                if state.vault.find_account(account).is_none() {
                    return Err(WalletError::NotFound(format!("account {}", account)));
                }
            }
            let entry = state.permissions.entry(origin).or_default();
            for account in accounts {
                if !entry.contains(&account) {
                    entry.push(account);
                }
            }
            Ok(entry.clone())
        })?;
        Ok(granted)
    }

    pub fn revoke_permission(&self, origin: &str) -> WalletResult<bool> {
        if !self.state.read().permissions.contains_key(origin) {
            return Ok(false);
        }
        let origin = origin.to_string();
        self.mutate(move |state| Ok(state.permissions.remove(&origin).is_some()))
    }

    /// Granted accounts that still exist in the vault.
    pub fn permitted_accounts(&self, origin: &str) -> Vec<Address> {
        let state = self.state.read();
        state
            .permissions
            .get(origin)
            .map(|granted| {
                granted
                    .iter()
                    .filter(|address| state.vault.find_account(address).is_some())
                    .copied()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn permitted_origins(&self) -> Vec<String> {
        self.state.read().permissions.keys().cloned().collect()
    }

    pub fn snapshot(&self) -> WalletResult<WalletSnapshot> {
        let is_locked = self.session.is_locked();
        let state = self.state.read();
        let network = state.current_network()?.clone();
        Ok(WalletSnapshot {
            is_initialized: state.vault.is_initialized(),
            is_locked,
            accounts: state.vault.accounts.iter().map(AccountInfo::from).collect(),
            current_account: state.vault.current_account().map(|account| account.address),
            chain_id: network.hex_chain_id(),
            network,
            tokens: state.tokens.clone(),
        })
    }

    // Internals. None of these may call into the session while holding the
    // state lock.

    fn mutate<F, T>(&self, apply: F) -> WalletResult<T>
    where
        F: FnOnce(&mut PersistedState) -> WalletResult<T>,
    {
        let mut guard = self.state.write();
        let mut next = guard.clone();
        let output = apply(&mut next)?;
        next.check_invariants()?;
        self.store.save(&next)?;
        *guard = next;
        Ok(output)
    }

    fn ensure_uninitialized(&self) -> WalletResult<()> {
        if self.is_initialized() {
            return Err(WalletError::AlreadyExists("wallet".to_string()));
        }
        Ok(())
    }

    fn install_mnemonic(
        &self,
        mnemonic: &MnemonicPhrase,
        password: &SecretString,
    ) -> WalletResult<AccountInfo> {
        let seed = crypto::derive_seed(mnemonic, "")?;
        let key = crypto::derive_account(&seed, 0)?;
        let encrypted_mnemonic = self.codec.encrypt_str(mnemonic.as_str(), password)?;
        let account = self.seal_account(&key, password, "Account 1".to_string(), 0, AccountKind::Hd)?;
        let password_hash = self.codec.hash_password(password)?;
        let info = AccountInfo::from(&account);

        self.mutate(move |state| {
            if state.vault.is_initialized() {
                return Err(WalletError::AlreadyExists("wallet".to_string()));
            }
            state.vault.accounts = vec![account];
            state.vault.current_account_index = Some(0);
            state.vault.encrypted_mnemonic = Some(encrypted_mnemonic);
            state.vault.password_hash = Some(password_hash);
            state.vault.next_hd_index = 1;
            state.vault.locked = false;
            Ok(())
        })?;

        self.session.open(password);
        Ok(info)
    }

    fn seal_account(
        &self,
        key: &AccountKey,
        password: &SecretString,
        name: String,
        derivation_index: u32,
        kind: AccountKind,
    ) -> WalletResult<Account> {
        Ok(Account {
            address: key.address(),
            encrypted_private_key: self.codec.encrypt(key.private_key_bytes(), password)?,
            name,
            derivation_index,
            kind,
        })
    }

    fn reseal(
        &self,
        cipher: &CipherText,
        current: &SecretString,
        next: &SecretString,
    ) -> WalletResult<CipherText> {
        let plaintext = self.codec.decrypt(cipher, current)?;
        self.codec.encrypt(&plaintext, next)
    }

    /// Rate-limited password check against the stored hash.
    fn verify_gate(&self, password: &SecretString) -> WalletResult<()> {
        let hash: PasswordHash = self
            .state
            .read()
            .vault
            .password_hash
            .clone()
            .ok_or(WalletError::NotInitialized)?;
        self.session.ensure_attempt_allowed()?;

        if self.codec.verify_password(password, &hash) {
            return Ok(());
        }
        let delay = self.session.register_failed_attempt();
        log::warn!(
            "password verification failed; next attempt allowed in {} ms",
            delay.as_millis()
        );
        Err(WalletError::WrongPassword)
    }

    fn account_cipher(&self, address: &Address) -> WalletResult<CipherText> {
        self.state
            .read()
            .vault
            .find_account(address)
            .map(|(_, account)| account.encrypted_private_key.clone())
            .ok_or_else(|| WalletError::NotFound(format!("account {}", address)))
    }

    fn open_account_key(
        &self,
        address: Address,
        cipher: &CipherText,
        password: &SecretString,
    ) -> WalletResult<AccountKey> {
        let secret = self.codec.decrypt(cipher, password)?;
        let key = crypto::account_from_secret(&secret)?;
        if key.address() != address {
            log::error!("stored key does not match account {}", address);
            return Err(WalletError::DecryptionFailed);
        }
        Ok(key)
    }

    /// Decrypt an account key for the duration of `operation` only.
    fn with_account_key<F, T>(&self, address: Address, operation: F) -> WalletResult<T>
    where
        F: FnOnce(&AccountKey) -> WalletResult<T>,
    {
        self.session.with_password(|password| {
            let cipher = self.account_cipher(&address)?;
            let key = self.open_account_key(address, &cipher, password)?;
            operation(&key)
        })
    }

    fn require_chain(&self) -> WalletResult<Arc<dyn ChainProvider>> {
        self.chain
            .clone()
            .ok_or_else(|| WalletError::ChainError("no chain provider configured".to_string()))
    }

    fn checked_label(&self, label: &str) -> WalletResult<String> {
        self.validator.validate_label(label)?;
        Ok(label.trim().to_string())
    }
}

impl std::fmt::Debug for WalletVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletVault")
            .field("state_file", &self.store.paths().state_file())
            .field("session", &self.session)
            .field("chain_provider", &self.chain.is_some())
            .finish()
    }
}

fn quantity_u64(value: &str) -> WalletResult<u64> {
    let parsed = parse_quantity(value)?;
    u64::try_from(parsed)
        .map_err(|_| WalletError::InvalidParams(format!("quantity out of range: {}", value)))
}

fn parse_chain_selector(selector: &str) -> Option<u64> {
    if selector.starts_with("0x") || selector.starts_with("0X") {
        return quantity_u64(selector).ok();
    }
    if !selector.is_empty() && selector.chars().all(|c| c.is_ascii_digit()) {
        return selector.parse().ok();
    }
    None
}
