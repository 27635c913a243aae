//! Trusted-context request handler. Answers bridge requests from pages
//! against the vault, asking the user through an [`ApprovalPrompter`]
//! before anything is disclosed, signed or changed.
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};

use crate::api::types::{
    AddEthereumChainParams, AddNetworkRequest, ChainResponse, RequestAccountsResponse,
    SendTransactionResponse, SignRequest, SignatureResponse, SwitchEthereumChainParams,
    WatchAssetParams,
};
use crate::bridge::{BridgeEndpoint, BridgeRequest, BridgeResponse, BridgeTransport, MessageType};
use crate::errors::{WalletError, WalletResult};
use crate::ethereum::{
    decode_message_param, parse_quantity, Address, TransactionRequest, TypedData,
    TypedDataVersion,
};
use crate::models::{Token, TokenKind};
use crate::vault::WalletVault;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalKind {
    Connect,
    SignMessage,
    SignTypedData,
    SendTransaction,
    WatchAsset,
    AddChain,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApprovalRequest {
    pub kind: ApprovalKind,
    pub origin: String,
    /// What the user is shown.
    pub details: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approved,
    Rejected,
}

/// The interactive UI. Implementations may unlock the vault before answering.
#[async_trait]
pub trait ApprovalPrompter: Send + Sync {
    async fn prompt(&self, request: ApprovalRequest) -> ApprovalDecision;
}

pub struct BackgroundHost {
    vault: Arc<WalletVault>,
    prompter: Arc<dyn ApprovalPrompter>,
}

impl BackgroundHost {
    pub fn new(vault: Arc<WalletVault>, prompter: Arc<dyn ApprovalPrompter>) -> Self {
        Self { vault, prompter }
    }

    pub fn vault(&self) -> &Arc<WalletVault> {
        &self.vault
    }

    /// `None` for unregistered message types.
    pub async fn handle(&self, request: &BridgeRequest) -> Option<BridgeResponse> {
        let kind = match request.message_type() {
            Some(kind) => kind,
            None => {
                log::debug!("ignoring unregistered message type {}", request.kind);
                return None;
            }
        };

        let response = match self.dispatch(kind, request).await {
            Ok(data) => BridgeResponse::success(kind, &request.request_id, data),
            Err(err) => {
                log::info!(
                    "{} from {} failed: {}",
                    kind,
                    request.origin,
                    err
                );
                BridgeResponse::failure(kind, &request.request_id, &err)
            }
        };
        Some(response)
    }

    /// Raw JSON in, raw JSON out. Undecodable input is dropped.
    pub async fn handle_raw(&self, raw: &str) -> Option<String> {
        let request: BridgeRequest = match serde_json::from_str(raw) {
            Ok(request) => request,
            Err(err) => {
                log::debug!("dropping undecodable bridge request: {}", err);
                return None;
            }
        };
        let response = self.handle(&request).await?;
        match serde_json::to_string(&response) {
            Ok(encoded) => Some(encoded),
            Err(err) => {
                log::error!("failed to encode response for {}: {}", request.request_id, err);
                None
            }
        }
    }

    /// Answer requests from one endpoint until the page side closes. Each
    /// request runs on its own task so a pending prompt does not block others.
    pub async fn serve(self: Arc<Self>, endpoint: BridgeEndpoint) {
        let BridgeEndpoint {
            mut inbound,
            outbound,
        } = endpoint;
        let outbound = Arc::new(outbound);

        while let Some(raw) = inbound.recv().await {
            let host = Arc::clone(&self);
            let outbound = Arc::clone(&outbound);
            tokio::spawn(async move {
                if let Some(response) = host.handle_raw(&raw).await {
                    if let Err(err) = outbound.post(response).await {
                        log::debug!("page went away before response: {}", err);
                    }
                }
            });
        }
        log::debug!("bridge endpoint closed");
    }

    async fn dispatch(&self, kind: MessageType, request: &BridgeRequest) -> WalletResult<Value> {
        let origin = request.origin.as_str();
        match kind {
            MessageType::GetWalletState => to_value(self.vault.snapshot()?),
            MessageType::EthRequestAccounts => self.request_accounts(origin).await,
            MessageType::WalletWatchAsset => {
                self.watch_asset(origin, parse_data(&request.data)?).await
            }
            MessageType::WalletAddEthereumChain => {
                self.add_chain(origin, parse_data(&request.data)?).await
            }
            MessageType::WalletSwitchEthereumChain => {
                self.switch_chain(origin, parse_data(&request.data)?)
            }
            MessageType::EthSendTransaction => {
                self.send_transaction(origin, parse_data(&request.data)?)
                    .await
            }
            MessageType::EthSign => self.sign_message(origin, parse_data(&request.data)?).await,
            MessageType::EthSignTypedData => {
                self.sign_typed_data(origin, parse_data(&request.data)?)
                    .await
            }
        }
    }

    /// Known origins are answered from the stored grant without a prompt.
    async fn request_accounts(&self, origin: &str) -> WalletResult<Value> {
        let granted = self.vault.permitted_accounts(origin);
        if !granted.is_empty() {
            return to_value(RequestAccountsResponse {
                accounts: granted,
                current_account: self.vault.current_address(),
            });
        }

        if !self.vault.is_initialized() {
            return Err(WalletError::NotInitialized);
        }
        self.approve(ApprovalKind::Connect, origin, json!({ "origin": origin }))
            .await?;
        if self.vault.is_locked() {
            return Err(WalletError::Locked);
        }

        let current = self
            .vault
            .current_address()
            .ok_or(WalletError::NotInitialized)?;
        let accounts = self.vault.grant_permission(origin, &[current])?;
        log::info!("granted {} account(s) to {}", accounts.len(), origin);
        to_value(RequestAccountsResponse {
            accounts,
            current_account: Some(current),
        })
    }

    async fn watch_asset(&self, origin: &str, params: WatchAssetParams) -> WalletResult<Value> {
        let kind = TokenKind::parse_watchable(&params.kind)?;
        let options = params.options;

        let metadata = match (kind, &options.symbol, options.decimals) {
            (TokenKind::ERC20, Some(_), Some(_)) => None,
            (TokenKind::ERC20, _, _) => Some(self.vault.fetch_token_metadata(&options.address).await?),
            _ => None,
        };
        let symbol = options
            .symbol
            .clone()
            .or_else(|| metadata.as_ref().map(|meta| meta.symbol.clone()))
            .ok_or_else(|| WalletError::InvalidParams("asset symbol is required".to_string()))?;
        let decimals = match kind {
            TokenKind::ERC20 => options
                .decimals
                .or_else(|| metadata.as_ref().map(|meta| meta.decimals))
                .unwrap_or(18),
            _ => 0,
        };
        let token = Token {
            contract_address: options.address,
            name: metadata
                .map(|meta| meta.name)
                .unwrap_or_else(|| symbol.clone()),
            symbol,
            decimals,
            kind,
            cached_balance: None,
            token_id: options.token_id,
            image: options.image,
        };

        self.approve(ApprovalKind::WatchAsset, origin, to_value(&token)?)
            .await?;
        let added = self.vault.upsert_token(token)?;
        log::info!("watch asset from {} (new: {})", origin, added);
        Ok(Value::Bool(true))
    }

    /// A chain id that is already registered is accepted without a prompt.
    async fn add_chain(&self, origin: &str, params: AddEthereumChainParams) -> WalletResult<Value> {
        let chain_id = parse_chain_id(&params.chain_id)?;
        if self.vault.find_network_by_chain_id(chain_id).is_some() {
            return Ok(Value::Null);
        }
        let rpc_url = params
            .rpc_urls
            .first()
            .cloned()
            .ok_or_else(|| WalletError::InvalidParams("rpcUrls must not be empty".to_string()))?;

        self.approve(ApprovalKind::AddChain, origin, to_value(&params)?)
            .await?;
        self.vault.add_network(AddNetworkRequest {
            name: params.chain_name,
            rpc_url,
            chain_id,
            symbol: params.native_currency.symbol,
            block_explorer_url: params
                .block_explorer_urls
                .and_then(|urls| urls.into_iter().next()),
            is_mainnet: None,
        })?;
        Ok(Value::Null)
    }

    /// Only connected origins may move the wallet-wide active network.
    fn switch_chain(&self, origin: &str, params: SwitchEthereumChainParams) -> WalletResult<Value> {
        let chain_id = parse_chain_id(&params.chain_id)?;
        if self.vault.permitted_accounts(origin).is_empty() {
            return Err(WalletError::Unauthorized(format!(
                "{} must connect before switching chains",
                origin
            )));
        }
        let network = self.vault.switch_network_by_chain_id(chain_id)?;
        to_value(ChainResponse::from(&network))
    }

    async fn send_transaction(
        &self,
        origin: &str,
        request: TransactionRequest,
    ) -> WalletResult<Value> {
        self.ensure_permitted(origin, &request.from)?;
        self.ensure_unlocked()?;
        self.approve(ApprovalKind::SendTransaction, origin, to_value(&request)?)
            .await?;
        let transaction_hash = self.vault.send_transaction(&request).await?;
        to_value(SendTransactionResponse { transaction_hash })
    }

    async fn sign_message(&self, origin: &str, request: SignRequest) -> WalletResult<Value> {
        let (address, message) = message_params(&request)?;
        self.ensure_permitted(origin, &address)?;
        self.ensure_unlocked()?;
        self.approve(
            ApprovalKind::SignMessage,
            origin,
            json!({ "address": address, "message": message }),
        )
        .await?;

        let signature = self
            .vault
            .sign_message(&address, &decode_message_param(&message))?;
        to_value(SignatureResponse { signature })
    }

    async fn sign_typed_data(&self, origin: &str, request: SignRequest) -> WalletResult<Value> {
        let version = match request.method.as_str() {
            "eth_signTypedData_v3" => TypedDataVersion::V3,
            "eth_signTypedData_v4" | "eth_signTypedData" => TypedDataVersion::V4,
            other => return Err(WalletError::UnsupportedMethod(other.to_string())),
        };
        let address = param_address(&request.params, 0)?;
        let raw = request
            .params
            .get(1)
            .ok_or_else(|| WalletError::InvalidParams("typed data is required".to_string()))?;
        if request.method == "eth_signTypedData" && !raw.is_object() {
            return Err(WalletError::InvalidParams(
                "eth_signTypedData expects a typed data object".to_string(),
            ));
        }
        let typed = TypedData::from_param(raw)?;

        self.ensure_permitted(origin, &address)?;
        self.ensure_unlocked()?;
        self.approve(
            ApprovalKind::SignTypedData,
            origin,
            json!({ "address": address, "typedData": typed }),
        )
        .await?;

        let signature = self.vault.sign_typed_data(&address, &typed, version)?;
        to_value(SignatureResponse { signature })
    }

    async fn approve(&self, kind: ApprovalKind, origin: &str, details: Value) -> WalletResult<()> {
        let decision = self
            .prompter
            .prompt(ApprovalRequest {
                kind,
                origin: origin.to_string(),
                details,
            })
            .await;
        match decision {
            ApprovalDecision::Approved => Ok(()),
            ApprovalDecision::Rejected => {
                log::info!("user rejected {:?} for {}", kind, origin);
                Err(WalletError::UserRejected)
            }
        }
    }

    fn ensure_permitted(&self, origin: &str, address: &Address) -> WalletResult<()> {
        if self.vault.permitted_accounts(origin).contains(address) {
            Ok(())
        } else {
            Err(WalletError::Unauthorized(format!(
                "{} is not connected to {}",
                address, origin
            )))
        }
    }

    fn ensure_unlocked(&self) -> WalletResult<()> {
        if self.vault.is_locked() {
            Err(WalletError::Locked)
        } else {
            Ok(())
        }
    }
}

impl std::fmt::Debug for BackgroundHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundHost")
            .field("vault", &self.vault)
            .finish()
    }
}

fn parse_data<T: DeserializeOwned>(data: &Value) -> WalletResult<T> {
    serde_json::from_value(data.clone())
        .map_err(|e| WalletError::InvalidParams(format!("malformed request data: {}", e)))
}

fn to_value<T: Serialize>(value: T) -> WalletResult<Value> {
    serde_json::to_value(value).map_err(WalletError::from)
}

pub(crate) fn parse_chain_id(value: &str) -> WalletResult<u64> {
    if !value.starts_with("0x") {
        return Err(WalletError::InvalidParams(format!(
            "chainId must be 0x-prefixed hex: {}",
            value
        )));
    }
    let parsed = parse_quantity(value)?;
    u64::try_from(parsed)
        .ok()
        .filter(|id| *id > 0)
        .ok_or_else(|| WalletError::InvalidParams(format!("chainId out of range: {}", value)))
}

pub(crate) fn param_address(params: &[Value], index: usize) -> WalletResult<Address> {
    let raw = params
        .get(index)
        .and_then(Value::as_str)
        .ok_or_else(|| WalletError::InvalidParams(format!("missing address at param {}", index)))?;
    Address::parse(raw)
}

/// `eth_sign` is `[address, message]`; `personal_sign` is
/// `[message, address]`, tolerating pages that send the reverse.
pub(crate) fn message_params(request: &SignRequest) -> WalletResult<(Address, String)> {
    let text = |index: usize| {
        request
            .params
            .get(index)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| WalletError::InvalidParams(format!("missing param {}", index)))
    };

    match request.method.as_str() {
        "eth_sign" => Ok((param_address(&request.params, 0)?, text(1)?)),
        "personal_sign" => match param_address(&request.params, 1) {
            Ok(address) => Ok((address, text(0)?)),
            Err(_) => Ok((param_address(&request.params, 0)?, text(1)?)),
        },
        other => Err(WalletError::UnsupportedMethod(other.to_string())),
    }
}
