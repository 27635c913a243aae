//! The page-facing provider object. Local reads are answered in place;
//! everything privileged travels through the [`RequestBridge`].
pub mod events;
pub mod methods;

use std::sync::Arc;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::api::types::{
    AddEthereumChainParams, ChainResponse, RequestAccountsResponse, SendTransactionResponse,
    SignRequest, SignatureResponse, SwitchEthereumChainParams, WalletSnapshot, WatchAssetParams,
};
use crate::background::{message_params, param_address, parse_chain_id};
use crate::bridge::{MessageType, RequestBridge};
use crate::errors::{ProviderRpcError, WalletError, WalletResult};
use crate::ethereum::{to_quantity, Address, TransactionRequest};
use crate::models::TokenKind;

pub use events::{EventEmitter, Listener, ListenerId, ProviderEvent};
pub use methods::ProviderMethod;

/// `request({ method, params })` as a page sends it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestArguments {
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

impl RequestArguments {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: method.into(),
            params: Some(params),
        }
    }

    pub fn without_params(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            params: None,
        }
    }
}

#[derive(Debug, Default)]
struct ProviderState {
    connected_accounts: Vec<Address>,
    chain_id: Option<u64>,
    connected: bool,
}

pub struct ProviderDispatcher {
    bridge: Arc<RequestBridge>,
    state: RwLock<ProviderState>,
    events: EventEmitter,
}

impl ProviderDispatcher {
    pub fn new(bridge: Arc<RequestBridge>) -> Self {
        Self::with_granted_accounts(bridge, Vec::new())
    }

    /// A provider for a page whose origin already holds a stored grant, so
    /// `eth_accounts` answers it without a round trip.
    pub fn with_granted_accounts(bridge: Arc<RequestBridge>, accounts: Vec<Address>) -> Self {
        Self {
            bridge,
            state: RwLock::new(ProviderState {
                connected_accounts: accounts,
                ..ProviderState::default()
            }),
            events: EventEmitter::new(),
        }
    }

    pub fn origin(&self) -> &str {
        self.bridge.origin()
    }

    pub fn is_dywallet(&self) -> bool {
        true
    }

    pub fn selected_address(&self) -> Option<Address> {
        self.state.read().connected_accounts.first().copied()
    }

    /// Last known chain id as `0x` hex.
    pub fn chain_id(&self) -> Option<String> {
        self.state
            .read()
            .chain_id
            .map(|id| to_quantity(id as u128))
    }

    pub fn network_version(&self) -> Option<String> {
        self.state.read().chain_id.map(|id| id.to_string())
    }

    pub fn is_connected(&self) -> bool {
        self.state.read().connected
    }

    pub fn events(&self) -> &EventEmitter {
        &self.events
    }

    pub fn on<F>(&self, event: ProviderEvent, handler: F) -> ListenerId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.events.on(event, handler)
    }

    pub fn remove_listener(&self, event: ProviderEvent, id: ListenerId) -> bool {
        self.events.remove_listener(event, id)
    }

    /// Learn the active chain and emit `connect`.
    pub async fn connect(&self) -> WalletResult<String> {
        let chain_id = self.refresh_chain(MessageType::GetWalletState).await?;
        let hex = to_quantity(chain_id as u128);
        self.events
            .emit(ProviderEvent::Connect, &json!({ "chainId": hex }));
        Ok(hex)
    }

    /// Forget this page's grant locally.
    pub fn disconnect(&self) {
        let had_accounts = {
            let mut state = self.state.write();
            let had = !state.connected_accounts.is_empty();
            state.connected_accounts.clear();
            had
        };
        if had_accounts {
            self.events
                .emit(ProviderEvent::AccountsChanged, &json!([]));
        }
    }

    pub async fn request(&self, args: RequestArguments) -> WalletResult<Value> {
        let method = ProviderMethod::parse(&args.method)?;
        let params = params_list(args.params);
        log::debug!("{} requested {}", self.origin(), method.as_str());

        let result = match method.message_type() {
            None => Ok(self.local_accounts()),
            Some(kind) => self.forward(method, kind, params).await,
        };

        if let Err(WalletError::BridgeError(reason)) = &result {
            self.mark_disconnected(reason);
        }
        result
    }

    async fn forward(
        &self,
        method: ProviderMethod,
        kind: MessageType,
        params: Vec<Value>,
    ) -> WalletResult<Value> {
        match method {
            ProviderMethod::Accounts => Ok(self.local_accounts()),
            ProviderMethod::RequestAccounts => self.request_accounts(kind).await,
            ProviderMethod::ChainId => self
                .refresh_chain(kind)
                .await
                .map(|id| Value::String(to_quantity(id as u128))),
            ProviderMethod::NetVersion => self
                .refresh_chain(kind)
                .await
                .map(|id| Value::String(id.to_string())),
            ProviderMethod::WatchAsset => self.watch_asset(kind, params).await,
            ProviderMethod::AddEthereumChain => self.add_chain(kind, params).await,
            ProviderMethod::SwitchEthereumChain => self.switch_chain(kind, params).await,
            ProviderMethod::SendTransaction => self.send_transaction(kind, params).await,
            ProviderMethod::EthSign | ProviderMethod::PersonalSign => {
                self.sign_message(method, kind, params).await
            }
            ProviderMethod::SignTypedData
            | ProviderMethod::SignTypedDataV3
            | ProviderMethod::SignTypedDataV4 => {
                self.sign_typed_data(method, kind, params).await
            }
        }
    }

    fn local_accounts(&self) -> Value {
        json!(self.state.read().connected_accounts)
    }

    /// [`request`](Self::request) with errors in the shape pages receive.
    pub async fn request_rpc(&self, args: RequestArguments) -> Result<Value, ProviderRpcError> {
        self.request(args).await.map_err(|err| err.to_rpc_error())
    }

    async fn request_accounts(&self, kind: MessageType) -> WalletResult<Value> {
        let existing = self.state.read().connected_accounts.clone();
        if !existing.is_empty() {
            return Ok(json!(existing));
        }

        let response: RequestAccountsResponse =
            decode(self.bridge.send(kind, &json!({})).await?)?;
        self.set_accounts(response.accounts.clone());
        Ok(json!(response.accounts))
    }

    async fn refresh_chain(&self, kind: MessageType) -> WalletResult<u64> {
        let snapshot: WalletSnapshot = decode(self.bridge.send(kind, &json!({})).await?)?;
        let chain_id = snapshot.network.chain_id;
        self.state.write().connected = true;
        self.apply_chain(chain_id, false);
        Ok(chain_id)
    }

    async fn watch_asset(&self, kind: MessageType, params: Vec<Value>) -> WalletResult<Value> {
        let raw = first_param(params)?;
        let asset_type = raw
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| WalletError::InvalidParams("asset type is required".to_string()))?;
        TokenKind::parse_watchable(asset_type)?;
        let asset: WatchAssetParams = parse_param(raw)?;

        self.bridge.send(kind, &asset).await
    }

    async fn add_chain(&self, kind: MessageType, params: Vec<Value>) -> WalletResult<Value> {
        let chain: AddEthereumChainParams = parse_param(first_param(params)?)?;
        parse_chain_id(&chain.chain_id)?;
        if chain.chain_name.trim().is_empty() {
            return Err(WalletError::InvalidParams("chainName is required".to_string()));
        }
        if chain.rpc_urls.is_empty() {
            return Err(WalletError::InvalidParams("rpcUrls is required".to_string()));
        }
        if chain.native_currency.symbol.trim().is_empty() {
            return Err(WalletError::InvalidParams(
                "nativeCurrency.symbol is required".to_string(),
            ));
        }

        self.bridge.send(kind, &chain).await?;
        Ok(Value::Null)
    }

    async fn switch_chain(&self, kind: MessageType, params: Vec<Value>) -> WalletResult<Value> {
        let target: SwitchEthereumChainParams = parse_param(first_param(params)?)?;
        parse_chain_id(&target.chain_id)?;

        let response: ChainResponse = decode(self.bridge.send(kind, &target).await?)?;
        let chain_id = parse_chain_id(&response.chain_id)?;
        self.apply_chain(chain_id, true);
        Ok(Value::Null)
    }

    async fn send_transaction(&self, kind: MessageType, params: Vec<Value>) -> WalletResult<Value> {
        let transaction: TransactionRequest = parse_param(first_param(params)?)?;
        self.ensure_connected(&transaction.from)?;

        let response: SendTransactionResponse =
            decode(self.bridge.send(kind, &transaction).await?)?;
        Ok(Value::String(response.transaction_hash))
    }

    async fn sign_message(
        &self,
        method: ProviderMethod,
        kind: MessageType,
        params: Vec<Value>,
    ) -> WalletResult<Value> {
        let request = SignRequest {
            method: method.as_str().to_string(),
            params,
        };
        let (address, _) = message_params(&request)?;
        self.ensure_connected(&address)?;

        let response: SignatureResponse =
            decode(self.bridge.send(kind, &request).await?)?;
        Ok(Value::String(response.signature))
    }

    async fn sign_typed_data(
        &self,
        method: ProviderMethod,
        kind: MessageType,
        params: Vec<Value>,
    ) -> WalletResult<Value> {
        let address = param_address(&params, 0)?;
        match params.get(1) {
            Some(data) if data.is_object() => {}
            Some(data) if data.is_string() && method != ProviderMethod::SignTypedData => {}
            Some(_) => {
                return Err(WalletError::InvalidParams(format!(
                    "{} expects a typed data object",
                    method.as_str()
                )))
            }
            None => {
                return Err(WalletError::InvalidParams(
                    "typed data is required".to_string(),
                ))
            }
        }
        self.ensure_connected(&address)?;

        let request = SignRequest {
            method: method.as_str().to_string(),
            params,
        };
        let response: SignatureResponse =
            decode(self.bridge.send(kind, &request).await?)?;
        Ok(Value::String(response.signature))
    }

    fn ensure_connected(&self, address: &Address) -> WalletResult<()> {
        if self.state.read().connected_accounts.contains(address) {
            Ok(())
        } else {
            Err(WalletError::Unauthorized(format!(
                "{} has not been connected",
                address
            )))
        }
    }

    fn set_accounts(&self, accounts: Vec<Address>) {
        let changed = {
            let mut state = self.state.write();
            let changed = state.connected_accounts != accounts;
            state.connected_accounts = accounts.clone();
            changed
        };
        if changed {
            self.events
                .emit(ProviderEvent::AccountsChanged, &json!(accounts));
        }
    }

    /// Learning the chain for the first time is not a change unless
    /// `announce_first` is set, as it is after an explicit switch.
    fn apply_chain(&self, chain_id: u64, announce_first: bool) {
        let changed = {
            let mut state = self.state.write();
            let previous = state.chain_id.replace(chain_id);
            match previous {
                Some(old) => old != chain_id,
                None => announce_first,
            }
        };
        if changed {
            self.events.emit(
                ProviderEvent::ChainChanged,
                &Value::String(to_quantity(chain_id as u128)),
            );
        }
    }

    fn mark_disconnected(&self, reason: &str) {
        let was_connected = std::mem::replace(&mut self.state.write().connected, false);
        if was_connected {
            log::warn!("provider for {} lost its bridge: {}", self.origin(), reason);
            let error = WalletError::BridgeError(reason.to_string()).to_rpc_error();
            self.events.emit(
                ProviderEvent::Disconnect,
                &json!({ "code": error.code, "message": error.message }),
            );
        }
    }
}

impl std::fmt::Debug for ProviderDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("ProviderDispatcher")
            .field("origin", &self.bridge.origin())
            .field("connected_accounts", &state.connected_accounts)
            .field("chain_id", &state.chain_id)
            .field("connected", &state.connected)
            .finish()
    }
}

/// Positional params. A bare object is treated as a single param, as
/// `wallet_watchAsset` callers commonly send it.
fn params_list(params: Option<Value>) -> Vec<Value> {
    match params {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items,
        Some(other) => vec![other],
    }
}

fn first_param(params: Vec<Value>) -> WalletResult<Value> {
    params
        .into_iter()
        .next()
        .ok_or_else(|| WalletError::InvalidParams("missing params".to_string()))
}

fn parse_param<T: DeserializeOwned>(value: Value) -> WalletResult<T> {
    serde_json::from_value(value).map_err(|e| WalletError::InvalidParams(e.to_string()))
}

fn decode<T: DeserializeOwned>(value: Value) -> WalletResult<T> {
    serde_json::from_value(value)
        .map_err(|e| WalletError::SerializationError(format!("unexpected response shape: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{BridgeRequest, BridgeResponse, ChannelTransport};
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedReceiver;

    const ACCOUNT: &str = "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266";

    fn dispatcher() -> (Arc<ProviderDispatcher>, Arc<RequestBridge>, UnboundedReceiver<String>) {
        let (transport, outbound) = ChannelTransport::pair();
        let bridge = Arc::new(RequestBridge::new(
            "https://app.example",
            Arc::new(transport),
            Duration::from_secs(5),
        ));
        (
            Arc::new(ProviderDispatcher::new(Arc::clone(&bridge))),
            bridge,
            outbound,
        )
    }

    #[tokio::test]
    async fn accounts_are_empty_before_approval() {
        let (provider, _bridge, mut outbound) = dispatcher();
        let accounts = provider
            .request(RequestArguments::without_params("eth_accounts"))
            .await
            .unwrap();
        assert_eq!(accounts, json!([]));
        assert!(outbound.try_recv().is_err());
        assert_eq!(provider.selected_address(), None);
        assert!(provider.is_dywallet());
    }

    #[tokio::test]
    async fn approval_sets_accounts_and_emits() {
        let (provider, bridge, mut outbound) = dispatcher();
        let emitted = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&emitted);
        provider.on(ProviderEvent::AccountsChanged, move |payload| {
            sink.lock().push(payload.clone())
        });

        let call = {
            let provider = Arc::clone(&provider);
            tokio::spawn(async move {
                provider
                    .request(RequestArguments::without_params("eth_requestAccounts"))
                    .await
            })
        };
        let request: BridgeRequest =
            serde_json::from_str(&outbound.recv().await.unwrap()).unwrap();
        assert_eq!(request.kind, "ETH_REQUEST_ACCOUNTS");
        let account = Address::parse(ACCOUNT).unwrap();
        bridge.deliver_response(BridgeResponse::success(
            MessageType::EthRequestAccounts,
            &request.request_id,
            json!({ "accounts": [account], "currentAccount": account }),
        ));

        let accounts = call.await.unwrap().unwrap();
        assert_eq!(accounts, json!([account]));
        assert_eq!(provider.selected_address(), Some(account));
        assert_eq!(emitted.lock().len(), 1);

        let again = provider
            .request(RequestArguments::without_params("eth_requestAccounts"))
            .await
            .unwrap();
        assert_eq!(again, accounts);
        assert!(outbound.try_recv().is_err());

        provider.disconnect();
        assert_eq!(provider.selected_address(), None);
        assert_eq!(emitted.lock().last(), Some(&json!([])));
    }

    fn snapshot(network: crate::models::Network) -> Value {
        serde_json::to_value(WalletSnapshot {
            is_initialized: true,
            is_locked: false,
            accounts: Vec::new(),
            current_account: None,
            chain_id: network.hex_chain_id(),
            network,
            tokens: Vec::new(),
        })
        .unwrap()
    }

    async fn answer_state(
        bridge: &RequestBridge,
        outbound: &mut UnboundedReceiver<String>,
        network: crate::models::Network,
    ) {
        let request: BridgeRequest =
            serde_json::from_str(&outbound.recv().await.unwrap()).unwrap();
        assert_eq!(request.kind, "GET_WALLET_STATE");
        assert!(bridge.deliver_response(BridgeResponse::success(
            MessageType::GetWalletState,
            &request.request_id,
            snapshot(network),
        )));
    }

    #[tokio::test]
    async fn first_chain_lookup_is_not_a_change() {
        let (provider, bridge, mut outbound) = dispatcher();
        let changes = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&changes);
        provider.on(ProviderEvent::ChainChanged, move |payload| {
            sink.lock().push(payload.clone())
        });

        let lookup = |provider: Arc<ProviderDispatcher>| {
            tokio::spawn(async move {
                provider
                    .request(RequestArguments::without_params("eth_chainId"))
                    .await
            })
        };

        let call = lookup(Arc::clone(&provider));
        answer_state(&bridge, &mut outbound, crate::models::Network::sepolia()).await;
        assert_eq!(call.await.unwrap().unwrap(), json!("0xaa36a7"));
        assert!(changes.lock().is_empty());

        let mut local = crate::models::Network::sepolia();
        local.chain_id = 31_337;
        let call = lookup(Arc::clone(&provider));
        answer_state(&bridge, &mut outbound, local).await;
        assert_eq!(call.await.unwrap().unwrap(), json!("0x7a69"));
        assert_eq!(changes.lock().as_slice(), &[json!("0x7a69")]);
    }

    #[tokio::test]
    async fn stored_grant_answers_accounts_locally() {
        let (transport, mut outbound) = ChannelTransport::pair();
        let bridge = Arc::new(RequestBridge::new(
            "https://app.example",
            Arc::new(transport),
            Duration::from_secs(5),
        ));
        let account = Address::parse(ACCOUNT).unwrap();
        let provider = ProviderDispatcher::with_granted_accounts(bridge, vec![account]);

        let accounts = provider
            .request(RequestArguments::without_params("eth_accounts"))
            .await
            .unwrap();
        assert_eq!(accounts, json!([account]));
        assert_eq!(provider.selected_address(), Some(account));
        assert!(outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn unknown_methods_are_rejected_locally() {
        let (provider, _bridge, mut outbound) = dispatcher();
        let err = provider
            .request_rpc(RequestArguments::without_params("eth_getBalance"))
            .await
            .unwrap_err();
        assert_eq!(err.code, crate::errors::codes::UNSUPPORTED_METHOD);
        assert!(outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn unsupported_asset_type_never_reaches_the_bridge() {
        let (provider, _bridge, mut outbound) = dispatcher();
        let err = provider
            .request(RequestArguments::new(
                "wallet_watchAsset",
                json!({ "type": "ERC777", "options": { "address": ACCOUNT } }),
            ))
            .await
            .unwrap_err();
        assert_eq!(err, WalletError::UnsupportedAssetType("ERC777".to_string()));
        assert!(outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn signing_requires_a_connected_account() {
        let (provider, _bridge, mut outbound) = dispatcher();
        let err = provider
            .request(RequestArguments::new(
                "personal_sign",
                json!(["0x68656c6c6f", ACCOUNT]),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::Unauthorized(_)));
        assert!(outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn add_chain_validates_required_fields() {
        let (provider, _bridge, _outbound) = dispatcher();
        let err = provider
            .request(RequestArguments::new(
                "wallet_addEthereumChain",
                json!([{ "chainId": "0x1", "chainName": "Ethereum", "rpcUrls": [],
                         "nativeCurrency": { "symbol": "ETH" } }]),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::InvalidParams(_)));
    }

    #[tokio::test]
    async fn bridge_loss_marks_provider_disconnected() {
        let (provider, _bridge, outbound) = dispatcher();
        drop(outbound);
        let err = provider
            .request(RequestArguments::without_params("eth_chainId"))
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::BridgeError(_)));
        assert!(!provider.is_connected());
    }
}
