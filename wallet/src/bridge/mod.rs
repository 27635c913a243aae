//! Page-side half of the cross-context relay. Each call gets an unguessable
//! request id and a waiter; responses are matched by id and type only, never
//! by arrival order.
pub mod message;
pub mod transport;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::errors::{WalletError, WalletResult};

pub use message::{BridgeRequest, BridgeResponse, MessageType};
pub use transport::{BridgeEndpoint, BridgeTransport, ChannelTransport};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

struct Waiter {
    kind: MessageType,
    sender: oneshot::Sender<BridgeResponse>,
}

type WaiterMap = Arc<Mutex<HashMap<String, Waiter>>>;

/// Removes the waiter however the call ends, including when the caller
/// drops the future.
struct WaiterGuard {
    waiters: WaiterMap,
    request_id: String,
}

impl Drop for WaiterGuard {
    fn drop(&mut self) {
        self.waiters.lock().remove(&self.request_id);
    }
}

pub struct RequestBridge {
    origin: String,
    transport: Arc<dyn BridgeTransport>,
    waiters: WaiterMap,
    timeout: Duration,
}

impl RequestBridge {
    pub fn new(
        origin: impl Into<String>,
        transport: Arc<dyn BridgeTransport>,
        timeout: Duration,
    ) -> Self {
        Self {
            origin: origin.into(),
            transport,
            waiters: Arc::new(Mutex::new(HashMap::new())),
            timeout,
        }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Number of calls still waiting for a response.
    pub fn pending(&self) -> usize {
        self.waiters.lock().len()
    }

    /// Send `payload` as a `kind` request and wait for its response.
    ///
    /// Fails with `SerializationError` before anything is sent if the payload
    /// is not plain data, `BridgeError` if the transport fails or the peer
    /// goes away, and `Timeout` once the configured window passes.
    pub async fn send<T>(&self, kind: MessageType, payload: &T) -> WalletResult<Value>
    where
        T: Serialize + ?Sized,
    {
        let data = serde_json::to_value(payload).map_err(|e| {
            WalletError::SerializationError(format!("{} payload is not plain data: {}", kind, e))
        })?;
        let request = BridgeRequest {
            kind: kind.as_str().to_string(),
            data,
            request_id: Uuid::new_v4().to_string(),
            origin: self.origin.clone(),
        };
        let encoded = serde_json::to_string(&request)?;

        let (sender, receiver) = oneshot::channel();
        self.waiters
            .lock()
            .insert(request.request_id.clone(), Waiter { kind, sender });
        let _guard = WaiterGuard {
            waiters: Arc::clone(&self.waiters),
            request_id: request.request_id.clone(),
        };

        log::debug!("bridge request {} {}", kind, request.request_id);
        self.transport.post(encoded).await.map_err(|err| match err {
            WalletError::BridgeError(_) => err,
            other => WalletError::BridgeError(other.to_string()),
        })?;

        match tokio::time::timeout(self.timeout, receiver).await {
            Ok(Ok(response)) => response.into_result(),
            Ok(Err(_)) => Err(WalletError::BridgeError(
                "bridge closed before a response arrived".to_string(),
            )),
            Err(_) => {
                log::warn!(
                    "bridge request {} {} timed out after {:?}",
                    kind,
                    request.request_id,
                    self.timeout
                );
                Err(WalletError::Timeout)
            }
        }
    }

    /// Decode and route one raw inbound message. Returns whether a waiter
    /// took it.
    pub fn deliver(&self, raw: &str) -> bool {
        match serde_json::from_str::<BridgeResponse>(raw) {
            Ok(response) => self.deliver_response(response),
            Err(err) => {
                log::debug!("dropping undecodable bridge message: {}", err);
                false
            }
        }
    }

    /// Unmatched, duplicate and late responses are dropped.
    pub fn deliver_response(&self, response: BridgeResponse) -> bool {
        let waiter = {
            let mut waiters = self.waiters.lock();
            let expected = waiters
                .get(&response.request_id)
                .map(|waiter| waiter.kind.response_type() == response.kind)
                .unwrap_or(false);
            if expected {
                waiters.remove(&response.request_id)
            } else {
                None
            }
        };

        match waiter {
            Some(waiter) => {
                let request_id = response.request_id.clone();
                if waiter.sender.send(response).is_err() {
                    log::debug!("caller for {} went away before delivery", request_id);
                    return false;
                }
                true
            }
            None => {
                log::debug!(
                    "dropping unmatched bridge response {} {}",
                    response.kind,
                    response.request_id
                );
                false
            }
        }
    }

    /// Fail every outstanding call with `BridgeError`.
    pub fn fail_pending(&self) -> usize {
        let drained: Vec<_> = self.waiters.lock().drain().collect();
        if !drained.is_empty() {
            log::warn!("bridge closed with {} pending request(s)", drained.len());
        }
        drained.len()
    }

    /// Pump inbound messages into this bridge until the peer closes.
    pub fn spawn_receiver(self: &Arc<Self>, mut inbound: UnboundedReceiver<String>) -> JoinHandle<()> {
        let bridge = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(raw) = inbound.recv().await {
                bridge.deliver(&raw);
            }
            bridge.fail_pending();
        })
    }
}

impl std::fmt::Debug for RequestBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestBridge")
            .field("origin", &self.origin)
            .field("pending", &self.pending())
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Wire a page-side bridge to a trusted endpoint over in-process channels.
/// Must be called within a Tokio runtime.
pub fn connect_in_process(
    origin: impl Into<String>,
    timeout: Duration,
) -> (Arc<RequestBridge>, BridgeEndpoint) {
    let (to_host, host_inbound) = ChannelTransport::pair();
    let (to_page, page_inbound) = ChannelTransport::pair();

    let bridge = Arc::new(RequestBridge::new(origin, Arc::new(to_host), timeout));
    bridge.spawn_receiver(page_inbound);

    let endpoint = BridgeEndpoint {
        inbound: host_inbound,
        outbound: to_page,
    };
    (bridge, endpoint)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap as StdHashMap;

    fn bridge_with_timeout(timeout: Duration) -> (Arc<RequestBridge>, UnboundedReceiver<String>) {
        let (transport, outbound) = ChannelTransport::pair();
        let bridge = Arc::new(RequestBridge::new(
            "https://app.example",
            Arc::new(transport),
            timeout,
        ));
        (bridge, outbound)
    }

    fn echo(request: &BridgeRequest) -> String {
        let kind = request.message_type().unwrap();
        serde_json::to_string(&BridgeResponse::success(
            kind,
            &request.request_id,
            request.data.clone(),
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn responses_are_matched_by_id_not_order() {
        let (bridge, mut outbound) = bridge_with_timeout(Duration::from_secs(5));

        let first = {
            let bridge = Arc::clone(&bridge);
            tokio::spawn(async move { bridge.send(MessageType::EthSign, &json!({ "n": 1 })).await })
        };
        let second = {
            let bridge = Arc::clone(&bridge);
            tokio::spawn(async move { bridge.send(MessageType::EthSign, &json!({ "n": 2 })).await })
        };

        let a: BridgeRequest = serde_json::from_str(&outbound.recv().await.unwrap()).unwrap();
        let b: BridgeRequest = serde_json::from_str(&outbound.recv().await.unwrap()).unwrap();
        assert_ne!(a.request_id, b.request_id);
        assert_eq!(a.origin, "https://app.example");

        assert!(bridge.deliver(&echo(&b)));
        assert!(bridge.deliver(&echo(&a)));

        assert_eq!(first.await.unwrap().unwrap(), json!({ "n": 1 }));
        assert_eq!(second.await.unwrap().unwrap(), json!({ "n": 2 }));
        assert_eq!(bridge.pending(), 0);
    }

    #[tokio::test]
    async fn duplicate_and_unknown_responses_are_dropped() {
        let (bridge, mut outbound) = bridge_with_timeout(Duration::from_secs(5));
        let call = {
            let bridge = Arc::clone(&bridge);
            tokio::spawn(async move { bridge.send(MessageType::GetWalletState, &json!({})).await })
        };

        let request: BridgeRequest =
            serde_json::from_str(&outbound.recv().await.unwrap()).unwrap();
        let wrong_type = serde_json::to_string(&BridgeResponse::success(
            MessageType::EthSign,
            &request.request_id,
            json!(null),
        ))
        .unwrap();
        assert!(!bridge.deliver(&wrong_type));
        assert!(!bridge.deliver("not json"));

        assert!(bridge.deliver(&echo(&request)));
        assert!(!bridge.deliver(&echo(&request)));
        call.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn silent_peer_times_out() {
        let (bridge, _outbound) = bridge_with_timeout(Duration::from_millis(50));
        let err = bridge
            .send(MessageType::EthRequestAccounts, &json!({}))
            .await
            .unwrap_err();
        assert_eq!(err, WalletError::Timeout);
        assert_eq!(bridge.pending(), 0);
    }

    #[tokio::test]
    async fn transport_failure_rejects_waiter() {
        let (bridge, outbound) = bridge_with_timeout(Duration::from_secs(5));
        drop(outbound);
        let err = bridge
            .send(MessageType::EthSign, &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::BridgeError(_)));
        assert_eq!(bridge.pending(), 0);
    }

    #[tokio::test]
    async fn non_plain_payload_fails_before_sending() {
        let (bridge, mut outbound) = bridge_with_timeout(Duration::from_secs(5));
        let mut payload: StdHashMap<Vec<u8>, u8> = StdHashMap::new();
        payload.insert(vec![1, 2], 3);

        let err = bridge
            .send(MessageType::EthSign, &payload)
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::SerializationError(_)));
        assert!(outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn abandoned_call_releases_its_waiter() {
        let (bridge, _outbound) = bridge_with_timeout(Duration::from_secs(30));
        let abandoned = tokio::time::timeout(
            Duration::from_millis(20),
            bridge.send(MessageType::EthSign, &json!({})),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(bridge.pending(), 0);
    }

    #[tokio::test]
    async fn closed_peer_fails_pending_calls() {
        let (bridge, endpoint) = connect_in_process("https://app.example", Duration::from_secs(5));
        let call = {
            let bridge = Arc::clone(&bridge);
            tokio::spawn(async move { bridge.send(MessageType::EthSign, &json!({})).await })
        };

        let BridgeEndpoint { mut inbound, outbound } = endpoint;
        inbound.recv().await.unwrap();
        drop(outbound);

        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, WalletError::BridgeError(_)));
    }
}
