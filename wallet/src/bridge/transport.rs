use async_trait::async_trait;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::errors::{WalletError, WalletResult};

/// One direction of the privilege boundary. Messages are serialized JSON;
/// nothing else crosses.
#[async_trait]
pub trait BridgeTransport: Send + Sync {
    async fn post(&self, message: String) -> WalletResult<()>;
}

/// In-process transport over an unbounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    sender: UnboundedSender<String>,
}

impl ChannelTransport {
    pub fn new(sender: UnboundedSender<String>) -> Self {
        Self { sender }
    }

    pub fn pair() -> (Self, UnboundedReceiver<String>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self::new(sender), receiver)
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

#[async_trait]
impl BridgeTransport for ChannelTransport {
    async fn post(&self, message: String) -> WalletResult<()> {
        self.sender
            .send(message)
            .map_err(|_| WalletError::BridgeError("peer context is gone".to_string()))
    }
}

/// The trusted side of an in-process connection: requests arrive on
/// `inbound`, responses leave through `outbound`.
#[derive(Debug)]
pub struct BridgeEndpoint {
    pub inbound: UnboundedReceiver<String>,
    pub outbound: ChannelTransport,
}
