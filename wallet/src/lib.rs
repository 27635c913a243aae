// lib.rs - Core library structure for the wallet

pub mod api;
pub mod app_state;
pub mod background;
pub mod bridge;
pub mod chain_provider;
pub mod config_store;
pub mod crypto;
pub mod errors;
pub mod ethereum;
pub mod models;
pub mod provider;
pub mod secret_codec;
pub mod session;
pub mod storage;
pub mod validation;
pub mod vault;

// Re-export common types
pub use api::types::*;
pub use app_state::WalletContext;
pub use background::{ApprovalDecision, ApprovalKind, ApprovalPrompter, ApprovalRequest, BackgroundHost};
pub use bridge::{connect_in_process, BridgeRequest, BridgeResponse, MessageType, RequestBridge};
pub use chain_provider::{ChainProvider, Erc20Metadata};
pub use config_store::{ConfigStore, Environment, KdfConfig, SessionConfig, WalletConfig};
pub use errors::{ProviderRpcError, WalletError, WalletResult};
pub use ethereum::{Address, TransactionRequest, TypedData, TypedDataVersion};
pub use models::{Network, Token, TokenKind};
pub use provider::{ProviderDispatcher, ProviderEvent, RequestArguments};
pub use secret_codec::SecretCodec;
pub use session::SessionManager;
pub use storage::{StateStore, WalletPaths};
pub use validation::InputValidator;
pub use vault::{CreatedWallet, WalletVault};
