use serde::{Deserialize, Serialize};
use std::fmt;

/// EIP-1193 provider error codes.
pub mod codes {
    pub const USER_REJECTED: i64 = 4001;
    pub const UNAUTHORIZED: i64 = 4100;
    pub const UNSUPPORTED_METHOD: i64 = 4200;
    pub const DISCONNECTED: i64 = 4900;
    pub const UNRECOGNIZED_CHAIN: i64 = 4902;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL: i64 = -32603;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalletError {
    // Key material errors
    InvalidMnemonic,
    InvalidKey(String),
    WrongPassword,
    Locked,
    DecryptionFailed,
    CryptoError(String),
    RateLimited(u64),

    // Provider surface errors
    UnsupportedMethod(String),
    UnsupportedAssetType(String),
    InvalidParams(String),
    Unauthorized(String),
    UserRejected,

    // Network errors
    NetworkNotFound(String),
    ChainError(String),

    // Bridge errors
    SerializationError(String),
    BridgeError(String),
    Timeout,

    // Storage errors
    StorageError(String),

    // Validation errors
    ValidationError(String),
    InvalidAddress(String),
    DuplicateToken(String),

    // Application errors
    NotInitialized,
    AlreadyExists(String),
    NotFound(String),
    Internal(String),
}

impl fmt::Display for WalletError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            WalletError::InvalidMnemonic => write!(f, "Invalid mnemonic phrase"),
            WalletError::InvalidKey(msg) => write!(f, "Invalid key: {}", msg),
            WalletError::WrongPassword => write!(f, "Invalid password"),
            WalletError::Locked => write!(f, "Wallet is locked"),
            WalletError::DecryptionFailed => write!(f, "Decryption failed"),
            WalletError::CryptoError(msg) => write!(f, "Cryptographic error: {}", msg),
            WalletError::RateLimited(ms) => {
                write!(f, "Unlock temporarily disabled. Retry in {} ms", ms)
            }

            WalletError::UnsupportedMethod(method) => write!(f, "Unsupported method: {}", method),
            WalletError::UnsupportedAssetType(kind) => {
                write!(f, "Unsupported asset type: {}", kind)
            }
            WalletError::InvalidParams(msg) => write!(f, "Invalid params: {}", msg),
            WalletError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            WalletError::UserRejected => write!(f, "User rejected the request"),

            WalletError::NetworkNotFound(chain) => write!(f, "Network not found: {}", chain),
            WalletError::ChainError(msg) => write!(f, "Chain provider error: {}", msg),

            WalletError::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            WalletError::BridgeError(msg) => write!(f, "Bridge error: {}", msg),
            WalletError::Timeout => write!(f, "Request timed out"),

            WalletError::StorageError(msg) => write!(f, "Storage error: {}", msg),

            WalletError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            WalletError::InvalidAddress(msg) => write!(f, "Invalid address: {}", msg),
            WalletError::DuplicateToken(address) => write!(f, "Token already added: {}", address),

            WalletError::NotInitialized => write!(f, "Wallet not initialized"),
            WalletError::AlreadyExists(msg) => write!(f, "Already exists: {}", msg),
            WalletError::NotFound(msg) => write!(f, "Not found: {}", msg),
            WalletError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for WalletError {}

pub type WalletResult<T> = Result<T, WalletError>;

impl WalletError {
    /// Provider error code reported to the page for this error.
    pub fn code(&self) -> i64 {
        match self {
            WalletError::UserRejected => codes::USER_REJECTED,
            WalletError::Unauthorized(_) | WalletError::Locked => codes::UNAUTHORIZED,
            WalletError::UnsupportedMethod(_) => codes::UNSUPPORTED_METHOD,
            WalletError::BridgeError(_) => codes::DISCONNECTED,
            WalletError::NetworkNotFound(_) => codes::UNRECOGNIZED_CHAIN,
            WalletError::InvalidParams(_)
            | WalletError::UnsupportedAssetType(_)
            | WalletError::InvalidAddress(_)
            | WalletError::ValidationError(_)
            | WalletError::DuplicateToken(_)
            | WalletError::SerializationError(_) => codes::INVALID_PARAMS,
            _ => codes::INTERNAL,
        }
    }

    /// Convert into the error shape exposed to untrusted pages.
    ///
    /// Vault-internal failures collapse into one generic message so a page
    /// cannot learn account or password state through error text.
    pub fn to_rpc_error(&self) -> ProviderRpcError {
        let message = match self {
            WalletError::UserRejected
            | WalletError::UnsupportedMethod(_)
            | WalletError::UnsupportedAssetType(_)
            | WalletError::InvalidParams(_)
            | WalletError::InvalidAddress(_)
            | WalletError::ValidationError(_)
            | WalletError::DuplicateToken(_)
            | WalletError::SerializationError(_)
            | WalletError::NetworkNotFound(_)
            | WalletError::ChainError(_)
            | WalletError::BridgeError(_)
            | WalletError::Timeout => self.to_string(),
            WalletError::Unauthorized(_) | WalletError::Locked => {
                "The requested account and/or method has not been authorized by the user"
                    .to_string()
            }
            _ => "Internal error".to_string(),
        };

        ProviderRpcError {
            code: self.code(),
            message,
        }
    }
}

/// Structured error that crosses the page/extension boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderRpcError {
    pub code: i64,
    pub message: String,
}

impl ProviderRpcError {
    /// Rebuild a wallet error on the page side from a reported code.
    pub fn into_wallet_error(self) -> WalletError {
        match self.code {
            codes::USER_REJECTED => WalletError::UserRejected,
            codes::UNAUTHORIZED => WalletError::Unauthorized(self.message),
            codes::UNSUPPORTED_METHOD => WalletError::UnsupportedMethod(self.message),
            codes::DISCONNECTED => WalletError::BridgeError(self.message),
            codes::UNRECOGNIZED_CHAIN => WalletError::NetworkNotFound(self.message),
            codes::INVALID_PARAMS => WalletError::InvalidParams(self.message),
            _ => WalletError::Internal(self.message),
        }
    }
}

impl fmt::Display for ProviderRpcError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

// Conversion helpers
impl From<std::io::Error> for WalletError {
    fn from(error: std::io::Error) -> Self {
        match error.kind() {
            std::io::ErrorKind::NotFound => WalletError::NotFound(error.to_string()),
            _ => WalletError::StorageError(error.to_string()),
        }
    }
}

impl From<serde_json::Error> for WalletError {
    fn from(error: serde_json::Error) -> Self {
        WalletError::SerializationError(format!("JSON error: {}", error))
    }
}
