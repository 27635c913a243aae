//! Wire format for page ↔ extension messages.
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{codes, ProviderRpcError, WalletError, WalletResult};

const RESPONSE_SUFFIX: &str = "_RESPONSE";

/// Privileged operations the trusted context answers. Anything else on the
/// wire is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    GetWalletState,
    EthRequestAccounts,
    WalletWatchAsset,
    WalletAddEthereumChain,
    WalletSwitchEthereumChain,
    EthSendTransaction,
    EthSign,
    EthSignTypedData,
}

impl MessageType {
    pub const ALL: [MessageType; 8] = [
        MessageType::GetWalletState,
        MessageType::EthRequestAccounts,
        MessageType::WalletWatchAsset,
        MessageType::WalletAddEthereumChain,
        MessageType::WalletSwitchEthereumChain,
        MessageType::EthSendTransaction,
        MessageType::EthSign,
        MessageType::EthSignTypedData,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::GetWalletState => "GET_WALLET_STATE",
            MessageType::EthRequestAccounts => "ETH_REQUEST_ACCOUNTS",
            MessageType::WalletWatchAsset => "WALLET_WATCH_ASSET",
            MessageType::WalletAddEthereumChain => "WALLET_ADD_ETHEREUM_CHAIN",
            MessageType::WalletSwitchEthereumChain => "WALLET_SWITCH_ETHEREUM_CHAIN",
            MessageType::EthSendTransaction => "ETH_SEND_TRANSACTION",
            MessageType::EthSign => "ETH_SIGN",
            MessageType::EthSignTypedData => "ETH_SIGN_TYPED_DATA",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.as_str() == value)
    }

    pub fn response_type(&self) -> String {
        format!("{}{}", self.as_str(), RESPONSE_SUFFIX)
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outbound: page → trusted context. `kind` stays a plain string so an
/// unregistered type still decodes and can be ignored by the receiver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeRequest {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
    pub request_id: String,
    #[serde(default)]
    pub origin: String,
}

impl BridgeRequest {
    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::parse(&self.kind)
    }
}

/// Inbound: trusted context → page, correlated by `request_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeResponse {
    #[serde(rename = "type")]
    pub kind: String,
    pub request_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
}

impl BridgeResponse {
    pub fn success(kind: MessageType, request_id: &str, data: Value) -> Self {
        Self {
            kind: kind.response_type(),
            request_id: request_id.to_string(),
            success: true,
            data: Some(data),
            error: None,
            code: None,
        }
    }

    /// Errors never cross the boundary as anything but `{error, code}`.
    pub fn failure(kind: MessageType, request_id: &str, error: &WalletError) -> Self {
        let rpc = error.to_rpc_error();
        Self {
            kind: kind.response_type(),
            request_id: request_id.to_string(),
            success: false,
            data: None,
            error: Some(rpc.message),
            code: Some(rpc.code),
        }
    }

    pub fn into_result(self) -> WalletResult<Value> {
        if self.success {
            return Ok(self.data.unwrap_or(Value::Null));
        }
        let rpc = ProviderRpcError {
            code: self.code.unwrap_or(codes::INTERNAL),
            message: self.error.unwrap_or_else(|| "Unknown error".to_string()),
        };
        Err(rpc.into_wallet_error())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn registry_round_trips_names() {
        for kind in MessageType::ALL {
            assert_eq!(MessageType::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(MessageType::parse("OPEN_POPUP"), None);
        assert_eq!(
            MessageType::EthSign.response_type(),
            "ETH_SIGN_RESPONSE"
        );
    }

    #[test]
    fn request_uses_page_field_names() {
        let raw = json!({
            "type": "ETH_SIGN",
            "data": { "method": "personal_sign", "params": ["0x68656c6c6f"] },
            "requestId": "abc",
            "origin": "https://app.example"
        });
        let request: BridgeRequest = serde_json::from_value(raw).unwrap();
        assert_eq!(request.message_type(), Some(MessageType::EthSign));
        assert_eq!(request.request_id, "abc");
    }

    #[test]
    fn unknown_types_still_decode() {
        let raw = json!({ "type": "SOMETHING_ELSE", "requestId": "1" });
        let request: BridgeRequest = serde_json::from_value(raw).unwrap();
        assert_eq!(request.message_type(), None);
    }

    #[test]
    fn rejection_is_recognizable_after_crossing() {
        let response =
            BridgeResponse::failure(MessageType::EthSign, "7", &WalletError::UserRejected);
        assert_eq!(response.kind, "ETH_SIGN_RESPONSE");
        assert_eq!(response.code, Some(codes::USER_REJECTED));

        let encoded = serde_json::to_string(&response).unwrap();
        let decoded: BridgeResponse = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.into_result().unwrap_err(), WalletError::UserRejected);
    }

    #[test]
    fn success_without_data_is_null() {
        let mut response = BridgeResponse::success(MessageType::WalletAddEthereumChain, "9", Value::Null);
        response.data = None;
        assert_eq!(response.into_result().unwrap(), Value::Null);
    }
}
