use crate::bridge::MessageType;
use crate::errors::{WalletError, WalletResult};

/// Every method the provider answers. Adding one means extending the
/// dispatcher's match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderMethod {
    RequestAccounts,
    Accounts,
    ChainId,
    NetVersion,
    WatchAsset,
    AddEthereumChain,
    SwitchEthereumChain,
    SendTransaction,
    EthSign,
    PersonalSign,
    SignTypedData,
    SignTypedDataV3,
    SignTypedDataV4,
}

impl ProviderMethod {
    pub const ALL: [ProviderMethod; 13] = [
        ProviderMethod::RequestAccounts,
        ProviderMethod::Accounts,
        ProviderMethod::ChainId,
        ProviderMethod::NetVersion,
        ProviderMethod::WatchAsset,
        ProviderMethod::AddEthereumChain,
        ProviderMethod::SwitchEthereumChain,
        ProviderMethod::SendTransaction,
        ProviderMethod::EthSign,
        ProviderMethod::PersonalSign,
        ProviderMethod::SignTypedData,
        ProviderMethod::SignTypedDataV3,
        ProviderMethod::SignTypedDataV4,
    ];

    pub fn parse(method: &str) -> WalletResult<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|candidate| candidate.as_str() == method)
            .ok_or_else(|| WalletError::UnsupportedMethod(method.to_string()))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderMethod::RequestAccounts => "eth_requestAccounts",
            ProviderMethod::Accounts => "eth_accounts",
            ProviderMethod::ChainId => "eth_chainId",
            ProviderMethod::NetVersion => "net_version",
            ProviderMethod::WatchAsset => "wallet_watchAsset",
            ProviderMethod::AddEthereumChain => "wallet_addEthereumChain",
            ProviderMethod::SwitchEthereumChain => "wallet_switchEthereumChain",
            ProviderMethod::SendTransaction => "eth_sendTransaction",
            ProviderMethod::EthSign => "eth_sign",
            ProviderMethod::PersonalSign => "personal_sign",
            ProviderMethod::SignTypedData => "eth_signTypedData",
            ProviderMethod::SignTypedDataV3 => "eth_signTypedData_v3",
            ProviderMethod::SignTypedDataV4 => "eth_signTypedData_v4",
        }
    }

    /// The bridge message a method travels as. `eth_accounts` never leaves
    /// the page.
    pub fn message_type(&self) -> Option<MessageType> {
        match self {
            ProviderMethod::Accounts => None,
            ProviderMethod::RequestAccounts => Some(MessageType::EthRequestAccounts),
            ProviderMethod::ChainId | ProviderMethod::NetVersion => {
                Some(MessageType::GetWalletState)
            }
            ProviderMethod::WatchAsset => Some(MessageType::WalletWatchAsset),
            ProviderMethod::AddEthereumChain => Some(MessageType::WalletAddEthereumChain),
            ProviderMethod::SwitchEthereumChain => Some(MessageType::WalletSwitchEthereumChain),
            ProviderMethod::SendTransaction => Some(MessageType::EthSendTransaction),
            ProviderMethod::EthSign | ProviderMethod::PersonalSign => Some(MessageType::EthSign),
            ProviderMethod::SignTypedData
            | ProviderMethod::SignTypedDataV3
            | ProviderMethod::SignTypedDataV4 => Some(MessageType::EthSignTypedData),
        }
    }
}
