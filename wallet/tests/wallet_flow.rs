use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dywallet_lib::errors::codes;
use dywallet_lib::{
    ApprovalDecision, ApprovalKind, ApprovalPrompter, ApprovalRequest, ProviderEvent,
    RequestArguments, WalletContext, WalletError, WalletResult,
};
use parking_lot::Mutex;
use secrecy::SecretString;
use serde_json::{json, Value};
use tempfile::TempDir;

const ORIGIN: &str = "https://app.example";

#[derive(Default)]
struct ScriptedPrompter {
    reject: AtomicBool,
    prompts: Mutex<Vec<ApprovalKind>>,
}

impl ScriptedPrompter {
    fn count(&self, kind: ApprovalKind) -> usize {
        self.prompts.lock().iter().filter(|seen| **seen == kind).count()
    }
}

#[async_trait]
impl ApprovalPrompter for ScriptedPrompter {
    async fn prompt(&self, request: ApprovalRequest) -> ApprovalDecision {
        assert_eq!(request.origin, ORIGIN);
        self.prompts.lock().push(request.kind);
        if self.reject.load(Ordering::SeqCst) {
            ApprovalDecision::Rejected
        } else {
            ApprovalDecision::Approved
        }
    }
}

fn password(value: &str) -> SecretString {
    SecretString::from(value.to_string())
}

fn context(dir: &TempDir, prompter: Arc<ScriptedPrompter>) -> WalletResult<WalletContext> {
    std::env::set_var("DYWALLET_ENV", "test");
    WalletContext::initialize(dir.path().to_path_buf(), prompter)
}

#[test]
fn create_wallet_and_check_password() -> WalletResult<()> {
    let temp_dir = TempDir::new().expect("create temp dir");
    let context = context(&temp_dir, Arc::new(ScriptedPrompter::default()))?;
    let vault = context.vault();

    let created = vault.create_wallet(&password("correct-password-1"))?;
    assert_eq!(created.mnemonic.word_count(), 12);
    let address = created.account.address.to_string();
    assert!(address.starts_with("0x"));
    assert_eq!(address.len(), 42);
    assert!(address[2..].chars().all(|c| c.is_ascii_hexdigit()));

    assert!(vault.is_valid_password(&password("correct-password-1")));
    assert!(!vault.is_valid_password(&password("wrong")));
    Ok(())
}

#[test]
fn invalid_mnemonic_is_rejected() -> WalletResult<()> {
    let temp_dir = TempDir::new().expect("create temp dir");
    let context = context(&temp_dir, Arc::new(ScriptedPrompter::default()))?;

    let err = context
        .vault()
        .import_wallet(
            "invalid mnemonic words here that are not in any list ok",
            &password("pw12345678"),
        )
        .expect_err("expected invalid mnemonic");
    assert_eq!(err, WalletError::InvalidMnemonic);
    assert!(!context.vault().is_initialized());
    Ok(())
}

#[test]
fn restart_comes_up_locked() -> WalletResult<()> {
    let temp_dir = TempDir::new().expect("create temp dir");
    let address = {
        let context = context(&temp_dir, Arc::new(ScriptedPrompter::default()))?;
        context
            .vault()
            .create_wallet(&password("correct-password-1"))?
            .account
            .address
    };

    let reopened = context(&temp_dir, Arc::new(ScriptedPrompter::default()))?;
    let vault = reopened.vault();
    assert!(vault.is_initialized());
    assert!(vault.is_locked());
    assert_eq!(vault.current_address(), Some(address));

    vault.unlock(&password("correct-password-1"))?;
    assert!(!vault.is_locked());
    Ok(())
}

#[tokio::test]
async fn accounts_follow_approval_without_reprompt() -> WalletResult<()> {
    let temp_dir = TempDir::new().expect("create temp dir");
    let prompter = Arc::new(ScriptedPrompter::default());
    let context = context(&temp_dir, Arc::clone(&prompter))?;
    let account = context
        .vault()
        .create_wallet(&password("correct-password-1"))?
        .account;

    let provider = context.connect_provider(ORIGIN);
    let before = provider
        .request(RequestArguments::without_params("eth_accounts"))
        .await?;
    assert_eq!(before, json!([]));

    let first = provider
        .request(RequestArguments::without_params("eth_requestAccounts"))
        .await?;
    assert_eq!(first, json!([account.address]));
    let after = provider
        .request(RequestArguments::without_params("eth_accounts"))
        .await?;
    assert_eq!(after, first);

    // A fresh page for the same origin is answered from the stored grant.
    let second_page = context.connect_provider(ORIGIN);
    let reloaded = second_page
        .request(RequestArguments::without_params("eth_accounts"))
        .await?;
    assert_eq!(reloaded, first);
    assert_eq!(second_page.selected_address(), Some(account.address));

    let second = second_page
        .request(RequestArguments::without_params("eth_requestAccounts"))
        .await?;
    assert_eq!(second, first);
    assert_eq!(prompter.count(ApprovalKind::Connect), 1);
    Ok(())
}

#[tokio::test]
async fn switching_to_unknown_chain_then_adding_it() -> WalletResult<()> {
    let temp_dir = TempDir::new().expect("create temp dir");
    let prompter = Arc::new(ScriptedPrompter::default());
    let context = context(&temp_dir, Arc::clone(&prompter))?;
    context
        .vault()
        .create_wallet(&password("correct-password-1"))?;

    let stranger = context.connect_provider("https://other.example");
    let err = stranger
        .request(RequestArguments::new(
            "wallet_switchEthereumChain",
            json!([{ "chainId": "0xaa36a7" }]),
        ))
        .await
        .expect_err("unconnected origins cannot switch chains");
    assert!(matches!(err, WalletError::Unauthorized(_)));

    let provider = context.connect_provider(ORIGIN);
    provider
        .request(RequestArguments::without_params("eth_requestAccounts"))
        .await?;
    let changes = Arc::new(Mutex::new(Vec::<Value>::new()));
    let sink = Arc::clone(&changes);
    provider.on(ProviderEvent::ChainChanged, move |payload| {
        sink.lock().push(payload.clone())
    });

    let switch = RequestArguments::new("wallet_switchEthereumChain", json!([{ "chainId": "0x1" }]));
    let err = provider
        .request(switch.clone())
        .await
        .expect_err("chain 1 is not registered");
    assert!(matches!(err, WalletError::NetworkNotFound(_)));

    provider
        .request(RequestArguments::new(
            "wallet_addEthereumChain",
            json!([{
                "chainId": "0x1",
                "chainName": "Ethereum Mainnet",
                "rpcUrls": ["https://eth.llamarpc.com"],
                "nativeCurrency": { "name": "Ether", "symbol": "ETH", "decimals": 18 },
                "blockExplorerUrls": ["https://etherscan.io"]
            }]),
        ))
        .await?;
    assert_eq!(prompter.count(ApprovalKind::AddChain), 1);

    let result = provider.request(switch).await?;
    assert_eq!(result, Value::Null);
    assert_eq!(changes.lock().as_slice(), &[json!("0x1")]);
    assert_eq!(provider.chain_id().as_deref(), Some("0x1"));
    assert_eq!(context.vault().current_network()?.chain_id, 1);
    Ok(())
}

#[tokio::test]
async fn rejected_connection_surfaces_user_rejected() -> WalletResult<()> {
    let temp_dir = TempDir::new().expect("create temp dir");
    let prompter = Arc::new(ScriptedPrompter::default());
    prompter.reject.store(true, Ordering::SeqCst);
    let context = context(&temp_dir, Arc::clone(&prompter))?;
    context
        .vault()
        .create_wallet(&password("correct-password-1"))?;

    let provider = context.connect_provider(ORIGIN);
    let err = provider
        .request_rpc(RequestArguments::without_params("eth_requestAccounts"))
        .await
        .expect_err("user rejected");
    assert_eq!(err.code, codes::USER_REJECTED);
    assert!(context.vault().permitted_accounts(ORIGIN).is_empty());
    Ok(())
}

#[tokio::test]
async fn signing_after_lock_fails() -> WalletResult<()> {
    let temp_dir = TempDir::new().expect("create temp dir");
    let prompter = Arc::new(ScriptedPrompter::default());
    let context = context(&temp_dir, Arc::clone(&prompter))?;
    let vault = context.vault();
    let account = vault.create_wallet(&password("correct-password-1"))?.account;

    let provider = context.connect_provider(ORIGIN);
    provider
        .request(RequestArguments::without_params("eth_requestAccounts"))
        .await?;

    let sign = RequestArguments::new(
        "personal_sign",
        json!(["0x68656c6c6f", account.address]),
    );
    let signature = provider.request(sign.clone()).await?;
    let signature = signature.as_str().expect("hex signature");
    assert!(signature.starts_with("0x"));
    assert_eq!(signature.len(), 2 + 130);

    vault.lock()?;
    assert!(matches!(
        vault.sign_message(&account.address, b"hello"),
        Err(WalletError::Locked)
    ));

    let prompts_before = prompter.count(ApprovalKind::SignMessage);
    let err = provider
        .request_rpc(sign)
        .await
        .expect_err("locked wallet cannot sign");
    assert_eq!(err.code, codes::UNAUTHORIZED);
    assert_eq!(prompter.count(ApprovalKind::SignMessage), prompts_before);
    Ok(())
}

#[tokio::test]
async fn connect_reports_active_chain() -> WalletResult<()> {
    let temp_dir = TempDir::new().expect("create temp dir");
    let prompter = Arc::new(ScriptedPrompter::default());
    let context = context(&temp_dir, Arc::clone(&prompter))?;
    context
        .vault()
        .create_wallet(&password("correct-password-1"))?;
    let provider = context.connect_provider(ORIGIN);

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    provider.on(ProviderEvent::Connect, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let chain_changes = Arc::new(AtomicUsize::new(0));
    let chain_counter = Arc::clone(&chain_changes);
    provider.on(ProviderEvent::ChainChanged, move |_| {
        chain_counter.fetch_add(1, Ordering::SeqCst);
    });

    let chain_id = provider.connect().await?;
    assert_eq!(chain_id, "0xaa36a7");
    assert!(provider.is_connected());
    assert_eq!(provider.network_version().as_deref(), Some("11155111"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let again = provider
        .request(RequestArguments::without_params("eth_chainId"))
        .await?;
    assert_eq!(again, json!("0xaa36a7"));
    assert_eq!(chain_changes.load(Ordering::SeqCst), 0);
    assert!(prompter.prompts.lock().is_empty());
    Ok(())
}
