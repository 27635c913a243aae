use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::background::{ApprovalPrompter, BackgroundHost};
use crate::bridge::connect_in_process;
use crate::chain_provider::ChainProvider;
use crate::config_store::{ConfigStore, Environment, WalletConfig};
use crate::errors::WalletResult;
use crate::provider::ProviderDispatcher;
use crate::secret_codec::SecretCodec;
use crate::session::SessionManager;
use crate::storage::{StateStore, WalletPaths};
use crate::vault::WalletVault;

/// Everything the trusted side needs, wired from one data directory.
pub struct WalletContext {
    paths: WalletPaths,
    config_store: ConfigStore,
    config: RwLock<WalletConfig>,
    environment: Environment,
    vault: Arc<WalletVault>,
    host: Arc<BackgroundHost>,
}

impl WalletContext {
    pub fn initialize(
        root_dir: PathBuf,
        prompter: Arc<dyn ApprovalPrompter>,
    ) -> WalletResult<Self> {
        Self::build(root_dir, prompter, None)
    }

    pub fn initialize_with_chain(
        root_dir: PathBuf,
        prompter: Arc<dyn ApprovalPrompter>,
        chain: Arc<dyn ChainProvider>,
    ) -> WalletResult<Self> {
        Self::build(root_dir, prompter, Some(chain))
    }

    fn build(
        root_dir: PathBuf,
        prompter: Arc<dyn ApprovalPrompter>,
        chain: Option<Arc<dyn ChainProvider>>,
    ) -> WalletResult<Self> {
        let environment = Environment::from_env();
        let paths = WalletPaths::new(&root_dir)?;
        paths.ensure_directories()?;

        let config_store = ConfigStore::from_paths(&paths);
        let config = config_store.load_or_default(environment)?;
        let session = SessionManager::from_config(&config.session);
        let codec = SecretCodec::new(config.kdf);

        let mut vault = WalletVault::open(StateStore::new(paths.clone()), codec, session)?;
        if let Some(chain) = chain {
            vault = vault.with_chain_provider(chain);
        }
        let vault = Arc::new(vault);
        let host = Arc::new(BackgroundHost::new(Arc::clone(&vault), prompter));

        log::info!(
            "wallet context ready in {} ({:?})",
            root_dir.display(),
            environment
        );

        Ok(Self {
            paths,
            config_store,
            config: RwLock::new(config),
            environment,
            vault,
            host,
        })
    }

    pub fn vault(&self) -> Arc<WalletVault> {
        Arc::clone(&self.vault)
    }

    pub fn host(&self) -> Arc<BackgroundHost> {
        Arc::clone(&self.host)
    }

    pub fn config(&self) -> WalletConfig {
        self.config.read().clone()
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    pub fn root_dir(&self) -> &Path {
        self.paths.root_dir()
    }

    /// Persist a config change. Session and key-derivation settings apply
    /// from the next start; the bridge timeout applies to providers
    /// connected afterwards.
    pub fn update_config<F>(&self, updater: F) -> WalletResult<WalletConfig>
    where
        F: FnOnce(&mut WalletConfig) -> WalletResult<()>,
    {
        let updated = self.config_store.update(self.environment, updater)?;
        *self.config.write() = updated.clone();
        Ok(updated)
    }

    /// A page-side provider for `origin`, served by this context's host over
    /// an in-process bridge and seeded with the origin's stored grant. Must
    /// be called within a Tokio runtime.
    pub fn connect_provider(&self, origin: &str) -> ProviderDispatcher {
        let timeout = self.config.read().bridge.request_timeout();
        let (bridge, endpoint) = connect_in_process(origin, timeout);
        tokio::spawn(Arc::clone(&self.host).serve(endpoint));

        let granted = self.vault.permitted_accounts(origin);
        log::debug!(
            "provider connected for {} ({} granted account(s))",
            origin,
            granted.len()
        );
        ProviderDispatcher::with_granted_accounts(bridge, granted)
    }
}

impl std::fmt::Debug for WalletContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletContext")
            .field("root_dir", &self.paths.root_dir())
            .field("environment", &self.environment)
            .finish()
    }
}
