pub mod paths;
pub mod state_store;

pub use paths::WalletPaths;
pub use state_store::{StateStore, STATE_SCHEMA_VERSION};
