use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use blake3::Hasher as Blake3;
use serde::{Deserialize, Serialize};

use super::WalletPaths;
use crate::errors::{WalletError, WalletResult};
use crate::models::PersistedState;

pub const STATE_SCHEMA_VERSION: u16 = 1;
const BACKUPS_TO_KEEP: usize = 5;
const INTEGRITY_FAILURE: &str = "State integrity verification failed";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StateEnvelope {
    schema_version: u16,
    checksum: String,
    payload: PersistedState,
}

/// Reads and writes the single serialized wallet blob. Secrets inside the
/// payload are already ciphertext.
#[derive(Debug, Clone)]
pub struct StateStore {
    paths: WalletPaths,
}

impl StateStore {
    pub fn new(paths: WalletPaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &WalletPaths {
        &self.paths
    }

    pub fn exists(&self) -> bool {
        self.paths.state_file().exists()
    }

    /// `None` when nothing has been written yet.
    pub fn load(&self) -> WalletResult<Option<PersistedState>> {
        let path = self.paths.state_file();
        if !path.exists() {
            return Ok(None);
        }

        let state = read_state(path)?;
        log::debug!("loaded wallet state from {}", path.display());
        Ok(Some(state))
    }

    /// [`load`](Self::load), falling back to the newest intact backup when
    /// the state file is corrupt. An unknown schema version is not
    /// recovered from, since the file may come from a newer build.
    pub fn load_or_recover(&self) -> WalletResult<Option<PersistedState>> {
        let err = match self.load() {
            Ok(state) => return Ok(state),
            Err(err) if is_corruption(&err) => err,
            Err(err) => return Err(err),
        };

        log::warn!("wallet state is unreadable ({}); trying backups", err);
        for backup in self.paths.list_backups()? {
            match read_state(&backup) {
                Ok(state) => {
                    self.paths.restore_state_from_backup(&backup)?;
                    log::warn!("wallet state restored from {}", backup.display());
                    return Ok(Some(state));
                }
                Err(backup_err) => {
                    log::debug!("skipping backup {}: {}", backup.display(), backup_err)
                }
            }
        }
        Err(err)
    }

    pub fn save(&self, state: &PersistedState) -> WalletResult<()> {
        self.paths.ensure_directories()?;
        if self.exists() {
            self.paths.create_state_backup()?;
            self.paths.prune_old_backups(BACKUPS_TO_KEEP)?;
        }

        let envelope = StateEnvelope {
            schema_version: STATE_SCHEMA_VERSION,
            checksum: checksum(state)?,
            payload: state.clone(),
        };
        let serialized = serde_json::to_vec_pretty(&envelope)?;
        write_atomic(self.paths.state_file(), &serialized)
    }
}

fn read_state(path: &Path) -> WalletResult<PersistedState> {
    let bytes = fs::read(path)?;
    let envelope: StateEnvelope = serde_json::from_slice(&bytes)?;
    if envelope.schema_version != STATE_SCHEMA_VERSION {
        return Err(WalletError::ValidationError(format!(
            "Unsupported state schema version {}",
            envelope.schema_version
        )));
    }
    if checksum(&envelope.payload)? != envelope.checksum {
        return Err(WalletError::ValidationError(INTEGRITY_FAILURE.to_string()));
    }
    Ok(envelope.payload)
}

fn is_corruption(err: &WalletError) -> bool {
    match err {
        WalletError::SerializationError(_) => true,
        WalletError::ValidationError(message) => message == INTEGRITY_FAILURE,
        _ => false,
    }
}

fn checksum(state: &PersistedState) -> WalletResult<String> {
    let mut hasher = Blake3::new();
    hasher.update(&serde_json::to_vec(state)?);
    Ok(hasher.finalize().to_hex().to_string())
}

fn write_atomic(path: &Path, bytes: &[u8]) -> WalletResult<()> {
    let tmp_path = path.with_extension("new");
    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        WalletError::StorageError(format!("Failed to replace state file: {}", e))
    })
}
