use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::errors::{WalletError, WalletResult};

/// Filesystem layout of the extension's durable store.
#[derive(Debug, Clone)]
pub struct WalletPaths {
    root_dir: PathBuf,
    state_file: PathBuf,
    backup_dir: PathBuf,
    config_file: PathBuf,
}

impl WalletPaths {
    pub const STATE_FILENAME: &'static str = "wallet.state";
    pub const CONFIG_FILENAME: &'static str = "wallet.config";
    pub const BACKUP_EXTENSION: &'static str = "state.bak";

    pub fn new(root: impl AsRef<Path>) -> WalletResult<Self> {
        let root_dir = root.as_ref().to_path_buf();
        if root_dir.as_os_str().is_empty() {
            return Err(WalletError::StorageError(
                "Wallet root directory cannot be empty".to_string(),
            ));
        }

        Ok(Self {
            state_file: root_dir.join(Self::STATE_FILENAME),
            backup_dir: root_dir.join("backups"),
            config_file: root_dir.join(Self::CONFIG_FILENAME),
            root_dir,
        })
    }

    pub fn ensure_directories(&self) -> WalletResult<()> {
        fs::create_dir_all(&self.root_dir)?;
        fs::create_dir_all(&self.backup_dir)?;
        Ok(())
    }

    pub fn state_file(&self) -> &Path {
        &self.state_file
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    pub fn config_file(&self) -> &Path {
        &self.config_file
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Copy the current state file into the backup directory.
    pub fn create_state_backup(&self) -> WalletResult<PathBuf> {
        if !self.state_file.exists() {
            return Err(WalletError::NotFound(
                "State file does not exist, cannot create backup".to_string(),
            ));
        }

        fs::create_dir_all(&self.backup_dir)?;
        let stamp = Utc::now().format("%Y%m%d_%H%M%S_%6f");
        let target = self
            .backup_dir
            .join(format!("wallet_{}.{}", stamp, Self::BACKUP_EXTENSION));
        fs::copy(&self.state_file, &target)?;

        let expected = fs::metadata(&self.state_file)?.len();
        if fs::metadata(&target)?.len() != expected {
            fs::remove_file(&target)?;
            return Err(WalletError::StorageError(
                "Backup verification failed: size mismatch".to_string(),
            ));
        }

        Ok(target)
    }

    /// Replace the state file with a backup. The previous state is kept
    /// aside until the copy succeeds.
    pub fn restore_state_from_backup(&self, backup: impl AsRef<Path>) -> WalletResult<()> {
        let backup = backup.as_ref();
        if !backup.exists() {
            return Err(WalletError::NotFound(format!(
                "Backup file does not exist: {}",
                backup.display()
            )));
        }

        let aside = if self.state_file.exists() {
            let path = self
                .backup_dir
                .join(format!("wallet_pre_restore_{}.tmp", Utc::now().timestamp()));
            fs::create_dir_all(&self.backup_dir)?;
            fs::copy(&self.state_file, &path)?;
            Some(path)
        } else {
            None
        };

        match fs::copy(backup, &self.state_file) {
            Ok(_) => {
                if let Some(path) = aside {
                    let _ = fs::remove_file(path);
                }
                Ok(())
            }
            Err(err) => {
                if let Some(path) = aside {
                    let _ = fs::copy(&path, &self.state_file);
                    let _ = fs::remove_file(path);
                }
                Err(WalletError::StorageError(format!(
                    "Failed to restore state from backup: {}",
                    err
                )))
            }
        }
    }

    /// Backups, newest first.
    pub fn list_backups(&self) -> WalletResult<Vec<PathBuf>> {
        if !self.backup_dir.exists() {
            return Ok(Vec::new());
        }

        let mut backups: Vec<PathBuf> = fs::read_dir(&self.backup_dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.is_file()
                    && path
                        .file_name()
                        .and_then(|name| name.to_str())
                        .map(|name| name.ends_with(Self::BACKUP_EXTENSION))
                        .unwrap_or(false)
            })
            .collect();

        // Timestamped names sort chronologically.
        backups.sort();
        backups.reverse();
        Ok(backups)
    }

    /// Remove every backup. Used once the live state no longer matches
    /// what older copies were sealed with.
    pub fn purge_backups(&self) -> WalletResult<usize> {
        self.prune_old_backups(0)
    }

    pub fn prune_old_backups(&self, keep: usize) -> WalletResult<usize> {
        let mut removed = 0;
        for path in self.list_backups()?.iter().skip(keep) {
            fs::remove_file(path)?;
            removed += 1;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;

    fn seed_state(paths: &WalletPaths, content: &[u8]) {
        paths.ensure_directories().unwrap();
        fs::write(paths.state_file(), content).unwrap();
    }

    #[test]
    fn layout_is_rooted_at_directory() {
        let temp = TempDir::new().unwrap();
        let paths = WalletPaths::new(temp.path()).unwrap();

        assert_eq!(paths.state_file(), temp.path().join("wallet.state"));
        assert_eq!(paths.backup_dir(), temp.path().join("backups"));
        assert_eq!(paths.config_file(), temp.path().join("wallet.config"));
    }

    #[test]
    fn empty_root_rejected() {
        match WalletPaths::new("") {
            Err(WalletError::StorageError(msg)) => assert!(msg.contains("cannot be empty")),
            other => panic!("expected StorageError, got {:?}", other),
        }
    }

    #[test]
    fn backup_without_state_fails() {
        let temp = TempDir::new().unwrap();
        let paths = WalletPaths::new(temp.path()).unwrap();
        paths.ensure_directories().unwrap();

        assert!(matches!(
            paths.create_state_backup(),
            Err(WalletError::NotFound(_))
        ));
    }

    #[test]
    fn restore_brings_back_previous_contents() {
        let temp = TempDir::new().unwrap();
        let paths = WalletPaths::new(temp.path()).unwrap();
        seed_state(&paths, b"first");

        let backup = paths.create_state_backup().unwrap();
        fs::write(paths.state_file(), b"second").unwrap();
        paths.restore_state_from_backup(&backup).unwrap();

        assert_eq!(fs::read(paths.state_file()).unwrap(), b"first");
    }

    #[test]
    fn prune_keeps_newest() {
        let temp = TempDir::new().unwrap();
        let paths = WalletPaths::new(temp.path()).unwrap();
        seed_state(&paths, b"state");

        let mut created = Vec::new();
        for _ in 0..4 {
            created.push(paths.create_state_backup().unwrap());
            thread::sleep(Duration::from_millis(5));
        }
        fs::write(paths.backup_dir().join("notes.txt"), b"ignored").unwrap();

        assert_eq!(paths.prune_old_backups(2).unwrap(), 2);
        let remaining = paths.list_backups().unwrap();
        assert_eq!(remaining, vec![created[3].clone(), created[2].clone()]);
    }
}
