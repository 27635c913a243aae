use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant};

use secrecy::{ExposeSecret, SecretString};

use crate::config_store::SessionConfig;
use crate::errors::{WalletError, WalletResult};

/// Default duration before an unlocked wallet automatically locks.
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(15 * 60);
const MAX_BACKOFF_EXPONENT: u32 = 8;

struct UnlockedSession {
    password: SecretString,
    expires_at: Instant,
}

impl UnlockedSession {
    fn touch(&mut self, timeout: Duration) {
        self.expires_at = Instant::now() + timeout;
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

#[derive(Default)]
struct SessionState {
    unlocked: Option<UnlockedSession>,
    failed_attempts: u32,
    next_allowed_attempt: Option<Instant>,
    backoff_exponent: u32,
}

/// In-memory unlock state. Holds the vault password while unlocked so
/// account keys can be decrypted per signing call; nothing here is persisted.
#[derive(Clone)]
pub struct SessionManager {
    state: Arc<RwLock<SessionState>>,
    timeout: Duration,
    backoff_base: Duration,
    backoff_cap: Duration,
}

impl SessionManager {
    pub fn new(timeout: Duration) -> Self {
        Self::with_backoff(timeout, Duration::from_secs(1), Duration::from_secs(32))
    }

    pub fn with_backoff(timeout: Duration, backoff_base: Duration, backoff_cap: Duration) -> Self {
        Self {
            state: Arc::new(RwLock::new(SessionState::default())),
            timeout,
            backoff_base,
            backoff_cap,
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::with_backoff(
            config.auto_lock(),
            Duration::from_millis(config.backoff_base_ms),
            Duration::from_millis(config.backoff_cap_ms),
        )
    }

    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_SESSION_TIMEOUT)
    }

    /// Expired sessions count as locked and are dropped on observation.
    pub fn is_locked(&self) -> bool {
        let expired = {
            let state = self.state.read();
            match &state.unlocked {
                None => return true,
                Some(session) => session.is_expired(),
            }
        };
        if expired {
            log::info!("wallet session expired; locking");
            self.lock();
        }
        expired
    }

    pub fn open(&self, password: &SecretString) {
        let mut state = self.state.write();
        state.unlocked = Some(UnlockedSession {
            password: SecretString::from(password.expose_secret().to_string()),
            expires_at: Instant::now() + self.timeout,
        });
        state.failed_attempts = 0;
        state.next_allowed_attempt = None;
        state.backoff_exponent = 0;
    }

    pub fn lock(&self) {
        let mut state = self.state.write();
        state.unlocked = None;
    }

    /// Fails with `RateLimited` while a backoff window from earlier failures
    /// is still open.
    pub fn ensure_attempt_allowed(&self) -> WalletResult<()> {
        let state = self.state.read();
        if let Some(until) = state.next_allowed_attempt {
            let now = Instant::now();
            if now < until {
                let remaining = until.saturating_duration_since(now);
                return Err(WalletError::RateLimited(remaining.as_millis() as u64));
            }
        }
        Ok(())
    }

    /// Record a failed unlock and open the next backoff window.
    pub fn register_failed_attempt(&self) -> Duration {
        let mut state = self.state.write();
        state.failed_attempts = state.failed_attempts.saturating_add(1);
        state.backoff_exponent = (state.backoff_exponent + 1).min(MAX_BACKOFF_EXPONENT);

        let multiplier = 1_u32 << state.backoff_exponent.saturating_sub(1);
        let delay = self
            .backoff_base
            .checked_mul(multiplier)
            .unwrap_or(self.backoff_cap)
            .min(self.backoff_cap);
        state.next_allowed_attempt = Some(Instant::now() + delay);
        delay
    }

    pub fn failed_attempts(&self) -> u32 {
        self.state.read().failed_attempts
    }

    /// Run `operation` with the session password, refreshing the timeout.
    pub fn with_password<F, T>(&self, operation: F) -> WalletResult<T>
    where
        F: FnOnce(&SecretString) -> WalletResult<T>,
    {
        let mut state = self.state.write();
        let session = state.unlocked.as_mut().ok_or(WalletError::Locked)?;

        if session.is_expired() {
            state.unlocked = None;
            log::info!("wallet session expired; locking");
            return Err(WalletError::Locked);
        }

        session.touch(self.timeout);
        operation(&session.password)
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("locked", &self.state.read().unlocked.is_none())
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn password() -> SecretString {
        SecretString::from("session-password".to_string())
    }

    #[test]
    fn open_and_lock_cycle() {
        let manager = SessionManager::with_defaults();
        assert!(manager.is_locked());

        manager.open(&password());
        assert!(!manager.is_locked());

        manager.lock();
        assert!(manager.is_locked());
        assert_eq!(
            manager.with_password(|_| Ok(())).unwrap_err(),
            WalletError::Locked
        );
    }

    #[test]
    fn timeout_enforced() {
        let manager = SessionManager::new(Duration::from_millis(10));
        manager.open(&password());
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(
            manager.with_password(|_| Ok(())).unwrap_err(),
            WalletError::Locked
        );
        assert!(manager.is_locked());
    }

    #[test]
    fn with_password_exposes_session_secret() {
        let manager = SessionManager::with_defaults();
        manager.open(&password());
        let length = manager
            .with_password(|pw| Ok(pw.expose_secret().len()))
            .unwrap();
        assert_eq!(length, "session-password".len());
    }

    #[test]
    fn failed_attempts_back_off_exponentially() {
        let manager = SessionManager::with_backoff(
            DEFAULT_SESSION_TIMEOUT,
            Duration::from_millis(10),
            Duration::from_millis(25),
        );
        assert!(manager.ensure_attempt_allowed().is_ok());

        assert_eq!(manager.register_failed_attempt(), Duration::from_millis(10));
        assert!(matches!(
            manager.ensure_attempt_allowed(),
            Err(WalletError::RateLimited(_))
        ));
        assert_eq!(manager.register_failed_attempt(), Duration::from_millis(20));
        assert_eq!(manager.register_failed_attempt(), Duration::from_millis(25));
        assert_eq!(manager.failed_attempts(), 3);

        std::thread::sleep(Duration::from_millis(30));
        assert!(manager.ensure_attempt_allowed().is_ok());
    }

    #[test]
    fn successful_unlock_resets_backoff() {
        let manager = SessionManager::with_defaults();
        manager.register_failed_attempt();
        manager.open(&password());
        assert_eq!(manager.failed_attempts(), 0);
        assert!(manager.ensure_attempt_allowed().is_ok());
    }
}
