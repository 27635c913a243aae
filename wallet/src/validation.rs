use crate::errors::{WalletError, WalletResult};
use regex::Regex;
use std::collections::HashSet;

pub const MIN_PASSWORD_LEN: usize = 8;
const MAX_PASSWORD_LEN: usize = 256;
const MAX_INPUT_LEN: usize = 1000;

/// Checks for values entering the vault from pages and forms.
pub struct InputValidator {
    rpc_url_pattern: Regex,
    origin_pattern: Regex,
    symbol_pattern: Regex,
    label_pattern: Regex,
    malicious_patterns: Vec<Regex>,
}

impl InputValidator {
    pub fn new() -> WalletResult<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern)
                .map_err(|e| WalletError::ValidationError(format!("Invalid regex {}: {}", pattern, e)))
        };

        let malicious_patterns = [
            r"<script",
            r"javascript:",
            r"data:text/html",
            r"vbscript:",
            r"onload=",
            r"onerror=",
        ]
        .iter()
        .map(|pattern| compile(pattern))
        .collect::<WalletResult<Vec<_>>>()?;

        Ok(InputValidator {
            rpc_url_pattern: compile(r"^https?://[^\s/$.?#][^\s]*$")?,
            origin_pattern: compile(r"^(https?|chrome-extension|moz-extension)://[A-Za-z0-9.\-]+(:\d{1,5})?$")?,
            symbol_pattern: compile(r"^[A-Za-z0-9$._\-]{1,11}$")?,
            label_pattern: compile(r"^[\p{L}\p{N}\s\-_.()]+$")?,
            malicious_patterns,
        })
    }

    /// Length bounds plus a short list of common passwords.
    pub fn validate_password(&self, password: &str) -> WalletResult<()> {
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(WalletError::ValidationError(format!(
                "Password must be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }

        if password.len() > MAX_PASSWORD_LEN {
            return Err(WalletError::ValidationError(
                "Password too long".to_string(),
            ));
        }

        if self.is_common_password(password) {
            return Err(WalletError::ValidationError(
                "Password is too common, please choose a stronger password".to_string(),
            ));
        }

        Ok(())
    }

    pub fn validate_rpc_url(&self, url: &str) -> WalletResult<()> {
        self.check_basic_security(url)?;
        if !self.rpc_url_pattern.is_match(url) {
            return Err(WalletError::ValidationError(format!(
                "RPC URL must be http(s): {}",
                url
            )));
        }
        Ok(())
    }

    /// Origins are scheme://host[:port] with no path.
    pub fn validate_origin(&self, origin: &str) -> WalletResult<()> {
        if !self.origin_pattern.is_match(origin) {
            return Err(WalletError::InvalidParams(format!(
                "Invalid origin: {}",
                origin
            )));
        }
        Ok(())
    }

    pub fn validate_symbol(&self, symbol: &str) -> WalletResult<()> {
        if !self.symbol_pattern.is_match(symbol) {
            return Err(WalletError::ValidationError(format!(
                "Invalid currency symbol: {}",
                symbol
            )));
        }
        Ok(())
    }

    /// Account and network display names.
    pub fn validate_label(&self, label: &str) -> WalletResult<()> {
        self.check_basic_security(label)?;

        let trimmed = label.trim();
        if trimmed.is_empty() {
            return Err(WalletError::ValidationError(
                "Name cannot be empty".to_string(),
            ));
        }

        if trimmed.chars().count() > 64 {
            return Err(WalletError::ValidationError("Name too long".to_string()));
        }

        if !self.label_pattern.is_match(trimmed) {
            return Err(WalletError::ValidationError(
                "Name contains invalid characters".to_string(),
            ));
        }

        Ok(())
    }

    fn check_basic_security(&self, input: &str) -> WalletResult<()> {
        if input.len() > MAX_INPUT_LEN {
            return Err(WalletError::ValidationError("Input too long".to_string()));
        }

        let lowered = input.to_lowercase();
        if self
            .malicious_patterns
            .iter()
            .any(|pattern| pattern.is_match(&lowered))
        {
            return Err(WalletError::ValidationError(
                "Input contains potentially malicious content".to_string(),
            ));
        }

        Ok(())
    }

    fn is_common_password(&self, password: &str) -> bool {
        let common_passwords: HashSet<&str> = [
            "password",
            "password1",
            "password123",
            "12345678",
            "123456789",
            "qwertyuiop",
            "iloveyou",
            "welcome123",
            "administrator",
        ]
        .iter()
        .cloned()
        .collect();

        common_passwords.contains(password.to_lowercase().as_str())
    }
}
