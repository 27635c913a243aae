//! Quantity and decimal conversions for wei-denominated values.
use crate::errors::{WalletError, WalletResult};

pub const MAX_DECIMALS: u8 = 36;

/// Render base units as a decimal string with trailing zeros trimmed.
pub fn format_units(base_units: u128, decimals: u8) -> String {
    if decimals == 0 {
        return base_units.to_string();
    }

    let digits = base_units.to_string();
    let decimals = decimals as usize;
    let (whole, fraction) = if digits.len() > decimals {
        let split = digits.len() - decimals;
        (digits[..split].to_string(), digits[split..].to_string())
    } else {
        ("0".to_string(), format!("{:0>width$}", digits, width = decimals))
    };

    let fraction = fraction.trim_end_matches('0');
    if fraction.is_empty() {
        whole
    } else {
        format!("{}.{}", whole, fraction)
    }
}

/// Parse a decimal string into base units. Rejects more fractional digits
/// than `decimals` allows.
pub fn parse_units(amount: &str, decimals: u8) -> WalletResult<u128> {
    let amount = amount.trim();
    if amount.is_empty() {
        return Err(WalletError::ValidationError(
            "Amount cannot be empty".to_string(),
        ));
    }
    if decimals > MAX_DECIMALS {
        return Err(WalletError::ValidationError(format!(
            "Unsupported decimals: {}",
            decimals
        )));
    }

    let (whole, fraction) = match amount.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (amount, ""),
    };
    if fraction.len() > decimals as usize {
        return Err(WalletError::ValidationError(format!(
            "Too many decimal places (max {})",
            decimals
        )));
    }
    let all_digits = |s: &str| s.chars().all(|c| c.is_ascii_digit());
    if (whole.is_empty() && fraction.is_empty()) || !all_digits(whole) || !all_digits(fraction) {
        return Err(WalletError::ValidationError(format!(
            "Invalid number format: {}",
            amount
        )));
    }

    let scale = 10u128
        .checked_pow(decimals as u32)
        .ok_or_else(|| WalletError::ValidationError("Amount overflow".to_string()))?;
    let whole_units = if whole.is_empty() {
        0
    } else {
        whole
            .parse::<u128>()
            .map_err(|_| WalletError::ValidationError("Amount overflow".to_string()))?
    };
    let fraction_units = if fraction.is_empty() {
        0
    } else {
        let padded = format!("{:0<width$}", fraction, width = decimals as usize);
        padded
            .parse::<u128>()
            .map_err(|_| WalletError::ValidationError("Invalid fractional part".to_string()))?
    };

    whole_units
        .checked_mul(scale)
        .and_then(|units| units.checked_add(fraction_units))
        .ok_or_else(|| WalletError::ValidationError("Amount overflow".to_string()))
}

/// Decode a JSON-RPC hex quantity (`0x`-prefixed, no leading-zero rule enforced).
pub fn parse_quantity(value: &str) -> WalletResult<u128> {
    let body = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .ok_or_else(|| WalletError::InvalidParams(format!("expected 0x quantity: {}", value)))?;
    if body.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(body, 16)
        .map_err(|_| WalletError::InvalidParams(format!("invalid hex quantity: {}", value)))
}

pub fn to_quantity(value: u128) -> String {
    format!("0x{:x}", value)
}
