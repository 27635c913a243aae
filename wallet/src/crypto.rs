//! Key derivation: BIP-39 mnemonics, BIP-32/44 paths and secp256k1 account keys.
use std::fmt;
use std::str::FromStr;

use bip32::{DerivationPath, XPrv};
use bip39::{Language, Mnemonic};
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use sha3::{Digest, Keccak256};
use zeroize::Zeroizing;

use crate::errors::{WalletError, WalletResult};
use crate::ethereum::Address;

/// BIP-44 path prefix for Ethereum accounts; the index is appended.
pub const ETH_DERIVATION_PREFIX: &str = "m/44'/60'/0'/0";
pub const DEFAULT_WORD_COUNT: usize = 12;

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Keccak256::digest(data));
    out
}

/// Plaintext mnemonic. Zeroed on drop and never printed by `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct MnemonicPhrase(Zeroizing<String>);

impl MnemonicPhrase {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn word_count(&self) -> usize {
        self.0.split_whitespace().count()
    }

    fn parse(&self) -> WalletResult<Mnemonic> {
        Mnemonic::parse_in_normalized(Language::English, &self.0)
            .map_err(|_| WalletError::InvalidMnemonic)
    }
}

impl fmt::Debug for MnemonicPhrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MnemonicPhrase([REDACTED; {} words])", self.word_count())
    }
}

/// 64-byte BIP-39 seed.
pub struct Seed(Zeroizing<[u8; 64]>);

impl Seed {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0[..]
    }
}

impl fmt::Debug for Seed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Seed([REDACTED])")
    }
}

/// secp256k1 private key together with its derived address.
pub struct AccountKey {
    address: Address,
    private_key: Zeroizing<[u8; 32]>,
}

impl AccountKey {
    fn from_signing_key(signing_key: &SigningKey) -> Self {
        let mut private_key = Zeroizing::new([0u8; 32]);
        private_key.copy_from_slice(&signing_key.to_bytes());
        Self {
            address: Address::from_verifying_key(signing_key.verifying_key()),
            private_key,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn private_key_bytes(&self) -> &[u8; 32] {
        &self.private_key
    }

    pub fn private_key_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(format!("0x{}", hex::encode(&self.private_key[..])))
    }

    /// Sign a 32-byte digest, returning `r || s` with its recovery id.
    pub fn sign_digest(&self, digest: &[u8; 32]) -> WalletResult<RecoverableSignature> {
        let signing_key = SigningKey::from_slice(&self.private_key[..])
            .map_err(|_| WalletError::InvalidKey("stored key is not a valid scalar".to_string()))?;
        let (signature, recovery_id) = signing_key
            .sign_prehash_recoverable(digest)
            .map_err(|e| WalletError::CryptoError(format!("Signing failed: {e}")))?;

        let bytes = signature.to_bytes();
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&bytes[..32]);
        s.copy_from_slice(&bytes[32..]);
        Ok(RecoverableSignature {
            r,
            s,
            recovery_id: recovery_id.to_byte(),
        })
    }
}

impl fmt::Debug for AccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountKey")
            .field("address", &self.address)
            .field("private_key", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoverableSignature {
    pub r: [u8; 32],
    pub s: [u8; 32],
    /// 0 or 1.
    pub recovery_id: u8,
}

impl RecoverableSignature {
    /// `r || s || v` with `v = 27 + recovery_id`.
    pub fn to_eth_bytes(&self) -> [u8; 65] {
        let mut out = [0u8; 65];
        out[..32].copy_from_slice(&self.r);
        out[32..64].copy_from_slice(&self.s);
        out[64] = 27 + self.recovery_id;
        out
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.to_eth_bytes()))
    }

    /// Parse a 65-byte signature; `v` may be 0/1 or 27/28.
    pub fn from_eth_bytes(bytes: &[u8]) -> WalletResult<Self> {
        if bytes.len() != 65 {
            return Err(WalletError::InvalidParams(format!(
                "signature must be 65 bytes, got {}",
                bytes.len()
            )));
        }
        let recovery_id = match bytes[64] {
            0 | 27 => 0,
            1 | 28 => 1,
            other => {
                return Err(WalletError::InvalidParams(format!(
                    "unsupported recovery byte {}",
                    other
                )))
            }
        };
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&bytes[..32]);
        s.copy_from_slice(&bytes[32..64]);
        Ok(Self { r, s, recovery_id })
    }
}

pub fn generate_mnemonic() -> WalletResult<MnemonicPhrase> {
    generate_mnemonic_with_words(DEFAULT_WORD_COUNT)
}

/// Generate a phrase of 12, 15, 18, 21 or 24 words from OS entropy.
pub fn generate_mnemonic_with_words(word_count: usize) -> WalletResult<MnemonicPhrase> {
    let entropy_bits = match word_count {
        12 => 128,
        15 => 160,
        18 => 192,
        21 => 224,
        24 => 256,
        other => {
            return Err(WalletError::ValidationError(format!(
                "Invalid word count: {}",
                other
            )))
        }
    };

    let mut entropy = Zeroizing::new(vec![0u8; entropy_bits / 8]);
    OsRng
        .try_fill_bytes(&mut entropy)
        .map_err(|e| WalletError::CryptoError(format!("Failed to generate entropy: {}", e)))?;

    let mnemonic = Mnemonic::from_entropy(&entropy)
        .map_err(|e| WalletError::CryptoError(format!("Failed to create mnemonic: {}", e)))?;
    Ok(MnemonicPhrase(Zeroizing::new(mnemonic.to_string())))
}

/// Normalize whitespace and case, then verify the BIP-39 checksum.
pub fn parse_mnemonic(phrase: &str) -> WalletResult<MnemonicPhrase> {
    let normalized = Zeroizing::new(
        phrase
            .split_whitespace()
            .map(|word| word.to_lowercase())
            .collect::<Vec<_>>()
            .join(" "),
    );
    let candidate = MnemonicPhrase(normalized);
    candidate.parse()?;
    Ok(candidate)
}

pub fn validate_mnemonic(phrase: &str) -> bool {
    parse_mnemonic(phrase).is_ok()
}

pub fn derive_seed(phrase: &MnemonicPhrase, passphrase: &str) -> WalletResult<Seed> {
    let mnemonic = phrase.parse()?;
    Ok(Seed(Zeroizing::new(mnemonic.to_seed(passphrase))))
}

pub fn derivation_path(index: u32) -> String {
    format!("{}/{}", ETH_DERIVATION_PREFIX, index)
}

pub fn derive_account(seed: &Seed, index: u32) -> WalletResult<AccountKey> {
    derive_account_at_path(seed, &derivation_path(index))
}

pub fn derive_account_at_path(seed: &Seed, path: &str) -> WalletResult<AccountKey> {
    let path = DerivationPath::from_str(path)
        .map_err(|e| WalletError::ValidationError(format!("Invalid derivation path: {}", e)))?;
    let xprv = XPrv::derive_from_path(seed.as_bytes(), &path)
        .map_err(|e| WalletError::CryptoError(format!("HD derivation failed: {}", e)))?;
    Ok(AccountKey::from_signing_key(xprv.private_key()))
}

/// Import a 32-byte hex private key, with or without `0x`.
pub fn import_raw_key(hex_key: &str) -> WalletResult<AccountKey> {
    let trimmed = hex_key.trim();
    let body = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    if body.len() != 64 {
        return Err(WalletError::InvalidKey(
            "expected 64 hex characters".to_string(),
        ));
    }

    let bytes = Zeroizing::new(
        hex::decode(body).map_err(|_| WalletError::InvalidKey("not valid hex".to_string()))?,
    );
    let signing_key = SigningKey::from_slice(&bytes)
        .map_err(|_| WalletError::InvalidKey("not a valid secp256k1 scalar".to_string()))?;
    Ok(AccountKey::from_signing_key(&signing_key))
}

/// Rebuild an account key from raw scalar bytes, as stored encrypted in the vault.
pub fn account_from_secret(bytes: &[u8]) -> WalletResult<AccountKey> {
    let signing_key = SigningKey::from_slice(bytes)
        .map_err(|_| WalletError::InvalidKey("not a valid secp256k1 scalar".to_string()))?;
    Ok(AccountKey::from_signing_key(&signing_key))
}

/// Recover the signer address of a 32-byte digest.
pub fn recover_address(
    digest: &[u8; 32],
    signature: &RecoverableSignature,
) -> WalletResult<Address> {
    let mut rs = [0u8; 64];
    rs[..32].copy_from_slice(&signature.r);
    rs[32..].copy_from_slice(&signature.s);
    let sig = Signature::from_slice(&rs)
        .map_err(|e| WalletError::CryptoError(format!("Malformed signature: {e}")))?;
    let recovery_id = RecoveryId::from_byte(signature.recovery_id)
        .ok_or_else(|| WalletError::CryptoError("Invalid recovery id".to_string()))?;
    let key = VerifyingKey::recover_from_prehash(digest, &sig, recovery_id)
        .map_err(|e| WalletError::CryptoError(format!("Recovery failed: {e}")))?;
    Ok(Address::from_verifying_key(&key))
}

#[cfg(test)]
mod tests {
    use super::*;

    const HARDHAT: &str = "test test test test test test test test test test test junk";

    #[test]
    fn hardhat_account_zero_matches_known_address() {
        let phrase = parse_mnemonic(HARDHAT).unwrap();
        let seed = derive_seed(&phrase, "").unwrap();
        let account = derive_account(&seed, 0).unwrap();

        assert_eq!(
            account.address().to_string(),
            "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266"
        );
        assert_eq!(
            account.private_key_hex().as_str(),
            "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80"
        );
    }

    #[test]
    fn derivation_is_deterministic() {
        let phrase = parse_mnemonic(
            "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about",
        )
        .unwrap();
        let first = derive_account(&derive_seed(&phrase, "").unwrap(), 0).unwrap();
        let second = derive_account(&derive_seed(&phrase, "").unwrap(), 0).unwrap();

        assert_eq!(first.address(), second.address());
        assert_eq!(first.private_key_bytes(), second.private_key_bytes());
        assert_eq!(
            first.address().to_string(),
            "0x9858EfFD232B4033E47d90003D41EC34EcaEda94"
        );
    }

    #[test]
    fn distinct_indices_give_distinct_accounts() {
        let seed = derive_seed(&parse_mnemonic(HARDHAT).unwrap(), "").unwrap();
        let zero = derive_account(&seed, 0).unwrap();
        let one = derive_account(&seed, 1).unwrap();
        assert_ne!(zero.address(), one.address());
        assert_eq!(
            one.address().to_string(),
            "0x70997970C51812dc3A010C7d01b50e0d17dc79C8"
        );
    }

    #[test]
    fn generated_mnemonics_validate() {
        for words in [12, 15, 18, 21, 24] {
            let phrase = generate_mnemonic_with_words(words).unwrap();
            assert_eq!(phrase.word_count(), words);
            assert!(validate_mnemonic(phrase.as_str()));
        }
        assert!(generate_mnemonic_with_words(13).is_err());
    }

    #[test]
    fn invalid_checksum_rejected() {
        assert!(!validate_mnemonic(
            "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon"
        ));
        assert_eq!(
            parse_mnemonic("invalid mnemonic words here").unwrap_err(),
            WalletError::InvalidMnemonic
        );
    }

    #[test]
    fn mnemonic_input_is_normalized() {
        let phrase = parse_mnemonic("  TEST test test test test test test test test test test   junk ").unwrap();
        assert_eq!(phrase.as_str(), HARDHAT);
        assert!(!format!("{:?}", phrase).contains("junk"));
    }

    #[test]
    fn raw_key_import_matches_hd_derivation() {
        let imported =
            import_raw_key("ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80")
                .unwrap();
        assert_eq!(
            imported.address().to_string(),
            "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266"
        );
    }

    #[test]
    fn malformed_raw_keys_rejected() {
        for bad in [
            "",
            "0x1234",
            "zz0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80",
            "0x0000000000000000000000000000000000000000000000000000000000000000",
        ] {
            assert!(
                matches!(import_raw_key(bad), Err(WalletError::InvalidKey(_))),
                "{} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn signatures_recover_to_signer() {
        let key = import_raw_key(&hex::encode([0x46u8; 32])).unwrap();
        let digest = keccak256(b"payload");
        let signature = key.sign_digest(&digest).unwrap();

        let bytes = signature.to_eth_bytes();
        assert!(bytes[64] == 27 || bytes[64] == 28);
        let parsed = RecoverableSignature::from_eth_bytes(&bytes).unwrap();
        assert_eq!(recover_address(&digest, &parsed).unwrap(), key.address());
    }
}
