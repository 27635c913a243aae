use argon2::password_hash::rand_core::OsRng as HashRng;
use argon2::password_hash::{
    PasswordHash as PhcString, PasswordHasher, PasswordVerifier, SaltString,
};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::rngs::OsRng;
use rand::RngCore;
use ring::aead::{self, Aad, LessSafeKey, Nonce, UnboundKey};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::config_store::KdfConfig;
use crate::errors::{WalletError, WalletResult};

const CIPHERTEXT_VERSION: u8 = 1;
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

/// Key schedule parameters stored next to each ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParameters {
    pub m_cost_kib: u32,
    pub t_cost: u32,
    pub p_cost: u32,
    pub salt: String,
}

/// Self-describing authenticated ciphertext of a secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CipherText {
    pub version: u8,
    pub kdf: KdfParameters,
    pub nonce: String,
    pub ciphertext: String,
}

/// Argon2 PHC string used only to gate password equality.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PasswordHash(String);

impl PasswordHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Password-based encryption of wallet secrets.
///
/// Every ciphertext gets a fresh salt and nonce, so encrypting the same
/// secret twice never yields the same output.
#[derive(Debug, Clone, Copy)]
pub struct SecretCodec {
    kdf: KdfConfig,
}

impl SecretCodec {
    pub fn new(kdf: KdfConfig) -> Self {
        Self { kdf }
    }

    pub fn kdf(&self) -> KdfConfig {
        self.kdf
    }

    pub fn encrypt(&self, plaintext: &[u8], password: &SecretString) -> WalletResult<CipherText> {
        let mut salt = [0u8; SALT_LEN];
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut salt);
        OsRng.fill_bytes(&mut nonce_bytes);

        let params = KdfParameters {
            m_cost_kib: self.kdf.m_cost_kib,
            t_cost: self.kdf.t_cost,
            p_cost: self.kdf.p_cost,
            salt: hex::encode(salt),
        };
        let key = derive_key(password, &params, &salt)?;
        let sealing_key = aead_key(&key)?;

        let mut in_out = plaintext.to_vec();
        sealing_key
            .seal_in_place_append_tag(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::empty(),
                &mut in_out,
            )
            .map_err(|_| WalletError::CryptoError("Encryption failure".to_string()))?;

        Ok(CipherText {
            version: CIPHERTEXT_VERSION,
            kdf: params,
            nonce: hex::encode(nonce_bytes),
            ciphertext: hex::encode(in_out),
        })
    }

    /// Decrypt a ciphertext. Wrong passwords and malformed input are
    /// indistinguishable to the caller.
    pub fn decrypt(
        &self,
        ciphertext: &CipherText,
        password: &SecretString,
    ) -> WalletResult<Zeroizing<Vec<u8>>> {
        open(ciphertext, password).map_err(|err| {
            log::debug!("secret decryption rejected: {}", err);
            WalletError::DecryptionFailed
        })
    }

    pub fn encrypt_str(&self, plaintext: &str, password: &SecretString) -> WalletResult<CipherText> {
        self.encrypt(plaintext.as_bytes(), password)
    }

    pub fn decrypt_string(
        &self,
        ciphertext: &CipherText,
        password: &SecretString,
    ) -> WalletResult<Zeroizing<String>> {
        let bytes = self.decrypt(ciphertext, password)?;
        let text = std::str::from_utf8(&bytes).map_err(|_| WalletError::DecryptionFailed)?;
        Ok(Zeroizing::new(text.to_string()))
    }

    pub fn hash_password(&self, password: &SecretString) -> WalletResult<PasswordHash> {
        let salt = SaltString::generate(&mut HashRng);
        let hasher = argon2_instance(self.kdf.m_cost_kib, self.kdf.t_cost, self.kdf.p_cost, None)?;
        let hash = hasher
            .hash_password(password.expose_secret().as_bytes(), &salt)
            .map_err(|e| WalletError::CryptoError(format!("Password hashing failed: {e}")))?;
        Ok(PasswordHash(hash.to_string()))
    }

    /// Cost parameters are read from the stored hash, not from this codec.
    pub fn verify_password(&self, candidate: &SecretString, stored: &PasswordHash) -> bool {
        let parsed = match PhcString::new(stored.as_str()) {
            Ok(parsed) => parsed,
            Err(err) => {
                log::warn!("stored password hash is malformed: {}", err);
                return false;
            }
        };
        Argon2::default()
            .verify_password(candidate.expose_secret().as_bytes(), &parsed)
            .is_ok()
    }
}

fn open(ciphertext: &CipherText, password: &SecretString) -> WalletResult<Zeroizing<Vec<u8>>> {
    if ciphertext.version != CIPHERTEXT_VERSION {
        return Err(WalletError::ValidationError(format!(
            "Unsupported ciphertext version {}",
            ciphertext.version
        )));
    }

    let salt = hex::decode(&ciphertext.kdf.salt)
        .map_err(|e| WalletError::ValidationError(format!("salt: {e}")))?;
    let nonce_bytes: [u8; NONCE_LEN] = hex::decode(&ciphertext.nonce)
        .map_err(|e| WalletError::ValidationError(format!("nonce: {e}")))?
        .try_into()
        .map_err(|_| WalletError::ValidationError("nonce length".to_string()))?;
    let sealed = hex::decode(&ciphertext.ciphertext)
        .map_err(|e| WalletError::ValidationError(format!("ciphertext: {e}")))?;
    if sealed.len() < aead::AES_256_GCM.tag_len() {
        return Err(WalletError::ValidationError(
            "Ciphertext shorter than authentication tag".to_string(),
        ));
    }

    let key = derive_key(password, &ciphertext.kdf, &salt)?;
    let opening_key = aead_key(&key)?;

    let mut in_out = Zeroizing::new(sealed);
    let plaintext_len = opening_key
        .open_in_place(
            Nonce::assume_unique_for_key(nonce_bytes),
            Aad::empty(),
            &mut in_out,
        )
        .map_err(|_| WalletError::CryptoError("Authentication failed".to_string()))?
        .len();
    in_out.truncate(plaintext_len);
    Ok(in_out)
}

fn argon2_instance(
    m_cost_kib: u32,
    t_cost: u32,
    p_cost: u32,
    output_len: Option<usize>,
) -> WalletResult<Argon2<'static>> {
    let params = Params::new(m_cost_kib, t_cost, p_cost, output_len)
        .map_err(|e| WalletError::CryptoError(format!("Invalid Argon2 params: {e}")))?;
    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
}

fn derive_key(
    password: &SecretString,
    params: &KdfParameters,
    salt: &[u8],
) -> WalletResult<Zeroizing<[u8; KEY_LEN]>> {
    let argon2 = argon2_instance(params.m_cost_kib, params.t_cost, params.p_cost, Some(KEY_LEN))?;
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    argon2
        .hash_password_into(password.expose_secret().as_bytes(), salt, key.as_mut())
        .map_err(|e| WalletError::CryptoError(format!("KDF failed: {e}")))?;
    Ok(key)
}

fn aead_key(key: &Zeroizing<[u8; KEY_LEN]>) -> WalletResult<LessSafeKey> {
    let unbound = UnboundKey::new(&aead::AES_256_GCM, key.as_ref())
        .map_err(|e| WalletError::CryptoError(format!("Invalid encryption key: {e}")))?;
    Ok(LessSafeKey::new(unbound))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> SecretCodec {
        SecretCodec::new(KdfConfig::testing())
    }

    fn secret(value: &str) -> SecretString {
        SecretString::from(value.to_string())
    }

    #[test]
    fn decrypt_returns_original_bytes() {
        let codec = codec();
        let password = secret("correct horse battery");
        let sealed = codec.encrypt(b"private material", &password).unwrap();

        let opened = codec.decrypt(&sealed, &password).unwrap();
        assert_eq!(opened.as_slice(), b"private material");
    }

    #[test]
    fn wrong_password_fails_closed() {
        let codec = codec();
        let sealed = codec.encrypt(b"seed words", &secret("first-password")).unwrap();

        let result = codec.decrypt(&sealed, &secret("second-password"));
        assert_eq!(result.unwrap_err(), WalletError::DecryptionFailed);
    }

    #[test]
    fn tampered_ciphertext_is_rejected() {
        let codec = codec();
        let password = secret("pw12345678");
        let mut sealed = codec.encrypt(b"abc", &password).unwrap();
        let mut raw = hex::decode(&sealed.ciphertext).unwrap();
        raw[0] ^= 0x01;
        sealed.ciphertext = hex::encode(raw);

        assert_eq!(
            codec.decrypt(&sealed, &password).unwrap_err(),
            WalletError::DecryptionFailed
        );

        sealed.nonce = "zz".to_string();
        assert_eq!(
            codec.decrypt(&sealed, &password).unwrap_err(),
            WalletError::DecryptionFailed
        );
    }

    #[test]
    fn salts_and_nonces_are_fresh() {
        let codec = codec();
        let password = secret("pw12345678");
        let a = codec.encrypt(b"same", &password).unwrap();
        let b = codec.encrypt(b"same", &password).unwrap();
        assert_ne!(a.kdf.salt, b.kdf.salt);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn password_hash_verifies_only_the_original() {
        let codec = codec();
        let hash = codec.hash_password(&secret("correct-password-1")).unwrap();

        assert!(hash.as_str().starts_with("$argon2id$"));
        assert!(codec.verify_password(&secret("correct-password-1"), &hash));
        assert!(!codec.verify_password(&secret("wrong"), &hash));
    }

    #[test]
    fn ciphertext_serializes_as_plain_json() {
        let codec = codec();
        let sealed = codec.encrypt_str("hello", &secret("pw12345678")).unwrap();
        let json = serde_json::to_string(&sealed).unwrap();
        let back: CipherText = serde_json::from_str(&json).unwrap();
        assert_eq!(
            codec
                .decrypt_string(&back, &secret("pw12345678"))
                .unwrap()
                .as_str(),
            "hello"
        );
    }
}
