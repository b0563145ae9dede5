//! Credential vault for device passwords
//!
//! Passwords are stored as `enc:` followed by the hex encoding of
//! `salt (16 bytes) || nonce (12 bytes) || ciphertext || tag`. Each value is
//! sealed with AES-256-GCM under a key derived from the operator supplied
//! secret and the value's own salt with Argon2id.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use argon2::Argon2;
use argon2::password_hash::rand_core::RngCore;

use crate::Secret;

/// Tag marking an encrypted credential.
pub const ENCRYPTED_PREFIX: &str = "enc:";

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("no encryption key configured")]
    MissingKey,

    #[error("encryption failed")]
    Encrypt,

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    /// Wrong key, tampered value or a value that was never produced by the vault.
    #[error("decryption failed: {0}")]
    Decrypt(String),
}

type Salt = [u8; SALT_LEN];

#[derive(Clone)]
pub struct CredentialVault {
    secret: Arc<str>,
    /// Derived ciphers by salt, so each stored value runs Argon2 once
    ciphers: Arc<Mutex<HashMap<Salt, Aes256Gcm>>>,
}

impl std::fmt::Debug for CredentialVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CredentialVault")
    }
}

impl CredentialVault {
    pub fn new(secret: &str) -> Self {
        Self {
            secret: Arc::from(secret),
            ciphers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Build a vault from `TIKMON_ENCRYPTION_KEY`.
    pub fn from_env() -> Result<Self, CryptoError> {
        crate::util::get_encryption_key()
            .map(|key| Self::new(&key))
            .ok_or(CryptoError::MissingKey)
    }

    fn cipher(&self, salt: &Salt) -> Result<Aes256Gcm, CryptoError> {
        if let Some(cipher) = self.ciphers.lock().ok().and_then(|c| c.get(salt).cloned()) {
            return Ok(cipher);
        }

        let mut key = [0u8; 32];
        Argon2::default()
            .hash_password_into(self.secret.as_bytes(), salt, &mut key)
            .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));

        if let Ok(mut ciphers) = self.ciphers.lock() {
            ciphers.insert(*salt, cipher.clone());
        }
        Ok(cipher)
    }

    /// Encrypt a plaintext password into its tagged stored form.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let mut salt: Salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let ciphertext = self
            .cipher(&salt)?
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| CryptoError::Encrypt)?;

        let mut data = salt.to_vec();
        data.extend_from_slice(&nonce);
        data.extend_from_slice(&ciphertext);
        Ok(format!("{ENCRYPTED_PREFIX}{}", hex::encode(data)))
    }

    /// Decrypt a tagged value. The tag is optional.
    pub fn decrypt(&self, stored: &str) -> Result<String, CryptoError> {
        let encoded = stored.strip_prefix(ENCRYPTED_PREFIX).unwrap_or(stored);
        let data = hex::decode(encoded).map_err(|e| CryptoError::Decrypt(e.to_string()))?;

        if data.len() < SALT_LEN + NONCE_LEN + TAG_LEN {
            return Err(CryptoError::Decrypt("value too short".to_string()));
        }

        let (salt, rest) = data.split_at(SALT_LEN);
        let (nonce, ciphertext) = rest.split_at(NONCE_LEN);
        let salt: Salt = salt
            .try_into()
            .map_err(|_| CryptoError::Decrypt("bad salt".to_string()))?;

        let plaintext = self
            .cipher(&salt)?
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::Decrypt("authentication failed".to_string()))?;

        String::from_utf8(plaintext).map_err(|e| CryptoError::Decrypt(e.to_string()))
    }

    /// Plaintext of a device credential, decrypting it when tagged.
    pub fn reveal(&self, secret: &Secret) -> Result<String, CryptoError> {
        if secret.is_encrypted() {
            self.decrypt(secret.expose())
        } else {
            Ok(secret.expose().to_string())
        }
    }
}

/// Resolve a credential when no vault may be configured.
///
/// Plain credentials pass through; tagged ones need a vault.
pub fn reveal(vault: Option<&CredentialVault>, secret: &Secret) -> Result<String, CryptoError> {
    match vault {
        Some(vault) => vault.reveal(secret),
        None if secret.is_encrypted() => Err(CryptoError::MissingKey),
        None => Ok(secret.expose().to_string()),
    }
}
