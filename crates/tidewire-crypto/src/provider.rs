//! Encryption capability seam

use std::sync::Arc;

use crate::{
    aead::{self, NONCE_SIZE},
    error::CryptoError,
    key::{self, SecretKey},
};

/// Opaque encrypt / decrypt / derive capability.
///
/// Called from worker threads, so implementations must be shareable.
pub trait CryptoProvider: Send + Sync + 'static {
    /// Encrypt `plaintext` under `key`, returning the ciphertext text form.
    fn encrypt(&self, plaintext: &str, key: &SecretKey) -> Result<String, CryptoError>;

    /// Decrypt ciphertext text produced by [`encrypt`](Self::encrypt).
    fn decrypt(&self, ciphertext: &str, key: &SecretKey) -> Result<String, CryptoError>;

    /// Derive a symmetric key from shared secret material.
    fn derive_key(&self, secret: &[u8], salt: &[u8], info: &[u8]) -> Result<SecretKey, CryptoError>;
}

impl<T: CryptoProvider + ?Sized> CryptoProvider for Arc<T> {
    fn encrypt(&self, plaintext: &str, key: &SecretKey) -> Result<String, CryptoError> {
        (**self).encrypt(plaintext, key)
    }

    fn decrypt(&self, ciphertext: &str, key: &SecretKey) -> Result<String, CryptoError> {
        (**self).decrypt(ciphertext, key)
    }

    fn derive_key(&self, secret: &[u8], salt: &[u8], info: &[u8]) -> Result<SecretKey, CryptoError> {
        (**self).derive_key(secret, salt, info)
    }
}

/// Default provider: XChaCha20-Poly1305 with random nonces, HKDF-SHA256.
#[derive(Debug, Clone, Copy, Default)]
pub struct XChaChaProvider;

impl XChaChaProvider {
    /// Create the provider.
    pub fn new() -> Self {
        Self
    }
}

impl CryptoProvider for XChaChaProvider {
    fn encrypt(&self, plaintext: &str, key: &SecretKey) -> Result<String, CryptoError> {
        let mut nonce = [0u8; NONCE_SIZE];
        getrandom::fill(&mut nonce).map_err(|e| CryptoError::Randomness(e.to_string()))?;
        Ok(aead::seal(plaintext, key, nonce))
    }

    fn decrypt(&self, ciphertext: &str, key: &SecretKey) -> Result<String, CryptoError> {
        aead::open(ciphertext, key)
    }

    fn derive_key(&self, secret: &[u8], salt: &[u8], info: &[u8]) -> Result<SecretKey, CryptoError> {
        Ok(key::derive_key(secret, salt, info))
    }
}
