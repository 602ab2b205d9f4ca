//! Symmetric key material and HKDF derivation

use std::fmt;

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroize;

use crate::error::CryptoError;

/// Size of a symmetric key (32 bytes)
pub const KEY_SIZE: usize = 32;

/// 256-bit symmetric key, zeroized on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretKey {
    bytes: [u8; KEY_SIZE],
}

impl SecretKey {
    /// Wrap raw key bytes.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Copy a key out of a slice.
    ///
    /// # Errors
    ///
    /// - `CryptoError::InvalidKeyLength` if `bytes` is not 32 bytes long
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let bytes: [u8; KEY_SIZE] =
            bytes.try_into().map_err(|_| CryptoError::InvalidKeyLength { len: bytes.len() })?;
        Ok(Self { bytes })
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for SecretKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(..)")
    }
}

/// Derive a 32-byte key from `secret` with HKDF-SHA256.
///
/// Deterministic: same `(secret, salt, info)` always yields the same key.
/// An empty `salt` is treated as absent.
pub fn derive_key(secret: &[u8], salt: &[u8], info: &[u8]) -> SecretKey {
    let salt = (!salt.is_empty()).then_some(salt);
    let hkdf = Hkdf::<Sha256>::new(salt, secret);

    let mut bytes = [0u8; KEY_SIZE];
    let Ok(()) = hkdf.expand(info, &mut bytes) else {
        unreachable!("32 bytes is a valid HKDF-SHA256 output length");
    };

    let key = SecretKey::from_bytes(bytes);
    bytes.zeroize();
    key
}
