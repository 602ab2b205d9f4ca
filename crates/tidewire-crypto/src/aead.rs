//! Message sealing using `XChaCha20-Poly1305`
//!
//! [`seal`] and [`open`] are pure: the nonce is supplied by the caller. The
//! sealed text form is lowercase hex of `nonce || ciphertext || tag`.

use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit},
};

use crate::{error::CryptoError, key::SecretKey};

/// `XChaCha20` nonce size (24 bytes)
pub const NONCE_SIZE: usize = 24;

/// Poly1305 tag size (16 bytes)
pub const TAG_SIZE: usize = 16;

/// Encrypt `plaintext` under `key` with the given nonce.
///
/// # Security
///
/// - Caller MUST never reuse a nonce under the same key
/// - 24-byte nonces are large enough to be drawn at random per message
pub fn seal(plaintext: &str, key: &SecretKey, nonce: [u8; NONCE_SIZE]) -> String {
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());

    let Ok(ciphertext) = cipher.encrypt(XNonce::from_slice(&nonce), plaintext.as_bytes()) else {
        unreachable!("XChaCha20-Poly1305 encryption cannot fail with valid inputs");
    };

    let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);
    hex::encode(sealed)
}

/// Decrypt text produced by [`seal`].
///
/// # Errors
///
/// - `CryptoError::MalformedCiphertext` if the text is not hex or too short
/// - `CryptoError::DecryptionFailed` if the tag does not verify (wrong key or
///   tampering)
/// - `CryptoError::InvalidUtf8` if the plaintext is not UTF-8
pub fn open(sealed: &str, key: &SecretKey) -> Result<String, CryptoError> {
    let bytes = hex::decode(sealed)
        .map_err(|e| CryptoError::MalformedCiphertext { reason: e.to_string() })?;

    if bytes.len() < NONCE_SIZE + TAG_SIZE {
        return Err(CryptoError::MalformedCiphertext {
            reason: format!("{} bytes is shorter than nonce and tag", bytes.len()),
        });
    }

    let (nonce, ciphertext) = bytes.split_at(NONCE_SIZE);
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());
    let plaintext = cipher
        .decrypt(XNonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)?;

    String::from_utf8(plaintext).map_err(|_| CryptoError::InvalidUtf8)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn key(byte: u8) -> SecretKey {
        SecretKey::from_bytes([byte; 32])
    }

    #[test]
    fn seal_then_open() {
        let sealed = seal("hello", &key(1), [7; NONCE_SIZE]);

        assert_eq!(sealed.len(), 2 * (NONCE_SIZE + 5 + TAG_SIZE));
        assert!(sealed.starts_with(&"07".repeat(NONCE_SIZE)));
        assert_eq!(open(&sealed, &key(1)).unwrap(), "hello");
    }

    #[test]
    fn wrong_key_fails_authentication() {
        let sealed = seal("hello", &key(1), [0; NONCE_SIZE]);
        assert_eq!(open(&sealed, &key(2)), Err(CryptoError::DecryptionFailed));
    }

    #[test]
    fn tampering_fails_authentication() {
        let sealed = seal("hello", &key(1), [0; NONCE_SIZE]);
        let mut bytes = hex::decode(&sealed).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;

        assert_eq!(open(&hex::encode(bytes), &key(1)), Err(CryptoError::DecryptionFailed));
    }

    #[test]
    fn malformed_text_is_rejected() {
        assert!(matches!(open("zz", &key(1)), Err(CryptoError::MalformedCiphertext { .. })));
        assert!(matches!(open("00ff", &key(1)), Err(CryptoError::MalformedCiphertext { .. })));
    }

    proptest! {
        #[test]
        fn prop_any_text_survives(plaintext in ".*", nonce in any::<[u8; NONCE_SIZE]>()) {
            let sealed = seal(&plaintext, &key(9), nonce);
            prop_assert_eq!(open(&sealed, &key(9)).unwrap(), plaintext);
        }
    }
}
