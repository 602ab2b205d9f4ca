//! Cryptographic errors

use thiserror::Error;

/// Errors from the encryption capability.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Ciphertext text is not hex or is too short to hold nonce and tag
    #[error("malformed ciphertext: {reason}")]
    MalformedCiphertext {
        /// What was wrong
        reason: String,
    },

    /// Authentication tag did not verify (wrong key or tampered ciphertext)
    #[error("decryption failed: authentication failed")]
    DecryptionFailed,

    /// Decrypted bytes are not UTF-8 text
    #[error("decrypted payload is not valid UTF-8")]
    InvalidUtf8,

    /// Key material of the wrong size
    #[error("invalid key length: expected 32 bytes, got {len}")]
    InvalidKeyLength {
        /// Length supplied
        len: usize,
    },

    /// OS randomness unavailable
    #[error("random number generator failed: {0}")]
    Randomness(String),
}

impl CryptoError {
    /// Returns true if the input itself is bad and retrying cannot help.
    pub fn is_permanent(&self) -> bool {
        !matches!(self, Self::Randomness(_))
    }
}
