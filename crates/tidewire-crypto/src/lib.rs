//! Tidewire Cryptographic Capability
//!
//! The connection and scheduling layers treat encryption as an opaque
//! capability: `encrypt(plaintext, key)`, `decrypt(ciphertext, key)` and
//! `derive_key(secret, salt, info)`, expressed as [`CryptoProvider`].
//! [`XChaChaProvider`] is the default implementation.
//!
//! # Ciphertext Format
//!
//! ```text
//! hex( nonce[24] || ciphertext || tag[16] )
//! ```
//!
//! The text form doubles as the decryption cache key.
//!
//! # Security
//!
//! - XChaCha20-Poly1305 AEAD: failed tag verification rejects the message
//! - Random 24-byte nonce per message
//! - Keys derived with HKDF-SHA256 and zeroized on drop

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod aead;
pub mod error;
pub mod key;
pub mod provider;

pub use aead::{NONCE_SIZE, TAG_SIZE, open, seal};
pub use error::CryptoError;
pub use key::{KEY_SIZE, SecretKey, derive_key};
pub use provider::{CryptoProvider, XChaChaProvider};
