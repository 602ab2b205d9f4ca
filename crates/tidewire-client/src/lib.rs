//! Tidewire Client
//!
//! Application-facing pieces built on the connection manager and the crypto
//! scheduler:
//!
//! - [`Session`] / [`SessionHandle`]: one coordinator task per local peer
//! - [`SecureInbox`]: cache-fronted decrypt and encrypt under the active key
//! - [`DecryptionCache`]: bounded LRU of ciphertext to plaintext

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cache;
pub mod error;
pub mod inbox;
pub mod session;

pub use cache::{DEFAULT_CACHE_CAPACITY, DecryptionCache};
pub use error::{InboxError, SessionError};
pub use inbox::SecureInbox;
pub use session::{Session, SessionHandle};
