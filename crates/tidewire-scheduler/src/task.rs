//! Task identity and the worker message boundary

use std::fmt;

use tidewire_crypto::{CryptoError, SecretKey};

/// Monotonic task identifier, unique per scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    /// Wrap a raw id.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw id.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of cryptographic operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// Plaintext to ciphertext
    Encrypt,
    /// Ciphertext to plaintext
    Decrypt,
    /// Shared secret to symmetric key
    DeriveKey,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Encrypt => "encrypt",
            Self::Decrypt => "decrypt",
            Self::DeriveKey => "derive_key",
        })
    }
}

/// A task owned by the scheduler until it resolves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CryptoTask<P, I> {
    /// Assigned at submission
    pub id: TaskId,
    /// Operation kind
    pub kind: TaskKind,
    /// Operation input
    pub payload: P,
    /// Submission instant, used for latency
    pub submitted_at: I,
}

/// Input of one cryptographic operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CryptoRequest {
    /// Encrypt text under a key
    Encrypt {
        /// Text to seal
        plaintext: String,
        /// Active key
        key: SecretKey,
    },
    /// Decrypt ciphertext text under a key
    Decrypt {
        /// Sealed text
        ciphertext: String,
        /// Active key
        key: SecretKey,
    },
    /// Derive a key from shared secret material
    DeriveKey {
        /// Input keying material
        secret: Vec<u8>,
        /// Optional salt (empty for none)
        salt: Vec<u8>,
        /// Context string
        info: Vec<u8>,
    },
}

impl CryptoRequest {
    /// Kind of this request.
    pub fn kind(&self) -> TaskKind {
        match self {
            Self::Encrypt { .. } => TaskKind::Encrypt,
            Self::Decrypt { .. } => TaskKind::Decrypt,
            Self::DeriveKey { .. } => TaskKind::DeriveKey,
        }
    }
}

/// Result value of one cryptographic operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CryptoOutput {
    /// Ciphertext or plaintext text
    Text(String),
    /// Derived key
    Key(SecretKey),
}

impl CryptoOutput {
    /// Text result, if this is one.
    pub fn into_text(self) -> Option<String> {
        match self {
            Self::Text(text) => Some(text),
            Self::Key(_) => None,
        }
    }

    /// Key result, if this is one.
    pub fn into_key(self) -> Option<SecretKey> {
        match self {
            Self::Key(key) => Some(key),
            Self::Text(_) => None,
        }
    }
}

/// Message sent one-way to a worker.
#[derive(Debug)]
pub struct WorkerJob {
    /// Task being run
    pub task_id: TaskId,
    /// Operation input
    pub request: CryptoRequest,
}

/// Worker reply for one job.
#[derive(Debug)]
pub struct WorkerReport {
    /// Task that ran
    pub task_id: TaskId,
    /// Success value or the operation error
    pub outcome: Result<CryptoOutput, CryptoError>,
}
