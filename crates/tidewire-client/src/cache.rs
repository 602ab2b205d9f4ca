//! Ciphertext to plaintext cache.
//!
//! Bounded LRU keyed by the raw ciphertext text. Purely an optimization: a
//! miss only costs a trip through the scheduler.

use std::num::NonZeroUsize;

use lru::LruCache;

/// Default number of cached plaintexts.
pub const DEFAULT_CACHE_CAPACITY: NonZeroUsize = match NonZeroUsize::new(100) {
    Some(capacity) => capacity,
    None => unreachable!(),
};

/// Bounded LRU cache of decrypted messages.
///
/// # Invariants
///
/// - `len() <= capacity()` at all times
/// - On insert into a full cache the least recently read or written entry is
///   evicted
pub struct DecryptionCache {
    entries: LruCache<String, String>,
}

impl Default for DecryptionCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

impl DecryptionCache {
    /// Create an empty cache holding at most `capacity` entries.
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self { entries: LruCache::new(capacity) }
    }

    /// Look up `ciphertext`, marking it most recently used on a hit.
    pub fn get(&mut self, ciphertext: &str) -> Option<&str> {
        self.entries.get(ciphertext).map(String::as_str)
    }

    /// Insert or overwrite, evicting the least recently used entry if full.
    pub fn set(&mut self, ciphertext: impl Into<String>, plaintext: impl Into<String>) {
        if let Some((evicted, _)) = self.entries.push(ciphertext.into(), plaintext.into()) {
            tracing::trace!(evicted_len = evicted.len(), "decryption cache eviction");
        }
    }

    /// Whether `ciphertext` is cached, without touching recency.
    pub fn contains(&self, ciphertext: &str) -> bool {
        self.entries.contains(ciphertext)
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of entries.
    pub fn capacity(&self) -> NonZeroUsize {
        self.entries.cap()
    }
}
