//! Cache-fronted encryption and decryption under the active key.

use std::{num::NonZeroUsize, sync::Arc};

use tidewire_crypto::SecretKey;
use tidewire_scheduler::{CryptoOutput, CryptoRequest, CryptoTaskScheduler};

use crate::{cache::DecryptionCache, error::InboxError};

/// Receive-path glue between the [`DecryptionCache`] and the scheduler.
///
/// Plaintexts are cached by ciphertext, so the cache is cleared whenever the
/// key or the conversation changes.
pub struct SecureInbox {
    scheduler: Arc<CryptoTaskScheduler>,
    cache: DecryptionCache,
    key: Option<SecretKey>,
    context: Option<String>,
}

impl SecureInbox {
    /// Create an inbox with no key and an empty cache.
    pub fn new(scheduler: Arc<CryptoTaskScheduler>, cache_capacity: NonZeroUsize) -> Self {
        Self { scheduler, cache: DecryptionCache::new(cache_capacity), key: None, context: None }
    }

    /// Install a new active key. Clears the cache.
    pub fn set_key(&mut self, key: SecretKey) {
        self.key = Some(key);
        self.cache.clear();
        tracing::info!("inbox key changed, cache cleared");
    }

    /// Switch conversation. Clears the cache if the context changed.
    pub fn set_context(&mut self, context: impl Into<String>) {
        let context = context.into();
        if self.context.as_deref() == Some(context.as_str()) {
            return;
        }
        tracing::debug!(context = %context, "inbox context changed, cache cleared");
        self.context = Some(context);
        self.cache.clear();
    }

    /// Active conversation, if set.
    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    /// Plaintext cache.
    pub fn cache(&self) -> &DecryptionCache {
        &self.cache
    }

    /// Decrypt one message, consulting the cache first.
    pub async fn decrypt(&mut self, ciphertext: &str) -> Result<String, InboxError> {
        if let Some(plaintext) = self.cache.get(ciphertext) {
            return Ok(plaintext.to_string());
        }

        let key = self.key.clone().ok_or(InboxError::NoKey)?;
        let output = self
            .scheduler
            .submit(CryptoRequest::Decrypt { ciphertext: ciphertext.to_string(), key })
            .await?;
        let plaintext = text(output)?;

        self.cache.set(ciphertext, plaintext.clone());
        Ok(plaintext)
    }

    /// Decrypt a batch in order.
    ///
    /// Cache hits are served locally; misses go to the scheduler as one
    /// fail-fast batch.
    pub async fn decrypt_all(&mut self, ciphertexts: &[String]) -> Result<Vec<String>, InboxError> {
        let mut plaintexts: Vec<Option<String>> =
            ciphertexts.iter().map(|c| self.cache.get(c).map(str::to_string)).collect();

        let misses: Vec<usize> =
            plaintexts.iter().enumerate().filter(|(_, p)| p.is_none()).map(|(i, _)| i).collect();

        if !misses.is_empty() {
            let key = self.key.clone().ok_or(InboxError::NoKey)?;
            let requests = misses.iter().map(|&i| CryptoRequest::Decrypt {
                ciphertext: ciphertexts[i].clone(),
                key: key.clone(),
            });
            let outputs = self.scheduler.submit_batch(requests).await?;

            for (&i, output) in misses.iter().zip(outputs) {
                let plaintext = text(output)?;
                self.cache.set(ciphertexts[i].clone(), plaintext.clone());
                plaintexts[i] = Some(plaintext);
            }
        }

        tracing::debug!(total = ciphertexts.len(), misses = misses.len(), "batch decrypted");
        Ok(plaintexts.into_iter().flatten().collect())
    }

    /// Encrypt under the active key.
    pub async fn encrypt(&self, plaintext: &str) -> Result<String, InboxError> {
        let key = self.key.clone().ok_or(InboxError::NoKey)?;
        let output = self
            .scheduler
            .submit(CryptoRequest::Encrypt { plaintext: plaintext.to_string(), key })
            .await?;
        text(output)
    }

    /// Derive a key on a worker. Does not install it.
    pub async fn derive_key(
        &self,
        secret: &[u8],
        salt: &[u8],
        info: &[u8],
    ) -> Result<SecretKey, InboxError> {
        let request = CryptoRequest::DeriveKey {
            secret: secret.to_vec(),
            salt: salt.to_vec(),
            info: info.to_vec(),
        };
        self.scheduler
            .submit(request)
            .await?
            .into_key()
            .ok_or(InboxError::UnexpectedOutput { expected: "key" })
    }
}

fn text(output: CryptoOutput) -> Result<String, InboxError> {
    output.into_text().ok_or(InboxError::UnexpectedOutput { expected: "text" })
}
