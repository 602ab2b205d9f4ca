//! Fuzz target for ciphertext parsing and authentication
//!
//! # Invariants
//!
//! - Opening arbitrary text never panics
//! - Arbitrary bytes never authenticate under a fixed key unless they were
//!   sealed with it

#![no_main]

use libfuzzer_sys::fuzz_target;
use tidewire_crypto::{SecretKey, open, seal};

fuzz_target!(|data: (&str, [u8; 24], &str)| {
    let (plaintext, nonce, garbage) = data;
    let key = SecretKey::from_bytes([0x5A; 32]);

    let _ = open(garbage, &key);

    let sealed = seal(plaintext, &key, nonce);
    assert_eq!(open(&sealed, &key).as_deref(), Ok(plaintext));
});
