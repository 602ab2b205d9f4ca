//! Fuzz target for signaling envelope decoding
//!
//! Relay frames are attacker-controlled text.
//!
//! # Invariants
//!
//! - Decoding never panics
//! - Anything that decodes re-encodes, and the re-encoding decodes to the
//!   same envelope

#![no_main]

use libfuzzer_sys::fuzz_target;
use tidewire_core::SignalingEnvelope;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else { return };
    let Ok(envelope) = SignalingEnvelope::from_json(text) else { return };

    let encoded = envelope.to_json().expect("decoded envelope must re-encode");
    let decoded = SignalingEnvelope::from_json(&encoded).expect("re-encoded envelope must decode");
    assert_eq!(decoded, envelope);
});
