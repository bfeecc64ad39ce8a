//! Fuzz target for inbox envelope decoding.

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(envelope) = echonet_p2p::Envelope::from_slice(data) {
        let _ = envelope.sealed();
        let _ = echonet_p2p::Envelope::associated_data(&envelope.from, &envelope.to);
    }
});
