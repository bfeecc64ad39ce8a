//! Fuzz target for broadcast announcement parsing and verification.

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(Some(announcement)) = echonet_p2p::Announcement::parse(data) {
        let _ = announcement.verify();
    }
});
