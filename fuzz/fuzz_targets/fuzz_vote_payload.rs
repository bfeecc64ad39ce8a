//! Fuzz target for peer vote payloads.

#![no_main]

use echonet_consensus::EchoKind;
use echonet_node::payload::ProposalVote;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(vote) = serde_json::from_slice::<ProposalVote>(data) {
        let _ = vote.vote.parse::<EchoKind>();
    }
    if let Ok(text) = std::str::from_utf8(data) {
        let _ = text.parse::<EchoKind>();
    }
});
