//! Fuzz target for STOMP frame decoding
//!
//! Feeds arbitrary text to the raw decoder and both typed parsers. Broker
//! input is untrusted: every malformed frame must come back as an error,
//! never a panic.

#![no_main]

use libfuzzer_sys::fuzz_target;
use parley_proto::{ClientFrame, Frame, ServerFrame};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(frame) = Frame::decode(text) {
        // Whatever decodes must encode again without panicking.
        let _ = frame.encode();
    }
    let _ = ServerFrame::parse(text);
    let _ = ClientFrame::parse(text);
});
