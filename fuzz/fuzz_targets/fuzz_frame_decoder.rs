//! Fuzz target: RPC `FrameDecoder::feed` and message decoding
//!
//! Drives arbitrary byte sequences into the length-prefix decoder and
//! asserts that it never panics, never yields an empty or oversized
//! payload, and that every yielded payload decodes or fails cleanly.
//!
//! cargo fuzz run fuzz_frame_decoder

#![no_main]

use libfuzzer_sys::fuzz_target;
use plcbridge::rpc::codec::{FrameDecoder, MAX_FRAME_SIZE};
use plcbridge::rpc::messages::{self, Request};

fuzz_target!(|data: &[u8]| {
    let mut decoder = FrameDecoder::new();

    // Split at an arbitrary point to exercise partial headers.
    let split = data.first().map_or(0, |&b| b as usize).min(data.len());
    for part in [&data[..split], &data[split..]] {
        if decoder.feed(part).is_err() {
            break;
        }
    }

    while let Some(payload) = decoder.next_frame() {
        assert!(payload.len() <= MAX_FRAME_SIZE, "payload exceeds MAX_FRAME_SIZE");
        assert!(!payload.is_empty(), "decoder must not yield empty payload");
        let _ = messages::decode::<Request>(&payload);
    }

    // After a reset the decoder must accept bytes cleanly again.
    decoder.reset();
    let _ = decoder.feed(data);
});
