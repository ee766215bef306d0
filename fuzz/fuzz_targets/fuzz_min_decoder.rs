//! Fuzz target: `MinDecoder::feed`
//!
//! Feeds arbitrary serial-line bytes to the MIN decoder. It must never
//! panic, never yield a payload over 255 bytes, and every frame it does
//! yield must re-encode and decode to itself.
//!
//! cargo fuzz run fuzz_min_decoder

#![no_main]

use libfuzzer_sys::fuzz_target;
use plcbridge::link::codec::{MAX_PAYLOAD, MinDecoder, encode_frame};

fuzz_target!(|data: &[u8]| {
    let mut decoder = MinDecoder::new();
    let mut frames = Vec::new();
    decoder.feed(data, &mut frames);

    for frame in frames {
        assert!(frame.payload.len() <= MAX_PAYLOAD);
        assert!(frame.id <= 0x3F, "id must be masked to 6 bits");

        let mut wire = Vec::new();
        encode_frame(frame.id, &frame.payload, &mut wire).expect("decoded payload fits");
        let mut again = Vec::new();
        MinDecoder::new().feed(&wire, &mut again);
        assert_eq!(again, vec![frame]);
    }
});
