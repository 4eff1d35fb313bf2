#![no_main]

// Arbitrary bytes on the response stream must never panic or allocate past
// the configured bound, and a decoded frame re-encodes to the same prefix.

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use smartlambda_core::execution::frame::{read_frame, write_frame, LENGTH_PREFIX_BYTES};

#[derive(Arbitrary, Debug)]
struct Input {
    max_len: u16,
    bytes: Vec<u8>,
}

fuzz_target!(|input: Input| {
    let mut source = input.bytes.as_slice();
    if let Ok(payload) = read_frame(&mut source, u32::from(input.max_len)) {
        assert!(payload.len() <= usize::from(input.max_len));
        let mut encoded = Vec::new();
        write_frame(&mut encoded, &payload).unwrap();
        assert_eq!(&input.bytes[..LENGTH_PREFIX_BYTES + payload.len()], encoded.as_slice());
    }
});
