#![no_main]

// Whatever a container writes, decoding yields an outcome; a reply with both
// a value and an error is always a platform failure.

use libfuzzer_sys::fuzz_target;
use smartlambda_core::execution::outcome::{decode_response, ExecutionReturnValue};
use smartlambda_core::ExecutionOutcome;

fuzz_target!(|bytes: &[u8]| {
    let outcome = decode_response(bytes);
    if let Ok(reply) = serde_json::from_slice::<ExecutionReturnValue>(bytes) {
        if reply.value.is_some() && reply.error.is_some() {
            assert!(matches!(outcome, ExecutionOutcome::PlatformFailure { .. }));
        }
    }
});
