//! Fuzz target for IPC frame and message decoding.
//!
//! Arbitrary bytes must never panic the frame codec or the JSON payload
//! decoder, and must never allocate past the configured frame cap.

#![no_main]

use gg_trust::ipc::{decode_message, FrameCodec, ProtocolVersion};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let codec = FrameCodec::new(64 * 1024, ProtocolVersion::V2);
    if let Ok(frame) = codec.decode_frame(data) {
        assert!(frame.payload.len() <= codec.max_message_bytes());
        let _ = decode_message(&frame.payload);
    }
});
