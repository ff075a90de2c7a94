//! IPC Protocol Fuzzing Tests
//!
//! Malformed frames, boundary lengths and hostile payloads.

use gg_trust::ipc::{
    decode_message, FrameCodec, IpcMessage, ProtocolError, ProtocolVersion,
    DEFAULT_MAX_MESSAGE_BYTES, FRAME_HEADER_LEN,
};
use rand::{Rng, SeedableRng};

fn frame(length: u32, version: u16, payload: &[u8]) -> Vec<u8> {
    let mut bytes = length.to_be_bytes().to_vec();
    bytes.extend_from_slice(&version.to_be_bytes());
    bytes.extend_from_slice(payload);
    bytes
}

/// Maximum declared length is rejected from the header alone.
#[test]
fn reject_u32_max_length() {
    let codec = FrameCodec::default();
    let result = codec.decode_header(&frame(u32::MAX, 2, &[]));
    assert!(matches!(result, Err(ProtocolError::MessageTooLarge { .. })));
}

/// One byte over the cap is rejected; the cap itself is fine.
#[test]
fn length_boundary() {
    let codec = FrameCodec::default();
    let cap = DEFAULT_MAX_MESSAGE_BYTES as u32;
    assert!(codec.decode_header(&frame(cap, 2, &[])).is_ok());
    assert!(matches!(
        codec.decode_header(&frame(cap + 1, 2, &[])),
        Err(ProtocolError::MessageTooLarge { .. })
    ));
}

/// Version zero is treated as a downgrade.
#[test]
fn reject_version_zero() {
    let codec = FrameCodec::default();
    assert!(matches!(
        codec.decode_header(&frame(0, 0, &[])),
        Err(ProtocolError::UnsupportedVersion { requested: 0, .. })
    ));
}

/// Every header shorter than six bytes is malformed.
#[test]
fn reject_short_headers() {
    let codec = FrameCodec::default();
    for len in 0..FRAME_HEADER_LEN {
        assert!(matches!(
            codec.decode_frame(&vec![0u8; len]),
            Err(ProtocolError::Malformed(_))
        ));
    }
}

/// Empty payload decodes as a frame but not as a message.
#[test]
fn empty_payload_is_not_a_message() {
    let codec = FrameCodec::default();
    let decoded = codec.decode_frame(&frame(0, 2, &[])).unwrap();
    assert!(decoded.payload.is_empty());
    assert!(decode_message(&decoded.payload).is_err());
}

/// Invalid JSON rejected.
#[test]
fn reject_invalid_json() {
    assert!(decode_message(b"{ not valid json }}}").is_err());
}

/// Missing required type field rejected.
#[test]
fn reject_missing_type_field() {
    assert!(decode_message(br#"{ "foo": "bar" }"#).is_err());
}

/// Null bytes in JSON handled safely.
#[test]
fn handle_null_bytes_in_json() {
    assert!(decode_message(b"{ \"type\": \"error\"\x00, \"code\": 1 }").is_err());
}

/// Invalid UTF-8 rejected.
#[test]
fn reject_invalid_utf8() {
    assert!(decode_message(b"{\"type\":\"handshake\",\"token\":\"\xff\xfe\"}").is_err());
}

/// Deep nesting is refused without exhausting the stack.
#[test]
fn deep_nesting_rejected() {
    let mut nested = String::from(r#"{"type":"handshake","token":"#);
    nested.push_str(&"[".repeat(10_000));
    nested.push_str(&"]".repeat(10_000));
    nested.push('}');
    assert!(decode_message(nested.as_bytes()).is_err());
}

/// Wrong field types rejected.
#[test]
fn reject_type_confusion() {
    let cases: [&[u8]; 4] = [
        br#"{"type":"handshake","token":42}"#,
        br#"{"type":"inference_request","request_id":"x","model_id":"m","prompt_tokens":[1]}"#,
        br#"{"type":"inference_request","request_id":1,"model_id":"m","prompt_tokens":[-1]}"#,
        br#"{"type":"handshake","token":"t","protocol_version":70000}"#,
    ];
    for case in cases {
        assert!(matches!(decode_message(case), Err(ProtocolError::Malformed(_))));
    }
}

/// Extra fields do not smuggle in behavior.
#[test]
fn extra_fields_ignored_not_trusted() {
    let decoded = decode_message(br#"{"type":"health_check","admin":true}"#).unwrap();
    assert_eq!(decoded, IpcMessage::HealthCheck);
}

/// Random byte strings never panic the decoder.
#[test]
fn random_frames_never_panic() {
    let codec = FrameCodec::new(4096, ProtocolVersion::V2);
    let mut rng = rand::rngs::StdRng::seed_from_u64(0x5eed);
    for _ in 0..5000 {
        let len = rng.gen_range(0..64);
        let bytes: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
        if let Ok(decoded) = codec.decode_frame(&bytes) {
            let _ = decode_message(&decoded.payload);
        }
    }
}
