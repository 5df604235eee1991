//! Property-based tests for the frame codec.
//!
//! These tests verify:
//! - Binary roundtrip for arbitrary data-path frames
//! - Resize payload layout invariants
//! - Decoders never panic on arbitrary input
//! - JSON version guard behavior

#![cfg(test)]

use proptest::prelude::*;

use crate::constants::PROTOCOL_VERSION;
use crate::protocol::{decode_binary, decode_text, encode_binary, encode_json, Frame};

// =============================================================================
// Arbitrary Generators
// =============================================================================

/// Session ids as they appear on the wire: arbitrary UTF-8, bounded length.
fn arb_session_id() -> impl Strategy<Value = String> {
    // Cover ASCII uuid-shaped ids plus arbitrary unicode
    prop_oneof![
        "[A-Z0-9-]{1,40}",
        any::<String>().prop_filter("wire limit", |s| s.len() <= 1024),
    ]
}

fn arb_data_frame() -> impl Strategy<Value = Frame> {
    prop_oneof![
        (arb_session_id(), prop::collection::vec(any::<u8>(), 0..2048)).prop_map(
            |(session_id, data)| Frame::Stdin { session_id, data }
        ),
        (arb_session_id(), prop::collection::vec(any::<u8>(), 0..2048)).prop_map(
            |(session_id, data)| Frame::Stdout { session_id, data }
        ),
        (arb_session_id(), any::<u16>(), any::<u16>()).prop_map(|(session_id, rows, cols)| {
            Frame::Resize {
                session_id,
                rows,
                cols,
            }
        }),
        Just(Frame::Ping),
        Just(Frame::Pong),
    ]
}

fn arb_control_frame() -> impl Strategy<Value = Frame> {
    prop_oneof![
        Just(Frame::List),
        Just(Frame::Create),
        arb_session_id().prop_map(|session_id| Frame::Close { session_id }),
        prop::collection::vec(arb_session_id(), 0..8)
            .prop_map(|sessions| Frame::SessionList { sessions }),
        arb_session_id().prop_map(|session_id| Frame::SessionCreated { session_id }),
        arb_session_id().prop_map(|session_id| Frame::SessionClosed { session_id }),
        arb_session_id().prop_map(|session_id| Frame::SessionAssigned { session_id }),
        ("[a-z_]{1,24}", "[ -~]{0,64}")
            .prop_map(|(code, message)| Frame::Error { code, message }),
        any::<u64>().prop_map(|version| Frame::Unsupported { version }),
    ]
}

// =============================================================================
// Property Tests
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(1000))]

    #[test]
    fn binary_roundtrip(frame in arb_data_frame()) {
        let encoded = encode_binary(&frame).unwrap();
        let decoded = decode_binary(&encoded).unwrap();
        prop_assert_eq!(frame, decoded);
    }

    #[test]
    fn resize_payload_is_exactly_four_bytes(
        session_id in arb_session_id(),
        rows in any::<u16>(),
        cols in any::<u16>(),
    ) {
        let frame = Frame::Resize { session_id: session_id.clone(), rows, cols };
        let encoded = encode_binary(&frame).unwrap();
        prop_assert_eq!(encoded.len(), 4 + session_id.len() + 4);
        match decode_binary(&encoded) {
            Some(Frame::Resize { rows: r, cols: c, .. }) => {
                prop_assert_eq!(r, rows);
                prop_assert_eq!(c, cols);
            }
            other => prop_assert!(false, "unexpected decode: {:?}", other),
        }
    }

    #[test]
    fn binary_decode_never_panics(data in prop::collection::vec(any::<u8>(), 0..4096)) {
        // May return None or any frame, but must not panic
        let _ = decode_binary(&data);
    }

    #[test]
    fn bad_version_byte_decodes_to_unsupported(
        version in (0u8..=255).prop_filter("non-v1", |v| *v != PROTOCOL_VERSION),
        rest in prop::collection::vec(any::<u8>(), 0..64),
    ) {
        let mut data = vec![version];
        data.extend(rest);
        match decode_binary(&data) {
            Some(Frame::Unsupported { version: v }) => prop_assert_eq!(v, version as u64),
            other => prop_assert!(false, "expected Unsupported, got {:?}", other),
        }
    }

    #[test]
    fn json_roundtrip(frame in arb_control_frame()) {
        let text = encode_json(&frame).unwrap();
        let decoded = decode_text(&text).unwrap();
        prop_assert_eq!(frame, decoded);
    }

    #[test]
    fn json_decode_never_panics(text in any::<String>()) {
        let _ = decode_text(&text);
    }

    #[test]
    fn json_version_guard(v in (2u64..)) {
        let text = format!(r#"{{"v":{},"type":"list"}}"#, v);
        prop_assert_eq!(decode_text(&text), Some(Frame::Unsupported { version: v }));
    }

    #[test]
    fn json_encoder_always_injects_v1(frame in arb_control_frame()) {
        let text = encode_json(&frame).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        prop_assert_eq!(&value["v"], &serde_json::json!(1));
    }
}
