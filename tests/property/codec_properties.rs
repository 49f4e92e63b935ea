//! Property-based tests for the packet codec.
//!
//! Uses proptest to verify:
//! 1. Arbitrary text never panics any decoder (errors are returned instead).
//! 2. Any event packet survives encode → decode.
//! 3. Polling payloads split back into exactly the packets that were joined.
//! 4. Inbound event decoding never panics on arbitrary JSON payloads.

use proptest::prelude::*;
use serde_json::{Map, Value, json};
use sitesync_proto::codec::{self, EnginePacket, RECORD_SEPARATOR, SocketPacket};
use sitesync_proto::event::InboundEvent;

/// Strategy for flat JSON values (no nesting).
fn arb_leaf() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| json!(n)),
        "[^\u{1e}]{0,32}".prop_map(Value::String),
    ]
}

/// Strategy for JSON values up to a few levels deep.
fn arb_json() -> impl Strategy<Value = Value> {
    arb_leaf().prop_recursive(3, 32, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
            prop::collection::btree_map("[a-z_]{1,12}", inner, 0..6)
                .prop_map(|m| Value::Object(m.into_iter().collect::<Map<_, _>>())),
        ]
    })
}

/// Strategy for event names.
fn arb_event_name() -> impl Strategy<Value = String> {
    "[a-z_]{1,24}"
}

/// Strategy for Engine.IO packets that can appear in a polling payload.
fn arb_engine_packet() -> impl Strategy<Value = EnginePacket> {
    prop_oneof![
        Just(EnginePacket::Close),
        "[a-z]{0,8}".prop_map(EnginePacket::Ping),
        "[a-z]{0,8}".prop_map(EnginePacket::Pong),
        "[^\u{1e}]{0,64}".prop_map(EnginePacket::Message),
        Just(EnginePacket::Noop),
    ]
}

proptest! {
    #[test]
    fn engine_decode_never_panics(input in ".*") {
        let _ = EnginePacket::decode(&input);
        let _ = codec::decode_payload(&input);
    }

    #[test]
    fn socket_decode_never_panics(input in ".*") {
        let _ = SocketPacket::decode(&input);
    }

    #[test]
    fn socket_decode_never_panics_on_event_like_input(
        digits in "[0-9]{0,24}",
        body in ".*",
    ) {
        let _ = SocketPacket::decode(&format!("2{digits}{body}"));
        let _ = SocketPacket::decode(&format!("2/,{digits}{body}"));
    }

    #[test]
    fn event_packet_survives_encode_decode(
        name in arb_event_name(),
        data in arb_json(),
        ack in proptest::option::of(any::<u64>()),
    ) {
        let packet = SocketPacket::Event { name, data, ack };
        let encoded = packet.encode().unwrap();
        prop_assert_eq!(SocketPacket::decode(&encoded).unwrap(), packet);
    }

    #[test]
    fn polling_payload_preserves_packets(
        packets in prop::collection::vec(arb_engine_packet(), 1..12),
    ) {
        let body = codec::encode_payload(&packets).unwrap();
        prop_assert_eq!(body.matches(RECORD_SEPARATOR).count(), packets.len() - 1);
        prop_assert_eq!(codec::decode_payload(&body).unwrap(), packets);
    }

    #[test]
    fn inbound_decode_never_panics(
        name in prop_oneof![
            Just("new_message".to_string()),
            Just("chat_history".to_string()),
            Just("user_typing".to_string()),
            Just("notification".to_string()),
            Just("pending_notifications".to_string()),
            Just("badge_update".to_string()),
            Just("alert_broadcast".to_string()),
            Just("presence_update".to_string()),
            arb_event_name(),
        ],
        data in arb_json(),
    ) {
        let _ = InboundEvent::decode(&name, data);
    }
}
