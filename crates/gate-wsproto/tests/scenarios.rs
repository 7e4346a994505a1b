//! Cross-protocol behavior through the `Protocol` enum.

use std::sync::Arc;

use assert_matches::assert_matches;
use gate_wsproto::testing::MockConn;
use gate_wsproto::{MessageType, ProtoError, Protocol, SUPPORTED_SUBPROTOCOLS, absinthe_subscription_id};
use proptest::prelude::*;
use serde_json::Value;
use serde_json::value::RawValue;

fn raw(s: &str) -> Box<RawValue> {
    RawValue::from_string(s.to_owned()).unwrap()
}

fn handshake_for(subprotocol: &str) -> &'static str {
    match subprotocol {
        "absinthe" => r#"["1","1","__absinthe__:control","phx_join",{}]"#,
        _ => r#"{"type":"connection_init","payload":{}}"#,
    }
}

fn subscribe_for(subprotocol: &str, id: &str) -> String {
    match subprotocol {
        "graphql-transport-ws" => format!(r#"{{"id":"{id}","type":"subscribe","payload":{{"query":"subscription {{ a }}"}}}}"#),
        "graphql-ws" => format!(r#"{{"id":"{id}","type":"start","payload":{{"query":"subscription {{ a }}"}}}}"#),
        _ => format!(r#"["1","{id}","__absinthe__:control","doc",{{"query":"subscription {{ a }}"}}]"#),
    }
}

#[test]
fn wrong_first_message_writes_nothing_for_every_protocol() {
    let wrong = [
        r#"{"type":"subscribe","id":"1"}"#,
        r#"{"type":"ping"}"#,
        r#"[null,"1","phoenix","heartbeat",{}]"#,
        "not json",
    ];
    for name in SUPPORTED_SUBPROTOCOLS {
        for first in wrong {
            let proto = Protocol::new(name, MockConn::with_messages([first])).unwrap();
            assert!(proto.initialize().is_err(), "{name} accepted {first}");
            assert!(proto.conn().written().is_empty(), "{name} wrote after {first}");
        }
    }
}

#[test]
fn read_before_handshake_fails_for_every_protocol() {
    for name in SUPPORTED_SUBPROTOCOLS {
        let proto = Protocol::new(name, MockConn::with_messages([handshake_for(name)])).unwrap();
        assert_matches!(proto.read_message(), Err(ProtoError::NotInitialized));
    }
}

#[test]
fn transport_ws_init_is_acked() {
    let proto = Protocol::new("graphql-transport-ws", MockConn::with_messages([r#"{"type":"connection_init"}"#])).unwrap();
    let _ = proto.initialize().unwrap();
    assert_eq!(proto.conn().written(), vec![r#"{"type":"connection_ack"}"#]);
}

#[test]
fn legacy_done_writes_complete() {
    let proto = Protocol::new(
        "graphql-ws",
        MockConn::with_messages([handshake_for("graphql-ws").to_owned(), subscribe_for("graphql-ws", "1")]),
    )
    .unwrap();
    let _ = proto.initialize().unwrap();
    let _ = proto.read_message().unwrap();
    let _ = proto.conn().take_written();

    proto.done("1").unwrap();
    assert_eq!(proto.conn().written(), vec![r#"{"id":"1","type":"complete"}"#]);
}

#[test]
fn absinthe_doc_yields_subscribe_and_ack() {
    let proto = Protocol::new(
        "absinthe",
        MockConn::with_messages([handshake_for("absinthe").to_owned(), subscribe_for("absinthe", "2")]),
    )
    .unwrap();
    let _ = proto.initialize().unwrap();
    let _ = proto.conn().take_written();

    let msg = proto.read_message().unwrap();
    assert_eq!(msg.kind, MessageType::Subscribe);
    assert_eq!(msg.id, absinthe_subscription_id("2"));

    let written = proto.conn().written_json();
    assert_eq!(written.len(), 1);
    assert_eq!(written[0][3], "phx_reply");
    assert_eq!(written[0][4]["response"]["subscriptionId"], Value::String(msg.id));
}

/// The id and data a client decodes from a data frame, per protocol.
fn decode_data(subprotocol: &str, frame: &Value) -> (String, Value) {
    match subprotocol {
        "absinthe" => (
            frame[4]["subscriptionId"].as_str().unwrap().to_owned(),
            frame[4]["result"].clone(),
        ),
        _ => (frame["id"].as_str().unwrap().to_owned(), frame["payload"].clone()),
    }
}

#[test]
fn data_frames_carry_id_and_payload() {
    for name in SUPPORTED_SUBPROTOCOLS {
        let proto = Protocol::new(
            name,
            MockConn::with_messages([handshake_for(name).to_owned(), subscribe_for(name, "1")]),
        )
        .unwrap();
        let _ = proto.initialize().unwrap();
        let id = proto.read_message().unwrap().id;
        let _ = proto.conn().take_written();

        proto.write_graphql_data(&id, &raw(r#"{"field":1}"#), None).unwrap();
        let written = proto.conn().written_json();
        assert_eq!(written.len(), 1, "{name}");
        let (decoded_id, data) = decode_data(name, &written[0]);
        assert_eq!(decoded_id, id, "{name}");
        assert_eq!(data, serde_json::json!({"field": 1}), "{name}");
    }
}

#[test]
fn results_after_done_are_rejected_for_every_protocol() {
    for name in SUPPORTED_SUBPROTOCOLS {
        let proto = Protocol::new(
            name,
            MockConn::with_messages([handshake_for(name).to_owned(), subscribe_for(name, "1")]),
        )
        .unwrap();
        let _ = proto.initialize().unwrap();
        let id = proto.read_message().unwrap().id;
        assert_eq!(proto.open_operations(), vec![id.clone()]);

        proto.done(&id).unwrap();
        let _ = proto.conn().take_written();
        assert_matches!(
            proto.write_graphql_data(&id, &raw("{}"), None),
            Err(ProtoError::UnknownOperation(_))
        );
        assert_matches!(proto.done(&id), Err(ProtoError::UnknownOperation(_)));
        assert!(proto.conn().written().is_empty(), "{name}");
    }
}

#[test]
fn concurrent_writers_never_interleave_done_before_data() {
    let conn = Arc::new(MockConn::with_messages([
        handshake_for("graphql-transport-ws").to_owned(),
        subscribe_for("graphql-transport-ws", "1"),
    ]));
    let proto = Arc::new(Protocol::new("graphql-transport-ws", conn.clone()).unwrap());
    let _ = proto.initialize().unwrap();
    let _ = proto.read_message().unwrap();
    let _ = conn.take_written();

    let writers: Vec<_> = (0..4)
        .map(|_| {
            let proto = proto.clone();
            std::thread::spawn(move || {
                for _ in 0..50 {
                    let _ = proto.write_graphql_data("1", &raw(r#"{"data":{}}"#), None);
                }
            })
        })
        .collect();
    std::thread::sleep(std::time::Duration::from_millis(5));
    proto.done("1").unwrap();
    for writer in writers {
        writer.join().unwrap();
    }

    let frames = conn.written_json();
    let complete_at = frames.iter().position(|f| f["type"] == "complete").unwrap();
    assert_eq!(complete_at, frames.len() - 1);
}

proptest! {
    #[test]
    fn absinthe_ids_are_deterministic_and_distinct(a in "[a-z0-9]{1,16}", b in "[a-z0-9]{1,16}") {
        prop_assert_eq!(absinthe_subscription_id(&a), absinthe_subscription_id(&a));
        if a != b {
            prop_assert_ne!(absinthe_subscription_id(&a), absinthe_subscription_id(&b));
        }
        let id = absinthe_subscription_id(&a);
        let prefix = format!("__absinthe__:doc:{a}:");
        prop_assert!(id.starts_with(&prefix));
    }
}
