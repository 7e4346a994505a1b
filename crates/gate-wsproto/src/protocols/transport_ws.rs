//! `graphql-transport-ws`, the protocol of the `graphql-ws` library.

use serde_json::value::RawValue;

use crate::conn::{JsonConn, read_json, write_json};
use crate::errors::{ProtoError, Result};
use crate::message::{Message, MessageType};
use crate::operations::Operations;
use crate::wire::{ObjectMessage, merge_extensions};

/// Subprotocol name negotiated in `Sec-WebSocket-Protocol`.
pub const SUBPROTOCOL: &str = "graphql-transport-ws";

const CONNECTION_INIT: &str = "connection_init";
const CONNECTION_ACK: &str = "connection_ack";
const PING: &str = "ping";
const PONG: &str = "pong";
const SUBSCRIBE: &str = "subscribe";
const NEXT: &str = "next";
const ERROR: &str = "error";
const COMPLETE: &str = "complete";

/// `graphql-transport-ws` over a [`JsonConn`].
#[derive(Debug)]
pub struct TransportWsProtocol<C> {
    conn: C,
    ops: Operations,
}

impl<C: JsonConn> TransportWsProtocol<C> {
    /// Wrap `conn`. Nothing is read or written until [`initialize`](Self::initialize).
    pub fn new(conn: C) -> Self {
        Self {
            conn,
            ops: Operations::default(),
        }
    }

    /// Read `connection_init` and answer `connection_ack`.
    ///
    /// Returns the `connection_init` payload. Any other first message fails
    /// without writing to the connection.
    pub fn initialize(&self) -> Result<Option<Box<RawValue>>> {
        self.ops.ensure_uninitialized()?;
        let init: ObjectMessage = read_json(&self.conn)?;
        if init.kind != CONNECTION_INIT {
            return Err(ProtoError::Handshake {
                expected: CONNECTION_INIT,
                got: init.kind,
            });
        }
        write_json(&self.conn, &ObjectMessage::new(CONNECTION_ACK))?;
        self.ops.mark_initialized();
        Ok(init.payload)
    }

    /// Read and classify the next client message.
    pub fn read_message(&self) -> Result<Message> {
        self.ops.ensure_initialized()?;
        let msg: ObjectMessage = read_json(&self.conn)?;
        let kind = match msg.kind.as_str() {
            PING => MessageType::Ping,
            PONG => MessageType::Pong,
            SUBSCRIBE => {
                let _ = self.ops.open(&msg.id);
                MessageType::Subscribe
            }
            COMPLETE => {
                let _ = self.ops.release(&msg.id);
                MessageType::Complete
            }
            _ => return Err(ProtoError::UnsupportedMessageType(msg.kind)),
        };
        Ok(Message {
            id: msg.id,
            kind,
            payload: msg.payload,
        })
    }

    /// Answer a ping, echoing its payload.
    pub fn pong(&self, ping: &Message) -> Result<()> {
        let mut pong = ObjectMessage::new(PONG);
        pong.payload.clone_from(&ping.payload);
        write_json(&self.conn, &pong)
    }

    /// Send a `next` frame carrying `data` with `extensions` merged in.
    pub fn write_graphql_data(&self, id: &str, data: &RawValue, extensions: Option<&RawValue>) -> Result<()> {
        self.ops.with_open(id, || {
            let payload = merge_extensions(data, extensions)?;
            write_json(&self.conn, &ObjectMessage::with_id(NEXT, id).payload(payload))
        })
    }

    /// Send an `error` frame carrying the errors array. The frame has no
    /// room for extensions; they are dropped.
    pub fn write_graphql_errors(&self, id: &str, errors: &RawValue, _extensions: Option<&RawValue>) -> Result<()> {
        self.ops.with_open(id, || {
            write_json(&self.conn, &ObjectMessage::with_id(ERROR, id).payload(errors.to_owned()))
        })
    }

    /// Send `complete` and forget `id`.
    pub fn done(&self, id: &str) -> Result<()> {
        self.ops
            .finish(id, || write_json(&self.conn, &ObjectMessage::with_id(COMPLETE, id)))
    }

    /// Close the transport.
    pub fn close(&self, code: u16, reason: &str) -> Result<()> {
        self.conn.close(code, reason)
    }

    /// Ids subscribed and not yet done.
    pub fn open_operations(&self) -> Vec<String> {
        self.ops.list()
    }

    /// The underlying connection.
    pub fn conn(&self) -> &C {
        &self.conn
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::testing::MockConn;

    fn raw(s: &str) -> Box<RawValue> {
        RawValue::from_string(s.to_owned()).unwrap()
    }

    fn initialized(messages: &[&str]) -> TransportWsProtocol<MockConn> {
        let mut all = vec![r#"{"type":"connection_init"}"#];
        all.extend_from_slice(messages);
        let proto = TransportWsProtocol::new(MockConn::with_messages(all));
        let _ = proto.initialize().unwrap();
        let _ = proto.conn().take_written();
        proto
    }

    #[test]
    fn handshake_acks() {
        let proto = TransportWsProtocol::new(MockConn::with_messages([
            r#"{"type":"connection_init","payload":{"token":"t"}}"#,
        ]));
        let payload = proto.initialize().unwrap().unwrap();
        assert_eq!(payload.get(), r#"{"token":"t"}"#);
        assert_eq!(proto.conn().written(), vec![r#"{"type":"connection_ack"}"#]);
    }

    #[test]
    fn handshake_mismatch_writes_nothing() {
        let proto = TransportWsProtocol::new(MockConn::with_messages([r#"{"type":"subscribe","id":"1"}"#]));
        let err = proto.initialize().unwrap_err();
        assert_matches!(err, ProtoError::Handshake { expected: "connection_init", got } if got == "subscribe");
        assert!(proto.conn().written().is_empty());
    }

    #[test]
    fn read_before_initialize_fails() {
        let proto = TransportWsProtocol::new(MockConn::with_messages([r#"{"type":"ping"}"#]));
        assert_matches!(proto.read_message(), Err(ProtoError::NotInitialized));
    }

    #[test]
    fn second_initialize_fails() {
        let proto = initialized(&[]);
        assert_matches!(proto.initialize(), Err(ProtoError::AlreadyInitialized));
    }

    #[test]
    fn classifies_client_messages() {
        let proto = initialized(&[
            r#"{"type":"ping"}"#,
            r#"{"type":"pong"}"#,
            r#"{"id":"1","type":"subscribe","payload":{"query":"subscription { a }"}}"#,
            r#"{"id":"1","type":"complete"}"#,
        ]);
        let kinds: Vec<MessageType> = (0..4).map(|_| proto.read_message().unwrap().kind).collect();
        assert_eq!(
            kinds,
            vec![
                MessageType::Ping,
                MessageType::Pong,
                MessageType::Subscribe,
                MessageType::Complete
            ]
        );
    }

    #[test]
    fn unknown_type_is_rejected() {
        let proto = initialized(&[r#"{"type":"start","id":"1"}"#]);
        assert_matches!(proto.read_message(), Err(ProtoError::UnsupportedMessageType(t)) if t == "start");
    }

    #[test]
    fn pong_echoes_payload() {
        let proto = initialized(&[r#"{"type":"ping","payload":{"n":1}}"#]);
        let ping = proto.read_message().unwrap();
        proto.pong(&ping).unwrap();
        assert_eq!(proto.conn().written(), vec![r#"{"type":"pong","payload":{"n":1}}"#]);
    }

    #[test]
    fn data_errors_and_done_frames() {
        let proto = initialized(&[r#"{"id":"7","type":"subscribe","payload":{}}"#]);
        let _ = proto.read_message().unwrap();

        proto
            .write_graphql_data("7", &raw(r#"{"data":{"n":1}}"#), Some(&raw(r#"{"cost":2}"#)))
            .unwrap();
        proto
            .write_graphql_errors("7", &raw(r#"[{"message":"boom"}]"#), None)
            .unwrap();
        proto.done("7").unwrap();

        insta::assert_json_snapshot!(proto.conn().written_json(), @r#"
        [
          {
            "id": "7",
            "payload": {
              "data": {
                "n": 1
              },
              "extensions": {
                "cost": 2
              }
            },
            "type": "next"
          },
          {
            "id": "7",
            "payload": [
              {
                "message": "boom"
              }
            ],
            "type": "error"
          },
          {
            "id": "7",
            "type": "complete"
          }
        ]
        "#);
    }

    #[test]
    fn writes_for_unknown_ids_fail() {
        let proto = initialized(&[]);
        assert_matches!(
            proto.write_graphql_data("nope", &raw("{}"), None),
            Err(ProtoError::UnknownOperation(_))
        );
        assert_matches!(proto.done("nope"), Err(ProtoError::UnknownOperation(_)));
        assert!(proto.conn().written().is_empty());
    }

    #[test]
    fn done_twice_fails() {
        let proto = initialized(&[r#"{"id":"1","type":"subscribe"}"#]);
        let _ = proto.read_message().unwrap();
        proto.done("1").unwrap();
        assert_matches!(proto.done("1"), Err(ProtoError::UnknownOperation(_)));
        assert!(proto.open_operations().is_empty());
    }
}
