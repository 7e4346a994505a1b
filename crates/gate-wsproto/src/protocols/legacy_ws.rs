//! `graphql-ws`, the legacy `subscriptions-transport-ws` protocol.

use serde_json::value::RawValue;

use crate::conn::{JsonConn, read_json, write_json};
use crate::errors::{ProtoError, Result};
use crate::message::{Message, MessageType};
use crate::operations::Operations;
use crate::wire::{ObjectMessage, errors_payload, merge_extensions};

/// Subprotocol name negotiated in `Sec-WebSocket-Protocol`.
pub const SUBPROTOCOL: &str = "graphql-ws";

const CONNECTION_INIT: &str = "connection_init";
const CONNECTION_ACK: &str = "connection_ack";
const CONNECTION_TERMINATE: &str = "connection_terminate";
const KEEP_ALIVE: &str = "ka";
const START: &str = "start";
const STOP: &str = "stop";
const DATA: &str = "data";
const COMPLETE: &str = "complete";

/// `graphql-ws` over a [`JsonConn`].
///
/// The protocol has no client ping; keepalives are server-sent `ka`
/// frames, which is also what [`pong`](Self::pong) writes.
#[derive(Debug)]
pub struct LegacyWsProtocol<C> {
    conn: C,
    ops: Operations,
}

impl<C: JsonConn> LegacyWsProtocol<C> {
    /// Wrap `conn`. Nothing is read or written until [`initialize`](Self::initialize).
    pub fn new(conn: C) -> Self {
        Self {
            conn,
            ops: Operations::default(),
        }
    }

    /// Read `connection_init`, answer `connection_ack` and a first `ka`.
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
        write_json(&self.conn, &ObjectMessage::new(KEEP_ALIVE))?;
        self.ops.mark_initialized();
        Ok(init.payload)
    }

    /// Read and classify the next client message.
    pub fn read_message(&self) -> Result<Message> {
        self.ops.ensure_initialized()?;
        let msg: ObjectMessage = read_json(&self.conn)?;
        let kind = match msg.kind.as_str() {
            START => {
                let _ = self.ops.open(&msg.id);
                MessageType::Subscribe
            }
            STOP => {
                let _ = self.ops.release(&msg.id);
                MessageType::Complete
            }
            CONNECTION_TERMINATE => MessageType::Terminate,
            _ => return Err(ProtoError::UnsupportedMessageType(msg.kind)),
        };
        Ok(Message {
            id: msg.id,
            kind,
            payload: msg.payload,
        })
    }

    /// Write a `ka` keepalive.
    pub fn pong(&self, _ping: &Message) -> Result<()> {
        write_json(&self.conn, &ObjectMessage::new(KEEP_ALIVE))
    }

    /// Send a `data` frame carrying `data` with `extensions` merged in.
    pub fn write_graphql_data(&self, id: &str, data: &RawValue, extensions: Option<&RawValue>) -> Result<()> {
        self.ops.with_open(id, || {
            let payload = merge_extensions(data, extensions)?;
            write_json(&self.conn, &ObjectMessage::with_id(DATA, id).payload(payload))
        })
    }

    /// Send a `data` frame whose payload holds the errors.
    pub fn write_graphql_errors(&self, id: &str, errors: &RawValue, extensions: Option<&RawValue>) -> Result<()> {
        self.ops.with_open(id, || {
            let payload = errors_payload(errors, extensions)?;
            write_json(&self.conn, &ObjectMessage::with_id(DATA, id).payload(payload))
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
