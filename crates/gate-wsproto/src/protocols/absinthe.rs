//! `absinthe`, GraphQL subscriptions over Phoenix channels.
//!
//! Phoenix frames are five-element arrays:
//! `[join_ref, ref, topic, event, payload]`. A client joins the control
//! topic with `phx_join`, sends documents with `doc`, and receives results
//! on a per-subscription topic whose name is the subscription id the
//! server handed back in the `doc` reply.

use std::collections::HashMap;

use num_bigint::BigUint;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use serde_json::value::{RawValue, to_raw_value};
use sha2::{Digest, Sha256};

use crate::conn::{JsonConn, read_json, write_json};
use crate::errors::{ProtoError, Result};
use crate::message::{Message, MessageType};
use crate::operations::Operations;
use crate::wire::merge_extensions;

/// Subprotocol name negotiated in `Sec-WebSocket-Protocol`.
pub const SUBPROTOCOL: &str = "absinthe";

const PHX_JOIN: &str = "phx_join";
const PHX_LEAVE: &str = "phx_leave";
const PHX_REPLY: &str = "phx_reply";
const PHX_CLOSE: &str = "phx_close";
const HEARTBEAT: &str = "heartbeat";
const DOC: &str = "doc";
const SUBSCRIPTION_DATA: &str = "subscription:data";
const PHOENIX_TOPIC: &str = "phoenix";
const DOC_ID_PREFIX: &str = "__absinthe__:doc:";

/// Derive the subscription id for a client `ref`.
///
/// `__absinthe__:doc:<ref>:<n>` where `n` is the SHA-256 of `ref` read as a
/// big-endian unsigned integer, in decimal. Deterministic, so a later
/// `phx_leave` carrying the same ref maps back to the same subscription.
pub fn subscription_id(raw_id: &str) -> String {
    let digest = Sha256::digest(raw_id.as_bytes());
    let n = BigUint::from_bytes_be(&digest);
    format!("{DOC_ID_PREFIX}{raw_id}:{n}")
}

#[derive(Debug, Serialize, Deserialize)]
struct PhoenixMessage(Option<String>, Option<String>, String, String, Box<RawValue>);

impl PhoenixMessage {
    fn join_ref(&self) -> Option<&String> {
        self.0.as_ref()
    }

    fn msg_ref(&self) -> Option<&String> {
        self.1.as_ref()
    }

    fn topic(&self) -> &str {
        &self.2
    }

    fn event(&self) -> &str {
        &self.3
    }
}

#[derive(Serialize)]
struct Reply<R: Serialize> {
    status: &'static str,
    response: R,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SubscriptionData<'a> {
    result: &'a RawValue,
    subscription_id: &'a str,
}

/// Where a `doc` came from, so errors can be replied to it.
#[derive(Debug, Clone)]
struct DocOrigin {
    join_ref: Option<String>,
    msg_ref: Option<String>,
    topic: String,
}

/// `absinthe` over a [`JsonConn`].
#[derive(Debug)]
pub struct AbsintheProtocol<C> {
    conn: C,
    ops: Operations,
    origins: Mutex<HashMap<String, DocOrigin>>,
}

impl<C: JsonConn> AbsintheProtocol<C> {
    /// Wrap `conn`. Nothing is read or written until [`initialize`](Self::initialize).
    pub fn new(conn: C) -> Self {
        Self {
            conn,
            ops: Operations::default(),
            origins: Mutex::new(HashMap::new()),
        }
    }

    /// Read `phx_join` and reply `ok` on the joined topic.
    pub fn initialize(&self) -> Result<Option<Box<RawValue>>> {
        self.ops.ensure_uninitialized()?;
        let join: PhoenixMessage = read_json(&self.conn)?;
        if join.event() != PHX_JOIN {
            return Err(ProtoError::Handshake {
                expected: PHX_JOIN,
                got: join.3,
            });
        }
        self.reply(join.join_ref().cloned(), join.msg_ref().cloned(), join.topic(), "ok", json!({}))?;
        self.ops.mark_initialized();
        Ok(Some(join.4))
    }

    /// Read and classify the next client message.
    ///
    /// A `doc` is acknowledged here with the derived subscription id, and the
    /// returned message carries that id rather than the client's ref.
    pub fn read_message(&self) -> Result<Message> {
        self.ops.ensure_initialized()?;
        let msg: PhoenixMessage = read_json(&self.conn)?;
        let raw_ref = msg.msg_ref().cloned().unwrap_or_default();
        match msg.event() {
            HEARTBEAT => Ok(Message {
                id: raw_ref,
                kind: MessageType::Ping,
                payload: Some(msg.4),
            }),
            DOC => {
                let id = subscription_id(&raw_ref);
                self.reply(
                    msg.join_ref().cloned(),
                    msg.msg_ref().cloned(),
                    msg.topic(),
                    "ok",
                    json!({ "subscriptionId": id }),
                )?;
                if self.ops.open(&id) {
                    let _ = self.origins.lock().insert(
                        id.clone(),
                        DocOrigin {
                            join_ref: msg.0,
                            msg_ref: msg.1,
                            topic: msg.2,
                        },
                    );
                }
                Ok(Message {
                    id,
                    kind: MessageType::Subscribe,
                    payload: Some(msg.4),
                })
            }
            PHX_LEAVE => {
                let id = if self.ops.is_open(msg.topic()) {
                    msg.2
                } else {
                    subscription_id(&raw_ref)
                };
                if self.ops.release(&id) {
                    let _ = self.origins.lock().remove(&id);
                }
                Ok(Message {
                    id,
                    kind: MessageType::Complete,
                    payload: Some(msg.4),
                })
            }
            _ => Err(ProtoError::UnsupportedMessageType(msg.3)),
        }
    }

    /// Reply `ok` to a heartbeat on the `phoenix` topic.
    pub fn pong(&self, ping: &Message) -> Result<()> {
        let msg_ref = (!ping.id.is_empty()).then(|| ping.id.clone());
        self.reply(None, msg_ref, PHOENIX_TOPIC, "ok", json!({}))
    }

    /// Push `subscription:data` on the subscription's topic.
    pub fn write_graphql_data(&self, id: &str, data: &RawValue, extensions: Option<&RawValue>) -> Result<()> {
        self.ops.with_open(id, || {
            let result = merge_extensions(data, extensions)?;
            let payload = to_raw_value(&SubscriptionData {
                result: &result,
                subscription_id: id,
            })?;
            self.push(id, SUBSCRIPTION_DATA, payload)
        })
    }

    /// Reply `error` to the `doc` that started `id`.
    pub fn write_graphql_errors(&self, id: &str, errors: &RawValue, extensions: Option<&RawValue>) -> Result<()> {
        self.ops.with_open(id, || {
            let origin = self.origins.lock().get(id).cloned();
            let Some(origin) = origin else {
                return Err(ProtoError::UnknownOperation(id.to_owned()));
            };
            let response = match extensions {
                Some(extensions) => json!({ "errors": errors, "extensions": extensions }),
                None => json!({ "errors": errors }),
            };
            self.reply(origin.join_ref, origin.msg_ref, &origin.topic, "error", response)
        })
    }

    /// Push `phx_close` on the subscription's topic and forget `id`.
    pub fn done(&self, id: &str) -> Result<()> {
        self.ops.finish(id, || {
            let _ = self.origins.lock().remove(id);
            self.push(id, PHX_CLOSE, to_raw_value(&json!({}))?)
        })
    }

    /// Close the transport.
    pub fn close(&self, code: u16, reason: &str) -> Result<()> {
        self.conn.close(code, reason)
    }

    /// Subscription ids subscribed and not yet done.
    pub fn open_operations(&self) -> Vec<String> {
        self.ops.list()
    }

    /// The underlying connection.
    pub fn conn(&self) -> &C {
        &self.conn
    }

    fn reply(
        &self,
        join_ref: Option<String>,
        msg_ref: Option<String>,
        topic: &str,
        status: &'static str,
        response: serde_json::Value,
    ) -> Result<()> {
        let payload = to_raw_value(&Reply { status, response })?;
        write_json(
            &self.conn,
            &PhoenixMessage(join_ref, msg_ref, topic.to_owned(), PHX_REPLY.to_owned(), payload),
        )
    }

    fn push(&self, topic: &str, event: &str, payload: Box<RawValue>) -> Result<()> {
        write_json(
            &self.conn,
            &PhoenixMessage(None, None, topic.to_owned(), event.to_owned(), payload),
        )
    }
}
