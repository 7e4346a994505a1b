//! The seam to the GraphQL execution engine.
//!
//! The gateway decodes subscribe and complete messages and hands them to an
//! [`Executor`]. The executor streams results back through the
//! [`ResultSink`] it received with each subscription.

use std::fmt;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::value::RawValue;

use crate::errors::{ExecutorError, GatewayError, Result};
use crate::handler::ConnectionHandler;
use crate::pool::run_blocking;

/// Identifies one running subscription across the gateway.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId {
    /// Connection the subscription belongs to.
    pub connection_id: u64,
    /// Per-connection sequence number, starting at 1.
    pub subscription_id: u64,
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.connection_id, self.subscription_id)
    }
}

/// A subscribe message handed to the executor.
#[derive(Debug)]
pub struct SubscribeRequest {
    /// Gateway-wide subscription id.
    pub id: SubscriptionId,
    /// Client-chosen operation id (the derived id for absinthe).
    pub operation_id: String,
    /// Subscribe payload as sent by the client.
    pub payload: Option<Box<RawValue>>,
    /// Handshake payload of the connection, forwarded unvalidated.
    pub initial_payload: Option<Box<RawValue>>,
}

/// Executes subscriptions. Implemented by the engine.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Start an operation. Results go to `sink` until the executor calls
    /// [`ResultSink::complete`] or the operation is unsubscribed.
    async fn subscribe(&self, request: SubscribeRequest, sink: ResultSink) -> std::result::Result<(), ExecutorError>;

    /// Stop one operation; the client sent complete.
    async fn unsubscribe(&self, id: SubscriptionId) -> std::result::Result<(), ExecutorError>;

    /// Stop every operation of a connection that is going away.
    async fn unsubscribe_client(&self, connection_id: u64) -> std::result::Result<(), ExecutorError>;
}

/// Top-level keys of a GraphQL response that decide how it is framed.
#[derive(Deserialize)]
struct ResponseShape<'a> {
    #[serde(borrow, default)]
    errors: Option<&'a RawValue>,
    #[serde(borrow, default)]
    extensions: Option<&'a RawValue>,
}

/// Where an executor writes results for one subscription.
///
/// Holds the connection weakly: once the connection is torn down, writes
/// fail with [`GatewayError::ConnectionGone`].
#[derive(Clone)]
pub struct ResultSink {
    handler: Weak<ConnectionHandler>,
    operation_id: String,
    id: SubscriptionId,
}

impl ResultSink {
    pub(crate) fn new(handler: Weak<ConnectionHandler>, operation_id: String, id: SubscriptionId) -> Self {
        Self {
            handler,
            operation_id,
            id,
        }
    }

    /// Client-chosen operation id.
    pub fn operation_id(&self) -> &str {
        &self.operation_id
    }

    /// Gateway-wide subscription id.
    pub fn subscription_id(&self) -> SubscriptionId {
        self.id
    }

    /// Send one GraphQL response. A response with a top-level `errors`
    /// array or object is sent as an error frame, anything else as data.
    ///
    /// The write runs on the blocking pool, so a client that stops reading
    /// holds up only this call, for at most the gateway's write timeout.
    pub async fn next(&self, response: &RawValue) -> Result<()> {
        let handler = self.handler()?;
        let operation_id = self.operation_id.clone();
        let response = response.to_owned();
        run_blocking(move || write_response(&handler, &operation_id, &response)).await
    }

    /// Signal that the subscription produced its last result.
    pub async fn complete(&self) -> Result<()> {
        let handler = self.handler()?;
        let operation_id = self.operation_id.clone();
        run_blocking(move || handler.complete(&operation_id)).await
    }

    fn handler(&self) -> Result<Arc<ConnectionHandler>> {
        self.handler
            .upgrade()
            .ok_or(GatewayError::ConnectionGone(self.id.connection_id))
    }
}

fn write_response(handler: &ConnectionHandler, operation_id: &str, response: &RawValue) -> Result<()> {
    let shape: ResponseShape<'_> = serde_json::from_str(response.get()).map_err(gate_wsproto::ProtoError::from)?;
    let protocol = handler.protocol();
    match shape.errors {
        Some(errors) if is_json_container(errors) => {
            protocol.write_graphql_errors(operation_id, errors, shape.extensions)?;
        }
        _ => protocol.write_graphql_data(operation_id, response, None)?,
    }
    Ok(())
}

impl fmt::Debug for ResultSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultSink")
            .field("operation_id", &self.operation_id)
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

fn is_json_container(raw: &RawValue) -> bool {
    matches!(raw.get().trim_start().as_bytes().first(), Some(b'[' | b'{'))
}
