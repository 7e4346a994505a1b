//! Per-connection message handling.
//!
//! Reading and dispatch are synchronous and run on the blocking pool. Calls
//! into the executor never run inline: they are submitted to the resolver
//! [`WorkerPool`], so a slow engine never delays reading from any connection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use gate_wsproto::{JsonConn, Message, MessageType, Protocol};
use metrics::gauge;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::value::{RawValue, to_raw_value};
use tracing::{debug, warn};

use crate::connection::WsConnection;
use crate::errors::{GatewayError, Result};
use crate::executor::{Executor, ResultSink, SubscribeRequest, SubscriptionId};
use crate::metrics::WS_SUBSCRIPTIONS_ACTIVE;
use crate::pool::{WorkerPool, run_blocking};

/// Close code sent when the gateway ends a connection.
const NORMAL_CLOSURE: u16 = 1000;

#[derive(Serialize)]
struct GraphqlError<'a> {
    message: &'a str,
}

/// Owns one connection's protocol instance and its running subscriptions.
pub struct ConnectionHandler {
    id: u64,
    protocol: Protocol<Arc<WsConnection>>,
    executor: Arc<dyn Executor>,
    resolvers: WorkerPool,
    initial_payload: OnceLock<Box<RawValue>>,
    /// Operation id to per-connection subscription number.
    subscriptions: Mutex<HashMap<String, u64>>,
    subscription_ids: AtomicU64,
    closed: AtomicBool,
}

impl ConnectionHandler {
    /// Bind a protocol instance to the executor. Executor calls run on
    /// `resolvers`.
    pub fn new(
        id: u64,
        protocol: Protocol<Arc<WsConnection>>,
        executor: Arc<dyn Executor>,
        resolvers: WorkerPool,
    ) -> Self {
        Self {
            id,
            protocol,
            executor,
            resolvers,
            initial_payload: OnceLock::new(),
            subscriptions: Mutex::new(HashMap::new()),
            subscription_ids: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Connection id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The connection's protocol.
    pub fn protocol(&self) -> &Protocol<Arc<WsConnection>> {
        &self.protocol
    }

    /// The underlying connection.
    pub fn conn(&self) -> &Arc<WsConnection> {
        self.protocol.conn()
    }

    /// Handshake payload, once initialized.
    pub fn initial_payload(&self) -> Option<&RawValue> {
        self.initial_payload.get().map(AsRef::as_ref)
    }

    /// Number of running subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().len()
    }

    /// Whether [`close`](Self::close) has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Run the protocol handshake. Blocks on the socket.
    pub fn initialize(&self) -> Result<()> {
        if let Some(payload) = self.protocol.initialize()? {
            let _ = self.initial_payload.set(payload);
        }
        debug!(
            connection_id = self.id,
            protocol = self.protocol.subprotocol(),
            "websocket connection initialized"
        );
        Ok(())
    }

    /// Read and handle messages until the non-blocking socket has nothing
    /// buffered. An error means the connection must be torn down.
    pub fn drain(self: &Arc<Self>) -> Result<()> {
        loop {
            match self.protocol.read_message() {
                Ok(msg) => self.handle_message(msg)?,
                Err(e) if e.is_would_block() => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Read and handle one message. Blocks up to the socket read deadline.
    pub fn read_one(self: &Arc<Self>) -> Result<()> {
        let msg = self.protocol.read_message()?;
        self.handle_message(msg)
    }

    /// Dispatch one decoded client message.
    ///
    /// Only a terminate request or a failed write to the client is fatal;
    /// a bad subscribe is logged and the connection stays open.
    pub fn handle_message(self: &Arc<Self>, msg: Message) -> Result<()> {
        match msg.kind {
            MessageType::Terminate => return Err(GatewayError::ClientTerminated),
            MessageType::Ping => {
                if let Err(error) = self.protocol.pong(&msg) {
                    debug!(connection_id = self.id, %error, "sending pong");
                }
            }
            // May be sent unsolicited as a heartbeat.
            MessageType::Pong => {}
            MessageType::Subscribe => {
                if let Err(error) = self.handle_subscribe(msg) {
                    warn!(connection_id = self.id, %error, "handling subscribe");
                }
            }
            MessageType::Complete => self.handle_complete(&msg)?,
        }
        Ok(())
    }

    fn handle_subscribe(self: &Arc<Self>, msg: Message) -> Result<()> {
        if msg.id.is_empty() {
            return Err(GatewayError::MissingId);
        }
        let id = {
            let mut subscriptions = self.subscriptions.lock();
            if subscriptions.contains_key(&msg.id) {
                return Err(GatewayError::DuplicateSubscription(msg.id));
            }
            let number = self.subscription_ids.fetch_add(1, Ordering::Relaxed) + 1;
            let _ = subscriptions.insert(msg.id.clone(), number);
            SubscriptionId {
                connection_id: self.id,
                subscription_id: number,
            }
        };
        gauge!(WS_SUBSCRIPTIONS_ACTIVE).increment(1.0);
        debug!(connection_id = self.id, subscription_id = id.subscription_id, operation_id = %msg.id, "subscribe");

        let sink = ResultSink::new(Arc::downgrade(self), msg.id.clone(), id);
        let request = SubscribeRequest {
            id,
            operation_id: msg.id,
            payload: msg.payload,
            initial_payload: self.initial_payload.get().cloned(),
        };
        let handler = Arc::clone(self);
        let _ = self.resolvers.submit(async move { handler.execute(request, sink).await });
        Ok(())
    }

    /// Hand a subscribe to the executor. Runs on the resolver pool.
    async fn execute(self: Arc<Self>, request: SubscribeRequest, sink: ResultSink) {
        let id = request.id;
        let operation_id = request.operation_id.clone();
        match self.executor.subscribe(request, sink).await {
            Ok(()) if !self.is_running(&operation_id, id.subscription_id) => {
                // The client completed it, or left, while the executor was starting it.
                if let Err(error) = self.executor.unsubscribe(id).await {
                    debug!(connection_id = self.id, subscription_id = id.subscription_id, %error, "cancelling subscription");
                }
            }
            Ok(()) => {}
            Err(error) => {
                warn!(connection_id = self.id, subscription_id = id.subscription_id, %error, "subscription rejected");
                let handler = Arc::clone(&self);
                let message = error.to_string();
                if let Err(error) = run_blocking(move || handler.reject(&operation_id, &message)).await {
                    debug!(connection_id = self.id, %error, "reporting rejected subscription");
                }
            }
        }
    }

    fn is_running(&self, operation_id: &str, number: u64) -> bool {
        self.subscriptions.lock().get(operation_id) == Some(&number)
    }

    /// Send the executor's refusal as GraphQL errors, then end the id.
    fn reject(&self, operation_id: &str, message: &str) -> Result<()> {
        self.write_error_message(operation_id, message)?;
        self.complete(operation_id)
    }

    fn handle_complete(self: &Arc<Self>, msg: &Message) -> Result<()> {
        let number = self.subscriptions.lock().get(&msg.id).copied();
        let Some(number) = number else {
            return self.request_error(&GatewayError::UnknownSubscription(msg.id.clone()));
        };
        let _ = self.forget(&msg.id);
        let id = SubscriptionId {
            connection_id: self.id,
            subscription_id: number,
        };
        let handler = Arc::clone(self);
        let _ = self.resolvers.submit(async move {
            if let Err(error) = handler.executor.unsubscribe(id).await {
                warn!(connection_id = handler.id, subscription_id = number, %error, "handling complete");
            }
        });
        Ok(())
    }

    /// Report a request-level failure to the client as a plain text frame.
    fn request_error(&self, error: &GatewayError) -> Result<()> {
        warn!(connection_id = self.id, %error, "handling websocket connection");
        // Phoenix clients only understand five-element arrays.
        if matches!(self.protocol, Protocol::Absinthe(_)) {
            return Ok(());
        }
        self.conn().write_text(&error.to_string())?;
        Ok(())
    }

    /// Send `[{"message": ...}]` as GraphQL errors for `operation_id`.
    fn write_error_message(&self, operation_id: &str, message: &str) -> Result<()> {
        let errors = to_raw_value(&[GraphqlError { message }]).map_err(gate_wsproto::ProtoError::from)?;
        self.protocol.write_graphql_errors(operation_id, &errors, None)?;
        Ok(())
    }

    /// The executor finished `operation_id`. Blocks on the socket.
    pub(crate) fn complete(&self, operation_id: &str) -> Result<()> {
        let _ = self.forget(operation_id);
        self.protocol.done(operation_id)?;
        Ok(())
    }

    fn forget(&self, operation_id: &str) -> bool {
        let removed = self.subscriptions.lock().remove(operation_id).is_some();
        if removed {
            gauge!(WS_SUBSCRIPTIONS_ACTIVE).decrement(1.0);
        }
        removed
    }

    /// Unsubscribe everything and close the transport. Idempotent.
    pub async fn close(self: &Arc<Self>) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let open = self.protocol.open_operations();
        debug!(connection_id = self.id, open_operations = open.len(), "closing websocket connection");

        if let Err(error) = self.executor.unsubscribe_client(self.id).await {
            debug!(connection_id = self.id, %error, "unsubscribing client");
        }
        let forgotten = {
            let mut subscriptions = self.subscriptions.lock();
            let count = subscriptions.len();
            subscriptions.clear();
            count
        };
        #[allow(clippy::cast_precision_loss)]
        gauge!(WS_SUBSCRIPTIONS_ACTIVE).decrement(forgotten as f64);

        let handler = Arc::clone(self);
        let closed = run_blocking(move || handler.protocol.close(NORMAL_CLOSURE, "").map_err(GatewayError::from)).await;
        if let Err(error) = closed {
            debug!(connection_id = self.id, %error, "closing websocket connection");
        }
    }
}

impl std::fmt::Debug for ConnectionHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandler")
            .field("id", &self.id)
            .field("protocol", &self.protocol.subprotocol())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
