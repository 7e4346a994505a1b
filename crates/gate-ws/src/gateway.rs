//! [`SubscriptionGateway`]: accept path, polling task and connection teardown.
//!
//! In poll mode one task waits on the [`Poller`] and hands every ready
//! connection to a drain task. A connection is taken out of the poller for
//! the length of its drain and handed back once the socket is empty, so the
//! polling task never waits for drains and a level-triggered descriptor is
//! never drained twice at once. At most `max_concurrent_resolvers` drains
//! run at once, and as many executor calls.
//!
//! When the poller is disabled or the platform has no readiness backend,
//! each connection gets its own reader task instead.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use gate_netpoll::{Poller, PollerError};
use gate_wsproto::Protocol;
use metrics::{counter, gauge};
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::config::GatewayConfig;
use crate::connection::WsConnection;
use crate::errors::{GatewayError, Result};
use crate::executor::Executor;
use crate::handler::ConnectionHandler;
use crate::metrics::{
    WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_HANDSHAKE_FAILURES_TOTAL, WS_POLLER_WAIT_ERRORS_TOTAL,
};
use crate::pool::{WorkerPool, run_blocking};
use crate::shutdown::ShutdownCoordinator;
use crate::upgrade;

/// Serves GraphQL subscriptions over `WebSocket`.
pub struct SubscriptionGateway {
    config: GatewayConfig,
    executor: Arc<dyn Executor>,
    poller: Option<Arc<Poller<WsConnection>>>,
    handlers: RwLock<HashMap<u64, Arc<ConnectionHandler>>>,
    connection_ids: AtomicU64,
    tracker: TaskTracker,
    shutdown: ShutdownCoordinator,
    drains: WorkerPool,
    resolvers: WorkerPool,
    poll_task: Mutex<Option<JoinHandle<()>>>,
}

impl SubscriptionGateway {
    /// Build the gateway and, in poll mode, start the polling task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: GatewayConfig, executor: Arc<dyn Executor>) -> Result<Arc<Self>> {
        if !config.enabled {
            return Err(GatewayError::Disabled);
        }
        let poller = if config.enable_poller {
            match Poller::new(&config.poller) {
                Ok(poller) => Some(Arc::new(poller)),
                Err(PollerError::Unsupported(backend)) => {
                    warn!(backend, "readiness backend unavailable, using one reader per connection");
                    None
                }
                Err(e) => return Err(e.into()),
            }
        } else {
            None
        };

        let tracker = TaskTracker::new();
        let gateway = Arc::new(Self {
            drains: WorkerPool::new(config.max_concurrent_resolvers, tracker.clone()),
            resolvers: WorkerPool::new(config.max_concurrent_resolvers, tracker.clone()),
            config,
            executor,
            poller,
            handlers: RwLock::new(HashMap::new()),
            connection_ids: AtomicU64::new(0),
            tracker,
            shutdown: ShutdownCoordinator::new(),
            poll_task: Mutex::new(None),
        });

        if let Some(poller) = &gateway.poller {
            info!(backend = %poller.backend(), "subscription gateway started in poll mode");
            let task = tokio::spawn(run_poller(
                Arc::downgrade(&gateway),
                Arc::clone(poller),
                gateway.config.max_events_per_wait,
                gateway.shutdown.token(),
            ));
            *gateway.poll_task.lock() = Some(task);
        } else {
            info!("subscription gateway started in per-connection mode");
        }
        Ok(gateway)
    }

    /// Build the gateway from the process-wide [`gate_settings`] instance.
    pub fn from_settings(executor: Arc<dyn Executor>) -> Result<Arc<Self>> {
        let settings = gate_settings::get_settings();
        Self::new(GatewayConfig::from(&settings.websocket), executor)
    }

    /// The effective configuration.
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Whether connections are served by the readiness multiplexer.
    pub fn is_polling(&self) -> bool {
        self.poller.is_some()
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.handlers.read().len()
    }

    /// Connection tasks still running (accepts, drains, readers and
    /// executor calls).
    pub fn active_tasks(&self) -> usize {
        self.tracker.len()
    }

    /// Descriptors registered with the poller; zero in per-connection mode.
    pub fn poller_registrations(&self) -> usize {
        self.poller.as_ref().map_or(0, |poller| poller.len())
    }

    /// Token cancelled when the gateway shuts down.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.token()
    }

    /// Upgrade `stream`, run the protocol handshake and start serving it.
    ///
    /// Returns once the connection is registered and any frames the client
    /// sent along with the handshake have been handled.
    pub async fn accept(self: &Arc<Self>, stream: tokio::net::TcpStream) -> Result<u64> {
        if self.shutdown.is_shutting_down() {
            return Err(GatewayError::Disabled);
        }
        let stream = stream.into_std()?;
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(self.config.handshake_timeout))?;
        stream.set_write_timeout(Some(self.config.handshake_timeout))?;
        let socket = stream.try_clone()?;

        let ws_config = self.config.websocket_config();
        let (ws, subprotocol) = match run_blocking(move || upgrade::accept(stream, ws_config)).await {
            Ok(upgraded) => upgraded,
            Err(e) => {
                counter!(WS_HANDSHAKE_FAILURES_TOTAL).increment(1);
                return Err(e);
            }
        };

        let id = self.connection_ids.fetch_add(1, Ordering::Relaxed) + 1;
        let conn = Arc::new(WsConnection::new(id, ws, socket, self.config.write_timeout));
        let protocol = Protocol::new(subprotocol, Arc::clone(&conn))?;
        let handler = Arc::new(ConnectionHandler::new(
            id,
            protocol,
            Arc::clone(&self.executor),
            self.resolvers.clone(),
        ));

        let init = Arc::clone(&handler);
        if let Err(e) = run_blocking(move || init.initialize()).await {
            counter!(WS_HANDSHAKE_FAILURES_TOTAL).increment(1);
            warn!(connection_id = id, protocol = subprotocol, error = %e, "initializing websocket connection");
            handler.close().await;
            return Err(e);
        }

        if let Err(e) = self.configure_reads(&conn) {
            handler.close().await;
            return Err(e);
        }
        counter!(WS_CONNECTIONS_TOTAL).increment(1);
        gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);
        let _ = self.handlers.write().insert(id, Arc::clone(&handler));
        debug!(connection_id = id, protocol = subprotocol, "websocket connection accepted");

        match &self.poller {
            Some(_) => {
                // Frames that arrived with the handshake may already sit in
                // the WebSocket buffer, where readiness will never see them.
                // Drain them first; the connection joins the poller after.
                if let Err(e) = self.serve_ready(&handler).await {
                    self.remove_connection(&handler).await;
                    return Err(e);
                }
            }
            None => {
                let _ = self.tracker.spawn(Arc::clone(self).handle_connection_sync(handler));
            }
        }
        Ok(id)
    }

    fn configure_reads(&self, conn: &WsConnection) -> Result<()> {
        if self.poller.is_some() {
            // Reads stop at WouldBlock from the first drain on.
            conn.set_nonblocking(true)?;
            conn.set_read_timeout(None)?;
            conn.set_write_timeout(None)?;
        } else {
            conn.set_read_timeout(Some(self.config.sync_read_slice()))?;
            conn.set_write_timeout(Some(self.config.write_timeout))?;
        }
        Ok(())
    }

    /// Accept connections from `listener` until shutdown.
    pub async fn serve(self: Arc<Self>, listener: tokio::net::TcpListener) -> Result<()> {
        let token = self.shutdown.token();
        loop {
            let (stream, peer) = tokio::select! {
                () = token.cancelled() => break,
                accepted = listener.accept() => accepted?,
            };
            let gateway = Arc::clone(&self);
            let _ = self.tracker.spawn(async move {
                if let Err(error) = gateway.accept(stream).await {
                    if error.is_disconnect() {
                        debug!(%peer, %error, "websocket upgrade");
                    } else {
                        warn!(%peer, %error, "websocket upgrade");
                    }
                }
            });
        }
        debug!("accept loop stopped");
        Ok(())
    }

    fn handler(&self, connection_id: u64) -> Option<Arc<ConnectionHandler>> {
        self.handlers.read().get(&connection_id).cloned()
    }

    fn is_live(&self, connection_id: u64) -> bool {
        self.handlers.read().contains_key(&connection_id)
    }

    /// Handle everything buffered on a connection that is out of the
    /// poller, then register it again.
    async fn serve_ready(&self, handler: &Arc<ConnectionHandler>) -> Result<()> {
        let draining = Arc::clone(handler);
        run_blocking(move || draining.drain()).await?;
        self.rearm(handler)
    }

    /// Hand a drained connection back to the poller unless it was torn
    /// down meanwhile.
    fn rearm(&self, handler: &ConnectionHandler) -> Result<()> {
        let Some(poller) = &self.poller else {
            return Ok(());
        };
        if !self.is_live(handler.id()) {
            return Ok(());
        }
        poller.add(Arc::clone(handler.conn()))?;
        // Teardown removes the handler before deregistering, so a teardown
        // that raced the add is always visible here.
        if !self.is_live(handler.id()) {
            let _ = poller.remove(handler.conn());
        }
        Ok(())
    }

    /// Drain task for a connection the poller reported ready.
    async fn drain_ready(self: Arc<Self>, handler: Arc<ConnectionHandler>) {
        if let Err(error) = self.serve_ready(&handler).await {
            log_connection_error(handler.id(), &error);
            self.remove_connection(&handler).await;
        }
    }

    /// One reader per connection, used without a poller.
    async fn handle_connection_sync(self: Arc<Self>, handler: Arc<ConnectionHandler>) {
        let token = self.shutdown.token();
        loop {
            let reader = Arc::clone(&handler);
            let handled = tokio::select! {
                () = token.cancelled() => break,
                handled = run_blocking(move || reader.read_one()) => handled,
            };
            match handled {
                Ok(()) => {}
                Err(GatewayError::Protocol(e)) if e.is_timeout() => {}
                Err(error) => {
                    log_connection_error(handler.id(), &error);
                    break;
                }
            }
        }
        self.remove_connection(&handler).await;
    }

    /// Deregister, unsubscribe and close one connection. Idempotent.
    async fn remove_connection(&self, handler: &Arc<ConnectionHandler>) {
        if self.handlers.write().remove(&handler.id()).is_some() {
            gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
        }
        if let Some(poller) = &self.poller {
            match poller.remove(handler.conn()) {
                Ok(()) | Err(PollerError::NotRegistered(_) | PollerError::Closed) => {}
                Err(e) => debug!(connection_id = handler.id(), error = %e, "deregistering connection"),
            }
        }
        handler.close().await;
    }

    /// Tear down every live connection.
    async fn close_all(&self) {
        let handlers: Vec<_> = self.handlers.read().values().cloned().collect();
        for handler in handlers {
            self.remove_connection(&handler).await;
        }
    }

    /// Stop accepting, close every connection and wait up to `timeout` for
    /// connection tasks. Returns `false` if tasks were still running.
    pub async fn shutdown(&self, timeout: Option<Duration>) -> bool {
        info!(connections = self.connection_count(), "subscription gateway shutting down");
        self.shutdown.shutdown();
        self.close_all().await;
        if let Some(poller) = &self.poller {
            if let Err(e) = poller.close(true) {
                debug!(error = %e, "closing poller");
            }
        }
        let drained = self.shutdown.graceful_shutdown(&self.tracker, timeout).await;

        let task = self.poll_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "polling task failed");
            }
        }
        drained
    }
}

impl std::fmt::Debug for SubscriptionGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionGateway")
            .field("polling", &self.is_polling())
            .field("connections", &self.connection_count())
            .field("tasks", &self.active_tasks())
            .finish_non_exhaustive()
    }
}

fn log_connection_error(connection_id: u64, error: &GatewayError) {
    if error.is_disconnect() {
        debug!(connection_id, %error, "websocket connection ended");
    } else {
        warn!(connection_id, %error, "handling websocket connection");
    }
}

/// The polling task. Waits block a pool thread; every ready connection is
/// taken out of the poller and drained on its own task.
async fn run_poller(
    gateway: Weak<SubscriptionGateway>,
    poller: Arc<Poller<WsConnection>>,
    max_events: usize,
    token: CancellationToken,
) {
    loop {
        if token.is_cancelled() {
            break;
        }
        let waiting = Arc::clone(&poller);
        let ready = match tokio::task::spawn_blocking(move || waiting.wait(max_events)).await {
            Ok(Ok(ready)) => ready,
            Ok(Err(e)) => {
                if token.is_cancelled() {
                    break;
                }
                counter!(WS_POLLER_WAIT_ERRORS_TOTAL).increment(1);
                if e.is_fatal() {
                    error!(error = %e, "poller failed, closing all websocket connections");
                    if let Some(gateway) = gateway.upgrade() {
                        gateway.close_all().await;
                    }
                    break;
                }
                warn!(error = %e, "poller wait");
                continue;
            }
            Err(e) => {
                error!(error = %e, "poller wait task failed");
                break;
            }
        };
        if ready.is_empty() {
            continue;
        }
        let Some(gateway) = gateway.upgrade() else {
            break;
        };

        for conn in ready {
            let Some(handler) = gateway.handler(conn.id()) else {
                continue;
            };
            match poller.remove(&conn) {
                Ok(()) => {}
                // Torn down since the wait returned.
                Err(PollerError::NotRegistered(_)) => continue,
                Err(e) => {
                    debug!(connection_id = conn.id(), error = %e, "taking ready connection");
                    continue;
                }
            }
            let _ = gateway.drains.submit(Arc::clone(&gateway).drain_ready(handler));
        }
    }
    debug!("polling task stopped");
}
