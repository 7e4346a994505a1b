//! # gate-ws
//!
//! `WebSocket` transport for GraphQL subscriptions.
//!
//! [`SubscriptionGateway`] upgrades TCP connections, negotiates one of the
//! subprotocols in [`gate_wsproto`], runs the handshake, and then serves the
//! connection either through a readiness [`Poller`](gate_netpoll::Poller)
//! or with a dedicated reader task. Decoded operations go to an
//! [`Executor`]; results come back through a [`ResultSink`].
//!
//! - [`connection`]: the upgraded socket shared by readers and writers
//! - [`handler`]: per-connection dispatch and subscription bookkeeping
//! - [`gateway`]: accept path, polling task, teardown and shutdown
//! - [`executor`]: the engine seam
//! - [`pool`]: bounded task pools and blocking socket work

#![deny(unsafe_code)]

pub mod config;
pub mod connection;
pub mod errors;
pub mod executor;
pub mod gateway;
pub mod handler;
pub mod metrics;
pub mod pool;
pub mod shutdown;
pub mod upgrade;

pub use config::GatewayConfig;
pub use connection::WsConnection;
pub use errors::{ExecutorError, GatewayError, Result};
pub use executor::{Executor, ResultSink, SubscribeRequest, SubscriptionId};
pub use gateway::SubscriptionGateway;
pub use handler::ConnectionHandler;
pub use pool::WorkerPool;
pub use shutdown::ShutdownCoordinator;
