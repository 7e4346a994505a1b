//! # gate-netpoll
//!
//! Readiness multiplexer for long-lived subscription connections.
//!
//! Holding one blocked reader per idle `WebSocket` does not scale past a few
//! thousand subscriptions. A [`Poller`] instead registers each connection's
//! descriptor with the OS readiness facility and hands back batches of
//! connections that have pending input.
//!
//! - [`Poller`]: descriptor → connection registry plus a backend
//! - [`BackendKind`]: `epoll` (Linux, O(1) add/remove) or a `poll(2)` list
//!   rebuilt on every wait (any Unix, O(n) per wait)
//! - [`PollConn`]: what a connection must expose to be registered
//!
//! The poller never closes a connection on its own, including on peer
//! hang-up; hang-ups surface as readiness and the reader observes the
//! end-of-stream. Only [`Poller::close`] with `close_conns = true` closes
//! connections.

#![deny(unsafe_code)]

pub mod backend;
pub mod conn;
pub mod errors;
pub mod poller;

pub use backend::BackendKind;
pub use conn::{PollConn, raw_fd};
pub use errors::{PollerError, Result};
pub use poller::{DEFAULT_BUFFER_SIZE, DEFAULT_POLL_TIMEOUT, Poller, PollerConfig};
