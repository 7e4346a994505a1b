//! # gate-wsproto
//!
//! GraphQL subscription protocols spoken over an upgraded `WebSocket`.
//!
//! Three mutually incompatible wire protocols are normalized into one
//! capability set, so the execution side can drive every connection the
//! same way:
//!
//! | Subprotocol | Handshake | Subscribe | Result | Complete |
//! |-------------|-----------|-----------|--------|----------|
//! | `graphql-transport-ws` | `connection_init` | `subscribe` | `next` / `error` | `complete` |
//! | `graphql-ws` | `connection_init` (+ `ka`) | `start` | `data` | `complete` |
//! | `absinthe` | `phx_join` | `doc` | `subscription:data` | `phx_close` |
//!
//! [`Protocol`] is a closed enum chosen once per connection from the
//! negotiated subprotocol. It sits on top of any [`JsonConn`], a duplex
//! text-message channel; how bytes reach that channel is the caller's
//! business.
//!
//! Per connection, a protocol tracks whether the handshake completed and
//! which operation ids are open. Results and completions for ids that were
//! never subscribed (or are already done) are rejected with
//! [`ProtoError::UnknownOperation`].

#![deny(unsafe_code)]

pub mod conn;
pub mod errors;
pub mod message;
pub mod protocols;
pub mod testing;

mod operations;
mod wire;

pub use conn::JsonConn;
pub use errors::{ProtoError, Result};
pub use message::{Message, MessageType};
pub use protocols::absinthe::{AbsintheProtocol, subscription_id as absinthe_subscription_id};
pub use protocols::legacy_ws::LegacyWsProtocol;
pub use protocols::transport_ws::TransportWsProtocol;
pub use protocols::{Protocol, SUPPORTED_SUBPROTOCOLS, is_supported_subprotocol};
