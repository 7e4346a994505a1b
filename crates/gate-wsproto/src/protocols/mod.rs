//! Subprotocol selection and the closed set of protocol variants.

pub mod absinthe;
pub mod legacy_ws;
pub mod transport_ws;

use serde_json::value::RawValue;
use tracing::{debug, trace};

use crate::conn::JsonConn;
use crate::errors::{ProtoError, Result};
use crate::message::Message;

pub use absinthe::AbsintheProtocol;
pub use legacy_ws::LegacyWsProtocol;
pub use transport_ws::TransportWsProtocol;

/// Subprotocols the server accepts, in order of preference.
pub const SUPPORTED_SUBPROTOCOLS: [&str; 3] = [
    transport_ws::SUBPROTOCOL,
    legacy_ws::SUBPROTOCOL,
    absinthe::SUBPROTOCOL,
];

/// Whether `name` is one of [`SUPPORTED_SUBPROTOCOLS`].
pub fn is_supported_subprotocol(name: &str) -> bool {
    SUPPORTED_SUBPROTOCOLS.contains(&name)
}

/// One connection's protocol, fixed at upgrade time.
#[derive(Debug)]
pub enum Protocol<C> {
    /// `graphql-transport-ws`.
    TransportWs(TransportWsProtocol<C>),
    /// `graphql-ws`.
    LegacyWs(LegacyWsProtocol<C>),
    /// `absinthe`.
    Absinthe(AbsintheProtocol<C>),
}

impl<C: JsonConn> Protocol<C> {
    /// Pick the variant for a negotiated subprotocol.
    pub fn new(subprotocol: &str, conn: C) -> Result<Self> {
        match subprotocol {
            transport_ws::SUBPROTOCOL => Ok(Self::TransportWs(TransportWsProtocol::new(conn))),
            legacy_ws::SUBPROTOCOL => Ok(Self::LegacyWs(LegacyWsProtocol::new(conn))),
            absinthe::SUBPROTOCOL => Ok(Self::Absinthe(AbsintheProtocol::new(conn))),
            other => Err(ProtoError::UnsupportedSubprotocol(other.to_owned())),
        }
    }

    /// Negotiated subprotocol name.
    pub fn subprotocol(&self) -> &'static str {
        match self {
            Self::TransportWs(_) => transport_ws::SUBPROTOCOL,
            Self::LegacyWs(_) => legacy_ws::SUBPROTOCOL,
            Self::Absinthe(_) => absinthe::SUBPROTOCOL,
        }
    }

    /// Run the protocol handshake. Must be the first call.
    ///
    /// Returns the client's handshake payload. On a wrong first message
    /// nothing is written.
    pub fn initialize(&self) -> Result<Option<Box<RawValue>>> {
        let result = match self {
            Self::TransportWs(p) => p.initialize(),
            Self::LegacyWs(p) => p.initialize(),
            Self::Absinthe(p) => p.initialize(),
        };
        if let Err(error) = &result {
            debug!(protocol = self.subprotocol(), %error, "handshake failed");
        }
        result
    }

    /// Read and classify the next client message.
    pub fn read_message(&self) -> Result<Message> {
        let msg = match self {
            Self::TransportWs(p) => p.read_message(),
            Self::LegacyWs(p) => p.read_message(),
            Self::Absinthe(p) => p.read_message(),
        }?;
        trace!(protocol = self.subprotocol(), kind = ?msg.kind, id = %msg.id, "client message");
        Ok(msg)
    }

    /// Answer a [`Ping`](crate::MessageType::Ping).
    pub fn pong(&self, ping: &Message) -> Result<()> {
        match self {
            Self::TransportWs(p) => p.pong(ping),
            Self::LegacyWs(p) => p.pong(ping),
            Self::Absinthe(p) => p.pong(ping),
        }
    }

    /// Deliver a result for an open operation.
    pub fn write_graphql_data(&self, id: &str, data: &RawValue, extensions: Option<&RawValue>) -> Result<()> {
        match self {
            Self::TransportWs(p) => p.write_graphql_data(id, data, extensions),
            Self::LegacyWs(p) => p.write_graphql_data(id, data, extensions),
            Self::Absinthe(p) => p.write_graphql_data(id, data, extensions),
        }
    }

    /// Deliver errors for an open operation. `errors` is a JSON array.
    pub fn write_graphql_errors(&self, id: &str, errors: &RawValue, extensions: Option<&RawValue>) -> Result<()> {
        match self {
            Self::TransportWs(p) => p.write_graphql_errors(id, errors, extensions),
            Self::LegacyWs(p) => p.write_graphql_errors(id, errors, extensions),
            Self::Absinthe(p) => p.write_graphql_errors(id, errors, extensions),
        }
    }

    /// Signal that `id` will produce no more results.
    pub fn done(&self, id: &str) -> Result<()> {
        match self {
            Self::TransportWs(p) => p.done(id),
            Self::LegacyWs(p) => p.done(id),
            Self::Absinthe(p) => p.done(id),
        }
    }

    /// Close the transport.
    pub fn close(&self, code: u16, reason: &str) -> Result<()> {
        match self {
            Self::TransportWs(p) => p.close(code, reason),
            Self::LegacyWs(p) => p.close(code, reason),
            Self::Absinthe(p) => p.close(code, reason),
        }
    }

    /// Ids subscribed and not yet done.
    pub fn open_operations(&self) -> Vec<String> {
        match self {
            Self::TransportWs(p) => p.open_operations(),
            Self::LegacyWs(p) => p.open_operations(),
            Self::Absinthe(p) => p.open_operations(),
        }
    }

    /// The underlying connection.
    pub fn conn(&self) -> &C {
        match self {
            Self::TransportWs(p) => p.conn(),
            Self::LegacyWs(p) => p.conn(),
            Self::Absinthe(p) => p.conn(),
        }
    }
}
