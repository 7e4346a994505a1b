//! HTTP to `WebSocket` upgrade with subprotocol negotiation.

use std::net::TcpStream;

use gate_wsproto::SUPPORTED_SUBPROTOCOLS;
use tracing::debug;
use tungstenite::handshake::HandshakeError;
use tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tungstenite::http::{HeaderValue, StatusCode};
use tungstenite::protocol::WebSocketConfig;
use tungstenite::{WebSocket, accept_hdr_with_config};

use crate::errors::{GatewayError, Result};

/// Pick the first subprotocol the client offers that the gateway speaks.
///
/// Each item may be a comma separated header value.
pub fn select_subprotocol<'a, I>(offered: I) -> Option<&'static str>
where
    I: IntoIterator<Item = &'a str>,
{
    offered
        .into_iter()
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .find_map(|name| SUPPORTED_SUBPROTOCOLS.iter().copied().find(|supported| *supported == name))
}

fn offered_subprotocols(request: &Request) -> Option<&'static str> {
    select_subprotocol(
        request
            .headers()
            .get_all(SEC_WEBSOCKET_PROTOCOL)
            .iter()
            .filter_map(|value| value.to_str().ok()),
    )
}

fn reject(message: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(message.to_owned()));
    *response.status_mut() = StatusCode::BAD_REQUEST;
    response
}

/// Run the server side of the upgrade on a blocking stream.
///
/// Requests without a supported subprotocol are answered with
/// `400 Bad Request`. A read deadline on `stream` bounds the handshake.
pub fn accept(stream: TcpStream, config: WebSocketConfig) -> Result<(WebSocket<TcpStream>, &'static str)> {
    let mut chosen = None;
    let callback = |request: &Request, mut response: Response| {
        let Some(name) = offered_subprotocols(request) else {
            debug!(uri = %request.uri(), "rejecting upgrade without a supported subprotocol");
            return Err(reject("unsupported websocket subprotocol"));
        };
        let _ = response
            .headers_mut()
            .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(name));
        chosen = Some(name);
        Ok(response)
    };

    let ws = match accept_hdr_with_config(stream, callback, Some(config)) {
        Ok(ws) => ws,
        Err(HandshakeError::Interrupted(_)) => return Err(GatewayError::HandshakeTimeout),
        Err(HandshakeError::Failure(tungstenite::Error::Io(e)))
            if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) =>
        {
            return Err(GatewayError::HandshakeTimeout);
        }
        Err(HandshakeError::Failure(e)) => return Err(e.into()),
    };
    match chosen {
        Some(name) => Ok((ws, name)),
        None => Err(GatewayError::Protocol(gate_wsproto::ProtoError::UnsupportedSubprotocol(
            String::new(),
        ))),
    }
}
