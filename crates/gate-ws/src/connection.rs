//! The upgraded `WebSocket` connection shared by a reader and result writers.

use std::io;
use std::net::{Shutdown, TcpStream};
use std::os::fd::{AsFd, BorrowedFd};
use std::time::{Duration, Instant};

use gate_netpoll::PollConn;
use gate_wsproto::{JsonConn, ProtoError};
use parking_lot::Mutex;
use tungstenite::protocol::CloseFrame;
use tungstenite::protocol::frame::coding::CloseCode;
use tungstenite::error::ProtocolError;
use tungstenite::{Message, WebSocket};

/// Pause between flush attempts while a non-blocking socket is full.
const WRITE_RETRY_INTERVAL: Duration = Duration::from_millis(1);

/// A server-side `WebSocket` over a TCP stream.
///
/// Every read and write goes through one mutex. The descriptor handed to
/// the poller is a clone of the stream, so switching it to non-blocking
/// mode also switches the stream inside the `WebSocket`.
///
/// Reads and writes may block the calling thread (a full send buffer is
/// retried until the write timeout), so the gateway only calls them from
/// the blocking pool.
pub struct WsConnection {
    id: u64,
    socket: TcpStream,
    ws: Mutex<WebSocket<TcpStream>>,
    write_timeout: Duration,
}

impl WsConnection {
    /// Wrap an upgraded `WebSocket`. `socket` must be a clone of the
    /// stream inside `ws`.
    pub fn new(id: u64, ws: WebSocket<TcpStream>, socket: TcpStream, write_timeout: Duration) -> Self {
        Self {
            id,
            socket,
            ws: Mutex::new(ws),
            write_timeout,
        }
    }

    /// Connection id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Switch the socket, and the stream inside the `WebSocket`, between
    /// blocking and non-blocking mode.
    pub fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        self.socket.set_nonblocking(nonblocking)
    }

    /// Set the socket read deadline used by blocking reads.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.socket.set_read_timeout(timeout)
    }

    /// Set the socket write deadline used by blocking writes.
    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.socket.set_write_timeout(timeout)
    }

    fn write_timed_out() -> ProtoError {
        ProtoError::Io(io::Error::new(io::ErrorKind::TimedOut, "websocket write timed out"))
    }
}

impl std::fmt::Debug for WsConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsConnection")
            .field("id", &self.id)
            .field("peer", &self.socket.peer_addr().ok())
            .finish_non_exhaustive()
    }
}

/// Map a tungstenite error onto the protocol error space.
fn map_ws_error(err: tungstenite::Error) -> ProtoError {
    match err {
        tungstenite::Error::Io(e) => ProtoError::Io(e),
        tungstenite::Error::ConnectionClosed
        | tungstenite::Error::AlreadyClosed
        | tungstenite::Error::Protocol(ProtocolError::ResetWithoutClosingHandshake) => ProtoError::ConnectionClosed,
        other => ProtoError::Io(io::Error::other(other)),
    }
}

fn is_would_block(err: &tungstenite::Error) -> bool {
    matches!(err, tungstenite::Error::Io(e) if e.kind() == io::ErrorKind::WouldBlock)
}

impl JsonConn for WsConnection {
    fn read_text(&self) -> gate_wsproto::Result<String> {
        let mut ws = self.ws.lock();
        loop {
            match ws.read() {
                Ok(Message::Text(text)) => return Ok(text.as_str().to_owned()),
                Ok(Message::Binary(bytes)) => {
                    return String::from_utf8(bytes.to_vec())
                        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e).into());
                }
                // Pings are answered by tungstenite on the next flush.
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
                Ok(Message::Close(_)) => return Err(ProtoError::ConnectionClosed),
                Err(e) => return Err(map_ws_error(e)),
            }
        }
    }

    fn write_text(&self, text: &str) -> gate_wsproto::Result<()> {
        let mut ws = self.ws.lock();
        let deadline = Instant::now() + self.write_timeout;
        // A WouldBlock from send means the frame is queued but not flushed.
        let mut result = ws.send(Message::Text(text.to_owned().into()));
        loop {
            match result {
                Ok(()) => return Ok(()),
                Err(e) if is_would_block(&e) => {
                    if Instant::now() >= deadline {
                        return Err(Self::write_timed_out());
                    }
                    std::thread::sleep(WRITE_RETRY_INTERVAL);
                    result = ws.flush();
                }
                Err(e) => return Err(map_ws_error(e)),
            }
        }
    }

    fn close(&self, code: u16, reason: &str) -> gate_wsproto::Result<()> {
        let mut ws = self.ws.lock();
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_owned().into(),
        };
        let sent = match ws.close(Some(frame)) {
            Ok(()) => Ok(()),
            Err(e) if is_would_block(&e) => ws.flush().or_else(|e| if is_would_block(&e) { Ok(()) } else { Err(e) }),
            Err(e) => Err(e),
        };
        drop(ws);
        match self.socket.shutdown(Shutdown::Both) {
            Err(e) if e.kind() != io::ErrorKind::NotConnected => return Err(e.into()),
            _ => {}
        }
        match sent {
            Ok(()) | Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(e) => Err(map_ws_error(e)),
        }
    }
}

impl AsFd for WsConnection {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.socket.as_fd()
    }
}

impl PollConn for WsConnection {
    fn close(&self) -> io::Result<()> {
        match self.socket.shutdown(Shutdown::Both) {
            Err(e) if e.kind() != io::ErrorKind::NotConnected => Err(e),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;
    use std::thread;

    use assert_matches::assert_matches;
    use tungstenite::{accept, client};

    use super::*;

    /// Server-side connection plus a blocking client.
    fn pair() -> (WsConnection, WebSocket<TcpStream>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = thread::spawn(move || {
            let stream = TcpStream::connect(addr).unwrap();
            let (ws, _) = client::client(format!("ws://{addr}/"), stream).unwrap();
            ws
        });
        let (stream, _) = listener.accept().unwrap();
        let socket = stream.try_clone().unwrap();
        let ws = accept(stream).unwrap();
        let conn = WsConnection::new(1, ws, socket, Duration::from_secs(1));
        (conn, client.join().unwrap())
    }

    #[test]
    fn text_round_trip() {
        let (conn, mut client) = pair();
        client.send(Message::Text("hello".to_owned().into())).unwrap();
        assert_eq!(conn.read_text().unwrap(), "hello");

        conn.write_text("world").unwrap();
        assert_eq!(client.read().unwrap(), Message::Text("world".to_owned().into()));
    }

    #[test]
    fn binary_frames_are_decoded_as_text() {
        let (conn, mut client) = pair();
        client.send(Message::Binary(b"{}".to_vec().into())).unwrap();
        assert_eq!(conn.read_text().unwrap(), "{}");
    }

    #[test]
    fn nonblocking_read_reports_would_block() {
        let (conn, _client) = pair();
        conn.socket.set_nonblocking(true).unwrap();
        assert!(conn.read_text().unwrap_err().is_would_block());
    }

    #[test]
    fn client_close_is_connection_closed() {
        let (conn, mut client) = pair();
        client.close(None).unwrap();
        assert_matches!(conn.read_text(), Err(ProtoError::ConnectionClosed));
    }

    #[test]
    fn close_sends_close_frame() {
        let (conn, mut client) = pair();
        JsonConn::close(&conn, 1000, "bye").unwrap();
        match client.read().unwrap() {
            Message::Close(Some(frame)) => {
                assert_eq!(u16::from(frame.code), 1000);
                assert_eq!(frame.reason.as_str(), "bye");
            }
            other => panic!("expected close frame, got {other:?}"),
        }
    }
}
