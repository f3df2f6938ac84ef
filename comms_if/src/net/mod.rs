//! # Network Module
//!
//! This module provides networking abstractions over websockets (via `tungstenite`), the
//! transport the driving simulator uses.
//!
//! The simulator connects to the bridge, so the bridge acts as the server: a [`WsListener`] binds
//! the endpoint and hands out one [`WsLink`] per accepted connection. Everything above the
//! transport only sees the [`SimLink`] trait so that connection handling can be driven without a
//! real socket.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    io::{self, Read, Write},
    net::{SocketAddr, TcpListener, TcpStream},
    time::Duration
};
use log::trace;
use serde::Deserialize;
use tungstenite::{
    error::ProtocolError,
    stream::MaybeTlsStream,
    Message, WebSocket
};

// Export tungstenite
pub use tungstenite;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Time a newly connected peer has to complete the websocket handshake.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// A bidirectional text link to the simulator.
pub trait SimLink {
    /// Block until the next frame arrives.
    ///
    /// Returns `Ok(None)` if the frame was not a text frame (binary, ping, pong).
    fn recv_text(&mut self) -> Result<Option<String>, NetError>;

    /// Send a text frame.
    fn send_text(&mut self, text: &str) -> Result<(), NetError>;

    /// Start closing the link. Errors are ignored since the peer may already be gone.
    fn close(&mut self);

    /// Return if the link is still connected.
    fn connected(&self) -> bool;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Network parameters, loaded from `net.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct NetParams {
    /// Endpoint the bridge listens on for the simulator, e.g. `"0.0.0.0:4567"`
    pub bind_endpoint: String
}

/// Listens for websocket connections from the simulator.
pub struct WsListener {
    listener: TcpListener,

    endpoint: String
}

/// A websocket connection which tracks whether it is still connected.
pub struct WsLink<S: Read + Write> {
    socket: WebSocket<S>,

    connected: bool
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(thiserror::Error, Debug)]
pub enum NetError {
    #[error("Could not bind to {0}: {1}")]
    BindError(String, io::Error),

    #[error("Could not accept a connection: {0}")]
    AcceptError(io::Error),

    #[error("Websocket handshake failed: {0}")]
    HandshakeError(String),

    #[error("Could not connect to the server: {0}")]
    ConnectError(tungstenite::Error),

    #[error("The connection is closed")]
    ConnectionClosed,

    #[error("Could not recieve a message: {0}")]
    RecvError(tungstenite::Error),

    #[error("Could not send a message: {0}")]
    SendError(tungstenite::Error)
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl WsListener {
    /// Bind the listener to the endpoint in the parameters.
    ///
    /// This is the only network operation whose failure should stop the executable.
    pub fn bind(params: &NetParams) -> Result<Self, NetError> {
        let listener = TcpListener::bind(&params.bind_endpoint)
            .map_err(|e| NetError::BindError(params.bind_endpoint.clone(), e))?;

        // Report the real address, in case port 0 was requested
        let endpoint = match listener.local_addr() {
            Ok(a) => a.to_string(),
            Err(_) => params.bind_endpoint.clone()
        };

        Ok(Self {
            listener,
            endpoint
        })
    }

    /// The endpoint the listener is bound to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Block until a client opens a TCP connection.
    ///
    /// The websocket handshake is not performed, pass the stream to [`handshake`] on the thread
    /// which will own the connection.
    pub fn accept(&self) -> Result<(TcpStream, SocketAddr), NetError> {
        let (stream, addr) = self.listener.accept()
            .map_err(NetError::AcceptError)?;

        // Replies are small and latency sensitive
        stream.set_nodelay(true).ok();

        Ok((stream, addr))
    }
}

impl<S: Read + Write> WsLink<S> {
    /// Wrap an established websocket.
    pub fn new(socket: WebSocket<S>) -> Self {
        Self {
            socket,
            connected: true
        }
    }

    /// Filter a tungstenite error, marking the link as disconnected and returning `None` if the
    /// error means the peer has gone.
    fn check_closed(&mut self, e: tungstenite::Error) -> Option<tungstenite::Error> {
        if is_closed_error(&e) {
            self.connected = false;
            None
        }
        else {
            Some(e)
        }
    }
}

impl<S: Read + Write> SimLink for WsLink<S> {
    fn recv_text(&mut self) -> Result<Option<String>, NetError> {
        if !self.connected {
            return Err(NetError::ConnectionClosed)
        }

        match self.socket.read() {
            Ok(Message::Text(s)) => Ok(Some(s)),
            Ok(Message::Close(frame)) => {
                trace!("Close frame recieved: {:?}", frame);
                self.connected = false;
                Err(NetError::ConnectionClosed)
            },
            Ok(_) => Ok(None),
            Err(e) => match self.check_closed(e) {
                None => Err(NetError::ConnectionClosed),
                Some(e) => Err(NetError::RecvError(e))
            }
        }
    }

    fn send_text(&mut self, text: &str) -> Result<(), NetError> {
        if !self.connected {
            return Err(NetError::ConnectionClosed)
        }

        match self.socket.send(Message::Text(text.to_owned())) {
            Ok(_) => Ok(()),
            Err(e) => match self.check_closed(e) {
                None => Err(NetError::ConnectionClosed),
                Some(e) => Err(NetError::SendError(e))
            }
        }
    }

    fn close(&mut self) {
        if self.connected {
            self.socket.close(None).ok();
            self.socket.flush().ok();
        }
        self.connected = false;
    }

    fn connected(&self) -> bool {
        self.connected
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Complete the server side of the websocket handshake on an accepted stream.
///
/// A peer which does not finish the handshake within `timeout` is dropped. The stream blocks
/// without a timeout once the handshake is done.
pub fn handshake(stream: TcpStream, timeout: Duration) -> Result<WsLink<TcpStream>, NetError> {
    stream.set_read_timeout(Some(timeout))
        .map_err(|e| NetError::HandshakeError(e.to_string()))?;

    let socket = tungstenite::accept(stream)
        .map_err(|e| NetError::HandshakeError(e.to_string()))?;

    socket.get_ref().set_read_timeout(None)
        .map_err(|e| NetError::HandshakeError(e.to_string()))?;

    Ok(WsLink::new(socket))
}

/// Connect to a websocket server, used by test clients standing in for the simulator.
pub fn connect(url: &str) -> Result<WsLink<MaybeTlsStream<TcpStream>>, NetError> {
    let (socket, _response) = tungstenite::connect(url)
        .map_err(NetError::ConnectError)?;

    Ok(WsLink::new(socket))
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Return true if the error means the connection is no longer usable.
fn is_closed_error(e: &tungstenite::Error) -> bool {
    match e {
        tungstenite::Error::ConnectionClosed 
        | tungstenite::Error::AlreadyClosed => true,
        tungstenite::Error::Protocol(ProtocolError::ResetWithoutClosingHandshake) => true,
        tungstenite::Error::Io(io_err) => matches!(
            io_err.kind(),
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
        ),
        _ => false
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
