//! Error types for pinging an endpoint.

use crate::handshake::HandshakeError;
use std::error::Error;
use std::fmt;
use std::io;

/// Errors that can occur while pinging an endpoint.
#[derive(Debug)]
pub enum PingError {
    /// An I/O error occurred on the socket, including ICMP rejections
    /// reported on the connected socket.
    Io(io::Error),
    /// No response arrived before the configured timeout.
    TimedOut,
    /// A datagram arrived but was not a valid answer to the handshake.
    Handshake(HandshakeError),
}

impl fmt::Display for PingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PingError::Io(err) => write!(f, "Ping error: {err}"),
            PingError::TimedOut => write!(f, "Ping timed out waiting for a handshake response"),
            PingError::Handshake(err) => write!(f, "Ping handshake failed: {err}"),
        }
    }
}

impl Error for PingError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            PingError::Io(err) => Some(err),
            PingError::TimedOut => None,
            PingError::Handshake(err) => Some(err),
        }
    }
}

impl From<io::Error> for PingError {
    fn from(err: io::Error) -> Self {
        PingError::Io(err)
    }
}

impl From<HandshakeError> for PingError {
    fn from(err: HandshakeError) -> Self {
        PingError::Handshake(err)
    }
}
