//! Ping configuration types and constants.

use crate::keys::{PresharedKey, PrivateKey, PublicKey};
use std::fmt;
use std::time::Duration;

/// Default UDP port probed on each endpoint.
pub const DEFAULT_PORT: u16 = 2408;

/// Default time to wait for a handshake response.
pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_secs(2);

/// Configuration used to build a [`Pinger`](crate::Pinger).
#[derive(Debug, Clone)]
pub struct PingConfiguration {
    /// Local static identity. Peers only answer identities they know, so
    /// the default random identity is only useful against permissive peers.
    pub private_key: PrivateKey,
    /// Static public key of the probed peers.
    pub peer_public_key: PublicKey,
    /// Optional preshared key, all zero when unset.
    pub preshared_key: Option<PresharedKey>,
    /// Bytes 1..4 of the initiation. WARP reads a client id from here,
    /// plain WireGuard expects zeros.
    pub reserved: [u8; 3],
    /// UDP port probed on each address.
    pub port: u16,
    /// Maximum time to wait for the response.
    pub timeout: Duration,
}

impl Default for PingConfiguration {
    fn default() -> Self {
        Self {
            private_key: PrivateKey::generate(),
            peer_public_key: PublicKey::warp(),
            preshared_key: None,
            reserved: [0; 3],
            port: DEFAULT_PORT,
            timeout: DEFAULT_PING_TIMEOUT,
        }
    }
}

impl PingConfiguration {
    /// Set the local static identity.
    pub fn with_private_key(mut self, key: PrivateKey) -> Self {
        self.private_key = key;
        self
    }

    /// Set the public key expected from the probed peers.
    pub fn with_peer_public_key(mut self, key: PublicKey) -> Self {
        self.peer_public_key = key;
        self
    }

    /// Mix a preshared key into the handshake.
    pub fn with_preshared_key(mut self, key: PresharedKey) -> Self {
        self.preshared_key = Some(key);
        self
    }

    /// Set the reserved bytes of the initiation.
    pub fn with_reserved(mut self, reserved: [u8; 3]) -> Self {
        self.reserved = reserved;
        self
    }

    /// Set the UDP port probed on each address.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the response timeout.
    ///
    /// Anything slower than this is reported as [`PingError::TimedOut`](crate::PingError::TimedOut).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl fmt::Display for PingConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PingConfiguration {{ peer: {}, psk: {}, reserved: {:?}, port: {}, timeout: {:?} }}",
            self.peer_public_key,
            if self.preshared_key.is_some() {
                "set"
            } else {
                "none"
            },
            self.reserved,
            self.port,
            self.timeout
        )
    }
}
