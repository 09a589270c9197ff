//! Handshake round-trip probe for WireGuard endpoints.
//!
//! A [`Pinger`] sends a single handshake initiation to an endpoint and
//! measures the time until an authenticated handshake response arrives. No
//! session is established, the handshake state is discarded afterwards.

mod configuration;
mod error;
mod handshake;
mod keys;
mod pinger;

pub use configuration::{PingConfiguration, DEFAULT_PING_TIMEOUT, DEFAULT_PORT};
pub use error::PingError;
pub use handshake::{HandshakeError, INITIATION_LEN, RESPONSE_LEN};
pub use keys::{KeyError, PresharedKey, PrivateKey, PublicKey, KEY_LEN, WARP_PEER_PUBLIC_KEY};
pub use pinger::Pinger;
