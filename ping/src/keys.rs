//! Curve25519 key material in WireGuard's base64 encoding.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use rand::rngs::OsRng;
use std::error::Error;
use std::fmt;
use std::str::FromStr;
use x25519_dalek::StaticSecret;

/// Length in bytes of every WireGuard key.
pub const KEY_LEN: usize = 32;

/// Public key of the Cloudflare WARP servers, base64 encoded.
pub const WARP_PEER_PUBLIC_KEY: &str = "bmXOC+F1FxEMF9dyiK2H5/1SUtzH0JuVo51h2wPfgyo=";

const WARP_PEER_PUBLIC_KEY_BYTES: [u8; KEY_LEN] = [
    0x6e, 0x65, 0xce, 0x0b, 0xe1, 0x75, 0x17, 0x11, 0x0c, 0x17, 0xd7, 0x72, 0x88, 0xad, 0x87, 0xe7,
    0xfd, 0x52, 0x52, 0xdc, 0xc7, 0xd0, 0x9b, 0x95, 0xa3, 0x9d, 0x61, 0xdb, 0x03, 0xdf, 0x83, 0x2a,
];

/// Errors that can occur while parsing a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    /// The input is not valid base64.
    Encoding(base64::DecodeError),
    /// The input decoded to the wrong number of bytes.
    Length(usize),
}

impl fmt::Display for KeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyError::Encoding(err) => write!(f, "Key is not valid base64: {err}"),
            KeyError::Length(len) => {
                write!(f, "Key must be {KEY_LEN} bytes, got {len}")
            }
        }
    }
}

impl Error for KeyError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            KeyError::Encoding(err) => Some(err),
            KeyError::Length(_) => None,
        }
    }
}

impl From<base64::DecodeError> for KeyError {
    fn from(err: base64::DecodeError) -> Self {
        KeyError::Encoding(err)
    }
}

fn decode_key(s: &str) -> Result<[u8; KEY_LEN], KeyError> {
    let bytes = STANDARD.decode(s.trim())?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| KeyError::Length(bytes.len()))
}

/// Static private key identifying the local side of the handshake.
#[derive(Clone, PartialEq, Eq)]
pub struct PrivateKey([u8; KEY_LEN]);

impl PrivateKey {
    /// Generate a fresh random identity.
    pub fn generate() -> Self {
        PrivateKey(StaticSecret::random_from_rng(OsRng).to_bytes())
    }

    /// Derive the public key matching this private key.
    pub fn public_key(&self) -> PublicKey {
        let secret = StaticSecret::from(self.0);
        PublicKey(x25519_dalek::PublicKey::from(&secret).to_bytes())
    }

    pub(crate) fn secret(&self) -> StaticSecret {
        StaticSecret::from(self.0)
    }
}

impl From<[u8; KEY_LEN]> for PrivateKey {
    fn from(bytes: [u8; KEY_LEN]) -> Self {
        PrivateKey(bytes)
    }
}

impl FromStr for PrivateKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_key(s).map(PrivateKey)
    }
}

// Never print secret material.
impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(..)")
    }
}

/// Public key of either side of the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; KEY_LEN]);

impl PublicKey {
    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// The WARP server key, see [`WARP_PEER_PUBLIC_KEY`].
    pub const fn warp() -> Self {
        PublicKey(WARP_PEER_PUBLIC_KEY_BYTES)
    }

    pub(crate) fn dalek(&self) -> x25519_dalek::PublicKey {
        x25519_dalek::PublicKey::from(self.0)
    }
}

impl From<[u8; KEY_LEN]> for PublicKey {
    fn from(bytes: [u8; KEY_LEN]) -> Self {
        PublicKey(bytes)
    }
}

impl FromStr for PublicKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_key(s).map(PublicKey)
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&STANDARD.encode(self.0))
    }
}

/// Optional symmetric key mixed into the handshake (the `psk` of `IKpsk2`).
#[derive(Clone, PartialEq, Eq)]
pub struct PresharedKey([u8; KEY_LEN]);

impl PresharedKey {
    pub(crate) fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl From<[u8; KEY_LEN]> for PresharedKey {
    fn from(bytes: [u8; KEY_LEN]) -> Self {
        PresharedKey(bytes)
    }
}

impl FromStr for PresharedKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_key(s).map(PresharedKey)
    }
}

impl fmt::Debug for PresharedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PresharedKey(..)")
    }
}
