//! WireGuard handshake messages (`Noise_IKpsk2_25519_ChaChaPoly_BLAKE2s`).
//!
//! Only the initiator side is implemented, and only as far as a ping needs:
//! build a handshake initiation and authenticate the responder's answer. No
//! transport keys are derived and no cookie replies are handled.

use crate::configuration::PingConfiguration;
use crate::keys::KEY_LEN;
use blake2s_simd::Params as Blake2sParams;
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use std::error::Error;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use x25519_dalek::{PublicKey, StaticSecret};

const CONSTRUCTION: &[u8] = b"Noise_IKpsk2_25519_ChaChaPoly_BLAKE2s";
const IDENTIFIER: &[u8] = b"WireGuard v1 zx2c4 Jason@zx2c4.com";
const LABEL_MAC1: &[u8] = b"mac1----";

const MESSAGE_INITIATION: u8 = 1;
const MESSAGE_RESPONSE: u8 = 2;

/// Size of a handshake initiation on the wire.
pub const INITIATION_LEN: usize = 148;
/// Size of a handshake response on the wire.
pub const RESPONSE_LEN: usize = 92;

const MAC_LEN: usize = 16;
const TAG_LEN: usize = 16;
const TIMESTAMP_LEN: usize = 12;
const BLAKE2S_BLOCK_LEN: usize = 64;

/// TAI64 label for the unix epoch, including the 10 second TAI offset.
const TAI64_EPOCH: u64 = 0x4000_0000_0000_000a;

/// Ways a handshake response can fail validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeError {
    /// The datagram is not a handshake response answering our initiation.
    MalformedResponse(&'static str),
    /// The response did not authenticate under the negotiated keys.
    AuthenticationFailed,
}

impl fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeError::MalformedResponse(reason) => {
                write!(f, "Malformed handshake response: {reason}")
            }
            HandshakeError::AuthenticationFailed => {
                write!(f, "Handshake response failed authentication")
            }
        }
    }
}

impl Error for HandshakeError {}

type Hash = [u8; 32];

fn hash(parts: &[&[u8]]) -> Hash {
    let mut state = blake2s_simd::State::new();
    for part in parts {
        state.update(part);
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(state.finalize().as_bytes());
    out
}

/// Keyed BLAKE2s with a 128 bit output.
fn mac(key: &[u8], parts: &[&[u8]]) -> [u8; MAC_LEN] {
    let mut state = Blake2sParams::new().hash_length(MAC_LEN).key(key).to_state();
    for part in parts {
        state.update(part);
    }
    let mut out = [0u8; MAC_LEN];
    out.copy_from_slice(state.finalize().as_bytes());
    out
}

/// HMAC over BLAKE2s, as used by the Noise key derivation.
fn hmac(key: &[u8], parts: &[&[u8]]) -> Hash {
    let mut ipad = [0x36u8; BLAKE2S_BLOCK_LEN];
    let mut opad = [0x5cu8; BLAKE2S_BLOCK_LEN];
    for (i, byte) in key.iter().enumerate() {
        ipad[i] ^= byte;
        opad[i] ^= byte;
    }

    let mut inner = blake2s_simd::State::new();
    inner.update(&ipad);
    for part in parts {
        inner.update(part);
    }
    let inner = inner.finalize();

    hash(&[&opad, inner.as_bytes()])
}

fn kdf1(chaining_key: &Hash, input: &[u8]) -> Hash {
    let prk = hmac(chaining_key, &[input]);
    hmac(&prk, &[&[0x1]])
}

fn kdf2(chaining_key: &Hash, input: &[u8]) -> (Hash, Hash) {
    let prk = hmac(chaining_key, &[input]);
    let t1 = hmac(&prk, &[&[0x1]]);
    let t2 = hmac(&prk, &[&t1, &[0x2]]);
    (t1, t2)
}

fn kdf3(chaining_key: &Hash, input: &[u8]) -> (Hash, Hash, Hash) {
    let prk = hmac(chaining_key, &[input]);
    let t1 = hmac(&prk, &[&[0x1]]);
    let t2 = hmac(&prk, &[&t1, &[0x2]]);
    let t3 = hmac(&prk, &[&t2, &[0x3]]);
    (t1, t2, t3)
}

/// Every handshake key is used exactly once, so the counter is always zero.
fn seal(key: &Hash, plaintext: &[u8], aad: &[u8]) -> Vec<u8> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    let nonce = [0u8; 12];
    // Encryption only fails for inputs far above the handshake sizes.
    cipher
        .encrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .unwrap_or_default()
}

fn open(key: &Hash, ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>, HandshakeError> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    let nonce = [0u8; 12];
    cipher
        .decrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| HandshakeError::AuthenticationFailed)
}

/// Current time as a TAI64N label.
pub fn tai64n_now() -> [u8; TIMESTAMP_LEN] {
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let mut out = [0u8; TIMESTAMP_LEN];
    out[..8].copy_from_slice(&(TAI64_EPOCH + since_epoch.as_secs()).to_be_bytes());
    out[8..].copy_from_slice(&since_epoch.subsec_nanos().to_be_bytes());
    out
}

/// A sent handshake initiation and the state needed to check its answer.
pub struct Initiation {
    packet: [u8; INITIATION_LEN],
    sender_index: u32,
    chaining_key: Hash,
    hash: Hash,
    ephemeral: StaticSecret,
    local_static: StaticSecret,
    local_public: PublicKey,
    preshared_key: [u8; KEY_LEN],
}

impl Initiation {
    /// Build a fresh initiation addressed to the configured peer.
    pub fn new(config: &PingConfiguration) -> Self {
        let peer = config.peer_public_key.dalek();
        let local_static = config.private_key.secret();
        let local_public = PublicKey::from(&local_static);
        let ephemeral = StaticSecret::random_from_rng(OsRng);
        let ephemeral_public = PublicKey::from(&ephemeral);
        let sender_index = OsRng.next_u32();

        let chaining_key = hash(&[CONSTRUCTION]);
        let h = hash(&[&chaining_key, IDENTIFIER]);
        let h = hash(&[&h, peer.as_bytes()]);

        let chaining_key = kdf1(&chaining_key, ephemeral_public.as_bytes());
        let h = hash(&[&h, ephemeral_public.as_bytes()]);

        let (chaining_key, key) =
            kdf2(&chaining_key, ephemeral.diffie_hellman(&peer).as_bytes());
        let encrypted_static = seal(&key, local_public.as_bytes(), &h);
        let h = hash(&[&h, &encrypted_static]);

        let (chaining_key, key) =
            kdf2(&chaining_key, local_static.diffie_hellman(&peer).as_bytes());
        let encrypted_timestamp = seal(&key, &tai64n_now(), &h);
        let h = hash(&[&h, &encrypted_timestamp]);

        let mut packet = [0u8; INITIATION_LEN];
        packet[0] = MESSAGE_INITIATION;
        packet[1..4].copy_from_slice(&config.reserved);
        packet[4..8].copy_from_slice(&sender_index.to_le_bytes());
        packet[8..40].copy_from_slice(ephemeral_public.as_bytes());
        packet[40..88].copy_from_slice(&encrypted_static);
        packet[88..116].copy_from_slice(&encrypted_timestamp);
        let mac1_key = hash(&[LABEL_MAC1, peer.as_bytes()]);
        let mac1 = mac(&mac1_key, &[&packet[..116]]);
        packet[116..132].copy_from_slice(&mac1);
        // mac2 stays zero, no cookie has been received.

        Initiation {
            packet,
            sender_index,
            chaining_key,
            hash: h,
            ephemeral,
            local_static,
            local_public,
            preshared_key: config
                .preshared_key
                .as_ref()
                .map(|psk| *psk.as_bytes())
                .unwrap_or([0u8; KEY_LEN]),
        }
    }

    /// Bytes to put on the wire.
    pub fn packet(&self) -> &[u8] {
        &self.packet
    }

    /// Random index identifying this handshake.
    #[cfg(test)]
    pub fn sender_index(&self) -> u32 {
        self.sender_index
    }

    /// Check that `response` is the peer's authenticated answer to this initiation.
    pub fn validate_response(&self, response: &[u8]) -> Result<(), HandshakeError> {
        if response.len() != RESPONSE_LEN {
            return Err(HandshakeError::MalformedResponse("unexpected length"));
        }
        if response[0] != MESSAGE_RESPONSE {
            return Err(HandshakeError::MalformedResponse("unexpected message type"));
        }
        let mut receiver = [0u8; 4];
        receiver.copy_from_slice(&response[8..12]);
        if u32::from_le_bytes(receiver) != self.sender_index {
            return Err(HandshakeError::MalformedResponse("unknown receiver index"));
        }

        let mac1_key = hash(&[LABEL_MAC1, self.local_public.as_bytes()]);
        if mac(&mac1_key, &[&response[..60]]) != response[60..76] {
            return Err(HandshakeError::AuthenticationFailed);
        }

        let mut remote_ephemeral = [0u8; 32];
        remote_ephemeral.copy_from_slice(&response[12..44]);
        let remote_ephemeral = PublicKey::from(remote_ephemeral);

        let chaining_key = kdf1(&self.chaining_key, remote_ephemeral.as_bytes());
        let h = hash(&[&self.hash, remote_ephemeral.as_bytes()]);
        let chaining_key = kdf1(
            &chaining_key,
            self.ephemeral.diffie_hellman(&remote_ephemeral).as_bytes(),
        );
        let chaining_key = kdf1(
            &chaining_key,
            self.local_static
                .diffie_hellman(&remote_ephemeral)
                .as_bytes(),
        );
        let (_, tau, key) = kdf3(&chaining_key, &self.preshared_key);
        let h = hash(&[&h, &tau]);

        let empty = open(&key, &response[44..44 + TAG_LEN], &h)?;
        if !empty.is_empty() {
            return Err(HandshakeError::MalformedResponse("non-empty payload"));
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_utils {
    //! Responder side of the handshake, enough to answer an [`Initiation`].

    use super::*;

    /// Answer `initiation` as the peer owning `responder_static` would.
    ///
    /// Returns `None` if the initiation does not decrypt under that key.
    pub fn respond(
        initiation: &[u8],
        responder_static: &StaticSecret,
        preshared_key: [u8; KEY_LEN],
    ) -> Option<[u8; RESPONSE_LEN]> {
        if initiation.len() != INITIATION_LEN || initiation[0] != MESSAGE_INITIATION {
            return None;
        }
        let responder_public = PublicKey::from(responder_static);

        let mac1_key = hash(&[LABEL_MAC1, responder_public.as_bytes()]);
        if mac(&mac1_key, &[&initiation[..116]]) != initiation[116..132] {
            return None;
        }

        let chaining_key = hash(&[CONSTRUCTION]);
        let h = hash(&[&chaining_key, IDENTIFIER]);
        let h = hash(&[&h, responder_public.as_bytes()]);

        let mut initiator_ephemeral = [0u8; 32];
        initiator_ephemeral.copy_from_slice(&initiation[8..40]);
        let initiator_ephemeral = PublicKey::from(initiator_ephemeral);
        let chaining_key = kdf1(&chaining_key, initiator_ephemeral.as_bytes());
        let h = hash(&[&h, initiator_ephemeral.as_bytes()]);

        let (chaining_key, key) = kdf2(
            &chaining_key,
            responder_static
                .diffie_hellman(&initiator_ephemeral)
                .as_bytes(),
        );
        let initiator_static = open(&key, &initiation[40..88], &h).ok()?;
        let h = hash(&[&h, &initiation[40..88]]);
        let initiator_static: [u8; 32] = initiator_static.as_slice().try_into().ok()?;
        let initiator_static = PublicKey::from(initiator_static);

        let (chaining_key, key) = kdf2(
            &chaining_key,
            responder_static.diffie_hellman(&initiator_static).as_bytes(),
        );
        open(&key, &initiation[88..116], &h).ok()?;
        let h = hash(&[&h, &initiation[88..116]]);

        let ephemeral = StaticSecret::random_from_rng(OsRng);
        let ephemeral_public = PublicKey::from(&ephemeral);
        let chaining_key = kdf1(&chaining_key, ephemeral_public.as_bytes());
        let h = hash(&[&h, ephemeral_public.as_bytes()]);
        let chaining_key = kdf1(
            &chaining_key,
            ephemeral.diffie_hellman(&initiator_ephemeral).as_bytes(),
        );
        let chaining_key = kdf1(
            &chaining_key,
            ephemeral.diffie_hellman(&initiator_static).as_bytes(),
        );
        let (_, tau, key) = kdf3(&chaining_key, &preshared_key);
        let h = hash(&[&h, &tau]);
        let empty = seal(&key, &[], &h);

        let mut response = [0u8; RESPONSE_LEN];
        response[0] = MESSAGE_RESPONSE;
        response[4..8].copy_from_slice(&OsRng.next_u32().to_le_bytes());
        response[8..12].copy_from_slice(&initiation[4..8]);
        response[12..44].copy_from_slice(ephemeral_public.as_bytes());
        response[44..60].copy_from_slice(&empty);
        let mac1_key = hash(&[LABEL_MAC1, initiator_static.as_bytes()]);
        let mac1 = mac(&mac1_key, &[&response[..60]]);
        response[60..76].copy_from_slice(&mac1);
        Some(response)
    }
}
