//! End-to-end payload sealing for relayed sessions.
//!
//! Peers exchange X25519 public keys inside the QUIC offer, derive a shared
//! key bound to the session id, and seal relay payloads with
//! ChaCha20-Poly1305 so the relay forwards only opaque envelopes.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chacha20poly1305::aead::{Aead, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, KeyInit, Nonce};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use serde_json::{json, Value};
use sha2::Sha256;
use thiserror::Error;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroize;

const NONCE_LEN: usize = 12;
const SHARED_KEY_LEN: usize = 32;

/// Errors raised by key derivation and payload sealing.
#[derive(Debug, Error)]
pub enum SealError {
    /// A peer public key was not 32 bytes of valid base64.
    #[error("invalid peer public key: {0}")]
    InvalidPeerKey(String),
    /// A sealed envelope was missing fields or carried invalid base64.
    #[error("invalid sealed envelope: {0}")]
    InvalidEnvelope(String),
    /// Authentication failed while opening an envelope.
    #[error("payload authentication failed")]
    AuthenticationFailed,
    /// The plaintext could not be serialized or the opened bytes were not JSON.
    #[error("payload serialization failed: {0}")]
    Serialization(String),
}

/// An X25519 keypair for end-to-end relay sealing.
///
/// The secret is zeroized on drop.
pub struct E2eeKeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl E2eeKeyPair {
    /// Generates a fresh keypair from OS randomness.
    #[must_use]
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// The public key, base64-encoded for embedding in a QUIC offer.
    #[must_use]
    pub fn public_key_b64(&self) -> String {
        BASE64.encode(self.public.as_bytes())
    }

    /// Derives the 32-byte shared sealing key for one relay session.
    ///
    /// Both peers derive the same key: X25519 DH with the other side's
    /// public key, expanded through HKDF-SHA256 with the session id bound
    /// into the info string.
    ///
    /// # Errors
    ///
    /// Returns [`SealError::InvalidPeerKey`] when the peer key does not
    /// decode to 32 bytes.
    pub fn derive_relay_shared_key(
        &self,
        peer_public_b64: &str,
        session_id: &str,
    ) -> Result<[u8; SHARED_KEY_LEN], SealError> {
        let peer_bytes = BASE64
            .decode(peer_public_b64.trim())
            .map_err(|e| SealError::InvalidPeerKey(e.to_string()))?;
        let peer_array: [u8; 32] = peer_bytes
            .try_into()
            .map_err(|_| SealError::InvalidPeerKey("key must be 32 bytes".to_string()))?;
        let peer = PublicKey::from(peer_array);

        let mut shared = *self.secret.diffie_hellman(&peer).as_bytes();
        let hkdf = Hkdf::<Sha256>::new(None, &shared);
        shared.zeroize();

        let info = format!("gann relay e2ee v1:{session_id}");
        let mut key = [0u8; SHARED_KEY_LEN];
        hkdf.expand(info.as_bytes(), &mut key)
            .expect("32 bytes is a valid HKDF-SHA256 output length");
        Ok(key)
    }
}

/// Seals a JSON payload into an opaque relay envelope.
///
/// The session id is bound as associated data so an envelope replayed onto
/// another session fails to open.
///
/// # Errors
///
/// Returns [`SealError`] when serialization or encryption fails.
pub fn seal_payload(
    shared_key: &[u8; SHARED_KEY_LEN],
    session_id: &str,
    plaintext: &Value,
) -> Result<Value, SealError> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(shared_key));
    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);

    let msg = serde_json::to_vec(plaintext).map_err(|e| SealError::Serialization(e.to_string()))?;
    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&nonce_bytes),
            Payload {
                msg: &msg,
                aad: session_id.as_bytes(),
            },
        )
        .map_err(|_| SealError::AuthenticationFailed)?;

    Ok(json!({
        "nonce_b64": BASE64.encode(nonce_bytes),
        "ciphertext_b64": BASE64.encode(ciphertext),
    }))
}

/// Opens a sealed relay envelope back into its JSON payload.
///
/// # Errors
///
/// Returns [`SealError`] when the envelope is malformed or authentication
/// fails (wrong key, wrong session, or tampering).
pub fn open_payload(
    shared_key: &[u8; SHARED_KEY_LEN],
    session_id: &str,
    sealed: &Value,
) -> Result<Value, SealError> {
    let nonce_b64 = sealed
        .get("nonce_b64")
        .and_then(Value::as_str)
        .ok_or_else(|| SealError::InvalidEnvelope("missing nonce_b64".to_string()))?;
    let ciphertext_b64 = sealed
        .get("ciphertext_b64")
        .and_then(Value::as_str)
        .ok_or_else(|| SealError::InvalidEnvelope("missing ciphertext_b64".to_string()))?;

    let nonce_bytes = BASE64
        .decode(nonce_b64)
        .map_err(|e| SealError::InvalidEnvelope(e.to_string()))?;
    if nonce_bytes.len() != NONCE_LEN {
        return Err(SealError::InvalidEnvelope(format!(
            "nonce must be {NONCE_LEN} bytes, got {}",
            nonce_bytes.len()
        )));
    }
    let ciphertext = BASE64
        .decode(ciphertext_b64)
        .map_err(|e| SealError::InvalidEnvelope(e.to_string()))?;

    let cipher = ChaCha20Poly1305::new(Key::from_slice(shared_key));
    let plaintext = cipher
        .decrypt(
            Nonce::from_slice(&nonce_bytes),
            Payload {
                msg: &ciphertext,
                aad: session_id.as_bytes(),
            },
        )
        .map_err(|_| SealError::AuthenticationFailed)?;

    serde_json::from_slice(&plaintext).map_err(|e| SealError::Serialization(e.to_string()))
}
