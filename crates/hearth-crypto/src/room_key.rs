//! Room secrets and symmetric room keys
//!
//! The room identifier and room key are derived from the shared secret
//! with BLAKE3 key derivation under distinct context strings, so knowing
//! the (public) room identifier reveals nothing about the key.

use chacha20poly1305::{
    ChaCha20Poly1305, Nonce,
    aead::{Aead, KeyInit},
};
use rand::RngCore;

use hearth_core::RoomId;

use crate::error::CryptoError;

/// Nonce size for ChaCha20-Poly1305 (12 bytes)
pub const NONCE_SIZE: usize = 12;

/// Secret size (32 bytes)
pub const SECRET_SIZE: usize = 32;

const ROOM_ID_CONTEXT: &str = "hearth v1 room id";
const ROOM_KEY_CONTEXT: &str = "hearth v1 room key";

/// Shared secret of a room
///
/// Distributed out of band between mutually-trusted members; never
/// transmitted over the protocol.
#[derive(Clone)]
pub struct RoomSecret([u8; SECRET_SIZE]);

impl RoomSecret {
    /// Generate a new random secret
    pub fn generate() -> Self {
        let mut bytes = [0u8; SECRET_SIZE];
        rand::rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; SECRET_SIZE]) -> Self {
        Self(bytes)
    }

    /// Derive a secret from a human-chosen passphrase
    pub fn from_passphrase(passphrase: &str) -> Self {
        Self(*blake3::hash(passphrase.as_bytes()).as_bytes())
    }

    /// Get the underlying bytes
    pub fn as_bytes(&self) -> &[u8; SECRET_SIZE] {
        &self.0
    }

    /// Derive the room identifier
    pub fn derive_room_id(&self) -> RoomId {
        RoomId::new(blake3::derive_key(ROOM_ID_CONTEXT, &self.0))
    }

    /// Derive the symmetric room key
    pub fn derive_key(&self) -> RoomKey {
        RoomKey {
            key: blake3::derive_key(ROOM_KEY_CONTEXT, &self.0),
        }
    }
}

/// Symmetric key shared by all members of a room
#[derive(Clone)]
pub struct RoomKey {
    key: [u8; 32],
}

impl RoomKey {
    /// Encrypt plaintext, returning nonce ‖ ciphertext
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let cipher = ChaCha20Poly1305::new_from_slice(&self.key)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

        let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt nonce ‖ ciphertext
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if data.len() < NONCE_SIZE {
            return Err(CryptoError::DecryptionFailed(
                "data too short for nonce".to_string(),
            ));
        }

        let cipher = ChaCha20Poly1305::new_from_slice(&self.key)
            .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))?;
        let nonce = Nonce::from_slice(&data[..NONCE_SIZE]);

        cipher
            .decrypt(nonce, &data[NONCE_SIZE..])
            .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
    }
}
