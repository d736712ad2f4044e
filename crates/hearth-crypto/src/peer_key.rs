//! Peer keypairs for the encryption bootstrap
//!
//! Peers exchange public keys over the wire (the `public-key` frame) and
//! derive a pairwise key via X25519, used to encrypt directly addressed
//! payloads such as key handovers.

use chacha20poly1305::{
    ChaCha20Poly1305, Nonce,
    aead::{Aead, KeyInit},
};
use rand::RngCore;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::error::CryptoError;
use crate::room_key::NONCE_SIZE;

/// X25519 keypair identifying a peer for encryption purposes
#[derive(Clone)]
pub struct PeerKeyPair {
    secret: StaticSecret,
}

impl PeerKeyPair {
    /// Generate a new keypair
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::rng().fill_bytes(&mut bytes);
        Self {
            secret: StaticSecret::from(bytes),
        }
    }

    /// Restore a keypair from secret bytes
    pub fn from_secret_bytes(bytes: [u8; 32]) -> Self {
        Self {
            secret: StaticSecret::from(bytes),
        }
    }

    /// Our public key, as shared in the `public-key` frame
    pub fn public_key(&self) -> [u8; 32] {
        PublicKey::from(&self.secret).to_bytes()
    }

    fn pairwise_cipher(&self, their_public: &[u8; 32]) -> Result<ChaCha20Poly1305, CryptoError> {
        let shared = self.secret.diffie_hellman(&PublicKey::from(*their_public));
        ChaCha20Poly1305::new_from_slice(shared.as_bytes())
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))
    }

    /// Encrypt a payload for one specific peer, returning nonce ‖ ciphertext
    pub fn seal_for(
        &self,
        recipient_public: &[u8; 32],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let cipher = self.pairwise_cipher(recipient_public)?;

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

    /// Decrypt a payload sealed by `sender_public` for us
    pub fn open_from(
        &self,
        sender_public: &[u8; 32],
        data: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        if data.len() < NONCE_SIZE {
            return Err(CryptoError::DecryptionFailed(
                "data too short for nonce".to_string(),
            ));
        }

        let cipher = self.pairwise_cipher(sender_public)?;
        let nonce = Nonce::from_slice(&data[..NONCE_SIZE]);

        cipher
            .decrypt(nonce, &data[NONCE_SIZE..])
            .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
    }
}
