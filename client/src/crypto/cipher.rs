//! AES-256-GCM message encryption
//!
//! Every call to [`encrypt`] draws a fresh 12-byte nonce from the OS RNG and
//! **must never reuse** a nonce with the same room key. The 16-byte GCM tag is
//! appended to the ciphertext.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::crypto::errors::{CryptoError, CryptoResult};
use crate::crypto::keys::RoomKey;

/// Byte length of an AES-GCM nonce
pub const NONCE_LEN: usize = 12;

/// Ciphertext plus the nonce it was sealed with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedBody {
    /// Encrypted payload with the GCM tag appended
    pub ciphertext: Vec<u8>,
    /// Nonce used for this encryption
    pub nonce: [u8; NONCE_LEN],
}

impl SealedBody {
    /// Bytes covered by the message tag: ciphertext followed by nonce
    pub fn signed_payload(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(self.ciphertext.len() + NONCE_LEN);
        data.extend_from_slice(&self.ciphertext);
        data.extend_from_slice(&self.nonce);
        data
    }
}

fn cipher_for(key: &RoomKey) -> CryptoResult<Aes256Gcm> {
    Aes256Gcm::new_from_slice(key.export_raw())
        .map_err(|e| CryptoError::InvalidKey(format!("Room key rejected by AES-GCM: {}", e)))
}

/// Encrypt `plaintext` under the room key with a fresh random nonce
pub fn encrypt(plaintext: &[u8], key: &RoomKey) -> CryptoResult<SealedBody> {
    let cipher = cipher_for(key)?;

    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| CryptoError::EncryptionError("AES-GCM operation failed".to_string()))?;

    Ok(SealedBody { ciphertext, nonce })
}

/// Decrypt a sealed body; nothing is returned unless the GCM tag verifies
pub fn decrypt(body: &SealedBody, key: &RoomKey) -> CryptoResult<Vec<u8>> {
    let cipher = cipher_for(key)?;
    cipher
        .decrypt(Nonce::from_slice(&body.nonce), body.ciphertext.as_slice())
        .map_err(|_| CryptoError::DecryptionFailed)
}
