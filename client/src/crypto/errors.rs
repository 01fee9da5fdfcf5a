//! Cryptographic error types
//!
//! This module defines all error types for room key exchange, key storage and
//! message protection.

use thiserror::Error;

use crate::crypto::keys::KeyClass;

/// Errors that can occur during cryptographic operations
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The persistent key store could not be opened
    #[error("Key store unavailable: {0}")]
    StoreUnavailable(String),

    /// Database error while reading or writing a key record
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// No record under the given class and id
    #[error("No {class} key stored for: {id}")]
    KeyNotFound { class: KeyClass, id: String },

    /// The directory has no public key for the peer (handshake abandoned)
    #[error("No public key available for peer: {0}")]
    PeerKeyUnavailable(String),

    /// The wrapped room key could not be unwrapped (handshake abandoned)
    #[error("Failed to unwrap room key: {0}")]
    KeyUnwrapFailed(String),

    /// An earlier key is not established yet; retry after the handshake completes
    #[error("Prerequisite key missing: {0}")]
    PrerequisiteKeyMissing(String),

    /// Authenticated decryption rejected the ciphertext
    #[error("Decryption failed")]
    DecryptionFailed,

    /// The message tag did not verify
    #[error("Integrity check failed for message from: {0}")]
    IntegrityCheckFailed(String),

    /// Room key or auth key missing, outgoing message not sent
    #[error("Keys unavailable for room: {0}")]
    KeysUnavailable(String),

    /// Failed to generate a key
    #[error("Key generation failed: {0}")]
    KeyGenerationFailed(String),

    /// Failed to parse or decode a key
    #[error("Invalid key format: {0}")]
    InvalidKey(String),

    /// A stored record does not carry the usages the caller asked for
    #[error("Key usage mismatch: expected {expected}, stored {stored}")]
    UsageMismatch { expected: String, stored: String },

    /// An event arrived that is not valid in the room's current handshake state
    #[error("Handshake event {event} not valid in state {state} for room {room_id}")]
    HandshakeOutOfOrder {
        room_id: String,
        state: String,
        event: String,
    },

    /// Encryption failed
    #[error("Encryption failed: {0}")]
    EncryptionError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Directory lookup failed for a reason other than a missing key
    #[error("Directory error: {0}")]
    Directory(String),
}

impl CryptoError {
    /// Whether the failure abandons the current handshake until a fresh `room_ready`
    pub fn abandons_handshake(&self) -> bool {
        matches!(
            self,
            CryptoError::PeerKeyUnavailable(_) | CryptoError::KeyUnwrapFailed(_)
        )
    }

    /// Whether the caller should wait for an earlier handshake step and retry
    pub fn is_transient(&self) -> bool {
        matches!(self, CryptoError::PrerequisiteKeyMissing(_))
    }
}

impl From<aes_gcm::Error> for CryptoError {
    fn from(_: aes_gcm::Error) -> Self {
        CryptoError::DecryptionFailed
    }
}

impl From<serde_json::Error> for CryptoError {
    fn from(e: serde_json::Error) -> Self {
        CryptoError::SerializationError(e.to_string())
    }
}

impl From<base64::DecodeError> for CryptoError {
    fn from(e: base64::DecodeError) -> Self {
        CryptoError::InvalidKey(format!("Invalid base64: {}", e))
    }
}

/// Result type for cryptographic operations
pub type CryptoResult<T> = Result<T, CryptoError>;
