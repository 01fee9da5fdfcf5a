//! Transport event payloads
//!
//! Field and event names follow the relay's socket protocol, so these types
//! serialize to exactly what the other room member's client expects.

use serde::{Deserialize, Serialize};

use crate::crypto::cipher::{SealedBody, NONCE_LEN};
use crate::crypto::errors::{CryptoError, CryptoResult};

// ============================================================================
// Message Types
// ============================================================================

/// Encrypted chat message as carried by `safe-send` / `safe-incoming`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedEnvelope {
    /// AES-GCM ciphertext (tag appended), base64 on the wire
    #[serde(rename = "cipherText", with = "base64_bytes")]
    pub ciphertext: Vec<u8>,
    /// 12-byte nonce, a JSON array of numbers on the wire
    #[serde(rename = "iv")]
    pub nonce: [u8; NONCE_LEN],
    /// Lowercase hex HMAC over ciphertext then nonce
    #[serde(rename = "hmac")]
    pub tag: String,
}

impl EncryptedEnvelope {
    /// Attach a tag to a freshly sealed body
    pub fn new(body: SealedBody, tag: String) -> Self {
        Self {
            ciphertext: body.ciphertext,
            nonce: body.nonce,
            tag,
        }
    }

    /// The part covered by the tag
    pub fn body(&self) -> SealedBody {
        SealedBody {
            ciphertext: self.ciphertext.clone(),
            nonce: self.nonce,
        }
    }
}

/// A message that passed verification and decryption
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptedMessage {
    pub room_id: String,
    pub sender_id: String,
    pub plaintext: String,
}

// ============================================================================
// Handshake Payloads
// ============================================================================

/// Both members are present in a room
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomReady {
    pub room_id: String,
    /// The member who joined second; receives the room key
    #[serde(rename = "sender")]
    pub sender_id: String,
    /// The member already present; generates the room key
    #[serde(rename = "receiver")]
    pub receiver_id: String,
}

/// A room key wrapped under the addressee's public identity key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedKeyPayload {
    pub room_id: String,
    /// RSA-OAEP ciphertext, base64 on the wire
    #[serde(rename = "encrypted_key", with = "base64_bytes")]
    pub wrapped_key: Vec<u8>,
    /// The `room_ready` sender, i.e. the member this key is wrapped for
    #[serde(rename = "sender")]
    pub sender_id: String,
}

/// Broadcast trigger for auth key derivation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HmacSetup {
    pub room_id: String,
    /// Derivation salt, base64 on the wire
    #[serde(with = "base64_bytes")]
    pub salt: Vec<u8>,
}

/// Outgoing encrypted chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafeSend {
    #[serde(rename = "sender")]
    pub sender_id: String,
    pub message: EncryptedEnvelope,
    pub room_id: String,
}

/// Incoming encrypted chat message (room implied by the session)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafeIncoming {
    #[serde(rename = "sender")]
    pub sender_id: String,
    pub message: EncryptedEnvelope,
}

/// Completion acknowledgement after the room key is stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    #[serde(rename = "sender")]
    pub sender_id: String,
}

// ============================================================================
// Events
// ============================================================================

/// Events consumed from the relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum InboundEvent {
    #[serde(rename = "room_ready")]
    RoomReady(RoomReady),
    #[serde(rename = "send_encrypted_key", alias = "receive_encrypted_key")]
    EncryptedKey(EncryptedKeyPayload),
    #[serde(rename = "setupHMACKeys")]
    SetupHmacKeys(HmacSetup),
    #[serde(rename = "safe-incoming")]
    SafeIncoming(SafeIncoming),
    #[serde(rename = "finally")]
    Finally(Completion),
}

impl InboundEvent {
    /// Parse a relay frame
    pub fn from_json(frame: &str) -> CryptoResult<Self> {
        serde_json::from_str(frame).map_err(|e| CryptoError::SerializationError(format!("Bad event: {}", e)))
    }

    /// Event name, for logging
    pub fn name(&self) -> &'static str {
        match self {
            InboundEvent::RoomReady(_) => "room_ready",
            InboundEvent::EncryptedKey(_) => "send_encrypted_key",
            InboundEvent::SetupHmacKeys(_) => "setupHMACKeys",
            InboundEvent::SafeIncoming(_) => "safe-incoming",
            InboundEvent::Finally(_) => "finally",
        }
    }
}

/// Events produced for the relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum OutboundEvent {
    #[serde(rename = "send_encrypted_key")]
    EncryptedKey(EncryptedKeyPayload),
    #[serde(rename = "safe-send")]
    SafeSend(SafeSend),
    #[serde(rename = "finally")]
    Finally(Completion),
}

impl OutboundEvent {
    /// Serialize as a relay frame
    pub fn to_json(&self) -> CryptoResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

mod base64_bytes {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
