//! Room Key Exchange
//!
//! This module establishes one shared AES-256-GCM key between the two members
//! of a room.
//!
//! ## Protocol Overview
//!
//! 1. The relay broadcasts `room_ready {room_id, sender, receiver}` once both
//!    members are present
//! 2. The member named as `receiver` is the **generator**: it looks up the
//!    sender's public identity key, generates a room key, stores it, wraps it
//!    with RSA-OAEP and emits `send_encrypted_key`
//! 3. The member named as `sender` is the **recipient**: it checks that the
//!    wrapped key is addressed to it, unwraps with its private identity key and
//!    stores the result
//! 4. The recipient emits `finally`; the generator treats that as completion
//!
//! Progress per room is tracked by [`RoomHandshake`], whose transitions reject
//! events that arrive in the wrong state.

use std::fmt;
use std::sync::Arc;

use crate::api::PublicKeyDirectory;
use crate::crypto::errors::{CryptoError, CryptoResult};
use crate::crypto::identity::{IdentityManager, PublicIdentityKey};
use crate::crypto::keys::RoomKey;
use crate::crypto::store::KeyStore;

/// Which side of the exchange the local user plays in a room
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyRole {
    /// Generates and pushes the room key (the `room_ready` receiver)
    Generator,
    /// Waits for the wrapped room key (the `room_ready` sender)
    Recipient,
}

/// Handshake progress of a single room
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    NoKey,
    KeyGenerated,
    KeyWrapped,
    KeySent,
    KeyReceived,
    KeyEstablished,
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HandshakeState::NoKey => "NoKey",
            HandshakeState::KeyGenerated => "KeyGenerated",
            HandshakeState::KeyWrapped => "KeyWrapped",
            HandshakeState::KeySent => "KeySent",
            HandshakeState::KeyReceived => "KeyReceived",
            HandshakeState::KeyEstablished => "KeyEstablished",
        };
        f.write_str(name)
    }
}

/// Guarded state machine for one room's key exchange
#[derive(Debug, Clone)]
pub struct RoomHandshake {
    room_id: String,
    state: HandshakeState,
    role: Option<KeyRole>,
    peer_id: Option<String>,
}

impl RoomHandshake {
    /// A room that has not seen `room_ready` yet
    pub fn new(room_id: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            state: HandshakeState::NoKey,
            role: None,
            peer_id: None,
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn role(&self) -> Option<KeyRole> {
        self.role
    }

    /// The other member of the room, once `room_ready` named them
    pub fn peer_id(&self) -> Option<&str> {
        self.peer_id.as_deref()
    }

    fn advance(&mut self, event: &str, allowed: bool, next: HandshakeState) -> CryptoResult<()> {
        if !allowed {
            return Err(CryptoError::HandshakeOutOfOrder {
                room_id: self.room_id.clone(),
                state: self.state.to_string(),
                event: event.to_string(),
            });
        }
        tracing::debug!("Room {}: {} -> {} ({})", self.room_id, self.state, next, event);
        self.state = next;
        Ok(())
    }

    /// Restart the exchange; valid in every state
    ///
    /// Returns the local role, or `None` if the local user is not a member.
    pub fn on_room_ready(&mut self, local_user: &str, sender: &str, receiver: &str) -> Option<KeyRole> {
        let (role, peer) = if local_user == receiver {
            (Some(KeyRole::Generator), Some(sender.to_string()))
        } else if local_user == sender {
            (Some(KeyRole::Recipient), Some(receiver.to_string()))
        } else {
            (None, None)
        };
        self.state = HandshakeState::NoKey;
        self.role = role;
        self.peer_id = peer;
        role
    }

    pub fn key_generated(&mut self) -> CryptoResult<()> {
        let allowed = self.role == Some(KeyRole::Generator) && self.state == HandshakeState::NoKey;
        self.advance("key_generated", allowed, HandshakeState::KeyGenerated)
    }

    pub fn key_wrapped(&mut self) -> CryptoResult<()> {
        let allowed = self.state == HandshakeState::KeyGenerated;
        self.advance("key_wrapped", allowed, HandshakeState::KeyWrapped)
    }

    pub fn key_sent(&mut self) -> CryptoResult<()> {
        let allowed = self.state == HandshakeState::KeyWrapped;
        self.advance("key_sent", allowed, HandshakeState::KeySent)
    }

    /// A duplicate wrapped key after establishment is accepted and overwrites
    pub fn key_received(&mut self) -> CryptoResult<()> {
        let allowed = self.role == Some(KeyRole::Recipient)
            && matches!(self.state, HandshakeState::NoKey | HandshakeState::KeyEstablished);
        self.advance("send_encrypted_key", allowed, HandshakeState::KeyReceived)
    }

    /// Whether a wrapped key would currently be accepted
    pub fn awaiting_key(&self) -> bool {
        self.role == Some(KeyRole::Recipient)
            && matches!(self.state, HandshakeState::NoKey | HandshakeState::KeyEstablished)
    }

    pub fn established(&mut self) -> CryptoResult<()> {
        let allowed = match self.role {
            Some(KeyRole::Recipient) => self.state == HandshakeState::KeyReceived,
            Some(KeyRole::Generator) => self.state == HandshakeState::KeySent,
            None => false,
        };
        self.advance("finally", allowed, HandshakeState::KeyEstablished)
    }

    /// Drop all progress; only a fresh `room_ready` can restart the exchange
    pub fn abandon(&mut self) {
        tracing::warn!("Room {}: handshake abandoned in state {}", self.room_id, self.state);
        self.state = HandshakeState::NoKey;
        self.role = None;
        self.peer_id = None;
    }
}

/// A room key wrapped for one addressee
#[derive(Debug, Clone)]
pub struct WrappedRoomKey {
    pub room_id: String,
    /// RSA-OAEP ciphertext of the raw room key
    pub wrapped: Vec<u8>,
    /// The member the key is wrapped for
    pub addressee: String,
}

/// Generates, wraps, unwraps and stores room keys
#[derive(Clone)]
pub struct RoomKeyExchange {
    store: KeyStore,
    identity: IdentityManager,
    directory: Arc<dyn PublicKeyDirectory>,
}

impl RoomKeyExchange {
    pub fn new(store: KeyStore, directory: Arc<dyn PublicKeyDirectory>) -> Self {
        Self {
            identity: IdentityManager::new(store.clone()),
            store,
            directory,
        }
    }

    /// Fetch and parse the peer's public identity key
    ///
    /// Any failure (missing entry, directory error, unparsable key) is reported as
    /// `PeerKeyUnavailable`; the exchange is never retried from here.
    pub async fn fetch_peer_key(&self, peer_id: &str) -> CryptoResult<PublicIdentityKey> {
        let encoded = match self.directory.public_key(peer_id).await {
            Ok(Some(encoded)) => encoded,
            Ok(None) => return Err(CryptoError::PeerKeyUnavailable(peer_id.to_string())),
            Err(e) => {
                tracing::error!("Directory lookup for {} failed: {}", peer_id, e);
                return Err(CryptoError::PeerKeyUnavailable(peer_id.to_string()));
            }
        };

        PublicIdentityKey::from_base64(&encoded).map_err(|e| {
            tracing::error!("Directory returned an unusable key for {}: {}", peer_id, e);
            CryptoError::PeerKeyUnavailable(peer_id.to_string())
        })
    }

    /// Generator side: create, store and wrap a room key for the peer
    ///
    /// The peer key is fetched before anything is generated, so a failed lookup
    /// leaves no room key behind. Leaves the handshake in `KeyWrapped`.
    pub async fn generate_and_wrap(&self, handshake: &mut RoomHandshake) -> CryptoResult<WrappedRoomKey> {
        let peer_id = match (handshake.role(), handshake.state(), handshake.peer_id()) {
            (Some(KeyRole::Generator), HandshakeState::NoKey, Some(peer)) => peer.to_string(),
            _ => {
                return Err(CryptoError::HandshakeOutOfOrder {
                    room_id: handshake.room_id().to_string(),
                    state: handshake.state().to_string(),
                    event: "key_generated".to_string(),
                })
            }
        };

        let result = self.try_generate_and_wrap(handshake, peer_id).await;
        if result.is_err() {
            self.abandon(handshake).await;
        }
        result
    }

    async fn try_generate_and_wrap(
        &self,
        handshake: &mut RoomHandshake,
        peer_id: String,
    ) -> CryptoResult<WrappedRoomKey> {
        tracing::info!("Fetching public key of {} for room {}", peer_id, handshake.room_id());
        let peer_key = self.fetch_peer_key(&peer_id).await?;

        let room_key = RoomKey::generate();
        self.store.replace_room_key(handshake.room_id(), &room_key).await?;
        handshake.key_generated()?;

        let wrapped = peer_key.wrap_room_key(&room_key)?;
        handshake.key_wrapped()?;

        Ok(WrappedRoomKey {
            room_id: handshake.room_id().to_string(),
            wrapped,
            addressee: peer_id,
        })
    }

    /// Recipient side: unwrap a room key with the local identity and store it
    ///
    /// Leaves the handshake in `KeyReceived`. A failure removes whatever keys
    /// the room held before, including an established one.
    pub async fn unwrap_and_store(
        &self,
        handshake: &mut RoomHandshake,
        local_user: &str,
        wrapped: &[u8],
    ) -> CryptoResult<()> {
        if !handshake.awaiting_key() {
            return handshake.key_received();
        }

        let result = self.try_unwrap_and_store(handshake, local_user, wrapped).await;
        if result.is_err() {
            self.abandon(handshake).await;
        }
        result
    }

    /// Abandon the handshake and leave the room keyless until the next `room_ready`
    async fn abandon(&self, handshake: &mut RoomHandshake) {
        handshake.abandon();
        if let Err(e) = self.store.purge_room(handshake.room_id()).await {
            tracing::error!("Failed to purge keys of room {}: {}", handshake.room_id(), e);
        }
    }

    async fn try_unwrap_and_store(
        &self,
        handshake: &mut RoomHandshake,
        local_user: &str,
        wrapped: &[u8],
    ) -> CryptoResult<()> {
        let private = self
            .identity
            .load_private_key(local_user)
            .await?
            .ok_or_else(|| CryptoError::KeyUnwrapFailed(format!("No identity stored for {}", local_user)))?;

        let room_key = private.unwrap_room_key(wrapped)?;
        self.store.replace_room_key(handshake.room_id(), &room_key).await?;
        handshake.key_received()?;

        tracing::info!("Stored room key for room {}", handshake.room_id());
        Ok(())
    }
}
