//! RoomOrchestrator - Event-driven room protocol
//!
//! This module ties key exchange, auth key derivation and message protection to
//! the relay's events. Every call takes a [`SessionContext`] naming the local user
//! and the room the session is attached to, and returns the [`RoomAction`]s the
//! caller must carry out on the transport.
//!
//! ## Example
//!
//! ```rust,ignore
//! let orchestrator = RoomOrchestrator::new(store, directory);
//! let ctx = SessionContext::new("alice", "r1");
//!
//! for action in orchestrator.handle_event(&ctx, InboundEvent::from_json(frame)?).await? {
//!     match action {
//!         RoomAction::Emit(event) => socket.send(event.to_json()?).await?,
//!         RoomAction::Deliver(message) => render(message),
//!     }
//! }
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use crate::api::PublicKeyDirectory;
use crate::crypto::cipher;
use crate::crypto::derive::derive_auth_key;
use crate::crypto::errors::{CryptoError, CryptoResult};
use crate::crypto::exchange::{HandshakeState, KeyRole, RoomHandshake, RoomKeyExchange};
use crate::crypto::keys::{AuthKey, EncryptDecrypt, RoomKey, SignVerify};
use crate::crypto::mac;
use crate::crypto::store::KeyStore;
use crate::models::{
    Completion, DecryptedMessage, EncryptedEnvelope, EncryptedKeyPayload, InboundEvent, OutboundEvent,
    SafeSend,
};

/// Who is acting, and in which room
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub user_id: String,
    pub room_id: String,
}

impl SessionContext {
    pub fn new(user_id: impl Into<String>, room_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            room_id: room_id.into(),
        }
    }
}

/// Work the caller performs after an event is handled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomAction {
    /// Send this event to the relay
    Emit(OutboundEvent),
    /// Show a verified, decrypted message
    Deliver(DecryptedMessage),
}

/// Per-room protocol driver
///
/// Events for one room are serialized through that room's mutex; different rooms
/// never contend on anything but the short map lookup.
#[derive(Clone)]
pub struct RoomOrchestrator {
    store: KeyStore,
    exchange: RoomKeyExchange,
    rooms: Arc<RwLock<HashMap<String, Arc<Mutex<RoomHandshake>>>>>,
}

impl RoomOrchestrator {
    pub fn new(store: KeyStore, directory: Arc<dyn PublicKeyDirectory>) -> Self {
        Self {
            exchange: RoomKeyExchange::new(store.clone(), directory),
            store,
            rooms: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    async fn room(&self, room_id: &str) -> Arc<Mutex<RoomHandshake>> {
        if let Some(room) = self.rooms.read().await.get(room_id) {
            return room.clone();
        }

        let mut rooms = self.rooms.write().await;
        rooms
            .entry(room_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(RoomHandshake::new(room_id))))
            .clone()
    }

    /// Current handshake state of a room, if any event touched it
    pub async fn room_state(&self, room_id: &str) -> Option<HandshakeState> {
        let room = self.rooms.read().await.get(room_id).cloned()?;
        let state = room.lock().await.state();
        Some(state)
    }

    /// Drop a room's handshake progress and stored keys
    pub async fn forget_room(&self, room_id: &str) -> CryptoResult<()> {
        self.rooms.write().await.remove(room_id);
        self.store.purge_room(room_id).await?;
        tracing::info!("Forgot room {}", room_id);
        Ok(())
    }

    /// Handle one relay event
    ///
    /// Events for other rooms and broadcasts not addressed to the local user
    /// produce no actions.
    pub async fn handle_event(&self, ctx: &SessionContext, event: InboundEvent) -> CryptoResult<Vec<RoomAction>> {
        tracing::debug!("Room {}: handling {} for {}", ctx.room_id, event.name(), ctx.user_id);

        match event {
            InboundEvent::RoomReady(ready) => {
                if !self.is_current_room(ctx, &ready.room_id) {
                    return Ok(Vec::new());
                }
                self.on_room_ready(ctx, &ready.sender_id, &ready.receiver_id).await
            }
            InboundEvent::EncryptedKey(payload) => {
                if !self.is_current_room(ctx, &payload.room_id) {
                    return Ok(Vec::new());
                }
                if payload.sender_id != ctx.user_id {
                    tracing::debug!(
                        "Room {}: wrapped key addressed to {}, ignoring",
                        ctx.room_id,
                        payload.sender_id
                    );
                    return Ok(Vec::new());
                }
                self.on_encrypted_key(ctx, &payload.wrapped_key).await
            }
            InboundEvent::SetupHmacKeys(setup) => {
                if !self.is_current_room(ctx, &setup.room_id) {
                    return Ok(Vec::new());
                }
                self.setup_auth_key(&ctx.room_id, &setup.salt).await?;
                Ok(Vec::new())
            }
            InboundEvent::SafeIncoming(incoming) => {
                let message = self.receive_message(ctx, &incoming.sender_id, &incoming.message).await?;
                Ok(vec![RoomAction::Deliver(message)])
            }
            InboundEvent::Finally(done) => {
                if done.sender_id == ctx.user_id {
                    return Ok(Vec::new());
                }
                self.on_finally(ctx).await
            }
        }
    }

    fn is_current_room(&self, ctx: &SessionContext, room_id: &str) -> bool {
        if room_id != ctx.room_id {
            tracing::debug!("Ignoring event for room {} in session for {}", room_id, ctx.room_id);
            return false;
        }
        true
    }

    async fn on_room_ready(&self, ctx: &SessionContext, sender: &str, receiver: &str) -> CryptoResult<Vec<RoomAction>> {
        let room = self.room(&ctx.room_id).await;
        let mut handshake = room.lock().await;

        match handshake.on_room_ready(&ctx.user_id, sender, receiver) {
            Some(KeyRole::Generator) => {
                let wrapped = self.exchange.generate_and_wrap(&mut handshake).await?;
                handshake.key_sent()?;
                tracing::info!("Room {}: sending room key to {}", ctx.room_id, wrapped.addressee);

                Ok(vec![RoomAction::Emit(OutboundEvent::EncryptedKey(EncryptedKeyPayload {
                    room_id: wrapped.room_id,
                    wrapped_key: wrapped.wrapped,
                    sender_id: wrapped.addressee,
                }))])
            }
            Some(KeyRole::Recipient) => {
                tracing::info!("Room {}: waiting for room key", ctx.room_id);
                Ok(Vec::new())
            }
            None => {
                tracing::debug!("Room {}: {} is not a member of this exchange", ctx.room_id, ctx.user_id);
                Ok(Vec::new())
            }
        }
    }

    async fn on_encrypted_key(&self, ctx: &SessionContext, wrapped: &[u8]) -> CryptoResult<Vec<RoomAction>> {
        let room = self.room(&ctx.room_id).await;
        let mut handshake = room.lock().await;

        self.exchange.unwrap_and_store(&mut handshake, &ctx.user_id, wrapped).await?;
        handshake.established()?;

        Ok(vec![RoomAction::Emit(OutboundEvent::Finally(Completion {
            sender_id: ctx.user_id.clone(),
        }))])
    }

    async fn on_finally(&self, ctx: &SessionContext) -> CryptoResult<Vec<RoomAction>> {
        let room = self.room(&ctx.room_id).await;
        let mut handshake = room.lock().await;

        if handshake.role() == Some(KeyRole::Generator) {
            handshake.established()?;
            tracing::info!("Room {}: room key established", ctx.room_id);
        }
        Ok(Vec::new())
    }

    /// Derive and store the room's auth key
    ///
    /// Fails with `PrerequisiteKeyMissing` until the room key is stored.
    pub async fn setup_auth_key(&self, room_id: &str, salt: &[u8]) -> CryptoResult<()> {
        let room_key = self
            .store
            .load::<EncryptDecrypt>(room_id)
            .await?
            .ok_or_else(|| CryptoError::PrerequisiteKeyMissing(format!("room key for {}", room_id)))?;

        let salt = salt.to_vec();
        let auth_key = tokio::task::spawn_blocking(move || derive_auth_key(&room_key, &salt))
            .await
            .map_err(|e| CryptoError::KeyGenerationFailed(format!("Auth key derivation task failed: {}", e)))?;

        self.store.save(room_id, &auth_key).await?;
        tracing::info!("Room {}: auth key derived", room_id);
        Ok(())
    }

    async fn message_keys(&self, room_id: &str) -> CryptoResult<(RoomKey, AuthKey)> {
        let room_key = self.store.load::<EncryptDecrypt>(room_id).await?;
        let auth_key = self.store.load::<SignVerify>(room_id).await?;

        match (room_key, auth_key) {
            (Some(room_key), Some(auth_key)) => Ok((room_key, auth_key)),
            _ => Err(CryptoError::KeysUnavailable(room_id.to_string())),
        }
    }

    /// Encrypt and sign an outgoing chat message
    pub async fn send_message(&self, ctx: &SessionContext, plaintext: &str) -> CryptoResult<OutboundEvent> {
        let (room_key, auth_key) = self.message_keys(&ctx.room_id).await.map_err(|e| {
            tracing::warn!("Room {}: message not sent: {}", ctx.room_id, e);
            e
        })?;

        let body = cipher::encrypt(plaintext.as_bytes(), &room_key)?;
        let tag = mac::sign(&body.signed_payload(), &auth_key)?;

        Ok(OutboundEvent::SafeSend(SafeSend {
            sender_id: ctx.user_id.clone(),
            message: EncryptedEnvelope::new(body, tag),
            room_id: ctx.room_id.clone(),
        }))
    }

    /// Verify, then decrypt, an incoming chat message
    pub async fn receive_message(
        &self,
        ctx: &SessionContext,
        sender_id: &str,
        envelope: &EncryptedEnvelope,
    ) -> CryptoResult<DecryptedMessage> {
        let (room_key, auth_key) = self.message_keys(&ctx.room_id).await.map_err(|e| {
            tracing::warn!("Room {}: message from {} dropped: {}", ctx.room_id, sender_id, e);
            e
        })?;

        let body = envelope.body();
        if !mac::verify(&body.signed_payload(), &envelope.tag, &auth_key) {
            tracing::warn!("Room {}: integrity check failed for message from {}", ctx.room_id, sender_id);
            return Err(CryptoError::IntegrityCheckFailed(sender_id.to_string()));
        }

        let plaintext = cipher::decrypt(&body, &room_key).map_err(|e| {
            tracing::warn!("Room {}: message from {} did not decrypt", ctx.room_id, sender_id);
            e
        })?;
        let plaintext = String::from_utf8(plaintext).map_err(|_| CryptoError::DecryptionFailed)?;

        Ok(DecryptedMessage {
            room_id: ctx.room_id.clone(),
            sender_id: sender_id.to_string(),
            plaintext,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::StaticDirectory;
    use crate::crypto::identity::IdentityManager;
    use crate::crypto::keys::KeyClass;
    use crate::models::{HmacSetup, RoomReady, SafeIncoming};

    async fn orchestrator() -> (RoomOrchestrator, KeyStore) {
        let store = KeyStore::open_in_memory().await.unwrap();
        (RoomOrchestrator::new(store.clone(), Arc::new(StaticDirectory::new())), store)
    }

    async fn with_shared_keys(room_id: &str) -> (RoomOrchestrator, RoomOrchestrator) {
        let (a, a_store) = orchestrator().await;
        let (b, b_store) = orchestrator().await;
        let room_key = RoomKey::generate();
        a_store.save(room_id, &room_key).await.unwrap();
        b_store
            .save(room_id, &RoomKey::from_raw(room_key.export_raw()).unwrap())
            .await
            .unwrap();
        a.setup_auth_key(room_id, b"abcd").await.unwrap();
        b.setup_auth_key(room_id, b"abcd").await.unwrap();
        (a, b)
    }

    fn ready(room_id: &str) -> InboundEvent {
        InboundEvent::RoomReady(RoomReady {
            room_id: room_id.to_string(),
            sender_id: "alice".to_string(),
            receiver_id: "bob".to_string(),
        })
    }

    #[tokio::test]
    async fn test_send_without_keys_fails_closed() {
        let (orch, _) = orchestrator().await;
        let ctx = SessionContext::new("alice", "r1");
        assert!(matches!(
            orch.send_message(&ctx, "hello").await,
            Err(CryptoError::KeysUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_send_with_room_key_only_fails_closed() {
        let (orch, store) = orchestrator().await;
        store.save("r1", &RoomKey::generate()).await.unwrap();
        let ctx = SessionContext::new("alice", "r1");
        assert!(matches!(
            orch.send_message(&ctx, "hello").await,
            Err(CryptoError::KeysUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_setup_without_room_key_is_transient() {
        let (orch, store) = orchestrator().await;
        let err = orch.setup_auth_key("r1", b"abcd").await.unwrap_err();
        assert!(err.is_transient());
        assert!(!store.contains(KeyClass::Auth, "r1").await.unwrap());
    }

    #[tokio::test]
    async fn test_message_round_trip() {
        let (a, b) = with_shared_keys("r1").await;
        let alice = SessionContext::new("alice", "r1");
        let bob = SessionContext::new("bob", "r1");

        let OutboundEvent::SafeSend(sent) = a.send_message(&alice, "hello").await.unwrap() else {
            panic!("expected safe-send");
        };
        assert_eq!(sent.sender_id, "alice");
        assert_eq!(sent.room_id, "r1");

        let incoming = InboundEvent::SafeIncoming(SafeIncoming {
            sender_id: sent.sender_id,
            message: sent.message,
        });
        let actions = b.handle_event(&bob, incoming).await.unwrap();
        assert_eq!(
            actions,
            vec![RoomAction::Deliver(DecryptedMessage {
                room_id: "r1".to_string(),
                sender_id: "alice".to_string(),
                plaintext: "hello".to_string(),
            })]
        );
    }

    #[tokio::test]
    async fn test_tampered_ciphertext_fails_integrity_first() {
        let (a, b) = with_shared_keys("r1").await;
        let alice = SessionContext::new("alice", "r1");
        let bob = SessionContext::new("bob", "r1");

        let OutboundEvent::SafeSend(sent) = a.send_message(&alice, "hello").await.unwrap() else {
            panic!("expected safe-send");
        };
        let mut envelope = sent.message;
        envelope.ciphertext[0] ^= 0x01;

        assert!(matches!(
            b.receive_message(&bob, "alice", &envelope).await,
            Err(CryptoError::IntegrityCheckFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_tampered_nonce_fails_integrity() {
        let (a, b) = with_shared_keys("r1").await;
        let alice = SessionContext::new("alice", "r1");
        let bob = SessionContext::new("bob", "r1");

        let OutboundEvent::SafeSend(sent) = a.send_message(&alice, "hello").await.unwrap() else {
            panic!("expected safe-send");
        };
        let mut envelope = sent.message;
        envelope.nonce[0] ^= 0x01;

        assert!(matches!(
            b.receive_message(&bob, "alice", &envelope).await,
            Err(CryptoError::IntegrityCheckFailed(sender)) if sender == "alice"
        ));
    }

    #[tokio::test]
    async fn test_other_room_events_ignored() {
        let (orch, store) = orchestrator().await;
        let ctx = SessionContext::new("bob", "r2");

        assert!(orch.handle_event(&ctx, ready("r1")).await.unwrap().is_empty());
        let setup = InboundEvent::SetupHmacKeys(HmacSetup {
            room_id: "r1".to_string(),
            salt: b"abcd".to_vec(),
        });
        assert!(orch.handle_event(&ctx, setup).await.unwrap().is_empty());

        assert_eq!(orch.room_state("r1").await, None);
        assert!(store.list_ids(KeyClass::Symmetric).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_wrapped_key_for_someone_else_ignored() {
        let (orch, store) = orchestrator().await;
        let ctx = SessionContext::new("bob", "r1");
        let stray = InboundEvent::EncryptedKey(EncryptedKeyPayload {
            room_id: "r1".to_string(),
            wrapped_key: vec![0u8; 256],
            sender_id: "alice".to_string(),
        });

        assert!(orch.handle_event(&ctx, stray).await.unwrap().is_empty());
        assert!(!store.contains(KeyClass::Symmetric, "r1").await.unwrap());
    }

    #[tokio::test]
    async fn test_recipient_waits_after_room_ready() {
        let (orch, _) = orchestrator().await;
        let ctx = SessionContext::new("alice", "r1");
        assert!(orch.handle_event(&ctx, ready("r1")).await.unwrap().is_empty());
        assert_eq!(orch.room_state("r1").await, Some(HandshakeState::NoKey));
    }

    #[tokio::test]
    async fn test_finally_after_abandon_ignored() {
        let store = KeyStore::open_in_memory().await.unwrap();
        let directory = Arc::new(StaticDirectory::new());
        let orch = RoomOrchestrator::new(store, directory.clone());
        let ctx = SessionContext::new("bob", "r1");

        // Generator whose peer has no key: handshake abandoned, role cleared
        assert!(matches!(
            orch.handle_event(&ctx, ready("r1")).await,
            Err(CryptoError::PeerKeyUnavailable(_))
        ));

        let done = InboundEvent::Finally(Completion {
            sender_id: "alice".to_string(),
        });
        assert!(orch.handle_event(&ctx, done).await.unwrap().is_empty());
        assert_eq!(orch.room_state("r1").await, Some(HandshakeState::NoKey));
    }

    #[tokio::test]
    async fn test_generator_established_on_finally() {
        let alice_store = KeyStore::open_in_memory().await.unwrap();
        let bob_store = KeyStore::open_in_memory().await.unwrap();
        let alice_public = IdentityManager::new(alice_store.clone())
            .generate_identity("alice")
            .await
            .unwrap()
            .public;
        let directory = Arc::new(StaticDirectory::new());
        directory.publish("alice", alice_public.to_base64().unwrap()).await;

        let bob = RoomOrchestrator::new(bob_store, directory.clone());
        let alice = RoomOrchestrator::new(alice_store, directory);
        let bob_ctx = SessionContext::new("bob", "r1");
        let alice_ctx = SessionContext::new("alice", "r1");

        alice.handle_event(&alice_ctx, ready("r1")).await.unwrap();
        let actions = bob.handle_event(&bob_ctx, ready("r1")).await.unwrap();
        assert_eq!(bob.room_state("r1").await, Some(HandshakeState::KeySent));

        let [RoomAction::Emit(OutboundEvent::EncryptedKey(payload))] = actions.as_slice() else {
            panic!("expected one send_encrypted_key");
        };
        let actions = alice
            .handle_event(&alice_ctx, InboundEvent::EncryptedKey(payload.clone()))
            .await
            .unwrap();
        assert_eq!(alice.room_state("r1").await, Some(HandshakeState::KeyEstablished));

        let [RoomAction::Emit(OutboundEvent::Finally(done))] = actions.as_slice() else {
            panic!("expected one finally");
        };
        bob.handle_event(&bob_ctx, InboundEvent::Finally(done.clone())).await.unwrap();
        assert_eq!(bob.room_state("r1").await, Some(HandshakeState::KeyEstablished));
    }

    #[tokio::test]
    async fn test_own_finally_echo_ignored() {
        let (orch, _) = orchestrator().await;
        let ctx = SessionContext::new("alice", "r1");
        let echo = InboundEvent::Finally(Completion {
            sender_id: "alice".to_string(),
        });
        assert!(orch.handle_event(&ctx, echo).await.unwrap().is_empty());
        assert_eq!(orch.room_state("r1").await, None);
    }

    #[tokio::test]
    async fn test_forget_room() {
        let (a, _) = with_shared_keys("r1").await;
        a.forget_room("r1").await.unwrap();
        let ctx = SessionContext::new("alice", "r1");
        assert!(matches!(
            a.send_message(&ctx, "hello").await,
            Err(CryptoError::KeysUnavailable(_))
        ));
    }
}
