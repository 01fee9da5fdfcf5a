//! Room encryption module
//!
//! Establishes one shared AES-256-GCM key per two-member room over an untrusted
//! relay, derives an HMAC key from it, and protects every chat message with
//! encrypt-then-MAC.
//!
//! ## Components
//!
//! - **keys**: Typed key handles with usage markers
//! - **store**: SQLite-backed key store with `identity`, `symmetric` and `auth` namespaces
//! - **identity**: RSA-OAEP identity key pair generation and loading
//! - **exchange**: Per-room handshake state machine and room key wrapping
//! - **derive**: PBKDF2 auth key derivation
//! - **cipher**: AES-256-GCM message encryption
//! - **mac**: HMAC-SHA256 tags over ciphertext and nonce
//! - **service**: High-level RoomOrchestrator facade
//!
//! ## Usage
//!
//! ```rust,ignore
//! use crate::crypto::{KeyStore, RoomOrchestrator, SessionContext};
//!
//! let store = KeyStore::open(Path::new("sealroom.db")).await?;
//! let orchestrator = RoomOrchestrator::new(store, directory);
//! let ctx = SessionContext::new("alice", "r1");
//!
//! // Drive the handshake from relay events
//! let actions = orchestrator.handle_event(&ctx, event).await?;
//!
//! // Once both keys are stored
//! let outgoing = orchestrator.send_message(&ctx, "hello").await?;
//! ```

pub mod cipher;
pub mod derive;
pub mod errors;
pub mod exchange;
pub mod identity;
pub mod keys;
pub mod mac;
pub mod service;
pub mod store;

// Re-export commonly used types
pub use errors::{CryptoError, CryptoResult};
pub use exchange::{HandshakeState, KeyRole, RoomHandshake, RoomKeyExchange};
pub use identity::{IdentityKeyPair, IdentityManager, PublicIdentityKey};
pub use keys::{AuthKey, KeyClass, KeyHandle, PrivateKeyHandle, RoomKey};
pub use service::{RoomAction, RoomOrchestrator, SessionContext};
pub use store::KeyStore;
