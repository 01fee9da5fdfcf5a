//! Public key directory access
//!
//! Room key exchange looks up the peer's public identity key through the
//! [`PublicKeyDirectory`] trait. [`DirectoryClient`] talks to the relay server;
//! [`StaticDirectory`] keeps keys in memory for tests and local tooling.

mod client;

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::crypto::errors::CryptoResult;

pub use client::DirectoryClient;

/// Source of base64 SPKI public identity keys
#[async_trait]
pub trait PublicKeyDirectory: Send + Sync {
    /// `Ok(None)` when the user has no published key
    async fn public_key(&self, user_id: &str) -> CryptoResult<Option<String>>;
}

/// In-memory directory
#[derive(Debug, Default)]
pub struct StaticDirectory {
    keys: RwLock<HashMap<String, String>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish or replace a user's key
    pub async fn publish(&self, user_id: impl Into<String>, public_key: String) {
        self.keys.write().await.insert(user_id.into(), public_key);
    }

    pub async fn revoke(&self, user_id: &str) {
        self.keys.write().await.remove(user_id);
    }
}

#[async_trait]
impl PublicKeyDirectory for StaticDirectory {
    async fn public_key(&self, user_id: &str) -> CryptoResult<Option<String>> {
        Ok(self.keys.read().await.get(user_id).cloned())
    }
}
