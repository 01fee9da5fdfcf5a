//! Identity key pair management
//!
//! Each user owns one long-lived RSA-OAEP key pair. The public half is exported as
//! base64 SubjectPublicKeyInfo for the directory; the private half goes straight
//! into the key store as a [`PrivateKeyHandle`] that can only unwrap room keys.

use base64::Engine;
use rand::rngs::OsRng;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::crypto::errors::{CryptoError, CryptoResult};
use crate::crypto::keys::{DecryptOnly, KeyHandle, PrivateKeyHandle, RoomKey};
use crate::crypto::store::KeyStore;

/// RSA modulus size for identity keys
pub const IDENTITY_KEY_BITS: usize = 2048;

/// Public half of an identity key pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicIdentityKey {
    inner: RsaPublicKey,
}

impl PublicIdentityKey {
    /// Parse a base64 SubjectPublicKeyInfo (as published in the directory)
    pub fn from_base64(encoded: &str) -> CryptoResult<Self> {
        let der = base64::engine::general_purpose::STANDARD.decode(encoded.trim())?;
        let inner = RsaPublicKey::from_public_key_der(&der)
            .map_err(|e| CryptoError::InvalidKey(format!("Invalid public key: {}", e)))?;
        Ok(Self { inner })
    }

    /// Export as base64 SubjectPublicKeyInfo for transport and publication
    pub fn to_base64(&self) -> CryptoResult<String> {
        let der = self
            .inner
            .to_public_key_der()
            .map_err(|e| CryptoError::SerializationError(format!("Failed to export public key: {}", e)))?;
        Ok(base64::engine::general_purpose::STANDARD.encode(der.as_bytes()))
    }

    /// Wrap the raw bytes of a room key under this public key
    pub fn wrap_room_key(&self, key: &RoomKey) -> CryptoResult<Vec<u8>> {
        self.inner
            .encrypt(&mut OsRng, Oaep::new::<Sha256>(), key.export_raw())
            .map_err(|e| CryptoError::EncryptionError(format!("Failed to wrap room key: {}", e)))
    }
}

/// A freshly generated identity
///
/// The private half is already restricted to decryption; there is no way to get
/// its PKCS#8 bytes back out of this value.
pub struct IdentityKeyPair {
    /// Public key (safe to share)
    pub public: PublicIdentityKey,
    /// Private key (never leaves device)
    pub private: PrivateKeyHandle,
}

impl IdentityKeyPair {
    /// Generate a new random identity key pair
    ///
    /// RSA key generation is CPU bound; async callers should go through
    /// [`IdentityManager::generate_identity`], which runs it off the event loop.
    pub fn generate() -> CryptoResult<Self> {
        let private = RsaPrivateKey::new(&mut OsRng, IDENTITY_KEY_BITS)
            .map_err(|e| CryptoError::KeyGenerationFailed(e.to_string()))?;
        let public = PublicIdentityKey {
            inner: RsaPublicKey::from(&private),
        };
        let der = private
            .to_pkcs8_der()
            .map_err(|e| CryptoError::KeyGenerationFailed(format!("PKCS#8 export failed: {}", e)))?;

        Ok(Self {
            public,
            private: PrivateKeyHandle::from_material(der.as_bytes().to_vec()),
        })
    }
}

impl KeyHandle<DecryptOnly> {
    fn rsa_key(&self) -> CryptoResult<RsaPrivateKey> {
        RsaPrivateKey::from_pkcs8_der(self.material())
            .map_err(|e| CryptoError::InvalidKey(format!("Stored identity key is corrupt: {}", e)))
    }

    /// Unwrap a room key that was wrapped under the matching public key
    pub fn unwrap_room_key(&self, wrapped: &[u8]) -> CryptoResult<RoomKey> {
        let private = self.rsa_key()?;
        let raw = Zeroizing::new(
            private
                .decrypt(Oaep::new::<Sha256>(), wrapped)
                .map_err(|e| CryptoError::KeyUnwrapFailed(e.to_string()))?,
        );
        RoomKey::from_raw(&raw).map_err(|e| CryptoError::KeyUnwrapFailed(e.to_string()))
    }

    /// Recover the public half (for re-publishing to the directory)
    pub fn public_key(&self) -> CryptoResult<PublicIdentityKey> {
        let private = self.rsa_key()?;
        Ok(PublicIdentityKey {
            inner: RsaPublicKey::from(&private),
        })
    }
}

/// Generates, persists and loads the local identity
#[derive(Clone)]
pub struct IdentityManager {
    store: KeyStore,
}

impl IdentityManager {
    /// Create a manager over the given store
    pub fn new(store: KeyStore) -> Self {
        Self { store }
    }

    /// Generate a key pair for `user_id` and persist the private half immediately
    ///
    /// Overwrites any identity already stored for that user.
    pub async fn generate_identity(&self, user_id: &str) -> CryptoResult<IdentityKeyPair> {
        let identity = tokio::task::spawn_blocking(IdentityKeyPair::generate)
            .await
            .map_err(|e| CryptoError::KeyGenerationFailed(format!("Key generation task failed: {}", e)))??;

        self.store.save(user_id, &identity.private).await?;
        tracing::info!("Generated identity key pair for user: {}", user_id);
        Ok(identity)
    }

    /// Load the private key for `user_id`; `None` means no identity exists yet
    pub async fn load_private_key(&self, user_id: &str) -> CryptoResult<Option<PrivateKeyHandle>> {
        let key = self.store.load::<DecryptOnly>(user_id).await?;
        if key.is_none() {
            tracing::debug!("No identity stored for user: {}", user_id);
        }
        Ok(key)
    }

    /// Load the stored identity's public key, generating an identity if none exists
    pub async fn ensure_identity(&self, user_id: &str) -> CryptoResult<PublicIdentityKey> {
        match self.load_private_key(user_id).await? {
            Some(private) => {
                tracing::info!("Loaded existing identity for user: {}", user_id);
                private.public_key()
            }
            None => Ok(self.generate_identity(user_id).await?.public),
        }
    }
}
