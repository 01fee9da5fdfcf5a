//! Typed key handles and their storage records
//!
//! Every piece of key material in the client is held in a [`KeyHandle`] tagged
//! with a usage marker:
//! - [`EncryptDecrypt`]: room keys (AES-256-GCM), exportable as raw bytes
//! - [`SignVerify`]: room authentication keys (HMAC-SHA-256)
//! - [`DecryptOnly`]: identity private keys (RSA-OAEP), never exported
//!
//! The marker decides which operations exist on the handle, and it is written
//! into the crate-private `StoredKey` record so a reload cannot widen what a key
//! may do. Only room keys expose their bytes outside the crate.

use std::fmt;
use std::marker::PhantomData;

use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::crypto::errors::{CryptoError, CryptoResult};

/// Byte length of a room key (AES-256)
pub const ROOM_KEY_LEN: usize = 32;

/// Byte length of a derived authentication key
pub const AUTH_KEY_LEN: usize = 32;

/// Storage namespace of a key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyClass {
    /// Identity private keys, keyed by user id
    Identity,
    /// Room symmetric keys, keyed by room id
    Symmetric,
    /// Room authentication keys, keyed by room id
    Auth,
}

impl KeyClass {
    /// Namespace name as stored in the database
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyClass::Identity => "identity",
            KeyClass::Symmetric => "symmetric",
            KeyClass::Auth => "auth",
        }
    }
}

impl fmt::Display for KeyClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operation a key is permitted to perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyUsage {
    Encrypt,
    Decrypt,
    Sign,
    Verify,
}

mod sealed {
    pub trait Sealed {}
}

/// Compile-time description of what a [`KeyHandle`] may do
pub trait UsageTag: sealed::Sealed {
    /// Namespace the key is stored under
    const CLASS: KeyClass;
    /// Algorithm name recorded in the storage record
    const ALGORITHM: &'static str;
    /// Usages recorded in the storage record
    const USAGES: &'static [KeyUsage];
    /// Whether the raw material may leave the handle
    const EXTRACTABLE: bool;
}

/// Marker for room keys
#[derive(Debug)]
pub enum EncryptDecrypt {}

/// Marker for room authentication keys
#[derive(Debug)]
pub enum SignVerify {}

/// Marker for identity private keys
#[derive(Debug)]
pub enum DecryptOnly {}

impl sealed::Sealed for EncryptDecrypt {}
impl sealed::Sealed for SignVerify {}
impl sealed::Sealed for DecryptOnly {}

impl UsageTag for EncryptDecrypt {
    const CLASS: KeyClass = KeyClass::Symmetric;
    const ALGORITHM: &'static str = "A256GCM";
    const USAGES: &'static [KeyUsage] = &[KeyUsage::Encrypt, KeyUsage::Decrypt];
    const EXTRACTABLE: bool = true;
}

impl UsageTag for SignVerify {
    const CLASS: KeyClass = KeyClass::Auth;
    const ALGORITHM: &'static str = "HS256";
    const USAGES: &'static [KeyUsage] = &[KeyUsage::Sign, KeyUsage::Verify];
    const EXTRACTABLE: bool = false;
}

impl UsageTag for DecryptOnly {
    const CLASS: KeyClass = KeyClass::Identity;
    const ALGORITHM: &'static str = "RSA-OAEP-256";
    const USAGES: &'static [KeyUsage] = &[KeyUsage::Decrypt];
    const EXTRACTABLE: bool = false;
}

/// Key material restricted to the operations of `U`
///
/// Identity and auth key bytes cannot be read back through the public API,
/// neither from a handle nor from the store:
///
/// ```compile_fail
/// let pair = sealroom_lib::crypto::IdentityKeyPair::generate().unwrap();
/// let _record = pair.private.to_stored();
/// ```
///
/// ```compile_fail
/// # async fn read(store: sealroom_lib::crypto::KeyStore) {
/// let _record = store.get(sealroom_lib::crypto::KeyClass::Identity, "alice").await;
/// # }
/// ```
pub struct KeyHandle<U: UsageTag> {
    material: Zeroizing<Vec<u8>>,
    _usage: PhantomData<U>,
}

/// Room symmetric key
pub type RoomKey = KeyHandle<EncryptDecrypt>;

/// Room authentication key
pub type AuthKey = KeyHandle<SignVerify>;

/// Identity private key
pub type PrivateKeyHandle = KeyHandle<DecryptOnly>;

impl<U: UsageTag> KeyHandle<U> {
    pub(crate) fn from_material(material: Vec<u8>) -> Self {
        Self {
            material: Zeroizing::new(material),
            _usage: PhantomData,
        }
    }

    pub(crate) fn material(&self) -> &[u8] {
        &self.material
    }

    /// Storage namespace of this handle
    pub fn class(&self) -> KeyClass {
        U::CLASS
    }

    /// Short, non-reversible identifier for comparing keys across parties
    pub fn fingerprint(&self) -> String {
        use sha2::{Digest, Sha256};
        let hash = Sha256::digest(self.material.as_slice());
        hex::encode(&hash[..8])
    }

    /// Encode into the portable storage record
    pub(crate) fn to_stored(&self) -> StoredKey {
        StoredKey {
            class: U::CLASS,
            alg: U::ALGORITHM.to_string(),
            usages: U::USAGES.to_vec(),
            extractable: U::EXTRACTABLE,
            material: base64::engine::general_purpose::STANDARD.encode(self.material.as_slice()),
        }
    }

    /// Decode a storage record, refusing any record whose usages differ from `U`
    pub(crate) fn from_stored(record: &StoredKey) -> CryptoResult<Self> {
        let mut stored = record.usages.clone();
        stored.sort();
        stored.dedup();
        let mut expected = U::USAGES.to_vec();
        expected.sort();

        if record.class != U::CLASS
            || record.alg != U::ALGORITHM
            || stored != expected
            || record.extractable != U::EXTRACTABLE
        {
            return Err(CryptoError::UsageMismatch {
                expected: format!("{}/{}/{:?}", U::CLASS, U::ALGORITHM, expected),
                stored: format!("{}/{}/{:?}", record.class, record.alg, stored),
            });
        }

        let material = base64::engine::general_purpose::STANDARD.decode(&record.material)?;
        Ok(Self::from_material(material))
    }
}

impl<U: UsageTag> fmt::Debug for KeyHandle<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyHandle")
            .field("class", &U::CLASS)
            .field("alg", &U::ALGORITHM)
            .finish_non_exhaustive()
    }
}

impl KeyHandle<EncryptDecrypt> {
    /// Generate a fresh random 256-bit room key
    pub fn generate() -> Self {
        let mut key = vec![0u8; ROOM_KEY_LEN];
        OsRng.fill_bytes(&mut key);
        Self::from_material(key)
    }

    /// Import raw key bytes (e.g. after unwrapping)
    pub fn from_raw(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() != ROOM_KEY_LEN {
            return Err(CryptoError::InvalidKey(format!(
                "Room key must be {} bytes, got {}",
                ROOM_KEY_LEN,
                bytes.len()
            )));
        }
        Ok(Self::from_material(bytes.to_vec()))
    }

    /// Raw key bytes, for wrapping and auth key derivation
    pub fn export_raw(&self) -> &[u8] {
        self.material()
    }
}

/// Portable storage record for a key, comparable to a JWK
///
/// `material` is base64; its meaning depends on `alg` (raw bytes for symmetric and
/// HMAC keys, PKCS#8 DER for RSA private keys).
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub(crate) struct StoredKey {
    #[zeroize(skip)]
    pub(crate) class: KeyClass,
    pub(crate) alg: String,
    #[zeroize(skip)]
    pub(crate) usages: Vec<KeyUsage>,
    pub(crate) extractable: bool,
    pub(crate) material: String,
}

impl fmt::Debug for StoredKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredKey")
            .field("class", &self.class)
            .field("alg", &self.alg)
            .field("usages", &self.usages)
            .field("extractable", &self.extractable)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_key_generation() {
        let a = RoomKey::generate();
        let b = RoomKey::generate();
        assert_eq!(a.export_raw().len(), ROOM_KEY_LEN);
        assert_ne!(a.export_raw(), b.export_raw());
    }

    #[test]
    fn test_room_key_from_raw_rejects_wrong_length() {
        assert!(matches!(
            RoomKey::from_raw(&[0u8; 16]),
            Err(CryptoError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_stored_record_roundtrip_keeps_usages() {
        let key = RoomKey::generate();
        let record = key.to_stored();
        assert_eq!(record.class, KeyClass::Symmetric);
        assert_eq!(record.usages, vec![KeyUsage::Encrypt, KeyUsage::Decrypt]);

        let json = serde_json::to_string(&record).unwrap();
        let parsed: StoredKey = serde_json::from_str(&json).unwrap();
        let restored = RoomKey::from_stored(&parsed).unwrap();
        assert_eq!(restored.export_raw(), key.export_raw());
    }

    #[test]
    fn test_record_cannot_widen_usage_on_reload() {
        let private = PrivateKeyHandle::from_material(vec![1, 2, 3]);
        let mut record = private.to_stored();
        record.usages.push(KeyUsage::Sign);
        assert!(matches!(
            PrivateKeyHandle::from_stored(&record),
            Err(CryptoError::UsageMismatch { .. })
        ));
    }

    #[test]
    fn test_record_cannot_change_handle_type() {
        let auth = AuthKey::from_material(vec![7; AUTH_KEY_LEN]);
        let record = auth.to_stored();
        assert!(RoomKey::from_stored(&record).is_err());
        assert!(PrivateKeyHandle::from_stored(&record).is_err());
    }

    #[test]
    fn test_debug_redacts_material() {
        let key = RoomKey::from_raw(&[0xAB; ROOM_KEY_LEN]).unwrap();
        let debug = format!("{:?}", key);
        assert!(!debug.contains("171"));
        assert!(!debug.to_lowercase().contains("abab"));
    }

    #[test]
    fn test_private_handle_debug_hides_pkcs8() {
        let private = PrivateKeyHandle::from_material(vec![0x5A; 64]);
        let record = private.to_stored();
        assert!(!record.extractable);

        let debug = format!("{:?} {:?}", private, record);
        assert!(!debug.contains(&record.material));
        assert!(debug.contains("RSA-OAEP-256"));
    }

    #[test]
    fn test_fingerprint() {
        let key = RoomKey::generate();
        assert_eq!(key.fingerprint().len(), 16);
        assert_eq!(key.fingerprint(), key.fingerprint());
    }
}
