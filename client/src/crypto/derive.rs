//! Room authentication key derivation
//!
//! Both members of a room hold the same room key. On `setupHMACKeys` each side
//! runs PBKDF2-HMAC-SHA-256 over the raw room key bytes with the broadcast salt,
//! so the resulting HMAC key is identical without ever crossing the wire.

use zeroize::Zeroizing;

use crate::crypto::keys::{AuthKey, RoomKey, AUTH_KEY_LEN};

/// PBKDF2 iteration count for auth key derivation
pub const AUTH_KEY_ITERATIONS: u32 = 50_000;

/// Derive the room authentication key from a room key and salt
pub fn derive_auth_key(room_key: &RoomKey, salt: &[u8]) -> AuthKey {
    let mut output = Zeroizing::new(vec![0u8; AUTH_KEY_LEN]);
    pbkdf2::pbkdf2_hmac::<sha2::Sha256>(
        room_key.export_raw(),
        salt,
        AUTH_KEY_ITERATIONS,
        output.as_mut_slice(),
    );
    AuthKey::from_material(output.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::mac;

    #[test]
    fn test_derivation_is_deterministic() {
        let room_key = RoomKey::generate();
        let a = derive_auth_key(&room_key, b"abcd");
        let b = derive_auth_key(&room_key, b"abcd");
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_independent_copies_derive_same_key() {
        let original = RoomKey::generate();
        let copy = RoomKey::from_raw(original.export_raw()).unwrap();

        let ours = derive_auth_key(&original, b"abcd");
        let theirs = derive_auth_key(&copy, b"abcd");

        let tag = mac::sign(b"payload", &ours).unwrap();
        assert!(mac::verify(b"payload", &tag, &theirs));
    }

    #[test]
    fn test_salt_changes_key() {
        let room_key = RoomKey::generate();
        let a = derive_auth_key(&room_key, b"abcd");
        let b = derive_auth_key(&room_key, b"abce");
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_auth_key_differs_from_room_key() {
        let room_key = RoomKey::generate();
        let auth = derive_auth_key(&room_key, b"abcd");
        assert_ne!(auth.fingerprint(), room_key.fingerprint());
    }

    /// PBKDF2-HMAC-SHA256, P="password", S="salt", c=1, dkLen=32
    #[test]
    fn test_pbkdf2_known_vector() {
        let mut out = [0u8; 32];
        pbkdf2::pbkdf2_hmac::<sha2::Sha256>(b"password", b"salt", 1, &mut out);
        assert_eq!(
            hex::encode(out),
            "120fb6cffcf8b32c43e7225256c4f837a86548c92ccc35480805987cb70be17b"
        );
    }
}
