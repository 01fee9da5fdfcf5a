//! HMAC-SHA256 message authentication
//!
//! Tags cover the ciphertext and nonce of an envelope and travel as lowercase
//! hex. Verification uses the constant-time comparison of the `hmac` crate.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::crypto::errors::{CryptoError, CryptoResult};
use crate::crypto::keys::{AuthKey, KeyHandle, SignVerify};

/// HMAC-SHA256 type alias.
type HmacSha256 = Hmac<Sha256>;

/// Fixed output length of HMAC-SHA256 in bytes.
pub const TAG_LEN: usize = 32;

impl KeyHandle<SignVerify> {
    fn mac(&self) -> CryptoResult<HmacSha256> {
        HmacSha256::new_from_slice(self.material())
            .map_err(|e| CryptoError::InvalidKey(format!("HMAC-SHA256 key init failed: {}", e)))
    }
}

/// Compute the hex tag over `data`
pub fn sign(data: &[u8], key: &AuthKey) -> CryptoResult<String> {
    let mut mac = key.mac()?;
    mac.update(data);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Recompute the tag over `data` and compare it to `tag_hex` in constant time
///
/// Malformed hex or a wrong-length tag verifies as `false`.
pub fn verify(data: &[u8], tag_hex: &str, key: &AuthKey) -> bool {
    let Ok(expected) = hex::decode(tag_hex) else {
        return false;
    };
    if expected.len() != TAG_LEN {
        return false;
    }
    let Ok(mut mac) = key.mac() else {
        return false;
    };
    mac.update(data);
    mac.verify_slice(&expected).is_ok()
}
