//! Presigned download links for the local and memory backends.
//!
//! A link carries the object key in the path plus `expires` (unix
//! seconds) and `signature` query parameters.  The signature is an
//! HMAC-SHA256 over the method, key and expiry, so links cannot be
//! retargeted to another object or extended past their lifetime.

use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use sha2::Sha256;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use subtle::ConstantTimeEq;

use crate::errors::ServiceError;

type HmacSha256 = Hmac<Sha256>;

/// Characters escaped in the key path segment. `/` stays literal so
/// keys keep their hierarchy in the URL.
const KEY_PATH: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'%')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// HMAC URL signer for presigned object downloads.
pub struct UrlSigner {
    key: Vec<u8>,
}

impl UrlSigner {
    /// Build a signer from a configured key, or a random per-process
    /// key when the configuration leaves it empty.  A random key
    /// invalidates outstanding links on restart.
    pub fn from_config(key: &str) -> Self {
        if key.is_empty() {
            let key: [u8; 32] = rand::random();
            Self { key: key.to_vec() }
        } else {
            Self {
                key: key.as_bytes().to_vec(),
            }
        }
    }

    fn signature(&self, object_key: &str, expires: u64) -> String {
        let mut mac =
            HmacSha256::new_from_slice(&self.key).expect("hmac accepts any key length");
        mac.update(b"GET\n");
        mac.update(object_key.as_bytes());
        mac.update(b"\n");
        mac.update(expires.to_string().as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Produce a presigned GET URL for `object_key`, valid for `ttl`.
    pub fn presign(&self, base_url: &str, object_key: &str, ttl: Duration) -> String {
        self.presign_at(base_url, object_key, ttl, now_unix())
    }

    fn presign_at(&self, base_url: &str, object_key: &str, ttl: Duration, now: u64) -> String {
        let expires = now + ttl.as_secs();
        let signature = self.signature(object_key, expires);
        let encoded_key = utf8_percent_encode(object_key, KEY_PATH);
        format!(
            "{}/objects/{}?expires={}&signature={}",
            base_url.trim_end_matches('/'),
            encoded_key,
            expires,
            signature
        )
    }

    /// Check a presented `(expires, signature)` pair for `object_key`.
    ///
    /// Expired links and signature mismatches are both `Unauthorized`;
    /// the two cases are deliberately not distinguishable to callers
    /// beyond the message text.
    pub fn verify(
        &self,
        object_key: &str,
        expires: u64,
        signature: &str,
    ) -> Result<(), ServiceError> {
        self.verify_at(object_key, expires, signature, now_unix())
    }

    fn verify_at(
        &self,
        object_key: &str,
        expires: u64,
        signature: &str,
        now: u64,
    ) -> Result<(), ServiceError> {
        if expires < now {
            return Err(ServiceError::unauthorized("download link has expired"));
        }
        let expected = self.signature(object_key, expires);
        let presented = hex::decode(signature)
            .map_err(|_| ServiceError::unauthorized("invalid download signature"))?;
        // Constant-time comparison; ct_eq is false on length mismatch.
        if expected.as_bytes().ct_eq(hex::encode(&presented).as_bytes()).into() {
            Ok(())
        } else {
            Err(ServiceError::unauthorized("invalid download signature"))
        }
    }
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
