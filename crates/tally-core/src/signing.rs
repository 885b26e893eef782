//! HMAC-SHA256 payload signing.
//!
//! The agent signs the uncompressed JSON body of every report and sends the
//! digest base64-encoded in the [`SIGNATURE_HEADER`] header. The server
//! recomputes it after decompression. Verification is constant-time.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use sha2::Sha256;

/// Header carrying the base64-encoded body digest.
pub const SIGNATURE_HEADER: &str = "HashSHA256";

type HmacSha256 = Hmac<Sha256>;

/// Keyed signer/verifier for request and response bodies.
#[derive(Clone)]
pub struct SigningCodec {
    key: Vec<u8>,
}

impl std::fmt::Debug for SigningCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningCodec").finish_non_exhaustive()
    }
}

impl SigningCodec {
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        Self { key: key.into() }
    }

    /// Build a codec only when a non-empty key is configured.
    pub fn from_key(key: Option<&str>) -> Option<Self> {
        key.filter(|k| !k.is_empty()).map(|k| Self::new(k.as_bytes()))
    }

    fn mac(&self) -> HmacSha256 {
        // HMAC pads or hashes the key, so every length is accepted.
        HmacSha256::new_from_slice(&self.key).expect("hmac accepts keys of any length")
    }

    /// Compute the raw 32-byte digest of `payload`.
    pub fn sign(&self, payload: &[u8]) -> [u8; 32] {
        let mut mac = self.mac();
        mac.update(payload);
        let mut digest = [0u8; 32];
        digest.copy_from_slice(&mac.finalize().into_bytes());
        digest
    }

    /// Check `digest` against `payload` in constant time.
    pub fn verify(&self, payload: &[u8], digest: &[u8]) -> bool {
        let mut mac = self.mac();
        mac.update(payload);
        mac.verify_slice(digest).is_ok()
    }

    /// Digest encoded for the signature header.
    pub fn sign_base64(&self, payload: &[u8]) -> String {
        STANDARD.encode(self.sign(payload))
    }

    /// Verify a header value. Malformed base64 never verifies.
    pub fn verify_base64(&self, payload: &[u8], encoded: &str) -> bool {
        match STANDARD.decode(encoded.trim()) {
            Ok(digest) => self.verify(payload, &digest),
            Err(_) => false,
        }
    }
}
