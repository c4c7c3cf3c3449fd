//! Host capability tokens.
//!
//! - **Generation**: `HMAC-SHA256(room_key, room_code || nonce)`
//! - **Key derivation**: `HKDF-SHA256(master_secret, salt=room_code, info="host-token")`
//! - **Validation**: recompute and compare in constant time via `ring::hmac::verify`
//!
//! The registry keeps only the nonce, so a leaked registry snapshot does not
//! reveal any host token.

use crate::errors::PartyError;
use base64::{engine::general_purpose::STANDARD, Engine};
use ring::{hkdf, hmac, rand};
use secrecy::{ExposeSecret, SecretString};

/// Minimum master secret length in bytes.
pub const MIN_MASTER_SECRET_LEN: usize = 32;

const NONCE_BYTES: usize = 16;

const HOST_TOKEN_INFO: &[u8] = b"host-token";

/// Issues and validates per-room host tokens.
pub struct HostTokenIssuer {
    master_secret: Vec<u8>,
}

impl HostTokenIssuer {
    /// Create an issuer from raw key material.
    pub fn new(master_secret: Vec<u8>) -> Result<Self, PartyError> {
        if master_secret.len() < MIN_MASTER_SECRET_LEN {
            return Err(PartyError::Internal(format!(
                "host token secret must be at least {MIN_MASTER_SECRET_LEN} bytes"
            )));
        }
        Ok(Self { master_secret })
    }

    /// Create an issuer from the configured base64 secret, or from fresh
    /// random key material when none is configured.
    pub fn from_config(secret: Option<&SecretString>) -> Result<Self, PartyError> {
        match secret {
            Some(encoded) => {
                let bytes = STANDARD.decode(encoded.expose_secret()).map_err(|e| {
                    PartyError::Internal(format!("host token secret is not valid base64: {e}"))
                })?;
                Self::new(bytes)
            }
            None => {
                let rng = rand::SystemRandom::new();
                let mut bytes = vec![0u8; MIN_MASTER_SECRET_LEN];
                rand::SecureRandom::fill(&rng, &mut bytes)
                    .map_err(|_| PartyError::Internal("RNG failure".to_string()))?;
                Self::new(bytes)
            }
        }
    }

    /// Mint a host token for a room.
    ///
    /// Returns `(token_hex, nonce_hex)`. Only the nonce should be kept.
    pub fn issue(&self, room_code: &str) -> Result<(String, String), PartyError> {
        let rng = rand::SystemRandom::new();
        let mut nonce_bytes = [0u8; NONCE_BYTES];
        rand::SecureRandom::fill(&rng, &mut nonce_bytes)
            .map_err(|_| PartyError::Internal("RNG failure".to_string()))?;
        let nonce = hex::encode(nonce_bytes);

        let key = self.room_key(room_code)?;
        let message = format!("{room_code}{nonce}");
        let tag = hmac::sign(&key, message.as_bytes());

        Ok((hex::encode(tag.as_ref()), nonce))
    }

    /// Check a presented token against a room's stored nonce.
    #[must_use]
    pub fn verify(&self, room_code: &str, nonce: &str, token: &str) -> bool {
        let Ok(key) = self.room_key(room_code) else {
            return false;
        };
        let Ok(provided) = hex::decode(token) else {
            return false;
        };

        let message = format!("{room_code}{nonce}");
        hmac::verify(&key, message.as_bytes(), &provided).is_ok()
    }

    fn room_key(&self, room_code: &str) -> Result<hmac::Key, PartyError> {
        let salt = hkdf::Salt::new(hkdf::HKDF_SHA256, room_code.as_bytes());
        let prk = salt.extract(&self.master_secret);
        let okm = prk
            .expand(&[HOST_TOKEN_INFO], RoomKeyLen)
            .map_err(|_| PartyError::Internal("HKDF expand failed".to_string()))?;

        let mut key = [0u8; 32];
        okm.fill(&mut key)
            .map_err(|_| PartyError::Internal("HKDF fill failed".to_string()))?;
        Ok(hmac::Key::new(hmac::HMAC_SHA256, &key))
    }
}

/// HKDF output length for room keys.
struct RoomKeyLen;

impl hkdf::KeyType for RoomKeyLen {
    fn len(&self) -> usize {
        32
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn test_issuer() -> HostTokenIssuer {
        HostTokenIssuer::new(vec![7u8; 32]).unwrap()
    }

    #[test]
    fn test_issued_token_verifies() {
        let issuer = test_issuer();
        let (token, nonce) = issuer.issue("ABC123").unwrap();

        assert_eq!(token.len(), 64);
        assert_eq!(nonce.len(), 32);
        assert!(issuer.verify("ABC123", &nonce, &token));
    }

    #[test]
    fn test_token_is_bound_to_room() {
        let issuer = test_issuer();
        let (token, nonce) = issuer.issue("ABC123").unwrap();

        assert!(!issuer.verify("XYZ789", &nonce, &token));
    }

    #[test]
    fn test_token_is_bound_to_nonce() {
        let issuer = test_issuer();
        let (token, _) = issuer.issue("ABC123").unwrap();
        let (_, other_nonce) = issuer.issue("ABC123").unwrap();

        assert!(!issuer.verify("ABC123", &other_nonce, &token));
    }

    #[test]
    fn test_token_from_other_secret_rejected() {
        let issuer = test_issuer();
        let other = HostTokenIssuer::new(vec![9u8; 32]).unwrap();
        let (token, nonce) = other.issue("ABC123").unwrap();

        assert!(!issuer.verify("ABC123", &nonce, &token));
    }

    #[test]
    fn test_garbage_token_rejected() {
        let issuer = test_issuer();
        let (_, nonce) = issuer.issue("ABC123").unwrap();

        assert!(!issuer.verify("ABC123", &nonce, "not-hex"));
        assert!(!issuer.verify("ABC123", &nonce, ""));
    }

    #[test]
    fn test_short_secret_rejected() {
        assert!(HostTokenIssuer::new(vec![1u8; 16]).is_err());
    }

    #[test]
    fn test_from_config_decodes_base64() {
        let encoded = STANDARD.encode([3u8; 32]);
        let secret = SecretString::from(encoded);
        let issuer = HostTokenIssuer::from_config(Some(&secret)).unwrap();
        let reference = HostTokenIssuer::new(vec![3u8; 32]).unwrap();

        let (token, nonce) = issuer.issue("ABC123").unwrap();
        assert!(reference.verify("ABC123", &nonce, &token));
    }

    #[test]
    fn test_from_config_without_secret_generates_one() {
        let issuer = HostTokenIssuer::from_config(None).unwrap();
        let (token, nonce) = issuer.issue("ABC123").unwrap();
        assert!(issuer.verify("ABC123", &nonce, &token));
    }
}
