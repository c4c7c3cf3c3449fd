//! Room records and room codes.
//!
//! A [`Room`] is the registry's view of a watch party: its code, privacy flag,
//! creation time, the bcrypt hash of its password (private rooms only) and the
//! nonce its host token was minted from. Passwords are SHA-256 digested before
//! bcrypt sees them. Live per-room state (members, host, readiness) lives in
//! the room's actor, not here.

pub mod host_token;

use crate::errors::PartyError;
use chrono::{DateTime, Utc};
use ring::digest;
use ring::rand::{SecureRandom, SystemRandom};
use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use std::sync::Arc;
use tracing::instrument;

/// Room codes are 6 characters.
pub const ROOM_CODE_LENGTH: usize = 6;

/// Random bytes drawn per room code (40 bits covers 36^6).
const ROOM_CODE_RANDOM_BYTES: usize = 5;

/// Alphabet for generated room codes.
const ROOM_CODE_CHARS: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Case-insensitive room code, normalized to uppercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoomCode(String);

impl RoomCode {
    /// Parse a client-supplied room code.
    ///
    /// Surrounding whitespace is ignored and letters are uppercased. An empty
    /// code is a validation error; a code that is not 6 alphanumeric
    /// characters cannot name any room and is reported as `RoomNotFound`.
    pub fn parse(raw: &str) -> Result<Self, PartyError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(PartyError::Validation("Room code is required".to_string()));
        }

        if trimmed.len() != ROOM_CODE_LENGTH || !trimmed.chars().all(|c| c.is_ascii_alphanumeric())
        {
            return Err(PartyError::RoomNotFound);
        }

        Ok(Self(trimmed.to_ascii_uppercase()))
    }

    /// Generate a fresh random room code from the system CSPRNG.
    pub fn generate() -> Result<Self, PartyError> {
        let rng = SystemRandom::new();
        let mut bytes = [0u8; ROOM_CODE_RANDOM_BYTES];

        rng.fill(&mut bytes).map_err(|e| {
            tracing::error!(target: "wm.rooms", error = %e, "Failed to generate random bytes for room code");
            PartyError::Internal("RNG failure".to_string())
        })?;

        let mut value: u64 = 0;
        for &b in &bytes {
            value = (value << 8) | u64::from(b);
        }

        let base = ROOM_CODE_CHARS.len() as u64;
        let mut code = Vec::with_capacity(ROOM_CODE_LENGTH);
        for _ in 0..ROOM_CODE_LENGTH {
            let idx = (value % base) as usize;
            let ch = ROOM_CODE_CHARS
                .get(idx)
                .ok_or_else(|| PartyError::Internal("Room code index out of range".to_string()))?;
            code.push(*ch);
            value /= base;
        }

        String::from_utf8(code)
            .map(Self)
            .map_err(|_| PartyError::Internal("Room code contained invalid UTF-8".to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Registry record for one room.
#[derive(Debug, Clone)]
pub struct Room {
    pub code: RoomCode,
    pub created_at: DateTime<Utc>,
    pub is_private: bool,
    /// bcrypt hash, present iff the room is private.
    password_hash: Option<Arc<SecretString>>,
    /// Nonce the host token was derived from. The token itself is never stored.
    host_nonce: String,
}

impl Room {
    #[must_use]
    pub fn new(
        code: RoomCode,
        is_private: bool,
        password_hash: Option<String>,
        host_nonce: String,
    ) -> Self {
        Self {
            code,
            created_at: Utc::now(),
            is_private,
            password_hash: password_hash.map(|h| Arc::new(SecretString::from(h))),
            host_nonce,
        }
    }

    #[must_use]
    pub fn host_nonce(&self) -> &str {
        &self.host_nonce
    }

    /// The stored password hash, shared so verification can run off the
    /// registry's task.
    #[must_use]
    pub fn password_hash(&self) -> Option<Arc<SecretString>> {
        self.password_hash.clone()
    }
}

/// Hash a room password with bcrypt.
///
/// bcrypt reads at most 72 bytes, so the password is first reduced to its
/// hex SHA-256 digest (64 bytes) and every byte of it counts.
#[instrument(skip_all)]
pub fn hash_password(password: &str, cost: u32) -> Result<String, PartyError> {
    bcrypt::hash(prehash(password), cost)
        .map_err(|e| PartyError::Internal(format!("Password hashing failed: {e}")))
}

/// Check a candidate password against a room's stored hash.
///
/// Rooms without a hash (public rooms) always verify.
#[instrument(skip_all)]
pub fn verify_password(candidate: &str, hash: Option<&SecretString>) -> Result<bool, PartyError> {
    match hash {
        None => Ok(true),
        Some(hash) => bcrypt::verify(prehash(candidate), hash.expose_secret())
            .map_err(|e| PartyError::Internal(format!("Password verification failed: {e}"))),
    }
}

fn prehash(password: &str) -> String {
    hex::encode(digest::digest(&digest::SHA256, password.as_bytes()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    const TEST_COST: u32 = 4;

    #[test]
    fn test_parse_normalizes_to_uppercase() {
        let code = RoomCode::parse("  ab12cd ").unwrap();
        assert_eq!(code.as_str(), "AB12CD");
        assert_eq!(code, RoomCode::parse("AB12CD").unwrap());
    }

    #[test]
    fn test_parse_empty_is_validation_error() {
        assert!(matches!(
            RoomCode::parse("   "),
            Err(PartyError::Validation(_))
        ));
    }

    #[test]
    fn test_parse_malformed_is_not_found() {
        assert!(matches!(RoomCode::parse("ABC"), Err(PartyError::RoomNotFound)));
        assert!(matches!(
            RoomCode::parse("ABC-12"),
            Err(PartyError::RoomNotFound)
        ));
        assert!(matches!(
            RoomCode::parse("ABCDEFG"),
            Err(PartyError::RoomNotFound)
        ));
    }

    #[test]
    fn test_generate_format() {
        for _ in 0..100 {
            let code = RoomCode::generate().unwrap();
            assert_eq!(code.as_str().len(), ROOM_CODE_LENGTH);
            assert!(code
                .as_str()
                .bytes()
                .all(|b| b.is_ascii_digit() || b.is_ascii_uppercase()));
            // Generated codes survive a parse round trip unchanged.
            assert_eq!(RoomCode::parse(code.as_str()).unwrap(), code);
        }
    }

    #[test]
    fn test_generate_is_not_constant() {
        let codes: HashSet<RoomCode> = (0..50).map(|_| RoomCode::generate().unwrap()).collect();
        assert!(codes.len() > 45, "expected mostly distinct codes, got {}", codes.len());
    }

    #[test]
    fn test_password_round_trip() {
        let hash = hash_password("hunter2", TEST_COST).unwrap();
        let secret = SecretString::from(hash);

        assert!(verify_password("hunter2", Some(&secret)).unwrap());
        assert!(!verify_password("hunter3", Some(&secret)).unwrap());
    }

    #[test]
    fn test_long_passwords_compare_every_byte() {
        let prefix = "a".repeat(72);
        let hash = hash_password(&format!("{prefix}correct"), TEST_COST).unwrap();
        let secret = SecretString::from(hash);

        assert!(verify_password(&format!("{prefix}correct"), Some(&secret)).unwrap());
        assert!(!verify_password(&format!("{prefix}WRONG"), Some(&secret)).unwrap());
        assert!(!verify_password(&prefix, Some(&secret)).unwrap());
    }

    #[test]
    fn test_public_room_always_verifies() {
        assert!(verify_password("anything", None).unwrap());
    }

    #[test]
    fn test_room_debug_does_not_leak_hash() {
        let hash = hash_password("hunter2", TEST_COST).unwrap();
        let room = Room::new(
            RoomCode::parse("ABC123").unwrap(),
            true,
            Some(hash.clone()),
            "nonce".to_string(),
        );

        let debug_output = format!("{room:?}");
        assert!(!debug_output.contains(&hash));
        assert!(!debug_output.contains("hunter2"));
    }
}
