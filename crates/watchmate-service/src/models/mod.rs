//! HTTP request and response bodies.
//!
//! All bodies are JSON with camelCase field names.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Request body for `POST /api/v1/rooms`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomRequest {
    #[serde(default)]
    pub is_private: bool,

    /// Required when `is_private` is set; ignored otherwise.
    #[serde(default)]
    pub password: Option<String>,
}

/// Response body for `POST /api/v1/rooms`.
///
/// The host token appears here and nowhere else.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomResponse {
    pub room_code: String,
    pub host_token: String,
    pub is_private: bool,
}

/// Response body for `GET /api/v1/rooms/{code}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomResponse {
    pub room_code: String,
    pub created_at: DateTime<Utc>,
    pub is_private: bool,
}

/// Request body for `POST /api/v1/rooms/{code}/verify-password`.
#[derive(Debug, Clone, Deserialize)]
pub struct VerifyPasswordRequest {
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyPasswordResponse {
    pub valid: bool,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_create_room_request_defaults_to_public() {
        let request: CreateRoomRequest = serde_json::from_str("{}").unwrap();
        assert!(!request.is_private);
        assert!(request.password.is_none());

        let request: CreateRoomRequest =
            serde_json::from_str(r#"{"isPrivate":true,"password":"x"}"#).unwrap();
        assert!(request.is_private);
        assert_eq!(request.password.as_deref(), Some("x"));
    }

    #[test]
    fn test_room_response_has_no_secret_fields() {
        let response = RoomResponse {
            room_code: "ABC123".to_string(),
            created_at: Utc::now(),
            is_private: true,
        };
        let value = serde_json::to_value(&response).unwrap();
        let object = value.as_object().unwrap();

        assert!(object.contains_key("roomCode"));
        assert!(object.contains_key("createdAt"));
        assert!(!object.contains_key("password"));
        assert!(!object.contains_key("hostToken"));
    }
}
