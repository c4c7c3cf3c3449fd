//! WebSocket event protocol.
//!
//! Every frame is a JSON text message tagged by `type` (kebab-case), with
//! camelCase fields. Client events are validated and normalized at the socket
//! boundary via [`ClientEvent::normalize`] before anything reaches a room.

use crate::errors::PartyError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const MAX_DISPLAY_NAME_CHARS: usize = 64;
pub const MAX_CHAT_TEXT_CHARS: usize = 2000;
pub const MAX_EMOJI_CHARS: usize = 16;
pub const MAX_URL_CHARS: usize = 2048;
pub const MAX_FILE_NAME_CHARS: usize = 255;

/// Client to server events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientEvent {
    #[serde(rename_all = "camelCase")]
    JoinRoom {
        room_code: String,
        display_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        host_token: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    ChatMessage { room_code: String, text: String },
    #[serde(rename_all = "camelCase")]
    Reaction { room_code: String, emoji: String },
    #[serde(rename_all = "camelCase")]
    ShareVideo { room_code: String, url: String },
    #[serde(rename_all = "camelCase")]
    ClearVideo { room_code: String },
    #[serde(rename_all = "camelCase")]
    ShareLocalFile { room_code: String, file_name: String },
    #[serde(rename_all = "camelCase")]
    ToggleReady { room_code: String },
    #[serde(rename_all = "camelCase")]
    StartCountdown { room_code: String },
}

impl ClientEvent {
    /// The room code the client addressed this event to.
    #[must_use]
    pub fn room_code(&self) -> &str {
        match self {
            ClientEvent::JoinRoom { room_code, .. }
            | ClientEvent::ChatMessage { room_code, .. }
            | ClientEvent::Reaction { room_code, .. }
            | ClientEvent::ShareVideo { room_code, .. }
            | ClientEvent::ClearVideo { room_code }
            | ClientEvent::ShareLocalFile { room_code, .. }
            | ClientEvent::ToggleReady { room_code }
            | ClientEvent::StartCountdown { room_code } => room_code,
        }
    }

    /// Event type label (matches the wire `type`).
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            ClientEvent::JoinRoom { .. } => "join-room",
            ClientEvent::ChatMessage { .. } => "chat-message",
            ClientEvent::Reaction { .. } => "reaction",
            ClientEvent::ShareVideo { .. } => "share-video",
            ClientEvent::ClearVideo { .. } => "clear-video",
            ClientEvent::ShareLocalFile { .. } => "share-local-file",
            ClientEvent::ToggleReady { .. } => "toggle-ready",
            ClientEvent::StartCountdown { .. } => "start-countdown",
        }
    }

    /// Trim and bound-check the event's free-text fields.
    ///
    /// Room codes are only checked for presence here; normalization to a
    /// [`crate::rooms::RoomCode`] happens where the code is resolved.
    pub fn normalize(self) -> Result<Self, PartyError> {
        if self.room_code().trim().is_empty() {
            return Err(PartyError::Validation("Room code is required".to_string()));
        }

        let event = match self {
            ClientEvent::JoinRoom {
                room_code,
                display_name,
                host_token,
            } => ClientEvent::JoinRoom {
                room_code,
                display_name: bounded("Display name", &display_name, MAX_DISPLAY_NAME_CHARS)?,
                host_token: host_token.filter(|t| !t.trim().is_empty()),
            },
            ClientEvent::ChatMessage { room_code, text } => ClientEvent::ChatMessage {
                room_code,
                text: bounded("Message text", &text, MAX_CHAT_TEXT_CHARS)?,
            },
            ClientEvent::Reaction { room_code, emoji } => ClientEvent::Reaction {
                room_code,
                emoji: bounded("Emoji", &emoji, MAX_EMOJI_CHARS)?,
            },
            ClientEvent::ShareVideo { room_code, url } => ClientEvent::ShareVideo {
                room_code,
                url: bounded("Video URL", &url, MAX_URL_CHARS)?,
            },
            ClientEvent::ShareLocalFile {
                room_code,
                file_name,
            } => ClientEvent::ShareLocalFile {
                room_code,
                file_name: bounded("File name", &file_name, MAX_FILE_NAME_CHARS)?,
            },
            other @ (ClientEvent::ClearVideo { .. }
            | ClientEvent::ToggleReady { .. }
            | ClientEvent::StartCountdown { .. }) => other,
        };

        Ok(event)
    }
}

fn bounded(field: &str, value: &str, max_chars: usize) -> Result<String, PartyError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(PartyError::Validation(format!("{field} is required")));
    }
    if trimmed.chars().count() > max_chars {
        return Err(PartyError::Validation(format!(
            "{field} must be at most {max_chars} characters"
        )));
    }
    Ok(trimmed.to_string())
}

/// One entry of a `users-update` member list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberView {
    pub connection_id: String,
    pub display_name: String,
    pub is_host: bool,
}

/// Server to client events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Join acknowledgement, sent to the joiner only.
    #[serde(rename_all = "camelCase")]
    Joined {
        connection_id: String,
        room_code: String,
        is_host: bool,
    },
    #[serde(rename_all = "camelCase")]
    UsersUpdate { members: Vec<MemberView> },
    #[serde(rename_all = "camelCase")]
    HostUpdate { connection_id: String },
    #[serde(rename_all = "camelCase")]
    ChatMessage {
        sender_id: String,
        sender_name: String,
        text: String,
        sent_at: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    Reaction {
        sender_id: String,
        sender_name: String,
        emoji: String,
    },
    /// `url` is `None` when the shared video was cleared.
    #[serde(rename_all = "camelCase")]
    VideoUpdate { url: Option<String> },
    #[serde(rename_all = "camelCase")]
    LocalFileUpdate { file_name: Option<String> },
    #[serde(rename_all = "camelCase")]
    ReadyUpdate {
        ready_connection_ids: Vec<String>,
        all_ready: bool,
    },
    #[serde(rename_all = "camelCase")]
    Countdown { value: u8 },
    /// A rejected request, sent to the offending connection only.
    #[serde(rename_all = "camelCase")]
    Error { code: String, message: String },
}

impl ServerEvent {
    #[must_use]
    pub fn from_error(error: &PartyError) -> Self {
        ServerEvent::Error {
            code: error.error_code().to_string(),
            message: error.client_message(),
        }
    }

    /// Event type label (matches the wire `type`).
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            ServerEvent::Joined { .. } => "joined",
            ServerEvent::UsersUpdate { .. } => "users-update",
            ServerEvent::HostUpdate { .. } => "host-update",
            ServerEvent::ChatMessage { .. } => "chat-message",
            ServerEvent::Reaction { .. } => "reaction",
            ServerEvent::VideoUpdate { .. } => "video-update",
            ServerEvent::LocalFileUpdate { .. } => "local-file-update",
            ServerEvent::ReadyUpdate { .. } => "ready-update",
            ServerEvent::Countdown { .. } => "countdown",
            ServerEvent::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_join_room() {
        let raw = r#"{"type":"join-room","roomCode":"abc123","displayName":"Ann","hostToken":"ff"}"#;
        let event: ClientEvent = serde_json::from_str(raw).unwrap();

        assert_eq!(
            event,
            ClientEvent::JoinRoom {
                room_code: "abc123".to_string(),
                display_name: "Ann".to_string(),
                host_token: Some("ff".to_string()),
            }
        );
    }

    #[test]
    fn test_parse_join_room_without_token() {
        let raw = r#"{"type":"join-room","roomCode":"abc123","displayName":"Ann"}"#;
        let event: ClientEvent = serde_json::from_str(raw).unwrap();

        assert!(matches!(event, ClientEvent::JoinRoom { host_token: None, .. }));
    }

    #[test]
    fn test_parse_rejects_unknown_type() {
        let raw = r#"{"type":"seek","roomCode":"abc123","position":12}"#;
        assert!(serde_json::from_str::<ClientEvent>(raw).is_err());
    }

    #[test]
    fn test_parse_rejects_missing_field() {
        let raw = r#"{"type":"chat-message","roomCode":"abc123"}"#;
        assert!(serde_json::from_str::<ClientEvent>(raw).is_err());
    }

    #[test]
    fn test_normalize_trims_chat_text() {
        let event = ClientEvent::ChatMessage {
            room_code: "ABC123".to_string(),
            text: "  hello  ".to_string(),
        }
        .normalize()
        .unwrap();

        assert!(matches!(event, ClientEvent::ChatMessage { text, .. } if text == "hello"));
    }

    #[test]
    fn test_normalize_rejects_blank_display_name() {
        let result = ClientEvent::JoinRoom {
            room_code: "ABC123".to_string(),
            display_name: "   ".to_string(),
            host_token: None,
        }
        .normalize();

        assert!(matches!(result, Err(PartyError::Validation(_))));
    }

    #[test]
    fn test_normalize_rejects_empty_room_code() {
        let result = ClientEvent::ToggleReady {
            room_code: String::new(),
        }
        .normalize();

        assert!(matches!(result, Err(PartyError::Validation(_))));
    }

    #[test]
    fn test_normalize_rejects_oversized_chat() {
        let result = ClientEvent::ChatMessage {
            room_code: "ABC123".to_string(),
            text: "x".repeat(MAX_CHAT_TEXT_CHARS + 1),
        }
        .normalize();

        assert!(matches!(result, Err(PartyError::Validation(_))));
    }

    #[test]
    fn test_normalize_counts_characters_not_bytes() {
        let emoji = "🎉".repeat(MAX_EMOJI_CHARS);
        let result = ClientEvent::Reaction {
            room_code: "ABC123".to_string(),
            emoji,
        }
        .normalize();

        assert!(result.is_ok());
    }

    #[test]
    fn test_blank_host_token_is_dropped() {
        let event = ClientEvent::JoinRoom {
            room_code: "ABC123".to_string(),
            display_name: "Ann".to_string(),
            host_token: Some(" ".to_string()),
        }
        .normalize()
        .unwrap();

        assert!(matches!(event, ClientEvent::JoinRoom { host_token: None, .. }));
    }

    #[test]
    fn test_server_event_wire_format() {
        let event = ServerEvent::ReadyUpdate {
            ready_connection_ids: vec!["c1".to_string()],
            all_ready: false,
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"type": "ready-update", "readyConnectionIds": ["c1"], "allReady": false})
        );

        let cleared = ServerEvent::VideoUpdate { url: None };
        assert_eq!(
            serde_json::to_value(&cleared).unwrap(),
            json!({"type": "video-update", "url": null})
        );

        let members = ServerEvent::UsersUpdate {
            members: vec![MemberView {
                connection_id: "c1".to_string(),
                display_name: "Ann".to_string(),
                is_host: true,
            }],
        };
        assert_eq!(
            serde_json::to_value(&members).unwrap(),
            json!({
                "type": "users-update",
                "members": [{"connectionId": "c1", "displayName": "Ann", "isHost": true}]
            })
        );
    }

    #[test]
    fn test_error_event_from_party_error() {
        let event = ServerEvent::from_error(&PartyError::RoomNotFound);
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"type": "error", "code": "ROOM_NOT_FOUND", "message": "Room not found"})
        );
    }
}
