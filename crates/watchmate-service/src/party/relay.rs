//! Event relay payloads and the per-room video source.
//!
//! Relay itself is stateless fan-out done by the room actor; this module
//! builds the outbound events (stamping sender identity from the session
//! directory, not from the client) and tracks the one piece of relayed state a late joiner
//! needs: the current video source.

use crate::protocol::ServerEvent;

use chrono::Utc;

/// The room's active video source. A shared URL and a local-file
/// advertisement are mutually exclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoSource {
    Url(String),
    /// Only the file name is shared; each viewer opens their own copy.
    LocalFile(String),
}

#[derive(Debug, Default)]
pub struct VideoState {
    source: Option<VideoSource>,
}

impl VideoState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn current(&self) -> Option<&VideoSource> {
        self.source.as_ref()
    }

    /// Share a URL. Returns the events to broadcast, displaced source first.
    pub fn share_url(&mut self, url: String) -> Vec<ServerEvent> {
        let mut events = Vec::with_capacity(2);
        if matches!(self.source, Some(VideoSource::LocalFile(_))) {
            events.push(ServerEvent::LocalFileUpdate { file_name: None });
        }
        events.push(ServerEvent::VideoUpdate {
            url: Some(url.clone()),
        });
        self.source = Some(VideoSource::Url(url));
        events
    }

    /// Advertise a local file. Returns the events to broadcast, displaced
    /// source first.
    pub fn share_local_file(&mut self, file_name: String) -> Vec<ServerEvent> {
        let mut events = Vec::with_capacity(2);
        if matches!(self.source, Some(VideoSource::Url(_))) {
            events.push(ServerEvent::VideoUpdate { url: None });
        }
        events.push(ServerEvent::LocalFileUpdate {
            file_name: Some(file_name.clone()),
        });
        self.source = Some(VideoSource::LocalFile(file_name));
        events
    }

    /// Clear whatever is shared. Clearing with nothing shared still
    /// announces an empty video so clients converge.
    pub fn clear(&mut self) -> Vec<ServerEvent> {
        match self.source.take() {
            Some(VideoSource::LocalFile(_)) => vec![ServerEvent::LocalFileUpdate { file_name: None }],
            Some(VideoSource::Url(_)) | None => vec![ServerEvent::VideoUpdate { url: None }],
        }
    }

    /// Events that bring a late joiner up to date. Empty when nothing is
    /// shared.
    #[must_use]
    pub fn snapshot_events(&self) -> Vec<ServerEvent> {
        match &self.source {
            Some(VideoSource::Url(url)) => vec![ServerEvent::VideoUpdate {
                url: Some(url.clone()),
            }],
            Some(VideoSource::LocalFile(name)) => vec![ServerEvent::LocalFileUpdate {
                file_name: Some(name.clone()),
            }],
            None => Vec::new(),
        }
    }
}

/// Chat message from `sender_id`, stamped with the server clock.
///
/// `sender_name` is the name on record for the sender, never one asserted
/// by the client.
#[must_use]
pub fn chat_event(sender_id: &str, sender_name: String, text: String) -> ServerEvent {
    ServerEvent::ChatMessage {
        sender_id: sender_id.to_string(),
        sender_name,
        text,
        sent_at: Utc::now(),
    }
}

#[must_use]
pub fn reaction_event(sender_id: &str, sender_name: String, emoji: String) -> ServerEvent {
    ServerEvent::Reaction {
        sender_id: sender_id.to_string(),
        sender_name,
        emoji,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_share_url_from_empty() {
        let mut video = VideoState::new();
        let events = video.share_url("https://example.com/v".to_string());

        assert_eq!(
            events,
            [ServerEvent::VideoUpdate {
                url: Some("https://example.com/v".to_string())
            }]
        );
        assert_eq!(
            video.current(),
            Some(&VideoSource::Url("https://example.com/v".to_string()))
        );
    }

    #[test]
    fn test_share_url_displaces_local_file() {
        let mut video = VideoState::new();
        video.share_local_file("movie.mp4".to_string());

        let events = video.share_url("https://example.com/v".to_string());
        assert_eq!(
            events,
            [
                ServerEvent::LocalFileUpdate { file_name: None },
                ServerEvent::VideoUpdate {
                    url: Some("https://example.com/v".to_string())
                },
            ]
        );
    }

    #[test]
    fn test_share_local_file_displaces_url() {
        let mut video = VideoState::new();
        video.share_url("https://example.com/v".to_string());

        let events = video.share_local_file("movie.mp4".to_string());
        assert_eq!(
            events,
            [
                ServerEvent::VideoUpdate { url: None },
                ServerEvent::LocalFileUpdate {
                    file_name: Some("movie.mp4".to_string())
                },
            ]
        );
        assert_eq!(
            video.current(),
            Some(&VideoSource::LocalFile("movie.mp4".to_string()))
        );
    }

    #[test]
    fn test_clear() {
        let mut video = VideoState::new();
        video.share_local_file("movie.mp4".to_string());

        assert_eq!(
            video.clear(),
            [ServerEvent::LocalFileUpdate { file_name: None }]
        );
        assert_eq!(video.current(), None);
        assert_eq!(video.clear(), [ServerEvent::VideoUpdate { url: None }]);
    }

    #[test]
    fn test_snapshot_events() {
        let mut video = VideoState::new();
        assert!(video.snapshot_events().is_empty());

        video.share_url("https://example.com/v".to_string());
        assert_eq!(
            video.snapshot_events(),
            [ServerEvent::VideoUpdate {
                url: Some("https://example.com/v".to_string())
            }]
        );
    }

    #[test]
    fn test_chat_event_carries_sender_identity() {
        let event = chat_event("c1", "Ann".to_string(), "hello".to_string());

        match event {
            ServerEvent::ChatMessage {
                sender_id,
                sender_name,
                text,
                ..
            } => {
                assert_eq!(sender_id, "c1");
                assert_eq!(sender_name, "Ann");
                assert_eq!(text, "hello");
            }
            other => unreachable!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_reaction_event() {
        assert_eq!(
            reaction_event("c1", "Ann".to_string(), "🎉".to_string()),
            ServerEvent::Reaction {
                sender_id: "c1".to_string(),
                sender_name: "Ann".to_string(),
                emoji: "🎉".to_string(),
            }
        );
    }
}
