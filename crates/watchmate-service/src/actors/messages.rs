//! Message types for actor communication.
//!
//! All inter-actor traffic goes over `tokio::sync::mpsc`; request/reply uses
//! a `tokio::sync::oneshot` carried in the message.

use crate::errors::PartyError;
use crate::party::countdown::CountdownState;
use crate::party::relay::VideoSource;
use crate::protocol::{MemberView, ServerEvent};
use crate::rooms::{Room, RoomCode};

use super::connection::ConnectionActorHandle;
use super::room::RoomActorHandle;

use tokio::sync::oneshot;

/// Messages sent to `RoomControllerActor`.
#[derive(Debug)]
pub enum ControllerMessage {
    /// Register a new room and spawn its actor.
    CreateRoom {
        is_private: bool,
        /// bcrypt hash, already computed off the controller task.
        password_hash: Option<String>,
        respond_to: oneshot::Sender<Result<CreatedRoom, PartyError>>,
    },

    /// Resolve a room code to its record and actor.
    LookupRoom {
        code: RoomCode,
        respond_to: oneshot::Sender<Result<RoomEntry, PartyError>>,
    },

    /// Delete a room whose membership has reached zero.
    RemoveRoom {
        code: RoomCode,
        respond_to: oneshot::Sender<Result<(), PartyError>>,
    },

    GetStatus {
        respond_to: oneshot::Sender<ControllerStatus>,
    },

    /// Stop accepting rooms and cancel every room actor.
    Shutdown {
        respond_to: oneshot::Sender<Result<(), PartyError>>,
    },
}

/// Result of a successful `CreateRoom`.
#[derive(Debug, Clone)]
pub struct CreatedRoom {
    pub room: Room,
    /// Returned to the creator once and never stored.
    pub host_token: String,
}

/// Registry entry returned by `LookupRoom`.
#[derive(Debug, Clone)]
pub struct RoomEntry {
    pub room: Room,
    pub handle: RoomActorHandle,
}

#[derive(Debug, Clone, Copy)]
pub struct ControllerStatus {
    pub room_count: usize,
    pub connection_count: usize,
    pub is_draining: bool,
    pub mailbox_depth: usize,
}

/// Messages sent to a `RoomActor`.
#[derive(Debug)]
pub enum RoomMessage {
    /// A connection asks to join this room.
    ConnectionJoin {
        connection_id: String,
        display_name: String,
        /// The joiner presented this room's host token.
        claims_host: bool,
        connection: ConnectionActorHandle,
        respond_to: oneshot::Sender<Result<JoinAck, PartyError>>,
    },

    /// A member's transport went away.
    ConnectionLeft {
        connection_id: String,
        respond_to: oneshot::Sender<LeaveOutcome>,
    },

    /// A client action from a joined member.
    Event {
        connection_id: String,
        event: RoomEvent,
    },

    /// Posted by the countdown timer task.
    CountdownTick { generation: u64, value: u8 },

    GetState {
        respond_to: oneshot::Sender<RoomState>,
    },
}

/// Client actions a room accepts from its members.
///
/// Chat and reactions carry the sender's name on record, resolved from the
/// session directory before the event reaches the room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomEvent {
    Chat { sender_name: String, text: String },
    Reaction { sender_name: String, emoji: String },
    ShareVideo { url: String },
    ShareLocalFile { file_name: String },
    ClearVideo,
    ToggleReady,
    StartCountdown,
}

impl RoomEvent {
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            RoomEvent::Chat { .. } => "chat-message",
            RoomEvent::Reaction { .. } => "reaction",
            RoomEvent::ShareVideo { .. } => "share-video",
            RoomEvent::ShareLocalFile { .. } => "share-local-file",
            RoomEvent::ClearVideo => "clear-video",
            RoomEvent::ToggleReady => "toggle-ready",
            RoomEvent::StartCountdown => "start-countdown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinAck {
    pub is_host: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaveOutcome {
    /// Whether the connection was a member at all.
    pub was_member: bool,
    /// Members left after the departure.
    pub remaining: usize,
}

/// Point-in-time view of a room, for status queries and tests.
#[derive(Debug, Clone)]
pub struct RoomState {
    pub room_code: RoomCode,
    pub members: Vec<MemberView>,
    pub host: Option<String>,
    pub ready_connection_ids: Vec<String>,
    pub all_ready: bool,
    pub countdown: CountdownState,
    pub video: Option<VideoSource>,
    pub is_closing: bool,
}

/// Messages sent to a `ConnectionActor`.
#[derive(Debug)]
pub enum ConnectionMessage {
    /// Write an event to the socket.
    Event(ServerEvent),
    /// Send a close frame and stop.
    Close { reason: String },
}
