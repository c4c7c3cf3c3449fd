//! Actor hierarchy.
//!
//! ```text
//! RoomControllerActor (singleton)
//! └── supervises N RoomActors
//!     └── RoomActor (one per live room)
//!         ├── owns roster, host, readiness, countdown, video
//!         └── fans out to N ConnectionActors
//!             └── ConnectionActor (one per WebSocket, writer side)
//! ```
//!
//! Cancellation flows down the same tree: every room and connection token is
//! a child of the controller's root token.

pub mod connection;
pub mod controller;
pub mod messages;
pub mod metrics;
pub mod room;

pub use connection::{ConnectionActor, ConnectionActorHandle};
pub use controller::RoomControllerActorHandle;
pub use messages::{
    ConnectionMessage, ControllerStatus, CreatedRoom, JoinAck, LeaveOutcome, RoomEntry, RoomEvent,
    RoomState,
};
pub use metrics::{ActorMetrics, ActorType, MailboxLevel, MailboxMonitor};
pub use room::{RoomActor, RoomActorHandle};
