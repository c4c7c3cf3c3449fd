//! Watchmate Service Library
//!
//! Room coordination and event relay for synchronized watch parties:
//!
//! - Room registry with generated codes, optional passwords and host tokens
//! - Per-room membership, host election and readiness consensus
//! - Timed 3-2-1-0 countdowns that start playback in sync
//! - Fan-out of chat, reactions and video-source changes over WebSockets
//!
//! # Architecture
//!
//! ```text
//! RoomControllerActor (singleton registry)
//! └── RoomActor (one per room, serializes all room state changes)
//!     └── ConnectionActor (one per WebSocket, writes outbound events)
//! ```
//!
//! # Modules
//!
//! - [`actors`] - Actor hierarchy
//! - [`party`] - Per-room state machines (roster, host, readiness, countdown, video)
//! - [`lifecycle`] - Join/disconnect orchestration for connections
//! - [`protocol`] - WebSocket event types
//! - [`rooms`] - Room records, codes, passwords and host tokens
//! - [`handlers`] / [`routes`] - HTTP and WebSocket surface
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Error types with HTTP and event mappings

pub mod actors;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod lifecycle;
pub mod models;
pub mod observability;
pub mod party;
pub mod protocol;
pub mod rooms;
pub mod routes;
