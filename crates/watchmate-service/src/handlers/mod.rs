//! HTTP and WebSocket request handlers.

pub mod metrics;
pub mod rooms;
pub mod socket;

pub use metrics::metrics_handler;
pub use rooms::{create_room, get_room, verify_password};
pub use socket::ws_upgrade;
