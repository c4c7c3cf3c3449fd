//! # Watchmate Test Utilities
//!
//! Shared test utilities for the Watchmate service.
//!
//! This crate provides:
//! - Server test harness (`TestPartyServer` for E2E tests)
//! - WebSocket test client (`TestClient`) speaking the JSON event protocol
//!
//! ## Usage
//!
//! ```rust,ignore
//! use watchmate_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> Result<(), anyhow::Error> {
//!     let server = TestPartyServer::spawn().await?;
//!     let room = server.create_room(false, None).await?;
//!
//!     let mut alice = TestClient::connect(&server).await?;
//!     alice.join(&room.room_code, "Alice", None).await?;
//!     Ok(())
//! }
//! ```

pub mod server_harness;
pub mod ws_client;

// Re-export commonly used items
pub use server_harness::TestPartyServer;
pub use ws_client::TestClient;
