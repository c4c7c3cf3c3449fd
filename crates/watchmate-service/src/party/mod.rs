//! Per-room coordination state.
//!
//! These are plain state machines with no I/O. A `RoomActor` owns one of each
//! for its room and is the only code that mutates them; the process-wide
//! [`directory::SessionDirectory`] is the exception and carries its own lock.

pub mod countdown;
pub mod directory;
pub mod host;
pub mod readiness;
pub mod relay;

pub use countdown::{CountdownSequencer, CountdownState};
pub use directory::{Member, RoomRoster, SessionDirectory};
pub use host::{HostChange, HostElection};
pub use readiness::{ReadinessCoordinator, ReadinessSnapshot};
pub use relay::{VideoSource, VideoState};
