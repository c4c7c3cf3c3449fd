//! Host election.
//!
//! Rules on join:
//! 1. A joiner presenting the room's host token becomes host, replacing any
//!    current host (lets the creator reclaim host after reconnecting).
//! 2. Otherwise, if the room has no host, the joiner becomes host.
//! 3. Otherwise nothing changes.
//!
//! When the host leaves, the earliest-joined remaining member is promoted.

/// Result of a departure for host assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostChange {
    /// The departed member was not host.
    Unchanged,
    /// A remaining member took over.
    Promoted(String),
    /// Nobody is left to promote.
    Cleared,
}

/// Per-room host assignment.
#[derive(Debug, Default)]
pub struct HostElection {
    host: Option<String>,
}

impl HostElection {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    #[must_use]
    pub fn is_host(&self, connection_id: &str) -> bool {
        self.host.as_deref() == Some(connection_id)
    }

    /// Apply the join rules. Returns `true` if the host changed.
    pub fn on_join(&mut self, connection_id: &str, presented_valid_token: bool) -> bool {
        if presented_valid_token || self.host.is_none() {
            let changed = !self.is_host(connection_id);
            self.host = Some(connection_id.to_string());
            return changed;
        }
        false
    }

    /// Apply the departure rule.
    ///
    /// `successor` is the earliest-joined member remaining after the
    /// departure, if any.
    pub fn on_leave(&mut self, connection_id: &str, successor: Option<&str>) -> HostChange {
        if !self.is_host(connection_id) {
            return HostChange::Unchanged;
        }

        match successor {
            Some(next) => {
                self.host = Some(next.to_string());
                HostChange::Promoted(next.to_string())
            }
            None => {
                self.host = None;
                HostChange::Cleared
            }
        }
    }

    pub fn clear(&mut self) {
        self.host = None;
    }
}
