//! Readiness consensus.
//!
//! A room is "all ready" when every current member is in the ready set and
//! the room is non-empty. The ready set is always a subset of the roster:
//! departures must be removed through [`ReadinessCoordinator::remove`].

use super::directory::RoomRoster;

use std::collections::HashSet;

/// Readiness broadcast payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessSnapshot {
    /// Ready members, in roster order.
    pub ready_connection_ids: Vec<String>,
    pub all_ready: bool,
}

#[derive(Debug, Default)]
pub struct ReadinessCoordinator {
    ready: HashSet<String>,
}

impl ReadinessCoordinator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip a member's ready flag. Returns the new flag.
    pub fn toggle(&mut self, connection_id: &str) -> bool {
        if self.ready.remove(connection_id) {
            false
        } else {
            self.ready.insert(connection_id.to_string());
            true
        }
    }

    /// Drop a departed member. Returns `true` if they were ready.
    pub fn remove(&mut self, connection_id: &str) -> bool {
        self.ready.remove(connection_id)
    }

    #[must_use]
    pub fn is_ready(&self, connection_id: &str) -> bool {
        self.ready.contains(connection_id)
    }

    pub fn clear(&mut self) {
        self.ready.clear();
    }

    #[must_use]
    pub fn snapshot(&self, roster: &RoomRoster) -> ReadinessSnapshot {
        let ready_connection_ids: Vec<String> = roster
            .iter()
            .filter(|m| self.ready.contains(&m.connection_id))
            .map(|m| m.connection_id.clone())
            .collect();

        let all_ready = !roster.is_empty() && ready_connection_ids.len() == roster.len();

        ReadinessSnapshot {
            ready_connection_ids,
            all_ready,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn roster_of(ids: &[&str]) -> RoomRoster {
        let mut roster = RoomRoster::new();
        for id in ids {
            roster.add(id, "viewer").unwrap();
        }
        roster
    }

    #[test]
    fn test_empty_room_is_never_all_ready() {
        let readiness = ReadinessCoordinator::new();
        let snapshot = readiness.snapshot(&RoomRoster::new());

        assert!(snapshot.ready_connection_ids.is_empty());
        assert!(!snapshot.all_ready);
    }

    #[test]
    fn test_toggle_is_a_flip() {
        let mut readiness = ReadinessCoordinator::new();

        assert!(readiness.toggle("c1"));
        assert!(readiness.is_ready("c1"));
        assert!(!readiness.toggle("c1"));
        assert!(!readiness.is_ready("c1"));
    }

    #[test]
    fn test_all_ready_requires_everyone() {
        let roster = roster_of(&["c1", "c2", "c3"]);
        let mut readiness = ReadinessCoordinator::new();

        readiness.toggle("c1");
        readiness.toggle("c3");
        let snapshot = readiness.snapshot(&roster);
        assert_eq!(snapshot.ready_connection_ids, ["c1", "c3"]);
        assert!(!snapshot.all_ready);

        readiness.toggle("c2");
        let snapshot = readiness.snapshot(&roster);
        assert_eq!(snapshot.ready_connection_ids, ["c1", "c2", "c3"]);
        assert!(snapshot.all_ready);
    }

    #[test]
    fn test_departure_of_unready_member_can_complete_consensus() {
        let mut roster = roster_of(&["c1", "c2"]);
        let mut readiness = ReadinessCoordinator::new();
        readiness.toggle("c1");

        roster.remove("c2");
        readiness.remove("c2");

        assert!(readiness.snapshot(&roster).all_ready);
    }

    #[test]
    fn test_clear_resets() {
        let roster = roster_of(&["c1"]);
        let mut readiness = ReadinessCoordinator::new();
        readiness.toggle("c1");

        readiness.clear();
        let snapshot = readiness.snapshot(&roster);
        assert!(snapshot.ready_connection_ids.is_empty());
        assert!(!snapshot.all_ready);
    }
}
