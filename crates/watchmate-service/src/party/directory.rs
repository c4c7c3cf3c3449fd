//! Membership indexes.
//!
//! Membership is kept in two places that the connection lifecycle updates
//! together:
//!
//! - [`RoomRoster`]: the members of one room in join order, owned by that
//!   room's actor.
//! - [`SessionDirectory`]: the process-wide connection -> room index, used to
//!   answer "which room is this connection in" without asking any room.

use crate::errors::PartyError;
use crate::protocol::MemberView;
use crate::rooms::RoomCode;

use std::collections::HashMap;
use tokio::sync::RwLock;

/// One joined connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub connection_id: String,
    pub display_name: String,
    /// Monotonic per room; lower joined earlier.
    pub join_seq: u64,
}

/// Members of a single room, in join order.
#[derive(Debug, Default)]
pub struct RoomRoster {
    members: Vec<Member>,
    next_seq: u64,
}

impl RoomRoster {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a member at the end of the join order.
    pub fn add(&mut self, connection_id: &str, display_name: &str) -> Result<(), PartyError> {
        if self.contains(connection_id) {
            return Err(PartyError::Conflict(
                "Connection is already a member of this room".to_string(),
            ));
        }

        let member = Member {
            connection_id: connection_id.to_string(),
            display_name: display_name.to_string(),
            join_seq: self.next_seq,
        };
        self.next_seq += 1;
        self.members.push(member);
        Ok(())
    }

    pub fn remove(&mut self, connection_id: &str) -> Option<Member> {
        let position = self
            .members
            .iter()
            .position(|m| m.connection_id == connection_id)?;
        Some(self.members.remove(position))
    }

    #[must_use]
    pub fn get(&self, connection_id: &str) -> Option<&Member> {
        self.members.iter().find(|m| m.connection_id == connection_id)
    }

    #[must_use]
    pub fn contains(&self, connection_id: &str) -> bool {
        self.get(connection_id).is_some()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Earliest-joined member still present.
    #[must_use]
    pub fn earliest(&self) -> Option<&Member> {
        self.members.first()
    }

    /// Members in join order.
    pub fn iter(&self) -> impl Iterator<Item = &Member> {
        self.members.iter()
    }

    /// Member list for `users-update`: the host first, everyone else in
    /// join order.
    #[must_use]
    pub fn list(&self, host: Option<&str>) -> Vec<MemberView> {
        let view = |m: &Member| MemberView {
            connection_id: m.connection_id.clone(),
            display_name: m.display_name.clone(),
            is_host: host == Some(m.connection_id.as_str()),
        };

        let host_entry = self.members.iter().filter(|m| host == Some(m.connection_id.as_str()));
        let others = self.members.iter().filter(|m| host != Some(m.connection_id.as_str()));
        host_entry.chain(others).map(view).collect()
    }

    pub fn clear(&mut self) {
        self.members.clear();
    }
}

/// Where a connection is joined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub room_code: RoomCode,
    pub display_name: String,
}

/// Process-wide connection -> room index.
#[derive(Debug, Default)]
pub struct SessionDirectory {
    entries: RwLock<HashMap<String, DirectoryEntry>>,
}

impl SessionDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that a connection joined a room, returning the stored record.
    ///
    /// A connection belongs to at most one room; registering it twice is a
    /// `Conflict`.
    pub async fn register(
        &self,
        connection_id: &str,
        room_code: RoomCode,
        display_name: &str,
    ) -> Result<DirectoryEntry, PartyError> {
        let mut entries = self.entries.write().await;
        if entries.contains_key(connection_id) {
            return Err(PartyError::Conflict(
                "Connection has already joined a room".to_string(),
            ));
        }
        let entry = DirectoryEntry {
            room_code,
            display_name: display_name.to_string(),
        };
        entries.insert(connection_id.to_string(), entry.clone());
        Ok(entry)
    }

    pub async fn remove(&self, connection_id: &str) -> Option<DirectoryEntry> {
        self.entries.write().await.remove(connection_id)
    }

    /// The room a connection is joined to, if any.
    pub async fn member_room(&self, connection_id: &str) -> Option<RoomCode> {
        self.entries
            .read()
            .await
            .get(connection_id)
            .map(|e| e.room_code.clone())
    }

    /// The full record (room and name on record) for a connection.
    pub async fn lookup(&self, connection_id: &str) -> Option<DirectoryEntry> {
        self.entries.read().await.get(connection_id).cloned()
    }
}
