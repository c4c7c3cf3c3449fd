//! Connection lifecycle.
//!
//! Entry points used by the socket handler to move one connection through
//! join, events and disconnect. The process-wide [`SessionDirectory`] is the
//! record of which room a connection is in and under what name; each step
//! keeps it and the room's own roster in agreement, and deletes the room from
//! the registry when its last member leaves.

use crate::actors::{
    ConnectionActorHandle, JoinAck, RoomActorHandle, RoomControllerActorHandle, RoomEvent,
};
use crate::errors::PartyError;
use crate::observability::metrics as prom;
use crate::party::SessionDirectory;
use crate::protocol::ClientEvent;
use crate::rooms::RoomCode;

use std::sync::Arc;
use tracing::{debug, info, warn};

/// Per-connection state held by the socket task.
///
/// Membership itself lives in the [`SessionDirectory`]; the session only
/// caches the joined room's actor handle.
#[derive(Debug)]
pub struct ConnectionSession {
    connection: ConnectionActorHandle,
    room: Option<RoomActorHandle>,
}

impl ConnectionSession {
    #[must_use]
    pub fn new(connection: ConnectionActorHandle) -> Self {
        Self {
            connection,
            room: None,
        }
    }

    #[must_use]
    pub fn connection_id(&self) -> &str {
        self.connection.connection_id()
    }

    #[must_use]
    pub fn connection(&self) -> &ConnectionActorHandle {
        &self.connection
    }
}

/// Orchestrates join and disconnect across the registry, the directory and
/// the room actors.
#[derive(Clone)]
pub struct ConnectionLifecycle {
    controller: RoomControllerActorHandle,
    directory: Arc<SessionDirectory>,
}

impl ConnectionLifecycle {
    #[must_use]
    pub fn new(controller: RoomControllerActorHandle, directory: Arc<SessionDirectory>) -> Self {
        Self {
            controller,
            directory,
        }
    }

    #[must_use]
    pub fn directory(&self) -> &Arc<SessionDirectory> {
        &self.directory
    }

    /// Route a validated client event.
    ///
    /// Errors are meant for the sender only. Events for a room the
    /// connection is not in are dropped without error.
    pub async fn handle_event(
        &self,
        session: &mut ConnectionSession,
        event: ClientEvent,
    ) -> Result<(), PartyError> {
        match event {
            ClientEvent::JoinRoom {
                room_code,
                display_name,
                host_token,
            } => {
                self.join(session, &room_code, display_name, host_token)
                    .await?;
                Ok(())
            }
            other => self.dispatch(session, other).await,
        }
    }

    /// Join a room.
    ///
    /// The room must exist before anything is mutated. A valid host token
    /// makes the joiner host; an invalid one is treated as no token.
    pub async fn join(
        &self,
        session: &mut ConnectionSession,
        room_code: &str,
        display_name: String,
        host_token: Option<String>,
    ) -> Result<JoinAck, PartyError> {
        let result = self
            .try_join(session, room_code, display_name, host_token)
            .await;

        match &result {
            Ok(ack) => {
                prom::record_join("success");
                info!(
                    target: "wm.lifecycle",
                    connection_id = %session.connection_id(),
                    room_code = %room_code,
                    is_host = ack.is_host,
                    "Connection joined room"
                );
            }
            Err(e) => {
                prom::record_join(e.metric_label());
                debug!(
                    target: "wm.lifecycle",
                    connection_id = %session.connection_id(),
                    error = %e,
                    "Join refused"
                );
            }
        }

        result
    }

    async fn try_join(
        &self,
        session: &mut ConnectionSession,
        room_code: &str,
        display_name: String,
        host_token: Option<String>,
    ) -> Result<JoinAck, PartyError> {
        let connection_id = session.connection_id().to_string();
        if self.directory.member_room(&connection_id).await.is_some() {
            return Err(PartyError::Conflict(
                "Connection has already joined a room".to_string(),
            ));
        }

        let code = RoomCode::parse(room_code)?;
        let entry = self.controller.lookup_room(&code).await?;

        let claims_host = host_token
            .as_deref()
            .is_some_and(|token| self.controller.verify_host_token(&entry.room, token));
        if host_token.is_some() && !claims_host {
            warn!(
                target: "wm.lifecycle",
                connection_id = %connection_id,
                room_code = %code,
                "Invalid host token presented, joining as guest"
            );
        }

        let record = self
            .directory
            .register(&connection_id, code, &display_name)
            .await?;

        let joined = entry
            .handle
            .join(
                connection_id.clone(),
                record.display_name,
                claims_host,
                session.connection.clone(),
            )
            .await;

        match joined {
            Ok(ack) => {
                session.room = Some(entry.handle);
                Ok(ack)
            }
            Err(e) => {
                self.directory.remove(&connection_id).await;
                Err(e)
            }
        }
    }

    async fn dispatch(
        &self,
        session: &ConnectionSession,
        event: ClientEvent,
    ) -> Result<(), PartyError> {
        let connection_id = session.connection_id();
        let Some(record) = self.directory.lookup(connection_id).await else {
            debug!(
                target: "wm.lifecycle",
                connection_id = %connection_id,
                event_type = event.event_type(),
                "Dropping event from connection outside any room"
            );
            return Ok(());
        };

        let addressed = RoomCode::parse(event.room_code()).ok();
        if addressed.as_ref() != Some(&record.room_code) {
            debug!(
                target: "wm.lifecycle",
                connection_id = %connection_id,
                room_code = %record.room_code,
                event_type = event.event_type(),
                "Dropping event addressed to another room"
            );
            return Ok(());
        }

        let room_event = match event {
            ClientEvent::ChatMessage { text, .. } => RoomEvent::Chat {
                sender_name: record.display_name,
                text,
            },
            ClientEvent::Reaction { emoji, .. } => RoomEvent::Reaction {
                sender_name: record.display_name,
                emoji,
            },
            ClientEvent::ShareVideo { url, .. } => RoomEvent::ShareVideo { url },
            ClientEvent::ClearVideo { .. } => RoomEvent::ClearVideo,
            ClientEvent::ShareLocalFile { file_name, .. } => {
                RoomEvent::ShareLocalFile { file_name }
            }
            ClientEvent::ToggleReady { .. } => RoomEvent::ToggleReady,
            ClientEvent::StartCountdown { .. } => RoomEvent::StartCountdown,
            ClientEvent::JoinRoom { .. } => {
                return Err(PartyError::Conflict(
                    "Connection has already joined a room".to_string(),
                ));
            }
        };

        self.room_handle(session, &record.room_code)
            .await?
            .send_event(connection_id.to_string(), room_event)
            .await
    }

    /// Tear down a connection's membership after its transport closed.
    pub async fn disconnect(&self, session: ConnectionSession) {
        let connection_id = session.connection_id().to_string();
        let Some(record) = self.directory.remove(&connection_id).await else {
            return;
        };
        let code = record.room_code;

        let outcome = match self.room_handle(&session, &code).await {
            Ok(handle) => handle.leave(connection_id.clone()).await,
            Err(e) => Err(e),
        };
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                // Room actor already gone (shutdown or removal).
                debug!(
                    target: "wm.lifecycle",
                    connection_id = %connection_id,
                    room_code = %code,
                    error = %e,
                    "Room unavailable during disconnect"
                );
                return;
            }
        };

        info!(
            target: "wm.lifecycle",
            connection_id = %connection_id,
            room_code = %code,
            remaining = outcome.remaining,
            "Connection left room"
        );

        if outcome.was_member && outcome.remaining == 0 {
            match self.controller.remove_room(&code).await {
                Ok(()) => {}
                Err(PartyError::RoomNotFound) => {
                    debug!(
                        target: "wm.lifecycle",
                        room_code = %code,
                        "Room already removed"
                    );
                }
                Err(e) => {
                    warn!(
                        target: "wm.lifecycle",
                        room_code = %code,
                        error = %e,
                        "Failed to remove empty room"
                    );
                }
            }
        }
    }

    /// Actor handle for the room the directory places this connection in.
    ///
    /// Served from the session's cache when it matches, otherwise resolved
    /// through the registry.
    async fn room_handle(
        &self,
        session: &ConnectionSession,
        code: &RoomCode,
    ) -> Result<RoomActorHandle, PartyError> {
        match &session.room {
            Some(handle) if handle.room_code() == code => Ok(handle.clone()),
            _ => Ok(self.controller.lookup_room(code).await?.handle),
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::actors::{ActorMetrics, ConnectionMessage};
    use crate::config::Config;
    use crate::protocol::ServerEvent;
    use crate::rooms::host_token::HostTokenIssuer;
    use std::collections::HashMap;
    use tokio::sync::mpsc;

    type Inbox = mpsc::Receiver<ConnectionMessage>;

    fn lifecycle() -> ConnectionLifecycle {
        let vars: HashMap<String, String> = [
            ("WM_INSTANCE_ID".to_string(), "wm-test".to_string()),
            ("WM_BCRYPT_COST".to_string(), "4".to_string()),
        ]
        .into_iter()
        .collect();
        let config = Config::from_vars(&vars).unwrap();
        let issuer = HostTokenIssuer::new(vec![9u8; 32]).unwrap();
        let controller = RoomControllerActorHandle::new(&config, issuer, ActorMetrics::new());
        ConnectionLifecycle::new(controller, Arc::new(SessionDirectory::new()))
    }

    fn session(id: &str) -> (ConnectionSession, Inbox) {
        let (connection, inbox) = ConnectionActorHandle::for_test(id, 64);
        (ConnectionSession::new(connection), inbox)
    }

    fn drain(inbox: &mut Inbox) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(message) = inbox.try_recv() {
            if let ConnectionMessage::Event(event) = message {
                events.push(event);
            }
        }
        events
    }

    #[tokio::test]
    async fn test_join_unknown_room_mutates_nothing() {
        let lifecycle = lifecycle();
        let (mut s1, _inbox) = session("c1");

        let result = lifecycle
            .join(&mut s1, "QQQQQQ", "Ann".to_string(), None)
            .await;

        assert!(matches!(result, Err(PartyError::RoomNotFound)));
        assert!(lifecycle.directory().member_room("c1").await.is_none());
    }

    #[tokio::test]
    async fn test_join_is_case_insensitive_and_registers_member() {
        let lifecycle = lifecycle();
        let created = lifecycle.controller.create_room(false, None).await.unwrap();
        let (mut s1, _inbox) = session("c1");

        let lowercase = created.room.code.as_str().to_lowercase();
        let ack = lifecycle
            .join(&mut s1, &lowercase, "Ann".to_string(), None)
            .await
            .unwrap();

        assert!(ack.is_host);
        assert_eq!(
            lifecycle.directory().member_room("c1").await,
            Some(created.room.code.clone())
        );
    }

    #[tokio::test]
    async fn test_second_join_is_conflict() {
        let lifecycle = lifecycle();
        let first = lifecycle.controller.create_room(false, None).await.unwrap();
        let second = lifecycle.controller.create_room(false, None).await.unwrap();
        let (mut s1, _inbox) = session("c1");

        lifecycle
            .join(&mut s1, first.room.code.as_str(), "Ann".to_string(), None)
            .await
            .unwrap();
        let result = lifecycle
            .join(&mut s1, second.room.code.as_str(), "Ann".to_string(), None)
            .await;

        assert!(matches!(result, Err(PartyError::Conflict(_))));
        assert_eq!(
            lifecycle.directory().member_room("c1").await,
            Some(first.room.code.clone())
        );
    }

    #[tokio::test]
    async fn test_host_token_and_fallback() {
        let lifecycle = lifecycle();
        let created = lifecycle.controller.create_room(false, None).await.unwrap();
        let code = created.room.code.as_str();

        let (mut guest, _g) = session("guest");
        let ack = lifecycle
            .join(&mut guest, code, "Guest".to_string(), Some("bogus".to_string()))
            .await
            .unwrap();
        assert!(ack.is_host, "first joiner becomes host by fallback");

        let (mut creator, _c) = session("creator");
        let ack = lifecycle
            .join(
                &mut creator,
                code,
                "Creator".to_string(),
                Some(created.host_token.clone()),
            )
            .await
            .unwrap();
        assert!(ack.is_host);

        let entry = lifecycle.controller.lookup_room(&created.room.code).await.unwrap();
        let state = entry.handle.get_state().await.unwrap();
        assert_eq!(state.host.as_deref(), Some("creator"));
    }

    #[tokio::test]
    async fn test_events_for_other_rooms_are_dropped() {
        let lifecycle = lifecycle();
        let created = lifecycle.controller.create_room(false, None).await.unwrap();
        let (mut s1, mut inbox) = session("c1");
        lifecycle
            .join(&mut s1, created.room.code.as_str(), "Ann".to_string(), None)
            .await
            .unwrap();
        drain(&mut inbox);

        lifecycle
            .handle_event(
                &mut s1,
                ClientEvent::ChatMessage {
                    room_code: "OTHER1".to_string(),
                    text: "hi".to_string(),
                },
            )
            .await
            .unwrap();
        lifecycle
            .handle_event(
                &mut s1,
                ClientEvent::ChatMessage {
                    room_code: created.room.code.to_string(),
                    text: "hello".to_string(),
                },
            )
            .await
            .unwrap();

        let entry = lifecycle.controller.lookup_room(&created.room.code).await.unwrap();
        entry.handle.get_state().await.unwrap();

        let events = drain(&mut inbox);
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            ServerEvent::ChatMessage { sender_name, text, .. }
                if sender_name == "Ann" && text == "hello"
        ));
    }

    #[tokio::test]
    async fn test_events_before_join_are_ignored() {
        let lifecycle = lifecycle();
        let (mut s1, _inbox) = session("c1");

        let result = lifecycle
            .handle_event(
                &mut s1,
                ClientEvent::ToggleReady {
                    room_code: "ABC123".to_string(),
                },
            )
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_last_disconnect_deletes_room() {
        let lifecycle = lifecycle();
        let created = lifecycle.controller.create_room(false, None).await.unwrap();
        let code = created.room.code.clone();

        let (mut s1, _i1) = session("c1");
        let (mut s2, mut i2) = session("c2");
        lifecycle
            .join(&mut s1, code.as_str(), "Ann".to_string(), None)
            .await
            .unwrap();
        lifecycle
            .join(&mut s2, code.as_str(), "Bob".to_string(), None)
            .await
            .unwrap();
        drain(&mut i2);

        lifecycle.disconnect(s1).await;
        assert!(lifecycle.controller.lookup_room(&code).await.is_ok());
        assert!(drain(&mut i2).contains(&ServerEvent::HostUpdate {
            connection_id: "c2".to_string()
        }));

        lifecycle.disconnect(s2).await;
        assert!(matches!(
            lifecycle.controller.lookup_room(&code).await,
            Err(PartyError::RoomNotFound)
        ));
        assert!(lifecycle.directory().member_room("c1").await.is_none());
        assert!(lifecycle.directory().member_room("c2").await.is_none());
    }

    #[tokio::test]
    async fn test_disconnect_without_join_is_noop() {
        let lifecycle = lifecycle();
        let (s1, _inbox) = session("c1");

        lifecycle.disconnect(s1).await;
        assert!(lifecycle.directory().member_room("c1").await.is_none());
    }

    #[tokio::test]
    async fn test_disconnect_resolves_room_from_directory() {
        let lifecycle = lifecycle();
        let created = lifecycle.controller.create_room(false, None).await.unwrap();
        let code = created.room.code.clone();

        let (mut s1, _inbox) = session("c1");
        lifecycle
            .join(&mut s1, code.as_str(), "Ann".to_string(), None)
            .await
            .unwrap();

        // A session with no cached room handle still leaves the room the
        // directory has on record.
        let (fresh, _fresh_inbox) = session("c1");
        lifecycle.disconnect(fresh).await;

        assert!(lifecycle.directory().member_room("c1").await.is_none());
        assert!(matches!(
            lifecycle.controller.lookup_room(&code).await,
            Err(PartyError::RoomNotFound)
        ));
    }

    #[tokio::test]
    async fn test_join_racing_room_removal_is_not_found() {
        let lifecycle = lifecycle();
        let created = lifecycle.controller.create_room(false, None).await.unwrap();
        let code = created.room.code.clone();

        let entry = lifecycle.controller.lookup_room(&code).await.unwrap();
        lifecycle.controller.remove_room(&code).await.unwrap();

        let (connection, _inbox) = ConnectionActorHandle::for_test("late", 8);
        let result = entry
            .handle
            .join("late".to_string(), "Late".to_string(), false, connection)
            .await;

        assert!(matches!(result, Err(PartyError::RoomNotFound)));
        assert!(lifecycle.directory().member_room("late").await.is_none());
    }
}
