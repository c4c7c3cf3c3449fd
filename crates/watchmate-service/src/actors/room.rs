//! `RoomActor` - per-room serializing context.
//!
//! Each `RoomActor`:
//! - Owns all live state for one room: roster, host, ready set, countdown and
//!   video source
//! - Applies joins, departures and member events one at a time, so a room's
//!   state is never mutated by two operations at once
//! - Fans events out to its members' `ConnectionActor`s without waiting on
//!   any of them
//!
//! Broadcasts reach every member in the order the room accepted the
//! operations that produced them.
//!
//! # Closing
//!
//! When the last member leaves, the room tears its state down and refuses
//! further joins with `RoomNotFound` until the controller removes it.

use crate::errors::PartyError;
use crate::observability::metrics as prom;
use crate::party::relay::{chat_event, reaction_event};
use crate::party::{
    CountdownSequencer, HostChange, HostElection, ReadinessCoordinator, RoomRoster, VideoState,
};
use crate::protocol::ServerEvent;
use crate::rooms::RoomCode;

use super::connection::ConnectionActorHandle;
use super::messages::{JoinAck, LeaveOutcome, RoomEvent, RoomMessage, RoomState};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Room mailbox capacity.
const ROOM_CHANNEL_BUFFER: usize = 500;

/// Handle to a `RoomActor`.
#[derive(Clone, Debug)]
pub struct RoomActorHandle {
    sender: mpsc::Sender<RoomMessage>,
    cancel_token: CancellationToken,
    room_code: RoomCode,
    mailbox: Arc<MailboxMonitor>,
}

impl RoomActorHandle {
    #[must_use]
    pub fn room_code(&self) -> &RoomCode {
        &self.room_code
    }

    /// Add a connection to the room.
    ///
    /// A room that has been removed from the registry (cancelled, or its
    /// actor already gone) refuses the join with `RoomNotFound`.
    pub async fn join(
        &self,
        connection_id: String,
        display_name: String,
        claims_host: bool,
        connection: ConnectionActorHandle,
    ) -> Result<JoinAck, PartyError> {
        if self.is_cancelled() {
            return Err(PartyError::RoomNotFound);
        }

        let (tx, rx) = oneshot::channel();
        self.send(RoomMessage::ConnectionJoin {
            connection_id,
            display_name,
            claims_host,
            connection,
            respond_to: tx,
        })
        .await
        .map_err(|_| PartyError::RoomNotFound)?;

        rx.await.map_err(|_| PartyError::RoomNotFound)?
    }

    /// Remove a connection whose transport went away.
    pub async fn leave(&self, connection_id: String) -> Result<LeaveOutcome, PartyError> {
        let (tx, rx) = oneshot::channel();
        self.send(RoomMessage::ConnectionLeft {
            connection_id,
            respond_to: tx,
        })
        .await?;

        rx.await
            .map_err(|e| PartyError::Internal(format!("response receive failed: {e}")))
    }

    /// Forward a member event. Rejections are reported to the member by the
    /// room itself, so this only fails if the room is gone.
    pub async fn send_event(&self, connection_id: String, event: RoomEvent) -> Result<(), PartyError> {
        self.send(RoomMessage::Event {
            connection_id,
            event,
        })
        .await
    }

    pub async fn get_state(&self) -> Result<RoomState, PartyError> {
        let (tx, rx) = oneshot::channel();
        self.send(RoomMessage::GetState { respond_to: tx }).await?;

        rx.await
            .map_err(|e| PartyError::Internal(format!("response receive failed: {e}")))
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    async fn send(&self, message: RoomMessage) -> Result<(), PartyError> {
        self.mailbox.record_enqueue();
        if let Err(e) = self.sender.send(message).await {
            self.mailbox.record_send_failed();
            return Err(PartyError::Internal(format!("channel send failed: {e}")));
        }
        Ok(())
    }
}

/// The `RoomActor` implementation.
pub struct RoomActor {
    room_code: RoomCode,
    receiver: mpsc::Receiver<RoomMessage>,
    /// For the countdown timer to post ticks without keeping the room alive.
    self_sender: mpsc::WeakSender<RoomMessage>,
    cancel_token: CancellationToken,
    roster: RoomRoster,
    connections: HashMap<String, ConnectionActorHandle>,
    host: HostElection,
    readiness: ReadinessCoordinator,
    countdown: CountdownSequencer,
    video: VideoState,
    is_closing: bool,
    metrics: Arc<ActorMetrics>,
    mailbox: Arc<MailboxMonitor>,
}

impl RoomActor {
    /// Spawn a room actor.
    ///
    /// `countdown_tick` is the spacing between countdown values.
    pub fn spawn(
        room_code: RoomCode,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
        countdown_tick: Duration,
    ) -> (RoomActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(ROOM_CHANNEL_BUFFER);
        let mailbox = Arc::new(MailboxMonitor::new(ActorType::Room, room_code.as_str()));

        let actor = Self {
            room_code: room_code.clone(),
            receiver,
            self_sender: sender.downgrade(),
            cancel_token: cancel_token.clone(),
            roster: RoomRoster::new(),
            connections: HashMap::new(),
            host: HostElection::new(),
            readiness: ReadinessCoordinator::new(),
            countdown: CountdownSequencer::new(countdown_tick),
            video: VideoState::new(),
            is_closing: false,
            metrics,
            mailbox: Arc::clone(&mailbox),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = RoomActorHandle {
            sender,
            cancel_token,
            room_code,
            mailbox,
        };

        (handle, task_handle)
    }

    #[instrument(skip_all, name = "wm.actor.room", fields(room_code = %self.room_code))]
    async fn run(mut self) {
        debug!(
            target: "wm.actor.room",
            room_code = %self.room_code,
            "RoomActor started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    self.countdown.cancel();
                    break;
                }

                msg = self.receiver.recv() => {
                    let Some(message) = msg else {
                        break;
                    };
                    self.mailbox.record_dequeue();
                    self.handle_message(message);
                    self.metrics.record_message_processed();
                }
            }
        }

        info!(
            target: "wm.actor.room",
            room_code = %self.room_code,
            members = self.roster.len(),
            messages_processed = self.mailbox.messages_processed(),
            "RoomActor stopped"
        );
    }

    fn handle_message(&mut self, message: RoomMessage) {
        match message {
            RoomMessage::ConnectionJoin {
                connection_id,
                display_name,
                claims_host,
                connection,
                respond_to,
            } => {
                let result = self.handle_join(connection_id, display_name, claims_host, connection);
                let _ = respond_to.send(result);
            }

            RoomMessage::ConnectionLeft {
                connection_id,
                respond_to,
            } => {
                let outcome = self.handle_leave(&connection_id);
                let _ = respond_to.send(outcome);
            }

            RoomMessage::Event {
                connection_id,
                event,
            } => {
                self.handle_event(&connection_id, event);
            }

            RoomMessage::CountdownTick { generation, value } => {
                self.handle_tick(generation, value);
            }

            RoomMessage::GetState { respond_to } => {
                let _ = respond_to.send(self.get_state());
            }
        }
    }

    fn handle_join(
        &mut self,
        connection_id: String,
        display_name: String,
        claims_host: bool,
        connection: ConnectionActorHandle,
    ) -> Result<JoinAck, PartyError> {
        if self.is_closing {
            return Err(PartyError::RoomNotFound);
        }

        self.roster.add(&connection_id, &display_name)?;
        self.connections
            .insert(connection_id.clone(), connection.clone());

        let host_changed = self.host.on_join(&connection_id, claims_host);
        let is_host = self.host.is_host(&connection_id);

        connection.send_event(ServerEvent::Joined {
            connection_id: connection_id.clone(),
            room_code: self.room_code.to_string(),
            is_host,
        });
        for event in self.video.snapshot_events() {
            connection.send_event(event);
        }

        self.broadcast_members();
        if host_changed {
            self.broadcast_host();
        }
        self.broadcast_readiness();

        info!(
            target: "wm.actor.room",
            room_code = %self.room_code,
            connection_id = %connection_id,
            is_host,
            claims_host,
            members = self.roster.len(),
            "Member joined"
        );

        Ok(JoinAck { is_host })
    }

    fn handle_leave(&mut self, connection_id: &str) -> LeaveOutcome {
        if self.roster.remove(connection_id).is_none() {
            return LeaveOutcome {
                was_member: false,
                remaining: self.roster.len(),
            };
        }
        self.connections.remove(connection_id);
        self.readiness.remove(connection_id);

        let successor = self.roster.earliest().map(|m| m.connection_id.as_str());
        let host_change = self.host.on_leave(connection_id, successor);

        info!(
            target: "wm.actor.room",
            room_code = %self.room_code,
            connection_id = %connection_id,
            remaining = self.roster.len(),
            "Member left"
        );

        if self.roster.is_empty() {
            self.close();
            return LeaveOutcome {
                was_member: true,
                remaining: 0,
            };
        }

        self.broadcast_members();
        if let HostChange::Promoted(new_host) = &host_change {
            info!(
                target: "wm.actor.room",
                room_code = %self.room_code,
                new_host = %new_host,
                "Host promoted"
            );
            self.broadcast_host();
        }

        // A departure may complete consensus, but never restarts a
        // countdown already running.
        let all_ready = self.broadcast_readiness();
        if all_ready && self.countdown.is_idle() {
            self.start_countdown("all_ready");
        }

        LeaveOutcome {
            was_member: true,
            remaining: self.roster.len(),
        }
    }

    fn handle_event(&mut self, connection_id: &str, event: RoomEvent) {
        if !self.roster.contains(connection_id) {
            debug!(
                target: "wm.actor.room",
                room_code = %self.room_code,
                connection_id = %connection_id,
                event_type = event.event_type(),
                "Dropping event from non-member"
            );
            return;
        }

        let event_type = event.event_type();
        let result = match event {
            RoomEvent::Chat { sender_name, text } => {
                self.broadcast(&chat_event(connection_id, sender_name, text));
                Ok(())
            }
            RoomEvent::Reaction { sender_name, emoji } => {
                self.broadcast(&reaction_event(connection_id, sender_name, emoji));
                Ok(())
            }
            RoomEvent::ShareVideo { url } => self
                .ensure_host(connection_id, "Only the host can change the video")
                .map(|()| {
                    let events = self.video.share_url(url);
                    self.apply_video_change(&events);
                }),
            RoomEvent::ShareLocalFile { file_name } => self
                .ensure_host(connection_id, "Only the host can change the video")
                .map(|()| {
                    let events = self.video.share_local_file(file_name);
                    self.apply_video_change(&events);
                }),
            RoomEvent::ClearVideo => self
                .ensure_host(connection_id, "Only the host can change the video")
                .map(|()| {
                    let events = self.video.clear();
                    self.apply_video_change(&events);
                }),
            RoomEvent::ToggleReady => {
                self.readiness.toggle(connection_id);
                if self.broadcast_readiness() {
                    self.start_countdown("all_ready");
                }
                Ok(())
            }
            RoomEvent::StartCountdown => self
                .ensure_host(connection_id, "Only the host can start the countdown")
                .map(|()| self.start_countdown("host")),
        };

        match result {
            Ok(()) => prom::record_event_relayed(event_type),
            Err(e) => self.reject(connection_id, event_type, &e),
        }
    }

    fn handle_tick(&mut self, generation: u64, value: u8) {
        let Some(value) = self.countdown.on_tick(generation, value) else {
            debug!(
                target: "wm.actor.room",
                room_code = %self.room_code,
                generation,
                "Discarding stale countdown tick"
            );
            return;
        };

        self.broadcast(&ServerEvent::Countdown { value });

        if value == 0 {
            self.readiness.clear();
            self.broadcast_readiness();
            debug!(
                target: "wm.actor.room",
                room_code = %self.room_code,
                generation,
                "Countdown complete"
            );
        }
    }

    fn get_state(&self) -> RoomState {
        let snapshot = self.readiness.snapshot(&self.roster);
        RoomState {
            room_code: self.room_code.clone(),
            members: self.roster.list(self.host.host()),
            host: self.host.host().map(str::to_string),
            ready_connection_ids: snapshot.ready_connection_ids,
            all_ready: snapshot.all_ready,
            countdown: self.countdown.state(),
            video: self.video.current().cloned(),
            is_closing: self.is_closing,
        }
    }

    fn ensure_host(&self, connection_id: &str, reason: &str) -> Result<(), PartyError> {
        if self.host.is_host(connection_id) {
            Ok(())
        } else {
            Err(PartyError::Unauthorized(reason.to_string()))
        }
    }

    /// Broadcast video events and reset readiness, since everyone has to
    /// get ready again for the new source.
    fn apply_video_change(&mut self, events: &[ServerEvent]) {
        for event in events {
            self.broadcast(event);
        }
        self.readiness.clear();
        self.broadcast_readiness();
    }

    fn start_countdown(&mut self, trigger: &'static str) {
        let first = self.countdown.start(
            &self.cancel_token,
            self.self_sender.clone(),
            |generation, value| RoomMessage::CountdownTick { generation, value },
        );
        self.broadcast(&ServerEvent::Countdown { value: first });
        prom::record_countdown_started(trigger);

        info!(
            target: "wm.actor.room",
            room_code = %self.room_code,
            trigger,
            generation = self.countdown.generation(),
            "Countdown started"
        );
    }

    /// Tear down per-room state after the last member left.
    fn close(&mut self) {
        self.is_closing = true;
        self.countdown.cancel();
        self.readiness.clear();
        self.video = VideoState::new();
        self.host.clear();
        self.roster.clear();
        self.connections.clear();

        debug!(
            target: "wm.actor.room",
            room_code = %self.room_code,
            "Room empty, closing"
        );
    }

    fn reject(&self, connection_id: &str, event_type: &'static str, error: &PartyError) {
        warn!(
            target: "wm.actor.room",
            room_code = %self.room_code,
            connection_id = %connection_id,
            event_type,
            error = %error,
            "Rejected member event"
        );
        prom::record_event_rejected(error.metric_label());

        if let Some(connection) = self.connections.get(connection_id) {
            connection.send_event(ServerEvent::from_error(error));
        }
    }

    fn broadcast(&self, event: &ServerEvent) {
        for member in self.roster.iter() {
            if let Some(connection) = self.connections.get(&member.connection_id) {
                connection.send_event(event.clone());
            }
        }
    }

    fn broadcast_members(&self) {
        let members = self.roster.list(self.host.host());
        self.broadcast(&ServerEvent::UsersUpdate { members });
    }

    fn broadcast_host(&self) {
        if let Some(host) = self.host.host() {
            self.broadcast(&ServerEvent::HostUpdate {
                connection_id: host.to_string(),
            });
        }
    }

    /// Broadcast the readiness snapshot. Returns `all_ready`.
    fn broadcast_readiness(&self) -> bool {
        let snapshot = self.readiness.snapshot(&self.roster);
        let all_ready = snapshot.all_ready;
        self.broadcast(&ServerEvent::ReadyUpdate {
            ready_connection_ids: snapshot.ready_connection_ids,
            all_ready,
        });
        all_ready
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
    use crate::actors::messages::ConnectionMessage;
    use crate::party::CountdownState;
    use tokio::time::Instant;

    const TICK: Duration = Duration::from_millis(1000);

    type Inbox = mpsc::Receiver<ConnectionMessage>;

    fn spawn_room() -> (RoomActorHandle, JoinHandle<()>) {
        RoomActor::spawn(
            RoomCode::parse("ABC123").unwrap(),
            CancellationToken::new(),
            ActorMetrics::new(),
            TICK,
        )
    }

    async fn join(room: &RoomActorHandle, id: &str, claims_host: bool) -> (JoinAck, Inbox) {
        let (connection, inbox) = ConnectionActorHandle::for_test(id, 64);
        let ack = room
            .join(id.to_string(), format!("name-{id}"), claims_host, connection)
            .await
            .unwrap();
        (ack, inbox)
    }

    async fn next_event(inbox: &mut Inbox) -> ServerEvent {
        match tokio::time::timeout(Duration::from_secs(30), inbox.recv()).await {
            Ok(Some(ConnectionMessage::Event(event))) => event,
            other => panic!("expected event, got {other:?}"),
        }
    }

    /// Everything already queued for a member.
    fn drain(inbox: &mut Inbox) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(message) = inbox.try_recv() {
            if let ConnectionMessage::Event(event) = message {
                events.push(event);
            }
        }
        events
    }

    /// Collect countdown values (with arrival time) until 0.
    async fn collect_countdown(inbox: &mut Inbox, since: Instant) -> Vec<(Duration, u8)> {
        let mut ticks = Vec::new();
        loop {
            if let ServerEvent::Countdown { value } = next_event(inbox).await {
                ticks.push((since.elapsed(), value));
                if value == 0 {
                    return ticks;
                }
            }
        }
    }

    fn assert_one_tick_apart(ticks: &[(Duration, u8)]) {
        let values: Vec<u8> = ticks.iter().map(|(_, v)| *v).collect();
        assert_eq!(values, [3, 2, 1, 0]);
        for pair in ticks.windows(2) {
            let gap = pair[1].0 - pair[0].0;
            assert!(
                gap >= TICK && gap < TICK + Duration::from_millis(50),
                "ticks should be ~1s apart, got {gap:?}"
            );
        }
    }

    #[tokio::test]
    async fn test_join_acknowledges_before_broadcasts() {
        let (room, _task) = spawn_room();
        let (ack, mut inbox) = join(&room, "c1", false).await;
        assert!(ack.is_host);

        let events = drain(&mut inbox);
        assert_eq!(
            events[0],
            ServerEvent::Joined {
                connection_id: "c1".to_string(),
                room_code: "ABC123".to_string(),
                is_host: true,
            }
        );
        assert!(matches!(&events[1], ServerEvent::UsersUpdate { members } if members.len() == 1));
        assert_eq!(
            events[2],
            ServerEvent::HostUpdate {
                connection_id: "c1".to_string()
            }
        );
        assert_eq!(
            events[3],
            ServerEvent::ReadyUpdate {
                ready_connection_ids: vec![],
                all_ready: false
            }
        );
    }

    #[tokio::test]
    async fn test_duplicate_join_is_conflict() {
        let (room, _task) = spawn_room();
        let (_, _inbox) = join(&room, "c1", false).await;

        let (connection, _inbox2) = ConnectionActorHandle::for_test("c1", 8);
        let result = room
            .join("c1".to_string(), "again".to_string(), false, connection)
            .await;
        assert!(matches!(result, Err(PartyError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_host_token_holder_replaces_fallback_host() {
        let (room, _task) = spawn_room();
        let (guest_ack, mut guest) = join(&room, "guest", false).await;
        assert!(guest_ack.is_host);
        drain(&mut guest);

        let (creator_ack, _creator) = join(&room, "creator", true).await;
        assert!(creator_ack.is_host);

        let events = drain(&mut guest);
        assert!(events.contains(&ServerEvent::HostUpdate {
            connection_id: "creator".to_string()
        }));

        let state = room.get_state().await.unwrap();
        assert_eq!(state.host.as_deref(), Some("creator"));
        assert_eq!(state.members.iter().filter(|m| m.is_host).count(), 1);
        assert_eq!(state.members[0].connection_id, "creator");
    }

    #[tokio::test]
    async fn test_host_departure_promotes_earliest_remaining() {
        let (room, _task) = spawn_room();
        let (_, _c1) = join(&room, "c1", true).await;
        let (_, mut c2) = join(&room, "c2", false).await;
        let (_, mut c3) = join(&room, "c3", false).await;
        drain(&mut c2);
        drain(&mut c3);

        let outcome = room.leave("c1".to_string()).await.unwrap();
        assert_eq!(
            outcome,
            LeaveOutcome {
                was_member: true,
                remaining: 2
            }
        );

        for inbox in [&mut c2, &mut c3] {
            let events = drain(inbox);
            let host_updates: Vec<&ServerEvent> = events
                .iter()
                .filter(|e| matches!(e, ServerEvent::HostUpdate { .. }))
                .collect();
            assert_eq!(
                host_updates,
                [&ServerEvent::HostUpdate {
                    connection_id: "c2".to_string()
                }]
            );
        }

        let state = room.get_state().await.unwrap();
        assert_eq!(state.host.as_deref(), Some("c2"));
        assert_eq!(state.members.iter().filter(|m| m.is_host).count(), 1);
    }

    #[tokio::test]
    async fn test_chat_order_and_sender_identity() {
        let (room, _task) = spawn_room();
        let (_, _c1) = join(&room, "c1", false).await;
        let (_, mut c2) = join(&room, "c2", false).await;
        drain(&mut c2);

        for text in ["A", "B"] {
            room.send_event(
                "c1".to_string(),
                RoomEvent::Chat {
                    sender_name: "name-c1".to_string(),
                    text: text.to_string(),
                },
            )
            .await
            .unwrap();
        }

        let mut texts = Vec::new();
        for _ in 0..2 {
            match next_event(&mut c2).await {
                ServerEvent::ChatMessage {
                    sender_id,
                    sender_name,
                    text,
                    ..
                } => {
                    assert_eq!(sender_id, "c1");
                    assert_eq!(sender_name, "name-c1");
                    texts.push(text);
                }
                other => panic!("unexpected event {other:?}"),
            }
        }
        assert_eq!(texts, ["A", "B"]);
    }

    #[tokio::test]
    async fn test_non_host_video_change_is_rejected() {
        let (room, _task) = spawn_room();
        let (_, mut host) = join(&room, "host", true).await;
        let (_, mut guest) = join(&room, "guest", false).await;
        drain(&mut host);
        drain(&mut guest);

        room.send_event(
            "guest".to_string(),
            RoomEvent::ShareVideo {
                url: "https://example.com/v".to_string(),
            },
        )
        .await
        .unwrap();
        let state = room.get_state().await.unwrap();

        assert_eq!(state.video, None);
        assert!(drain(&mut host).is_empty());
        let guest_events = drain(&mut guest);
        assert_eq!(guest_events.len(), 1);
        assert!(
            matches!(&guest_events[0], ServerEvent::Error { code, .. } if code == "UNAUTHORIZED")
        );
    }

    #[tokio::test]
    async fn test_video_change_resets_readiness() {
        let (room, _task) = spawn_room();
        let (_, mut host) = join(&room, "host", true).await;
        let (_, _guest) = join(&room, "guest", false).await;

        room.send_event("guest".to_string(), RoomEvent::ToggleReady)
            .await
            .unwrap();
        drain(&mut host);

        room.send_event(
            "host".to_string(),
            RoomEvent::ShareLocalFile {
                file_name: "movie.mp4".to_string(),
            },
        )
        .await
        .unwrap();
        let state = room.get_state().await.unwrap();
        assert!(state.ready_connection_ids.is_empty());

        let events = drain(&mut host);
        assert_eq!(
            events,
            [
                ServerEvent::LocalFileUpdate {
                    file_name: Some("movie.mp4".to_string())
                },
                ServerEvent::ReadyUpdate {
                    ready_connection_ids: vec![],
                    all_ready: false
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_late_joiner_receives_video_snapshot() {
        let (room, _task) = spawn_room();
        let (_, _host) = join(&room, "host", true).await;
        room.send_event(
            "host".to_string(),
            RoomEvent::ShareVideo {
                url: "https://example.com/v".to_string(),
            },
        )
        .await
        .unwrap();

        let (_, mut late) = join(&room, "late", false).await;
        let events = drain(&mut late);
        assert!(matches!(events[0], ServerEvent::Joined { .. }));
        assert_eq!(
            events[1],
            ServerEvent::VideoUpdate {
                url: Some("https://example.com/v".to_string())
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_ready_runs_countdown_then_clears() {
        let (room, _task) = spawn_room();
        let (_, mut c1) = join(&room, "c1", false).await;
        let (_, mut c2) = join(&room, "c2", false).await;

        let start = Instant::now();
        room.send_event("c1".to_string(), RoomEvent::ToggleReady)
            .await
            .unwrap();
        room.send_event("c2".to_string(), RoomEvent::ToggleReady)
            .await
            .unwrap();

        assert_one_tick_apart(&collect_countdown(&mut c1, start).await);
        assert_one_tick_apart(&collect_countdown(&mut c2, start).await);

        // Completion clears readiness.
        assert_eq!(
            next_event(&mut c1).await,
            ServerEvent::ReadyUpdate {
                ready_connection_ids: vec![],
                all_ready: false
            }
        );
        let state = room.get_state().await.unwrap();
        assert_eq!(state.countdown, CountdownState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_during_countdown_does_not_abort() {
        let (room, _task) = spawn_room();
        let (_, _c1) = join(&room, "c1", false).await;
        let (_, mut c2) = join(&room, "c2", false).await;
        let (_, _c3) = join(&room, "c3", false).await;

        let start = Instant::now();
        for id in ["c1", "c2", "c3"] {
            room.send_event(id.to_string(), RoomEvent::ToggleReady)
                .await
                .unwrap();
        }

        // First value is broadcast synchronously.
        let state = room.get_state().await.unwrap();
        assert_eq!(state.countdown, CountdownState::Counting(3));

        tokio::time::sleep(TICK / 2).await;
        room.leave("c3".to_string()).await.unwrap();

        let ticks = collect_countdown(&mut c2, start).await;
        assert_one_tick_apart(&ticks);
    }

    #[tokio::test(start_paused = true)]
    async fn test_departure_completing_consensus_starts_countdown() {
        let (room, _task) = spawn_room();
        let (_, mut c1) = join(&room, "c1", false).await;
        let (_, _c2) = join(&room, "c2", false).await;

        room.send_event("c1".to_string(), RoomEvent::ToggleReady)
            .await
            .unwrap();
        room.leave("c2".to_string()).await.unwrap();

        let ticks = collect_countdown(&mut c1, Instant::now()).await;
        assert_eq!(ticks.len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_host_restart_supersedes_running_countdown() {
        let (room, _task) = spawn_room();
        let (_, mut host) = join(&room, "host", true).await;
        drain(&mut host);

        room.send_event("host".to_string(), RoomEvent::StartCountdown)
            .await
            .unwrap();
        tokio::time::sleep(TICK + TICK / 2).await;
        room.send_event("host".to_string(), RoomEvent::StartCountdown)
            .await
            .unwrap();

        let mut values = Vec::new();
        loop {
            if let ServerEvent::Countdown { value } = next_event(&mut host).await {
                values.push(value);
                if value == 0 {
                    break;
                }
            }
        }

        // 3, 2 from the first run, then only the restarted run.
        assert_eq!(values, [3, 2, 3, 2, 1, 0]);
        assert!(tokio::time::timeout(TICK * 3, next_countdown(&mut host))
            .await
            .is_err());
    }

    async fn next_countdown(inbox: &mut Inbox) -> u8 {
        loop {
            if let Some(ConnectionMessage::Event(ServerEvent::Countdown { value })) =
                inbox.recv().await
            {
                return value;
            }
        }
    }

    #[tokio::test]
    async fn test_non_host_cannot_start_countdown() {
        let (room, _task) = spawn_room();
        let (_, _host) = join(&room, "host", true).await;
        let (_, mut guest) = join(&room, "guest", false).await;
        drain(&mut guest);

        room.send_event("guest".to_string(), RoomEvent::StartCountdown)
            .await
            .unwrap();
        let state = room.get_state().await.unwrap();

        assert_eq!(state.countdown, CountdownState::Idle);
        assert!(matches!(
            drain(&mut guest).as_slice(),
            [ServerEvent::Error { .. }]
        ));
    }

    #[tokio::test]
    async fn test_event_from_non_member_is_ignored() {
        let (room, _task) = spawn_room();
        let (_, mut c1) = join(&room, "c1", false).await;
        drain(&mut c1);

        room.send_event("stranger".to_string(), RoomEvent::ToggleReady)
            .await
            .unwrap();
        let state = room.get_state().await.unwrap();

        assert!(state.ready_connection_ids.is_empty());
        assert!(drain(&mut c1).is_empty());
    }

    #[tokio::test]
    async fn test_last_departure_closes_room() {
        let (room, _task) = spawn_room();
        let (_, _c1) = join(&room, "c1", false).await;
        room.send_event("c1".to_string(), RoomEvent::ToggleReady)
            .await
            .unwrap();

        let outcome = room.leave("c1".to_string()).await.unwrap();
        assert_eq!(
            outcome,
            LeaveOutcome {
                was_member: true,
                remaining: 0
            }
        );

        let state = room.get_state().await.unwrap();
        assert!(state.is_closing);
        assert!(state.members.is_empty());
        assert_eq!(state.host, None);
        assert_eq!(state.countdown, CountdownState::Idle);

        let (connection, _inbox) = ConnectionActorHandle::for_test("c2", 8);
        let result = room
            .join("c2".to_string(), "late".to_string(), false, connection)
            .await;
        assert!(matches!(result, Err(PartyError::RoomNotFound)));
    }

    #[tokio::test]
    async fn test_leave_of_unknown_connection() {
        let (room, _task) = spawn_room();
        let (_, _c1) = join(&room, "c1", false).await;

        let outcome = room.leave("ghost".to_string()).await.unwrap();
        assert_eq!(
            outcome,
            LeaveOutcome {
                was_member: false,
                remaining: 1
            }
        );
    }

    #[tokio::test]
    async fn test_cancel_stops_actor() {
        let (room, task) = spawn_room();

        room.cancel();
        task.await.unwrap();

        assert!(room.is_cancelled());
        assert!(room.get_state().await.is_err());
    }

    #[tokio::test]
    async fn test_join_after_cancel_is_not_found() {
        let (room, task) = spawn_room();
        room.cancel();

        let (connection, _inbox) = ConnectionActorHandle::for_test("late", 8);
        let result = room
            .join("late".to_string(), "Late".to_string(), false, connection)
            .await;
        assert!(matches!(result, Err(PartyError::RoomNotFound)));

        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_join_after_actor_exit_is_not_found() {
        let (room, task) = spawn_room();
        task.abort();
        let _ = task.await;

        let (connection, _inbox) = ConnectionActorHandle::for_test("late", 8);
        let result = room
            .join("late".to_string(), "Late".to_string(), false, connection)
            .await;
        assert!(matches!(result, Err(PartyError::RoomNotFound)));
    }
}
