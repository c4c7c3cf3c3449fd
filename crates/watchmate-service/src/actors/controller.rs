//! `RoomControllerActor` - singleton room registry and supervisor.
//!
//! The `RoomControllerActor` is the top-level actor:
//!
//! - Singleton per instance
//! - Owns the registry of live rooms and supervises one `RoomActor` each
//! - Allocates room codes and host tokens on creation
//! - Owns the root `CancellationToken` for graceful shutdown
//! - Monitors child actor health (panic detection via `JoinHandle`)
//!
//! Room creation, lookup and removal are serialized through this actor, so
//! two creations can never receive the same code.
//!
//! # Graceful Shutdown
//!
//! On SIGTERM, the controller:
//! 1. Sets `accepting_new = false`
//! 2. Cancels the root `CancellationToken` (propagates to all children)
//! 3. Waits for room actors to stop

use crate::config::Config;
use crate::errors::PartyError;
use crate::observability::metrics as prom;
use crate::rooms::host_token::HostTokenIssuer;
use crate::rooms::{hash_password, verify_password, Room, RoomCode};

use super::messages::{ControllerMessage, ControllerStatus, CreatedRoom, RoomEntry};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use super::room::{RoomActor, RoomActorHandle};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Default channel buffer size for the controller mailbox.
const CONTROLLER_CHANNEL_BUFFER: usize = 1000;

/// Attempts at drawing an unused room code before giving up.
const MAX_CODE_ATTEMPTS: usize = 5;

/// How long a removed room's task gets to finish.
const ROOM_REAP_TIMEOUT: Duration = Duration::from_secs(5);

/// How long shutdown waits for each room task.
const SHUTDOWN_ROOM_TIMEOUT: Duration = Duration::from_secs(30);

/// Handle to the `RoomControllerActor`.
///
/// Password hashing and verification run on the blocking pool from the
/// handle, so bcrypt never stalls the registry.
#[derive(Clone)]
pub struct RoomControllerActorHandle {
    sender: mpsc::Sender<ControllerMessage>,
    cancel_token: CancellationToken,
    mailbox: Arc<MailboxMonitor>,
    issuer: Arc<HostTokenIssuer>,
    bcrypt_cost: u32,
}

impl RoomControllerActorHandle {
    /// Create a new `RoomControllerActor` and return a handle to it.
    ///
    /// This spawns the actor task and returns immediately.
    #[must_use]
    pub fn new(config: &Config, issuer: HostTokenIssuer, metrics: Arc<ActorMetrics>) -> Self {
        let (sender, receiver) = mpsc::channel(CONTROLLER_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();
        let issuer = Arc::new(issuer);
        let mailbox = Arc::new(MailboxMonitor::new(
            ActorType::Controller,
            config.instance_id.as_str(),
        ));

        let actor = RoomControllerActor::new(
            config,
            receiver,
            cancel_token.clone(),
            metrics,
            Arc::clone(&mailbox),
            Arc::clone(&issuer),
        );

        tokio::spawn(actor.run());

        Self {
            sender,
            cancel_token,
            mailbox,
            issuer,
            bcrypt_cost: config.bcrypt_cost,
        }
    }

    /// Create a room.
    ///
    /// Private rooms require a non-empty password. A password sent for a
    /// public room is ignored.
    pub async fn create_room(
        &self,
        is_private: bool,
        password: Option<String>,
    ) -> Result<CreatedRoom, PartyError> {
        let password_hash = if is_private {
            let password = password
                .filter(|p| !p.is_empty())
                .ok_or_else(|| PartyError::Validation("Private rooms require a password".to_string()))?;
            let cost = self.bcrypt_cost;
            let hash = tokio::task::spawn_blocking(move || hash_password(&password, cost))
                .await
                .map_err(|e| PartyError::Internal(format!("password hashing task failed: {e}")))??;
            Some(hash)
        } else {
            None
        };

        let (tx, rx) = oneshot::channel();
        self.send(ControllerMessage::CreateRoom {
            is_private,
            password_hash,
            respond_to: tx,
        })
        .await?;

        rx.await
            .map_err(|e| PartyError::Internal(format!("response receive failed: {e}")))?
    }

    /// Resolve a room code to the room's record and actor.
    pub async fn lookup_room(&self, code: &RoomCode) -> Result<RoomEntry, PartyError> {
        let (tx, rx) = oneshot::channel();
        self.send(ControllerMessage::LookupRoom {
            code: code.clone(),
            respond_to: tx,
        })
        .await?;

        rx.await
            .map_err(|e| PartyError::Internal(format!("response receive failed: {e}")))?
    }

    /// Remove a room (called when its last member leaves).
    pub async fn remove_room(&self, code: &RoomCode) -> Result<(), PartyError> {
        let (tx, rx) = oneshot::channel();
        self.send(ControllerMessage::RemoveRoom {
            code: code.clone(),
            respond_to: tx,
        })
        .await?;

        rx.await
            .map_err(|e| PartyError::Internal(format!("response receive failed: {e}")))?
    }

    /// Get the current controller status.
    pub async fn get_status(&self) -> Result<ControllerStatus, PartyError> {
        let (tx, rx) = oneshot::channel();
        self.send(ControllerMessage::GetStatus { respond_to: tx })
            .await?;

        rx.await
            .map_err(|e| PartyError::Internal(format!("response receive failed: {e}")))
    }

    /// Initiate graceful shutdown.
    pub async fn shutdown(&self) -> Result<(), PartyError> {
        let (tx, rx) = oneshot::channel();
        self.send(ControllerMessage::Shutdown { respond_to: tx })
            .await?;

        rx.await
            .map_err(|e| PartyError::Internal(format!("response receive failed: {e}")))?
    }

    /// Check a candidate password for a room.
    ///
    /// Public rooms accept any candidate.
    pub async fn verify_password(&self, code: &RoomCode, candidate: String) -> Result<bool, PartyError> {
        let entry = self.lookup_room(code).await?;
        let Some(hash) = entry.room.password_hash() else {
            return Ok(true);
        };

        tokio::task::spawn_blocking(move || verify_password(&candidate, Some(hash.as_ref())))
            .await
            .map_err(|e| PartyError::Internal(format!("password verification task failed: {e}")))?
    }

    /// Whether `token` is the host token minted for `room`.
    #[must_use]
    pub fn verify_host_token(&self, room: &Room, token: &str) -> bool {
        self.issuer
            .verify(room.code.as_str(), room.host_nonce(), token)
    }

    async fn send(&self, message: ControllerMessage) -> Result<(), PartyError> {
        self.mailbox.record_enqueue();
        if let Err(e) = self.sender.send(message).await {
            self.mailbox.record_send_failed();
            return Err(PartyError::Internal(format!("channel send failed: {e}")));
        }
        Ok(())
    }

    /// Cancel the actor (for immediate shutdown).
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Get a child token for spawning child actors.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }
}

/// Internal state for a managed room.
struct ManagedRoom {
    room: Room,
    handle: RoomActorHandle,
    /// Join handle for monitoring the actor task.
    task_handle: JoinHandle<()>,
}

/// The `RoomControllerActor` implementation.
pub struct RoomControllerActor {
    instance_id: String,
    receiver: mpsc::Receiver<ControllerMessage>,
    /// Cancellation token (root).
    cancel_token: CancellationToken,
    rooms: HashMap<RoomCode, ManagedRoom>,
    accepting_new: bool,
    max_rooms: usize,
    countdown_tick: Duration,
    metrics: Arc<ActorMetrics>,
    mailbox: Arc<MailboxMonitor>,
    issuer: Arc<HostTokenIssuer>,
}

impl RoomControllerActor {
    fn new(
        config: &Config,
        receiver: mpsc::Receiver<ControllerMessage>,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
        mailbox: Arc<MailboxMonitor>,
        issuer: Arc<HostTokenIssuer>,
    ) -> Self {
        Self {
            instance_id: config.instance_id.clone(),
            receiver,
            cancel_token,
            rooms: HashMap::new(),
            accepting_new: true,
            max_rooms: config.max_rooms,
            countdown_tick: config.countdown_tick,
            metrics,
            mailbox,
            issuer,
        }
    }

    #[instrument(skip_all, name = "wm.actor.controller", fields(instance_id = %self.instance_id))]
    async fn run(mut self) {
        info!(
            target: "wm.actor.controller",
            instance_id = %self.instance_id,
            max_rooms = self.max_rooms,
            "RoomControllerActor started"
        );

        loop {
            self.check_room_health().await;

            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "wm.actor.controller",
                        instance_id = %self.instance_id,
                        "RoomControllerActor received cancellation signal"
                    );
                    self.graceful_shutdown().await;
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_dequeue();
                            self.handle_message(message);
                            self.metrics.record_message_processed();
                        }
                        None => {
                            info!(
                                target: "wm.actor.controller",
                                instance_id = %self.instance_id,
                                "RoomControllerActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "wm.actor.controller",
            instance_id = %self.instance_id,
            rooms_remaining = self.rooms.len(),
            messages_processed = self.mailbox.messages_processed(),
            "RoomControllerActor stopped"
        );
    }

    fn handle_message(&mut self, message: ControllerMessage) {
        match message {
            ControllerMessage::CreateRoom {
                is_private,
                password_hash,
                respond_to,
            } => {
                let result = self.create_room(is_private, password_hash);
                let _ = respond_to.send(result);
            }

            ControllerMessage::LookupRoom { code, respond_to } => {
                let result = self.lookup_room(&code);
                let _ = respond_to.send(result);
            }

            ControllerMessage::RemoveRoom { code, respond_to } => {
                let result = self.remove_room(&code);
                let _ = respond_to.send(result);
            }

            ControllerMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(self.get_status());
            }

            ControllerMessage::Shutdown { respond_to } => {
                let _ = respond_to.send(self.initiate_shutdown());
            }
        }
    }

    fn create_room(
        &mut self,
        is_private: bool,
        password_hash: Option<String>,
    ) -> Result<CreatedRoom, PartyError> {
        let started = Instant::now();

        if !self.accepting_new {
            return Err(PartyError::Draining);
        }

        if self.rooms.len() >= self.max_rooms {
            warn!(
                target: "wm.actor.controller",
                instance_id = %self.instance_id,
                max_rooms = self.max_rooms,
                "Room capacity reached"
            );
            return Err(PartyError::CapacityExceeded);
        }

        let code = self.allocate_code()?;
        let (host_token, host_nonce) = self.issuer.issue(code.as_str())?;
        let room = Room::new(code.clone(), is_private, password_hash, host_nonce);

        let (handle, task_handle) = RoomActor::spawn(
            code.clone(),
            self.cancel_token.child_token(),
            Arc::clone(&self.metrics),
            self.countdown_tick,
        );

        self.rooms.insert(
            code.clone(),
            ManagedRoom {
                room: room.clone(),
                handle,
                task_handle,
            },
        );

        self.metrics.room_created();
        prom::record_room_created();
        prom::record_room_create_duration(started.elapsed());

        info!(
            target: "wm.actor.controller",
            instance_id = %self.instance_id,
            room_code = %code,
            is_private,
            total_rooms = self.rooms.len(),
            "Room created"
        );

        Ok(CreatedRoom { room, host_token })
    }

    fn allocate_code(&self) -> Result<RoomCode, PartyError> {
        for attempt in 1..=MAX_CODE_ATTEMPTS {
            let code = RoomCode::generate()?;
            if !self.rooms.contains_key(&code) {
                return Ok(code);
            }
            debug!(
                target: "wm.actor.controller",
                instance_id = %self.instance_id,
                attempt,
                "Room code collision, retrying"
            );
        }

        error!(
            target: "wm.actor.controller",
            instance_id = %self.instance_id,
            attempts = MAX_CODE_ATTEMPTS,
            "Failed to allocate a unique room code"
        );
        Err(PartyError::Internal(
            "Failed to allocate a unique room code".to_string(),
        ))
    }

    fn lookup_room(&self, code: &RoomCode) -> Result<RoomEntry, PartyError> {
        self.rooms
            .get(code)
            .map(|managed| RoomEntry {
                room: managed.room.clone(),
                handle: managed.handle.clone(),
            })
            .ok_or(PartyError::RoomNotFound)
    }

    /// Remove a room.
    ///
    /// Does not block waiting for the room task; cleanup is spawned in the
    /// background so the registry keeps serving.
    fn remove_room(&mut self, code: &RoomCode) -> Result<(), PartyError> {
        let managed = self.rooms.remove(code).ok_or(PartyError::RoomNotFound)?;

        managed.handle.cancel();

        let room_code = code.clone();
        let instance_id = self.instance_id.clone();
        tokio::spawn(async move {
            match tokio::time::timeout(ROOM_REAP_TIMEOUT, managed.task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "wm.actor.controller",
                        instance_id = %instance_id,
                        room_code = %room_code,
                        "Room actor task completed cleanly"
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "wm.actor.controller",
                        instance_id = %instance_id,
                        room_code = %room_code,
                        error = ?e,
                        "Room actor task panicked during removal"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "wm.actor.controller",
                        instance_id = %instance_id,
                        room_code = %room_code,
                        "Room actor task cleanup timed out"
                    );
                }
            }
        });

        self.metrics.room_removed();

        info!(
            target: "wm.actor.controller",
            instance_id = %self.instance_id,
            room_code = %code,
            total_rooms = self.rooms.len(),
            "Room removed"
        );

        Ok(())
    }

    fn get_status(&self) -> ControllerStatus {
        ControllerStatus {
            room_count: self.rooms.len(),
            connection_count: self.metrics.connection_count(),
            is_draining: !self.accepting_new,
            mailbox_depth: self.mailbox.current_depth(),
        }
    }

    fn initiate_shutdown(&mut self) -> Result<(), PartyError> {
        info!(
            target: "wm.actor.controller",
            instance_id = %self.instance_id,
            room_count = self.rooms.len(),
            "Initiating graceful shutdown"
        );

        self.accepting_new = false;
        self.cancel_token.cancel();

        Ok(())
    }

    async fn graceful_shutdown(&mut self) {
        info!(
            target: "wm.actor.controller",
            instance_id = %self.instance_id,
            room_count = self.rooms.len(),
            "Performing graceful shutdown"
        );

        self.accepting_new = false;

        for managed in self.rooms.values() {
            managed.handle.cancel();
        }

        for (code, managed) in self.rooms.drain() {
            match tokio::time::timeout(SHUTDOWN_ROOM_TIMEOUT, managed.task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "wm.actor.controller",
                        instance_id = %self.instance_id,
                        room_code = %code,
                        "Room actor completed cleanly"
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "wm.actor.controller",
                        instance_id = %self.instance_id,
                        room_code = %code,
                        error = ?e,
                        "Room actor task panicked during shutdown"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "wm.actor.controller",
                        instance_id = %self.instance_id,
                        room_code = %code,
                        "Room actor shutdown timed out"
                    );
                }
            }
            self.metrics.room_removed();
        }

        info!(
            target: "wm.actor.controller",
            instance_id = %self.instance_id,
            "Graceful shutdown complete"
        );
    }

    /// Drop rooms whose actor task has ended on its own.
    async fn check_room_health(&mut self) {
        let finished: Vec<RoomCode> = self
            .rooms
            .iter()
            .filter(|(_, managed)| managed.task_handle.is_finished())
            .map(|(code, _)| code.clone())
            .collect();

        for code in finished {
            let Some(managed) = self.rooms.remove(&code) else {
                continue;
            };

            match managed.task_handle.await {
                Ok(()) => {
                    warn!(
                        target: "wm.actor.controller",
                        instance_id = %self.instance_id,
                        room_code = %code,
                        "Room actor exited unexpectedly"
                    );
                }
                Err(join_error) => {
                    if join_error.is_panic() {
                        error!(
                            target: "wm.actor.controller",
                            instance_id = %self.instance_id,
                            room_code = %code,
                            error = ?join_error,
                            "Room actor panicked"
                        );
                        self.metrics.record_panic(ActorType::Room);
                    }
                }
            }

            self.metrics.room_removed();
        }
    }
}
