//! `ConnectionActor` - per-WebSocket writer.
//!
//! Each `ConnectionActor` owns the write half of exactly one WebSocket and
//! serializes every outbound [`ServerEvent`] to a JSON text frame. Rooms fan
//! out through [`ConnectionActorHandle::send_event`], which never waits: when
//! the mailbox is full the event is dropped for this connection only.
//!
//! # Lifecycle
//!
//! 1. Spawned by the socket handler right after the upgrade
//! 2. Runs until `Close`, cancellation, a write error, or every handle drops
//! 3. Cancellation via a child of the controller's root token

use super::messages::ConnectionMessage;
use super::metrics::{ActorType, MailboxMonitor};

use crate::observability::metrics as prom;
use crate::protocol::ServerEvent;

use axum::extract::ws::{CloseFrame, Message};
use futures::{Sink, SinkExt};
use std::borrow::Cow;
use std::fmt::Display;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// Connection mailbox capacity.
const CONNECTION_CHANNEL_BUFFER: usize = 200;

/// WebSocket close code for a normal shutdown.
const CLOSE_NORMAL: u16 = 1000;

/// WebSocket close code sent when the server is going away.
const CLOSE_GOING_AWAY: u16 = 1001;

/// Handle to a `ConnectionActor`.
#[derive(Clone, Debug)]
pub struct ConnectionActorHandle {
    sender: mpsc::Sender<ConnectionMessage>,
    cancel_token: CancellationToken,
    connection_id: String,
    mailbox: Arc<MailboxMonitor>,
}

impl ConnectionActorHandle {
    #[must_use]
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Queue an event for this connection without waiting.
    ///
    /// Returns `false` if the event was dropped (mailbox full or actor gone).
    pub fn send_event(&self, event: ServerEvent) -> bool {
        self.mailbox.record_enqueue();
        match self.sender.try_send(ConnectionMessage::Event(event)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.mailbox.record_send_failed();
                self.mailbox.record_drop();
                prom::record_event_rejected("backpressure");
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.mailbox.record_send_failed();
                debug!(
                    target: "wm.actor.connection",
                    connection_id = %self.connection_id,
                    "Dropping event for closed connection"
                );
                false
            }
        }
    }

    /// Ask the actor to send a close frame and stop.
    pub fn close(&self, reason: impl Into<String>) {
        if self
            .sender
            .try_send(ConnectionMessage::Close {
                reason: reason.into(),
            })
            .is_err()
        {
            // Mailbox full or gone: cancellation still stops the writer.
            self.cancel_token.cancel();
        }
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Events dropped for this connection due to backpressure.
    #[must_use]
    pub fn dropped_events(&self) -> u64 {
        self.mailbox.messages_dropped()
    }

    /// Build a handle backed by a bare channel instead of a socket.
    #[cfg(test)]
    pub(crate) fn for_test(
        connection_id: &str,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<ConnectionMessage>) {
        let (sender, receiver) = mpsc::channel(capacity);
        let handle = Self {
            sender,
            cancel_token: CancellationToken::new(),
            connection_id: connection_id.to_string(),
            mailbox: Arc::new(MailboxMonitor::new(ActorType::Connection, connection_id)),
        };
        (handle, receiver)
    }
}

/// The `ConnectionActor` implementation, generic over the socket's write half.
pub struct ConnectionActor<S> {
    connection_id: String,
    sink: S,
    receiver: mpsc::Receiver<ConnectionMessage>,
    cancel_token: CancellationToken,
    mailbox: Arc<MailboxMonitor>,
}

impl<S> ConnectionActor<S>
where
    S: Sink<Message> + Unpin + Send + 'static,
    S::Error: Display,
{
    /// Spawn a connection actor writing to `sink`.
    pub fn spawn(
        connection_id: String,
        sink: S,
        cancel_token: CancellationToken,
    ) -> (ConnectionActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(CONNECTION_CHANNEL_BUFFER);
        let mailbox = Arc::new(MailboxMonitor::new(ActorType::Connection, &connection_id));

        let actor = Self {
            connection_id: connection_id.clone(),
            sink,
            receiver,
            cancel_token: cancel_token.clone(),
            mailbox: Arc::clone(&mailbox),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = ConnectionActorHandle {
            sender,
            cancel_token,
            connection_id,
            mailbox,
        };

        (handle, task_handle)
    }

    #[instrument(
        skip_all,
        name = "wm.actor.connection",
        fields(connection_id = %self.connection_id)
    )]
    async fn run(mut self) {
        debug!(
            target: "wm.actor.connection",
            connection_id = %self.connection_id,
            "ConnectionActor started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    self.write_close(CLOSE_GOING_AWAY, "server shutting down").await;
                    break;
                }

                msg = self.receiver.recv() => {
                    let Some(message) = msg else {
                        break;
                    };
                    self.mailbox.record_dequeue();

                    match message {
                        ConnectionMessage::Event(event) => {
                            if !self.write_event(&event).await {
                                break;
                            }
                        }
                        ConnectionMessage::Close { reason } => {
                            self.write_close(CLOSE_NORMAL, &reason).await;
                            break;
                        }
                    }
                }
            }
        }

        debug!(
            target: "wm.actor.connection",
            connection_id = %self.connection_id,
            messages_processed = self.mailbox.messages_processed(),
            messages_dropped = self.mailbox.messages_dropped(),
            "ConnectionActor stopped"
        );
    }

    /// Returns false if the socket is no longer writable.
    async fn write_event(&mut self, event: &ServerEvent) -> bool {
        let text = match serde_json::to_string(event) {
            Ok(text) => text,
            Err(e) => {
                warn!(
                    target: "wm.actor.connection",
                    connection_id = %self.connection_id,
                    event_type = event.event_type(),
                    error = %e,
                    "Failed to serialize event"
                );
                return true;
            }
        };

        if let Err(e) = self.sink.send(Message::Text(text)).await {
            debug!(
                target: "wm.actor.connection",
                connection_id = %self.connection_id,
                error = %e,
                "Socket write failed"
            );
            return false;
        }
        true
    }

    async fn write_close(&mut self, code: u16, reason: &str) {
        let frame = CloseFrame {
            code,
            reason: Cow::Owned(reason.to_string()),
        };
        if let Err(e) = self.sink.send(Message::Close(Some(frame))).await {
            debug!(
                target: "wm.actor.connection",
                connection_id = %self.connection_id,
                error = %e,
                "Failed to send close frame"
            );
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use futures::channel::mpsc as fmpsc;
    use futures::StreamExt;

    fn spawn_with_channel_sink() -> (
        ConnectionActorHandle,
        JoinHandle<()>,
        fmpsc::UnboundedReceiver<Message>,
    ) {
        let (sink, stream) = fmpsc::unbounded::<Message>();
        let (handle, task) =
            ConnectionActor::spawn("conn-1".to_string(), sink, CancellationToken::new());
        (handle, task, stream)
    }

    #[tokio::test]
    async fn test_events_are_written_as_json_text() {
        let (handle, _task, mut frames) = spawn_with_channel_sink();

        assert!(handle.send_event(ServerEvent::Countdown { value: 3 }));

        let frame = frames.next().await.unwrap();
        let Message::Text(text) = frame else {
            panic!("expected text frame, got {frame:?}");
        };
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "countdown");
        assert_eq!(value["value"], 3);
    }

    #[tokio::test]
    async fn test_events_preserve_order() {
        let (handle, _task, mut frames) = spawn_with_channel_sink();

        for value in [3, 2, 1, 0] {
            assert!(handle.send_event(ServerEvent::Countdown { value }));
        }

        for expected in [3, 2, 1, 0] {
            let Some(Message::Text(text)) = frames.next().await else {
                panic!("expected text frame");
            };
            let event: ServerEvent = serde_json::from_str(&text).unwrap();
            assert_eq!(event, ServerEvent::Countdown { value: expected });
        }
    }

    #[tokio::test]
    async fn test_close_sends_close_frame_and_stops() {
        let (handle, task, mut frames) = spawn_with_channel_sink();

        handle.close("bye");
        task.await.unwrap();

        let frame = frames.next().await.unwrap();
        assert!(matches!(frame, Message::Close(Some(ref f)) if f.code == CLOSE_NORMAL));
    }

    #[tokio::test]
    async fn test_cancel_stops_actor() {
        let (handle, task, mut frames) = spawn_with_channel_sink();

        handle.cancel();
        task.await.unwrap();

        let frame = frames.next().await.unwrap();
        assert!(matches!(frame, Message::Close(Some(ref f)) if f.code == CLOSE_GOING_AWAY));
    }

    #[tokio::test]
    async fn test_send_event_drops_when_mailbox_full() {
        let (handle, _receiver) = ConnectionActorHandle::for_test("conn-slow", 1);

        assert!(handle.send_event(ServerEvent::Countdown { value: 3 }));
        assert!(!handle.send_event(ServerEvent::Countdown { value: 2 }));
        assert_eq!(handle.dropped_events(), 1);
        // Only the queued event counts toward depth.
        assert_eq!(handle.mailbox.current_depth(), 1);
    }

    #[tokio::test]
    async fn test_send_event_after_actor_exit_is_dropped() {
        let (handle, task, _frames) = spawn_with_channel_sink();

        handle.cancel();
        task.await.unwrap();

        assert!(!handle.send_event(ServerEvent::Countdown { value: 1 }));
    }
}
