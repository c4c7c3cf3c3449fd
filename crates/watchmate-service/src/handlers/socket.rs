//! WebSocket endpoint.
//!
//! `GET /ws` upgrades to a WebSocket carrying the JSON event protocol. Each
//! socket is split: the write half goes to a `ConnectionActor`, and the read
//! half is driven here, one frame at a time, through the
//! [`ConnectionLifecycle`](crate::lifecycle::ConnectionLifecycle).
//!
//! Bad frames and refused requests are answered with an `error` event; they
//! never close the socket.

use crate::actors::ConnectionActor;
use crate::errors::PartyError;
use crate::lifecycle::ConnectionSession;
use crate::observability::metrics as prom;
use crate::protocol::{ClientEvent, ServerEvent};
use crate::routes::AppState;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// How long the writer gets to flush after the read side closed.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Handler for GET /ws
pub async fn ws_upgrade(State(state): State<Arc<AppState>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

#[instrument(skip_all, name = "wm.socket", fields(connection_id = tracing::field::Empty))]
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let connection_id = Uuid::new_v4().to_string();
    tracing::Span::current().record("connection_id", connection_id.as_str());

    let (sink, mut stream) = socket.split();
    let cancel_token = state.controller.child_token();
    let (connection, writer_task) =
        ConnectionActor::spawn(connection_id.clone(), sink, cancel_token.clone());

    state.actor_metrics.connection_opened();
    info!(
        target: "wm.handlers.socket",
        connection_id = %connection_id,
        "WebSocket connected"
    );

    let mut session = ConnectionSession::new(connection.clone());

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => break,

            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        handle_frame(&state, &mut session, &text).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    // Binary frames carry nothing in this protocol; pings are
                    // answered by axum.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(
                            target: "wm.handlers.socket",
                            connection_id = %connection_id,
                            error = %e,
                            "WebSocket read failed"
                        );
                        break;
                    }
                }
            }
        }
    }

    state.lifecycle.disconnect(session).await;

    connection.close("connection closed");
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer_task).await.is_err() {
        connection.cancel();
    }
    state.actor_metrics.connection_closed();

    info!(
        target: "wm.handlers.socket",
        connection_id = %connection_id,
        dropped_events = connection.dropped_events(),
        "WebSocket disconnected"
    );
}

async fn handle_frame(state: &AppState, session: &mut ConnectionSession, text: &str) {
    let event = match serde_json::from_str::<ClientEvent>(text) {
        Ok(event) => event,
        Err(e) => {
            debug!(
                target: "wm.handlers.socket",
                connection_id = %session.connection_id(),
                error = %e,
                "Unparseable client frame"
            );
            reject(session, &PartyError::Validation("Malformed event".to_string()));
            return;
        }
    };

    let event = match event.normalize() {
        Ok(event) => event,
        Err(e) => {
            reject(session, &e);
            return;
        }
    };

    let event_type = event.event_type();
    if let Err(e) = state.lifecycle.handle_event(session, event).await {
        debug!(
            target: "wm.handlers.socket",
            connection_id = %session.connection_id(),
            event_type,
            error = %e,
            "Client event refused"
        );
        reject(session, &e);
    }
}

fn reject(session: &ConnectionSession, error: &PartyError) {
    prom::record_event_rejected(error.metric_label());
    session
        .connection()
        .send_event(ServerEvent::from_error(error));
}
