use std::time::Duration;

use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink, stream::SplitStream};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::errors::{BoardError, Result};

use super::api::SharedState;
use super::dispatch::Broadcaster;

/// Ping cadence and the silence after which a peer counts as dead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Keepalive {
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
}

impl Default for Keepalive {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsQuery {
    pub project_id: Option<String>,
}

/// Relay target of an inbound client message.
struct Relay<'a> {
    broadcaster: &'a Broadcaster,
    project_id: &'a str,
}

impl Relay<'_> {
    fn forward(&self, raw: &str) {
        self.broadcaster.relay(self.project_id, raw);
    }
}

// ── WebSocket handler ────────────────────────────────────────────────

/// `GET /ws?projectId=<id>`. Without a known project the socket is accepted
/// and parked: it never receives events and its messages are dropped, but
/// it still closes on shutdown.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<SharedState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, query.project_id))
}

async fn handle_socket(socket: WebSocket, state: SharedState, project_id: Option<String>) {
    let (sender, receiver) = socket.split();
    let keepalive = state.keepalive;

    let (handle, rx) = state.registry.open_connection();

    let Some(project_id) = resolve_project(&state, project_id).await else {
        let parked = state.registry.park(handle);
        if let Err(e) = run_socket_loop(sender, receiver, Some(rx), None, keepalive).await {
            debug!(connection_id = parked.connection_id(), error = %e, "Idle WebSocket ended");
        }
        return;
    };

    let subscription = state.registry.attach(&project_id, handle);
    info!(
        project_id = %project_id,
        connection_id = subscription.connection_id(),
        "WebSocket connected"
    );

    let relay = Relay {
        broadcaster: state.service.broadcaster(),
        project_id: &project_id,
    };
    let outcome = run_socket_loop(sender, receiver, Some(rx), Some(relay), keepalive).await;

    match outcome {
        Ok(()) => info!(
            project_id = %project_id,
            connection_id = subscription.connection_id(),
            "WebSocket disconnected"
        ),
        Err(e) => info!(
            project_id = %project_id,
            connection_id = subscription.connection_id(),
            error = %e,
            "WebSocket dropped"
        ),
    }
}

async fn resolve_project(state: &SharedState, project_id: Option<String>) -> Option<String> {
    let Some(project_id) = project_id.filter(|id| !id.trim().is_empty()) else {
        debug!("WebSocket opened without projectId");
        return None;
    };
    let lookup = project_id.clone();
    match state
        .service
        .db()
        .call(move |db| db.get_project(&lookup))
        .await
    {
        Ok(Some(_)) => Some(project_id),
        Ok(None) => {
            debug!(project_id = %project_id, "WebSocket opened for unknown project");
            None
        }
        Err(e) => {
            warn!(project_id = %project_id, error = %e, "Failed to look up WebSocket project");
            None
        }
    }
}

/// Core WebSocket loop with ping/pong keepalive.
///
/// Forwards queued events, relays client frames and pings the peer. It exits
/// cleanly on a close frame or when the outbound queue closes, and with a
/// transport error on a failed send or receive or a missed pong.
async fn run_socket_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut outbound: Option<mpsc::UnboundedReceiver<String>>,
    relay: Option<Relay<'_>>,
    keepalive: Keepalive,
) -> Result<()> {
    let mut ping_interval = tokio::time::interval(keepalive.ping_interval);
    // The first tick completes immediately.
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    let outcome = loop {
        tokio::select! {
            // ── Periodic ping ───────────────────────────────────────
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > keepalive.pong_timeout {
                    break Err(BoardError::Transport("pong timeout".to_string()));
                }
                if let Err(e) = sender.send(Message::Ping(Default::default())).await {
                    break Err(e.into());
                }
                awaiting_pong = true;
            }

            // ── Event forwarding ────────────────────────────────────
            queued = next_outbound(&mut outbound) => {
                match queued {
                    Some(text) => {
                        if let Err(e) = sender.send(Message::Text(text.into())).await {
                            break Err(e.into());
                        }
                    }
                    // Unsubscribed or the registry was cleared.
                    None => break Ok(()),
                }
            }

            // ── Client messages ─────────────────────────────────────
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Text(text))) => {
                        if let Some(relay) = &relay {
                            relay.forward(text.as_str());
                        }
                    }
                    Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                        Ok(text) => {
                            if let Some(relay) = &relay {
                                relay.forward(text);
                            }
                        }
                        Err(_) => debug!(len = bytes.len(), "Dropping non-UTF-8 binary frame"),
                    },
                    Some(Ok(Message::Close(_))) | None => break Ok(()),
                    Some(Ok(Message::Ping(_))) => {}
                    Some(Err(e)) => break Err(e.into()),
                }
            }
        }
    };

    let _ = sender.send(Message::Close(None)).await;
    outcome
}

/// Next queued frame; never resolves for a connection with no queue.
async fn next_outbound(outbound: &mut Option<mpsc::UnboundedReceiver<String>>) -> Option<String> {
    match outbound {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
