//! Push source connection tasks
//!
//! Each push source owns one spawned task that connects, feeds frames
//! through the source's field mappings and reconnects with a fixed
//! backoff. The task publishes its state through [`PushShared`]; nothing
//! in the evaluation tick ever awaits a socket.
//!
//! Socket.IO support is the v4 wire protocol over the Engine.IO
//! websocket transport: open packet `0`, namespace connect `40`, ping
//! `2` answered with pong `3`, events as `42["event",payload]`.

use crate::sources::apply_mappings;
use crate::types::{ConnectionState, DataSource, SourceKind};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use summit_vars::VarStore;
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const MIN_RECONNECT_MS: u64 = 100;

/// State a push task shares with the source table.
pub(crate) struct PushShared {
    state: Mutex<ConnectionState>,
    pub frames_received: AtomicU64,
    pub last_update_ms: AtomicI64,
    stop_signal: Notify,
    stopped: AtomicBool,
}

impl PushShared {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ConnectionState::Idle),
            frames_received: AtomicU64::new(0),
            last_update_ms: AtomicI64::new(0),
            stop_signal: Notify::new(),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
    }

    /// Ask the task to exit. Idempotent.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.stop_signal.notify_waiters();
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    async fn wait_stop(&self) {
        if self.is_stopped() {
            return;
        }
        self.stop_signal.notified().await;
    }

    fn record_frame(&self, now_ms: i64) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        self.last_update_ms.store(now_ms, Ordering::Relaxed);
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Spawn the connect/read/reconnect loop for a push source.
pub(crate) fn spawn_push_task(
    config: DataSource,
    vars: Arc<VarStore>,
    shared: Arc<PushShared>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let backoff = Duration::from_millis(config.reconnect_ms.max(MIN_RECONNECT_MS));
        loop {
            if shared.is_stopped() {
                break;
            }
            shared.set_state(ConnectionState::Connecting);
            match connect_async(config.endpoint.as_str()).await {
                Ok((stream, _)) => {
                    info!(source_id = %config.id, endpoint = %config.endpoint, "push source connected");
                    shared.set_state(ConnectionState::Connected);
                    match config.kind {
                        SourceKind::SocketioPush => {
                            run_socketio(stream, &config, &vars, &shared).await;
                        },
                        _ => {
                            run_websocket(stream, &config, &vars, &shared).await;
                        },
                    }
                },
                Err(err) => {
                    warn!(source_id = %config.id, error = %err, "push connect failed");
                    shared.set_state(ConnectionState::Error);
                },
            }
            if shared.is_stopped() {
                break;
            }
            shared.set_state(ConnectionState::Reconnecting);
            tokio::select! {
                _ = shared.wait_stop() => break,
                // fixed backoff; exponential growth would delay recovery
                // of a briefly unreachable endpoint for no benefit here
                _ = tokio::time::sleep(backoff) => {},
            }
        }
        shared.set_state(ConnectionState::Disconnected);
        debug!(source_id = %config.id, "push task stopped");
    })
}

fn handle_payload(config: &DataSource, vars: &VarStore, shared: &PushShared, payload: &serde_json::Value) {
    let now = now_ms();
    shared.record_frame(now);
    apply_mappings(vars, &config.id, &config.mappings, payload, now);
}

/// Plain WebSocket: every text frame is one JSON payload.
async fn run_websocket(mut ws: WsStream, config: &DataSource, vars: &VarStore, shared: &PushShared) {
    loop {
        tokio::select! {
            _ = shared.wait_stop() => {
                let _ = ws.close(None).await;
                return;
            },
            msg = ws.next() => match msg {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<serde_json::Value>(&text) {
                    Ok(payload) => handle_payload(config, vars, shared, &payload),
                    Err(err) => {
                        debug!(source_id = %config.id, error = %err, "non-JSON frame ignored");
                    },
                },
                Some(Ok(Message::Ping(data))) => {
                    let _ = ws.send(Message::Pong(data)).await;
                },
                Some(Ok(Message::Close(_))) | None => {
                    warn!(source_id = %config.id, "websocket closed by peer");
                    return;
                },
                Some(Ok(_)) => {},
                Some(Err(err)) => {
                    warn!(source_id = %config.id, error = %err, "websocket read error");
                    return;
                },
            },
        }
    }
}

/// Socket.IO v4 over the websocket transport.
async fn run_socketio(mut ws: WsStream, config: &DataSource, vars: &VarStore, shared: &PushShared) {
    loop {
        tokio::select! {
            _ = shared.wait_stop() => {
                let _ = ws.close(None).await;
                return;
            },
            msg = ws.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if !handle_socketio_packet(&mut ws, config, vars, shared, &text).await {
                        return;
                    }
                },
                Some(Ok(Message::Ping(data))) => {
                    let _ = ws.send(Message::Pong(data)).await;
                },
                Some(Ok(Message::Close(_))) | None => {
                    warn!(source_id = %config.id, "socket.io transport closed");
                    return;
                },
                Some(Ok(_)) => {},
                Some(Err(err)) => {
                    warn!(source_id = %config.id, error = %err, "socket.io read error");
                    return;
                },
            },
        }
    }
}

/// Returns false when the session must end.
async fn handle_socketio_packet(
    ws: &mut WsStream,
    config: &DataSource,
    vars: &VarStore,
    shared: &PushShared,
    packet: &str,
) -> bool {
    if let Some(event_body) = packet.strip_prefix("42") {
        // `42["event", payload]`, optionally with a leading ack id we
        // do not use
        let body = event_body.trim_start_matches(|c: char| c.is_ascii_digit());
        match serde_json::from_str::<serde_json::Value>(body) {
            Ok(serde_json::Value::Array(items)) if items.len() >= 2 => {
                let event = items[0].as_str().unwrap_or_default();
                let accept = config
                    .event
                    .as_deref()
                    .map(|wanted| wanted == event)
                    .unwrap_or(true);
                if accept {
                    handle_payload(config, vars, shared, &items[1]);
                } else {
                    debug!(source_id = %config.id, event, "event filtered out");
                }
            },
            _ => debug!(source_id = %config.id, "malformed socket.io event ignored"),
        }
        return true;
    }
    match packet {
        // Engine.IO open: join the default namespace
        p if p.starts_with('0') => ws.send(Message::Text("40".to_string())).await.is_ok(),
        // Engine.IO ping -> pong
        "2" => ws.send(Message::Text("3".to_string())).await.is_ok(),
        // namespace connect ack
        p if p.starts_with("40") => true,
        // server-initiated namespace disconnect
        p if p.starts_with("41") => {
            warn!(source_id = %config.id, "socket.io namespace disconnected");
            false
        },
        _ => {
            debug!(source_id = %config.id, packet, "unhandled socket.io packet");
            true
        },
    }
}
