//! Duplex WebSocket transport: frames the wire envelope from §6 as JSON
//! text frames over axum's WebSocket upgrade, the way the teacher's
//! `infrastructure/mcp/http_server.rs` wires a `Router` + `with_state`
//! handler directly onto the service layer beneath it.

use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use chrono::Utc;
use conclave::domain::error::ErrorKind;
use conclave::domain::models::message::{MessagePayload, WireBody, WireEnvelope, WireKind};
use conclave::domain::models::session::SessionId;
use conclave::domain::models::task::TaskId;
use conclave::services::message_bus::MessageBus;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::state::{AppState, GatewaySessionLayer};

pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<WireEnvelope>(256);

    let writer = tokio::spawn(async move {
        while let Some(envelope) = out_rx.recv().await {
            let Ok(text) = serde_json::to_string(&envelope) else {
                continue;
            };
            if sink.send(WsMessage::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let mut session_id: Option<SessionId> = None;

    while let Some(Ok(msg)) = stream.next().await {
        let WsMessage::Text(text) = msg else { continue };
        let Ok(envelope) = serde_json::from_str::<WireEnvelope>(&text) else {
            send_unbound_error(&out_tx, "malformed envelope").await;
            continue;
        };

        match envelope.payload {
            WireBody::Auth { credential } => {
                match state
                    .sessions
                    .connect_or_resume(envelope.session_id, &credential, Utc::now())
                    .await
                {
                    Ok((id, replay)) => {
                        session_id = Some(id);
                        send(&out_tx, &state.sessions, id, None, WireKind::AuthAck, WireBody::Empty).await;
                        for frame in replay {
                            if out_tx.send(frame).await.is_err() {
                                warn!("dropped replay frame, socket writer gone");
                                break;
                            }
                        }
                    }
                    Err(_) => send_unbound_error(&out_tx, "authentication rejected").await,
                }
            }
            WireBody::Submit { task_type, payload, priority, deadline_ms } => {
                let Some(sid) = session_id else {
                    send_unbound_error(&out_tx, "not authenticated").await;
                    continue;
                };
                let deadline = deadline_ms.map(|ms| Utc::now() + chrono::Duration::milliseconds(ms as i64));
                match state
                    .orchestrator
                    .submit_task(sid, sid.to_string(), &task_type, payload, priority, deadline, Utc::now())
                    .await
                {
                    Ok(task_id) => {
                        send(&out_tx, &state.sessions, sid, Some(task_id), WireKind::Submitted, WireBody::Empty).await;
                        spawn_result_forwarder(Arc::clone(&state.bus), Arc::clone(&state.sessions), sid, task_id, out_tx.clone());
                    }
                    Err(e) => {
                        send(
                            &out_tx,
                            &state.sessions,
                            sid,
                            None,
                            WireKind::Error,
                            WireBody::Error { kind: e.clone().into(), message: e.to_string() },
                        )
                        .await;
                    }
                }
            }
            WireBody::Cancel => {
                if let (Some(_sid), Some(task_id)) = (session_id, envelope.task_id) {
                    let _ = state.orchestrator.cancel_task(task_id, Utc::now()).await;
                }
            }
            WireBody::Empty if envelope.kind == WireKind::Ping => {
                if let Some(sid) = session_id {
                    let _ = state.sessions.touch(sid, Utc::now()).await;
                    send(&out_tx, &state.sessions, sid, None, WireKind::Pong, WireBody::Empty).await;
                }
            }
            WireBody::Ack { seq } => {
                if let Some(sid) = session_id {
                    let _ = state.sessions.ack(sid, seq).await;
                }
            }
            _ => send_unbound_error(&out_tx, "unsupported client frame").await,
        }
    }

    if let Some(sid) = session_id {
        info!(session_id = %sid, "websocket closed");
    }
    writer.abort();
}

/// Subscribes to a task's correlation channel and forwards every `Partial`
/// and the terminal `Result` to the client in bus order, per §4.6's
/// per-(session,taskId) outbound ordering guarantee.
fn spawn_result_forwarder(
    bus: Arc<MessageBus>,
    sessions: Arc<GatewaySessionLayer>,
    session_id: SessionId,
    task_id: TaskId,
    out_tx: mpsc::Sender<WireEnvelope>,
) {
    tokio::spawn(async move {
        let mut sub = bus.subscribe_correlation(task_id).await;
        while let Some(message) = sub.receiver.recv().await {
            match message.payload {
                MessagePayload::PartialResult(p) => {
                    send(&out_tx, &sessions, session_id, Some(task_id), WireKind::Partial, WireBody::Partial(p)).await;
                }
                MessagePayload::TaskResult(r) => {
                    send(&out_tx, &sessions, session_id, Some(task_id), WireKind::Result, WireBody::Result(r)).await;
                    break;
                }
                _ => {}
            }
        }
        bus.unsubscribe_correlation(task_id).await;
    });
}

/// Assigns the next monotonic, gap-free `seq` for this session (§8
/// invariant 6) and enqueues the frame for the socket writer.
async fn send(
    out_tx: &mpsc::Sender<WireEnvelope>,
    sessions: &GatewaySessionLayer,
    session_id: SessionId,
    task_id: Option<TaskId>,
    kind: WireKind,
    payload: WireBody,
) {
    let seq = sessions.next_seq(session_id).await.unwrap_or(0);
    let envelope = WireEnvelope {
        kind,
        session_id: Some(session_id),
        task_id,
        seq,
        payload,
    };
    let _ = sessions.record_outbound(session_id, envelope.clone()).await;
    if out_tx.send(envelope).await.is_err() {
        warn!("dropped outbound frame, socket writer gone");
    }
}

/// Sends an `Error` frame for a fault that occurred before (or without) an
/// established session, so there is no session to attach a `seq` to.
async fn send_unbound_error(out_tx: &mpsc::Sender<WireEnvelope>, message: &str) {
    let envelope = WireEnvelope {
        kind: WireKind::Error,
        session_id: None,
        task_id: None,
        seq: 0,
        payload: WireBody::Error {
            kind: ErrorKind::InvalidRequest(message.to_string()),
            message: message.to_string(),
        },
    };
    let _ = out_tx.send(envelope).await;
}
