//! WebSocket handling

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use hireloop_protocol::{ClientMessage, ServerMessage};

use crate::error::EngineError;
use crate::registry::SessionRegistry;
use crate::room_command::RoomCommand;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Messages that can be sent through the WebSocket
enum OutboundMessage {
    /// JSON-serialized ServerMessage
    Json(ServerMessage),
    /// Raw pong response
    Pong(Bytes),
}

/// What one connection knows about a session it joined: which user it
/// joined as, and the forwarder pumping that room's broadcasts. Both are
/// needed to cleanly undo the join on re-join, leave, or disconnect.
struct SessionMembership {
    user_id: String,
    forwarder: tokio::task::JoinHandle<()>,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(registry): State<Arc<SessionRegistry>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, registry))
}

/// Handle a WebSocket connection
async fn handle_socket(socket: WebSocket, registry: Arc<SessionRegistry>) {
    let conn_id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
    info!(
        component = "websocket",
        event = "ws.connection.opened",
        connection_id = conn_id,
        "WebSocket connection opened"
    );

    let (mut ws_tx, mut ws_rx) = socket.split();

    // Channel for sending messages to this client
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<OutboundMessage>(100);

    // Spawn task to forward messages to WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            let result = match msg {
                OutboundMessage::Json(server_msg) => match serde_json::to_string(&server_msg) {
                    Ok(json) => ws_tx.send(Message::Text(json.into())).await,
                    Err(e) => {
                        error!(
                            component = "websocket",
                            event = "ws.send.serialize_failed",
                            connection_id = conn_id,
                            error = %e,
                            "Failed to serialize server message"
                        );
                        continue;
                    }
                },
                OutboundMessage::Pong(data) => ws_tx.send(Message::Pong(data)).await,
            };

            if result.is_err() {
                debug!(
                    component = "websocket",
                    event = "ws.send.disconnected",
                    connection_id = conn_id,
                    "WebSocket send failed, client disconnected"
                );
                break;
            }
        }
    });

    let client_tx = outbound_tx.clone();

    // Sessions this connection has joined, keyed by session id. Used for
    // the implicit leave when the socket drops.
    let mut joined: HashMap<String, SessionMembership> = HashMap::new();

    // Handle incoming messages
    while let Some(result) = ws_rx.next().await {
        let msg = match result {
            Ok(Message::Text(text)) => text,
            Ok(Message::Ping(data)) => {
                let _ = outbound_tx.send(OutboundMessage::Pong(data)).await;
                continue;
            }
            Ok(Message::Close(_)) => {
                info!(
                    component = "websocket",
                    event = "ws.connection.close_frame",
                    connection_id = conn_id,
                    "Client sent close frame"
                );
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                warn!(
                    component = "websocket",
                    event = "ws.connection.error",
                    connection_id = conn_id,
                    error = %e,
                    "WebSocket error"
                );
                break;
            }
        };

        // Parse client message
        let client_msg: ClientMessage = match serde_json::from_str(&msg) {
            Ok(m) => m,
            Err(e) => {
                warn!(
                    component = "websocket",
                    event = "ws.message.parse_failed",
                    connection_id = conn_id,
                    error = %e,
                    payload_bytes = msg.len(),
                    payload_preview = %truncate_for_log(&msg, 240),
                    "Failed to parse client message"
                );
                send_json(
                    &client_tx,
                    ServerMessage::Error {
                        code: "parse_error".into(),
                        message: e.to_string(),
                        session_id: None,
                    },
                )
                .await;
                continue;
            }
        };

        // Keep this future on the heap so debug builds don't blow worker stack.
        Box::pin(handle_client_message(
            client_msg,
            &client_tx,
            &registry,
            &mut joined,
            conn_id,
        ))
        .await;
    }

    // Disconnect counts as leaving every room this connection was in.
    for (session_id, membership) in joined {
        membership.forwarder.abort();
        registry.leave(&session_id, &membership.user_id).await;
    }

    info!(
        component = "websocket",
        event = "ws.connection.closed",
        connection_id = conn_id,
        "WebSocket connection closed"
    );
    send_task.abort();
}

fn truncate_for_log(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}

/// Send a ServerMessage through the outbound channel
async fn send_json(tx: &mpsc::Sender<OutboundMessage>, msg: ServerMessage) {
    let _ = tx.send(OutboundMessage::Json(msg)).await;
}

async fn send_error(
    tx: &mpsc::Sender<OutboundMessage>,
    session_id: &str,
    err: EngineError,
    conn_id: u64,
) {
    warn!(
        component = "websocket",
        event = "ws.message.rejected",
        connection_id = conn_id,
        session_id = %session_id,
        code = err.code(),
        error = %err,
        "Client message rejected"
    );
    send_json(
        tx,
        ServerMessage::Error {
            code: err.code().to_string(),
            message: err.wire_message(),
            session_id: Some(session_id.to_string()),
        },
    )
    .await;
}

/// Spawn a task that drains a broadcast receiver and forwards messages to an
/// outbound channel. When the outbound channel closes (client disconnects),
/// the task exits and the broadcast::Receiver is dropped — automatic cleanup,
/// no manual unsubscribe needed.
///
/// If the subscriber lags behind the broadcast buffer, a `lagged` error is
/// sent to the client so it can rejoin for a fresh snapshot.
fn spawn_broadcast_forwarder(
    mut rx: tokio::sync::broadcast::Receiver<ServerMessage>,
    outbound_tx: mpsc::Sender<OutboundMessage>,
    session_id: String,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(msg) => {
                    if outbound_tx.send(OutboundMessage::Json(msg)).await.is_err() {
                        break;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!(
                        component = "websocket",
                        event = "ws.broadcast.lagged",
                        session_id = %session_id,
                        skipped = n,
                        "Broadcast subscriber lagged, skipped {n} messages"
                    );
                    let _ = outbound_tx
                        .send(OutboundMessage::Json(ServerMessage::Error {
                            code: "lagged".to_string(),
                            message: format!("Subscriber lagged, skipped {n} messages"),
                            session_id: Some(session_id.clone()),
                        }))
                        .await;
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// Handle a client message
async fn handle_client_message(
    msg: ClientMessage,
    client_tx: &mpsc::Sender<OutboundMessage>,
    registry: &Arc<SessionRegistry>,
    joined: &mut HashMap<String, SessionMembership>,
    conn_id: u64,
) {
    debug!(
        component = "websocket",
        event = "ws.message.received",
        connection_id = conn_id,
        message = ?msg,
        "Received client message"
    );

    match msg {
        ClientMessage::JoinInterviewSession {
            session_id,
            user_id,
            role,
        } => {
            let ack = match registry.join(&session_id, &user_id, role).await {
                Ok(ack) => ack,
                Err(e) => {
                    send_error(client_tx, &session_id, e, conn_id).await;
                    return;
                }
            };

            // Initial state goes straight to the joiner; everything after
            // this point arrives through the broadcast subscription.
            send_json(
                client_tx,
                ServerMessage::HasOtherParticipants {
                    session_id: session_id.clone(),
                    has_other_participants: ack.has_other_participants,
                },
            )
            .await;
            send_json(
                client_tx,
                ServerMessage::TechnicalStatus {
                    session_id: session_id.clone(),
                    technical_status: ack.technical_status,
                },
            )
            .await;
            send_json(
                client_tx,
                ServerMessage::Questions {
                    session_id: session_id.clone(),
                    questions: ack.questions,
                },
            )
            .await;
            send_json(
                client_tx,
                ServerMessage::CategoryScores {
                    session_id: session_id.clone(),
                    category_scores: ack.category_scores,
                },
            )
            .await;
            send_json(
                client_tx,
                ServerMessage::TotalScore {
                    session_id: session_id.clone(),
                    total_score: ack.total_score,
                },
            )
            .await;

            let forwarder = spawn_broadcast_forwarder(ack.rx, client_tx.clone(), session_id.clone());
            // A re-join replaces the membership: the prior forwarder dies
            // so broadcasts are never double-delivered, and a prior user
            // on this connection is properly left, not overwritten.
            if let Some(prev) = joined.insert(
                session_id.clone(),
                SessionMembership {
                    user_id: user_id.clone(),
                    forwarder,
                },
            ) {
                prev.forwarder.abort();
                if prev.user_id != user_id {
                    registry.leave(&session_id, &prev.user_id).await;
                }
            }
        }

        ClientMessage::LeaveInterviewSession {
            session_id,
            user_id,
        }
        | ClientMessage::EndInterviewSession {
            session_id,
            user_id,
        } => {
            if let Some(membership) = joined.remove(&session_id) {
                membership.forwarder.abort();
            }
            registry.leave(&session_id, &user_id).await;
        }

        ClientMessage::StartTest { session_id } => {
            with_room(registry, client_tx, &session_id, conn_id, |reply| {
                RoomCommand::StartTest { reply }
            })
            .await;
        }

        ClientMessage::EndTest { session_id } => {
            with_room(registry, client_tx, &session_id, conn_id, |reply| {
                RoomCommand::EndTest { reply }
            })
            .await;
        }

        ClientMessage::SubmitAnswer {
            session_id,
            question_id,
            candidate_id,
            answer_text,
            question_text,
        } => {
            with_room(registry, client_tx, &session_id, conn_id, |reply| {
                RoomCommand::SubmitAnswer {
                    question_id,
                    candidate_id,
                    answer_text,
                    question_text,
                    reply,
                }
            })
            .await;
        }

        ClientMessage::NextQuestion {
            session_id,
            follow_up_question,
        } => {
            with_room(registry, client_tx, &session_id, conn_id, |reply| {
                RoomCommand::NextQuestion {
                    follow_up_question,
                    reply,
                }
            })
            .await;
        }

        ClientMessage::SubmitCategoryScore {
            session_id,
            category_score_id,
            score,
        } => {
            with_room(registry, client_tx, &session_id, conn_id, |reply| {
                RoomCommand::SubmitCategoryScore {
                    category_score_id,
                    score,
                    reply,
                }
            })
            .await;
        }

        ClientMessage::SubmitSubCategoryScore {
            session_id,
            sub_category_score_id,
            score,
        } => {
            with_room(registry, client_tx, &session_id, conn_id, |reply| {
                RoomCommand::SubmitSubCategoryScore {
                    sub_category_score_id,
                    score,
                    reply,
                }
            })
            .await;
        }

        ClientMessage::SendMessage {
            session_id,
            message,
            sender_id,
            sender_role,
        } => {
            relay(registry, client_tx, &session_id, conn_id, RoomCommand::Chat {
                message,
                sender_id,
                sender_role,
            })
            .await;
        }

        ClientMessage::TypingUpdate { session_id, text } => {
            relay(
                registry,
                client_tx,
                &session_id,
                conn_id,
                RoomCommand::Typing { text },
            )
            .await;
        }

        ClientMessage::JoinVideoSession {
            session_id,
            peer_id,
        } => {
            relay(
                registry,
                client_tx,
                &session_id,
                conn_id,
                RoomCommand::VideoJoin { peer_id },
            )
            .await;
        }
    }
}

/// Send a replying command to a running room and surface failures to the client.
async fn with_room<F>(
    registry: &Arc<SessionRegistry>,
    client_tx: &mpsc::Sender<OutboundMessage>,
    session_id: &str,
    conn_id: u64,
    build: F,
) where
    F: FnOnce(oneshot::Sender<Result<(), EngineError>>) -> RoomCommand,
{
    let Some(room) = registry.get(session_id) else {
        send_error(
            client_tx,
            session_id,
            EngineError::NotFound(format!("no active room for session {session_id}")),
            conn_id,
        )
        .await;
        return;
    };
    let (reply_tx, reply_rx) = oneshot::channel();
    room.send(build(reply_tx)).await;
    match reply_rx.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => send_error(client_tx, session_id, e, conn_id).await,
        Err(_) => {
            send_error(
                client_tx,
                session_id,
                EngineError::NotFound(format!("room for session {session_id} is gone")),
                conn_id,
            )
            .await;
        }
    }
}

/// Fire-and-forget relay of a command that produces only broadcasts.
async fn relay(
    registry: &Arc<SessionRegistry>,
    client_tx: &mpsc::Sender<OutboundMessage>,
    session_id: &str,
    conn_id: u64,
    cmd: RoomCommand,
) {
    let Some(room) = registry.get(session_id) else {
        send_error(
            client_tx,
            session_id,
            EngineError::NotFound(format!("no active room for session {session_id}")),
            conn_id,
        )
        .await;
        return;
    };
    room.send(cmd).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::analysis::{AnswerAnalyzer, OpenAiAnalyzer};
    use crate::registry::EngineConfig;
    use crate::store::test_store;
    use hireloop_protocol::Role;

    async fn test_registry() -> (Arc<SessionRegistry>, tempfile::TempDir) {
        let (store, dir) = test_store().await;
        store.create_session("s1", "i1", "cand-1").await.unwrap();
        // Never reaches analysis; any analyzer will do.
        let analyzer: Arc<dyn AnswerAnalyzer> = Arc::new(OpenAiAnalyzer::new(
            "gpt-4.1-mini".to_string(),
            Duration::from_secs(5),
        ));
        (
            Arc::new(SessionRegistry::new(store, analyzer, EngineConfig::default())),
            dir,
        )
    }

    fn join_msg(user_id: &str) -> ClientMessage {
        ClientMessage::JoinInterviewSession {
            session_id: "s1".to_string(),
            user_id: user_id.to_string(),
            role: Role::Candidate,
        }
    }

    #[tokio::test]
    async fn rejoin_does_not_double_deliver_broadcasts() {
        let (registry, _dir) = test_registry().await;
        let (tx, mut rx) = mpsc::channel(100);
        let mut joined = HashMap::new();

        handle_client_message(join_msg("cand-1"), &tx, &registry, &mut joined, 1).await;
        handle_client_message(join_msg("cand-1"), &tx, &registry, &mut joined, 1).await;
        assert_eq!(joined.len(), 1);

        // Let the replaced forwarder wind down, then discard the initial
        // state both joins pushed.
        tokio::time::sleep(Duration::from_millis(50)).await;
        while rx.try_recv().is_ok() {}

        handle_client_message(
            ClientMessage::TypingUpdate {
                session_id: "s1".to_string(),
                text: "fn main()".to_string(),
            },
            &tx,
            &registry,
            &mut joined,
            1,
        )
        .await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut typing_updates = 0;
        while let Ok(msg) = rx.try_recv() {
            if let OutboundMessage::Json(ServerMessage::TypingUpdate { .. }) = msg {
                typing_updates += 1;
            }
        }
        assert_eq!(typing_updates, 1);
    }

    #[tokio::test]
    async fn rejoin_under_a_new_user_releases_the_old_one() {
        let (registry, _dir) = test_registry().await;
        let (tx, _rx) = mpsc::channel(100);
        let mut joined = HashMap::new();

        handle_client_message(join_msg("cand-1"), &tx, &registry, &mut joined, 1).await;
        handle_client_message(join_msg("cand-2"), &tx, &registry, &mut joined, 1).await;

        // The connection tracks the new user, and the old one left the room.
        assert_eq!(joined.get("s1").unwrap().user_id, "cand-2");
        let snapshot = registry.get("s1").unwrap().snapshot();
        assert_eq!(snapshot.participants.len(), 1);
        assert_eq!(snapshot.participants[0].user_id, "cand-2");
    }
}
