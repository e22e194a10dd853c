use std::collections::HashSet;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Mutex};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::error::GameError;
use crate::models::event::GameEvent;
use crate::services::scheduler_service::GameScheduler;

/// One JSON command from a client. Field presence depends on `action`; the
/// operator/admin check happened upstream in the chat transport.
#[derive(Serialize, Deserialize, Debug)]
struct CommandMessage {
    action: String,
    room_id: Option<i64>,
    user_id: Option<i64>,
    username: Option<String>,
    bet_type: Option<String>,
    amount: Option<i64>,
    limit: Option<i64>,
}

/// WebSocket gateway. Translates JSON commands into scheduler calls and
/// pushes room events to subscribed connections; it carries no game rules of
/// its own.
pub async fn run_websocket_server(addr: &str, scheduler: Arc<GameScheduler>) {
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(addr, error = %err, "could not bind gateway listener");
            return;
        }
    };
    info!(addr, "gateway listening");

    while let Ok((stream, peer)) = listener.accept().await {
        let scheduler = Arc::clone(&scheduler);

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(err) => {
                    warn!(%peer, error = %err, "websocket handshake failed");
                    return;
                }
            };

            let (write, mut read) = ws_stream.split();
            let write = Arc::new(Mutex::new(write));
            let subscriptions = Arc::new(Mutex::new(HashSet::new()));

            // push room events for whatever rooms this connection follows
            let forwarder = tokio::spawn(forward_events(
                scheduler.subscribe(),
                Arc::clone(&write),
                Arc::clone(&subscriptions),
            ));

            while let Some(message) = read.next().await {
                let message = match message {
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(message) => message,
                };
                let Ok(text) = message.to_text() else { continue };
                if text.is_empty() {
                    continue;
                }

                let response = match serde_json::from_str::<CommandMessage>(text) {
                    Ok(command) => {
                        if command.action == "subscribe" {
                            subscribe(&command, &subscriptions).await
                        } else {
                            handle_command(&scheduler, command).await
                        }
                    }
                    Err(err) => {
                        debug!(error = %err, "unparseable gateway message");
                        error_response("?", "BAD_REQUEST", "invalid message format")
                    }
                };

                let mut write_guard = write.lock().await;
                if write_guard.send(Message::Text(response.to_string())).await.is_err() {
                    break;
                }
            }

            forwarder.abort();
        });
    }
}

async fn subscribe(command: &CommandMessage, subscriptions: &Arc<Mutex<HashSet<i64>>>) -> Value {
    let Some(room_id) = command.room_id else {
        return error_response("subscribe", "BAD_REQUEST", "room_id is required");
    };
    subscriptions.lock().await.insert(room_id);
    json!({ "ok": true, "action": "subscribe", "data": { "room_id": room_id } })
}

type SharedSink = Arc<
    Mutex<
        futures_util::stream::SplitSink<
            tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
            Message,
        >,
    >,
>;

async fn forward_events(
    mut events: broadcast::Receiver<GameEvent>,
    write: SharedSink,
    subscriptions: Arc<Mutex<HashSet<i64>>>,
) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "event forwarder lagged, dropping events");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        if !subscriptions.lock().await.contains(&event.room_id) {
            continue;
        }
        let payload = match serde_json::to_string(&event) {
            Ok(payload) => payload,
            Err(err) => {
                error!(error = %err, "failed to encode event");
                continue;
            }
        };
        if write.lock().await.send(Message::Text(payload)).await.is_err() {
            break;
        }
    }
}

/// Gateway-level failures stay out of the core error taxonomy.
enum GatewayError {
    BadRequest(String),
    Game(GameError),
}

impl From<GameError> for GatewayError {
    fn from(err: GameError) -> Self {
        GatewayError::Game(err)
    }
}

impl GatewayError {
    fn code(&self) -> &'static str {
        match self {
            GatewayError::BadRequest(_) => "BAD_REQUEST",
            GatewayError::Game(err) => err.code(),
        }
    }

    fn message(&self) -> String {
        match self {
            GatewayError::BadRequest(message) => message.clone(),
            GatewayError::Game(err) => err.to_string(),
        }
    }
}

async fn handle_command(scheduler: &GameScheduler, command: CommandMessage) -> Value {
    let action = command.action.clone();
    match dispatch(scheduler, command).await {
        Ok(data) => json!({ "ok": true, "action": action, "data": data }),
        Err(err) => error_response(&action, err.code(), &err.message()),
    }
}

async fn dispatch(scheduler: &GameScheduler, command: CommandMessage) -> Result<Value, GatewayError> {
    let room_id = command.room_id.ok_or_else(|| missing("room_id"))?;
    match command.action.as_str() {
        "start_match" => {
            let operator = command.user_id.ok_or_else(|| missing("user_id"))?;
            let snapshot = scheduler.start_match(room_id, operator).await?;
            Ok(serde_json::to_value(snapshot).unwrap_or(Value::Null))
        }
        "place_bet" => {
            let player_id = command.user_id.ok_or_else(|| missing("user_id"))?;
            let bet_type = command.bet_type.ok_or_else(|| missing("bet_type"))?;
            let amount = command.amount.ok_or_else(|| missing("amount"))?;
            let username = command.username.unwrap_or_default();
            let receipt = scheduler
                .place_bet(room_id, player_id, username, &bet_type, amount)
                .await?;
            Ok(serde_json::to_value(receipt).unwrap_or(Value::Null))
        }
        "close_betting" => {
            let operator = command.user_id.ok_or_else(|| missing("user_id"))?;
            let snapshot = scheduler.close_betting(room_id, operator).await?;
            Ok(serde_json::to_value(snapshot).unwrap_or(Value::Null))
        }
        "stop_match" => {
            let operator = command.user_id.ok_or_else(|| missing("user_id"))?;
            let summary = scheduler.stop_match(room_id, operator).await?;
            Ok(serde_json::to_value(summary).unwrap_or(Value::Null))
        }
        "status" => {
            let snapshot = scheduler.get_status(room_id).await?;
            Ok(serde_json::to_value(snapshot).unwrap_or(Value::Null))
        }
        "leaderboard" => {
            let limit = command.limit.unwrap_or(10).max(0) as usize;
            let board = scheduler.get_leaderboard(room_id, limit).await?;
            Ok(serde_json::to_value(board).unwrap_or(Value::Null))
        }
        "history" => {
            let limit = command.limit.unwrap_or(10).max(0) as usize;
            let history = scheduler.get_history(room_id, limit).await?;
            Ok(serde_json::to_value(history).unwrap_or(Value::Null))
        }
        other => Err(GatewayError::BadRequest(format!("unknown action: {}", other))),
    }
}

fn missing(field: &str) -> GatewayError {
    GatewayError::BadRequest(format!("missing field: {}", field))
}

fn error_response(action: &str, code: &str, message: &str) -> Value {
    json!({
        "ok": false,
        "action": action,
        "error": { "code": code, "message": message },
    })
}
