// ============================
// relay-lib/src/ws_router.rs
// ============================
//! WebSocket router and connection handling.
//!
//! One task pair per connection: the read loop decodes, validates and
//! routes inbound events in arrival order; a pump task serializes outbound
//! events from the session's mailbox onto the socket. Malformed frames and
//! authorization failures never produce an echo.

use crate::messages::{ClientEvent, ServerEvent};
use crate::metrics::{EVENT_DROPPED, WS_ACTIVE, WS_CONNECTION};
use crate::room::MessageKind;
use crate::room_actor::{RoomCmd, SignalKind};
use crate::session::Identity;
use crate::validation::{self, MAX_FRAME_BYTES};
use crate::{http_api, AppState};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tracing::debug;

/// Create the full router: the event channel plus the HTTP surface
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ws", get(ws_handler))
        .merge(http_api::routes(&state.settings.storage.uploads_path))
        .layer(cors)
        .with_state(state)
}

/// Handler for WebSocket connections
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    counter!(WS_CONNECTION).increment(1);

    ws.max_message_size(MAX_FRAME_BYTES)
        .on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: Arc<AppState>) {
    gauge!(WS_ACTIVE).increment(1.0);

    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();
    let session_id = state.sessions.register(tx.clone());
    debug!(%session_id, "session connected");

    // outbound pump: session mailbox -> socket
    let send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let Ok(json) = serde_json::to_string(&event) else {
                continue;
            };
            if sink.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(message)) = stream.next().await {
        match message {
            Message::Text(text) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => {
                    if let Err(e) = validation::validate_client_event(&event) {
                        counter!(EVENT_DROPPED).increment(1);
                        debug!(%session_id, "invalid event dropped: {e}");
                        continue;
                    }
                    route_event(&state, &session_id, &tx, event);
                },
                Err(e) => {
                    counter!(EVENT_DROPPED).increment(1);
                    debug!(%session_id, "malformed frame dropped: {e}");
                },
            },
            Message::Close(_) => break,
            _ => {},
        }
    }

    // transport disconnect is an orderly leave
    if let Some(entry) = state.sessions.remove(&session_id) {
        if let Some(room_id) = entry.room_id {
            if let Some(handle) = state.rooms.get(&room_id) {
                handle.send(RoomCmd::Disconnect {
                    session_id: session_id.clone(),
                });
            }
        }
    }
    debug!(%session_id, "session disconnected");
    gauge!(WS_ACTIVE).decrement(1.0);
    send_task.abort();
}

/// Route one validated inbound event. `join-room` switches rooms; every
/// other kind goes to the session's current room, which enforces
/// membership and sender/creator authorization itself.
fn route_event(
    state: &Arc<AppState>,
    session_id: &str,
    tx: &mpsc::UnboundedSender<ServerEvent>,
    event: ClientEvent,
) {
    if let ClientEvent::JoinRoom {
        room_id,
        user_id,
        user_name,
        user_avatar,
        user_color,
    } = event
    {
        // leave the previous room first, if any
        if let Some(previous) = state.sessions.room_of(session_id) {
            if previous != room_id {
                if let Some(handle) = state.rooms.get(&previous) {
                    handle.send(RoomCmd::Disconnect {
                        session_id: session_id.to_string(),
                    });
                }
            }
        }

        let handle = state.rooms.get_or_create(&room_id, &user_name);
        state.sessions.set_room(
            session_id,
            room_id,
            Identity {
                user_id: user_id.clone(),
                name: user_name.clone(),
            },
        );
        handle.send(RoomCmd::Join {
            session_id: session_id.to_string(),
            user_id,
            name: user_name,
            avatar: user_avatar,
            color: user_color,
            tx: tx.clone(),
        });
        return;
    }

    let Some(room_id) = state.sessions.room_of(session_id) else {
        counter!(EVENT_DROPPED).increment(1);
        debug!(%session_id, "event before any join dropped");
        return;
    };
    let Some(handle) = state.rooms.get(&room_id) else {
        return;
    };
    if let Some(cmd) = to_room_cmd(session_id, event) {
        handle.send(cmd);
    }
}

/// Translate a wire event into the room actor's command vocabulary
fn to_room_cmd(session_id: &str, event: ClientEvent) -> Option<RoomCmd> {
    let session_id = session_id.to_string();
    Some(match event {
        ClientEvent::SendMessage {
            content,
            kind,
            reply_to,
            file_data,
            is_encrypted,
        } => RoomCmd::Post {
            session_id,
            kind,
            content,
            reply_to,
            file_data,
            is_encrypted,
        },
        ClientEvent::VoiceMessage {
            content,
            file_data,
            is_encrypted,
        } => RoomCmd::Post {
            session_id,
            kind: MessageKind::Voice,
            content,
            reply_to: None,
            file_data: Some(file_data),
            is_encrypted,
        },
        ClientEvent::TypingStart => RoomCmd::Typing {
            session_id,
            active: true,
        },
        ClientEvent::TypingStop => RoomCmd::Typing {
            session_id,
            active: false,
        },
        ClientEvent::AddReaction { message_id, emoji } => RoomCmd::React {
            session_id,
            message_id,
            emoji,
        },
        ClientEvent::MarkRead { message_ids } => RoomCmd::MarkRead {
            session_id,
            message_ids,
        },
        ClientEvent::EditMessage {
            message_id,
            new_content,
        } => RoomCmd::Edit {
            session_id,
            message_id,
            new_content,
        },
        ClientEvent::DeleteMessage { message_id } => RoomCmd::Delete {
            session_id,
            message_id,
        },
        ClientEvent::UpdateSettings(patch) => RoomCmd::UpdateSettings { session_id, patch },
        ClientEvent::KickMember { target_id } => RoomCmd::Kick {
            session_id,
            target_id,
        },
        ClientEvent::CanvasStroke(stroke) => RoomCmd::CanvasStroke { session_id, stroke },
        ClientEvent::JoinVoice => RoomCmd::VoicePresence {
            session_id,
            joined: true,
        },
        ClientEvent::LeaveVoice => RoomCmd::VoicePresence {
            session_id,
            joined: false,
        },
        ClientEvent::VoiceSignal(signal) => RoomCmd::Signal {
            session_id,
            kind: SignalKind::Voice,
            target_id: signal.target_id,
            body: signal.body,
        },
        ClientEvent::CallSignal(signal) => RoomCmd::Signal {
            session_id,
            kind: SignalKind::Call,
            target_id: signal.target_id,
            body: signal.body,
        },
        ClientEvent::CallInvite(signal) => RoomCmd::Signal {
            session_id,
            kind: SignalKind::CallInvite,
            target_id: signal.target_id,
            body: signal.body,
        },
        ClientEvent::CallAccept(signal) => RoomCmd::Signal {
            session_id,
            kind: SignalKind::CallAccept,
            target_id: signal.target_id,
            body: signal.body,
        },
        ClientEvent::CallReject(signal) => RoomCmd::Signal {
            session_id,
            kind: SignalKind::CallReject,
            target_id: signal.target_id,
            body: signal.body,
        },
        ClientEvent::CallEnd(signal) => RoomCmd::Signal {
            session_id,
            kind: SignalKind::CallEnd,
            target_id: signal.target_id,
            body: signal.body,
        },
        ClientEvent::CallMediaHandshake(signal) => RoomCmd::Signal {
            session_id,
            kind: SignalKind::CallMediaHandshake,
            target_id: signal.target_id,
            body: signal.body,
        },
        ClientEvent::HandshakeInit { pk } => RoomCmd::HandshakeInit { session_id, pk },
        ClientEvent::HandshakeResponse {
            target_id,
            ciphertext,
            encrypted_key,
        } => RoomCmd::HandshakeResponse {
            session_id,
            target_id,
            ciphertext,
            encrypted_key,
        },
        // handled by route_event before reaching here
        ClientEvent::JoinRoom { .. } => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::storage::FlatFileStorage;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_router_creation() {
        let temp_dir = TempDir::new().unwrap();
        let mut settings = Settings::default();
        settings.storage.data_path = temp_dir.path().join("data");
        settings.storage.uploads_path = temp_dir.path().join("uploads");
        std::fs::create_dir_all(&settings.storage.uploads_path).unwrap();

        let storage = Arc::new(FlatFileStorage::new(&settings.storage.data_path).unwrap());
        let state = AppState::new(storage, settings).await.unwrap();
        let _router = create_router(state);
    }

    #[test]
    fn test_voice_message_maps_to_voice_post() {
        let event: ClientEvent = serde_json::from_str(
            r#"{"event":"voice-message","data":{"fileData":{"audioData":"b64:pcm","duration":1.0}}}"#,
        )
        .unwrap();
        match to_room_cmd("sA", event).unwrap() {
            RoomCmd::Post {
                kind, file_data, ..
            } => {
                assert_eq!(kind, MessageKind::Voice);
                assert_eq!(file_data.unwrap().audio_data.as_deref(), Some("b64:pcm"));
            },
            other => panic!("Expected Post, got {other:?}"),
        }
    }

    #[test]
    fn test_targeted_signal_maps_to_signal_cmd() {
        let event: ClientEvent = serde_json::from_str(
            r#"{"event":"call-end","data":{"targetId":"s2"}}"#,
        )
        .unwrap();
        match to_room_cmd("sA", event).unwrap() {
            RoomCmd::Signal {
                kind, target_id, ..
            } => {
                assert_eq!(kind, SignalKind::CallEnd);
                assert_eq!(target_id, "s2");
            },
            other => panic!("Expected Signal, got {other:?}"),
        }
    }

    #[test]
    fn test_join_room_is_not_a_room_cmd() {
        let event: ClientEvent = serde_json::from_str(
            r#"{"event":"join-room","data":{"roomId":"r","userId":"u","userName":"n"}}"#,
        )
        .unwrap();
        assert!(to_room_cmd("sA", event).is_none());
    }
}
