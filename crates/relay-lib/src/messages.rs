// ============================
// relay-lib/src/messages.rs
// ============================
//! Wire events for the bidirectional channel.
//!
//! Frames are JSON objects of the form `{"event": "<kebab-kind>", "data": {…}}`
//! with camelCase payload keys. Unknown event kinds fail to decode and are
//! dropped by the router.

use crate::room::{FileData, Member, Message, MessageKind, RoomSettings, SessionId, SettingsPatch};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Events a client sends to the relay
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    #[serde(rename_all = "camelCase")]
    JoinRoom {
        room_id: String,
        user_id: String,
        user_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_avatar: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_color: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    SendMessage {
        content: String,
        #[serde(rename = "type", default = "default_kind")]
        kind: MessageKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reply_to: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_data: Option<FileData>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_encrypted: Option<bool>,
    },
    #[serde(rename_all = "camelCase")]
    VoiceMessage {
        #[serde(default)]
        content: String,
        file_data: FileData,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_encrypted: Option<bool>,
    },
    TypingStart,
    TypingStop,
    #[serde(rename_all = "camelCase")]
    AddReaction { message_id: String, emoji: String },
    #[serde(rename_all = "camelCase")]
    MarkRead { message_ids: Vec<String> },
    #[serde(rename_all = "camelCase")]
    EditMessage {
        message_id: String,
        new_content: String,
    },
    #[serde(rename_all = "camelCase")]
    DeleteMessage { message_id: String },
    UpdateSettings(SettingsPatch),
    #[serde(rename_all = "camelCase")]
    KickMember { target_id: SessionId },
    CanvasStroke(Value),
    JoinVoice,
    LeaveVoice,
    VoiceSignal(TargetedSignal),
    CallSignal(TargetedSignal),
    CallInvite(TargetedSignal),
    CallAccept(TargetedSignal),
    CallReject(TargetedSignal),
    CallEnd(TargetedSignal),
    CallMediaHandshake(TargetedSignal),
    #[serde(rename_all = "camelCase")]
    HandshakeInit { pk: String },
    #[serde(rename_all = "camelCase")]
    HandshakeResponse {
        target_id: SessionId,
        ciphertext: String,
        encrypted_key: String,
    },
}

fn default_kind() -> MessageKind {
    MessageKind::Text
}

/// A unicast signaling frame. Everything besides the routing target is
/// opaque to the relay (SDP, ICE, media keys, …) and forwarded verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetedSignal {
    pub target_id: SessionId,
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

/// A relayed signaling frame with the sender attached by the server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayedSignal {
    pub sender_id: SessionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

/// Events the relay sends to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    #[serde(rename_all = "camelCase")]
    RoomJoined {
        session_id: SessionId,
        room_id: String,
        room_name: String,
        members: Vec<Member>,
        messages: Vec<Message>,
        settings: RoomSettings,
    },
    Message(Message),
    #[serde(rename_all = "camelCase")]
    UserJoined { user: Member, members: Vec<Member> },
    #[serde(rename_all = "camelCase")]
    UserLeft {
        user: UserRef,
        members: Vec<Member>,
    },
    #[serde(rename_all = "camelCase")]
    UserTyping { id: SessionId, name: String },
    #[serde(rename_all = "camelCase")]
    UserStoppedTyping { id: SessionId },
    #[serde(rename_all = "camelCase")]
    ReactionUpdated {
        message_id: String,
        reactions: BTreeMap<String, Vec<SessionId>>,
    },
    #[serde(rename_all = "camelCase")]
    MessageEdited {
        message_id: String,
        new_content: String,
        edited_at: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    MessageDeleted { message_id: String },
    #[serde(rename_all = "camelCase")]
    MessageRead {
        message_id: String,
        user_id: String,
        user_name: String,
    },
    SettingsUpdated(RoomSettings),
    Kicked,
    #[serde(rename_all = "camelCase")]
    HandshakeRequest { sender_id: SessionId, pk: String },
    #[serde(rename_all = "camelCase")]
    HandshakeComplete {
        ciphertext: String,
        encrypted_key: String,
    },
    #[serde(rename_all = "camelCase")]
    UserJoinedVoice { id: SessionId, name: String },
    #[serde(rename_all = "camelCase")]
    UserLeftVoice { id: SessionId },
    #[serde(rename_all = "camelCase")]
    CanvasStroke {
        sender_id: SessionId,
        stroke: Value,
    },
    VoiceSignal(RelayedSignal),
    CallSignal(RelayedSignal),
    CallInvite(RelayedSignal),
    CallAccept(RelayedSignal),
    CallReject(RelayedSignal),
    CallEnd(RelayedSignal),
    CallMediaHandshake(RelayedSignal),
}

/// Bare member reference used by `user-left`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRef {
    pub id: SessionId,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_join_room_decodes_kebab_and_camel() {
        let raw = r#"{
            "event": "join-room",
            "data": {
                "roomId": "room-1",
                "userId": "uA",
                "userName": "Alice",
                "userAvatar": "AL"
            }
        }"#;
        let event: ClientEvent = serde_json::from_str(raw).unwrap();
        match event {
            ClientEvent::JoinRoom {
                room_id,
                user_id,
                user_name,
                user_avatar,
                user_color,
            } => {
                assert_eq!(room_id, "room-1");
                assert_eq!(user_id, "uA");
                assert_eq!(user_name, "Alice");
                assert_eq!(user_avatar.as_deref(), Some("AL"));
                assert_eq!(user_color, None);
            },
            other => panic!("Expected JoinRoom, got {other:?}"),
        }
    }

    #[test]
    fn test_unit_events_decode_without_data() {
        let event: ClientEvent = serde_json::from_str(r#"{"event":"typing-start"}"#).unwrap();
        assert!(matches!(event, ClientEvent::TypingStart));

        let event: ClientEvent = serde_json::from_str(r#"{"event":"join-voice"}"#).unwrap();
        assert!(matches!(event, ClientEvent::JoinVoice));
    }

    #[test]
    fn test_unknown_event_kind_fails_to_decode() {
        let result = serde_json::from_str::<ClientEvent>(r#"{"event":"drop-table"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_send_message_defaults_to_text() {
        let raw = r#"{"event":"send-message","data":{"content":"b64:abc"}}"#;
        let event: ClientEvent = serde_json::from_str(raw).unwrap();
        match event {
            ClientEvent::SendMessage { kind, reply_to, .. } => {
                assert_eq!(kind, MessageKind::Text);
                assert_eq!(reply_to, None);
            },
            other => panic!("Expected SendMessage, got {other:?}"),
        }
    }

    #[test]
    fn test_voice_message_carries_in_band_clip() {
        let raw = r#"{
            "event": "voice-message",
            "data": {
                "fileData": {"audioData": "b64:pcm", "duration": 2.5, "waveform": [0.1, 0.9]}
            }
        }"#;
        let event: ClientEvent = serde_json::from_str(raw).unwrap();
        match event {
            ClientEvent::VoiceMessage { file_data, .. } => {
                assert_eq!(file_data.audio_data.as_deref(), Some("b64:pcm"));
                assert_eq!(file_data.duration, Some(2.5));
                assert_eq!(file_data.waveform, Some(vec![0.1, 0.9]));
            },
            other => panic!("Expected VoiceMessage, got {other:?}"),
        }
    }

    #[test]
    fn test_targeted_signal_keeps_opaque_body() {
        let raw = r#"{
            "event": "call-signal",
            "data": {"targetId": "s2", "signal": {"type": "offer", "sdp": "v=0..."}}
        }"#;
        let event: ClientEvent = serde_json::from_str(raw).unwrap();
        let ClientEvent::CallSignal(signal) = event else {
            panic!("Expected CallSignal")
        };
        assert_eq!(signal.target_id, "s2");
        assert_eq!(signal.body["signal"]["sdp"], "v=0...");
        // targetId is routing metadata, not part of the opaque body
        assert!(!signal.body.contains_key("targetId"));
    }

    #[test]
    fn test_relayed_signal_attaches_sender() {
        let mut body = Map::new();
        body.insert("mediaPk".to_string(), json!("b64:kyber-pk"));
        let event = ServerEvent::CallMediaHandshake(RelayedSignal {
            sender_id: "s1".to_string(),
            sender_name: None,
            body,
        });
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "call-media-handshake");
        assert_eq!(value["data"]["senderId"], "s1");
        assert_eq!(value["data"]["mediaPk"], "b64:kyber-pk");
        assert!(value["data"].get("senderName").is_none());
    }

    #[test]
    fn test_kicked_serializes_as_bare_event() {
        let value = serde_json::to_value(ServerEvent::Kicked).unwrap();
        assert_eq!(value["event"], "kicked");
    }

    #[test]
    fn test_reaction_updated_shape() {
        let mut reactions = BTreeMap::new();
        reactions.insert("👍".to_string(), vec!["s1".to_string()]);
        let value = serde_json::to_value(ServerEvent::ReactionUpdated {
            message_id: "m1".to_string(),
            reactions,
        })
        .unwrap();
        assert_eq!(value["event"], "reaction-updated");
        assert_eq!(value["data"]["messageId"], "m1");
        assert_eq!(value["data"]["reactions"]["👍"][0], "s1");
    }

    #[test]
    fn test_settings_update_event_roundtrip() {
        let raw = r#"{"event":"update-settings","data":{"disappearingMessages":5000}}"#;
        let event: ClientEvent = serde_json::from_str(raw).unwrap();
        let ClientEvent::UpdateSettings(patch) = event else {
            panic!("Expected UpdateSettings")
        };
        assert_eq!(patch.disappearing_messages, Some(Some(5000)));
    }
}
