// ============================
// relay-lib/src/room.rs
// ============================
//! Room aggregate and the records that live inside it.
//!
//! The server treats every `content`, `pk`, `ciphertext` and stroke payload
//! as opaque: text messages arrive as ciphertext and are stored verbatim.
//! All field names serialize camelCase to match the wire and document
//! schemas; timestamps serialize as ISO-8601 strings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type RoomId = String;
pub type SessionId = String;

/// Canonical tombstone content for an explicitly deleted message
pub const DELETED_CONTENT: &str = "This message was deleted";
/// Canonical tombstone content for a message whose TTL elapsed
pub const DISAPPEARED_CONTENT: &str = "This message has disappeared";

/// TTL values (ms) the settings surface accepts for disappearing messages
pub const RECOGNIZED_TTLS_MS: [u64; 4] = [5_000, 60_000, 3_600_000, 86_400_000];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Voice,
    File,
    Image,
    System,
}

/// Descriptor for file and voice payloads.
///
/// Files carry `url`/`name`/`size`/`mimetype` (the upload endpoint's
/// descriptor); voice clips carry `audioData` (base64), `duration` and
/// `waveform` in-band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mimetype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waveform: Option<Vec<f32>>,
}

/// A connected member of a room. Transient: exists only while the session
/// is connected, and is advisory in persisted snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    /// Server-minted session id
    pub id: SessionId,
    /// Client-supplied stable id, unique per room
    pub user_id: String,
    pub name: String,
    pub avatar: String,
    pub color: String,
    pub joined_at: DateTime<Utc>,
    pub is_online: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub room_id: RoomId,
    pub sender_id: SessionId,
    pub sender_name: String,
    pub sender_avatar: String,
    /// Opaque ciphertext (text) or descriptor reference (other kinds)
    pub content: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    /// emoji -> session ids. Buckets are never empty; session ids of
    /// departed members linger until the next toggle.
    #[serde(default)]
    pub reactions: BTreeMap<String, Vec<SessionId>>,
    #[serde(default)]
    pub read_by: Vec<SessionId>,
    #[serde(default)]
    pub edited: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disappear_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_data: Option<FileData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_encrypted: Option<bool>,
}

impl Message {
    /// Whether the TTL has elapsed relative to `now` and the message still
    /// awaits redaction
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        !self.deleted && self.disappear_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSettings {
    /// Disappearing-message TTL in ms; `None` disables
    pub disappearing_messages: Option<u64>,
    pub max_members: u32,
    pub is_private: bool,
    pub allow_file_sharing: bool,
    pub allow_voice_messages: bool,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            disappearing_messages: None,
            max_members: 50,
            is_private: false,
            allow_file_sharing: true,
            allow_voice_messages: true,
        }
    }
}

/// Partial settings update. `disappearing_messages` distinguishes "absent"
/// from "present and null" so a patch can disable the TTL.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    #[serde(
        default,
        deserialize_with = "double_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub disappearing_messages: Option<Option<u64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_members: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_private: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_file_sharing: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_voice_messages: Option<bool>,
}

fn double_option<'de, T, D>(de: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: serde::Deserializer<'de>,
{
    Deserialize::deserialize(de).map(Some)
}

impl RoomSettings {
    /// Merge a patch into the settings, field by field
    pub fn apply(&mut self, patch: &SettingsPatch) {
        if let Some(ttl) = patch.disappearing_messages {
            self.disappearing_messages = ttl;
        }
        if let Some(max) = patch.max_members {
            self.max_members = max;
        }
        if let Some(private) = patch.is_private {
            self.is_private = private;
        }
        if let Some(files) = patch.allow_file_sharing {
            self.allow_file_sharing = files;
        }
        if let Some(voice) = patch.allow_voice_messages {
            self.allow_voice_messages = voice;
        }
    }
}

/// The authoritative room aggregate, owned by its actor
#[derive(Debug, Clone)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    /// Display name recorded at creation; authorizes eviction
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    /// Connected members, in join order
    pub members: Vec<Member>,
    /// Append-only message log; entries mutate only via edit/delete/redaction
    pub messages: Vec<Message>,
    pub settings: RoomSettings,
}

impl Room {
    pub fn new(id: RoomId, name: String, created_by: String) -> Self {
        Self {
            id,
            name,
            created_by,
            created_at: Utc::now(),
            members: Vec::new(),
            messages: Vec::new(),
            settings: RoomSettings::default(),
        }
    }

    pub fn member(&self, session_id: &str) -> Option<&Member> {
        self.members.iter().find(|m| m.id == session_id)
    }

    pub fn is_member(&self, session_id: &str) -> bool {
        self.member(session_id).is_some()
    }

    pub fn remove_member(&mut self, session_id: &str) -> Option<Member> {
        let idx = self.members.iter().position(|m| m.id == session_id)?;
        Some(self.members.remove(idx))
    }

    /// Remove a stale entry for the same persistent user, if any. Keeps the
    /// at-most-one-member-per-user invariant across reconnects.
    pub fn remove_member_by_user_id(&mut self, user_id: &str) -> Option<Member> {
        let idx = self.members.iter().position(|m| m.user_id == user_id)?;
        Some(self.members.remove(idx))
    }

    pub fn message_mut(&mut self, message_id: &str) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| m.id == message_id)
    }

    pub fn message(&self, message_id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == message_id)
    }

    /// The most recent `limit` messages, oldest first
    pub fn recent_messages(&self, limit: usize) -> Vec<Message> {
        let start = self.messages.len().saturating_sub(limit);
        self.messages[start..].to_vec()
    }

    pub fn snapshot(&self) -> PersistedRoom {
        PersistedRoom {
            id: self.id.clone(),
            name: self.name.clone(),
            created_by: self.created_by.clone(),
            created_at: self.created_at,
            settings: self.settings.clone(),
            members: self
                .members
                .iter()
                .map(|m| (m.id.clone(), m.clone()))
                .collect(),
            messages: self.messages.clone(),
        }
    }
}

/// Durable form of a room. `members` is saved for observability but treated
/// as advisory on load: every session is dead after a restart and rejoins.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedRoom {
    pub id: RoomId,
    pub name: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub settings: RoomSettings,
    #[serde(default)]
    pub members: Vec<(SessionId, Member)>,
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl PersistedRoom {
    /// Rehydrate the live aggregate. Membership is rebuilt empty; messages
    /// whose TTL elapsed while the process was down are redacted in place.
    pub fn into_room(self, now: DateTime<Utc>) -> Room {
        let mut messages = self.messages;
        for message in &mut messages {
            if message.is_expired(now) {
                message.deleted = true;
                message.content = DISAPPEARED_CONTENT.to_string();
            }
        }
        Room {
            id: self.id,
            name: self.name,
            created_by: self.created_by,
            created_at: self.created_at,
            members: Vec::new(),
            messages,
            settings: self.settings,
        }
    }
}
