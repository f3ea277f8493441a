// ============================
// relay-lib/src/room_actor.rs
// ============================
//! One actor task per room: every mutation of a room aggregate goes through
//! its command mailbox, so operations observe a linear order without locks.
//!
//! The actor also owns the room's fan-out list (one send-handle per
//! connected member) and the disappearance timers. Authorization failures
//! are silent: the offending command is dropped and only logged.

use crate::coalescer::CoalescerHandle;
use crate::messages::{RelayedSignal, ServerEvent, UserRef};
use crate::metrics::{EVENT_DROPPED, MESSAGE_EXPIRED, MESSAGE_POSTED};
use crate::room::{
    FileData, Member, Message, MessageKind, PersistedRoom, Room, SessionId, SettingsPatch,
    DELETED_CONTENT, DISAPPEARED_CONTENT,
};
use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use serde_json::{Map, Value};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// Message sent *into* the actor
#[derive(Debug)]
pub enum RoomCmd {
    Join {
        session_id: SessionId,
        user_id: String,
        name: String,
        avatar: Option<String>,
        color: Option<String>,
        tx: mpsc::UnboundedSender<ServerEvent>,
    },
    Post {
        session_id: SessionId,
        kind: MessageKind,
        content: String,
        reply_to: Option<String>,
        file_data: Option<FileData>,
        is_encrypted: Option<bool>,
    },
    React {
        session_id: SessionId,
        message_id: String,
        emoji: String,
    },
    Edit {
        session_id: SessionId,
        message_id: String,
        new_content: String,
    },
    Delete {
        session_id: SessionId,
        message_id: String,
    },
    MarkRead {
        session_id: SessionId,
        message_ids: Vec<String>,
    },
    UpdateSettings {
        session_id: SessionId,
        patch: SettingsPatch,
    },
    Kick {
        session_id: SessionId,
        target_id: SessionId,
    },
    Typing {
        session_id: SessionId,
        active: bool,
    },
    VoicePresence {
        session_id: SessionId,
        joined: bool,
    },
    Signal {
        session_id: SessionId,
        kind: SignalKind,
        target_id: SessionId,
        body: Map<String, Value>,
    },
    CanvasStroke {
        session_id: SessionId,
        stroke: Value,
    },
    HandshakeInit {
        session_id: SessionId,
        pk: String,
    },
    HandshakeResponse {
        session_id: SessionId,
        target_id: SessionId,
        ciphertext: String,
        encrypted_key: String,
    },
    Disconnect {
        session_id: SessionId,
    },
    Expire {
        message_id: String,
    },
    Snapshot {
        resp_tx: mpsc::UnboundedSender<PersistedRoom>,
    },
}

/// Which unicast signaling lane a frame belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Voice,
    Call,
    CallInvite,
    CallAccept,
    CallReject,
    CallEnd,
    CallMediaHandshake,
}

/// Handle that other components keep: the room's command mailbox
#[derive(Debug, Clone)]
pub struct RoomHandle {
    pub cmd_tx: mpsc::UnboundedSender<RoomCmd>,
}

impl RoomHandle {
    /// Fire-and-forget command dispatch
    pub fn send(&self, cmd: RoomCmd) {
        if self.cmd_tx.send(cmd).is_err() {
            debug!("room actor is gone; command dropped");
        }
    }

    /// Copy-out snapshot of the aggregate, for persistence and the HTTP API
    pub async fn snapshot(&self) -> Option<PersistedRoom> {
        let (resp_tx, mut resp_rx) = mpsc::unbounded_channel();
        self.cmd_tx.send(RoomCmd::Snapshot { resp_tx }).ok()?;
        resp_rx.recv().await
    }
}

pub struct RoomActor {
    room: Room,
    /// Live send-handles, one per connected member
    senders: HashMap<SessionId, mpsc::UnboundedSender<ServerEvent>>,
    /// Own mailbox, for disappearance timers
    cmd_tx: mpsc::UnboundedSender<RoomCmd>,
    coalescer: CoalescerHandle,
    history_limit: usize,
}

/// Room name used when a client joins an id nobody created over HTTP
pub const DEFAULT_ROOM_NAME: &str = "Private Room";

const MEMBER_COLORS: [&str; 8] = [
    "#7c3aed", "#2563eb", "#059669", "#d97706", "#dc2626", "#db2777", "#0891b2", "#65a30d",
];

/// Derive up to two uppercase initials from a display name
fn avatar_initials(name: &str) -> String {
    name.split_whitespace()
        .take(2)
        .filter_map(|word| word.chars().next())
        .flat_map(char::to_uppercase)
        .collect()
}

/// Stable color assignment per persistent user
fn member_color(user_id: &str) -> String {
    let sum: usize = user_id.bytes().map(usize::from).sum();
    MEMBER_COLORS[sum % MEMBER_COLORS.len()].to_string()
}

impl RoomActor {
    pub fn new(
        room: Room,
        history_limit: usize,
        coalescer: CoalescerHandle,
        cmd_tx: mpsc::UnboundedSender<RoomCmd>,
    ) -> Self {
        Self {
            room,
            senders: HashMap::new(),
            cmd_tx,
            coalescer,
            history_limit,
        }
    }

    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<RoomCmd>) {
        while let Some(cmd) = rx.recv().await {
            self.handle(cmd);
        }
    }

    pub fn handle(&mut self, cmd: RoomCmd) {
        match cmd {
            RoomCmd::Join {
                session_id,
                user_id,
                name,
                avatar,
                color,
                tx,
            } => self.handle_join(session_id, user_id, name, avatar, color, tx),
            RoomCmd::Post {
                session_id,
                kind,
                content,
                reply_to,
                file_data,
                is_encrypted,
            } => self.handle_post(session_id, kind, content, reply_to, file_data, is_encrypted),
            RoomCmd::React {
                session_id,
                message_id,
                emoji,
            } => self.handle_react(session_id, message_id, emoji),
            RoomCmd::Edit {
                session_id,
                message_id,
                new_content,
            } => self.handle_edit(session_id, message_id, new_content),
            RoomCmd::Delete {
                session_id,
                message_id,
            } => self.handle_delete(session_id, message_id),
            RoomCmd::MarkRead {
                session_id,
                message_ids,
            } => self.handle_mark_read(session_id, message_ids),
            RoomCmd::UpdateSettings { session_id, patch } => {
                self.handle_update_settings(session_id, patch);
            },
            RoomCmd::Kick {
                session_id,
                target_id,
            } => self.handle_kick(session_id, target_id),
            RoomCmd::Typing { session_id, active } => self.handle_typing(session_id, active),
            RoomCmd::VoicePresence { session_id, joined } => {
                self.handle_voice_presence(session_id, joined);
            },
            RoomCmd::Signal {
                session_id,
                kind,
                target_id,
                body,
            } => self.handle_signal(session_id, kind, target_id, body),
            RoomCmd::CanvasStroke { session_id, stroke } => {
                self.handle_canvas_stroke(session_id, stroke);
            },
            RoomCmd::HandshakeInit { session_id, pk } => {
                self.handle_handshake_init(session_id, pk);
            },
            RoomCmd::HandshakeResponse {
                session_id,
                target_id,
                ciphertext,
                encrypted_key,
            } => self.handle_handshake_response(session_id, target_id, ciphertext, encrypted_key),
            RoomCmd::Disconnect { session_id } => self.handle_disconnect(session_id),
            RoomCmd::Expire { message_id } => self.handle_expire(message_id),
            RoomCmd::Snapshot { resp_tx } => {
                let _ = resp_tx.send(self.room.snapshot());
            },
        }
    }

    fn handle_join(
        &mut self,
        session_id: SessionId,
        user_id: String,
        name: String,
        avatar: Option<String>,
        color: Option<String>,
        tx: mpsc::UnboundedSender<ServerEvent>,
    ) {
        // at most one member per persistent user: drop any stale entry first
        if let Some(stale) = self.room.remove_member_by_user_id(&user_id) {
            self.senders.remove(&stale.id);
        }

        let member = Member {
            id: session_id.clone(),
            avatar: avatar.unwrap_or_else(|| avatar_initials(&name)),
            color: color.unwrap_or_else(|| member_color(&user_id)),
            user_id,
            name,
            joined_at: Utc::now(),
            is_online: true,
        };
        self.room.members.push(member.clone());
        self.senders.insert(session_id.clone(), tx.clone());

        let _ = tx.send(ServerEvent::RoomJoined {
            session_id: session_id.clone(),
            room_id: self.room.id.clone(),
            room_name: self.room.name.clone(),
            members: self.room.members.clone(),
            messages: self.room.recent_messages(self.history_limit),
            settings: self.room.settings.clone(),
        });
        self.broadcast_except(
            &session_id,
            &ServerEvent::UserJoined {
                user: member,
                members: self.room.members.clone(),
            },
        );
        self.mark_dirty();
    }

    fn handle_post(
        &mut self,
        session_id: SessionId,
        kind: MessageKind,
        content: String,
        reply_to: Option<String>,
        file_data: Option<FileData>,
        is_encrypted: Option<bool>,
    ) {
        let Some(sender) = self.room.member(&session_id) else {
            // covers posts racing an eviction
            return self.drop_cmd("post from non-member");
        };
        let sender_name = sender.name.clone();
        let sender_avatar = sender.avatar.clone();

        // a reply target must exist at append time
        let reply_to = reply_to.filter(|id| self.room.message(id).is_some());

        let now = Utc::now();
        let disappear_at = self
            .room
            .settings
            .disappearing_messages
            .map(|ms| now + Duration::milliseconds(ms as i64));

        let message = Message {
            id: Uuid::new_v4().to_string(),
            room_id: self.room.id.clone(),
            sender_id: session_id,
            sender_name,
            sender_avatar,
            content,
            kind,
            timestamp: now,
            reply_to,
            reactions: Default::default(),
            read_by: Vec::new(),
            edited: false,
            edited_at: None,
            deleted: false,
            disappear_at,
            file_data,
            is_encrypted,
        };

        if let Some(at) = disappear_at {
            self.schedule_expiry(message.id.clone(), at);
        }

        self.room.messages.push(message.clone());
        counter!(MESSAGE_POSTED).increment(1);
        self.broadcast(&ServerEvent::Message(message));
        self.mark_dirty();
    }

    fn handle_react(&mut self, session_id: SessionId, message_id: String, emoji: String) {
        if !self.room.is_member(&session_id) {
            return self.drop_cmd("reaction from non-member");
        }
        let Some(message) = self.room.message_mut(&message_id) else {
            return self.drop_cmd("reaction on unknown message");
        };
        if message.deleted {
            return;
        }

        // toggle this session in the emoji bucket; empty buckets vanish
        let bucket = message.reactions.entry(emoji.clone()).or_default();
        if let Some(pos) = bucket.iter().position(|s| *s == session_id) {
            bucket.remove(pos);
        } else {
            bucket.push(session_id);
        }
        if bucket.is_empty() {
            message.reactions.remove(&emoji);
        }

        let reactions = message.reactions.clone();
        self.broadcast(&ServerEvent::ReactionUpdated {
            message_id,
            reactions,
        });
        self.mark_dirty();
    }

    fn handle_edit(&mut self, session_id: SessionId, message_id: String, new_content: String) {
        if !self.room.is_member(&session_id) {
            return self.drop_cmd("edit from non-member");
        }
        let Some(message) = self.room.message_mut(&message_id) else {
            return self.drop_cmd("edit on unknown message");
        };
        if message.deleted || message.sender_id != session_id {
            return self.drop_cmd("edit rejected");
        }

        // no content comparison: an identical edit still stamps the flag
        message.content = new_content.clone();
        message.edited = true;
        let edited_at = Utc::now();
        message.edited_at = Some(edited_at);

        self.broadcast(&ServerEvent::MessageEdited {
            message_id,
            new_content,
            edited_at,
        });
        self.mark_dirty();
    }

    fn handle_delete(&mut self, session_id: SessionId, message_id: String) {
        if !self.room.is_member(&session_id) {
            return self.drop_cmd("delete from non-member");
        }
        let Some(message) = self.room.message_mut(&message_id) else {
            return self.drop_cmd("delete on unknown message");
        };
        if message.sender_id != session_id {
            return self.drop_cmd("delete rejected");
        }
        if message.deleted {
            // idempotent
            return;
        }

        message.deleted = true;
        message.content = DELETED_CONTENT.to_string();
        self.broadcast(&ServerEvent::MessageDeleted { message_id });
        self.mark_dirty();
    }

    fn handle_mark_read(&mut self, session_id: SessionId, message_ids: Vec<String>) {
        let Some(reader) = self.room.member(&session_id) else {
            return self.drop_cmd("mark-read from non-member");
        };
        let user_id = reader.user_id.clone();
        let user_name = reader.name.clone();

        let mut newly_read = Vec::new();
        for message_id in message_ids {
            if let Some(message) = self.room.message_mut(&message_id) {
                if !message.read_by.iter().any(|s| *s == session_id) {
                    message.read_by.push(session_id.clone());
                    newly_read.push(message_id);
                }
            }
        }

        // receipts go to everyone but the reader
        for message_id in newly_read.iter() {
            self.broadcast_except(
                &session_id,
                &ServerEvent::MessageRead {
                    message_id: message_id.clone(),
                    user_id: user_id.clone(),
                    user_name: user_name.clone(),
                },
            );
        }
        if !newly_read.is_empty() {
            self.mark_dirty();
        }
    }

    fn handle_update_settings(&mut self, session_id: SessionId, patch: SettingsPatch) {
        if !self.room.is_member(&session_id) {
            return self.drop_cmd("settings update from non-member");
        }

        // TTL changes apply to future posts only; stamped disappear_at stays
        self.room.settings.apply(&patch);
        self.broadcast(&ServerEvent::SettingsUpdated(self.room.settings.clone()));
        self.mark_dirty();
    }

    fn handle_kick(&mut self, session_id: SessionId, target_id: SessionId) {
        let Some(requester) = self.room.member(&session_id) else {
            return self.drop_cmd("kick from non-member");
        };
        if requester.name != self.room.created_by {
            return self.drop_cmd("kick from non-creator");
        }
        let Some(target) = self.room.remove_member(&target_id) else {
            return self.drop_cmd("kick on unknown member");
        };

        // removed from the room, not from the server
        if let Some(tx) = self.senders.remove(&target.id) {
            let _ = tx.send(ServerEvent::Kicked);
        }
        self.broadcast(&ServerEvent::UserLeft {
            user: UserRef { id: target.id },
            members: self.room.members.clone(),
        });
        self.mark_dirty();
    }

    fn handle_typing(&mut self, session_id: SessionId, active: bool) {
        let Some(member) = self.room.member(&session_id) else {
            return self.drop_cmd("typing from non-member");
        };
        let event = if active {
            ServerEvent::UserTyping {
                id: session_id.clone(),
                name: member.name.clone(),
            }
        } else {
            ServerEvent::UserStoppedTyping {
                id: session_id.clone(),
            }
        };
        self.broadcast_except(&session_id, &event);
    }

    fn handle_voice_presence(&mut self, session_id: SessionId, joined: bool) {
        let Some(member) = self.room.member(&session_id) else {
            return self.drop_cmd("voice presence from non-member");
        };
        let event = if joined {
            ServerEvent::UserJoinedVoice {
                id: session_id.clone(),
                name: member.name.clone(),
            }
        } else {
            ServerEvent::UserLeftVoice {
                id: session_id.clone(),
            }
        };
        self.broadcast_except(&session_id, &event);
    }

    fn handle_signal(
        &mut self,
        session_id: SessionId,
        kind: SignalKind,
        target_id: SessionId,
        body: Map<String, Value>,
    ) {
        if !self.room.is_member(&session_id) {
            return self.drop_cmd("signal from non-member");
        }
        // a target outside the sender's room is an authorization failure
        if !self.room.is_member(&target_id) {
            return self.drop_cmd("signal to foreign target");
        }

        let sender_name = match kind {
            SignalKind::CallInvite => self.room.member(&session_id).map(|m| m.name.clone()),
            _ => None,
        };
        let relayed = RelayedSignal {
            sender_id: session_id,
            sender_name,
            body,
        };
        let event = match kind {
            SignalKind::Voice => ServerEvent::VoiceSignal(relayed),
            SignalKind::Call => ServerEvent::CallSignal(relayed),
            SignalKind::CallInvite => ServerEvent::CallInvite(relayed),
            SignalKind::CallAccept => ServerEvent::CallAccept(relayed),
            SignalKind::CallReject => ServerEvent::CallReject(relayed),
            SignalKind::CallEnd => ServerEvent::CallEnd(relayed),
            SignalKind::CallMediaHandshake => ServerEvent::CallMediaHandshake(relayed),
        };
        self.send_to(&target_id, event);
    }

    fn handle_canvas_stroke(&mut self, session_id: SessionId, stroke: Value) {
        if !self.room.is_member(&session_id) {
            return self.drop_cmd("canvas stroke from non-member");
        }
        self.broadcast_except(
            &session_id,
            &ServerEvent::CanvasStroke {
                sender_id: session_id.clone(),
                stroke,
            },
        );
    }

    fn handle_handshake_init(&mut self, session_id: SessionId, pk: String) {
        if !self.room.is_member(&session_id) {
            return self.drop_cmd("handshake init from non-member");
        }
        // the broker keeps no handshake state; peers answer or nobody does
        self.broadcast_except(
            &session_id,
            &ServerEvent::HandshakeRequest {
                sender_id: session_id.clone(),
                pk,
            },
        );
    }

    fn handle_handshake_response(
        &mut self,
        session_id: SessionId,
        target_id: SessionId,
        ciphertext: String,
        encrypted_key: String,
    ) {
        if !self.room.is_member(&session_id) {
            return self.drop_cmd("handshake response from non-member");
        }
        if !self.room.is_member(&target_id) {
            return self.drop_cmd("handshake response to foreign target");
        }
        self.send_to(
            &target_id,
            ServerEvent::HandshakeComplete {
                ciphertext,
                encrypted_key,
            },
        );
    }

    fn handle_disconnect(&mut self, session_id: SessionId) {
        self.senders.remove(&session_id);
        if let Some(member) = self.room.remove_member(&session_id) {
            self.broadcast(&ServerEvent::UserLeft {
                user: UserRef { id: member.id },
                members: self.room.members.clone(),
            });
            self.mark_dirty();
        }
    }

    fn handle_expire(&mut self, message_id: String) {
        let Some(message) = self.room.message_mut(&message_id) else {
            return;
        };
        if message.deleted {
            return;
        }

        message.deleted = true;
        message.content = DISAPPEARED_CONTENT.to_string();
        counter!(MESSAGE_EXPIRED).increment(1);
        self.broadcast(&ServerEvent::MessageDeleted { message_id });
        self.mark_dirty();
    }

    /// One-shot redaction timer feeding back into the mailbox
    fn schedule_expiry(&self, message_id: String, at: DateTime<Utc>) {
        let cmd_tx = self.cmd_tx.clone();
        let delay = (at - Utc::now()).to_std().unwrap_or_default();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = cmd_tx.send(RoomCmd::Expire { message_id });
        });
    }

    fn broadcast(&self, event: &ServerEvent) {
        for tx in self.senders.values() {
            let _ = tx.send(event.clone());
        }
    }

    fn broadcast_except(&self, skip: &str, event: &ServerEvent) {
        for (session_id, tx) in &self.senders {
            if session_id != skip {
                let _ = tx.send(event.clone());
            }
        }
    }

    fn send_to(&self, session_id: &str, event: ServerEvent) {
        if let Some(tx) = self.senders.get(session_id) {
            let _ = tx.send(event);
        }
    }

    fn mark_dirty(&self) {
        self.coalescer.mark(&self.room.id);
    }

    fn drop_cmd(&self, reason: &'static str) {
        counter!(EVENT_DROPPED).increment(1);
        debug!(room_id = %self.room.id, reason, "command dropped");
    }
}

/// Spawn a room actor, re-arming disappearance timers for messages that
/// still await redaction, and return its handle
pub fn spawn_room_actor(
    room: Room,
    history_limit: usize,
    coalescer: CoalescerHandle,
) -> RoomHandle {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let actor = RoomActor::new(room, history_limit, coalescer, cmd_tx.clone());

    let now = Utc::now();
    for message in &actor.room.messages {
        if !message.deleted {
            if let Some(at) = message.disappear_at {
                if at > now {
                    actor.schedule_expiry(message.id.clone(), at);
                }
            }
        }
    }

    tokio::spawn(actor.run(cmd_rx));
    RoomHandle { cmd_tx }
}
