// ============================
// relay-lib/src/session.rs
// ============================
//! Connection registry: one entry per live session.
use crate::messages::ServerEvent;
use crate::room::{RoomId, SessionId};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Identity a session announced on its last `join-room`
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: String,
    pub name: String,
}

/// Per-session connection state
#[derive(Debug, Clone)]
pub struct SessionEntry {
    /// Send-handle for the connection's outbound pump
    pub tx: mpsc::UnboundedSender<ServerEvent>,
    /// Room this session currently routes events to
    pub room_id: Option<RoomId>,
    pub identity: Option<Identity>,
}

/// Registry of live sessions. Entries are written on connect/disconnect and
/// on join; the room actors only ever read resolved send-handles.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<SessionId, SessionEntry>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
        }
    }

    /// Mint a session id and register the connection's send-handle
    pub fn register(&self, tx: mpsc::UnboundedSender<ServerEvent>) -> SessionId {
        let session_id = Uuid::new_v4().to_string();
        self.sessions.insert(
            session_id.clone(),
            SessionEntry {
                tx,
                room_id: None,
                identity: None,
            },
        );
        session_id
    }

    pub fn remove(&self, session_id: &str) -> Option<SessionEntry> {
        self.sessions.remove(session_id).map(|(_, entry)| entry)
    }

    pub fn set_room(&self, session_id: &str, room_id: RoomId, identity: Identity) {
        if let Some(mut entry) = self.sessions.get_mut(session_id) {
            entry.room_id = Some(room_id);
            entry.identity = Some(identity);
        }
    }

    /// Room the session currently routes to
    pub fn room_of(&self, session_id: &str) -> Option<RoomId> {
        self.sessions.get(session_id).and_then(|e| e.room_id.clone())
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_mints_unique_ids() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let a = registry.register(tx.clone());
        let b = registry.register(tx);
        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);
        assert!(registry.contains(&a));
    }

    #[test]
    fn test_room_tracking() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = registry.register(tx);

        assert_eq!(registry.room_of(&id), None);

        registry.set_room(
            &id,
            "room-1".to_string(),
            Identity {
                user_id: "uA".to_string(),
                name: "Alice".to_string(),
            },
        );
        assert_eq!(registry.room_of(&id), Some("room-1".to_string()));

        let entry = registry.remove(&id).unwrap();
        assert_eq!(entry.identity.unwrap().name, "Alice");
        assert!(!registry.contains(&id));
    }
}
