// ============================
// relay-lib/src/rooms.rs
// ============================
//! Room store and actor coordination.
use crate::coalescer::CoalescerHandle;
use crate::error::AppError;
use crate::metrics::{ROOM_ACTIVE, ROOM_CREATED, ROOM_LOADED};
use crate::room::{PersistedRoom, Room, RoomId};
use crate::room_actor::{spawn_room_actor, RoomHandle};
use crate::storage::Storage;
use chrono::Utc;
use dashmap::DashMap;
use metrics::{counter, gauge};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Manager for live rooms. Rooms persist indefinitely: handles are created
/// at load or on demand and never removed while the process runs.
#[derive(Clone)]
pub struct RoomManager {
    rooms: Arc<DashMap<RoomId, RoomHandle>>,
    coalescer: CoalescerHandle,
    history_limit: usize,
}

impl RoomManager {
    pub fn new(coalescer: CoalescerHandle, history_limit: usize) -> Self {
        RoomManager {
            rooms: Arc::new(DashMap::new()),
            coalescer,
            history_limit,
        }
    }

    /// Rehydrate every persisted room and spawn its actor. Messages whose
    /// TTL elapsed while the process was down are redacted during
    /// rehydration, without a broadcast; pending ones get fresh timers.
    pub async fn load(&self, storage: &dyn Storage) -> Result<usize, AppError> {
        let persisted = storage.load_rooms().await?;
        let now = Utc::now();
        let count = persisted.len();

        for record in persisted {
            let room = record.into_room(now);
            let room_id = room.id.clone();
            let handle = spawn_room_actor(room, self.history_limit, self.coalescer.clone());
            self.rooms.insert(room_id, handle);
        }

        counter!(ROOM_LOADED).increment(count as u64);
        gauge!(ROOM_ACTIVE).set(count as f64);
        info!(rooms = count, "room store rehydrated");
        Ok(count)
    }

    /// Create a room with a minted id (the HTTP creation path)
    pub fn create(&self, name: &str, creator: &str) -> (RoomId, RoomHandle) {
        let room_id = Uuid::new_v4().to_string();
        let handle = self.insert_room(Room::new(
            room_id.clone(),
            name.to_string(),
            creator.to_string(),
        ));
        (room_id, handle)
    }

    /// Fetch a room, creating it implicitly on first join of an unknown id.
    /// The joiner becomes the creator identity.
    pub fn get_or_create(&self, room_id: &str, creator: &str) -> RoomHandle {
        if let Some(handle) = self.rooms.get(room_id) {
            return handle.clone();
        }
        self.insert_room(Room::new(
            room_id.to_string(),
            crate::room_actor::DEFAULT_ROOM_NAME.to_string(),
            creator.to_string(),
        ))
    }

    fn insert_room(&self, room: Room) -> RoomHandle {
        let room_id = room.id.clone();
        let handle = self
            .rooms
            .entry(room_id.clone())
            .or_insert_with(|| {
                counter!(ROOM_CREATED).increment(1);
                gauge!(ROOM_ACTIVE).increment(1.0);
                spawn_room_actor(room, self.history_limit, self.coalescer.clone())
            })
            .clone();
        self.coalescer.mark(&room_id);
        handle
    }

    pub fn get(&self, room_id: &str) -> Option<RoomHandle> {
        self.rooms.get(room_id).map(|h| h.clone())
    }

    pub fn room_ids(&self) -> Vec<RoomId> {
        self.rooms.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Copy-out snapshots for the given rooms
    pub async fn snapshot(&self, room_ids: &[RoomId]) -> Vec<PersistedRoom> {
        let mut snapshots = Vec::with_capacity(room_ids.len());
        for room_id in room_ids {
            if let Some(handle) = self.get(room_id) {
                if let Some(snapshot) = handle.snapshot().await {
                    snapshots.push(snapshot);
                }
            }
        }
        snapshots
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}
