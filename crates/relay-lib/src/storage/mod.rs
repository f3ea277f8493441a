// ============================
// relay-lib/src/storage/mod.rs
// ============================
//! Storage abstraction with two backends: a local snapshot file and the
//! Firestore document store. Selected at startup by environment probing.
use crate::error::AppError;
use crate::room::{PersistedRoom, RoomId};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs as tokio_fs;
use tokio::sync::Mutex;

pub mod firestore;

pub use firestore::FirestoreStorage;

/// Trait for persistence backends
#[async_trait]
pub trait Storage: Send + Sync {
    /// Rehydrate every persisted room
    async fn load_rooms(&self) -> Result<Vec<PersistedRoom>, AppError>;

    /// Upsert the given room snapshots
    async fn save_rooms(&self, rooms: &[PersistedRoom]) -> Result<(), AppError>;

    /// Backend label for startup logs
    fn name(&self) -> &'static str;
}

/// Local snapshot backend: the full room set as one JSON document.
///
/// Upserts fold into an in-memory image of the document, and every save
/// rewrites the whole file via temp-file + rename so a crash mid-write
/// never tears the snapshot.
pub struct FlatFileStorage {
    path: PathBuf,
    cache: Mutex<BTreeMap<RoomId, PersistedRoom>>,
}

impl FlatFileStorage {
    pub fn new<P: AsRef<Path>>(root: P) -> std::io::Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            path: root.join("rooms.json"),
            cache: Mutex::new(BTreeMap::new()),
        })
    }

    fn tmp_path(&self) -> PathBuf {
        self.path.with_extension("json.tmp")
    }
}

#[async_trait]
impl Storage for FlatFileStorage {
    async fn load_rooms(&self) -> Result<Vec<PersistedRoom>, AppError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let content = tokio_fs::read_to_string(&self.path).await?;
        let rooms: Vec<PersistedRoom> = serde_json::from_str(&content)?;

        let mut cache = self.cache.lock().await;
        cache.clear();
        for room in &rooms {
            cache.insert(room.id.clone(), room.clone());
        }

        Ok(rooms)
    }

    async fn save_rooms(&self, rooms: &[PersistedRoom]) -> Result<(), AppError> {
        let mut cache = self.cache.lock().await;
        for room in rooms {
            cache.insert(room.id.clone(), room.clone());
        }

        let all: Vec<&PersistedRoom> = cache.values().collect();
        let json = serde_json::to_string_pretty(&all)?;

        // temp file + rename keeps the snapshot atomic
        let tmp = self.tmp_path();
        tokio_fs::write(&tmp, json).await?;
        tokio_fs::rename(&tmp, &self.path).await?;

        Ok(())
    }

    fn name(&self) -> &'static str {
        "flat-file"
    }
}
