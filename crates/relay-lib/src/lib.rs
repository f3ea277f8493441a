// ============================
// relay-lib/src/lib.rs
// ============================
//! Session & broker engine for the Cloakroom zero-knowledge chat relay.
//!
//! The relay brokers end-to-end encrypted rooms: it owns room lifecycle,
//! membership and the message log, fans events out to connected sessions,
//! routes opaque key-exchange and call-signaling frames, and persists room
//! snapshots through a pluggable backend. It never holds key material and
//! never inspects ciphertext.

pub mod coalescer;
pub mod config;
pub mod error;
pub mod http_api;
pub mod keepalive;
pub mod messages;
pub mod metrics;
pub mod room;
pub mod room_actor;
pub mod rooms;
pub mod session;
pub mod storage;
pub mod validation;
pub mod ws_router;

use crate::coalescer::CoalescerHandle;
use crate::config::Settings;
use crate::error::AppError;
use crate::rooms::RoomManager;
use crate::session::SessionRegistry;
use crate::storage::Storage;
use std::sync::Arc;
use std::time::Duration;

/// Application state shared across all handlers
pub struct AppState {
    /// Connection registry
    pub sessions: SessionRegistry,
    /// Room store
    pub rooms: RoomManager,
    /// Persistence backend
    pub storage: Arc<dyn Storage>,
    /// Debounced persistence trigger
    pub coalescer: CoalescerHandle,
    /// Settings snapshot taken at startup
    pub settings: Arc<Settings>,
}

impl AppState {
    /// Wire the engine together: coalescer mailbox, room store, persisted
    /// room rehydration, then the persistence task.
    pub async fn new(storage: Arc<dyn Storage>, settings: Settings) -> Result<Arc<Self>, AppError> {
        let (coalescer_handle, coalescer_rx) = coalescer::channel();
        let rooms = RoomManager::new(coalescer_handle.clone(), settings.relay.history_limit);
        rooms.load(storage.as_ref()).await?;
        coalescer::spawn(
            coalescer_rx,
            rooms.clone(),
            storage.clone(),
            Duration::from_millis(settings.relay.coalesce_window_ms),
        );

        Ok(Arc::new(Self {
            sessions: SessionRegistry::new(),
            rooms,
            storage,
            coalescer: coalescer_handle,
            settings: Arc::new(settings),
        }))
    }
}
