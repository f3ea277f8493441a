// ============================
// relay-lib/src/coalescer.rs
// ============================
//! Snapshot coalescer: folds bursts of room mutations into one save.
//!
//! Every durable mutation marks its room dirty. The first mark of a quiet
//! period arms a single timer; marks arriving while it runs fold into the
//! same window. When the timer fires, the dirty rooms are snapshotted from
//! their actors and handed to the persistence backend in one call. A failed
//! save keeps the rooms dirty so the next trip retries them.

use crate::metrics::{SNAPSHOT_DURATION_MS, SNAPSHOT_FAILED, SNAPSHOT_SAVED};
use crate::room::RoomId;
use crate::rooms::RoomManager;
use crate::storage::Storage;
use metrics::{counter, histogram};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug)]
pub enum CoalescerMsg {
    /// A room's durable state changed
    Dirty(RoomId),
    /// Save everything pending right now (orderly shutdown)
    Flush(mpsc::UnboundedSender<()>),
}

/// Handle shared with the room actors and the shutdown path
#[derive(Debug, Clone)]
pub struct CoalescerHandle {
    tx: mpsc::UnboundedSender<CoalescerMsg>,
}

impl CoalescerHandle {
    /// Mark a room dirty. Never blocks; a dead coalescer is ignored.
    pub fn mark(&self, room_id: &str) {
        let _ = self.tx.send(CoalescerMsg::Dirty(room_id.to_string()));
    }

    /// Force a final save and wait for it to complete
    pub async fn flush(&self) {
        let (resp_tx, mut resp_rx) = mpsc::unbounded_channel();
        if self.tx.send(CoalescerMsg::Flush(resp_tx)).is_ok() {
            let _ = resp_rx.recv().await;
        }
    }
}

/// Create the handle/mailbox pair. The task is spawned separately once the
/// room manager exists, because actors hold the handle while the task reads
/// the manager.
pub fn channel() -> (CoalescerHandle, mpsc::UnboundedReceiver<CoalescerMsg>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (CoalescerHandle { tx }, rx)
}

/// Spawn the coalescer task
pub fn spawn(
    mut rx: mpsc::UnboundedReceiver<CoalescerMsg>,
    rooms: RoomManager,
    storage: Arc<dyn Storage>,
    window: Duration,
) {
    tokio::spawn(async move {
        let mut dirty: HashSet<RoomId> = HashSet::new();
        let mut deadline: Option<Instant> = None;

        loop {
            let armed = deadline;
            let timer = async move {
                match armed {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                msg = rx.recv() => match msg {
                    Some(CoalescerMsg::Dirty(room_id)) => {
                        dirty.insert(room_id);
                        // first mark of a quiet period arms the timer;
                        // later marks leave it running
                        if deadline.is_none() {
                            deadline = Some(Instant::now() + window);
                        }
                    },
                    Some(CoalescerMsg::Flush(resp_tx)) => {
                        save(&rooms, storage.as_ref(), &mut dirty).await;
                        deadline = None;
                        let _ = resp_tx.send(());
                    },
                    None => {
                        // all handles dropped: final save, then stop
                        save(&rooms, storage.as_ref(), &mut dirty).await;
                        break;
                    },
                },
                () = timer => {
                    deadline = None;
                    save(&rooms, storage.as_ref(), &mut dirty).await;
                },
            }
        }
    });
}

async fn save(rooms: &RoomManager, storage: &dyn Storage, dirty: &mut HashSet<RoomId>) {
    if dirty.is_empty() {
        return;
    }
    let room_ids: Vec<RoomId> = dirty.iter().cloned().collect();
    let snapshots = rooms.snapshot(&room_ids).await;

    let started = std::time::Instant::now();
    match storage.save_rooms(&snapshots).await {
        Ok(()) => {
            dirty.clear();
            counter!(SNAPSHOT_SAVED).increment(1);
            histogram!(SNAPSHOT_DURATION_MS).record(started.elapsed().as_millis() as f64);
            debug!(rooms = snapshots.len(), backend = storage.name(), "snapshot saved");
        },
        Err(e) => {
            // keep serving from memory; the rooms stay dirty for the next trip
            counter!(SNAPSHOT_FAILED).increment(1);
            warn!(backend = storage.name(), "snapshot save failed: {e}");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::room::PersistedRoom;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct CountingStorage {
        saves: AtomicUsize,
        last_batch: Mutex<Vec<String>>,
        fail_first: AtomicUsize,
    }

    #[async_trait]
    impl Storage for CountingStorage {
        async fn load_rooms(&self) -> Result<Vec<PersistedRoom>, AppError> {
            Ok(Vec::new())
        }

        async fn save_rooms(&self, rooms: &[PersistedRoom]) -> Result<(), AppError> {
            if self.fail_first.load(Ordering::SeqCst) > 0 {
                self.fail_first.fetch_sub(1, Ordering::SeqCst);
                return Err(AppError::Storage("injected failure".to_string()));
            }
            self.saves.fetch_add(1, Ordering::SeqCst);
            *self.last_batch.lock().unwrap() = rooms.iter().map(|r| r.id.clone()).collect();
            Ok(())
        }

        fn name(&self) -> &'static str {
            "counting"
        }
    }

    fn setup(storage: Arc<CountingStorage>) -> (RoomManager, CoalescerHandle) {
        let (handle, rx) = channel();
        let rooms = RoomManager::new(handle.clone(), 100);
        spawn(rx, rooms.clone(), storage, Duration::from_millis(2000));
        (rooms, handle)
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_of_marks_folds_into_one_save() {
        let storage = Arc::new(CountingStorage::default());
        let (rooms, handle) = setup(storage.clone());
        let (room_id, _) = rooms.create("Cell", "Alice");

        for _ in 0..10 {
            handle.mark(&room_id);
        }
        tokio::time::sleep(Duration::from_millis(2_500)).await;

        assert_eq!(storage.saves.load(Ordering::SeqCst), 1);
        assert_eq!(*storage.last_batch.lock().unwrap(), vec![room_id]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_marks_no_save() {
        let storage = Arc::new(CountingStorage::default());
        let (_rooms, _handle) = setup(storage.clone());

        tokio::time::sleep(Duration::from_millis(10_000)).await;
        assert_eq!(storage.saves.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_save_retries_on_next_trip() {
        let storage = Arc::new(CountingStorage::default());
        storage.fail_first.store(1, Ordering::SeqCst);
        let (rooms, handle) = setup(storage.clone());
        let (room_id, _) = rooms.create("Cell", "Alice");

        handle.mark(&room_id);
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        assert_eq!(storage.saves.load(Ordering::SeqCst), 0);

        // next dirty trip picks the room up again
        handle.mark(&room_id);
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        assert_eq!(storage.saves.load(Ordering::SeqCst), 1);
        assert_eq!(*storage.last_batch.lock().unwrap(), vec![room_id]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_saves_immediately() {
        let storage = Arc::new(CountingStorage::default());
        let (rooms, handle) = setup(storage.clone());
        let (room_id, _) = rooms.create("Cell", "Alice");

        handle.mark(&room_id);
        handle.flush().await;
        assert_eq!(storage.saves.load(Ordering::SeqCst), 1);
    }
}
