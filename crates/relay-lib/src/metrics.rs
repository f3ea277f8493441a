// ==============
// relay-lib/src/metrics.rs

//! Central place for metric keys
pub const WS_CONNECTION: &str = "ws.connection";
pub const WS_ACTIVE: &str = "ws.active";
pub const ROOM_CREATED: &str = "room.created";
pub const ROOM_ACTIVE: &str = "room.active";
pub const ROOM_LOADED: &str = "room.loaded";
pub const MESSAGE_POSTED: &str = "message.posted";
pub const MESSAGE_EXPIRED: &str = "message.expired";
pub const EVENT_DROPPED: &str = "event.dropped";
pub const SNAPSHOT_SAVED: &str = "snapshot.saved";
pub const SNAPSHOT_FAILED: &str = "snapshot.failed";
pub const SNAPSHOT_DURATION_MS: &str = "snapshot.duration_ms";
pub const UPLOAD_ACCEPTED: &str = "upload.accepted";
