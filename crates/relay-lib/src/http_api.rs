// ============================
// relay-lib/src/http_api.rs
// ============================
//! HTTP surface: room creation/info API, file uploads, static upload
//! serving, the keep-alive ping and the two HTML shells. The pages only
//! serve markup; visiting `/room/{id}` never creates the room — creation
//! happens on join or via `POST /api/rooms`.

use crate::error::AppError;
use crate::metrics::UPLOAD_ACCEPTED;
use crate::validation::{self, MAX_UPLOAD_BYTES};
use crate::AppState;
use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    response::Html,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use metrics::counter;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

const LANDING_HTML: &str = include_str!("../assets/index.html");
const ROOM_HTML: &str = include_str!("../assets/room.html");

/// Build the HTTP routes. The uploads directory is served statically and
/// must exist before the router is built.
pub fn routes(uploads_dir: &std::path::Path) -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(landing_page))
        .route("/room/{room_id}", get(room_page))
        .route("/api/rooms", post(create_room))
        .route("/api/rooms/{room_id}", get(room_info))
        .route(
            "/api/upload",
            post(upload_file).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/ping", get(ping))
        .nest_service("/uploads", tower_http::services::ServeDir::new(uploads_dir))
}

async fn landing_page() -> Html<&'static str> {
    Html(LANDING_HTML)
}

async fn room_page(Path(_room_id): Path<String>) -> Html<&'static str> {
    Html(ROOM_HTML)
}

async fn ping() -> &'static str {
    "pong"
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateRoomRequest {
    name: String,
    creator_name: String,
}

async fn create_room(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateRoomRequest>,
) -> Result<Json<Value>, AppError> {
    validation::validate_name(&request.name)
        .map_err(|e| AppError::InvalidInput(e.to_string()))?;
    validation::validate_name(&request.creator_name)
        .map_err(|e| AppError::InvalidInput(e.to_string()))?;

    let (room_id, _) = state.rooms.create(&request.name, &request.creator_name);
    info!(%room_id, "room created over HTTP");

    Ok(Json(json!({
        "success": true,
        "roomId": room_id,
        "inviteLink": format!("/room/{room_id}"),
    })))
}

async fn room_info(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let handle = state.rooms.get(&room_id).ok_or(AppError::RoomNotFound)?;
    let snapshot = handle.snapshot().await.ok_or(AppError::RoomNotFound)?;

    Ok(Json(json!({
        "id": snapshot.id,
        "name": snapshot.name,
        "memberCount": snapshot.members.len(),
        "createdAt": snapshot.created_at,
        "settings": snapshot.settings,
    })))
}

async fn upload_file(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<Value>, AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::UploadRejected(e.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let original_name = field.file_name().unwrap_or("file").to_string();
        let mimetype = field
            .content_type()
            .map_or_else(|| "application/octet-stream".to_string(), str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::UploadRejected(e.to_string()))?;

        let extension = std::path::Path::new(&original_name)
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default();
        let filename = format!(
            "{}-{}{}",
            Utc::now().timestamp_millis(),
            Uuid::new_v4(),
            extension
        );

        let path = state.settings.storage.uploads_path.join(&filename);
        tokio::fs::write(&path, &bytes).await?;
        counter!(UPLOAD_ACCEPTED).increment(1);
        info!(%filename, size = bytes.len(), "file stored");

        return Ok(Json(json!({
            "success": true,
            "filename": filename,
            "originalName": original_name,
            "size": bytes.len(),
            "mimetype": mimetype,
            "url": format!("/uploads/{filename}"),
        })));
    }

    Err(AppError::UploadRejected("missing file field".to_string()))
}
