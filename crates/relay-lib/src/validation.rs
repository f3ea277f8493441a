// ============================
// relay-lib/src/validation.rs
// ============================
//! Inbound event validation.
//!
//! Anything that fails here is dropped without an echo; the error only
//! reaches the server log.

use crate::messages::ClientEvent;
use crate::room::RECOGNIZED_TTLS_MS;
use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

/// Inbound WebSocket frames are capped at 10 MB (voice clips arrive in-band)
pub const MAX_FRAME_BYTES: usize = 10 * 1024 * 1024;
/// HTTP uploads are capped at 50 MB
pub const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

const MAX_ROOM_ID_LENGTH: usize = 64;
const MAX_NAME_LENGTH: usize = 100;
const MAX_USER_ID_LENGTH: usize = 128;
const MAX_EMOJI_LENGTH: usize = 32;

static ROOM_ID_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9-]+$").unwrap());
static NAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^<>/\\{}()\[\];]*$").unwrap());

/// Possible validation errors
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Invalid room ID: {0}")]
    InvalidRoomId(String),

    #[error("Invalid user ID: {0}")]
    InvalidUserId(String),

    #[error("Invalid display name: {0}")]
    InvalidName(String),

    #[error("Invalid message ID: {0}")]
    InvalidMessageId(String),

    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("Invalid emoji: {0}")]
    InvalidEmoji(String),

    #[error("Invalid settings patch: {0}")]
    InvalidSettings(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
}

pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validate a room id
pub fn validate_room_id(room_id: &str) -> ValidationResult<&str> {
    if room_id.is_empty() {
        return Err(ValidationError::InvalidRoomId(
            "Room ID must not be empty".to_string(),
        ));
    }
    if room_id.len() > MAX_ROOM_ID_LENGTH {
        return Err(ValidationError::InvalidRoomId(format!(
            "Room ID must not exceed {MAX_ROOM_ID_LENGTH} characters"
        )));
    }
    if !ROOM_ID_REGEX.is_match(room_id) {
        return Err(ValidationError::InvalidRoomId(
            "Room ID must contain only alphanumeric characters and hyphens".to_string(),
        ));
    }
    Ok(room_id)
}

/// Validate a display name
pub fn validate_name(name: &str) -> ValidationResult<&str> {
    if name.trim().is_empty() {
        return Err(ValidationError::InvalidName(
            "Display name must not be empty".to_string(),
        ));
    }
    if name.len() > MAX_NAME_LENGTH {
        return Err(ValidationError::InvalidName(format!(
            "Display name must not exceed {MAX_NAME_LENGTH} characters"
        )));
    }
    if !NAME_REGEX.is_match(name) {
        return Err(ValidationError::InvalidName(
            "Display name contains invalid characters".to_string(),
        ));
    }
    Ok(name)
}

fn validate_id_field(id: &str, what: fn(String) -> ValidationError) -> ValidationResult<&str> {
    if id.is_empty() {
        return Err(what("must not be empty".to_string()));
    }
    if id.len() > MAX_USER_ID_LENGTH {
        return Err(what(format!(
            "must not exceed {MAX_USER_ID_LENGTH} characters"
        )));
    }
    Ok(id)
}

fn validate_ttl(ttl: Option<Option<u64>>) -> ValidationResult<()> {
    if let Some(Some(ms)) = ttl {
        if !RECOGNIZED_TTLS_MS.contains(&ms) {
            return Err(ValidationError::InvalidSettings(format!(
                "unrecognized disappearing-messages interval: {ms}"
            )));
        }
    }
    Ok(())
}

/// Validate an inbound event. Drops happen at the router on error.
pub fn validate_client_event(event: &ClientEvent) -> ValidationResult<()> {
    match event {
        ClientEvent::JoinRoom {
            room_id,
            user_id,
            user_name,
            ..
        } => {
            validate_room_id(room_id)?;
            validate_id_field(user_id, ValidationError::InvalidUserId)?;
            validate_name(user_name)?;
        },
        ClientEvent::SendMessage { .. } => {
            // empty content is accepted; the 10 MB frame cap bounds size
        },
        ClientEvent::VoiceMessage { file_data, .. } => {
            if file_data.audio_data.is_none() {
                return Err(ValidationError::InvalidPayload(
                    "voice message without audio data".to_string(),
                ));
            }
        },
        ClientEvent::AddReaction { message_id, emoji } => {
            validate_id_field(message_id, ValidationError::InvalidMessageId)?;
            if emoji.is_empty() || emoji.len() > MAX_EMOJI_LENGTH {
                return Err(ValidationError::InvalidEmoji(
                    "emoji must be 1 to 32 bytes".to_string(),
                ));
            }
        },
        ClientEvent::MarkRead { message_ids } => {
            for id in message_ids {
                validate_id_field(id, ValidationError::InvalidMessageId)?;
            }
        },
        ClientEvent::EditMessage { message_id, .. }
        | ClientEvent::DeleteMessage { message_id } => {
            validate_id_field(message_id, ValidationError::InvalidMessageId)?;
        },
        ClientEvent::UpdateSettings(patch) => {
            validate_ttl(patch.disappearing_messages)?;
        },
        ClientEvent::KickMember { target_id } => {
            validate_id_field(target_id, ValidationError::InvalidTarget)?;
        },
        ClientEvent::VoiceSignal(signal)
        | ClientEvent::CallSignal(signal)
        | ClientEvent::CallInvite(signal)
        | ClientEvent::CallAccept(signal)
        | ClientEvent::CallReject(signal)
        | ClientEvent::CallEnd(signal)
        | ClientEvent::CallMediaHandshake(signal) => {
            validate_id_field(&signal.target_id, ValidationError::InvalidTarget)?;
        },
        ClientEvent::HandshakeInit { pk } => {
            if pk.is_empty() {
                return Err(ValidationError::InvalidPayload(
                    "handshake without public key".to_string(),
                ));
            }
        },
        ClientEvent::HandshakeResponse {
            target_id,
            ciphertext,
            encrypted_key,
        } => {
            validate_id_field(target_id, ValidationError::InvalidTarget)?;
            if ciphertext.is_empty() || encrypted_key.is_empty() {
                return Err(ValidationError::InvalidPayload(
                    "handshake response missing key material".to_string(),
                ));
            }
        },
        ClientEvent::TypingStart
        | ClientEvent::TypingStop
        | ClientEvent::JoinVoice
        | ClientEvent::LeaveVoice
        | ClientEvent::CanvasStroke(_) => {},
    }
    Ok(())
}
