// ============================
// relay-lib/src/storage/firestore.rs
// ============================
//! Firestore REST backend.
//!
//! Each room is one document at `rooms/{room_id}`. Authentication is a
//! service-account JWT (RS256) exchanged for a bearer token, cached until
//! shortly before expiry. The relay's JSON is mapped to Firestore's typed
//! value encoding on the way out and back.

use crate::error::AppError;
use crate::room::PersistedRoom;
use crate::storage::Storage;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::sync::Mutex;
use tracing::warn;

const FIRESTORE_SCOPE: &str = "https://www.googleapis.com/auth/datastore";
const JWT_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
/// Firestore caps batchWrite at 500 writes
const MAX_BATCH_WRITES: usize = 500;

#[derive(Debug, Deserialize)]
struct ServiceAccount {
    project_id: String,
    private_key: String,
    client_email: String,
    #[serde(default = "default_token_uri")]
    token_uri: String,
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

pub struct FirestoreStorage {
    client: reqwest::Client,
    project_id: String,
    client_email: String,
    token_uri: String,
    key: EncodingKey,
    token: Mutex<Option<CachedToken>>,
}

impl FirestoreStorage {
    /// Build the backend from the raw service-account JSON carried in
    /// `FIREBASE_SERVICE_ACCOUNT`
    pub fn from_service_account_json(raw: &str) -> Result<Self, AppError> {
        let account: ServiceAccount = serde_json::from_str(raw)
            .map_err(|e| AppError::Storage(format!("invalid service account JSON: {e}")))?;
        let key = EncodingKey::from_rsa_pem(account.private_key.as_bytes())
            .map_err(|e| AppError::Storage(format!("invalid service account key: {e}")))?;

        Ok(Self {
            client: reqwest::Client::new(),
            project_id: account.project_id,
            client_email: account.client_email,
            token_uri: account.token_uri,
            key,
            token: Mutex::new(None),
        })
    }

    fn documents_url(&self) -> String {
        format!(
            "https://firestore.googleapis.com/v1/projects/{}/databases/(default)/documents",
            self.project_id
        )
    }

    fn document_name(&self, room_id: &str) -> String {
        format!(
            "projects/{}/databases/(default)/documents/rooms/{}",
            self.project_id, room_id
        )
    }

    async fn access_token(&self) -> Result<String, AppError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Utc::now() {
                return Ok(token.access_token.clone());
            }
        }

        let now = Utc::now();
        let claims = Claims {
            iss: &self.client_email,
            scope: FIRESTORE_SCOPE,
            aud: &self.token_uri,
            iat: now.timestamp(),
            exp: (now + Duration::hours(1)).timestamp(),
        };
        let assertion = encode(&Header::new(Algorithm::RS256), &claims, &self.key)
            .map_err(|e| AppError::Storage(format!("failed to sign token grant: {e}")))?;

        let response = self
            .client
            .post(&self.token_uri)
            .form(&[("grant_type", JWT_GRANT_TYPE), ("assertion", &assertion)])
            .send()
            .await?
            .error_for_status()?;
        let token: TokenResponse = response.json().await?;

        // refresh a minute early so in-flight saves never race expiry
        let expires_at = now + Duration::seconds(token.expires_in - 60);
        let access_token = token.access_token.clone();
        *cached = Some(CachedToken {
            access_token: token.access_token,
            expires_at,
        });

        Ok(access_token)
    }
}

#[async_trait]
impl Storage for FirestoreStorage {
    async fn load_rooms(&self) -> Result<Vec<PersistedRoom>, AppError> {
        let token = self.access_token().await?;
        let mut rooms = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .get(format!("{}/rooms", self.documents_url()))
                .bearer_auth(&token)
                .query(&[("pageSize", "300")]);
            if let Some(ref next) = page_token {
                request = request.query(&[("pageToken", next.as_str())]);
            }

            let page: Value = request.send().await?.error_for_status()?.json().await?;

            for document in page["documents"].as_array().unwrap_or(&Vec::new()) {
                let value = from_firestore_fields(&document["fields"]);
                match serde_json::from_value::<PersistedRoom>(value) {
                    Ok(room) => rooms.push(room),
                    Err(e) => warn!(
                        document = %document["name"],
                        "skipping undecodable room document: {e}"
                    ),
                }
            }

            match page["nextPageToken"].as_str() {
                Some(next) if !next.is_empty() => page_token = Some(next.to_string()),
                _ => break,
            }
        }

        Ok(rooms)
    }

    async fn save_rooms(&self, rooms: &[PersistedRoom]) -> Result<(), AppError> {
        if rooms.is_empty() {
            return Ok(());
        }
        let token = self.access_token().await?;

        for chunk in rooms.chunks(MAX_BATCH_WRITES) {
            let writes: Vec<Value> = chunk
                .iter()
                .map(|room| {
                    let fields = to_firestore_fields(&serde_json::to_value(room)?);
                    Ok(json!({
                        "update": {
                            "name": self.document_name(&room.id),
                            "fields": fields,
                        }
                    }))
                })
                .collect::<Result<_, AppError>>()?;

            self.client
                .post(format!("{}:batchWrite", self.documents_url()))
                .bearer_auth(&token)
                .json(&json!({ "writes": writes }))
                .send()
                .await?
                .error_for_status()?;
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        "firestore"
    }
}

/// Encode a JSON object's fields into Firestore's typed value map
pub(crate) fn to_firestore_fields(value: &Value) -> Value {
    let mut fields = Map::new();
    if let Value::Object(object) = value {
        for (key, entry) in object {
            fields.insert(key.clone(), to_firestore_value(entry));
        }
    }
    Value::Object(fields)
}

fn to_firestore_value(value: &Value) -> Value {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(b) => json!({ "booleanValue": b }),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                // Firestore integers travel as strings
                json!({ "integerValue": i.to_string() })
            } else {
                json!({ "doubleValue": n.as_f64() })
            }
        },
        Value::String(s) => json!({ "stringValue": s }),
        Value::Array(items) => {
            let values: Vec<Value> = items.iter().map(to_firestore_value).collect();
            json!({ "arrayValue": { "values": values } })
        },
        Value::Object(_) => json!({ "mapValue": { "fields": to_firestore_fields(value) } }),
    }
}

/// Decode a Firestore typed value map back into a JSON object
pub(crate) fn from_firestore_fields(fields: &Value) -> Value {
    let mut object = Map::new();
    if let Value::Object(map) = fields {
        for (key, entry) in map {
            object.insert(key.clone(), from_firestore_value(entry));
        }
    }
    Value::Object(object)
}

fn from_firestore_value(value: &Value) -> Value {
    let Some(object) = value.as_object() else {
        return Value::Null;
    };

    if let Some(s) = object.get("stringValue").and_then(Value::as_str) {
        return Value::String(s.to_string());
    }
    if let Some(b) = object.get("booleanValue").and_then(Value::as_bool) {
        return Value::Bool(b);
    }
    if let Some(i) = object.get("integerValue") {
        let parsed = match i {
            Value::String(s) => s.parse::<i64>().ok(),
            other => other.as_i64(),
        };
        if let Some(n) = parsed {
            return json!(n);
        }
    }
    if let Some(f) = object.get("doubleValue").and_then(Value::as_f64) {
        return json!(f);
    }
    if let Some(ts) = object.get("timestampValue").and_then(Value::as_str) {
        return Value::String(ts.to_string());
    }
    if let Some(array) = object.get("arrayValue") {
        let items = array["values"]
            .as_array()
            .map(|values| values.iter().map(from_firestore_value).collect())
            .unwrap_or_default();
        return Value::Array(items);
    }
    if let Some(map) = object.get("mapValue") {
        return from_firestore_fields(&map["fields"]);
    }

    Value::Null
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_mapping_roundtrip() {
        let original = json!({
            "id": "room-1",
            "name": "Cell",
            "createdAt": "2026-08-02T10:00:00Z",
            "settings": {
                "disappearingMessages": 5000,
                "isPrivate": false,
                "maxMembers": 50
            },
            "messages": [
                { "id": "m1", "content": "b64:abc", "edited": false, "replyTo": null },
                { "id": "m2", "reactions": { "👍": ["s1", "s2"] } }
            ]
        });

        let encoded = to_firestore_fields(&original);
        // spot-check the typed encoding
        assert_eq!(encoded["id"]["stringValue"], "room-1");
        assert_eq!(
            encoded["settings"]["mapValue"]["fields"]["disappearingMessages"]["integerValue"],
            "5000"
        );
        assert_eq!(
            encoded["messages"]["arrayValue"]["values"][0]["mapValue"]["fields"]["edited"]
                ["booleanValue"],
            false
        );

        let decoded = from_firestore_fields(&encoded);
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_integer_value_accepts_string_or_number() {
        let as_string = json!({ "integerValue": "42" });
        let as_number = json!({ "integerValue": 42 });
        assert_eq!(from_firestore_value(&as_string), json!(42));
        assert_eq!(from_firestore_value(&as_number), json!(42));
    }

    #[test]
    fn test_timestamp_value_decodes_to_iso_string() {
        let ts = json!({ "timestampValue": "2026-08-02T10:00:00Z" });
        assert_eq!(from_firestore_value(&ts), json!("2026-08-02T10:00:00Z"));
    }

    #[test]
    fn test_room_document_survives_mapping() {
        let room = crate::room::Room::new(
            "room-1".to_string(),
            "Cell".to_string(),
            "Alice".to_string(),
        );
        let value = serde_json::to_value(room.snapshot()).unwrap();
        let decoded = from_firestore_fields(&to_firestore_fields(&value));
        let parsed: PersistedRoom = serde_json::from_value(decoded).unwrap();
        assert_eq!(parsed.id, "room-1");
        assert_eq!(parsed.created_by, "Alice");
    }

    #[test]
    fn test_bad_service_account_is_rejected() {
        assert!(FirestoreStorage::from_service_account_json("not json").is_err());
        assert!(
            FirestoreStorage::from_service_account_json(
                r#"{"project_id":"p","private_key":"not a pem","client_email":"x@y.z"}"#
            )
            .is_err()
        );
    }
}
