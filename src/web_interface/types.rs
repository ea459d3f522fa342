use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::file_management::types::EntryKind;

/// API error payload
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

#[derive(Debug, Serialize)]
pub struct ContentResponse {
    pub content: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub active_connections: usize,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub stats: Vec<String>,
}

/// `?path=` of `GET /files/content`
#[derive(Debug, Deserialize)]
pub struct ContentQuery {
    pub path: String,
}

/// Any query string; only `token` is looked at, as a last-resort credential.
#[derive(Debug, Default, Deserialize)]
pub struct TokenQuery {
    pub token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateRequest {
    pub path: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
}

#[derive(Debug, Deserialize)]
pub struct PathRequest {
    pub path: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameRequest {
    pub old_path: String,
    pub new_path: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_bodies_use_client_field_names() {
        let create: CreateRequest =
            serde_json::from_value(json!({"path": "/src", "type": "folder"})).unwrap();
        assert_eq!(create.kind, EntryKind::Folder);

        let rename: RenameRequest =
            serde_json::from_value(json!({"oldPath": "/a.js", "newPath": "/b.js"})).unwrap();
        assert_eq!(rename.old_path, "/a.js");
        assert_eq!(rename.new_path, "/b.js");
    }

    #[test]
    fn health_is_camel_case() {
        let health = HealthResponse {
            status: "ok".to_string(),
            active_connections: 2,
            timestamp: Utc::now(),
        };
        let value = serde_json::to_value(&health).unwrap();
        assert_eq!(value["status"], "ok");
        assert_eq!(value["activeConnections"], 2);
        assert!(value["timestamp"].is_string());
    }
}
