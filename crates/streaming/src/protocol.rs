//! Wire types shared by the stamp server and its clients.
//!
//! All messages are JSON with camelCase field names. Image payloads travel as
//! standard base64 strings.

use serde::{Deserialize, Serialize};

use crate::tile::{TileGrid, TileId};

/// Monotonic world-texture version.
pub type TextureVersion = u64;

/// Body of a stamp submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StampSubmission {
    /// Base64-encoded image (PNG).
    pub image: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zoom_level: Option<f64>,
    pub user_id: String,
}

/// Successful stamp commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StampAccepted {
    pub stamp_id: String,
    pub texture_version: TextureVersion,
    pub tiles: Vec<TileId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextureVersionInfo {
    pub texture_version: TextureVersion,
    pub grid: TileGrid,
    /// Present when the caller asked for the full tile list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tiles: Option<Vec<TileId>>,
}

/// Tiles touched by stamps committed in `(from, to]`.
///
/// `full_refresh` is set when the stamp log no longer reaches back to `from`;
/// readers should then refetch every tile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TileChanges {
    pub from: TextureVersion,
    pub to: TextureVersion,
    pub tiles: Vec<TileId>,
    pub full_refresh: bool,
}

/// Stamp metadata for activity feeds; image bytes are not included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StampSummary {
    pub id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub zoom_level: f64,
    pub user_id: String,
    pub created_at_ms: u64,
    pub texture_version: TextureVersion,
    pub tiles: Vec<TileId>,
}

/// Server-to-client messages on the stamp activity feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedMessage {
    #[serde(rename_all = "camelCase")]
    Hello {
        session_id: String,
        texture_version: TextureVersion,
    },
    StampCommitted { stamp: StampSummary },
    /// Notifications were dropped; refetch changes since the last version seen.
    #[serde(rename_all = "camelCase")]
    Resync { texture_version: TextureVersion },
}

/// Error body returned for any rejected request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub error: String,
    pub code: ErrorCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub retryable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidInput,
    RateLimited,
    Busy,
    StorageFailure,
    NotFound,
    Internal,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn submission_accepts_missing_zoom() {
        let body = json!({
            "image": "aGk=",
            "latitude": 12.5,
            "longitude": -40.0,
            "userId": "u-1",
        });
        let sub: StampSubmission = serde_json::from_value(body).unwrap();
        assert_eq!(sub.zoom_level, None);
        assert_eq!(sub.user_id, "u-1");
    }

    #[test]
    fn version_info_omits_tiles_unless_requested() {
        let info = TextureVersionInfo {
            texture_version: 3,
            grid: TileGrid::default(),
            tiles: None,
        };
        let v = serde_json::to_value(&info).unwrap();
        assert_eq!(v["textureVersion"], 3);
        assert_eq!(v["grid"]["tilesX"], 8);
        assert!(v.get("tiles").is_none());
    }

    #[test]
    fn feed_messages_are_tagged() {
        let msg = FeedMessage::Resync { texture_version: 7 };
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v, json!({ "type": "resync", "textureVersion": 7 }));

        let hello: FeedMessage = serde_json::from_value(json!({
            "type": "hello",
            "sessionId": "s-1",
            "textureVersion": 2,
        }))
        .unwrap();
        assert_eq!(
            hello,
            FeedMessage::Hello {
                session_id: "s-1".to_string(),
                texture_version: 2,
            }
        );
    }

    #[test]
    fn error_code_is_snake_case() {
        let body = ErrorBody {
            error: "latitude 91 outside [-90, 90]".to_string(),
            code: ErrorCode::InvalidInput,
            field: Some("latitude".to_string()),
            retryable: false,
        };
        let v = serde_json::to_value(&body).unwrap();
        assert_eq!(v["code"], "invalid_input");
        assert_eq!(v["field"], "latitude");
    }
}
