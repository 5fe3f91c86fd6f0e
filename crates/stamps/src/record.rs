use std::collections::BTreeSet;
use std::time::{SystemTime, UNIX_EPOCH};

use foundation::{GeoBounds, GeoCoordinate};
use serde::{Deserialize, Serialize};
use streaming::{StampSummary, TextureVersion, TileId};

/// A committed stamp as kept by the record store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stamp {
    pub id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub zoom_level: f64,
    pub user_id: String,
    pub created_at_ms: u64,
    /// Texture version this stamp produced.
    pub texture_version: TextureVersion,
    pub tiles: BTreeSet<TileId>,
    /// Submitted image as received. Never part of the serialized record;
    /// stores that persist images keep them as separate blobs, and records
    /// read back from them leave this empty.
    #[serde(skip)]
    pub image: Vec<u8>,
}

impl Stamp {
    pub fn center(&self) -> GeoCoordinate {
        GeoCoordinate::new(self.latitude, self.longitude)
    }

    pub fn summary(&self) -> StampSummary {
        StampSummary {
            id: self.id.clone(),
            latitude: self.latitude,
            longitude: self.longitude,
            zoom_level: self.zoom_level,
            user_id: self.user_id.clone(),
            created_at_ms: self.created_at_ms,
            texture_version: self.texture_version,
            tiles: self.tiles.iter().copied().collect(),
        }
    }
}

/// Filter for recent-activity listings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StampQuery {
    pub limit: usize,
    /// Only stamps centred inside these bounds.
    pub bounds: Option<GeoBounds>,
}

impl Default for StampQuery {
    fn default() -> Self {
        Self {
            limit: 50,
            bounds: None,
        }
    }
}

impl StampQuery {
    pub fn matches(&self, stamp: &Stamp) -> bool {
        self.bounds.is_none_or(|b| b.contains(stamp.center()))
    }
}

/// Stamps committed after some version, oldest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StampLog {
    pub stamps: Vec<Stamp>,
    /// False when retention already dropped stamps newer than the requested
    /// version, so `stamps` is not the whole story.
    pub complete: bool,
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
