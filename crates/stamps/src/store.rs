//! Backing stores for tiles and stamp records.
//!
//! Both traits return boxed futures so they stay dyn-compatible; the
//! pipeline holds them as `Arc<dyn ...>`. In-memory implementations live
//! here, filesystem ones in [`crate::fs_store`].

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use streaming::{TextureVersion, TileId};

use crate::error::{StorageError, StorageOp};
use crate::record::{Stamp, StampLog, StampQuery};

/// Type alias for a boxed future that can be sent between threads.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Encoded tile storage keyed by [`TileId`].
pub trait TileStore: Send + Sync {
    /// `Ok(None)` for a tile that was never written.
    fn load_tile(&self, id: TileId) -> BoxFuture<'_, Result<Option<Vec<u8>>, StorageError>>;

    /// Replace the stored tile. Readers must never observe a partial write.
    fn save_tile(&self, id: TileId, bytes: Vec<u8>) -> BoxFuture<'_, Result<(), StorageError>>;
}

/// Append-only log of committed stamps.
pub trait RecordStore: Send + Sync {
    fn append(&self, stamp: Stamp) -> BoxFuture<'_, Result<(), StorageError>>;

    /// Newest first.
    fn recent(&self, query: StampQuery) -> BoxFuture<'_, Result<Vec<Stamp>, StorageError>>;

    /// Stamps with `texture_version > version`, oldest first.
    fn since(&self, version: TextureVersion) -> BoxFuture<'_, Result<StampLog, StorageError>>;

    /// Highest version ever appended, including pruned stamps.
    fn latest_version(&self) -> BoxFuture<'_, Result<TextureVersion, StorageError>>;
}

/// Bounded stamp history shared by the memory and JSON record stores.
#[derive(Debug, Clone, Default)]
pub(crate) struct StampHistory {
    /// Highest version dropped by retention.
    pub pruned_through: TextureVersion,
    pub stamps: VecDeque<Stamp>,
}

impl StampHistory {
    /// Returns the stamps retention dropped, oldest first.
    pub fn push(&mut self, stamp: Stamp, retention: usize) -> Vec<Stamp> {
        self.stamps.push_back(stamp);
        let mut dropped = Vec::new();
        while self.stamps.len() > retention.max(1) {
            if let Some(old) = self.stamps.pop_front() {
                self.pruned_through = self.pruned_through.max(old.texture_version);
                dropped.push(old);
            }
        }
        dropped
    }

    pub fn recent(&self, query: &StampQuery) -> Vec<Stamp> {
        self.stamps
            .iter()
            .rev()
            .filter(|s| query.matches(s))
            .take(query.limit)
            .cloned()
            .collect()
    }

    pub fn since(&self, version: TextureVersion) -> StampLog {
        StampLog {
            stamps: self
                .stamps
                .iter()
                .filter(|s| s.texture_version > version)
                .cloned()
                .collect(),
            complete: self.pruned_through <= version,
        }
    }

    pub fn latest_version(&self) -> TextureVersion {
        self.stamps
            .back()
            .map(|s| s.texture_version)
            .unwrap_or(0)
            .max(self.pruned_through)
    }
}

/// Tiles held in a map. Supports injected save failures for tests and
/// drills.
#[derive(Default)]
pub struct MemoryTileStore {
    tiles: Mutex<HashMap<TileId, Vec<u8>>>,
    failing: Mutex<HashSet<TileId>>,
}

impl MemoryTileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every save of `id` fail until cleared.
    pub fn fail_saves_for(&self, id: TileId) {
        self.failing.lock().insert(id);
    }

    pub fn clear_failures(&self) {
        self.failing.lock().clear();
    }

    pub fn stored_tiles(&self) -> Vec<TileId> {
        let mut ids: Vec<TileId> = self.tiles.lock().keys().copied().collect();
        ids.sort();
        ids
    }
}

impl TileStore for MemoryTileStore {
    fn load_tile(&self, id: TileId) -> BoxFuture<'_, Result<Option<Vec<u8>>, StorageError>> {
        Box::pin(async move { Ok(self.tiles.lock().get(&id).cloned()) })
    }

    fn save_tile(&self, id: TileId, bytes: Vec<u8>) -> BoxFuture<'_, Result<(), StorageError>> {
        Box::pin(async move {
            if self.failing.lock().contains(&id) {
                return Err(
                    StorageError::new(StorageOp::SaveTile, "injected failure").for_tile(id)
                );
            }
            self.tiles.lock().insert(id, bytes);
            Ok(())
        })
    }
}

/// Record log kept in memory, trimmed to the newest `retention` stamps.
pub struct MemoryRecordStore {
    retention: usize,
    history: Mutex<StampHistory>,
    fail_appends: AtomicBool,
}

impl MemoryRecordStore {
    pub fn new(retention: usize) -> Self {
        Self {
            retention,
            history: Mutex::new(StampHistory::default()),
            fail_appends: AtomicBool::new(false),
        }
    }

    pub fn fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.history.lock().stamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryRecordStore {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl RecordStore for MemoryRecordStore {
    fn append(&self, stamp: Stamp) -> BoxFuture<'_, Result<(), StorageError>> {
        Box::pin(async move {
            if self.fail_appends.load(Ordering::SeqCst) {
                return Err(StorageError::new(StorageOp::AppendRecord, "injected failure"));
            }
            self.history.lock().push(stamp, self.retention);
            Ok(())
        })
    }

    fn recent(&self, query: StampQuery) -> BoxFuture<'_, Result<Vec<Stamp>, StorageError>> {
        Box::pin(async move { Ok(self.history.lock().recent(&query)) })
    }

    fn since(&self, version: TextureVersion) -> BoxFuture<'_, Result<StampLog, StorageError>> {
        Box::pin(async move { Ok(self.history.lock().since(version)) })
    }

    fn latest_version(&self) -> BoxFuture<'_, Result<TextureVersion, StorageError>> {
        Box::pin(async move { Ok(self.history.lock().latest_version()) })
    }
}

#[cfg(test)]
mod tests {
    use foundation::GeoBounds;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::record::fixtures::stamp;

    fn versions(stamps: &[Stamp]) -> Vec<TextureVersion> {
        stamps.iter().map(|s| s.texture_version).collect()
    }

    #[tokio::test]
    async fn memory_tiles_round_trip_and_inject_failures() {
        let store = MemoryTileStore::new();
        let id = TileId::new(2, 3);
        assert_eq!(store.load_tile(id).await.unwrap(), None);

        store.save_tile(id, vec![1, 2, 3]).await.unwrap();
        assert_eq!(store.load_tile(id).await.unwrap(), Some(vec![1, 2, 3]));

        store.fail_saves_for(id);
        let err = store.save_tile(id, vec![9]).await.unwrap_err();
        assert_eq!(err.op, StorageOp::SaveTile);
        assert_eq!(store.load_tile(id).await.unwrap(), Some(vec![1, 2, 3]));

        store.clear_failures();
        store.save_tile(id, vec![9]).await.unwrap();
        assert_eq!(store.stored_tiles(), vec![id]);
    }

    #[tokio::test]
    async fn recent_is_newest_first_and_filtered() {
        let store = MemoryRecordStore::new(10);
        store.append(stamp(1, 0.0, 0.0)).await.unwrap();
        store.append(stamp(2, 50.0, 100.0)).await.unwrap();
        store.append(stamp(3, 1.0, 1.0)).await.unwrap();

        let all = store.recent(StampQuery::default()).await.unwrap();
        assert_eq!(versions(&all), vec![3, 2, 1]);

        let near_origin = StampQuery {
            limit: 1,
            bounds: Some(GeoBounds::new(-5.0, 5.0, -5.0, 5.0)),
        };
        let hits = store.recent(near_origin).await.unwrap();
        assert_eq!(versions(&hits), vec![3]);
    }

    #[tokio::test]
    async fn retention_marks_log_incomplete() {
        let store = MemoryRecordStore::new(2);
        for v in 1..=4 {
            store.append(stamp(v, 0.0, 0.0)).await.unwrap();
        }
        assert_eq!(store.len(), 2);
        assert_eq!(store.latest_version().await.unwrap(), 4);

        let log = store.since(2).await.unwrap();
        assert!(log.complete);
        assert_eq!(versions(&log.stamps), vec![3, 4]);

        let log = store.since(1).await.unwrap();
        assert!(!log.complete);
    }

    #[tokio::test]
    async fn failed_append_leaves_log_unchanged() {
        let store = MemoryRecordStore::default();
        store.fail_appends(true);
        assert!(store.append(stamp(1, 0.0, 0.0)).await.is_err());
        assert!(store.is_empty());
        assert_eq!(store.latest_version().await.unwrap(), 0);
    }
}
