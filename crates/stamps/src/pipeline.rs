//! The stamp write path and the read views over the shared texture.
//!
//! Writers are serialized through one FIFO lane. A submission that gets the
//! lane runs on its own task, so dropping the caller's future cannot stop a
//! half-applied stamp. Each commit stages composited copies of every
//! affected tile, persists them, appends the stamp record and only then
//! publishes the new tiles and the next texture version together. When a
//! save or the append fails, tiles already written are restored from their
//! pre-images and the version stays where it was. While a commit is in
//! flight, reads of its tiles are answered with the pre-images, never with
//! what the store holds.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use streaming::{
    StampAccepted, StampSummary, TextureVersion, TextureVersionInfo, TileCache, TileChanges,
    TileId,
};
use tokio::sync::{Semaphore, broadcast};
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::error::{StampError, StorageError};
use crate::raster::{self, Tile};
use crate::record::{Stamp, StampQuery, now_ms};
use crate::request::{StampRequest, ValidatedStamp};
use crate::store::{RecordStore, TileStore};

/// Outcome of a committed stamp.
#[derive(Debug, Clone, PartialEq)]
pub struct StampReceipt {
    pub stamp_id: String,
    pub texture_version: TextureVersion,
    pub tiles: BTreeSet<TileId>,
}

impl From<StampReceipt> for StampAccepted {
    fn from(receipt: StampReceipt) -> Self {
        StampAccepted {
            stamp_id: receipt.stamp_id,
            texture_version: receipt.texture_version,
            tiles: receipt.tiles.into_iter().collect(),
        }
    }
}

struct StagedTile {
    id: TileId,
    previous: Arc<Tile>,
    updated: Arc<Tile>,
    bytes: Vec<u8>,
}

/// What readers are allowed to see.
struct TileView {
    cache: TileCache<Arc<Tile>>,
    /// Committed content of tiles an in-flight stamp is rewriting.
    pending: HashMap<TileId, Arc<Tile>>,
}

struct Shared {
    config: PipelineConfig,
    tiles: Arc<dyn TileStore>,
    records: Arc<dyn RecordStore>,
    view: Mutex<TileView>,
    version: AtomicU64,
    /// Bumped under the view lock whenever tiles go pending, are published
    /// or rolled back. A store load is only trusted if it did not move.
    epoch: AtomicU64,
    write_lane: Arc<tokio::sync::Mutex<()>>,
    decodes: Arc<Semaphore>,
    commits: broadcast::Sender<StampSummary>,
}

/// Shared handle to the world texture. Cloning is cheap.
#[derive(Clone)]
pub struct StampPipeline {
    inner: Arc<Shared>,
}

impl StampPipeline {
    /// Open the texture, resuming the version from the record store.
    pub async fn open(
        config: PipelineConfig,
        tiles: Arc<dyn TileStore>,
        records: Arc<dyn RecordStore>,
    ) -> Result<Self, StampError> {
        let version = records.latest_version().await?;
        let (commits, _) = broadcast::channel(config.commit_channel_capacity.max(1));
        let decodes = Arc::new(Semaphore::new(config.max_concurrent_decodes.max(1)));

        info!(
            texture_version = version,
            tiles_x = config.grid.tiles_x,
            tiles_y = config.grid.tiles_y,
            tile_width = config.grid.tile_width,
            tile_height = config.grid.tile_height,
            cache_capacity = config.cache_capacity,
            "stamp pipeline ready"
        );

        Ok(Self {
            inner: Arc::new(Shared {
                view: Mutex::new(TileView {
                    cache: TileCache::new(config.cache_capacity),
                    pending: HashMap::new(),
                }),
                config,
                tiles,
                records,
                version: AtomicU64::new(version),
                epoch: AtomicU64::new(0),
                write_lane: Arc::new(tokio::sync::Mutex::new(())),
                decodes,
                commits,
            }),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    pub fn current_version(&self) -> TextureVersion {
        self.inner.version.load(Ordering::Acquire)
    }

    pub fn version_info(&self, include_tiles: bool) -> TextureVersionInfo {
        let grid = self.inner.config.grid;
        TextureVersionInfo {
            texture_version: self.current_version(),
            grid,
            tiles: include_tiles.then(|| grid.all_tiles()),
        }
    }

    /// Notifications for every committed stamp, in commit order.
    pub fn subscribe(&self) -> broadcast::Receiver<StampSummary> {
        self.inner.commits.subscribe()
    }

    pub fn cached_tiles(&self) -> usize {
        self.inner.view.lock().cache.len()
    }

    /// Drop every decoded tile; the next reads go to the store.
    pub fn invalidate_cache(&self) {
        let mut view = self.inner.view.lock();
        view.cache.clear();
        self.inner.epoch.fetch_add(1, Ordering::AcqRel);
        debug!("tile cache cleared");
    }

    /// Validate, queue for the texture, and commit one stamp.
    pub async fn ingest(&self, request: StampRequest) -> Result<StampReceipt, StampError> {
        let queued_at = Instant::now();
        let lock_timeout = self.inner.config.lock_timeout;
        let decode_slot = self.inner.decodes.clone().acquire_owned();
        let permit = match tokio::time::timeout(lock_timeout, decode_slot).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(StampError::Internal("decode slots closed".to_string())),
            Err(_) => {
                let waited_ms = queued_at.elapsed().as_millis() as u64;
                warn!(waited_ms, user_id = %request.user_id, "no decode slot for stamp");
                return Err(StampError::Busy { waited_ms });
            }
        };
        let config = self.inner.config.clone();
        let stamp = tokio::task::spawn_blocking(move || {
            let _slot = permit;
            request.validate(&config)
        })
        .await??;

        let lane = self.inner.write_lane.clone();
        let guard = match tokio::time::timeout(lock_timeout, lane.lock_owned()).await {
            Ok(guard) => guard,
            Err(_) => {
                let waited_ms = queued_at.elapsed().as_millis() as u64;
                warn!(waited_ms, user_id = %stamp.user_id, "stamp gave up waiting for the texture");
                return Err(StampError::Busy { waited_ms });
            }
        };

        let stamp_id = Uuid::new_v4().to_string();
        let span = info_span!("stamp", stamp_id = %stamp_id, user_id = %stamp.user_id);
        let waited_ms = queued_at.elapsed().as_millis() as u64;
        let shared = self.inner.clone();

        let task = tokio::spawn(
            async move {
                let _lane = guard;
                debug!(waited_ms, "acquired texture");
                shared.commit(stamp_id, stamp).await
            }
            .instrument(span),
        );
        task.await?
    }

    /// Current content of one tile.
    pub async fn tile_snapshot(&self, id: TileId) -> Result<Arc<Tile>, StampError> {
        if !self.inner.config.grid.contains(id) {
            return Err(StampError::invalid("tile", format!("{id} is outside the grid")));
        }
        self.inner.read_tile(id).await
    }

    /// PNG-encoded tile plus the texture version it is at least as new as.
    pub async fn tile_png(&self, id: TileId) -> Result<(TextureVersion, Vec<u8>), StampError> {
        let version = self.current_version();
        let tile = self.tile_snapshot(id).await?;
        let bytes = tokio::task::spawn_blocking(move || tile.encode()).await??;
        Ok((version, bytes))
    }

    /// Tiles a reader at version `since` must refetch to catch up.
    pub async fn changed_tiles_since(
        &self,
        since: TextureVersion,
    ) -> Result<TileChanges, StampError> {
        let current = self.current_version();
        let grid = self.inner.config.grid;

        if since == current {
            return Ok(TileChanges {
                from: since,
                to: current,
                tiles: Vec::new(),
                full_refresh: false,
            });
        }
        if since > current {
            // The reader saw a texture this store never had.
            return Ok(TileChanges {
                from: since,
                to: current,
                tiles: grid.all_tiles(),
                full_refresh: true,
            });
        }

        let log = self.inner.records.since(since).await?;
        if !log.complete {
            return Ok(TileChanges {
                from: since,
                to: current,
                tiles: grid.all_tiles(),
                full_refresh: true,
            });
        }

        let tiles: BTreeSet<TileId> = log
            .stamps
            .iter()
            .filter(|s| s.texture_version <= current)
            .flat_map(|s| s.tiles.iter().copied())
            .collect();
        Ok(TileChanges {
            from: since,
            to: current,
            tiles: tiles.into_iter().collect(),
            full_refresh: false,
        })
    }

    pub async fn recent_stamps(&self, query: StampQuery) -> Result<Vec<StampSummary>, StampError> {
        let stamps = self.inner.records.recent(query).await?;
        Ok(stamps.iter().map(Stamp::summary).collect())
    }
}

impl Shared {
    async fn commit(
        &self,
        stamp_id: String,
        stamp: ValidatedStamp,
    ) -> Result<StampReceipt, StampError> {
        let grid = self.config.grid;
        let bounds = self.config.region.drawing_bounds(stamp.center, stamp.zoom);
        let affected = grid.affected_tiles(&bounds);
        let footprint = grid.footprint(&bounds);
        debug!(
            tiles = affected.len(),
            width = footprint.width,
            height = footprint.height,
            "compositing stamp"
        );

        let source = stamp.image;
        let scaled = Arc::new(
            tokio::task::spawn_blocking(move || {
                raster::scale_to(&source, footprint.width, footprint.height)
            })
            .await?,
        );

        let mut staged = Vec::with_capacity(affected.len());
        for &id in &affected {
            let previous = self.tile_for_write(id).await?;
            let offsets = grid.placements(&footprint, id);
            let scaled = scaled.clone();
            let base = previous.clone();
            let (updated, bytes) = tokio::task::spawn_blocking(move || {
                let mut tile = Tile::clone(&base);
                for offset in offsets {
                    raster::composite(&mut tile.image, &scaled, offset);
                }
                let bytes = tile.encode()?;
                Ok::<_, StorageError>((tile, bytes))
            })
            .await??;
            staged.push(StagedTile {
                id,
                previous,
                updated: Arc::new(updated),
                bytes,
            });
        }

        {
            let mut view = self.view.lock();
            for tile in &staged {
                view.pending.insert(tile.id, tile.previous.clone());
            }
            self.epoch.fetch_add(1, Ordering::AcqRel);
        }

        for written in 0..staged.len() {
            let tile = &mut staged[written];
            let bytes = std::mem::take(&mut tile.bytes);
            if let Err(err) = self.tiles.save_tile(tile.id, bytes).await {
                error!(tile = %tile.id, error = %err, "tile save failed; rolling back");
                self.roll_back(&staged, written).await;
                return Err(err.into());
            }
        }

        let version = self.version.load(Ordering::Acquire) + 1;
        let record = Stamp {
            id: stamp_id.clone(),
            latitude: stamp.center.latitude(),
            longitude: stamp.center.longitude(),
            zoom_level: stamp.zoom,
            user_id: stamp.user_id,
            created_at_ms: now_ms(),
            texture_version: version,
            tiles: affected.clone(),
            image: stamp.image_bytes,
        };
        let summary = record.summary();
        if let Err(err) = self.records.append(record).await {
            error!(error = %err, "stamp record append failed; rolling back");
            self.roll_back(&staged, staged.len()).await;
            return Err(err.into());
        }

        {
            let mut view = self.view.lock();
            for tile in staged {
                view.pending.remove(&tile.id);
                if let Some((evicted, _)) = view.cache.put(tile.id, tile.updated) {
                    debug!(tile = %evicted, "evicted tile from cache");
                }
            }
            self.version.store(version, Ordering::Release);
            self.epoch.fetch_add(1, Ordering::AcqRel);
        }

        // No subscribers is fine.
        let _ = self.commits.send(summary);
        info!(
            texture_version = version,
            tiles = affected.len(),
            "stamp committed"
        );

        Ok(StampReceipt {
            stamp_id,
            texture_version: version,
            tiles: affected,
        })
    }

    /// Restore pre-images of tiles already written by a failed commit and
    /// release every pending tile of `staged`.
    ///
    /// Best effort: a tile that cannot be restored keeps the uncommitted
    /// content in the store, so its pre-image is pinned in the cache instead
    /// and readers keep seeing committed content while it stays there.
    async fn roll_back(&self, staged: &[StagedTile], written: usize) {
        let mut unrestored = Vec::new();
        for tile in &staged[..written] {
            let previous = tile.previous.clone();
            let restored = match tokio::task::spawn_blocking(move || previous.encode()).await {
                Ok(result) => match result {
                    Ok(bytes) => self.tiles.save_tile(tile.id, bytes).await,
                    Err(err) => Err(err),
                },
                Err(err) => {
                    error!(tile = %tile.id, error = %err, "pre-image encode task failed");
                    unrestored.push(tile);
                    continue;
                }
            };
            if let Err(err) = restored {
                error!(
                    tile = %tile.id,
                    error = %err,
                    "tile rollback failed; store holds uncommitted content"
                );
                unrestored.push(tile);
            }
        }

        let mut view = self.view.lock();
        for tile in staged {
            view.pending.remove(&tile.id);
            view.cache.remove(&tile.id);
        }
        for tile in unrestored {
            view.cache.put(tile.id, tile.previous.clone());
        }
        self.epoch.fetch_add(1, Ordering::AcqRel);
        warn!(tiles = written, "stamp rolled back");
    }

    /// Only called while holding the write lane, so nothing is pending.
    async fn tile_for_write(&self, id: TileId) -> Result<Arc<Tile>, StampError> {
        let cached = self.view.lock().cache.get(&id).cloned();
        match cached {
            Some(tile) => Ok(tile),
            None => self.load_from_store(id).await,
        }
    }

    fn visible(view: &mut TileView, id: TileId) -> Option<Arc<Tile>> {
        if let Some(tile) = view.cache.get(&id) {
            return Some(tile.clone());
        }
        view.pending.get(&id).cloned()
    }

    async fn read_tile(&self, id: TileId) -> Result<Arc<Tile>, StampError> {
        loop {
            let epoch = {
                let mut view = self.view.lock();
                if let Some(tile) = Self::visible(&mut view, id) {
                    return Ok(tile);
                }
                self.epoch.load(Ordering::Acquire)
            };

            let loaded = self.load_from_store(id).await?;

            let mut view = self.view.lock();
            if let Some(tile) = Self::visible(&mut view, id) {
                return Ok(tile);
            }
            // A commit started or finished during the load, so the bytes may
            // belong to a stamp that is not committed. Look again.
            if self.epoch.load(Ordering::Acquire) != epoch {
                debug!(tile = %id, "tile changed while loading; retrying");
                continue;
            }
            if let Some((evicted, _)) = view.cache.put(id, loaded.clone()) {
                debug!(tile = %evicted, "evicted tile from cache");
            }
            return Ok(loaded);
        }
    }

    async fn load_from_store(&self, id: TileId) -> Result<Arc<Tile>, StampError> {
        let bytes = self.tiles.load_tile(id).await?;
        let grid = self.config.grid;
        let tile = tokio::task::spawn_blocking(move || match bytes {
            Some(bytes) => Tile::decode(id, &bytes, &grid),
            None => Ok(Tile::blank(id, &grid)),
        })
        .await??;
        debug!(tile = %id, "loaded tile from store");
        Ok(Arc::new(tile))
    }
}
