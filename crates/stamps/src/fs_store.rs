//! Filesystem-backed stores.
//!
//! Tiles live at `<root>/tiles/{x}_{y}.png`. The stamp log is a JSON Lines
//! file with submitted images stored beside it. Whole-file writes go to a
//! sibling temp file that is then renamed over the target, so readers see
//! either the old or the new content.

use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use streaming::{TextureVersion, TileId};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{StorageError, StorageOp};
use crate::record::{Stamp, StampLog, StampQuery};
use crate::store::{BoxFuture, RecordStore, StampHistory, TileStore};

async fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await
}

pub struct FsTileStore {
    root: PathBuf,
}

impl FsTileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn tile_path(&self, id: TileId) -> PathBuf {
        self.root.join(id.content_path())
    }
}

impl TileStore for FsTileStore {
    fn load_tile(&self, id: TileId) -> BoxFuture<'_, Result<Option<Vec<u8>>, StorageError>> {
        Box::pin(async move {
            match tokio::fs::read(self.tile_path(id)).await {
                Ok(bytes) => Ok(Some(bytes)),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(StorageError::with_source(StorageOp::LoadTile, "read failed", e)
                    .for_tile(id)),
            }
        })
    }

    fn save_tile(&self, id: TileId, bytes: Vec<u8>) -> BoxFuture<'_, Result<(), StorageError>> {
        Box::pin(async move {
            write_atomic(&self.tile_path(id), &bytes)
                .await
                .map_err(|e| {
                    StorageError::with_source(StorageOp::SaveTile, "write failed", e).for_tile(id)
                })
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum LogEntry {
    /// Written first when the log is compacted.
    Pruned { through: TextureVersion },
    Stamp(Stamp),
}

struct LogState {
    history: StampHistory,
    /// Entries in the file, including ones retention already dropped.
    entries: usize,
    /// Set when an append may have left a partial line behind.
    needs_compaction: bool,
}

/// Stamp log kept as JSON Lines, one metadata entry per stamp.
///
/// Submitted images go to `images/{id}.png` next to the log. The history is
/// replayed once on first use and then served from memory; each append only
/// writes the new image and one line. The file is rewritten from memory when
/// it holds more than twice the retained entries.
pub struct JsonRecordStore {
    path: PathBuf,
    images: PathBuf,
    retention: usize,
    state: Mutex<Option<LogState>>,
}

impl JsonRecordStore {
    pub fn new(path: impl Into<PathBuf>, retention: usize) -> Self {
        let path = path.into();
        let images = path
            .parent()
            .map(|dir| dir.join("images"))
            .unwrap_or_else(|| PathBuf::from("images"));
        Self {
            path,
            images,
            retention: retention.max(1),
            state: Mutex::new(None),
        }
    }

    pub fn image_path(&self, stamp_id: &str) -> PathBuf {
        self.images.join(format!("{stamp_id}.png"))
    }

    /// Submitted image of a retained stamp, if it is still on disk.
    pub async fn stamp_image(&self, stamp_id: &str) -> Result<Option<Vec<u8>>, StorageError> {
        match tokio::fs::read(self.image_path(stamp_id)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::with_source(
                StorageOp::ReadRecords,
                format!("cannot read image of {stamp_id}"),
                e,
            )),
        }
    }

    async fn replay(&self) -> Result<LogState, StorageError> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
            Err(e) => {
                return Err(StorageError::with_source(
                    StorageOp::ReadRecords,
                    format!("cannot read {}", self.path.display()),
                    e,
                ));
            }
        };

        let torn_tail = !text.is_empty() && !text.ends_with('\n');
        let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
        let mut state = LogState {
            history: StampHistory::default(),
            entries: 0,
            needs_compaction: false,
        };
        for (n, line) in lines.iter().enumerate() {
            let entry = match serde_json::from_str::<LogEntry>(line) {
                Ok(entry) => entry,
                Err(e) if torn_tail && n + 1 == lines.len() => {
                    warn!(path = %self.path.display(), error = %e, "dropping torn stamp log entry");
                    state.needs_compaction = true;
                    break;
                }
                Err(e) => {
                    return Err(StorageError::with_source(
                        StorageOp::ReadRecords,
                        format!("stamp log is corrupt at line {}", n + 1),
                        e,
                    ));
                }
            };
            match entry {
                LogEntry::Pruned { through } => {
                    state.history.pruned_through = state.history.pruned_through.max(through);
                }
                LogEntry::Stamp(stamp) => {
                    state.history.push(stamp, self.retention);
                }
            }
            state.entries += 1;
        }
        debug!(
            path = %self.path.display(),
            stamps = state.history.stamps.len(),
            "stamp log loaded"
        );
        Ok(state)
    }

    async fn loaded<'a>(
        &self,
        guard: &'a mut Option<LogState>,
    ) -> Result<&'a mut LogState, StorageError> {
        if guard.is_none() {
            *guard = Some(self.replay().await?);
        }
        guard
            .as_mut()
            .ok_or_else(|| StorageError::new(StorageOp::ReadRecords, "stamp log not loaded"))
    }

    async fn append_line(&self, entry: &LogEntry) -> Result<(), StorageError> {
        let mut line = serde_json::to_vec(entry).map_err(|e| {
            StorageError::with_source(StorageOp::AppendRecord, "serialize failed", e)
        })?;
        line.push(b'\n');
        let write = async {
            if let Some(parent) = self.path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await?;
            file.write_all(&line).await?;
            file.sync_data().await
        };
        write.await.map_err(|e| {
            StorageError::with_source(
                StorageOp::AppendRecord,
                format!("cannot append to {}", self.path.display()),
                e,
            )
        })
    }

    /// Rewrite the log from the retained history.
    async fn compact(&self, state: &mut LogState) -> Result<(), StorageError> {
        let mut bytes = Vec::new();
        let header = LogEntry::Pruned {
            through: state.history.pruned_through,
        };
        serialize_line(&mut bytes, &header)?;
        for stamp in &state.history.stamps {
            serialize_line(&mut bytes, &LogEntry::Stamp(stamp.clone()))?;
        }
        write_atomic(&self.path, &bytes).await.map_err(|e| {
            StorageError::with_source(
                StorageOp::AppendRecord,
                format!("cannot write {}", self.path.display()),
                e,
            )
        })?;
        state.entries = state.history.stamps.len() + 1;
        state.needs_compaction = false;
        debug!(entries = state.entries, "stamp log compacted");
        Ok(())
    }
}

fn serialize_line(out: &mut Vec<u8>, entry: &LogEntry) -> Result<(), StorageError> {
    serde_json::to_writer(&mut *out, entry)
        .map_err(|e| StorageError::with_source(StorageOp::AppendRecord, "serialize failed", e))?;
    out.push(b'\n');
    Ok(())
}

impl RecordStore for JsonRecordStore {
    fn append(&self, mut stamp: Stamp) -> BoxFuture<'_, Result<(), StorageError>> {
        Box::pin(async move {
            let mut guard = self.state.lock().await;
            let state = self.loaded(&mut guard).await?;
            if state.needs_compaction {
                self.compact(state).await?;
            }

            let image_path = self.image_path(&stamp.id);
            write_atomic(&image_path, &stamp.image)
                .await
                .map_err(|e| {
                    StorageError::with_source(StorageOp::AppendRecord, "cannot write image", e)
                })?;
            stamp.image = Vec::new();

            if let Err(err) = self.append_line(&LogEntry::Stamp(stamp.clone())).await {
                state.needs_compaction = true;
                if let Err(e) = tokio::fs::remove_file(&image_path).await {
                    warn!(path = %image_path.display(), error = %e, "cannot remove orphaned image");
                }
                return Err(err);
            }
            state.entries += 1;

            for old in state.history.push(stamp, self.retention) {
                let path = self.image_path(&old.id);
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    if e.kind() != io::ErrorKind::NotFound {
                        warn!(path = %path.display(), error = %e, "cannot remove pruned image");
                    }
                }
            }
            if state.entries > 2 * self.retention {
                // The new line is already durable; a failed rewrite is retried
                // on the next append.
                if let Err(err) = self.compact(state).await {
                    warn!(error = %err, "stamp log compaction failed");
                    state.needs_compaction = true;
                }
            }
            Ok(())
        })
    }

    fn recent(&self, query: StampQuery) -> BoxFuture<'_, Result<Vec<Stamp>, StorageError>> {
        Box::pin(async move {
            let mut guard = self.state.lock().await;
            Ok(self.loaded(&mut guard).await?.history.recent(&query))
        })
    }

    fn since(&self, version: TextureVersion) -> BoxFuture<'_, Result<StampLog, StorageError>> {
        Box::pin(async move {
            let mut guard = self.state.lock().await;
            Ok(self.loaded(&mut guard).await?.history.since(version))
        })
    }

    fn latest_version(&self) -> BoxFuture<'_, Result<TextureVersion, StorageError>> {
        Box::pin(async move {
            let mut guard = self.state.lock().await;
            Ok(self.loaded(&mut guard).await?.history.latest_version())
        })
    }
}
