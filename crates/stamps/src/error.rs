use std::fmt;

use foundation::CoordinateError;
use streaming::TileId;
use thiserror::Error;

/// Storage operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageOp {
    LoadTile,
    SaveTile,
    DecodeTile,
    EncodeTile,
    AppendRecord,
    ReadRecords,
}

impl fmt::Display for StorageOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StorageOp::LoadTile => "load tile",
            StorageOp::SaveTile => "save tile",
            StorageOp::DecodeTile => "decode tile",
            StorageOp::EncodeTile => "encode tile",
            StorageOp::AppendRecord => "append stamp record",
            StorageOp::ReadRecords => "read stamp records",
        };
        f.write_str(s)
    }
}

/// Failure reported by a tile or record store.
#[derive(Debug)]
pub struct StorageError {
    pub op: StorageOp,
    pub tile: Option<TileId>,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.tile {
            Some(tile) => write!(f, "{} {tile} failed: {}", self.op, self.message),
            None => write!(f, "{} failed: {}", self.op, self.message),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as _)
    }
}

impl StorageError {
    pub fn new(op: StorageOp, message: impl Into<String>) -> Self {
        Self {
            op,
            tile: None,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        op: StorageOp,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            op,
            tile: None,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn for_tile(mut self, tile: TileId) -> Self {
        self.tile = Some(tile);
        self
    }
}

/// Every way a stamp submission or texture read can fail.
#[derive(Debug, Error)]
pub enum StampError {
    #[error("invalid {field}: {reason}")]
    InvalidInput { field: &'static str, reason: String },

    #[error("stamp rate limit reached; retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("texture is busy; gave up after {waited_ms} ms")]
    Busy { waited_ms: u64 },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl StampError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        StampError::InvalidInput {
            field,
            reason: reason.into(),
        }
    }

    /// Whether the same request may succeed if sent again later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StampError::RateLimited { .. } | StampError::Busy { .. } | StampError::Storage(_)
        )
    }

    pub fn field(&self) -> Option<&'static str> {
        match self {
            StampError::InvalidInput { field, .. } => Some(field),
            _ => None,
        }
    }
}

impl From<CoordinateError> for StampError {
    fn from(err: CoordinateError) -> Self {
        let field = match err {
            CoordinateError::Latitude(_) => "latitude",
            CoordinateError::Longitude(_) => "longitude",
        };
        StampError::invalid(field, err.to_string())
    }
}

impl From<tokio::task::JoinError> for StampError {
    fn from(err: tokio::task::JoinError) -> Self {
        StampError::Internal(format!("background task failed: {err}"))
    }
}
