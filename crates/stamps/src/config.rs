use std::time::Duration;

use foundation::RegionConfig;
use streaming::TileGrid;

/// Tunables for [`crate::StampPipeline`].
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub grid: TileGrid,
    pub region: RegionConfig,
    /// Decoded tiles kept in memory.
    pub cache_capacity: usize,
    /// How long a submission waits for the texture before giving up as busy.
    pub lock_timeout: Duration,
    pub default_zoom: f64,
    /// Accepted zoom range is `[region.min_zoom, max_zoom]`.
    pub max_zoom: f64,
    /// Upper bound on the encoded image a submission may carry.
    pub max_image_bytes: usize,
    /// Submitted images decoded at once; each may take up to
    /// [`crate::MAX_STAMP_DECODE_BYTES`].
    pub max_concurrent_decodes: usize,
    /// Buffered commit notifications per subscriber.
    pub commit_channel_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            grid: TileGrid::default(),
            region: RegionConfig::default(),
            cache_capacity: 10,
            lock_timeout: Duration::from_secs(10),
            default_zoom: 5.0,
            max_zoom: 10.0,
            max_image_bytes: 8 * 1024 * 1024,
            max_concurrent_decodes: 4,
            commit_channel_capacity: 256,
        }
    }
}

/// Per-user submission budget.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitConfig {
    /// Stamps a user may commit per window.
    pub max_stamps: u32,
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_stamps: 20,
            window: Duration::from_secs(3600),
        }
    }
}
