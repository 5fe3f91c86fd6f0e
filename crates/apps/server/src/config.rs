use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use stamps::{PipelineConfig, RateLimitConfig};
use streaming::TileGrid;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub data_root: PathBuf,
    pub pipeline: PipelineConfig,
    pub rate_limit: RateLimitConfig,
    pub record_retention: usize,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let lookup: &Lookup = &lookup;
        let addr_raw = lookup("STAMP_ADDR").unwrap_or_else(|| "127.0.0.1:9200".to_string());
        let addr: SocketAddr = addr_raw
            .parse()
            .map_err(|e| format!("invalid STAMP_ADDR {addr_raw:?}: {e}"))?;

        let defaults = PipelineConfig::default();
        let tile_size = env_var_u32(lookup, "STAMP_TILE_SIZE", defaults.grid.tile_width);
        let grid = TileGrid::new(
            env_var_u32(lookup, "STAMP_TILES_X", defaults.grid.tiles_x),
            env_var_u32(lookup, "STAMP_TILES_Y", defaults.grid.tiles_y),
            tile_size,
            tile_size,
        );

        let pipeline = PipelineConfig {
            grid,
            cache_capacity: env_var_usize(lookup, "STAMP_CACHE_TILES", defaults.cache_capacity),
            lock_timeout: Duration::from_millis(env_var_u64(
                lookup,
                "STAMP_LOCK_TIMEOUT_MS",
                defaults.lock_timeout.as_millis() as u64,
            )),
            default_zoom: env_var_f64(lookup, "STAMP_DEFAULT_ZOOM", defaults.default_zoom),
            max_zoom: env_var_f64(lookup, "STAMP_MAX_ZOOM", defaults.max_zoom),
            max_image_bytes: env_var_usize(
                lookup,
                "STAMP_MAX_IMAGE_BYTES",
                defaults.max_image_bytes,
            ),
            max_concurrent_decodes: env_var_usize(
                lookup,
                "STAMP_MAX_DECODES",
                defaults.max_concurrent_decodes,
            ),
            ..defaults
        };

        let rate_defaults = RateLimitConfig::default();
        let rate_limit = RateLimitConfig {
            max_stamps: env_var_u32(lookup, "STAMP_RATE_LIMIT", rate_defaults.max_stamps),
            window: Duration::from_secs(env_var_u64(
                lookup,
                "STAMP_RATE_WINDOW_SECS",
                rate_defaults.window.as_secs(),
            )),
        };

        Ok(Self {
            addr,
            data_root: lookup("STAMP_DATA_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("data/stamps")),
            pipeline,
            rate_limit,
            record_retention: env_var_usize(lookup, "STAMP_RECORD_RETENTION", 500),
        })
    }

    /// JSON body limit: base64 inflates the image by a third, plus room for
    /// the other fields.
    pub fn max_body_bytes(&self) -> usize {
        self.pipeline.max_image_bytes / 3 * 4 + 64 * 1024
    }
}

type Lookup<'a> = dyn Fn(&str) -> Option<String> + 'a;

fn env_var_u32(lookup: &Lookup, key: &str, default: u32) -> u32 {
    lookup(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_var_u64(lookup: &Lookup, key: &str, default: u64) -> u64 {
    lookup(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_var_usize(lookup: &Lookup, key: &str, default: usize) -> usize {
    lookup(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_var_f64(lookup: &Lookup, key: &str, default: f64) -> f64 {
    lookup(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
