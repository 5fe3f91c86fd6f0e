//! Stamp ingestion onto the shared world texture.

pub mod config;
pub mod error;
pub mod fs_store;
pub mod pipeline;
pub mod raster;
pub mod rate_limit;
pub mod record;
pub mod request;
pub mod store;

pub use config::*;
pub use error::*;
pub use fs_store::*;
pub use pipeline::*;
pub use raster::*;
pub use rate_limit::*;
pub use record::*;
pub use request::*;
pub use store::*;
