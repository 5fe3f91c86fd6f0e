pub mod cache;
pub mod protocol;
pub mod tile;

pub use cache::*;
pub use protocol::*;
pub use tile::*;
