pub mod bounds;
pub mod math;

// Foundation crate: small, well-tested geodesy primitives only.
pub use bounds::*;
pub use math::*;
