pub mod geodesy;
pub mod projection;
pub mod sphere;

pub use geodesy::*;
pub use projection::*;
pub use sphere::*;
