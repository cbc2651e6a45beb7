//! Render camera: pinhole intrinsics, orbit view state and per-frame snapshots.

mod pinhole;
mod state;
mod viewport;

pub use pinhole::PinholeCamera;
pub use state::{CameraState, OrbitParameters, ViewSnapshot};
pub use viewport::Viewport;
