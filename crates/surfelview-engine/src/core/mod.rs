//! Producer-facing contract.
//!
//! `Visualizer` is the handle external threads use to publish geometry, move
//! the camera and request screenshots. It shares one `Shared` block with the
//! render loop and never touches a rendering context itself.

mod shared;
mod visualizer;

pub(crate) use shared::Shared;
pub use visualizer::{Diagnostics, Visualizer};
