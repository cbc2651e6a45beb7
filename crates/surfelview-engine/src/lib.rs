//! Surfelview engine crate.
//!
//! Hands point clouds and meshes from a reconstruction thread to a render
//! loop that owns the native rendering context, and wraps those contexts
//! behind a small thread-aware API.

pub mod camera;
pub mod core;
pub mod device;
pub mod geometry;
pub mod interop;
pub mod logging;
pub mod render;
pub mod runtime;
pub mod sync;
pub mod time;

mod error;

pub use crate::core::{Diagnostics, Visualizer};
pub use error::VisError;
