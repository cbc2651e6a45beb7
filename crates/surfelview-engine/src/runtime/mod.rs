//! Render thread runtime.
//!
//! Owns the thread that creates the windowless context and drives a
//! `RenderLoop`, and the command channel producers use to reach it.

mod render_thread;

pub use render_thread::{FrameCadence, RenderThread, RuntimeCommand, RuntimeConfig};
