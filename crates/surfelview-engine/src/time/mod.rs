//! Frame timing.
//!
//! - one `FrameClock` per render loop; `tick()` once per drawn frame
//! - `FramePacer` decides when a continuously rendering runtime draws next

mod frame_clock;

pub use frame_clock::{FrameClock, FramePacer, FrameTime};
