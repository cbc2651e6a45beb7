//! Condition-variable handshakes between external threads and the render
//! thread.

mod init_barrier;
mod screenshot;

pub use init_barrier::{InitBarrier, InitPhase};
pub use screenshot::{ScreenshotHandshake, ScreenshotJob, ScreenshotOutcome};
