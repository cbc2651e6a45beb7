//! Registration of rendering buffers for compute-side access.

mod request;
mod table;

pub use request::{DebugFlags, InteropBindings, InteropRequest, NEIGHBOR_COUNT};
pub use table::{InteropBuffer, InteropBufferKind, InteropResourceTable};
