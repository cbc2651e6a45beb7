//! Native rendering contexts.
//!
//! This module is responsible for:
//! - creating windowless contexts on the gpu (wgpu) or software backend
//! - tracking the context current on each thread and switching it
//! - one-time backend initialization on first switch-in
//! - buffer objects and offscreen frame targets owned by a context

mod buffer;
mod context;
mod error;
mod frame;
mod gpu;
mod init;
mod manager;
mod software;

pub use buffer::{BufferId, BufferObject, BufferRole};
pub use context::{ContextHandle, ContextId};
pub use error::{ContextError, fatal};
pub use frame::FrameTarget;
pub use gpu::{GpuContext, GpuTarget};
pub use init::{BACKEND_ENV_VAR, BackendKind, ContextConfig};
pub use manager::ContextManager;
pub use software::{SOFTWARE_MAX_BUFFER_SIZE, SoftwareContext, SoftwareTarget};
