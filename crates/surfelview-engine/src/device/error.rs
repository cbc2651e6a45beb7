use std::fmt;
use std::thread::ThreadId;

use super::{BackendKind, ContextId};

/// Failure while creating, switching or initializing a native context.
///
/// Every variant describes an unusable graphics environment. The panicking-free
/// entry points (`try_*`) return it; the plain entry points hand it to [`fatal`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextError {
    /// No adapter (pixel format / visual) matches the request.
    NoAdapter(String),
    /// The backend refused to create the context.
    CreationFailed(String),
    /// The sharing context belongs to another backend.
    IncompatibleSharing {
        requested: BackendKind,
        sharing: BackendKind,
    },
    /// The context was deinitialized.
    Destroyed(ContextId),
    /// The context is current on another thread.
    CurrentElsewhere { id: ContextId, thread: ThreadId },
    /// One-time entry-point loading failed on first switch-in.
    BackendInit { id: ContextId, message: String },
}

impl fmt::Display for ContextError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextError::NoAdapter(msg) => write!(f, "no suitable adapter: {msg}"),
            ContextError::CreationFailed(msg) => write!(f, "cannot create context: {msg}"),
            ContextError::IncompatibleSharing { requested, sharing } => write!(
                f,
                "cannot share objects between a {requested} context and a {sharing} context"
            ),
            ContextError::Destroyed(id) => write!(f, "{id} has been deinitialized"),
            ContextError::CurrentElsewhere { id, thread } => {
                write!(f, "cannot make {id} current: it is current on thread {thread:?}")
            }
            ContextError::BackendInit { id, message } => {
                write!(f, "backend initialization failed for {id}: {message}")
            }
        }
    }
}

impl std::error::Error for ContextError {}

/// Logs `err` and terminates the process.
///
/// Nothing on the render path can proceed without a valid context, so these
/// errors are not recovered.
pub fn fatal(err: &ContextError) -> ! {
    log::error!("fatal graphics context error: {err}");
    std::process::abort()
}
