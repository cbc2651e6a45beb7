use std::fmt;

use crate::interop::InteropBufferKind;

/// Error returned by the visualization hand-off API.
#[derive(Debug, Clone, PartialEq)]
pub enum VisError {
    /// An operation was called in a state where it is a contract violation.
    InvalidState(String),
    /// A producer handed over a snapshot that cannot be drawn.
    InvalidSnapshot(String),
    /// An interop operation ran without its context current on this thread.
    ContextNotCurrent,
    /// The buffer kind was already registered.
    AlreadyRegistered(InteropBufferKind),
    /// The buffer kind is not registered.
    NotRegistered(InteropBufferKind),
    /// The render thread could not complete interop registration.
    InteropSetupFailed(String),
    /// A newer screenshot request replaced this one before it was serviced.
    ScreenshotSuperseded,
    /// Capturing or writing a screenshot failed.
    Screenshot(String),
    /// The render loop has shut down.
    ShutDown,
}

impl VisError {
    pub(crate) fn invalid_state(msg: impl Into<String>) -> Self {
        VisError::InvalidState(msg.into())
    }

    pub(crate) fn invalid_snapshot(msg: impl Into<String>) -> Self {
        VisError::InvalidSnapshot(msg.into())
    }
}

impl fmt::Display for VisError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VisError::InvalidState(msg) => write!(f, "invalid state: {msg}"),
            VisError::InvalidSnapshot(msg) => write!(f, "invalid snapshot: {msg}"),
            VisError::ContextNotCurrent => {
                f.write_str("the owning context is not current on this thread")
            }
            VisError::AlreadyRegistered(kind) => write!(f, "{kind} buffer is already registered"),
            VisError::NotRegistered(kind) => write!(f, "{kind} buffer is not registered"),
            VisError::InteropSetupFailed(msg) => write!(f, "interop setup failed: {msg}"),
            VisError::ScreenshotSuperseded => {
                f.write_str("screenshot request was replaced by a newer one")
            }
            VisError::Screenshot(msg) => write!(f, "screenshot failed: {msg}"),
            VisError::ShutDown => f.write_str("render loop has shut down"),
        }
    }
}

impl std::error::Error for VisError {}
