use std::cell::RefCell;
use std::sync::Arc;

use super::context::{NativeContext, NativeKind};
use super::gpu::GpuContext;
use super::software::SoftwareContext;
use super::{BackendKind, ContextConfig, ContextError, ContextHandle, ContextId, fatal};

thread_local! {
    /// The context current on this thread, if any.
    static CURRENT: RefCell<Option<Arc<NativeContext>>> = const { RefCell::new(None) };
}

pub(crate) fn is_current_on_this_thread(native: &Arc<NativeContext>) -> bool {
    CURRENT.with(|current| {
        current
            .borrow()
            .as_ref()
            .is_some_and(|c| Arc::ptr_eq(c, native))
    })
}

/// Clears the thread's current context if it is `native`.
pub(crate) fn forget_if_current(native: &Arc<NativeContext>) {
    CURRENT.with(|current| {
        let mut current = current.borrow_mut();
        if current.as_ref().is_some_and(|c| Arc::ptr_eq(c, native)) {
            *current = None;
        }
    });
    native.release_from_current_thread();
}

/// Creates, attaches and switches native contexts.
///
/// Exactly one context is current per thread, and [`switch_to`](Self::switch_to)
/// is the only way to change it. A context is never current on two threads at
/// once; attempting that is a make-current failure.
#[derive(Debug, Clone, Default)]
pub struct ContextManager {
    config: ContextConfig,
}

impl ContextManager {
    pub fn new(config: ContextConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// Creates a context that is not bound to any visible surface.
    ///
    /// With `sharing`, GPU objects of the new context are shared with it; the
    /// sharing context must use the configured backend.
    pub fn try_create_windowless(
        &self,
        sharing: Option<&ContextHandle>,
    ) -> Result<ContextHandle, ContextError> {
        let shared_native = sharing.and_then(ContextHandle::native);
        if let Some(native) = shared_native {
            if native.is_destroyed() {
                return Err(ContextError::Destroyed(native.id()));
            }
            if native.backend() != self.config.backend {
                return Err(ContextError::IncompatibleSharing {
                    requested: self.config.backend,
                    sharing: native.backend(),
                });
            }
        }

        let kind = match shared_native.map(|n| n.kind()) {
            Some(NativeKind::Gpu(gpu)) => NativeKind::Gpu(gpu.clone()),
            Some(NativeKind::Software(soft)) => NativeKind::Software(soft.share()),
            None => match self.config.backend {
                BackendKind::Gpu => {
                    NativeKind::Gpu(pollster::block_on(GpuContext::new(&self.config))?)
                }
                BackendKind::Software => NativeKind::Software(SoftwareContext::new()),
            },
        };

        let native = NativeContext::new(kind);
        log::info!(
            "created windowless {} context {}{}",
            native.backend(),
            native.id(),
            shared_native
                .map(|s| format!(" sharing with {}", s.id()))
                .unwrap_or_default()
        );
        Ok(ContextHandle::owning(native))
    }

    /// Like [`try_create_windowless`](Self::try_create_windowless), but a
    /// failure terminates the process.
    pub fn create_windowless(&self, sharing: Option<&ContextHandle>) -> ContextHandle {
        self.try_create_windowless(sharing)
            .unwrap_or_else(|err| fatal(&err))
    }

    /// Wraps whatever context is current on the calling thread.
    ///
    /// The returned handle does not own the context and never needs backend
    /// initialization. It is empty if nothing is current.
    pub fn attach_to_current() -> ContextHandle {
        let native = CURRENT.with(|current| current.borrow().clone());
        ContextHandle::borrowing(native)
    }

    /// Releases `handle` without destroying its context.
    pub fn detach(mut handle: ContextHandle) {
        handle.detach();
    }

    /// Identity of the context current on the calling thread.
    pub fn current_id() -> Option<ContextId> {
        CURRENT.with(|current| current.borrow().as_ref().map(|n| n.id()))
    }

    /// Makes `handle` current on the calling thread.
    ///
    /// Returns a handle wrapping the previously current context (possibly
    /// empty) so the caller can restore it. Switching to an empty handle leaves
    /// no context current. The first switch-in of a freshly created context
    /// loads backend entry points; on failure nothing changes.
    pub fn try_switch_to(handle: &ContextHandle) -> Result<ContextHandle, ContextError> {
        let previous = Self::attach_to_current();

        match handle.native() {
            None => {
                if let Some(prev) = previous.native() {
                    prev.release_from_current_thread();
                }
                CURRENT.with(|current| *current.borrow_mut() = None);
            }
            Some(target) => {
                if !previous.same_context(handle) {
                    target.bind_to_current_thread()?;
                    if let Some(prev) = previous.native() {
                        prev.release_from_current_thread();
                    }
                    CURRENT.with(|current| *current.borrow_mut() = Some(target.clone()));
                } else if target.is_destroyed() {
                    return Err(ContextError::Destroyed(target.id()));
                }

                if handle.take_backend_init() {
                    if let Err(err) = target.load_entry_points() {
                        handle.restore_backend_init();
                        if !previous.same_context(handle) {
                            target.release_from_current_thread();
                            if let Some(prev) = previous.native() {
                                let _ = prev.bind_to_current_thread();
                            }
                            CURRENT.with(|current| *current.borrow_mut() = previous.native().cloned());
                        }
                        return Err(err);
                    }
                    log::debug!("loaded backend entry points for {}", target.id());
                }
            }
        }

        log::debug!(
            "switched context {:?} -> {:?}",
            previous.id(),
            handle.id()
        );
        Ok(previous)
    }

    /// Like [`try_switch_to`](Self::try_switch_to), but a failure terminates
    /// the process.
    pub fn switch_to(handle: &ContextHandle) -> ContextHandle {
        Self::try_switch_to(handle).unwrap_or_else(|err| fatal(&err))
    }
}
