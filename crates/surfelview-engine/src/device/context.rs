use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, ThreadId};

use anyhow::Result;

use super::gpu::GpuContext;
use super::manager;
use super::software::SoftwareContext;
use super::{BackendKind, BufferObject, BufferRole, ContextError, FrameTarget};

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a native context.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ContextId(u64);

impl ContextId {
    fn next() -> Self {
        Self(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx#{}", self.0)
    }
}

/// Backend-specific layout of a native context.
pub(crate) enum NativeKind {
    Gpu(GpuContext),
    Software(SoftwareContext),
}

/// A native rendering context, shared by every handle that wraps it.
///
/// `bound_thread` mirrors the platform rule that a context is current on at
/// most one thread at a time.
pub(crate) struct NativeContext {
    id: ContextId,
    kind: NativeKind,
    bound_thread: Mutex<Option<ThreadId>>,
    destroyed: AtomicBool,
    backend_inits: AtomicU32,
}

impl NativeContext {
    pub(crate) fn new(kind: NativeKind) -> Arc<Self> {
        Arc::new(Self {
            id: ContextId::next(),
            kind,
            bound_thread: Mutex::new(None),
            destroyed: AtomicBool::new(false),
            backend_inits: AtomicU32::new(0),
        })
    }

    pub(crate) fn id(&self) -> ContextId {
        self.id
    }

    pub(crate) fn kind(&self) -> &NativeKind {
        &self.kind
    }

    pub(crate) fn backend(&self) -> BackendKind {
        match self.kind {
            NativeKind::Gpu(_) => BackendKind::Gpu,
            NativeKind::Software(_) => BackendKind::Software,
        }
    }

    pub(crate) fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Claims the context for the calling thread.
    pub(crate) fn bind_to_current_thread(&self) -> Result<(), ContextError> {
        if self.is_destroyed() {
            return Err(ContextError::Destroyed(self.id));
        }
        let me = thread::current().id();
        let mut bound = self.bound_thread.lock().unwrap_or_else(PoisonError::into_inner);
        match *bound {
            Some(other) if other != me => Err(ContextError::CurrentElsewhere {
                id: self.id,
                thread: other,
            }),
            _ => {
                *bound = Some(me);
                Ok(())
            }
        }
    }

    /// Releases the claim if the calling thread holds it.
    pub(crate) fn release_from_current_thread(&self) {
        let me = thread::current().id();
        let mut bound = self.bound_thread.lock().unwrap_or_else(PoisonError::into_inner);
        if *bound == Some(me) {
            *bound = None;
        }
    }

    pub(crate) fn load_entry_points(&self) -> Result<(), ContextError> {
        let result = match &self.kind {
            NativeKind::Gpu(gpu) => gpu.load_entry_points(),
            NativeKind::Software(soft) => soft.load_entry_points(),
        };
        self.backend_inits.fetch_add(1, Ordering::Relaxed);
        result.map_err(|message| ContextError::BackendInit {
            id: self.id,
            message,
        })
    }

    fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        let bound = *self.bound_thread.lock().unwrap_or_else(PoisonError::into_inner);
        match bound {
            Some(thread) if thread != thread::current().id() => {
                log::warn!("{} destroyed while current on thread {thread:?}", self.id);
            }
            _ => {}
        }
        log::debug!("{} ({}) destroyed", self.id, self.backend());
    }
}

/// Owning or borrowing wrapper around a native rendering context.
///
/// A handle is move-only. Handles returned by `create_windowless` own their
/// context and destroy it on [`deinitialize`](Self::deinitialize) or drop;
/// handles returned by `attach_to_current` and `switch_to` only borrow it.
///
/// `needs_backend_init` is per-handle: it starts `true` for freshly created
/// contexts and is cleared by the first `switch_to`, which loads backend entry
/// points exactly once.
pub struct ContextHandle {
    native: Option<Arc<NativeContext>>,
    owned: bool,
    needs_backend_init: AtomicBool,
}

impl ContextHandle {
    /// A handle that wraps no context.
    pub fn empty() -> Self {
        Self {
            native: None,
            owned: false,
            needs_backend_init: AtomicBool::new(false),
        }
    }

    pub(crate) fn owning(native: Arc<NativeContext>) -> Self {
        Self {
            native: Some(native),
            owned: true,
            needs_backend_init: AtomicBool::new(true),
        }
    }

    pub(crate) fn borrowing(native: Option<Arc<NativeContext>>) -> Self {
        Self {
            native,
            owned: false,
            needs_backend_init: AtomicBool::new(false),
        }
    }

    pub(crate) fn native(&self) -> Option<&Arc<NativeContext>> {
        self.native.as_ref()
    }

    /// Clears `needs_backend_init`, returning whether it was set.
    pub(crate) fn take_backend_init(&self) -> bool {
        self.needs_backend_init.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn restore_backend_init(&self) {
        self.needs_backend_init.store(true, Ordering::Release);
    }

    pub fn is_empty(&self) -> bool {
        self.native.is_none()
    }

    pub fn id(&self) -> Option<ContextId> {
        self.native.as_ref().map(|n| n.id())
    }

    pub fn backend(&self) -> Option<BackendKind> {
        self.native.as_ref().map(|n| n.backend())
    }

    /// Whether this handle destroys its context when deinitialized.
    pub fn is_owner(&self) -> bool {
        self.owned && self.native.is_some()
    }

    pub fn needs_backend_init(&self) -> bool {
        self.needs_backend_init.load(Ordering::Acquire)
    }

    /// How many times backend entry points were loaded for the wrapped context.
    pub fn backend_init_count(&self) -> u32 {
        self.native
            .as_ref()
            .map_or(0, |n| n.backend_inits.load(Ordering::Relaxed))
    }

    /// Whether the wrapped context is current on the calling thread.
    pub fn is_current(&self) -> bool {
        match &self.native {
            Some(native) => manager::is_current_on_this_thread(native),
            None => false,
        }
    }

    /// Whether both handles wrap the same native context.
    pub fn same_context(&self, other: &ContextHandle) -> bool {
        match (&self.native, &other.native) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }

    /// wgpu objects of a gpu context.
    pub fn gpu(&self) -> Option<&GpuContext> {
        match self.native.as_deref().map(NativeContext::kind) {
            Some(NativeKind::Gpu(gpu)) => Some(gpu),
            _ => None,
        }
    }

    /// Software context state.
    pub fn software(&self) -> Option<&SoftwareContext> {
        match self.native.as_deref().map(NativeContext::kind) {
            Some(NativeKind::Software(soft)) => Some(soft),
            _ => None,
        }
    }

    /// Allocates a buffer in the context's object namespace.
    pub fn create_buffer(&self, label: &str, size: u64, role: BufferRole) -> Result<BufferObject> {
        let native = self.live_native()?;
        match native.kind() {
            NativeKind::Gpu(gpu) => gpu.create_buffer(label, size, role),
            NativeKind::Software(soft) => soft.create_buffer(label, size, role),
        }
    }

    /// Largest buffer the wrapped context can allocate; `None` when empty.
    pub fn max_buffer_size(&self) -> Option<u64> {
        self.native.as_deref().map(|native| match native.kind() {
            NativeKind::Gpu(gpu) => gpu.max_buffer_size(),
            NativeKind::Software(soft) => soft.max_buffer_size(),
        })
    }

    /// Creates an offscreen color target of the given size.
    pub fn create_target(&self, width: u32, height: u32) -> Result<FrameTarget> {
        anyhow::ensure!(width > 0 && height > 0, "frame target has zero size");
        let native = self.live_native()?;
        Ok(match native.kind() {
            NativeKind::Gpu(gpu) => FrameTarget::Gpu(gpu.create_target(width, height)),
            NativeKind::Software(soft) => FrameTarget::Software(soft.create_target(width, height)),
        })
    }

    fn live_native(&self) -> Result<&Arc<NativeContext>> {
        let native = self
            .native
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("context handle is empty"))?;
        if native.is_destroyed() {
            return Err(ContextError::Destroyed(native.id()).into());
        }
        Ok(native)
    }

    /// Releases the wrapper without destroying the context.
    pub fn detach(&mut self) {
        if let Some(native) = self.native.take() {
            log::trace!("detached from {}", native.id());
        }
        self.owned = false;
    }

    /// Destroys an owned context; detaches a borrowed one.
    ///
    /// Idempotent and a no-op on empty handles. If the context is current on
    /// the calling thread, nothing is current afterwards.
    pub fn deinitialize(&mut self) {
        let Some(native) = self.native.take() else {
            return;
        };
        if !self.owned {
            log::trace!("detached from {} (not owned)", native.id());
            return;
        }
        self.owned = false;

        manager::forget_if_current(&native);
        native.destroy();
    }
}

impl Default for ContextHandle {
    fn default() -> Self {
        Self::empty()
    }
}

impl Drop for ContextHandle {
    fn drop(&mut self) {
        self.deinitialize();
    }
}

impl fmt::Debug for ContextHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextHandle")
            .field("id", &self.id())
            .field("backend", &self.backend())
            .field("owned", &self.owned)
            .field("needs_backend_init", &self.needs_backend_init())
            .finish()
    }
}
