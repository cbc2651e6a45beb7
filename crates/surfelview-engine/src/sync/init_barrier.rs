use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::error::VisError;
use crate::interop::{InteropBindings, InteropRequest};

/// Observable stage of the interop setup handshake.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum InitPhase {
    Uninitialized,
    AwaitingRenderThread,
    Ready,
    Failed,
    Closed,
}

impl fmt::Display for InitPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            InitPhase::Uninitialized => "uninitialized",
            InitPhase::AwaitingRenderThread => "awaiting render thread",
            InitPhase::Ready => "ready",
            InitPhase::Failed => "failed",
            InitPhase::Closed => "closed",
        })
    }
}

enum InitState {
    Uninitialized,
    /// `None` once the render thread has picked the request up.
    AwaitingRenderThread(Option<InteropRequest>),
    Ready(InteropBindings),
    Failed(String),
    Closed,
}

impl InitState {
    fn phase(&self) -> InitPhase {
        match self {
            InitState::Uninitialized => InitPhase::Uninitialized,
            InitState::AwaitingRenderThread(_) => InitPhase::AwaitingRenderThread,
            InitState::Ready(_) => InitPhase::Ready,
            InitState::Failed(_) => InitPhase::Failed,
            InitState::Closed => InitPhase::Closed,
        }
    }
}

/// One-time handshake that keeps the render loop from drawing interop
/// buffers before they are registered.
///
/// `Uninitialized → AwaitingRenderThread → Ready`, with `Failed` and `Closed`
/// as terminal alternatives. `Ready` is entered at most once.
pub struct InitBarrier {
    state: Mutex<InitState>,
    changed: Condvar,
    shut_down: AtomicBool,
}

impl InitBarrier {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(InitState::Uninitialized),
            changed: Condvar::new(),
            shut_down: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, InitState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn phase(&self) -> InitPhase {
        self.lock().phase()
    }

    /// Bindings registered by the render thread, once `Ready`.
    pub fn bindings(&self) -> Option<InteropBindings> {
        match &*self.lock() {
            InitState::Ready(bindings) => Some(bindings.clone()),
            _ => None,
        }
    }

    /// Whether the render loop has shut down.
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Hands `request` to the render thread and blocks until it is serviced.
    ///
    /// Only the first call submits a request; later calls fail with
    /// `InvalidState`. Other threads that need the bindings wait with
    /// [`wait_ready`](Self::wait_ready), and all of them observe `Ready`.
    pub fn request_setup(&self, request: InteropRequest) -> Result<InteropBindings, VisError> {
        let mut state = self.lock();
        match &*state {
            InitState::Uninitialized => {}
            InitState::Closed => return Err(VisError::ShutDown),
            other => {
                return Err(VisError::invalid_state(format!(
                    "interop setup already requested ({})",
                    other.phase()
                )));
            }
        }
        *state = InitState::AwaitingRenderThread(Some(request));
        log::debug!(
            "interop setup requested (max {} points)",
            request.max_point_count
        );
        self.changed.notify_all();
        self.wait_settled(state)
    }

    /// Blocks until setup finishes. Any number of threads may wait.
    pub fn wait_ready(&self) -> Result<InteropBindings, VisError> {
        let state = self.lock();
        if let InitState::Uninitialized = *state {
            return Err(VisError::invalid_state(
                "waiting for interop setup that was never requested",
            ));
        }
        self.wait_settled(state)
    }

    fn wait_settled(
        &self,
        state: MutexGuard<'_, InitState>,
    ) -> Result<InteropBindings, VisError> {
        let state = self
            .changed
            .wait_while(state, |s| matches!(s, InitState::AwaitingRenderThread(_)))
            .unwrap_or_else(PoisonError::into_inner);
        match &*state {
            InitState::Ready(bindings) => Ok(bindings.clone()),
            InitState::Failed(message) => Err(VisError::InteropSetupFailed(message.clone())),
            InitState::Closed => Err(VisError::ShutDown),
            InitState::Uninitialized | InitState::AwaitingRenderThread(_) => Err(
                VisError::invalid_state("interop setup left the barrier unsettled"),
            ),
        }
    }

    /// Render thread: takes an unserviced request without blocking.
    pub fn poll_request(&self) -> Option<InteropRequest> {
        match &mut *self.lock() {
            InitState::AwaitingRenderThread(request) => request.take(),
            _ => None,
        }
    }

    /// Render thread: waits up to `timeout` for a request.
    pub fn wait_for_request(&self, timeout: Duration) -> Option<InteropRequest> {
        let state = self.lock();
        let (mut state, _) = self
            .changed
            .wait_timeout_while(state, timeout, |s| matches!(s, InitState::Uninitialized))
            .unwrap_or_else(PoisonError::into_inner);
        match &mut *state {
            InitState::AwaitingRenderThread(request) => request.take(),
            _ => None,
        }
    }

    /// Render thread: publishes the registered bindings and wakes all waiters.
    pub fn complete(&self, bindings: InteropBindings) -> Result<(), VisError> {
        let mut state = self.lock();
        match &*state {
            InitState::AwaitingRenderThread(None) => {}
            other => {
                return Err(VisError::invalid_state(format!(
                    "cannot complete interop setup while {}",
                    other.phase()
                )));
            }
        }
        log::info!(
            "interop ready: {} surfel capacity in {}",
            bindings.max_point_count,
            bindings.context
        );
        *state = InitState::Ready(bindings);
        self.changed.notify_all();
        Ok(())
    }

    /// Render thread: reports that registration failed.
    pub fn fail(&self, message: impl Into<String>) {
        let mut state = self.lock();
        if let InitState::AwaitingRenderThread(_) = *state {
            let message = message.into();
            log::error!("interop setup failed: {message}");
            *state = InitState::Failed(message);
            self.changed.notify_all();
        }
    }

    /// Marks the render loop as gone; pending and future requests fail.
    pub fn close(&self) {
        self.shut_down.store(true, Ordering::Release);
        let mut state = self.lock();
        if matches!(
            *state,
            InitState::Uninitialized | InitState::AwaitingRenderThread(_)
        ) {
            log::debug!("interop barrier closed while {}", state.phase());
            *state = InitState::Closed;
        }
        self.changed.notify_all();
    }
}

impl Default for InitBarrier {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for InitBarrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InitBarrier")
            .field("phase", &self.phase())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;
    use crate::camera::{PinholeCamera, Viewport};
    use crate::device::{ContextConfig, ContextHandle, ContextManager};
    use crate::interop::{DebugFlags, InteropResourceTable};

    fn request() -> InteropRequest {
        InteropRequest::new(
            64,
            PinholeCamera::for_viewport(Viewport::new(32, 24)),
            DebugFlags::default(),
        )
    }

    /// Services one request the way the render loop does.
    fn service(barrier: &InitBarrier) {
        let ctx = ContextManager::new(ContextConfig::software())
            .try_create_windowless(None)
            .unwrap();
        let request = loop {
            if let Some(r) = barrier.wait_for_request(Duration::from_millis(10)) {
                break r;
            }
        };
        ContextManager::try_switch_to(&ctx).unwrap();
        let mut table = InteropResourceTable::new();
        let bindings = InteropBindings::register(&mut table, &ctx, &request).unwrap();
        barrier.complete(bindings).unwrap();
        ContextManager::try_switch_to(&ContextHandle::empty()).unwrap();
    }

    // ── happy path ────────────────────────────────────────────────────────

    #[test]
    fn request_setup_unblocks_after_completion() {
        let barrier = Arc::new(InitBarrier::new());
        let render = {
            let barrier = barrier.clone();
            thread::spawn(move || service(&barrier))
        };
        let bindings = barrier.request_setup(request()).unwrap();
        render.join().unwrap();
        assert_eq!(bindings.max_point_count, 64);
        assert_eq!(barrier.phase(), InitPhase::Ready);
        assert!(barrier.bindings().is_some());
    }

    #[test]
    fn all_waiters_observe_ready_once() {
        let barrier = Arc::new(InitBarrier::new());
        let requester = {
            let barrier = barrier.clone();
            thread::spawn(move || barrier.request_setup(request()).map(|b| b.vertices.id()))
        };
        while barrier.phase() == InitPhase::Uninitialized {
            thread::yield_now();
        }
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let barrier = barrier.clone();
                thread::spawn(move || barrier.wait_ready().map(|b| b.vertices.id()))
            })
            .collect();

        service(&barrier);
        let id = requester.join().unwrap().unwrap();
        for waiter in waiters {
            assert_eq!(waiter.join().unwrap().unwrap(), id);
        }
    }

    // ── contract violations ───────────────────────────────────────────────

    #[test]
    fn second_request_is_invalid() {
        let barrier = Arc::new(InitBarrier::new());
        let render = {
            let barrier = barrier.clone();
            thread::spawn(move || service(&barrier))
        };
        barrier.request_setup(request()).unwrap();
        render.join().unwrap();
        assert!(matches!(
            barrier.request_setup(request()),
            Err(VisError::InvalidState(_))
        ));
    }

    #[test]
    fn wait_ready_before_request_is_invalid() {
        let barrier = InitBarrier::new();
        assert!(matches!(barrier.wait_ready(), Err(VisError::InvalidState(_))));
    }

    #[test]
    fn complete_without_pickup_is_invalid() {
        let barrier = InitBarrier::new();
        assert!(barrier.poll_request().is_none());
        let err = barrier.complete(fake_bindings()).unwrap_err();
        assert!(matches!(err, VisError::InvalidState(_)));
    }

    fn fake_bindings() -> InteropBindings {
        let ctx = ContextManager::new(ContextConfig::software())
            .try_create_windowless(None)
            .unwrap();
        let vertices = ctx
            .create_buffer("v", 16, crate::device::BufferRole::Vertex)
            .unwrap();
        InteropBindings {
            context: ctx.id().unwrap(),
            max_point_count: 1,
            camera: PinholeCamera::for_viewport(Viewport::new(1, 1)),
            vertices,
            neighbor_indices: None,
            normal_vertices: None,
        }
    }

    // ── failure / shutdown ────────────────────────────────────────────────

    #[test]
    fn failure_is_reported_to_requester() {
        let barrier = Arc::new(InitBarrier::new());
        let render = {
            let barrier = barrier.clone();
            thread::spawn(move || {
                while barrier.poll_request().is_none() {
                    thread::yield_now();
                }
                barrier.fail("out of memory");
            })
        };
        let err = barrier.request_setup(request()).unwrap_err();
        render.join().unwrap();
        assert_eq!(err, VisError::InteropSetupFailed("out of memory".into()));
        assert_eq!(barrier.phase(), InitPhase::Failed);
    }

    #[test]
    fn close_releases_blocked_requester() {
        let barrier = Arc::new(InitBarrier::new());
        let requester = {
            let barrier = barrier.clone();
            thread::spawn(move || barrier.request_setup(request()))
        };
        while barrier.phase() == InitPhase::Uninitialized {
            thread::yield_now();
        }
        barrier.close();
        assert_eq!(requester.join().unwrap().unwrap_err(), VisError::ShutDown);
        assert!(barrier.is_shut_down());
        assert_eq!(barrier.request_setup(request()).unwrap_err(), VisError::ShutDown);
    }

    #[test]
    fn close_keeps_ready_bindings() {
        let barrier = Arc::new(InitBarrier::new());
        let render = {
            let barrier = barrier.clone();
            thread::spawn(move || service(&barrier))
        };
        barrier.request_setup(request()).unwrap();
        render.join().unwrap();
        barrier.close();
        assert_eq!(barrier.phase(), InitPhase::Ready);
        assert!(barrier.is_shut_down());
    }

    #[test]
    fn wait_for_request_times_out() {
        let barrier = InitBarrier::new();
        assert!(barrier.wait_for_request(Duration::from_millis(5)).is_none());
    }
}
