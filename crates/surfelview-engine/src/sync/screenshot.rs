use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::error::VisError;

/// What happened to a screenshot request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScreenshotOutcome {
    Saved(PathBuf),
    /// A newer request replaced this one before the render thread took it.
    Superseded,
    Failed(String),
}

impl ScreenshotOutcome {
    pub fn into_result(self) -> Result<PathBuf, VisError> {
        match self {
            ScreenshotOutcome::Saved(path) => Ok(path),
            ScreenshotOutcome::Superseded => Err(VisError::ScreenshotSuperseded),
            ScreenshotOutcome::Failed(message) => Err(VisError::Screenshot(message)),
        }
    }
}

/// A request taken by the render thread.
#[derive(Debug)]
pub struct ScreenshotJob {
    ticket: u64,
    path: PathBuf,
}

impl ScreenshotJob {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[derive(Default)]
struct State {
    next_ticket: u64,
    pending: Option<ScreenshotJob>,
    finished: HashMap<u64, ScreenshotOutcome>,
    /// Tickets whose requester stopped waiting.
    abandoned: HashSet<u64>,
    closed: bool,
}

/// One-slot request/acknowledge channel for screenshots.
///
/// A new request overwrites an unserviced one, whose requester then gets
/// [`ScreenshotOutcome::Superseded`]. The render thread takes at most one job
/// per frame and reports the outcome with [`complete`](Self::complete).
#[derive(Default)]
pub struct ScreenshotHandshake {
    state: Mutex<State>,
    done: Condvar,
}

impl ScreenshotHandshake {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enqueue(&self, state: &mut State, path: PathBuf) -> u64 {
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        if let Some(old) = state.pending.replace(ScreenshotJob { ticket, path }) {
            log::debug!("screenshot {} superseded", old.path.display());
            state.finished.insert(old.ticket, ScreenshotOutcome::Superseded);
            self.done.notify_all();
        }
        ticket
    }

    /// Asks for the next frame to be saved to `path` and blocks until the
    /// render thread reports back.
    pub fn request(&self, path: impl Into<PathBuf>) -> Result<ScreenshotOutcome, VisError> {
        let mut state = self.lock();
        if state.closed {
            return Err(VisError::ShutDown);
        }
        let ticket = self.enqueue(&mut state, path.into());
        let mut state = self
            .done
            .wait_while(state, |s| !s.finished.contains_key(&ticket))
            .unwrap_or_else(PoisonError::into_inner);
        state
            .finished
            .remove(&ticket)
            .ok_or_else(|| VisError::invalid_state("screenshot outcome vanished"))
    }

    /// Like [`request`](Self::request), but gives up after `timeout`.
    ///
    /// Returns `Ok(None)` on timeout; a request the render thread has not
    /// taken yet is withdrawn.
    pub fn request_timeout(
        &self,
        path: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Result<Option<ScreenshotOutcome>, VisError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        if state.closed {
            return Err(VisError::ShutDown);
        }
        let ticket = self.enqueue(&mut state, path.into());
        loop {
            if let Some(outcome) = state.finished.remove(&ticket) {
                return Ok(Some(outcome));
            }
            let now = Instant::now();
            if now >= deadline {
                if state.pending.as_ref().is_some_and(|job| job.ticket == ticket) {
                    state.pending = None;
                } else {
                    state.abandoned.insert(ticket);
                }
                return Ok(None);
            }
            state = self
                .done
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    pub fn has_pending(&self) -> bool {
        self.lock().pending.is_some()
    }

    /// Render thread: takes the pending request, if any.
    pub fn take_pending(&self) -> Option<ScreenshotJob> {
        self.lock().pending.take()
    }

    /// Render thread: reports the outcome of a taken job.
    pub fn complete(&self, job: ScreenshotJob, outcome: ScreenshotOutcome) {
        match &outcome {
            ScreenshotOutcome::Saved(path) => log::info!("saved screenshot {}", path.display()),
            ScreenshotOutcome::Failed(msg) => {
                log::warn!("screenshot {} failed: {msg}", job.path.display())
            }
            ScreenshotOutcome::Superseded => {}
        }
        let mut state = self.lock();
        if !state.abandoned.remove(&job.ticket) {
            state.finished.insert(job.ticket, outcome);
        }
        self.done.notify_all();
    }

    /// Fails the pending request and every future one.
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        if let Some(job) = state.pending.take() {
            state.finished.insert(
                job.ticket,
                ScreenshotOutcome::Failed("render loop shut down before capture".into()),
            );
        }
        self.done.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    fn wait_for_pending(handshake: &ScreenshotHandshake) -> ScreenshotJob {
        loop {
            if let Some(job) = handshake.take_pending() {
                return job;
            }
            thread::yield_now();
        }
    }

    // ── request / complete ────────────────────────────────────────────────

    #[test]
    fn request_returns_render_thread_outcome() {
        let hs = Arc::new(ScreenshotHandshake::new());
        let requester = {
            let hs = hs.clone();
            thread::spawn(move || hs.request("shot.png"))
        };
        let job = wait_for_pending(&hs);
        assert_eq!(job.path(), Path::new("shot.png"));
        hs.complete(job, ScreenshotOutcome::Saved("shot.png".into()));
        assert_eq!(
            requester.join().unwrap().unwrap(),
            ScreenshotOutcome::Saved("shot.png".into())
        );
    }

    #[test]
    fn newer_request_supersedes_unserviced_one() {
        let hs = Arc::new(ScreenshotHandshake::new());
        let first = {
            let hs = hs.clone();
            thread::spawn(move || hs.request("a.png"))
        };
        while !hs.has_pending() {
            thread::yield_now();
        }
        let second = {
            let hs = hs.clone();
            thread::spawn(move || hs.request("b.png"))
        };
        assert_eq!(first.join().unwrap().unwrap(), ScreenshotOutcome::Superseded);

        let job = wait_for_pending(&hs);
        assert_eq!(job.path(), Path::new("b.png"));
        hs.complete(job, ScreenshotOutcome::Saved("b.png".into()));
        assert_eq!(
            second.join().unwrap().unwrap(),
            ScreenshotOutcome::Saved("b.png".into())
        );
        assert!(!hs.has_pending());
    }

    #[test]
    fn outcome_maps_to_errors() {
        assert_eq!(
            ScreenshotOutcome::Superseded.into_result(),
            Err(VisError::ScreenshotSuperseded)
        );
        assert!(matches!(
            ScreenshotOutcome::Failed("x".into()).into_result(),
            Err(VisError::Screenshot(_))
        ));
    }

    // ── timeout / close ───────────────────────────────────────────────────

    #[test]
    fn timeout_withdraws_untaken_request() {
        let hs = ScreenshotHandshake::new();
        let outcome = hs
            .request_timeout("late.png", Duration::from_millis(5))
            .unwrap();
        assert_eq!(outcome, None);
        assert!(!hs.has_pending());
    }

    #[test]
    fn abandoned_job_outcome_is_dropped() {
        let hs = Arc::new(ScreenshotHandshake::new());
        let requester = {
            let hs = hs.clone();
            thread::spawn(move || hs.request_timeout("slow.png", Duration::from_millis(200)))
        };
        let job = loop {
            if let Some(job) = hs.take_pending() {
                break job;
            }
            if requester.is_finished() {
                // Withdrawn before we took it; nothing left to check.
                return;
            }
            thread::yield_now();
        };
        assert_eq!(requester.join().unwrap().unwrap(), None);
        hs.complete(job, ScreenshotOutcome::Saved("slow.png".into()));
        assert!(hs.lock().finished.is_empty());
    }

    #[test]
    fn close_fails_pending_and_future_requests() {
        let hs = Arc::new(ScreenshotHandshake::new());
        let requester = {
            let hs = hs.clone();
            thread::spawn(move || hs.request("never.png"))
        };
        while !hs.has_pending() {
            thread::yield_now();
        }
        hs.close();
        assert!(matches!(
            requester.join().unwrap().unwrap(),
            ScreenshotOutcome::Failed(_)
        ));
        assert_eq!(hs.request("after.png").unwrap_err(), VisError::ShutDown);
        assert!(hs.is_closed());
    }
}
