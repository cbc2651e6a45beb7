use std::sync::mpsc::Sender;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use crate::camera::CameraState;
use crate::geometry::{MeshSnapshot, PointCloudSnapshot, StagingSlot};
use crate::render::RenderSettings;
use crate::runtime::RuntimeCommand;
use crate::sync::{InitBarrier, ScreenshotHandshake};

/// State shared by producer threads and the render loop.
///
/// Every field is either a hand-off primitive or a short critical section;
/// nothing here is held across a frame.
#[derive(Default)]
pub(crate) struct Shared {
    pub(crate) point_cloud: StagingSlot<PointCloudSnapshot>,
    pub(crate) mesh: StagingSlot<MeshSnapshot>,
    camera: Mutex<CameraState>,
    settings: Mutex<RenderSettings>,
    pub(crate) init: InitBarrier,
    pub(crate) screenshots: ScreenshotHandshake,

    /// Command channel of the render thread runtime, when one is running.
    runtime: Mutex<Option<Sender<RuntimeCommand>>>,
    /// Thread that owns the render loop's context.
    render_thread: Mutex<Option<ThreadId>>,
}

impl Shared {
    pub(crate) fn camera(&self) -> MutexGuard<'_, CameraState> {
        self.camera.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn settings(&self) -> MutexGuard<'_, RenderSettings> {
        self.settings.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn claim_render_thread(&self) {
        let mut owner = self.render_thread.lock().unwrap_or_else(PoisonError::into_inner);
        let current = thread::current().id();
        if let Some(previous) = owner.replace(current) {
            if previous != current {
                log::warn!("render loop moved from thread {previous:?} to {current:?}");
            }
        }
    }

    pub(crate) fn release_render_thread(&self) {
        *self.render_thread.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub(crate) fn on_render_thread(&self) -> bool {
        let owner = self.render_thread.lock().unwrap_or_else(PoisonError::into_inner);
        *owner == Some(thread::current().id())
    }

    pub(crate) fn attach_runtime(&self, sender: Sender<RuntimeCommand>) {
        *self.runtime.lock().unwrap_or_else(PoisonError::into_inner) = Some(sender);
    }

    pub(crate) fn detach_runtime(&self) {
        *self.runtime.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Sends `command` to the render thread runtime.
    ///
    /// Returns `false` when no runtime is attached or it has stopped.
    pub(crate) fn send(&self, command: RuntimeCommand) -> bool {
        let runtime = self.runtime.lock().unwrap_or_else(PoisonError::into_inner);
        runtime
            .as_ref()
            .is_some_and(|sender| sender.send(command).is_ok())
    }

    /// Whether the render loop has work beyond redrawing the same image.
    pub(crate) fn has_pending_work(&self) -> bool {
        self.point_cloud.has_pending() || self.mesh.has_pending() || self.screenshots.has_pending()
    }
}
