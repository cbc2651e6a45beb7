use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::camera::{PinholeCamera, Viewport};
use crate::core::{Shared, Visualizer};
use crate::device::{ContextHandle, ContextManager, FrameTarget};
use crate::interop::{InteropBindings, InteropRequest, InteropResourceTable};
use crate::sync::ScreenshotOutcome;
use crate::time::FrameClock;

use super::{DrawStats, FrameCtx, SceneGeometry, SceneRenderer};

/// Lifecycle of a render loop.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RenderState {
    /// No context attached yet.
    Idle,
    /// Context attached; interop buffers not registered yet.
    AwaitingContext,
    SteadyState,
    /// Viewport and frame target are being rebuilt.
    Resizing,
    /// Terminal.
    ShuttingDown,
}

impl fmt::Display for RenderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RenderState::Idle => "idle",
            RenderState::AwaitingContext => "awaiting context",
            RenderState::SteadyState => "steady state",
            RenderState::Resizing => "resizing",
            RenderState::ShuttingDown => "shutting down",
        })
    }
}

/// What one `render_frame` call did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameReport {
    pub frame_index: u64,
    /// `false` when the loop was still waiting for interop setup.
    pub drawn: bool,
    pub stats: DrawStats,
    pub point_cloud_updated: bool,
    pub mesh_updated: bool,
    pub screenshot: Option<ScreenshotOutcome>,
}

/// Render-thread half of a visualization.
///
/// Owns the rendering context, the interop table and the uploaded scene. All
/// methods must be called from the thread that attached the context.
pub struct RenderLoop<R: SceneRenderer> {
    shared: Arc<Shared>,
    renderer: R,
    state: RenderState,

    context: ContextHandle,
    table: InteropResourceTable,
    bindings: Option<InteropBindings>,
    scene: SceneGeometry,
    target: Option<FrameTarget>,

    viewport: Viewport,
    render_camera: PinholeCamera,
    clock: FrameClock,
}

impl<R: SceneRenderer> RenderLoop<R> {
    pub fn new(visualizer: &Visualizer, renderer: R, viewport: Viewport) -> Self {
        Self {
            shared: visualizer.shared().clone(),
            renderer,
            state: RenderState::Idle,
            context: ContextHandle::empty(),
            table: InteropResourceTable::new(),
            bindings: None,
            scene: SceneGeometry::new(),
            target: None,
            viewport,
            render_camera: PinholeCamera::for_viewport(viewport),
            clock: FrameClock::new(),
        }
    }

    pub fn state(&self) -> RenderState {
        self.state
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn render_camera(&self) -> PinholeCamera {
        self.render_camera
    }

    pub fn context(&self) -> &ContextHandle {
        &self.context
    }

    pub fn scene(&self) -> &SceneGeometry {
        &self.scene
    }

    pub fn bindings(&self) -> Option<&InteropBindings> {
        self.bindings.as_ref()
    }

    pub fn interop_table(&self) -> &InteropResourceTable {
        &self.table
    }

    /// The frame drawn last.
    pub fn target(&self) -> Option<&FrameTarget> {
        self.target.as_ref()
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    // ── lifecycle ─────────────────────────────────────────────────────────

    /// Makes `context` current on this thread and takes ownership of it.
    ///
    /// The calling thread becomes the render thread. A make-current failure
    /// is fatal.
    pub fn attach_context(&mut self, context: ContextHandle) -> Result<()> {
        anyhow::ensure!(
            self.state == RenderState::Idle,
            "cannot attach a context while {}",
            self.state
        );
        anyhow::ensure!(!context.is_empty(), "cannot attach an empty context handle");
        anyhow::ensure!(
            self.viewport.is_valid(),
            "viewport {}x{} has zero size",
            self.viewport.width,
            self.viewport.height
        );

        let _previous = ContextManager::switch_to(&context);
        self.shared.claim_render_thread();

        let target = context
            .create_target(self.viewport.width, self.viewport.height)
            .context("creating the frame target")?;
        self.renderer
            .prepare(&context, self.viewport)
            .context("preparing the renderer")?;

        log::info!(
            "render loop attached to {:?} ({:?} backend, {}x{})",
            context.id(),
            context.backend(),
            self.viewport.width,
            self.viewport.height
        );
        self.target = Some(target);
        self.context = context;
        self.state = RenderState::AwaitingContext;
        Ok(())
    }

    /// Services the interop setup request, waiting up to `timeout` for one.
    ///
    /// Returns whether the loop reached `SteadyState`. A zero timeout only
    /// polls.
    pub fn await_interop_setup(&mut self, timeout: Duration) -> Result<bool> {
        match self.state {
            RenderState::AwaitingContext => {}
            RenderState::SteadyState => return Ok(true),
            other => anyhow::bail!("cannot set up interop while {other}"),
        }
        let request = if timeout.is_zero() {
            self.shared.init.poll_request()
        } else {
            self.shared.init.wait_for_request(timeout)
        };
        if let Some(request) = request {
            self.service_interop_request(request)?;
        }
        Ok(self.state == RenderState::SteadyState)
    }

    fn service_interop_request(&mut self, request: InteropRequest) -> Result<()> {
        self.make_current();
        let bindings = match InteropBindings::register(&mut self.table, &self.context, &request) {
            Ok(bindings) => bindings,
            Err(err) => {
                self.shared.init.fail(err.to_string());
                return Err(err).context("registering interop buffers");
            }
        };

        self.scene.bind_interop(&bindings);
        self.render_camera = camera_for(self.viewport, Some(&bindings));
        self.bindings = Some(bindings.clone());
        self.shared
            .init
            .complete(bindings)
            .context("publishing interop bindings")?;
        self.state = RenderState::SteadyState;
        log::debug!(
            "render loop ready with {} interop buffers",
            self.table.len()
        );
        Ok(())
    }

    /// Runs one frame: camera snapshot, geometry hand-off, draw, screenshot.
    ///
    /// While interop setup is outstanding the frame is skipped and the
    /// returned report has `drawn == false`.
    pub fn render_frame(&mut self) -> Result<FrameReport> {
        match self.state {
            RenderState::Idle | RenderState::ShuttingDown => {
                self.fail_pending_screenshot("no active rendering context");
                anyhow::bail!("render loop has no active context ({})", self.state);
            }
            RenderState::Resizing => anyhow::bail!("render_frame called while resizing"),
            RenderState::AwaitingContext => {
                if let Some(request) = self.shared.init.poll_request() {
                    self.service_interop_request(request)?;
                }
                if self.state != RenderState::SteadyState {
                    return Ok(FrameReport::default());
                }
            }
            RenderState::SteadyState => {}
        }

        self.make_current();
        let time = self.clock.tick();

        // 1. camera and settings, each under its own lock
        let view = self.shared.camera().snapshot(self.render_camera);
        let settings = self.shared.settings().clone();

        // 2. geometry hand-off
        let cloud = self.shared.point_cloud.try_consume();
        let mesh = self.shared.mesh.try_consume();
        if let Some(cloud) = &cloud {
            self.scene
                .apply_point_cloud(&self.context, cloud)
                .context("applying point cloud")?;
        }
        if let Some(mesh) = &mesh {
            self.scene
                .apply_mesh(&self.context, mesh)
                .context("applying mesh")?;
        }

        // 3. draw
        let Some(target) = self.target.as_mut() else {
            anyhow::bail!("render loop has no frame target");
        };
        target.clear(settings.clear_color);
        let frame = FrameCtx {
            context: &self.context,
            viewport: self.viewport,
            view: &view,
            scene: &self.scene,
            settings: &settings,
            bindings: self.bindings.as_ref(),
            time,
        };
        let stats = match self.renderer.draw(&frame, target) {
            Ok(stats) => stats,
            Err(err) => {
                self.fail_pending_screenshot(&format!("frame failed: {err:#}"));
                return Err(err.context("drawing frame"));
            }
        };

        // 4. at most one screenshot
        let screenshot = self.service_screenshot();

        log::trace!(
            "frame {}: {} surfels, {} splats, {} triangles",
            time.frame_index,
            stats.surfels,
            stats.splats,
            stats.triangles
        );
        Ok(FrameReport {
            frame_index: time.frame_index,
            drawn: true,
            stats,
            point_cloud_updated: cloud.is_some(),
            mesh_updated: mesh.is_some(),
            screenshot,
        })
    }

    /// Rebuilds the projection and frame target for `viewport`. Geometry is
    /// kept.
    pub fn resize(&mut self, viewport: Viewport) -> Result<()> {
        anyhow::ensure!(
            viewport.is_valid(),
            "viewport {}x{} has zero size",
            viewport.width,
            viewport.height
        );
        match self.state {
            RenderState::ShuttingDown | RenderState::Resizing => {
                anyhow::bail!("cannot resize while {}", self.state)
            }
            RenderState::Idle => {
                self.viewport = viewport;
                self.render_camera = camera_for(viewport, None);
                return Ok(());
            }
            RenderState::AwaitingContext | RenderState::SteadyState => {}
        }
        if viewport == self.viewport {
            return Ok(());
        }

        let resumed = std::mem::replace(&mut self.state, RenderState::Resizing);
        self.make_current();
        let target = self.context.create_target(viewport.width, viewport.height);
        self.state = resumed;
        self.target = Some(target.context("recreating the frame target")?);

        log::debug!(
            "resized {}x{} -> {}x{}",
            self.viewport.width,
            self.viewport.height,
            viewport.width,
            viewport.height
        );
        self.viewport = viewport;
        self.render_camera = camera_for(viewport, self.bindings.as_ref());
        self.renderer.resize(viewport);
        Ok(())
    }

    /// Fails outstanding requests, unregisters interop buffers in reverse
    /// order and destroys the context. Idempotent.
    pub fn shutdown(&mut self) {
        if self.state == RenderState::ShuttingDown {
            return;
        }
        self.state = RenderState::ShuttingDown;
        self.shared.screenshots.close();
        self.shared.init.close();

        if !self.context.is_empty() {
            self.make_current();
            match self.table.unregister_all(&self.context) {
                Ok(kinds) if !kinds.is_empty() => {
                    log::debug!("unregistered interop buffers {kinds:?}")
                }
                Ok(_) => {}
                Err(err) => log::warn!("unregistering interop buffers: {err}"),
            }
            self.bindings = None;
            self.renderer.release();
            self.scene.clear();
            self.target = None;

            if let Err(err) = ContextManager::try_switch_to(&ContextHandle::empty()) {
                log::warn!("releasing the current context: {err}");
            }
            self.context.deinitialize();
        }
        self.shared.release_render_thread();
        log::info!("render loop shut down");
    }

    // ── private helpers ────────────────────────────────────────────────────

    fn make_current(&self) {
        if !self.context.is_empty() && !self.context.is_current() {
            let _previous = ContextManager::switch_to(&self.context);
        }
    }

    fn service_screenshot(&self) -> Option<ScreenshotOutcome> {
        let job = self.shared.screenshots.take_pending()?;
        let outcome = match self.capture(job.path()) {
            Ok(()) => ScreenshotOutcome::Saved(job.path().to_path_buf()),
            Err(err) => ScreenshotOutcome::Failed(format!("{err:#}")),
        };
        self.shared.screenshots.complete(job, outcome.clone());
        Some(outcome)
    }

    fn capture(&self, path: &Path) -> Result<()> {
        let target = self.target.as_ref().context("no frame target to capture")?;
        let image = target.read_rgba().context("reading back the frame")?;
        image
            .save(path)
            .with_context(|| format!("writing {}", path.display()))
    }

    fn fail_pending_screenshot(&self, reason: &str) {
        if let Some(job) = self.shared.screenshots.take_pending() {
            self.shared
                .screenshots
                .complete(job, ScreenshotOutcome::Failed(reason.to_string()));
        }
    }
}

impl<R: SceneRenderer> Drop for RenderLoop<R> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Intrinsics of the registered interop camera when they fit `viewport`,
/// otherwise the default camera for it.
fn camera_for(viewport: Viewport, bindings: Option<&InteropBindings>) -> PinholeCamera {
    match bindings {
        Some(b) if b.camera.viewport() == viewport => b.camera,
        Some(b) => {
            log::debug!(
                "interop camera is {}x{}, viewport is {}x{}; using default intrinsics",
                b.camera.width,
                b.camera.height,
                viewport.width,
                viewport.height
            );
            PinholeCamera::for_viewport(viewport)
        }
        None => PinholeCamera::for_viewport(viewport),
    }
}
