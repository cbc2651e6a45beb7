use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use crate::camera::Viewport;
use crate::core::Visualizer;
use crate::device::{ContextConfig, ContextManager};
use crate::render::{RenderLoop, RenderState, SceneRenderer};
use crate::sync::InitPhase;
use crate::time::FramePacer;

/// How often an on-demand runtime wakes up to look for staged work.
const IDLE_POLL: Duration = Duration::from_millis(50);

/// When the runtime draws.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FrameCadence {
    /// Only when something changed: staged geometry, a screenshot request,
    /// a camera or settings update, or an explicit frame request.
    OnDemand,
    /// Every `interval`, whether or not anything changed.
    Continuous { interval: Duration },
}

/// Render thread configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Thread name.
    pub name: String,
    pub initial_size: Viewport,
    pub cadence: FrameCadence,
    pub context: ContextConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            name: "surfelview-render".to_string(),
            initial_size: Viewport::new(1280, 720),
            cadence: FrameCadence::OnDemand,
            context: ContextConfig::from_env(),
        }
    }
}

/// Commands accepted by the render thread.
///
/// Commands are drained in order before each frame; several `RenderFrame`s
/// collapse into one.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RuntimeCommand {
    RenderFrame,
    Resize(Viewport),
    Shutdown,
}

/// A thread running a [`RenderLoop`] on its own windowless context.
///
/// The renderer is built on the render thread, so it does not need to be
/// `Send`. Dropping the handle shuts the loop down and joins the thread.
pub struct RenderThread {
    visualizer: Visualizer,
    commands: Sender<RuntimeCommand>,
    handle: Option<JoinHandle<()>>,
}

impl RenderThread {
    /// Spawns the render thread and waits until its context is attached.
    pub fn spawn<R, F>(visualizer: &Visualizer, config: RuntimeConfig, make_renderer: F) -> Result<Self>
    where
        R: SceneRenderer + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        let (commands, inbox) = mpsc::channel();
        let (attached_tx, attached_rx) = mpsc::channel();

        let thread_visualizer = visualizer.clone();
        let handle = thread::Builder::new()
            .name(config.name.clone())
            .spawn(move || {
                let render = match attach(&thread_visualizer, &config, make_renderer) {
                    Ok(render) => render,
                    Err(err) => {
                        let _ = attached_tx.send(Err(err));
                        return;
                    }
                };
                let _ = attached_tx.send(Ok(()));
                run(render, &thread_visualizer, config.cadence, inbox);
            })
            .context("failed to spawn render thread")?;

        let attached = attached_rx
            .recv()
            .unwrap_or_else(|_| Err(anyhow::anyhow!("render thread exited during setup")));
        if let Err(err) = attached {
            let _ = handle.join();
            return Err(err.context("render thread setup failed"));
        }

        visualizer.shared().attach_runtime(commands.clone());
        Ok(Self {
            visualizer: visualizer.clone(),
            commands,
            handle: Some(handle),
        })
    }

    pub fn visualizer(&self) -> &Visualizer {
        &self.visualizer
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn render_frame(&self) -> Result<()> {
        self.send(RuntimeCommand::RenderFrame)
    }

    pub fn resize(&self, viewport: Viewport) -> Result<()> {
        anyhow::ensure!(
            viewport.is_valid(),
            "viewport {}x{} has zero size",
            viewport.width,
            viewport.height
        );
        self.send(RuntimeCommand::Resize(viewport))
    }

    /// Stops the loop, releases its context and joins the thread.
    pub fn shutdown(mut self) -> Result<()> {
        self.stop()
    }

    fn send(&self, command: RuntimeCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| anyhow::anyhow!("render thread is not running"))
    }

    fn stop(&mut self) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        let _ = self.commands.send(RuntimeCommand::Shutdown);
        self.visualizer.shared().detach_runtime();
        handle
            .join()
            .map_err(|_| anyhow::anyhow!("render thread panicked"))
    }
}

impl Drop for RenderThread {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            log::error!("{err:#}");
        }
    }
}

fn attach<R, F>(visualizer: &Visualizer, config: &RuntimeConfig, make_renderer: F) -> Result<RenderLoop<R>>
where
    R: SceneRenderer,
    F: FnOnce() -> R,
{
    let manager = ContextManager::new(config.context.clone());
    let context = manager.create_windowless(None);
    let mut render = RenderLoop::new(visualizer, make_renderer(), config.initial_size);
    render.attach_context(context)?;
    Ok(render)
}

fn run<R: SceneRenderer>(
    mut render: RenderLoop<R>,
    visualizer: &Visualizer,
    cadence: FrameCadence,
    inbox: Receiver<RuntimeCommand>,
) {
    let shared = visualizer.shared();
    let mut pacer = match cadence {
        FrameCadence::Continuous { interval } => Some(FramePacer::new(interval)),
        FrameCadence::OnDemand => None,
    };
    let mut dirty = true;

    'frames: loop {
        let timeout = pacer
            .as_ref()
            .map_or(IDLE_POLL, |p| p.remaining(Instant::now()));
        let mut next = match inbox.recv_timeout(timeout) {
            Ok(command) => Some(command),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let mut resize = None;
        while let Some(command) = next {
            match command {
                RuntimeCommand::RenderFrame => dirty = true,
                RuntimeCommand::Resize(viewport) => resize = Some(viewport),
                RuntimeCommand::Shutdown => break 'frames,
            }
            next = match inbox.try_recv() {
                Ok(command) => Some(command),
                Err(TryRecvError::Empty) => None,
                Err(TryRecvError::Disconnected) => break 'frames,
            };
        }

        if let Some(viewport) = resize {
            if let Err(err) = render.resize(viewport) {
                log::warn!("resize failed: {err:#}");
            }
            dirty = true;
        }

        let awaiting_setup = render.state() == RenderState::AwaitingContext
            && shared.init.phase() == InitPhase::AwaitingRenderThread;
        let due = match pacer.as_mut() {
            Some(pacer) => {
                let now = Instant::now();
                let due = pacer.is_due(now);
                if due {
                    pacer.mark(now);
                }
                due
            }
            None => dirty || awaiting_setup || shared.has_pending_work(),
        };
        if !due {
            continue;
        }

        dirty = false;
        if let Err(err) = render.render_frame() {
            log::error!("frame failed: {err:#}");
        }
    }

    render.shutdown();
    shared.detach_runtime();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::PinholeCamera;
    use crate::error::VisError;
    use crate::geometry::{PointCloud, PointCloudSnapshot, SurfelVertex};
    use crate::interop::DebugFlags;
    use crate::render::{ClearRenderer, SurfelRenderer};

    fn config(cadence: FrameCadence) -> RuntimeConfig {
        RuntimeConfig {
            name: "surfelview-test-render".into(),
            initial_size: Viewport::new(32, 24),
            cadence,
            context: ContextConfig::software(),
        }
    }

    fn temp_png(tag: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("surfelview-{tag}-{}.png", std::process::id()))
    }

    #[test]
    fn on_demand_runtime_serves_producers() {
        let vis = Visualizer::new();
        let runtime =
            RenderThread::spawn(&vis, config(FrameCadence::OnDemand), SurfelRenderer::default)
                .unwrap();
        assert!(runtime.is_running());

        let bindings = vis
            .initialize_for_interop(
                500,
                PinholeCamera::for_viewport(Viewport::new(32, 24)),
                DebugFlags::default(),
            )
            .unwrap();
        assert_eq!(bindings.max_point_count, 500);

        let v = SurfelVertex::new([0.0, 0.0, 0.0], [0, 0, 255]);
        vis.update_point_cloud(PointCloudSnapshot::host(PointCloud::new(vec![v; 3]).unwrap()))
            .unwrap();
        vis.render_frame().unwrap();

        let path = temp_png("runtime");
        assert_eq!(vis.request_screenshot(&path).unwrap(), path);

        runtime.resize(Viewport::new(16, 8)).unwrap();
        vis.request_screenshot(&path).unwrap();
        let saved = image::open(&path).unwrap();
        assert_eq!((saved.width(), saved.height()), (16, 8));
        let _ = std::fs::remove_file(&path);

        runtime.shutdown().unwrap();
        assert_eq!(
            vis.update_point_cloud(PointCloudSnapshot::device(1, 0)),
            Err(VisError::ShutDown)
        );
        assert!(matches!(vis.render_frame(), Err(VisError::ShutDown)));
    }

    #[test]
    fn continuous_runtime_keeps_drawing() {
        let vis = Visualizer::new();
        let runtime = RenderThread::spawn(
            &vis,
            config(FrameCadence::Continuous {
                interval: Duration::from_millis(5),
            }),
            || ClearRenderer,
        )
        .unwrap();
        vis.initialize_for_interop(
            10,
            PinholeCamera::for_viewport(Viewport::new(32, 24)),
            DebugFlags::default(),
        )
        .unwrap();

        let path = temp_png("continuous");
        let saved = vis
            .request_screenshot_timeout(&path, Duration::from_secs(5))
            .unwrap();
        assert_eq!(saved, Some(path.clone()));
        let _ = std::fs::remove_file(&path);
        drop(runtime);
        assert_eq!(vis.init_phase(), InitPhase::Ready);
    }

    #[test]
    fn zero_sized_resize_is_rejected() {
        let vis = Visualizer::new();
        let runtime =
            RenderThread::spawn(&vis, config(FrameCadence::OnDemand), || ClearRenderer).unwrap();
        assert!(runtime.resize(Viewport::new(0, 1)).is_err());
        runtime.shutdown().unwrap();
    }

    #[test]
    fn setup_failure_is_reported_by_spawn() {
        let vis = Visualizer::new();
        let mut config = config(FrameCadence::OnDemand);
        config.initial_size = Viewport::new(0, 0);
        let err = RenderThread::spawn(&vis, config, || ClearRenderer)
            .err()
            .unwrap();
        assert!(format!("{err:#}").contains("zero size"));
    }
}
