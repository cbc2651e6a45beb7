use std::ops::Range;

use anyhow::Result;

use crate::camera::Viewport;
use crate::device::{BackendKind, ContextHandle, FrameTarget};

use super::{FrameCtx, GpuSurfelRenderer, RenderSettings, SceneGeometry, SoftwareRasterizer};

/// What a renderer drew in one frame.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct DrawStats {
    pub surfels: usize,
    pub splats: usize,
    pub triangles: usize,
}

/// Draw code plugged into the render loop.
///
/// All methods run on the render thread with the loop's context current. The
/// target has already been cleared when `draw` is called.
pub trait SceneRenderer {
    fn prepare(&mut self, _ctx: &ContextHandle, _viewport: Viewport) -> Result<()> {
        Ok(())
    }

    fn resize(&mut self, _viewport: Viewport) {}

    fn draw(&mut self, frame: &FrameCtx<'_>, target: &mut FrameTarget) -> Result<DrawStats>;

    /// Drops backend resources before the context goes away.
    fn release(&mut self) {}
}

impl<R: SceneRenderer + ?Sized> SceneRenderer for Box<R> {
    fn prepare(&mut self, ctx: &ContextHandle, viewport: Viewport) -> Result<()> {
        (**self).prepare(ctx, viewport)
    }

    fn resize(&mut self, viewport: Viewport) {
        (**self).resize(viewport)
    }

    fn draw(&mut self, frame: &FrameCtx<'_>, target: &mut FrameTarget) -> Result<DrawStats> {
        (**self).draw(frame, target)
    }

    fn release(&mut self) {
        (**self).release()
    }
}

/// Draws nothing; frames contain only the clear color.
#[derive(Debug, Default)]
pub struct ClearRenderer;

impl SceneRenderer for ClearRenderer {
    fn draw(&mut self, _frame: &FrameCtx<'_>, _target: &mut FrameTarget) -> Result<DrawStats> {
        Ok(DrawStats::default())
    }
}

/// Picks the gpu or software surfel renderer to match the context backend.
#[derive(Default)]
pub enum SurfelRenderer {
    #[default]
    Unprepared,
    Gpu(GpuSurfelRenderer),
    Software(SoftwareRasterizer),
}

impl SceneRenderer for SurfelRenderer {
    fn prepare(&mut self, ctx: &ContextHandle, viewport: Viewport) -> Result<()> {
        *self = match ctx.backend() {
            Some(BackendKind::Gpu) => SurfelRenderer::Gpu(GpuSurfelRenderer::new()),
            Some(BackendKind::Software) => SurfelRenderer::Software(SoftwareRasterizer::new()),
            None => anyhow::bail!("cannot prepare a renderer without a context"),
        };
        match self {
            SurfelRenderer::Gpu(r) => r.prepare(ctx, viewport),
            SurfelRenderer::Software(r) => r.prepare(ctx, viewport),
            SurfelRenderer::Unprepared => Ok(()),
        }
    }

    fn resize(&mut self, viewport: Viewport) {
        match self {
            SurfelRenderer::Gpu(r) => r.resize(viewport),
            SurfelRenderer::Software(r) => r.resize(viewport),
            SurfelRenderer::Unprepared => {}
        }
    }

    fn draw(&mut self, frame: &FrameCtx<'_>, target: &mut FrameTarget) -> Result<DrawStats> {
        match self {
            SurfelRenderer::Gpu(r) => r.draw(frame, target),
            SurfelRenderer::Software(r) => r.draw(frame, target),
            SurfelRenderer::Unprepared => anyhow::bail!("renderer used before prepare"),
        }
    }

    fn release(&mut self) {
        match self {
            SurfelRenderer::Gpu(r) => r.release(),
            SurfelRenderer::Software(r) => r.release(),
            SurfelRenderer::Unprepared => {}
        }
        *self = SurfelRenderer::Unprepared;
    }
}

/// Surfel indices drawn as splats.
///
/// With a visible mesh, only surfels newer than the mesh are splatted;
/// otherwise every surfel is.
pub fn splat_range(scene: &SceneGeometry, settings: &RenderSettings) -> Range<usize> {
    if !settings.show_surfels || scene.point_count() == 0 {
        return 0..0;
    }
    let mesh_visible = settings.show_mesh && scene.triangle_count() > 0;
    if mesh_visible && settings.render_new_surfels_as_splats {
        scene.latest_mesh_surfel_count().min(scene.point_count())..scene.point_count()
    } else {
        0..scene.point_count()
    }
}
