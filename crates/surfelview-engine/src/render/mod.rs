//! Render-thread side of the visualization.
//!
//! `RenderLoop` drives frames: it snapshots the camera, consumes staged
//! geometry into `SceneGeometry`, and hands a `FrameCtx` to a `SceneRenderer`.
//! Renderers own their backend resources (pipelines, depth buffers).
//!
//! Convention:
//! - Camera space is x right, y down, z forward; pixel centers are integers.
//! - Surfels that are not part of the latest mesh are drawn as square splats.

mod ctx;
mod gpu;
mod render_loop;
mod renderer;
mod scene;
mod settings;
mod software;

pub use ctx::FrameCtx;
pub use gpu::GpuSurfelRenderer;
pub use render_loop::{FrameReport, RenderLoop, RenderState};
pub use renderer::{splat_range, ClearRenderer, DrawStats, SceneRenderer, SurfelRenderer};
pub use scene::SceneGeometry;
pub use settings::RenderSettings;
pub use software::SoftwareRasterizer;
