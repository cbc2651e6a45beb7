//! Surfelview studio.
//!
//! Runs a synthetic reconstruction: a producer thread grows a sphere of
//! surfels ring by ring inside the shared interop buffer and periodically
//! meshes the finished rings, while the render thread draws the result.

use std::f32::consts::PI;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use glam::{Affine3A, Quat, Vec3};
use log::info;

use surfelview_engine::camera::{OrbitParameters, PinholeCamera, Viewport};
use surfelview_engine::device::{BackendKind, ContextConfig};
use surfelview_engine::geometry::{MeshSnapshot, PointCloudSnapshot, SurfelVertex};
use surfelview_engine::interop::DebugFlags;
use surfelview_engine::logging::{init_logging, LoggingConfig};
use surfelview_engine::render::SurfelRenderer;
use surfelview_engine::runtime::{FrameCadence, RenderThread, RuntimeConfig};
use surfelview_engine::Visualizer;

const SEGMENTS: u32 = 64;
const SPHERE_RADIUS: f32 = 1.0;
const MAX_DEPTH: f32 = 20.0;

/// Streams a synthetic surfel reconstruction into the surfelview renderer.
#[derive(Parser, Debug)]
#[command(name = "surfelview-studio", version, about)]
struct Cli {
    /// Rendering backend
    #[arg(long, value_enum, env = "SURFELVIEW_BACKEND", default_value = "gpu")]
    backend: Backend,

    /// Interop surfel capacity
    #[arg(long, default_value_t = 16_384)]
    points: u32,

    /// Number of producer updates
    #[arg(long, default_value_t = 48)]
    steps: u32,

    /// Mesh the finished rings every N updates
    #[arg(long, default_value_t = 6)]
    mesh_every: u32,

    /// Delay between producer updates, in milliseconds
    #[arg(long, default_value_t = 30)]
    step_ms: u64,

    #[arg(long, default_value_t = 960)]
    width: u32,

    #[arg(long, default_value_t = 540)]
    height: u32,

    /// Save the final frame here (format from the extension)
    #[arg(long)]
    screenshot: Option<PathBuf>,

    /// Draw the mesh as a wireframe (software backend)
    #[arg(long)]
    wireframe: bool,

    /// Also register the neighbor-index and normal-vertex debug buffers
    #[arg(long)]
    debug_buffers: bool,

    /// Log filter, env_logger syntax
    #[arg(long, env = "SURFELVIEW_LOG")]
    log: Option<String>,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Backend {
    Gpu,
    Software,
}

impl From<Backend> for BackendKind {
    fn from(backend: Backend) -> Self {
        match backend {
            Backend::Gpu => BackendKind::Gpu,
            Backend::Software => BackendKind::Software,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(LoggingConfig {
        env_filter: cli.log.clone(),
        ..LoggingConfig::default()
    });

    let viewport = Viewport::new(cli.width, cli.height);
    anyhow::ensure!(viewport.is_valid(), "window size must be positive");
    anyhow::ensure!(cli.points >= 2 * SEGMENTS, "need at least {} points", 2 * SEGMENTS);

    let visualizer = Visualizer::new();
    let runtime = RenderThread::spawn(
        &visualizer,
        RuntimeConfig {
            initial_size: viewport,
            cadence: FrameCadence::Continuous {
                interval: Duration::from_millis(16),
            },
            context: ContextConfig {
                backend: cli.backend.into(),
                ..ContextConfig::default()
            },
            ..RuntimeConfig::default()
        },
        SurfelRenderer::default,
    )?;

    let wireframe = cli.wireframe;
    visualizer.update_settings(|s| s.render_as_wireframe = wireframe);
    visualizer.set_view_parameters(
        OrbitParameters {
            radius: 4.0,
            ..OrbitParameters::default()
        },
        MAX_DEPTH,
        input_camera_pose(0.0),
    );

    let producer = {
        let visualizer = visualizer.clone();
        let plan = Plan::new(&cli, viewport);
        thread::Builder::new()
            .name("surfelview-producer".into())
            .spawn(move || produce(&visualizer, &plan))
            .context("failed to spawn producer thread")?
    };
    producer
        .join()
        .map_err(|_| anyhow::anyhow!("producer thread panicked"))??;

    if let Some(path) = &cli.screenshot {
        let saved = visualizer.request_screenshot(path)?;
        info!("screenshot written to {}", saved.display());
    }

    let diagnostics = visualizer.diagnostics();
    info!(
        "published {} clouds ({} superseded) and {} meshes ({} superseded)",
        diagnostics.point_clouds_published,
        diagnostics.point_clouds_superseded,
        diagnostics.meshes_published,
        diagnostics.meshes_superseded
    );

    runtime.shutdown()
}

/// What the producer generates.
struct Plan {
    rings: u32,
    steps: u32,
    mesh_every: u32,
    step: Duration,
    camera: PinholeCamera,
    debug: DebugFlags,
}

impl Plan {
    fn new(cli: &Cli, viewport: Viewport) -> Self {
        Self {
            rings: cli.points / SEGMENTS,
            steps: cli.steps.max(1),
            mesh_every: cli.mesh_every.max(1),
            step: Duration::from_millis(cli.step_ms),
            camera: PinholeCamera::for_viewport(viewport),
            debug: DebugFlags {
                neighbor_rendering: cli.debug_buffers,
                normal_rendering: cli.debug_buffers,
            },
        }
    }

    fn capacity(&self) -> u32 {
        self.rings * SEGMENTS
    }
}

fn produce(visualizer: &Visualizer, plan: &Plan) -> Result<()> {
    let bindings = visualizer
        .initialize_for_interop(plan.capacity(), plan.camera, plan.debug)
        .context("interop setup")?;
    info!(
        "interop ready: {} surfels in {}",
        bindings.max_point_count, bindings.context
    );

    let surfels = sphere(plan.rings);
    let mut written = 0u32;
    let mut meshed_rings = 0u32;

    for step in 1..=plan.steps {
        let rings = plan.rings * step / plan.steps;
        let count = rings * SEGMENTS;
        if count > written {
            let fresh = &surfels[written as usize..count as usize];
            bindings
                .vertices
                .write(written as u64 * SurfelVertex::STRIDE, bytemuck::cast_slice(fresh))
                .context("writing surfels into the interop buffer")?;
            written = count;
        }

        if step == plan.steps {
            visualizer.update_cloud_and_mesh(count, MeshSnapshot::device(triangles(rings)))?;
        } else {
            if step % plan.mesh_every == 0 && rings > meshed_rings {
                meshed_rings = rings;
                visualizer.update_mesh(MeshSnapshot::device(triangles(meshed_rings)))?;
            }
            visualizer.update_point_cloud(PointCloudSnapshot::device(
                count,
                meshed_rings * SEGMENTS,
            ))?;
        }

        let mut orbit = visualizer.camera_pose_parameters();
        orbit.phi += 0.03;
        let t = step as f32 / plan.steps as f32;
        visualizer.set_view_parameters(orbit, MAX_DEPTH, input_camera_pose(t));
        thread::sleep(plan.step);
    }
    Ok(())
}

/// Surfels on a latitude/longitude grid, ring by ring from the south pole.
fn sphere(rings: u32) -> Vec<SurfelVertex> {
    let mut out = Vec::with_capacity((rings * SEGMENTS) as usize);
    for r in 0..rings {
        let theta = PI * (r as f32 + 0.5) / rings as f32 - 0.5 * PI;
        for s in 0..SEGMENTS {
            let phi = 2.0 * PI * s as f32 / SEGMENTS as f32;
            let n = Vec3::new(theta.cos() * phi.cos(), theta.cos() * phi.sin(), theta.sin());
            let c = (n * 0.5 + Vec3::splat(0.5)) * 255.0;
            out.push(SurfelVertex::new(
                (n * SPHERE_RADIUS).to_array(),
                [c.x as u8, c.y as u8, c.z as u8],
            ));
        }
    }
    out
}

/// Quads between consecutive rings, two triangles each.
fn triangles(rings: u32) -> Vec<[u32; 3]> {
    let mut out = Vec::new();
    for r in 0..rings.saturating_sub(1) {
        for s in 0..SEGMENTS {
            let a = r * SEGMENTS + s;
            let b = r * SEGMENTS + (s + 1) % SEGMENTS;
            let c = a + SEGMENTS;
            let d = b + SEGMENTS;
            out.push([a, c, b]);
            out.push([b, c, d]);
        }
    }
    out
}

/// Input camera circling the sphere, looking at its center.
fn input_camera_pose(t: f32) -> Affine3A {
    let angle = 2.0 * PI * t;
    let eye = Vec3::new(2.5 * angle.cos(), 2.5 * angle.sin(), 0.5);
    let forward = (-eye).normalize();
    let rotation = Quat::from_rotation_arc(Vec3::Z, forward);
    Affine3A::from_rotation_translation(rotation, eye)
}
