use anyhow::{Context, Result};
use glam::Vec3;

use crate::camera::{PinholeCamera, ViewSnapshot, Viewport};
use crate::device::{BufferObject, ContextHandle, FrameTarget, SoftwareTarget};
use crate::geometry::SurfelVertex;

use super::{splat_range, DrawStats, FrameCtx, SceneRenderer};

const FRUSTUM_DEPTH: f32 = 0.1;
const FRUSTUM_COLOR: [u8; 4] = [255, 255, 255, 255];

/// CPU rasterizer for software contexts.
///
/// Mesh triangles are depth tested; splats are screen-aligned squares that
/// also test and write depth. Frustum lines are drawn on top.
#[derive(Debug, Default)]
pub struct SoftwareRasterizer {
    depth: Vec<f32>,
    width: u32,
    height: u32,
}

impl SoftwareRasterizer {
    pub fn new() -> Self {
        Self::default()
    }

    fn reset_depth(&mut self, width: u32, height: u32) {
        let len = width as usize * height as usize;
        self.width = width;
        self.height = height;
        self.depth.clear();
        self.depth.resize(len, f32::INFINITY);
    }

    /// Writes `color` at (x, y) if `z` is nearer than what is there.
    fn plot(&mut self, target: &mut SoftwareTarget, x: i64, y: i64, z: f32, color: [u8; 4]) {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return;
        }
        let i = y as usize * self.width as usize + x as usize;
        if z < self.depth[i] {
            self.depth[i] = z;
            target.put_pixel(x, y, color);
        }
    }

    fn draw_mesh(
        &mut self,
        frame: &FrameCtx<'_>,
        target: &mut SoftwareTarget,
        vertices: &[SurfelVertex],
        triangles: &[[u32; 3]],
    ) -> usize {
        let settings = frame.settings;
        let mut drawn = 0;
        for tri in triangles {
            let corners: Option<Vec<&SurfelVertex>> =
                tri.iter().map(|&i| vertices.get(i as usize)).collect();
            let Some(corners) = corners else {
                continue;
            };
            let world = [corners[0], corners[1], corners[2]].map(|v| Vec3::from(v.position));
            let Some(screen) = project_all(frame.view, &world) else {
                continue;
            };

            if settings.render_as_wireframe {
                for (a, b) in [(0, 1), (1, 2), (2, 0)] {
                    let color = corners[a].color;
                    self.line(target, screen[a], screen[b], color, true);
                }
            } else {
                let flat = if settings.triangle_normal_shading {
                    Some(normal_shade(&world, frame.view.viewing_dir))
                } else {
                    None
                };
                let colors = [corners[0].color, corners[1].color, corners[2].color];
                self.fill_triangle(target, &screen, colors, flat);
            }
            drawn += 1;
        }
        drawn
    }

    fn fill_triangle(
        &mut self,
        target: &mut SoftwareTarget,
        p: &[(f32, f32, f32); 3],
        colors: [[u8; 4]; 3],
        flat: Option<[u8; 4]>,
    ) {
        let area = edge(p[0], p[1], p[2].0, p[2].1);
        if area.abs() < f32::EPSILON {
            return;
        }
        let min_x = p.iter().map(|v| v.0).fold(f32::INFINITY, f32::min).floor().max(0.0) as i64;
        let max_x = p
            .iter()
            .map(|v| v.0)
            .fold(f32::NEG_INFINITY, f32::max)
            .ceil()
            .min(self.width as f32 - 1.0) as i64;
        let min_y = p.iter().map(|v| v.1).fold(f32::INFINITY, f32::min).floor().max(0.0) as i64;
        let max_y = p
            .iter()
            .map(|v| v.1)
            .fold(f32::NEG_INFINITY, f32::max)
            .ceil()
            .min(self.height as f32 - 1.0) as i64;

        for y in min_y..=max_y {
            for x in min_x..=max_x {
                let (px, py) = (x as f32, y as f32);
                let w0 = edge(p[1], p[2], px, py) / area;
                let w1 = edge(p[2], p[0], px, py) / area;
                let w2 = edge(p[0], p[1], px, py) / area;
                if w0 < 0.0 || w1 < 0.0 || w2 < 0.0 {
                    continue;
                }
                let z = w0 * p[0].2 + w1 * p[1].2 + w2 * p[2].2;
                let color = flat.unwrap_or_else(|| blend(colors, [w0, w1, w2]));
                self.plot(target, x, y, z, color);
            }
        }
    }

    fn draw_splats(
        &mut self,
        frame: &FrameCtx<'_>,
        target: &mut SoftwareTarget,
        surfels: &[SurfelVertex],
    ) -> usize {
        let half = frame.settings.splat_half_extent();
        let reach = half.ceil() as i64;
        let mut drawn = 0;
        for surfel in surfels {
            let Some((u, v, z)) = frame.view.project(Vec3::from(surfel.position)) else {
                continue;
            };
            let (cx, cy) = (u.round() as i64, v.round() as i64);
            for dy in -reach..=reach {
                for dx in -reach..=reach {
                    if (dx as f32).abs() <= half && (dy as f32).abs() <= half {
                        self.plot(target, cx + dx, cy + dy, z, surfel.color);
                    }
                }
            }
            drawn += 1;
        }
        drawn
    }

    fn draw_frustum(
        &mut self,
        frame: &FrameCtx<'_>,
        target: &mut SoftwareTarget,
        camera: &PinholeCamera,
    ) {
        let Some(pose) = frame.view.frustum_pose else {
            return;
        };
        let origin = pose.transform_point3(Vec3::ZERO);
        let corners = camera
            .frustum_corners(FRUSTUM_DEPTH)
            .map(|c| pose.transform_point3(c));

        let mut segments = Vec::with_capacity(8);
        for i in 0..4 {
            segments.push((origin, corners[i]));
            segments.push((corners[i], corners[(i + 1) % 4]));
        }
        for (a, b) in segments {
            if let Some([pa, pb]) = project_all(frame.view, &[a, b]) {
                self.line(target, pa, pb, FRUSTUM_COLOR, false);
            }
        }
    }

    fn line(
        &mut self,
        target: &mut SoftwareTarget,
        a: (f32, f32, f32),
        b: (f32, f32, f32),
        color: [u8; 4],
        depth_test: bool,
    ) {
        let bounds = (self.width as f32 - 0.5, self.height as f32 - 0.5);
        let Some((t0, t1)) = clip_segment((a.0, a.1), (b.0, b.1), bounds) else {
            return;
        };
        let lerp = |t: f64| {
            let at = |from: f32, to: f32| (from as f64 + (to as f64 - from as f64) * t) as f32;
            (at(a.0, b.0), at(a.1, b.1), at(a.2, b.2))
        };
        let (a, b) = (lerp(t0), lerp(t1));

        let steps = (b.0 - a.0).abs().max((b.1 - a.1).abs()).ceil().max(1.0) as usize;
        for s in 0..=steps {
            let t = s as f32 / steps as f32;
            let x = (a.0 + (b.0 - a.0) * t).round() as i64;
            let y = (a.1 + (b.1 - a.1) * t).round() as i64;
            if depth_test {
                let z = a.2 + (b.2 - a.2) * t;
                self.plot(target, x, y, z, color);
            } else {
                target.put_pixel(x, y, color);
            }
        }
    }
}

impl SceneRenderer for SoftwareRasterizer {
    fn prepare(&mut self, ctx: &ContextHandle, viewport: Viewport) -> Result<()> {
        anyhow::ensure!(
            ctx.software().is_some(),
            "software rasterizer needs a software context"
        );
        self.reset_depth(viewport.width, viewport.height);
        Ok(())
    }

    fn resize(&mut self, viewport: Viewport) {
        self.reset_depth(viewport.width, viewport.height);
    }

    fn draw(&mut self, frame: &FrameCtx<'_>, target: &mut FrameTarget) -> Result<DrawStats> {
        let target = target
            .as_software_mut()
            .context("software rasterizer needs a software frame target")?;
        let (width, height) = target.size();
        self.reset_depth(width, height);

        let scene = frame.scene;
        let settings = frame.settings;
        let mut stats = DrawStats {
            surfels: scene.point_count(),
            ..DrawStats::default()
        };

        if settings.show_mesh {
            if let (Some(vbo), Some(ibo)) = (scene.mesh_vertices(), scene.mesh_indices()) {
                let vertices: Vec<SurfelVertex> = read_pod(vbo, vbo.size() as usize)?;
                let triangles: Vec<[u32; 3]> = read_pod(ibo, scene.triangle_count() * 12)?;
                stats.triangles = self.draw_mesh(frame, target, &vertices, &triangles);
            }
        }

        let range = splat_range(scene, settings);
        if !range.is_empty() {
            if let Some(vbo) = scene.surfel_vertices() {
                let stride = SurfelVertex::STRIDE as usize;
                let surfels: Vec<SurfelVertex> = read_pod(vbo, range.end * stride)?;
                stats.splats = self.draw_splats(frame, target, &surfels[range]);
            }
        }

        if settings.render_camera_frustum {
            if let Some(bindings) = frame.bindings {
                self.draw_frustum(frame, target, &bindings.camera);
            }
        }

        Ok(stats)
    }

    fn release(&mut self) {
        self.depth = Vec::new();
    }
}

fn read_pod<T: bytemuck::Pod>(buffer: &BufferObject, len: usize) -> Result<Vec<T>> {
    let size = std::mem::size_of::<T>();
    let len = len - len % size;
    let bytes = buffer
        .read_host(0, len)
        .with_context(|| format!("{} is not readable from the host ({len} bytes)", buffer.id()))?;
    Ok(bytemuck::pod_collect_to_vec(&bytes))
}

fn project_all<const N: usize>(view: &ViewSnapshot, world: &[Vec3; N]) -> Option<[(f32, f32, f32); N]> {
    let mut out = [(0.0, 0.0, 0.0); N];
    for (slot, p) in out.iter_mut().zip(world) {
        *slot = view.project(*p)?;
    }
    Some(out)
}

/// Liang–Barsky clip of the segment `a`–`b` against the pixel rectangle
/// `[-0.5, max.0] × [-0.5, max.1]`.
///
/// Returns the kept parameter range, or `None` when nothing is visible.
fn clip_segment(a: (f32, f32), b: (f32, f32), max: (f32, f32)) -> Option<(f64, f64)> {
    if ![a.0, a.1, b.0, b.1].iter().all(|v| v.is_finite()) {
        return None;
    }
    let (x0, y0) = (a.0 as f64, a.1 as f64);
    let (dx, dy) = (b.0 as f64 - x0, b.1 as f64 - y0);
    let (max_x, max_y) = (max.0 as f64, max.1 as f64);

    let mut t0 = 0.0f64;
    let mut t1 = 1.0f64;
    for (p, q) in [
        (-dx, x0 + 0.5),
        (dx, max_x - x0),
        (-dy, y0 + 0.5),
        (dy, max_y - y0),
    ] {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
            continue;
        }
        let r = q / p;
        if p < 0.0 {
            t0 = t0.max(r);
        } else {
            t1 = t1.min(r);
        }
        if t0 > t1 {
            return None;
        }
    }
    Some((t0, t1))
}

fn edge(a: (f32, f32, f32), b: (f32, f32, f32), x: f32, y: f32) -> f32 {
    (b.0 - a.0) * (y - a.1) - (b.1 - a.1) * (x - a.0)
}

fn blend(colors: [[u8; 4]; 3], w: [f32; 3]) -> [u8; 4] {
    let mut out = [0u8; 4];
    for (c, slot) in out.iter_mut().enumerate() {
        let v = colors[0][c] as f32 * w[0] + colors[1][c] as f32 * w[1] + colors[2][c] as f32 * w[2];
        *slot = v.round().clamp(0.0, 255.0) as u8;
    }
    out
}

fn normal_shade(world: &[Vec3; 3], viewing_dir: Vec3) -> [u8; 4] {
    let n = (world[1] - world[0]).cross(world[2] - world[0]).normalize_or_zero();
    let intensity = (0.2 + 0.8 * n.dot(viewing_dir).abs()).clamp(0.0, 1.0);
    let g = (intensity * 255.0).round() as u8;
    [g, g, g, 255]
}

#[cfg(test)]
mod tests {
    use glam::Affine3A;

    use super::*;
    use crate::camera::CameraState;
    use crate::device::{ContextConfig, ContextManager};
    use crate::geometry::{Mesh, MeshSnapshot, PointCloud, PointCloudSnapshot};
    use crate::render::{RenderSettings, SceneGeometry};
    use crate::time::FrameClock;

    struct Fixture {
        ctx: ContextHandle,
        scene: SceneGeometry,
        view: ViewSnapshot,
        settings: RenderSettings,
        target: FrameTarget,
        renderer: SoftwareRasterizer,
    }

    fn fixture() -> Fixture {
        let ctx = ContextManager::new(ContextConfig::software())
            .try_create_windowless(None)
            .unwrap();
        let viewport = Viewport::new(64, 48);
        let mut camera = CameraState::new();
        camera.set_look_at(Vec3::ZERO, Vec3::new(0.0, -5.0, 0.0), Affine3A::IDENTITY);
        let view = camera.snapshot(PinholeCamera::for_viewport(viewport));
        let target = ctx.create_target(64, 48).unwrap();
        let mut renderer = SoftwareRasterizer::new();
        renderer.prepare(&ctx, viewport).unwrap();
        Fixture {
            ctx,
            scene: SceneGeometry::new(),
            view,
            settings: RenderSettings {
                render_camera_frustum: false,
                ..RenderSettings::default()
            },
            target,
            renderer,
        }
    }

    impl Fixture {
        fn draw(&mut self) -> DrawStats {
            let frame = FrameCtx {
                context: &self.ctx,
                viewport: Viewport::new(64, 48),
                view: &self.view,
                scene: &self.scene,
                settings: &self.settings,
                bindings: None,
                time: FrameClock::new().tick(),
            };
            self.target.clear([0.0, 0.0, 0.0, 1.0]);
            self.renderer.draw(&frame, &mut self.target).unwrap()
        }

        fn lit_pixels(&self) -> usize {
            self.target
                .as_software()
                .unwrap()
                .pixels()
                .chunks_exact(4)
                .filter(|px| px[..3] != [0, 0, 0])
                .count()
        }
    }

    #[test]
    fn empty_scene_draws_nothing() {
        let mut f = fixture();
        assert_eq!(f.draw(), DrawStats::default());
        assert_eq!(f.lit_pixels(), 0);
    }

    #[test]
    fn splat_covers_its_extent() {
        let mut f = fixture();
        f.settings.splat_half_extent_in_pixels = 2.0;
        let cloud = PointCloud::new(vec![SurfelVertex::new([0.0, 0.0, 0.0], [255, 0, 0])]).unwrap();
        f.scene
            .apply_point_cloud(&f.ctx, &PointCloudSnapshot::host(cloud))
            .unwrap();

        let stats = f.draw();
        assert_eq!(stats.surfels, 1);
        assert_eq!(stats.splats, 1);
        assert_eq!(f.lit_pixels(), 25);
    }

    #[test]
    fn mesh_triangle_is_filled() {
        let mut f = fixture();
        let v = |x: f32, z: f32| SurfelVertex::new([x, 0.0, z], [0, 200, 0]);
        let mesh = Mesh::new(vec![v(-1.0, -1.0), v(1.0, -1.0), v(0.0, 1.0)], vec![[0, 1, 2]]).unwrap();
        f.scene.apply_mesh(&f.ctx, &MeshSnapshot::host(mesh)).unwrap();

        let stats = f.draw();
        assert_eq!(stats.triangles, 1);
        assert!(f.lit_pixels() > 50);
        let center = f.target.as_software().unwrap().pixel(31, 23).unwrap();
        assert_eq!(center, [0, 200, 0, 255]);
    }

    #[test]
    fn hidden_mesh_is_skipped() {
        let mut f = fixture();
        f.settings.show_mesh = false;
        let v = |x: f32, z: f32| SurfelVertex::new([x, 0.0, z], [0, 200, 0]);
        let mesh = Mesh::new(vec![v(-1.0, -1.0), v(1.0, -1.0), v(0.0, 1.0)], vec![[0, 1, 2]]).unwrap();
        f.scene.apply_mesh(&f.ctx, &MeshSnapshot::host(mesh)).unwrap();
        assert_eq!(f.draw().triangles, 0);
        assert_eq!(f.lit_pixels(), 0);
    }

    #[test]
    fn wireframe_edge_is_clipped_to_the_target() {
        let mut f = fixture();
        f.settings.render_as_wireframe = true;
        // The first vertex sits just past the near plane and projects
        // hundreds of millions of pixels off screen.
        let mesh = Mesh::new(
            vec![
                SurfelVertex::new([1e5, -4.98, 0.0], [0, 255, 0]),
                SurfelVertex::new([0.0, 0.0, 0.0], [0, 255, 0]),
                SurfelVertex::new([1.0, 0.0, 0.0], [0, 255, 0]),
            ],
            vec![[0, 1, 2]],
        )
        .unwrap();
        f.scene.apply_mesh(&f.ctx, &MeshSnapshot::host(mesh)).unwrap();

        let start = std::time::Instant::now();
        let stats = f.draw();
        assert!(start.elapsed() < std::time::Duration::from_secs(1));
        assert_eq!(stats.triangles, 1);
        assert!(f.lit_pixels() > 0);
    }

    #[test]
    fn clip_keeps_the_visible_part() {
        let max = (9.5, 9.5);
        assert_eq!(clip_segment((2.0, 2.0), (5.0, 5.0), max), Some((0.0, 1.0)));
        assert_eq!(clip_segment((-20.0, -20.0), (-10.0, 5.0), max), None);
        let (t0, t1) = clip_segment((-10.5, 5.0), (19.5, 5.0), max).unwrap();
        assert!((t0 - 1.0 / 3.0).abs() < 1e-6);
        assert!((t1 - 2.0 / 3.0).abs() < 1e-6);
        assert_eq!(clip_segment((f32::NAN, 0.0), (1.0, 1.0), max), None);
    }

    #[test]
    fn nearer_splat_wins() {
        let mut f = fixture();
        f.settings.splat_half_extent_in_pixels = 1.0;
        let cloud = PointCloud::new(vec![
            SurfelVertex::new([0.0, -1.0, 0.0], [255, 0, 0]),
            SurfelVertex::new([0.0, 1.0, 0.0], [0, 0, 255]),
        ])
        .unwrap();
        f.scene
            .apply_point_cloud(&f.ctx, &PointCloudSnapshot::host(cloud))
            .unwrap();
        f.draw();
        // The eye is at y = -5, so y = -1 is nearer.
        let center = f.target.as_software().unwrap().pixel(31, 23).unwrap();
        assert_eq!(center, [255, 0, 0, 255]);
    }
}
