use glam::{Mat4, Vec2, Vec3, Vec4};

use super::Viewport;

/// Pinhole intrinsics in pixel units.
///
/// Camera space follows the computer-vision convention: x right, y down,
/// z forward. Pixel centers sit at integer coordinates.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct PinholeCamera {
    pub width: u32,
    pub height: u32,
    pub fx: f32,
    pub fy: f32,
    pub cx: f32,
    pub cy: f32,
}

impl PinholeCamera {
    pub const fn new(width: u32, height: u32, fx: f32, fy: f32, cx: f32, cy: f32) -> Self {
        Self {
            width,
            height,
            fx,
            fy,
            cx,
            cy,
        }
    }

    /// Render camera for a viewport: focal length equal to the height,
    /// principal point in the center.
    pub fn for_viewport(viewport: Viewport) -> Self {
        let (w, h) = (viewport.width as f32, viewport.height as f32);
        Self::new(viewport.width, viewport.height, h, h, 0.5 * w - 0.5, 0.5 * h - 0.5)
    }

    pub fn viewport(&self) -> Viewport {
        Viewport::new(self.width, self.height)
    }

    /// Pixel position of a camera-space point in front of the camera.
    pub fn project(&self, p: Vec3) -> Option<Vec2> {
        if p.z <= 0.0 {
            return None;
        }
        Some(Vec2::new(
            self.fx * p.x / p.z + self.cx,
            self.fy * p.y / p.z + self.cy,
        ))
    }

    /// Camera-space direction (z = 1) through a pixel.
    pub fn unproject(&self, pixel: Vec2) -> Vec3 {
        Vec3::new(
            (pixel.x - self.cx) / self.fx,
            (pixel.y - self.cy) / self.fy,
            1.0,
        )
    }

    /// Clip-space projection for wgpu (y up, depth in `[0, 1]`) that matches
    /// [`project`](Self::project) pixel for pixel.
    pub fn projection_matrix(&self, min_depth: f32, max_depth: f32) -> Mat4 {
        let (w, h) = (self.width.max(1) as f32, self.height.max(1) as f32);
        let (n, f) = (min_depth, max_depth);

        let m00 = 2.0 * self.fx / w;
        let m02 = 2.0 * (self.cx + 0.5) / w - 1.0;
        let m11 = -2.0 * self.fy / h;
        let m12 = 1.0 - 2.0 * (self.cy + 0.5) / h;
        let m22 = f / (f - n);
        let m23 = -f * n / (f - n);

        Mat4::from_cols(
            Vec4::new(m00, 0.0, 0.0, 0.0),
            Vec4::new(0.0, m11, 0.0, 0.0),
            Vec4::new(m02, m12, m22, 1.0),
            Vec4::new(0.0, 0.0, m23, 0.0),
        )
    }

    /// Frustum corners in camera space at `depth`, clockwise from top-left.
    pub fn frustum_corners(&self, depth: f32) -> [Vec3; 4] {
        let (w, h) = (self.width as f32, self.height as f32);
        [
            Vec2::new(-0.5, -0.5),
            Vec2::new(w - 0.5, -0.5),
            Vec2::new(w - 0.5, h - 0.5),
            Vec2::new(-0.5, h - 0.5),
        ]
        .map(|px| self.unproject(px) * depth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ndc(m: Mat4, p: Vec3) -> Vec3 {
        let clip = m * p.extend(1.0);
        clip.truncate() / clip.w
    }

    #[test]
    fn viewport_camera_centers_principal_point() {
        let cam = PinholeCamera::for_viewport(Viewport::new(640, 480));
        assert_eq!(cam.fx, 480.0);
        assert_eq!(cam.cx, 319.5);
        assert_eq!(cam.cy, 239.5);
        assert_eq!(cam.viewport(), Viewport::new(640, 480));
    }

    #[test]
    fn optical_axis_maps_to_ndc_origin() {
        let cam = PinholeCamera::for_viewport(Viewport::new(640, 480));
        let m = cam.projection_matrix(0.01, 50.0);
        let p = ndc(m, Vec3::new(0.0, 0.0, 3.0));
        assert!(p.x.abs() < 1e-6 && p.y.abs() < 1e-6);
    }

    #[test]
    fn depth_range_maps_to_zero_one() {
        let cam = PinholeCamera::for_viewport(Viewport::new(64, 64));
        let m = cam.projection_matrix(0.5, 10.0);
        assert!(ndc(m, Vec3::new(0.0, 0.0, 0.5)).z.abs() < 1e-6);
        assert!((ndc(m, Vec3::new(0.0, 0.0, 10.0)).z - 1.0).abs() < 1e-5);
    }

    #[test]
    fn projection_matches_pixel_projection() {
        let cam = PinholeCamera::new(100, 50, 80.0, 70.0, 40.0, 30.0);
        let m = cam.projection_matrix(0.1, 100.0);
        let p = Vec3::new(0.3, -0.2, 2.0);

        let px = cam.project(p).unwrap();
        let n = ndc(m, p);
        // ndc → pixel, y flipped, pixel centers at integers.
        let u = (n.x + 1.0) * 0.5 * 100.0 - 0.5;
        let v = (1.0 - n.y) * 0.5 * 50.0 - 0.5;
        assert!((u - px.x).abs() < 1e-3, "{u} vs {}", px.x);
        assert!((v - px.y).abs() < 1e-3, "{v} vs {}", px.y);
    }

    #[test]
    fn points_behind_camera_do_not_project() {
        let cam = PinholeCamera::for_viewport(Viewport::new(8, 8));
        assert_eq!(cam.project(Vec3::new(0.0, 0.0, -1.0)), None);
    }

    #[test]
    fn frustum_corners_project_to_image_corners() {
        let cam = PinholeCamera::for_viewport(Viewport::new(32, 16));
        let corners = cam.frustum_corners(2.0);
        let tl = cam.project(corners[0]).unwrap();
        let br = cam.project(corners[2]).unwrap();
        assert!((tl - Vec2::new(-0.5, -0.5)).length() < 1e-4);
        assert!((br - Vec2::new(31.5, 15.5)).length() < 1e-4);
    }
}
