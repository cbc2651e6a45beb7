use std::f32::consts::FRAC_PI_2;

use glam::{Affine3A, Mat3, Mat4, Quat, Vec3, Vec4};

use super::PinholeCamera;

const THETA_LIMIT: f32 = FRAC_PI_2 - 1e-3;

/// Converts a right-handed look-at view (y up, looking down -z) to camera
/// space with y down and z forward.
const GL_TO_CV: Mat4 = Mat4::from_cols(
    Vec4::new(1.0, 0.0, 0.0, 0.0),
    Vec4::new(0.0, -1.0, 0.0, 0.0),
    Vec4::new(0.0, 0.0, -1.0, 0.0),
    Vec4::W,
);

/// Free-orbit camera parameters in the up-aligned frame.
///
/// The eye sits at `offset - radius * (cos θ cos φ, cos θ sin φ, sin θ)`,
/// rotated so that local +z is the configured up direction, and looks at
/// `offset`.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct OrbitParameters {
    pub offset: Vec3,
    pub radius: f32,
    pub theta: f32,
    pub phi: f32,
}

impl Default for OrbitParameters {
    fn default() -> Self {
        Self {
            offset: Vec3::ZERO,
            radius: 5.0,
            theta: 0.5,
            phi: -0.6,
        }
    }
}

impl OrbitParameters {
    fn direction(&self) -> Vec3 {
        let (st, ct) = self.theta.sin_cos();
        let (sp, cp) = self.phi.sin_cos();
        Vec3::new(ct * cp, ct * sp, st)
    }
}

/// Camera state shared between external threads and the render loop.
///
/// External threads mutate it through the visualizer's setters; the render
/// loop copies a [`ViewSnapshot`] out of it once per frame.
#[derive(Debug, Clone)]
pub struct CameraState {
    up_rotation: Mat3,
    orbit: OrbitParameters,
    view_override: Option<Mat4>,
    min_depth: f32,
    max_depth: f32,
    frustum_pose: Option<Affine3A>,
}

impl Default for CameraState {
    fn default() -> Self {
        Self {
            up_rotation: Mat3::IDENTITY,
            orbit: OrbitParameters::default(),
            view_override: None,
            min_depth: 0.01,
            max_depth: 50.0,
            frustum_pose: None,
        }
    }
}

impl CameraState {
    pub fn new() -> Self {
        Self::default()
    }

    /// World direction that appears as "up" while orbiting.
    pub fn up_direction(&self) -> Vec3 {
        self.up_rotation * Vec3::Z
    }

    pub fn set_up_direction(&mut self, direction: Vec3) {
        let Some(up) = direction.try_normalize() else {
            log::warn!("ignoring degenerate up direction {direction}");
            return;
        };
        self.up_rotation = Mat3::from_quat(Quat::from_rotation_arc(Vec3::Z, up));
    }

    /// Moves the orbit center, keeping radius and angles.
    pub fn center_view_on(&mut self, position: Vec3) {
        self.orbit.offset = position;
        self.view_override = None;
    }

    /// Orbits around `look_at` from `eye`.
    pub fn set_look_at(&mut self, look_at: Vec3, eye: Vec3, frustum_pose: Affine3A) {
        self.frustum_pose = Some(frustum_pose);
        let local = self.up_rotation.transpose() * (look_at - eye);
        let radius = local.length();
        if radius <= f32::EPSILON {
            log::warn!("ignoring look-at with eye on the target ({eye})");
            return;
        }
        let dir = local / radius;
        self.orbit = OrbitParameters {
            offset: look_at,
            radius,
            theta: dir.z.clamp(-1.0, 1.0).asin().clamp(-THETA_LIMIT, THETA_LIMIT),
            phi: dir.y.atan2(dir.x),
        };
        self.view_override = None;
    }

    /// Uses an explicit camera with world-space axes `x` (right), `y` (down),
    /// `z` (forward) placed at `eye`.
    pub fn set_axes(&mut self, x: Vec3, y: Vec3, z: Vec3, eye: Vec3, frustum_pose: Affine3A) {
        self.frustum_pose = Some(frustum_pose);
        let (x, y, z) = (x.normalize_or_zero(), y.normalize_or_zero(), z.normalize_or_zero());
        if x == Vec3::ZERO || y == Vec3::ZERO || z == Vec3::ZERO {
            log::warn!("ignoring view with a zero axis");
            return;
        }
        let rows = Mat4::from_cols(
            x.extend(-x.dot(eye)),
            y.extend(-y.dot(eye)),
            z.extend(-z.dot(eye)),
            Vec4::W,
        );
        self.view_override = Some(rows.transpose());
    }

    pub fn set_parameters(
        &mut self,
        parameters: OrbitParameters,
        max_depth: f32,
        frustum_pose: Affine3A,
    ) {
        self.orbit = OrbitParameters {
            theta: parameters.theta.clamp(-THETA_LIMIT, THETA_LIMIT),
            radius: parameters.radius.max(f32::EPSILON),
            ..parameters
        };
        if max_depth > self.min_depth {
            self.max_depth = max_depth;
        } else {
            log::warn!("ignoring max depth {max_depth} (min depth is {})", self.min_depth);
        }
        self.view_override = None;
        self.frustum_pose = Some(frustum_pose);
    }

    /// Pose of the input camera, drawn as a frustum.
    pub fn set_frustum_pose(&mut self, frustum_pose: Affine3A) {
        self.frustum_pose = Some(frustum_pose);
    }

    pub fn frustum_pose(&self) -> Option<Affine3A> {
        self.frustum_pose
    }

    pub fn parameters(&self) -> OrbitParameters {
        self.orbit
    }

    pub fn depth_range(&self) -> (f32, f32) {
        (self.min_depth, self.max_depth)
    }

    pub fn uses_view_override(&self) -> bool {
        self.view_override.is_some()
    }

    fn orbit_eye(&self) -> Vec3 {
        self.orbit.offset - self.up_rotation * (self.orbit.radius * self.orbit.direction())
    }

    /// World → camera transform (x right, y down, z forward).
    pub fn view_matrix(&self) -> Mat4 {
        if let Some(view) = self.view_override {
            return view;
        }
        GL_TO_CV * Mat4::look_at_rh(self.orbit_eye(), self.orbit.offset, self.up_direction())
    }

    /// Freezes the current state for one frame rendered with `camera`.
    pub fn snapshot(&self, camera: PinholeCamera) -> ViewSnapshot {
        let view = self.view_matrix();
        let projection = camera.projection_matrix(self.min_depth, self.max_depth);
        let camera_to_world = view.inverse();
        ViewSnapshot {
            camera,
            view,
            projection,
            view_projection: projection * view,
            eye: camera_to_world.transform_point3(Vec3::ZERO),
            viewing_dir: camera_to_world.transform_vector3(Vec3::Z).normalize_or_zero(),
            min_depth: self.min_depth,
            max_depth: self.max_depth,
            frustum_pose: self.frustum_pose,
        }
    }
}

/// Per-frame copy of the camera, taken under the camera lock.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ViewSnapshot {
    pub camera: PinholeCamera,
    pub view: Mat4,
    pub projection: Mat4,
    pub view_projection: Mat4,
    pub eye: Vec3,
    pub viewing_dir: Vec3,
    pub min_depth: f32,
    pub max_depth: f32,
    pub frustum_pose: Option<Affine3A>,
}

impl ViewSnapshot {
    /// Pixel position and depth of a world point, if it is in front of the
    /// camera.
    pub fn project(&self, world: Vec3) -> Option<(f32, f32, f32)> {
        let p = self.view.transform_point3(world);
        if p.z < self.min_depth || p.z > self.max_depth {
            return None;
        }
        self.camera.project(p).map(|px| (px.x, px.y, p.z))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::Viewport;

    fn close(a: Vec3, b: Vec3) -> bool {
        (a - b).length() < 1e-4
    }

    // ── orbit ─────────────────────────────────────────────────────────────

    #[test]
    fn orbit_looks_at_offset() {
        let mut state = CameraState::new();
        state.center_view_on(Vec3::new(1.0, 2.0, 3.0));
        let snap = state.snapshot(PinholeCamera::for_viewport(Viewport::new(64, 48)));
        let target_cam = snap.view.transform_point3(Vec3::new(1.0, 2.0, 3.0));
        assert!(target_cam.x.abs() < 1e-4 && target_cam.y.abs() < 1e-4);
        assert!((target_cam.z - state.parameters().radius).abs() < 1e-4);
    }

    #[test]
    fn look_at_round_trips_through_parameters() {
        let mut state = CameraState::new();
        let look_at = Vec3::new(0.5, -1.0, 0.2);
        let eye = Vec3::new(3.0, 1.0, 2.0);
        state.set_look_at(look_at, eye, Affine3A::IDENTITY);

        let params = state.parameters();
        assert_eq!(params.offset, look_at);
        assert!((params.radius - (look_at - eye).length()).abs() < 1e-4);

        let snap = state.snapshot(PinholeCamera::for_viewport(Viewport::new(32, 32)));
        assert!(close(snap.eye, eye), "{} vs {eye}", snap.eye);
        assert!(close(snap.viewing_dir, (look_at - eye).normalize()));
        assert_eq!(snap.frustum_pose, Some(Affine3A::IDENTITY));
    }

    #[test]
    fn up_direction_is_screen_up() {
        let mut state = CameraState::new();
        state.set_up_direction(Vec3::new(0.0, 0.0, -2.0));
        assert!(close(state.up_direction(), Vec3::NEG_Z));

        let view = state.view_matrix();
        let up_cam = view.transform_vector3(state.up_direction());
        // y points down in camera space.
        assert!(up_cam.y < 0.0);
    }

    #[test]
    fn degenerate_up_is_ignored() {
        let mut state = CameraState::new();
        state.set_up_direction(Vec3::ZERO);
        assert!(close(state.up_direction(), Vec3::Z));
    }

    #[test]
    fn parameters_clamp_theta() {
        let mut state = CameraState::new();
        state.set_parameters(
            OrbitParameters {
                theta: 3.0,
                ..OrbitParameters::default()
            },
            20.0,
            Affine3A::IDENTITY,
        );
        assert!(state.parameters().theta < FRAC_PI_2);
        assert_eq!(state.depth_range().1, 20.0);
    }

    // ── explicit axes ─────────────────────────────────────────────────────

    #[test]
    fn axes_override_places_camera() {
        let mut state = CameraState::new();
        let eye = Vec3::new(0.0, 0.0, -4.0);
        state.set_axes(Vec3::X, Vec3::NEG_Y, Vec3::Z, eye, Affine3A::IDENTITY);
        assert!(state.uses_view_override());

        let snap = state.snapshot(PinholeCamera::for_viewport(Viewport::new(16, 16)));
        assert!(close(snap.eye, eye));
        assert!(close(snap.view.transform_point3(Vec3::ZERO), Vec3::new(0.0, 0.0, 4.0)));

        state.center_view_on(Vec3::ZERO);
        assert!(!state.uses_view_override());
    }

    #[test]
    fn snapshot_projects_center_to_image_center() {
        let state = CameraState::new();
        let snap = state.snapshot(PinholeCamera::for_viewport(Viewport::new(64, 48)));
        let (u, v, depth) = snap.project(Vec3::ZERO).unwrap();
        assert!((u - 31.5).abs() < 1e-3 && (v - 23.5).abs() < 1e-3);
        assert!((depth - 5.0).abs() < 1e-4);
    }
}
