use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use glam::{Affine3A, Vec3};

use crate::camera::{OrbitParameters, PinholeCamera};
use crate::error::VisError;
use crate::geometry::{MeshSnapshot, PointCloudSnapshot};
use crate::interop::{DebugFlags, InteropBindings, InteropRequest};
use crate::render::RenderSettings;
use crate::runtime::RuntimeCommand;
use crate::sync::InitPhase;

use super::Shared;

/// Counters describing the hand-off so far.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Diagnostics {
    pub init_phase: InitPhase,
    pub point_clouds_published: u64,
    pub point_clouds_superseded: u64,
    pub meshes_published: u64,
    pub meshes_superseded: u64,
}

/// Producer-side handle to a visualization.
///
/// Cheap to clone and usable from any thread except the one running the
/// render loop. Geometry updates never wait for a frame; they only block while
/// interop setup is still in flight.
#[derive(Clone, Default)]
pub struct Visualizer {
    shared: Arc<Shared>,
}

impl Visualizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    fn ensure_producer_thread(&self, operation: &str) -> Result<(), VisError> {
        if self.shared.on_render_thread() {
            return Err(VisError::invalid_state(format!(
                "{operation} called from the render thread"
            )));
        }
        Ok(())
    }

    /// Blocks until geometry may be published; returns the surfel capacity.
    fn wait_for_capacity(&self) -> Result<usize, VisError> {
        if self.shared.init.is_shut_down() {
            return Err(VisError::ShutDown);
        }
        let bindings = self.shared.init.wait_ready()?;
        Ok(bindings.max_point_count as usize)
    }

    // ── lifecycle ─────────────────────────────────────────────────────────

    /// Asks the render thread to register interop buffers for up to
    /// `max_point_count` surfels and blocks until it has.
    ///
    /// Call once, before the first frame.
    pub fn initialize_for_interop(
        &self,
        max_point_count: u32,
        camera: PinholeCamera,
        debug: DebugFlags,
    ) -> Result<InteropBindings, VisError> {
        self.ensure_producer_thread("initialize_for_interop")?;
        let request = InteropRequest::new(max_point_count, camera, debug);
        self.request_redraw();
        self.shared.init.request_setup(request)
    }

    pub fn init_phase(&self) -> InitPhase {
        self.shared.init.phase()
    }

    // ── geometry ──────────────────────────────────────────────────────────

    pub fn update_point_cloud(&self, snapshot: PointCloudSnapshot) -> Result<(), VisError> {
        self.ensure_producer_thread("update_point_cloud")?;
        let capacity = self.wait_for_capacity()?;
        snapshot.validate(capacity)?;
        self.shared.point_cloud.publish(snapshot);
        self.request_redraw();
        Ok(())
    }

    pub fn update_mesh(&self, snapshot: MeshSnapshot) -> Result<(), VisError> {
        self.ensure_producer_thread("update_mesh")?;
        let capacity = self.wait_for_capacity()?;
        snapshot.validate(capacity)?;
        self.shared.mesh.publish(snapshot);
        self.request_redraw();
        Ok(())
    }

    /// Publishes a device point cloud of `surfel_count` surfels together with
    /// a mesh built from all of them.
    ///
    /// Mesh indices must refer to the first `surfel_count` surfels. Both are
    /// validated before either is published. The render loop may
    /// still pick up the cloud one frame before the mesh.
    pub fn update_cloud_and_mesh(
        &self,
        surfel_count: u32,
        mesh: MeshSnapshot,
    ) -> Result<(), VisError> {
        self.ensure_producer_thread("update_cloud_and_mesh")?;
        let capacity = self.wait_for_capacity()?;
        let cloud = PointCloudSnapshot::device(surfel_count, surfel_count);
        cloud.validate(capacity)?;
        mesh.validate(surfel_count as usize)?;
        self.shared.point_cloud.publish(cloud);
        self.shared.mesh.publish(mesh);
        self.request_redraw();
        Ok(())
    }

    // ── view ──────────────────────────────────────────────────────────────

    pub fn set_up_direction(&self, direction: Vec3) {
        self.shared.camera().set_up_direction(direction);
        self.request_redraw();
    }

    pub fn center_view_on(&self, position: Vec3) {
        self.shared.camera().center_view_on(position);
        self.request_redraw();
    }

    /// Looks from `camera_position` at `look_at`; `frustum_pose` places the
    /// input camera frustum.
    pub fn set_view(&self, look_at: Vec3, camera_position: Vec3, frustum_pose: Affine3A) {
        self.shared
            .camera()
            .set_look_at(look_at, camera_position, frustum_pose);
        self.request_redraw();
    }

    /// Sets the view from explicit camera axes (x right, y down, z forward).
    pub fn set_view_axes(&self, x: Vec3, y: Vec3, z: Vec3, eye: Vec3, frustum_pose: Affine3A) {
        self.shared.camera().set_axes(x, y, z, eye, frustum_pose);
        self.request_redraw();
    }

    pub fn set_view_parameters(
        &self,
        parameters: OrbitParameters,
        max_depth: f32,
        frustum_pose: Affine3A,
    ) {
        self.shared
            .camera()
            .set_parameters(parameters, max_depth, frustum_pose);
        self.request_redraw();
    }

    /// Moves the input camera frustum without touching the view.
    pub fn set_camera_pose(&self, frustum_pose: Affine3A) {
        self.shared.camera().set_frustum_pose(frustum_pose);
        self.request_redraw();
    }

    pub fn camera_pose_parameters(&self) -> OrbitParameters {
        self.shared.camera().parameters()
    }

    // ── settings ──────────────────────────────────────────────────────────

    pub fn settings(&self) -> RenderSettings {
        self.shared.settings().clone()
    }

    pub fn update_settings(&self, update: impl FnOnce(&mut RenderSettings)) {
        {
            let mut settings = self.shared.settings();
            update(&mut *settings);
        }
        self.request_redraw();
    }

    // ── screenshots ───────────────────────────────────────────────────────

    /// Saves the next rendered frame to `path`; the format follows the
    /// extension. Blocks until the render thread reports back.
    pub fn request_screenshot(&self, path: impl Into<PathBuf>) -> Result<PathBuf, VisError> {
        self.ensure_producer_thread("request_screenshot")?;
        let path = path.into();
        self.request_redraw();
        self.shared.screenshots.request(path)?.into_result()
    }

    /// Like [`request_screenshot`](Self::request_screenshot), but gives up
    /// after `timeout`, returning `Ok(None)`.
    pub fn request_screenshot_timeout(
        &self,
        path: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Result<Option<PathBuf>, VisError> {
        self.ensure_producer_thread("request_screenshot_timeout")?;
        self.request_redraw();
        match self.shared.screenshots.request_timeout(path, timeout)? {
            Some(outcome) => outcome.into_result().map(Some),
            None => Ok(None),
        }
    }

    // ── frames ────────────────────────────────────────────────────────────

    /// Asks the render thread runtime for a frame. Ignored without one.
    pub fn request_redraw(&self) {
        self.shared.send(RuntimeCommand::RenderFrame);
    }

    /// Asks the render thread runtime to render one frame.
    ///
    /// A render loop driven directly on the caller's own thread renders with
    /// `RenderLoop::render_frame` instead.
    pub fn render_frame(&self) -> Result<(), VisError> {
        if self.shared.init.is_shut_down() {
            return Err(VisError::ShutDown);
        }
        if self.shared.send(RuntimeCommand::RenderFrame) {
            Ok(())
        } else {
            Err(VisError::invalid_state("no render thread is attached"))
        }
    }

    pub fn diagnostics(&self) -> Diagnostics {
        Diagnostics {
            init_phase: self.shared.init.phase(),
            point_clouds_published: self.shared.point_cloud.published(),
            point_clouds_superseded: self.shared.point_cloud.superseded(),
            meshes_published: self.shared.mesh.published(),
            meshes_superseded: self.shared.mesh.superseded(),
        }
    }
}

impl std::fmt::Debug for Visualizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Visualizer")
            .field("init_phase", &self.shared.init.phase())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::Viewport;
    use crate::geometry::{Mesh, PointCloud, SurfelVertex};

    fn camera() -> PinholeCamera {
        PinholeCamera::for_viewport(Viewport::new(64, 48))
    }

    // ── guards ────────────────────────────────────────────────────────────

    #[test]
    fn publishing_before_setup_is_invalid() {
        let vis = Visualizer::new();
        let err = vis
            .update_point_cloud(PointCloudSnapshot::device(1, 0))
            .unwrap_err();
        assert!(matches!(err, VisError::InvalidState(_)));
        assert_eq!(vis.diagnostics().point_clouds_published, 0);
    }

    #[test]
    fn render_frame_needs_a_runtime() {
        let vis = Visualizer::new();
        assert!(matches!(vis.render_frame(), Err(VisError::InvalidState(_))));
    }

    #[test]
    fn render_thread_cannot_publish() {
        let vis = Visualizer::new();
        vis.shared().claim_render_thread();
        let err = vis.update_mesh(MeshSnapshot::device(vec![])).unwrap_err();
        assert!(matches!(err, VisError::InvalidState(_)));
        let err = vis
            .initialize_for_interop(10, camera(), DebugFlags::default())
            .unwrap_err();
        assert!(matches!(err, VisError::InvalidState(_)));
        assert_eq!(vis.init_phase(), InitPhase::Uninitialized);
    }

    #[test]
    fn shut_down_visualizer_rejects_work() {
        let vis = Visualizer::new();
        vis.shared().init.close();
        vis.shared().screenshots.close();
        assert!(matches!(
            vis.initialize_for_interop(10, camera(), DebugFlags::default()),
            Err(VisError::ShutDown)
        ));
        assert_eq!(
            vis.update_point_cloud(PointCloudSnapshot::device(1, 0)),
            Err(VisError::ShutDown)
        );
        assert_eq!(vis.request_screenshot("x.png"), Err(VisError::ShutDown));
        assert_eq!(vis.render_frame(), Err(VisError::ShutDown));
    }

    // ── view and settings ─────────────────────────────────────────────────

    #[test]
    fn view_parameters_round_trip() {
        let vis = Visualizer::new();
        let params = OrbitParameters {
            offset: Vec3::new(1.0, 2.0, 3.0),
            radius: 7.0,
            theta: 0.25,
            phi: 1.0,
        };
        vis.set_view_parameters(params, 20.0, Affine3A::IDENTITY);
        assert_eq!(vis.camera_pose_parameters(), params);

        vis.center_view_on(Vec3::ZERO);
        assert_eq!(vis.camera_pose_parameters().offset, Vec3::ZERO);
    }

    #[test]
    fn settings_update_in_place() {
        let vis = Visualizer::new();
        vis.update_settings(|s| s.render_as_wireframe = true);
        assert!(vis.settings().render_as_wireframe);
    }

    // ── validation ────────────────────────────────────────────────────────

    /// Completes interop setup the way the render thread would.
    fn ready(vis: &Visualizer, capacity: u32) {
        use crate::device::{ContextConfig, ContextManager};
        use crate::interop::InteropResourceTable;

        let producer = {
            let vis = vis.clone();
            std::thread::spawn(move || {
                vis.initialize_for_interop(capacity, camera(), DebugFlags::default())
            })
        };
        let ctx = ContextManager::new(ContextConfig::software())
            .try_create_windowless(None)
            .unwrap();
        let _previous = ContextManager::try_switch_to(&ctx).unwrap();
        let request = vis
            .shared()
            .init
            .wait_for_request(Duration::from_secs(5))
            .unwrap();
        let mut table = InteropResourceTable::new();
        let bindings = InteropBindings::register(&mut table, &ctx, &request).unwrap();
        vis.shared().init.complete(bindings).unwrap();
        producer.join().unwrap().unwrap();
    }

    #[test]
    fn malformed_snapshots_are_rejected() {
        let vis = Visualizer::new();
        ready(&vis, 100);

        let err = vis
            .update_point_cloud(PointCloudSnapshot::device(101, 0))
            .unwrap_err();
        assert!(matches!(err, VisError::InvalidSnapshot(_)));
        let err = vis
            .update_point_cloud(PointCloudSnapshot::device(10, 11))
            .unwrap_err();
        assert!(matches!(err, VisError::InvalidSnapshot(_)));
        let err = vis
            .update_cloud_and_mesh(50, MeshSnapshot::device(vec![[0, 1, 100]]))
            .unwrap_err();
        assert!(matches!(err, VisError::InvalidSnapshot(_)));
        assert_eq!(vis.diagnostics().point_clouds_published, 0);
        assert_eq!(vis.diagnostics().meshes_published, 0);
    }

    #[test]
    fn valid_snapshots_are_staged() {
        let vis = Visualizer::new();
        ready(&vis, 100);

        let v = SurfelVertex::new([0.0, 0.0, 1.0], [10, 20, 30]);
        vis.update_point_cloud(PointCloudSnapshot::host(PointCloud::new(vec![v; 4]).unwrap()))
            .unwrap();
        vis.update_mesh(MeshSnapshot::host(
            Mesh::new(vec![v; 3], vec![[0, 1, 2]]).unwrap(),
        ))
        .unwrap();
        vis.update_cloud_and_mesh(60, MeshSnapshot::device(vec![[0, 1, 2]]))
            .unwrap();

        let diagnostics = vis.diagnostics();
        assert_eq!(diagnostics.init_phase, InitPhase::Ready);
        assert_eq!(diagnostics.point_clouds_published, 2);
        assert_eq!(diagnostics.point_clouds_superseded, 1);
        assert_eq!(diagnostics.meshes_superseded, 1);

        let cloud = vis.shared().point_cloud.try_consume().unwrap();
        assert_eq!(cloud.point_count(), 60);
        assert_eq!(cloud.latest_mesh_surfel_count(), 60);
    }
}
