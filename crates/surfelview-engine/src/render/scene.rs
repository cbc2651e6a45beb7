use anyhow::{Context, Result};

use crate::device::{BufferObject, BufferRole, ContextHandle};
use crate::geometry::{MeshSnapshot, PointCloudSnapshot};
use crate::interop::InteropBindings;

/// Render-side copy of the latest geometry.
///
/// Host snapshots are uploaded into buffers owned here; device snapshots only
/// update counts and draw straight from the registered interop vertex
/// buffer. Buffers grow in powers of two and are never shrunk.
#[derive(Debug, Default)]
pub struct SceneGeometry {
    interop_vertices: Option<BufferObject>,

    cloud_buffer: Option<BufferObject>,
    cloud_from_interop: bool,
    point_count: usize,
    latest_mesh_surfel_count: usize,

    mesh_vertex_buffer: Option<BufferObject>,
    mesh_from_interop: bool,
    index_buffer: Option<BufferObject>,
    triangle_count: usize,

    generation: u64,
}

impl SceneGeometry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn bind_interop(&mut self, bindings: &InteropBindings) {
        self.interop_vertices = Some(bindings.vertices.clone());
    }

    pub fn apply_point_cloud(
        &mut self,
        ctx: &ContextHandle,
        snapshot: &PointCloudSnapshot,
    ) -> Result<()> {
        match snapshot {
            PointCloudSnapshot::Host(cloud) => {
                let bytes = cloud.as_bytes();
                let buffer = ensure_capacity(
                    ctx,
                    &mut self.cloud_buffer,
                    "surfelview cloud vbo",
                    bytes.len() as u64,
                    BufferRole::Vertex,
                )?;
                buffer.write(0, bytes).context("uploading point cloud")?;
                self.cloud_from_interop = false;
            }
            PointCloudSnapshot::Device { .. } => {
                anyhow::ensure!(
                    self.interop_vertices.is_some(),
                    "device point cloud without an interop vertex buffer"
                );
                self.cloud_from_interop = true;
            }
        }
        self.point_count = snapshot.point_count();
        self.latest_mesh_surfel_count = snapshot.latest_mesh_surfel_count();
        self.generation += 1;
        Ok(())
    }

    pub fn apply_mesh(&mut self, ctx: &ContextHandle, snapshot: &MeshSnapshot) -> Result<()> {
        match snapshot {
            MeshSnapshot::Host(mesh) => {
                let bytes = mesh.vertex_bytes();
                let buffer = ensure_capacity(
                    ctx,
                    &mut self.mesh_vertex_buffer,
                    "surfelview mesh vbo",
                    bytes.len() as u64,
                    BufferRole::Vertex,
                )?;
                buffer.write(0, bytes).context("uploading mesh vertices")?;
                self.mesh_from_interop = false;
            }
            MeshSnapshot::Device(_) => {
                anyhow::ensure!(
                    self.interop_vertices.is_some(),
                    "device mesh without an interop vertex buffer"
                );
                self.mesh_from_interop = true;
            }
        }

        let indices = snapshot.index_bytes();
        let buffer = ensure_capacity(
            ctx,
            &mut self.index_buffer,
            "surfelview mesh ibo",
            indices.len() as u64,
            BufferRole::Index,
        )?;
        buffer.write(0, indices).context("uploading mesh indices")?;
        self.triangle_count = snapshot.triangle_count();
        self.generation += 1;
        Ok(())
    }

    pub fn point_count(&self) -> usize {
        self.point_count
    }

    pub fn latest_mesh_surfel_count(&self) -> usize {
        self.latest_mesh_surfel_count
    }

    /// Surfels added since the latest mesh was built.
    pub fn new_surfel_count(&self) -> usize {
        self.point_count.saturating_sub(self.latest_mesh_surfel_count)
    }

    pub fn triangle_count(&self) -> usize {
        self.triangle_count
    }

    /// Bumped whenever a snapshot is applied.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn surfel_vertices(&self) -> Option<&BufferObject> {
        if self.point_count == 0 {
            return None;
        }
        if self.cloud_from_interop {
            self.interop_vertices.as_ref()
        } else {
            self.cloud_buffer.as_ref()
        }
    }

    pub fn mesh_vertices(&self) -> Option<&BufferObject> {
        if self.triangle_count == 0 {
            return None;
        }
        if self.mesh_from_interop {
            self.interop_vertices.as_ref()
        } else {
            self.mesh_vertex_buffer.as_ref()
        }
    }

    pub fn mesh_indices(&self) -> Option<&BufferObject> {
        if self.triangle_count == 0 {
            return None;
        }
        self.index_buffer.as_ref()
    }

    /// Drops every buffer reference; counts go back to zero.
    pub fn clear(&mut self) {
        *self = Self {
            generation: self.generation + 1,
            ..Self::default()
        };
    }
}

fn ensure_capacity<'a>(
    ctx: &ContextHandle,
    slot: &'a mut Option<BufferObject>,
    label: &str,
    required: u64,
    role: BufferRole,
) -> Result<&'a BufferObject> {
    let fits = slot.as_ref().is_some_and(|b| b.size() >= required);
    if !fits {
        let capacity = required.next_power_of_two().max(256);
        log::debug!("growing {label} to {capacity} bytes");
        *slot = Some(ctx.create_buffer(label, capacity, role)?);
    }
    slot.as_ref()
        .ok_or_else(|| anyhow::anyhow!("{label} was not allocated"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{ContextConfig, ContextManager};
    use crate::geometry::{Mesh, PointCloud, SurfelVertex};

    fn context() -> ContextHandle {
        ContextManager::new(ContextConfig::software())
            .try_create_windowless(None)
            .unwrap()
    }

    fn cloud(n: usize) -> PointCloudSnapshot {
        let points = (0..n)
            .map(|i| SurfelVertex::new([i as f32, 0.0, 1.0], [255, 0, 0]))
            .collect();
        PointCloudSnapshot::host(PointCloud::new(points).unwrap())
    }

    #[test]
    fn host_cloud_is_uploaded() {
        let ctx = context();
        let mut scene = SceneGeometry::new();
        scene.apply_point_cloud(&ctx, &cloud(3)).unwrap();
        assert_eq!(scene.point_count(), 3);
        assert_eq!(scene.new_surfel_count(), 0);

        let vbo = scene.surfel_vertices().unwrap();
        let first = vbo.read_host(0, 16).unwrap();
        let vertex: SurfelVertex = bytemuck::pod_read_unaligned(&first);
        assert_eq!(vertex.position, [0.0, 0.0, 1.0]);
    }

    #[test]
    fn buffers_grow_but_are_reused() {
        let ctx = context();
        let mut scene = SceneGeometry::new();
        scene.apply_point_cloud(&ctx, &cloud(4)).unwrap();
        let first = scene.surfel_vertices().unwrap().id();
        scene.apply_point_cloud(&ctx, &cloud(8)).unwrap();
        assert_eq!(scene.surfel_vertices().unwrap().id(), first);
        scene.apply_point_cloud(&ctx, &cloud(100)).unwrap();
        assert_ne!(scene.surfel_vertices().unwrap().id(), first);
    }

    #[test]
    fn device_snapshots_need_interop() {
        let ctx = context();
        let mut scene = SceneGeometry::new();
        assert!(scene
            .apply_point_cloud(&ctx, &PointCloudSnapshot::device(10, 5))
            .is_err());
        assert!(scene
            .apply_mesh(&ctx, &MeshSnapshot::device(vec![[0, 1, 2]]))
            .is_err());
    }

    #[test]
    fn host_mesh_uses_own_vertices() {
        let ctx = context();
        let mut scene = SceneGeometry::new();
        let v = SurfelVertex::new([0.0, 0.0, 1.0], [0, 255, 0]);
        let mesh = Mesh::new(vec![v; 3], vec![[0, 1, 2]]).unwrap();
        scene.apply_mesh(&ctx, &MeshSnapshot::host(mesh)).unwrap();
        assert_eq!(scene.triangle_count(), 1);
        assert!(scene.mesh_vertices().is_some());
        assert_eq!(
            scene.mesh_indices().unwrap().read_host(0, 12).unwrap(),
            bytemuck::cast_slice::<u32, u8>(&[0, 1, 2])
        );
    }

    #[test]
    fn clear_forgets_geometry() {
        let ctx = context();
        let mut scene = SceneGeometry::new();
        scene.apply_point_cloud(&ctx, &cloud(2)).unwrap();
        let generation = scene.generation();
        scene.clear();
        assert_eq!(scene.point_count(), 0);
        assert!(scene.surfel_vertices().is_none());
        assert!(scene.generation() > generation);
    }
}
