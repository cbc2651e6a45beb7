use std::sync::Arc;

use bytemuck::{Pod, Zeroable};

use crate::error::VisError;

/// One surfel as the render side stores it: position plus RGBA color.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct SurfelVertex {
    pub position: [f32; 3],
    pub color: [u8; 4],
}

impl SurfelVertex {
    /// Size of one vertex in a rendering buffer.
    pub const STRIDE: u64 = std::mem::size_of::<SurfelVertex>() as u64;

    pub const fn new(position: [f32; 3], color: [u8; 3]) -> Self {
        Self {
            position,
            color: [color[0], color[1], color[2], 255],
        }
    }
}

/// CPU-resident colored point cloud.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointCloud {
    points: Vec<SurfelVertex>,
}

impl PointCloud {
    /// Wraps `points`, rejecting non-finite positions.
    pub fn new(points: Vec<SurfelVertex>) -> Result<Self, VisError> {
        if let Some(i) = points
            .iter()
            .position(|p| p.position.iter().any(|c| !c.is_finite()))
        {
            return Err(VisError::invalid_snapshot(format!(
                "point {i} has a non-finite position"
            )));
        }
        Ok(Self { points })
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[SurfelVertex] {
        &self.points
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.points)
    }
}

/// CPU-resident indexed triangle mesh.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mesh {
    vertices: Vec<SurfelVertex>,
    triangles: Vec<[u32; 3]>,
}

impl Mesh {
    /// Builds a mesh, rejecting triangles that reference missing vertices.
    pub fn new(vertices: Vec<SurfelVertex>, triangles: Vec<[u32; 3]>) -> Result<Self, VisError> {
        check_indices(&triangles, vertices.len())?;
        Ok(Self {
            vertices,
            triangles,
        })
    }

    pub fn vertices(&self) -> &[SurfelVertex] {
        &self.vertices
    }

    pub fn triangles(&self) -> &[[u32; 3]] {
        &self.triangles
    }

    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.triangles)
    }
}

fn check_indices(triangles: &[[u32; 3]], vertex_count: usize) -> Result<(), VisError> {
    for (t, tri) in triangles.iter().enumerate() {
        if let Some(&bad) = tri.iter().find(|&&i| i as usize >= vertex_count) {
            return Err(VisError::invalid_snapshot(format!(
                "triangle {t} references vertex {bad}, but only {vertex_count} exist"
            )));
        }
    }
    Ok(())
}

/// Immutable point cloud state handed from the producer to the render loop.
///
/// `Device` snapshots carry only counts: the surfel data already lives in the
/// registered interop vertex buffer, written by the compute side.
#[derive(Debug, Clone, PartialEq)]
pub enum PointCloudSnapshot {
    Host(Arc<PointCloud>),
    Device {
        surfel_count: u32,
        /// Surfels with index below this were part of the latest mesh; the
        /// rest are new and may be drawn as splats.
        latest_mesh_surfel_count: u32,
    },
}

impl PointCloudSnapshot {
    pub fn host(cloud: PointCloud) -> Self {
        PointCloudSnapshot::Host(Arc::new(cloud))
    }

    pub fn device(surfel_count: u32, latest_mesh_surfel_count: u32) -> Self {
        PointCloudSnapshot::Device {
            surfel_count,
            latest_mesh_surfel_count,
        }
    }

    pub fn point_count(&self) -> usize {
        match self {
            PointCloudSnapshot::Host(cloud) => cloud.len(),
            PointCloudSnapshot::Device { surfel_count, .. } => *surfel_count as usize,
        }
    }

    /// Host clouds count every point as meshed.
    pub fn latest_mesh_surfel_count(&self) -> usize {
        match self {
            PointCloudSnapshot::Host(cloud) => cloud.len(),
            PointCloudSnapshot::Device {
                latest_mesh_surfel_count,
                ..
            } => *latest_mesh_surfel_count as usize,
        }
    }

    pub fn is_device(&self) -> bool {
        matches!(self, PointCloudSnapshot::Device { .. })
    }

    /// Checks the counts against the interop vertex buffer capacity.
    pub fn validate(&self, capacity: usize) -> Result<(), VisError> {
        match *self {
            PointCloudSnapshot::Host(_) => Ok(()),
            PointCloudSnapshot::Device {
                surfel_count,
                latest_mesh_surfel_count,
            } => {
                if surfel_count as usize > capacity {
                    return Err(VisError::invalid_snapshot(format!(
                        "surfel count {surfel_count} exceeds capacity {capacity}"
                    )));
                }
                if latest_mesh_surfel_count > surfel_count {
                    return Err(VisError::invalid_snapshot(format!(
                        "latest mesh surfel count {latest_mesh_surfel_count} exceeds surfel count {surfel_count}"
                    )));
                }
                Ok(())
            }
        }
    }
}

/// Immutable mesh state handed from the producer to the render loop.
///
/// `Device` meshes index into the interop vertex buffer and carry only their
/// triangles.
#[derive(Debug, Clone, PartialEq)]
pub enum MeshSnapshot {
    Host(Arc<Mesh>),
    Device(Arc<Vec<[u32; 3]>>),
}

impl MeshSnapshot {
    pub fn host(mesh: Mesh) -> Self {
        MeshSnapshot::Host(Arc::new(mesh))
    }

    pub fn device(triangles: Vec<[u32; 3]>) -> Self {
        MeshSnapshot::Device(Arc::new(triangles))
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles().len()
    }

    pub fn triangles(&self) -> &[[u32; 3]] {
        match self {
            MeshSnapshot::Host(mesh) => mesh.triangles(),
            MeshSnapshot::Device(triangles) => triangles,
        }
    }

    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(self.triangles())
    }

    pub fn is_device(&self) -> bool {
        matches!(self, MeshSnapshot::Device(_))
    }

    /// Device meshes may only reference vertices inside the interop buffer.
    pub fn validate(&self, capacity: usize) -> Result<(), VisError> {
        match self {
            MeshSnapshot::Host(_) => Ok(()),
            MeshSnapshot::Device(triangles) => check_indices(triangles, capacity),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vertex(x: f32) -> SurfelVertex {
        SurfelVertex::new([x, 0.0, 0.0], [10, 20, 30])
    }

    // ── vertex layout ─────────────────────────────────────────────────────

    #[test]
    fn vertex_is_sixteen_bytes() {
        assert_eq!(SurfelVertex::STRIDE, 16);
        let cloud = PointCloud::new(vec![vertex(1.0), vertex(2.0)]).unwrap();
        assert_eq!(cloud.as_bytes().len(), 32);
        assert_eq!(cloud.points()[0].color, [10, 20, 30, 255]);
    }

    #[test]
    fn cloud_rejects_nan() {
        let err = PointCloud::new(vec![vertex(0.0), vertex(f32::NAN)]).unwrap_err();
        assert!(matches!(err, VisError::InvalidSnapshot(_)));
    }

    // ── mesh ──────────────────────────────────────────────────────────────

    #[test]
    fn mesh_rejects_out_of_range_index() {
        let verts = vec![vertex(0.0), vertex(1.0), vertex(2.0)];
        assert!(Mesh::new(verts.clone(), vec![[0, 1, 2]]).is_ok());
        assert!(matches!(
            Mesh::new(verts, vec![[0, 1, 3]]),
            Err(VisError::InvalidSnapshot(_))
        ));
    }

    #[test]
    fn mesh_index_bytes_are_packed() {
        let mesh = MeshSnapshot::device(vec![[0, 1, 2], [2, 1, 0]]);
        assert_eq!(mesh.triangle_count(), 2);
        assert_eq!(mesh.index_bytes().len(), 24);
    }

    // ── snapshot validation ───────────────────────────────────────────────

    #[test]
    fn device_cloud_counts_are_checked() {
        assert!(PointCloudSnapshot::device(100, 80).validate(100).is_ok());
        assert!(PointCloudSnapshot::device(101, 80).validate(100).is_err());
        assert!(PointCloudSnapshot::device(50, 60).validate(100).is_err());
    }

    #[test]
    fn device_mesh_indices_are_checked_against_capacity() {
        assert!(MeshSnapshot::device(vec![[0, 1, 9]]).validate(10).is_ok());
        assert!(MeshSnapshot::device(vec![[0, 1, 10]]).validate(10).is_err());
    }

    #[test]
    fn host_cloud_counts_every_point_as_meshed() {
        let snap = PointCloudSnapshot::host(PointCloud::new(vec![vertex(0.0); 7]).unwrap());
        assert_eq!(snap.point_count(), 7);
        assert_eq!(snap.latest_mesh_surfel_count(), 7);
        assert!(!snap.is_device());
        assert!(snap.validate(0).is_ok());
    }
}
