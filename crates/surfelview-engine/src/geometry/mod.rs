//! Geometry snapshots and the producer → render-thread hand-off.

mod slot;
mod snapshot;

pub use slot::StagingSlot;
pub use snapshot::{Mesh, MeshSnapshot, PointCloud, PointCloudSnapshot, SurfelVertex};
