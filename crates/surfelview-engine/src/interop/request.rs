use crate::camera::PinholeCamera;
use crate::device::{BufferObject, ContextHandle, ContextId};
use crate::error::VisError;
use crate::geometry::SurfelVertex;

use super::{InteropBufferKind, InteropResourceTable};

/// Neighbors stored per surfel in the debug neighbor-index buffer.
pub const NEIGHBOR_COUNT: u64 = 10;

/// Optional debug buffers registered next to the surfel vertices.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct DebugFlags {
    pub neighbor_rendering: bool,
    pub normal_rendering: bool,
}

/// Parameters the producer hands to the render thread for interop setup.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct InteropRequest {
    /// Capacity of the surfel vertex buffer.
    pub max_point_count: u32,
    /// Intrinsics of the input camera, used for frustum drawing.
    pub camera: PinholeCamera,
    pub debug: DebugFlags,
}

impl InteropRequest {
    pub fn new(max_point_count: u32, camera: PinholeCamera, debug: DebugFlags) -> Self {
        Self {
            max_point_count,
            camera,
            debug,
        }
    }

    /// Byte sizes of the buffers this request registers.
    pub fn buffer_sizes(&self) -> Result<Vec<(InteropBufferKind, u64)>, VisError> {
        let n = self.max_point_count as u64;
        let size = |kind: InteropBufferKind, per_point: u64| {
            n.checked_mul(per_point).map(|bytes| (kind, bytes)).ok_or_else(|| {
                VisError::InteropSetupFailed(format!("{kind} buffer size overflows"))
            })
        };
        let mut sizes = vec![size(InteropBufferKind::SurfelVertices, SurfelVertex::STRIDE)?];
        if self.debug.neighbor_rendering {
            // One line (two u32 indices) per neighbor.
            sizes.push(size(InteropBufferKind::NeighborIndices, NEIGHBOR_COUNT * 2 * 4)?);
        }
        if self.debug.normal_rendering {
            // One line (two xyz f32 vertices) per surfel.
            sizes.push(size(InteropBufferKind::NormalVertices, 2 * 3 * 4)?);
        }
        Ok(sizes)
    }
}

/// The registered buffers returned to the producer once setup completes.
///
/// Each buffer shares storage with the render side; the producer writes
/// surfel data into `vertices` and publishes device snapshots with counts.
#[derive(Debug, Clone)]
pub struct InteropBindings {
    pub context: ContextId,
    pub max_point_count: u32,
    pub camera: PinholeCamera,
    pub vertices: BufferObject,
    pub neighbor_indices: Option<BufferObject>,
    pub normal_vertices: Option<BufferObject>,
}

impl InteropBindings {
    /// Registers every buffer `request` asks for.
    ///
    /// Must run on the thread where `ctx` is current. If any registration
    /// fails, the table is emptied again.
    pub fn register(
        table: &mut InteropResourceTable,
        ctx: &ContextHandle,
        request: &InteropRequest,
    ) -> Result<Self, VisError> {
        if request.max_point_count == 0 {
            return Err(VisError::invalid_state("max point count must be positive"));
        }
        let context = ctx.id().ok_or(VisError::ContextNotCurrent)?;

        let sizes = request.buffer_sizes()?;
        let limit = ctx.max_buffer_size().unwrap_or(0);
        if let Some((kind, size)) = sizes.iter().find(|(_, size)| *size > limit) {
            return Err(VisError::InteropSetupFailed(format!(
                "{kind} buffer needs {size} bytes, the context allows {limit}"
            )));
        }

        let mut vertices = None;
        let mut neighbor_indices = None;
        let mut normal_vertices = None;
        for (kind, size) in sizes {
            let entry = match table.register(ctx, kind, size) {
                Ok(entry) => entry,
                Err(err) => {
                    if let Err(rollback) = table.unregister_all(ctx) {
                        log::warn!("interop rollback failed: {rollback}");
                    }
                    return Err(err);
                }
            };
            let buffer = entry.buffer().clone();
            match kind {
                InteropBufferKind::SurfelVertices => vertices = Some(buffer),
                InteropBufferKind::NeighborIndices => neighbor_indices = Some(buffer),
                InteropBufferKind::NormalVertices => normal_vertices = Some(buffer),
            }
        }

        let vertices = vertices.ok_or_else(|| {
            VisError::InteropSetupFailed("surfel vertex buffer was not registered".into())
        })?;
        Ok(Self {
            context,
            max_point_count: request.max_point_count,
            camera: request.camera,
            vertices,
            neighbor_indices,
            normal_vertices,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::Viewport;
    use crate::device::{BufferRole, ContextConfig, ContextManager};

    fn request(debug: DebugFlags) -> InteropRequest {
        InteropRequest::new(100, PinholeCamera::for_viewport(Viewport::new(64, 48)), debug)
    }

    #[test]
    fn sizes_follow_debug_flags() {
        let plain = request(DebugFlags::default()).buffer_sizes().unwrap();
        assert_eq!(plain, vec![(InteropBufferKind::SurfelVertices, 1600)]);

        let all = request(DebugFlags {
            neighbor_rendering: true,
            normal_rendering: true,
        })
        .buffer_sizes()
        .unwrap();
        assert_eq!(all[1], (InteropBufferKind::NeighborIndices, 8000));
        assert_eq!(all[2], (InteropBufferKind::NormalVertices, 2400));
    }

    #[test]
    fn register_creates_requested_buffers() {
        let ctx = ContextManager::new(ContextConfig::software())
            .try_create_windowless(None)
            .unwrap();
        ContextManager::try_switch_to(&ctx).unwrap();

        let mut table = InteropResourceTable::new();
        let bindings = InteropBindings::register(
            &mut table,
            &ctx,
            &request(DebugFlags {
                neighbor_rendering: false,
                normal_rendering: true,
            }),
        )
        .unwrap();
        assert_eq!(bindings.vertices.size(), 1600);
        assert_eq!(bindings.vertices.role(), BufferRole::Vertex);
        assert!(bindings.neighbor_indices.is_none());
        assert!(bindings.normal_vertices.is_some());
        assert_eq!(table.len(), 2);

        ContextManager::try_switch_to(&ContextHandle::empty()).unwrap();
    }

    #[test]
    fn failed_registration_rolls_back() {
        let ctx = ContextManager::new(ContextConfig::software())
            .try_create_windowless(None)
            .unwrap();
        ContextManager::try_switch_to(&ctx).unwrap();

        let mut table = InteropResourceTable::new();
        table
            .register(&ctx, InteropBufferKind::NormalVertices, 4)
            .unwrap();
        let err = InteropBindings::register(
            &mut table,
            &ctx,
            &request(DebugFlags {
                neighbor_rendering: false,
                normal_rendering: true,
            }),
        )
        .unwrap_err();
        assert_eq!(err, VisError::AlreadyRegistered(InteropBufferKind::NormalVertices));
        assert!(table.is_empty());

        ContextManager::try_switch_to(&ContextHandle::empty()).unwrap();
    }

    #[test]
    fn oversized_request_fails_before_registering() {
        let ctx = ContextManager::new(ContextConfig::software())
            .try_create_windowless(None)
            .unwrap();
        ContextManager::try_switch_to(&ctx).unwrap();

        let mut table = InteropResourceTable::new();
        let mut req = request(DebugFlags {
            neighbor_rendering: true,
            normal_rendering: false,
        });
        req.max_point_count = u32::MAX;
        let err = InteropBindings::register(&mut table, &ctx, &req).unwrap_err();
        assert!(matches!(err, VisError::InteropSetupFailed(_)));
        assert!(table.is_empty());

        ContextManager::try_switch_to(&ContextHandle::empty()).unwrap();
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let ctx = ContextManager::new(ContextConfig::software())
            .try_create_windowless(None)
            .unwrap();
        let mut table = InteropResourceTable::new();
        let mut req = request(DebugFlags::default());
        req.max_point_count = 0;
        assert!(matches!(
            InteropBindings::register(&mut table, &ctx, &req),
            Err(VisError::InvalidState(_))
        ));
    }
}
