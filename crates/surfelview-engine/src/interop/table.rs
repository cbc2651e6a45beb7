use std::fmt;

use crate::device::{BufferObject, BufferRole, ContextHandle, ContextId};
use crate::error::VisError;

/// Buffers the compute side writes into and the render side draws from.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum InteropBufferKind {
    /// Surfel positions and colors, one [`SurfelVertex`](crate::geometry::SurfelVertex) each.
    SurfelVertices,
    /// Debug: index pairs connecting each surfel to its neighbors.
    NeighborIndices,
    /// Debug: one line segment per surfel along its normal.
    NormalVertices,
}

impl InteropBufferKind {
    pub fn role(self) -> BufferRole {
        match self {
            InteropBufferKind::NeighborIndices => BufferRole::Index,
            InteropBufferKind::SurfelVertices | InteropBufferKind::NormalVertices => {
                BufferRole::Vertex
            }
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            InteropBufferKind::SurfelVertices => "surfel vertices",
            InteropBufferKind::NeighborIndices => "neighbor indices",
            InteropBufferKind::NormalVertices => "normal vertices",
        }
    }
}

impl fmt::Display for InteropBufferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A rendering buffer registered for compute-side access.
#[derive(Debug, Clone)]
pub struct InteropBuffer {
    kind: InteropBufferKind,
    buffer: BufferObject,
    context: ContextId,
}

impl InteropBuffer {
    pub fn kind(&self) -> InteropBufferKind {
        self.kind
    }

    /// The registered buffer. Clones share storage with the render side.
    pub fn buffer(&self) -> &BufferObject {
        &self.buffer
    }

    /// Context whose object namespace owns the buffer.
    pub fn context(&self) -> ContextId {
        self.context
    }
}

/// Registrations of rendering buffers for compute-side access.
///
/// Every operation requires the owning context to be current on the calling
/// thread. Each buffer kind and each buffer identity is registered at most
/// once; `unregister_all` releases entries in reverse registration order.
#[derive(Debug, Default)]
pub struct InteropResourceTable {
    context: Option<ContextId>,
    entries: Vec<InteropBuffer>,
}

impl InteropResourceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a buffer of `size` bytes in `ctx` and registers it as `kind`.
    pub fn register(
        &mut self,
        ctx: &ContextHandle,
        kind: InteropBufferKind,
        size: u64,
    ) -> Result<InteropBuffer, VisError> {
        let context = self.check_current(ctx)?;
        if self.get(kind).is_some() {
            return Err(VisError::AlreadyRegistered(kind));
        }

        let buffer = ctx
            .create_buffer(kind.label(), size, kind.role())
            .map_err(|e| VisError::InteropSetupFailed(format!("{kind}: {e:#}")))?;
        Ok(self.insert(context, kind, buffer))
    }

    /// Registers a buffer that already exists in `ctx`'s namespace.
    pub fn register_existing(
        &mut self,
        ctx: &ContextHandle,
        kind: InteropBufferKind,
        buffer: BufferObject,
    ) -> Result<InteropBuffer, VisError> {
        let context = self.check_current(ctx)?;
        if self.get(kind).is_some() || self.entries.iter().any(|e| e.buffer.id() == buffer.id()) {
            return Err(VisError::AlreadyRegistered(kind));
        }
        if ctx.backend() != Some(buffer.backend()) {
            return Err(VisError::invalid_state(format!(
                "{} belongs to a {} context",
                buffer.id(),
                buffer.backend()
            )));
        }
        Ok(self.insert(context, kind, buffer))
    }

    fn insert(
        &mut self,
        context: ContextId,
        kind: InteropBufferKind,
        buffer: BufferObject,
    ) -> InteropBuffer {
        log::info!(
            "registered {kind} buffer {} ({} bytes) in {context}",
            buffer.id(),
            buffer.size()
        );
        let entry = InteropBuffer {
            kind,
            buffer,
            context,
        };
        self.context = Some(context);
        self.entries.push(entry.clone());
        entry
    }

    pub fn get(&self, kind: InteropBufferKind) -> Option<&InteropBuffer> {
        self.entries.iter().find(|e| e.kind == kind)
    }

    pub fn contains(&self, kind: InteropBufferKind) -> bool {
        self.get(kind).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered kinds in registration order.
    pub fn kinds(&self) -> impl Iterator<Item = InteropBufferKind> + '_ {
        self.entries.iter().map(|e| e.kind)
    }

    pub fn unregister(
        &mut self,
        ctx: &ContextHandle,
        kind: InteropBufferKind,
    ) -> Result<InteropBuffer, VisError> {
        self.check_current(ctx)?;
        let index = self
            .entries
            .iter()
            .position(|e| e.kind == kind)
            .ok_or(VisError::NotRegistered(kind))?;
        let entry = self.entries.remove(index);
        log::debug!("unregistered {kind} buffer {}", entry.buffer.id());
        if self.entries.is_empty() {
            self.context = None;
        }
        Ok(entry)
    }

    /// Unregisters everything, most recent first. Returns the kinds released.
    pub fn unregister_all(
        &mut self,
        ctx: &ContextHandle,
    ) -> Result<Vec<InteropBufferKind>, VisError> {
        if self.entries.is_empty() {
            return Ok(Vec::new());
        }
        self.check_current(ctx)?;
        let mut released = Vec::with_capacity(self.entries.len());
        while let Some(entry) = self.entries.pop() {
            log::debug!("unregistered {} buffer {}", entry.kind, entry.buffer.id());
            released.push(entry.kind);
        }
        self.context = None;
        Ok(released)
    }

    fn check_current(&self, ctx: &ContextHandle) -> Result<ContextId, VisError> {
        let id = ctx.id().ok_or(VisError::ContextNotCurrent)?;
        if !ctx.is_current() {
            return Err(VisError::ContextNotCurrent);
        }
        match self.context {
            Some(owner) if owner != id => Err(VisError::invalid_state(format!(
                "interop table belongs to {owner}, not {id}"
            ))),
            _ => Ok(id),
        }
    }
}
