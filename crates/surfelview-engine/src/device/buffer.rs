use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;

use super::BackendKind;

static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a buffer object.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct BufferId(u64);

impl BufferId {
    pub(crate) fn next() -> Self {
        Self(NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buf#{}", self.0)
    }
}

/// How the render side binds a buffer.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum BufferRole {
    Vertex,
    Index,
}

impl BufferRole {
    pub(crate) fn wgpu_usage(self) -> wgpu::BufferUsages {
        let shared = wgpu::BufferUsages::STORAGE
            | wgpu::BufferUsages::COPY_DST
            | wgpu::BufferUsages::COPY_SRC;
        match self {
            BufferRole::Vertex => shared | wgpu::BufferUsages::VERTEX,
            BufferRole::Index => shared | wgpu::BufferUsages::INDEX,
        }
    }
}

/// Rendering buffer object living in a context's object namespace.
///
/// Cloning shares the same storage; the identity is stable across clones.
#[derive(Clone)]
pub struct BufferObject {
    id: BufferId,
    size: u64,
    role: BufferRole,
    storage: BufferStorage,
}

#[derive(Clone)]
enum BufferStorage {
    Gpu {
        buffer: Arc<wgpu::Buffer>,
        queue: Arc<wgpu::Queue>,
    },
    Host(Arc<Mutex<Vec<u8>>>),
}

impl BufferObject {
    pub(crate) fn gpu(
        buffer: Arc<wgpu::Buffer>,
        queue: Arc<wgpu::Queue>,
        size: u64,
        role: BufferRole,
    ) -> Self {
        Self {
            id: BufferId::next(),
            size,
            role,
            storage: BufferStorage::Gpu { buffer, queue },
        }
    }

    /// Zero-filled host buffer. Fails instead of aborting when the
    /// allocation cannot be made.
    pub(crate) fn host(size: u64, role: BufferRole) -> Result<Self> {
        let len = usize::try_from(size)
            .map_err(|_| anyhow::anyhow!("{size} bytes do not fit in host memory"))?;
        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(len)
            .map_err(|e| anyhow::anyhow!("cannot allocate {size} host bytes: {e}"))?;
        bytes.resize(len, 0);
        Ok(Self {
            id: BufferId::next(),
            size,
            role,
            storage: BufferStorage::Host(Arc::new(Mutex::new(bytes))),
        })
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    /// Size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn role(&self) -> BufferRole {
        self.role
    }

    pub fn backend(&self) -> BackendKind {
        match self.storage {
            BufferStorage::Gpu { .. } => BackendKind::Gpu,
            BufferStorage::Host(_) => BackendKind::Software,
        }
    }

    /// Underlying wgpu buffer, for draw code on the gpu backend.
    pub fn wgpu_buffer(&self) -> Option<&wgpu::Buffer> {
        match &self.storage {
            BufferStorage::Gpu { buffer, .. } => Some(buffer),
            BufferStorage::Host(_) => None,
        }
    }

    /// Writes `data` at `offset`.
    ///
    /// On the gpu backend the write is queued and becomes visible to the next
    /// submission; offset and length must be multiples of 4.
    pub fn write(&self, offset: u64, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let end = offset
            .checked_add(data.len() as u64)
            .filter(|end| *end <= self.size);
        anyhow::ensure!(
            end.is_some(),
            "write of {} bytes at offset {offset} overflows {} ({} bytes)",
            data.len(),
            self.id,
            self.size
        );

        match &self.storage {
            BufferStorage::Gpu { buffer, queue } => {
                anyhow::ensure!(
                    offset % wgpu::COPY_BUFFER_ALIGNMENT == 0
                        && data.len() as u64 % wgpu::COPY_BUFFER_ALIGNMENT == 0,
                    "unaligned write to {} (offset {offset}, {} bytes)",
                    self.id,
                    data.len()
                );
                queue.write_buffer(buffer, offset, data);
            }
            BufferStorage::Host(bytes) => {
                let mut bytes = bytes.lock().unwrap_or_else(PoisonError::into_inner);
                let start = offset as usize;
                bytes[start..start + data.len()].copy_from_slice(data);
            }
        }
        Ok(())
    }

    /// Copies `len` bytes starting at `offset` out of a host buffer.
    ///
    /// Returns `None` for gpu buffers or out-of-range reads.
    pub fn read_host(&self, offset: u64, len: usize) -> Option<Vec<u8>> {
        match &self.storage {
            BufferStorage::Host(bytes) => {
                let bytes = bytes.lock().unwrap_or_else(PoisonError::into_inner);
                let start = usize::try_from(offset).ok()?;
                let end = start.checked_add(len)?;
                bytes.get(start..end).map(<[u8]>::to_vec)
            }
            BufferStorage::Gpu { .. } => None,
        }
    }
}

impl fmt::Debug for BufferObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferObject")
            .field("id", &self.id)
            .field("size", &self.size)
            .field("role", &self.role)
            .field("backend", &self.backend())
            .finish()
    }
}
