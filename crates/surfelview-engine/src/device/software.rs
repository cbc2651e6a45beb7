use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;

use super::{BufferObject, BufferRole};

static NEXT_NAMESPACE: AtomicU64 = AtomicU64::new(1);

/// Largest buffer a software context allocates (1 GiB).
pub const SOFTWARE_MAX_BUFFER_SIZE: u64 = 1 << 30;

/// Object namespace shared by software contexts created with sharing.
#[derive(Debug)]
struct Namespace {
    id: u64,
    allocated_bytes: AtomicU64,
}

/// CPU context: host-memory buffers and an RGBA8 framebuffer.
#[derive(Debug, Clone)]
pub struct SoftwareContext {
    namespace: Arc<Namespace>,
}

impl SoftwareContext {
    pub(crate) fn new() -> Self {
        Self {
            namespace: Arc::new(Namespace {
                id: NEXT_NAMESPACE.fetch_add(1, Ordering::Relaxed),
                allocated_bytes: AtomicU64::new(0),
            }),
        }
    }

    /// New context in the same object namespace as `self`.
    pub(crate) fn share(&self) -> Self {
        Self {
            namespace: self.namespace.clone(),
        }
    }

    /// Namespace identifier; equal for contexts that share objects.
    pub fn namespace_id(&self) -> u64 {
        self.namespace.id
    }

    /// Total bytes allocated for buffers in this namespace.
    pub fn allocated_bytes(&self) -> u64 {
        self.namespace.allocated_bytes.load(Ordering::Relaxed)
    }

    pub(crate) fn load_entry_points(&self) -> Result<(), String> {
        log::debug!("software context ready (namespace {})", self.namespace.id);
        Ok(())
    }

    pub fn max_buffer_size(&self) -> u64 {
        SOFTWARE_MAX_BUFFER_SIZE
    }

    pub(crate) fn create_buffer(&self, label: &str, size: u64, role: BufferRole) -> Result<BufferObject> {
        anyhow::ensure!(
            size <= SOFTWARE_MAX_BUFFER_SIZE,
            "software buffer `{label}` of {size} bytes exceeds the {SOFTWARE_MAX_BUFFER_SIZE} byte limit"
        );
        let buffer = BufferObject::host(size, role)?;
        self.namespace
            .allocated_bytes
            .fetch_add(size, Ordering::Relaxed);
        log::trace!("software buffer `{label}`: {size} bytes");
        Ok(buffer)
    }

    pub(crate) fn create_target(&self, width: u32, height: u32) -> SoftwareTarget {
        SoftwareTarget::new(width, height)
    }
}

/// RGBA8 framebuffer, row-major, top-left origin.
#[derive(Debug, Clone)]
pub struct SoftwareTarget {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl SoftwareTarget {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width as usize * height as usize * 4],
        }
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn clear(&mut self, color: [u8; 4]) {
        for px in self.pixels.chunks_exact_mut(4) {
            px.copy_from_slice(&color);
        }
    }

    /// Writes one pixel; coordinates outside the target are ignored.
    #[inline]
    pub fn put_pixel(&mut self, x: i64, y: i64, color: [u8; 4]) {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return;
        }
        let i = (y as usize * self.width as usize + x as usize) * 4;
        self.pixels[i..i + 4].copy_from_slice(&color);
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * 4;
        let mut out = [0; 4];
        out.copy_from_slice(&self.pixels[i..i + 4]);
        Some(out)
    }

    pub(crate) fn to_image(&self) -> Option<image::RgbaImage> {
        image::RgbaImage::from_raw(self.width, self.height, self.pixels.clone())
    }
}
