use anyhow::{Context, Result};

use super::gpu::GpuTarget;
use super::software::SoftwareTarget;

/// Offscreen color target the render loop draws into.
///
/// Windowless contexts have no default framebuffer; the render loop owns one
/// target sized to the current viewport and re-creates it on resize.
pub enum FrameTarget {
    Gpu(GpuTarget),
    Software(SoftwareTarget),
}

impl FrameTarget {
    /// Size in physical pixels.
    pub fn size(&self) -> (u32, u32) {
        match self {
            FrameTarget::Gpu(t) => t.size(),
            FrameTarget::Software(t) => t.size(),
        }
    }

    pub fn as_gpu(&self) -> Option<&GpuTarget> {
        match self {
            FrameTarget::Gpu(t) => Some(t),
            FrameTarget::Software(_) => None,
        }
    }

    pub fn as_software(&self) -> Option<&SoftwareTarget> {
        match self {
            FrameTarget::Software(t) => Some(t),
            FrameTarget::Gpu(_) => None,
        }
    }

    pub fn as_software_mut(&mut self) -> Option<&mut SoftwareTarget> {
        match self {
            FrameTarget::Software(t) => Some(t),
            FrameTarget::Gpu(_) => None,
        }
    }

    /// Clears the whole target. `color` is linear RGBA in `[0, 1]`.
    pub fn clear(&mut self, color: [f32; 4]) {
        match self {
            FrameTarget::Gpu(t) => t.clear(color),
            FrameTarget::Software(t) => t.clear(color.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8)),
        }
    }

    /// Reads the current contents back as an RGBA image.
    pub fn read_rgba(&self) -> Result<image::RgbaImage> {
        match self {
            FrameTarget::Gpu(t) => t.read_rgba(),
            FrameTarget::Software(t) => t
                .to_image()
                .context("software framebuffer has inconsistent dimensions"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_converts_to_bytes() {
        let mut target = FrameTarget::Software(SoftwareTarget::new(2, 1));
        target.clear([1.0, 0.5, 0.0, 2.0]);
        let image = target.read_rgba().unwrap();
        assert_eq!(image.get_pixel(1, 0).0, [255, 128, 0, 255]);
    }

    #[test]
    fn software_target_is_not_gpu() {
        let mut target = FrameTarget::Software(SoftwareTarget::new(1, 1));
        assert!(target.as_gpu().is_none());
        assert!(target.as_software_mut().is_some());
        assert_eq!(target.size(), (1, 1));
    }
}
