use std::sync::Arc;

use anyhow::{Context, Result};

use super::{BufferObject, BufferRole, ContextConfig, ContextError};

/// wgpu objects backing a hardware context.
///
/// A windowless context is a device/queue pair that was requested without a
/// compatible surface. Contexts created with a sharing context reuse the same
/// device, so buffers registered on one are visible to the other.
#[derive(Clone)]
pub struct GpuContext {
    /// wgpu instance used to create the adapter.
    instance: Arc<wgpu::Instance>,

    /// Selected adapter.
    adapter: Arc<wgpu::Adapter>,

    /// Logical device.
    device: Arc<wgpu::Device>,

    /// Command queue.
    queue: Arc<wgpu::Queue>,

    /// Format of offscreen frame targets.
    target_format: wgpu::TextureFormat,
}

impl GpuContext {
    /// Requests an adapter and device without any surface.
    ///
    /// Adapter/device acquisition is asynchronous under wgpu; callers block on
    /// it with `pollster`.
    pub(crate) async fn new(config: &ContextConfig) -> Result<Self, ContextError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: config.power_preference,
                compatible_surface: None,
                force_fallback_adapter: config.force_fallback_adapter,
            })
            .await
            .map_err(|e| ContextError::NoAdapter(e.to_string()))?;

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("surfelview device"),
                required_features: config.required_features,
                required_limits: config.required_limits.clone(),
                experimental_features: wgpu::ExperimentalFeatures::disabled(),
                memory_hints: wgpu::MemoryHints::Performance,
                trace: wgpu::Trace::Off,
            })
            .await
            .map_err(|e| ContextError::CreationFailed(e.to_string()))?;

        Ok(Self {
            instance: Arc::new(instance),
            adapter: Arc::new(adapter),
            device: Arc::new(device),
            queue: Arc::new(queue),
            target_format: choose_target_format(config.prefer_srgb),
        })
    }

    /// Returns the wgpu instance.
    pub fn instance(&self) -> &wgpu::Instance {
        &self.instance
    }

    /// Returns the selected adapter.
    pub fn adapter(&self) -> &wgpu::Adapter {
        &self.adapter
    }

    /// Returns a reference to the logical device.
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    /// Returns a reference to the command queue.
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Format used for offscreen frame targets.
    pub fn target_format(&self) -> wgpu::TextureFormat {
        self.target_format
    }

    /// One-time checks run on the first switch-in of a context.
    ///
    /// wgpu resolves entry points when the device is created; what remains is
    /// verifying that the adapter can render into and read back from the
    /// offscreen target format.
    pub(crate) fn load_entry_points(&self) -> Result<(), String> {
        let info = self.adapter.get_info();
        log::info!(
            "gpu context on {} ({:?}, driver {})",
            info.name,
            info.backend,
            info.driver
        );

        let needed = wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC;
        let features = self.adapter.get_texture_format_features(self.target_format);
        if !features.allowed_usages.contains(needed) {
            return Err(format!(
                "adapter cannot render to {:?} with readback",
                self.target_format
            ));
        }

        if self.device.limits().max_buffer_size == 0 {
            return Err("device reports a zero maximum buffer size".to_string());
        }
        Ok(())
    }

    /// Largest buffer the device accepts.
    pub fn max_buffer_size(&self) -> u64 {
        self.device.limits().max_buffer_size
    }

    pub(crate) fn create_buffer(&self, label: &str, size: u64, role: BufferRole) -> Result<BufferObject> {
        // Buffer sizes must be a multiple of COPY_BUFFER_ALIGNMENT for queue writes.
        let align = wgpu::COPY_BUFFER_ALIGNMENT;
        let padded = size
            .max(align)
            .checked_next_multiple_of(align)
            .filter(|padded| *padded <= self.max_buffer_size())
            .with_context(|| {
                format!(
                    "buffer `{label}` of {size} bytes exceeds the device limit of {} bytes",
                    self.max_buffer_size()
                )
            })?;
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: padded,
            usage: role.wgpu_usage(),
            mapped_at_creation: false,
        });
        Ok(BufferObject::gpu(Arc::new(buffer), self.queue.clone(), size, role))
    }

    pub(crate) fn create_target(&self, width: u32, height: u32) -> GpuTarget {
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("surfelview frame target"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: self.target_format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        GpuTarget {
            device: self.device.clone(),
            queue: self.queue.clone(),
            texture,
            view,
            format: self.target_format,
            width,
            height,
        }
    }
}

/// Offscreen color target on a wgpu device.
pub struct GpuTarget {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    format: wgpu::TextureFormat,
    width: u32,
    height: u32,
}

impl GpuTarget {
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub fn format(&self) -> wgpu::TextureFormat {
        self.format
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Clears the target with a dedicated pass and submits it.
    pub(crate) fn clear(&self, color: [f32; 4]) {
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("surfelview clear encoder"),
            });

        // Clear pass; dropped before the encoder is finished.
        {
            let _rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("surfelview clear"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &self.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: color[0] as f64,
                            g: color[1] as f64,
                            b: color[2] as f64,
                            a: color[3] as f64,
                        }),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });
        }

        self.queue.submit(std::iter::once(encoder.finish()));
    }

    /// Copies the target into host memory, stripping row padding.
    pub(crate) fn read_rgba(&self) -> Result<image::RgbaImage> {
        let bytes_per_pixel = 4u32;
        let unpadded_row = self.width * bytes_per_pixel;
        let padded_row = unpadded_row.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT)
            * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;

        let readback = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("surfelview readback"),
            size: (padded_row * self.height) as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("surfelview readback encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &readback,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row),
                    rows_per_image: Some(self.height),
                },
            },
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = readback.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device
            .poll(wgpu::PollType::wait_indefinitely())
            .context("device poll failed during readback")?;
        rx.recv()
            .context("readback callback was dropped")?
            .context("failed to map readback buffer")?;

        let data = slice.get_mapped_range();
        let mut pixels = Vec::with_capacity((unpadded_row * self.height) as usize);
        for row in data.chunks(padded_row as usize).take(self.height as usize) {
            pixels.extend_from_slice(&row[..unpadded_row as usize]);
        }
        drop(data);
        readback.unmap();

        image::RgbaImage::from_raw(self.width, self.height, pixels)
            .context("readback size does not match the target")
    }
}

fn choose_target_format(prefer_srgb: bool) -> wgpu::TextureFormat {
    if prefer_srgb {
        wgpu::TextureFormat::Rgba8UnormSrgb
    } else {
        wgpu::TextureFormat::Rgba8Unorm
    }
}
