use anyhow::{Context, Result};
use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use crate::camera::Viewport;
use crate::device::{ContextHandle, FrameTarget, GpuContext};
use crate::geometry::SurfelVertex;

use super::{splat_range, DrawStats, FrameCtx, SceneRenderer};

/// wgpu renderer for surfel splats and the reconstructed mesh.
///
/// Draws straight from the scene's vertex and index buffers, including the
/// registered interop vertex buffer. Depth is not tested: the mesh is drawn
/// first and splats on top. Wireframe and frustum drawing are left to the
/// software rasterizer.
#[derive(Default)]
pub struct GpuSurfelRenderer {
    pipeline_format: Option<wgpu::TextureFormat>,
    splat_pipeline: Option<wgpu::RenderPipeline>,
    mesh_pipeline: Option<wgpu::RenderPipeline>,

    bind_group: Option<wgpu::BindGroup>,
    frame_ubo: Option<wgpu::Buffer>,

    quad_vbo: Option<wgpu::Buffer>,
    quad_ibo: Option<wgpu::Buffer>,

    warned_unsupported: bool,
}

impl GpuSurfelRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    // ── private helpers ────────────────────────────────────────────────────

    fn ensure_pipelines(&mut self, gpu: &GpuContext) {
        let format = gpu.target_format();
        if self.pipeline_format == Some(format) && self.splat_pipeline.is_some() {
            return;
        }
        let device = gpu.device();

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("surfelview surfel shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/surfel.wgsl").into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("surfelview frame bgl"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: wgpu::BufferSize::new(FrameUniform::SIZE),
                },
                count: None,
            }],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("surfelview pipeline layout"),
            bind_group_layouts: &[&bind_group_layout],
            immediate_size: 0,
        });

        let splat_buffers = [QuadCorner::layout(), surfel_layout(wgpu::VertexStepMode::Instance)];
        let mesh_buffers = [surfel_layout(wgpu::VertexStepMode::Vertex)];
        self.splat_pipeline = Some(create_pipeline(
            device,
            &pipeline_layout,
            &shader,
            format,
            "surfelview splat pipeline",
            ("vs_splat", "fs_splat"),
            &splat_buffers,
        ));
        self.mesh_pipeline = Some(create_pipeline(
            device,
            &pipeline_layout,
            &shader,
            format,
            "surfelview mesh pipeline",
            ("vs_mesh", "fs_mesh"),
            &mesh_buffers,
        ));

        let frame_ubo = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("surfelview frame ubo"),
            size: FrameUniform::SIZE,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        self.bind_group = Some(device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("surfelview frame bind group"),
            layout: &bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: frame_ubo.as_entire_binding(),
            }],
        }));
        self.frame_ubo = Some(frame_ubo);
        self.pipeline_format = Some(format);
    }

    fn ensure_static_buffers(&mut self, gpu: &GpuContext) {
        if self.quad_vbo.is_some() && self.quad_ibo.is_some() {
            return;
        }
        let device = gpu.device();
        self.quad_vbo = Some(device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("surfelview quad vbo"),
            contents: bytemuck::cast_slice(&QUAD_CORNERS),
            usage: wgpu::BufferUsages::VERTEX,
        }));
        self.quad_ibo = Some(device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("surfelview quad ibo"),
            contents: bytemuck::cast_slice(&QUAD_INDICES),
            usage: wgpu::BufferUsages::INDEX,
        }));
    }
}

impl SceneRenderer for GpuSurfelRenderer {
    fn prepare(&mut self, ctx: &ContextHandle, _viewport: Viewport) -> Result<()> {
        let gpu = ctx.gpu().context("gpu renderer needs a gpu context")?;
        self.ensure_pipelines(gpu);
        self.ensure_static_buffers(gpu);
        Ok(())
    }

    fn draw(&mut self, frame: &FrameCtx<'_>, target: &mut FrameTarget) -> Result<DrawStats> {
        let gpu = frame.context.gpu().context("gpu renderer needs a gpu context")?;
        let target = target.as_gpu().context("gpu renderer needs a gpu frame target")?;
        self.ensure_pipelines(gpu);
        self.ensure_static_buffers(gpu);

        let settings = frame.settings;
        let scene = frame.scene;
        if (settings.render_as_wireframe || settings.render_camera_frustum) && !self.warned_unsupported {
            log::debug!("gpu renderer draws neither wireframes nor camera frusta");
            self.warned_unsupported = true;
        }

        let (width, height) = target.size();
        let uniform = FrameUniform {
            view_proj: frame.view.view_projection.to_cols_array_2d(),
            viewing_dir: frame.view.viewing_dir.extend(0.0).to_array(),
            viewport: [width.max(1) as f32, height.max(1) as f32],
            splat_half_extent: settings.splat_half_extent(),
            normal_shading: if settings.triangle_normal_shading { 1.0 } else { 0.0 },
        };
        let (Some(ubo), Some(bind_group)) = (self.frame_ubo.as_ref(), self.bind_group.as_ref())
        else {
            anyhow::bail!("gpu renderer bindings are missing");
        };
        gpu.queue().write_buffer(ubo, 0, bytemuck::bytes_of(&uniform));

        let mut stats = DrawStats {
            surfels: scene.point_count(),
            ..DrawStats::default()
        };
        let mut encoder = gpu
            .device()
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("surfelview frame encoder"),
            });

        // Render pass; dropped before the encoder is finished.
        {
            let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("surfelview scene pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: target.view(),
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });
            rpass.set_bind_group(0, bind_group, &[]);

            if settings.show_mesh {
                let vbo = scene.mesh_vertices().and_then(|b| b.wgpu_buffer());
                let ibo = scene.mesh_indices().and_then(|b| b.wgpu_buffer());
                if let (Some(pipeline), Some(vbo), Some(ibo)) = (self.mesh_pipeline.as_ref(), vbo, ibo) {
                    let index_count = (scene.triangle_count() * 3) as u32;
                    rpass.set_pipeline(pipeline);
                    rpass.set_vertex_buffer(0, vbo.slice(..));
                    rpass.set_index_buffer(ibo.slice(..), wgpu::IndexFormat::Uint32);
                    rpass.draw_indexed(0..index_count, 0, 0..1);
                    stats.triangles = scene.triangle_count();
                }
            }

            let range = splat_range(scene, settings);
            let vbo = scene.surfel_vertices().and_then(|b| b.wgpu_buffer());
            if let (false, Some(pipeline), Some(vbo), Some(quad_vbo), Some(quad_ibo)) = (
                range.is_empty(),
                self.splat_pipeline.as_ref(),
                vbo,
                self.quad_vbo.as_ref(),
                self.quad_ibo.as_ref(),
            ) {
                rpass.set_pipeline(pipeline);
                rpass.set_vertex_buffer(0, quad_vbo.slice(..));
                rpass.set_vertex_buffer(1, vbo.slice(..));
                rpass.set_index_buffer(quad_ibo.slice(..), wgpu::IndexFormat::Uint16);
                rpass.draw_indexed(0..6, 0, range.start as u32..range.end as u32);
                stats.splats = range.len();
            }
        }

        gpu.queue().submit(std::iter::once(encoder.finish()));
        Ok(stats)
    }

    fn release(&mut self) {
        *self = Self::default();
    }
}

fn create_pipeline(
    device: &wgpu::Device,
    layout: &wgpu::PipelineLayout,
    shader: &wgpu::ShaderModule,
    format: wgpu::TextureFormat,
    label: &str,
    (vs, fs): (&str, &str),
    buffers: &[wgpu::VertexBufferLayout<'_>],
) -> wgpu::RenderPipeline {
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module: shader,
            entry_point: Some(vs),
            compilation_options: Default::default(),
            buffers,
        },
        fragment: Some(wgpu::FragmentState {
            module: shader,
            entry_point: Some(fs),
            compilation_options: Default::default(),
            targets: &[Some(wgpu::ColorTargetState {
                format,
                blend: None,
                write_mask: wgpu::ColorWrites::ALL,
            })],
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            strip_index_format: None,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: None,
            polygon_mode: wgpu::PolygonMode::Fill,
            unclipped_depth: false,
            conservative: false,
        },
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        multiview_mask: None,
        cache: None,
    })
}

// ── GPU types ─────────────────────────────────────────────────────────────

/// Uniform layout (96 bytes), shared by both pipelines.
#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
struct FrameUniform {
    view_proj: [[f32; 4]; 4],
    viewing_dir: [f32; 4],
    viewport: [f32; 2],
    splat_half_extent: f32,
    normal_shading: f32,
}

impl FrameUniform {
    const SIZE: u64 = std::mem::size_of::<FrameUniform>() as u64;
}

#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
struct QuadCorner {
    pos: [f32; 2],
}

impl QuadCorner {
    const ATTRS: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![0 => Float32x2];

    fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<QuadCorner>() as u64,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRS,
        }
    }
}

const QUAD_CORNERS: [QuadCorner; 4] = [
    QuadCorner { pos: [0.0, 0.0] },
    QuadCorner { pos: [1.0, 0.0] },
    QuadCorner { pos: [1.0, 1.0] },
    QuadCorner { pos: [0.0, 1.0] },
];

const QUAD_INDICES: [u16; 6] = [0, 1, 2, 0, 2, 3];

const SURFEL_ATTRS: [wgpu::VertexAttribute; 2] = wgpu::vertex_attr_array![
    1 => Float32x3, // position
    2 => Unorm8x4   // color
];

fn surfel_layout(step_mode: wgpu::VertexStepMode) -> wgpu::VertexBufferLayout<'static> {
    wgpu::VertexBufferLayout {
        array_stride: SurfelVertex::STRIDE,
        step_mode,
        attributes: &SURFEL_ATTRS,
    }
}
