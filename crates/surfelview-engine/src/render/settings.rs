/// Drawing options read by the render loop once per frame.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderSettings {
    /// Draw surfels that are not part of the latest mesh as splats.
    pub render_new_surfels_as_splats: bool,
    /// Half the splat size in pixels.
    pub splat_half_extent_in_pixels: f32,
    /// Shade mesh triangles by their face normal instead of vertex colors.
    pub triangle_normal_shading: bool,
    /// Draw the input camera's frustum once its pose is known.
    pub render_camera_frustum: bool,
    pub render_as_wireframe: bool,
    pub show_surfels: bool,
    pub show_mesh: bool,
    /// Linear RGBA.
    pub clear_color: [f32; 4],
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            render_new_surfels_as_splats: true,
            splat_half_extent_in_pixels: 3.0,
            triangle_normal_shading: false,
            render_camera_frustum: true,
            render_as_wireframe: false,
            show_surfels: true,
            show_mesh: true,
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

impl RenderSettings {
    /// Splat half extent clamped to something drawable.
    pub fn splat_half_extent(&self) -> f32 {
        if self.splat_half_extent_in_pixels.is_finite() {
            self.splat_half_extent_in_pixels.clamp(0.5, 64.0)
        } else {
            0.5
        }
    }
}
