use crate::coords::Viewport;

/// One acquired surface image.
///
/// Short-lived: holding the surface texture blocks acquisition of the next
/// frame. Presentation happens in [`super::Gpu::present`].
pub struct GpuFrame {
    pub surface_texture: wgpu::SurfaceTexture,
    pub view: wgpu::TextureView,
    /// Logical size and dpr the frame was acquired at.
    pub viewport: Viewport,
}
