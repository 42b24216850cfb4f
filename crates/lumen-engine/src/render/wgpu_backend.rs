use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::compositor::{
    Attachment, AttachmentPoint, Backend, BackendError, Binding, BindingValue, Defines, FilterMode, RenderTarget,
    ShaderProgram, TextureDesc, TextureFormat, WrapMode,
};
use crate::coords::Viewport;

use super::program::{TargetKey, WgpuProgram, SAMPLER_SUFFIX};

type TargetViews<'t> = (Vec<Option<&'t wgpu::TextureView>>, TargetKey, Option<&'t wgpu::TextureView>);

/// A pooled or loaded GPU texture.
///
/// Identity is the backend-assigned id; clones share the same wgpu objects.
#[derive(Clone)]
pub struct GpuTexture {
    id: u64,
    desc: TextureDesc,
    pub texture: wgpu::Texture,
    /// Sampling view (cube view for cube maps).
    pub view: wgpu::TextureView,
    /// Single-level 2D view usable as a render attachment.
    pub attachment: Option<wgpu::TextureView>,
    pub sampler: wgpu::Sampler,
}

impl GpuTexture {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn desc(&self) -> &TextureDesc {
        &self.desc
    }
}

impl PartialEq for GpuTexture {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for GpuTexture {}

impl Hash for GpuTexture {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for GpuTexture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GpuTexture#{}({}x{} {:?})", self.id, self.desc.width, self.desc.height, self.desc.format)
    }
}

pub fn wgpu_format(format: TextureFormat) -> wgpu::TextureFormat {
    match format {
        TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        TextureFormat::Rgba8UnormSrgb => wgpu::TextureFormat::Rgba8UnormSrgb,
        TextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        TextureFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
        TextureFormat::R16Float => wgpu::TextureFormat::R16Float,
        TextureFormat::R32Float => wgpu::TextureFormat::R32Float,
        TextureFormat::Rg16Float => wgpu::TextureFormat::Rg16Float,
        TextureFormat::Depth24Plus => wgpu::TextureFormat::Depth24Plus,
        TextureFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
    }
}

fn wgpu_filter(mode: FilterMode) -> wgpu::FilterMode {
    match mode {
        FilterMode::Nearest => wgpu::FilterMode::Nearest,
        FilterMode::Linear => wgpu::FilterMode::Linear,
    }
}

fn wgpu_address(mode: WrapMode) -> wgpu::AddressMode {
    match mode {
        WrapMode::ClampToEdge => wgpu::AddressMode::ClampToEdge,
        WrapMode::Repeat => wgpu::AddressMode::Repeat,
        WrapMode::MirroredRepeat => wgpu::AddressMode::MirrorRepeat,
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
struct SamplerKey {
    min: FilterMode,
    mag: FilterMode,
    wrap_s: WrapMode,
    wrap_t: WrapMode,
    mipmaps: bool,
    anisotropy: u8,
}

impl From<&TextureDesc> for SamplerKey {
    fn from(d: &TextureDesc) -> Self {
        Self {
            min: d.min_filter,
            mag: d.mag_filter,
            wrap_s: d.wrap_s,
            wrap_t: d.wrap_t,
            mipmaps: d.mipmaps,
            anisotropy: d.anisotropy,
        }
    }
}

/// Compositor backend over a wgpu device.
///
/// Usage per frame: [`begin_frame`](Self::begin_frame) with the surface view,
/// run the compositor, then submit [`finish_frame`](Self::finish_frame).
/// Draws are recorded into a lazily created encoder; a program whose uniform
/// block was already written for the pending encoder forces a flush so every
/// draw sees its own parameter values.
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    surface_format: wgpu::TextureFormat,
    viewport: Viewport,

    screen: Option<wgpu::TextureView>,
    encoder: Option<wgpu::CommandEncoder>,
    submission: u64,

    next_id: u64,
    samplers: HashMap<SamplerKey, wgpu::Sampler>,
    fallback: GpuTexture,
}

impl WgpuBackend {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue, surface_format: wgpu::TextureFormat) -> Self {
        let mut samplers = HashMap::new();
        let desc = TextureDesc::new(1, 1);
        let sampler = Self::sampler_for(&device, &mut samplers, &desc);

        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("lumen fallback texture"),
            size: wgpu::Extent3d { width: 1, height: 1, depth_or_array_layers: 1 },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &[0u8; 4],
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4),
                rows_per_image: Some(1),
            },
            wgpu::Extent3d { width: 1, height: 1, depth_or_array_layers: 1 },
        );
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        Self {
            device,
            queue,
            surface_format,
            viewport: Viewport::default(),
            screen: None,
            encoder: None,
            submission: 0,
            next_id: 1,
            samplers,
            fallback: GpuTexture {
                id: 0,
                desc,
                texture,
                view,
                attachment: None,
                sampler,
            },
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn surface_format(&self) -> wgpu::TextureFormat {
        self.surface_format
    }

    /// Sets the presented view and viewport for the coming compositor frame.
    pub fn begin_frame(&mut self, screen: Option<wgpu::TextureView>, viewport: Viewport) {
        self.screen = screen;
        self.viewport = viewport;
    }

    /// Returns the commands recorded since the last flush, if any. The screen
    /// view is released.
    pub fn finish_frame(&mut self) -> Option<wgpu::CommandBuffer> {
        self.screen = None;
        self.submission += 1;
        self.encoder.take().map(|e| e.finish())
    }

    /// Drops the commands recorded since the last flush. The screen view is
    /// released without having been drawn to.
    pub fn discard_frame(&mut self) {
        self.screen = None;
        self.submission += 1;
        if self.encoder.take().is_some() {
            log::debug!("wgpu backend: discarded the frame's pending commands");
        }
    }

    /// The pending encoder, for scene renderers recording their own passes.
    pub fn encoder(&mut self) -> &mut wgpu::CommandEncoder {
        let device = &self.device;
        self.encoder.get_or_insert_with(|| {
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("lumen compositor encoder"),
            })
        })
    }

    fn flush(&mut self) {
        if let Some(encoder) = self.encoder.take() {
            self.queue.submit(std::iter::once(encoder.finish()));
        }
        self.submission += 1;
    }

    fn next_texture_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Wraps a texture created outside the pool (loaded assets).
    pub(crate) fn adopt(
        &mut self,
        desc: TextureDesc,
        texture: wgpu::Texture,
        view: wgpu::TextureView,
        attachment: Option<wgpu::TextureView>,
    ) -> GpuTexture {
        GpuTexture {
            id: self.next_texture_id(),
            sampler: self.sampler(&desc),
            desc,
            texture,
            view,
            attachment,
        }
    }

    pub(crate) fn sampler(&mut self, desc: &TextureDesc) -> wgpu::Sampler {
        Self::sampler_for(&self.device, &mut self.samplers, desc)
    }

    fn sampler_for(
        device: &wgpu::Device,
        cache: &mut HashMap<SamplerKey, wgpu::Sampler>,
        desc: &TextureDesc,
    ) -> wgpu::Sampler {
        let key = SamplerKey::from(desc);
        cache
            .entry(key)
            .or_insert_with(|| {
                let all_linear = key.min == FilterMode::Linear && key.mag == FilterMode::Linear;
                // Anisotropy requires linear filtering everywhere.
                let anisotropy = if all_linear && key.mipmaps { u16::from(key.anisotropy.max(1)) } else { 1 };
                device.create_sampler(&wgpu::SamplerDescriptor {
                    label: Some("lumen sampler"),
                    address_mode_u: wgpu_address(key.wrap_s),
                    address_mode_v: wgpu_address(key.wrap_t),
                    address_mode_w: wgpu_address(key.wrap_t),
                    mag_filter: wgpu_filter(key.mag),
                    min_filter: wgpu_filter(key.min),
                    mipmap_filter: if anisotropy > 1 {
                        wgpu::MipmapFilterMode::Linear
                    } else {
                        wgpu::MipmapFilterMode::Nearest
                    },
                    anisotropy_clamp: anisotropy,
                    ..Default::default()
                })
            })
            .clone()
    }
}

impl Backend for WgpuBackend {
    type Texture = GpuTexture;
    type Program = WgpuProgram;

    fn viewport(&self) -> Viewport {
        self.viewport
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<GpuTexture, BackendError> {
        let limit = self.device.limits().max_texture_dimension_2d;
        if desc.width > limit || desc.height > limit {
            return Err(BackendError::out_of_memory(desc));
        }

        let format = wgpu_format(desc.format);
        let mut usage = wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING;
        if !desc.format.is_depth() {
            usage |= wgpu::TextureUsages::COPY_SRC | wgpu::TextureUsages::COPY_DST;
        }
        let id = self.next_texture_id();
        let scope = self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("lumen render target"),
            size: wgpu::Extent3d { width: desc.width, height: desc.height, depth_or_array_layers: 1 },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage,
            view_formats: &[],
        });
        if let Err(err) = allocation_result(desc, pollster::block_on(scope.pop())) {
            texture.destroy();
            return Err(err);
        }
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let sampler = self.sampler(desc);

        Ok(GpuTexture {
            id,
            desc: *desc,
            texture,
            attachment: Some(view.clone()),
            view,
            sampler,
        })
    }

    fn destroy_texture(&mut self, texture: GpuTexture) {
        if texture.id != self.fallback.id {
            texture.texture.destroy();
        }
    }

    fn fallback_texture(&self) -> GpuTexture {
        self.fallback.clone()
    }

    fn clear_texture(&mut self, texture: &GpuTexture) -> Result<(), BackendError> {
        let point = if texture.desc.format.is_depth() { AttachmentPoint::Depth } else { AttachmentPoint::Color(0) };
        let attachments = [Attachment {
            point,
            pin: String::new(),
            texture: texture.clone(),
        }];
        self.clear_target(&RenderTarget::Attachments(&attachments))
    }

    fn create_program(&mut self, label: &str, fragment: &str, defines: &Defines) -> Result<WgpuProgram, BackendError> {
        WgpuProgram::compile(&self.device, label, fragment, defines)
    }

    fn draw_fullscreen(
        &mut self,
        program: &mut WgpuProgram,
        bindings: &[Binding<'_, GpuTexture>],
        target: &RenderTarget<'_, GpuTexture>,
    ) -> Result<(), BackendError> {
        for binding in bindings {
            match binding.value {
                BindingValue::Float(v) => {
                    program.set_uniform(binding.name, &[v]);
                }
                BindingValue::Vector(v) => {
                    program.set_uniform(binding.name, v);
                }
                BindingValue::Texture(_) => {}
            }
        }

        if let Some(storage) = program.uniforms.as_mut() {
            if storage.written_in == Some(self.submission) {
                self.flush();
            }
            self.queue.write_buffer(&storage.buffer, 0, &storage.data);
            storage.written_in = Some(self.submission);
        }

        let textures: HashMap<&str, &GpuTexture> = bindings
            .iter()
            .filter_map(|b| match b.value {
                BindingValue::Texture(t) => Some((b.name, t)),
                _ => None,
            })
            .collect();

        let default_sampler = self.sampler(&TextureDesc::new(1, 1));
        let (views, key, depth_view) = target_views(self.screen.as_ref(), self.surface_format, target)?;
        let pipeline = program.pipeline(&self.device, &key).clone();

        let bind_group = if program.reflection.is_empty() {
            None
        } else {
            let reflection = &program.reflection;
            let mut entries: Vec<wgpu::BindGroupEntry<'_>> = Vec::new();
            for (name, &slot) in &reflection.textures {
                let texture = textures.get(name.as_str()).copied().unwrap_or(&self.fallback);
                entries.push(wgpu::BindGroupEntry {
                    binding: slot,
                    resource: wgpu::BindingResource::TextureView(&texture.view),
                });
            }
            for (name, &slot) in &reflection.samplers {
                let sampler = name
                    .strip_suffix(SAMPLER_SUFFIX)
                    .and_then(|pin| textures.get(pin))
                    .map_or(&default_sampler, |t| &t.sampler);
                entries.push(wgpu::BindGroupEntry {
                    binding: slot,
                    resource: wgpu::BindingResource::Sampler(sampler),
                });
            }
            if let Some(storage) = program.uniforms.as_ref() {
                entries.push(wgpu::BindGroupEntry {
                    binding: storage.block.binding,
                    resource: storage.buffer.as_entire_binding(),
                });
            }
            Some(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(program.label()),
                layout: &pipeline.get_bind_group_layout(0),
                entries: &entries,
            }))
        };

        let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment<'_>>> = views
            .iter()
            .map(|view| {
                view.map(|view| wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })
            })
            .collect();
        let depth_stencil_attachment = depth_view.map(|view| wgpu::RenderPassDepthStencilAttachment {
            view,
            depth_ops: Some(wgpu::Operations {
                load: wgpu::LoadOp::Load,
                store: wgpu::StoreOp::Store,
            }),
            stencil_ops: None,
        });

        let device = &self.device;
        let encoder = self.encoder.get_or_insert_with(|| {
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("lumen compositor encoder"),
            })
        });

        let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(program.label()),
            color_attachments: &color_attachments,
            depth_stencil_attachment,
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        });
        rpass.set_pipeline(&pipeline);
        if let Some(bind_group) = &bind_group {
            rpass.set_bind_group(0, bind_group, &[]);
        }
        rpass.draw(0..3, 0..1);
        Ok(())
    }

    fn clear_target(&mut self, target: &RenderTarget<'_, GpuTexture>) -> Result<(), BackendError> {
        let (views, _, depth_view) = target_views(self.screen.as_ref(), self.surface_format, target)?;

        let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment<'_>>> = views
            .iter()
            .map(|view| {
                view.map(|view| wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })
            })
            .collect();
        let depth_stencil_attachment = depth_view.map(|view| wgpu::RenderPassDepthStencilAttachment {
            view,
            depth_ops: Some(wgpu::Operations {
                load: wgpu::LoadOp::Clear(1.0),
                store: wgpu::StoreOp::Store,
            }),
            stencil_ops: None,
        });

        let device = &self.device;
        let encoder = self.encoder.get_or_insert_with(|| {
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("lumen compositor encoder"),
            })
        });
        let _rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("lumen clear"),
            color_attachments: &color_attachments,
            depth_stencil_attachment,
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        });
        Ok(())
    }
}

/// Resolves a render target to attachment views and the pipeline key.
fn target_views<'t>(
    screen: Option<&'t wgpu::TextureView>,
    surface_format: wgpu::TextureFormat,
    target: &RenderTarget<'t, GpuTexture>,
) -> Result<TargetViews<'t>, BackendError> {
    if target.is_screen() {
        let view = screen.ok_or_else(|| BackendError::Draw("no screen view for this frame".to_string()))?;
        return Ok((
            vec![Some(view)],
            TargetKey { colors: vec![Some(surface_format)], depth: None },
            None,
        ));
    }

    let mut views: Vec<Option<&wgpu::TextureView>> = Vec::new();
    let mut key = TargetKey { colors: Vec::new(), depth: None };
    let mut depth_view = None;

    for attachment in target.attachments() {
        let view = attachment.texture.attachment.as_ref().ok_or_else(|| {
            BackendError::Unsupported(format!("pin `{}`: texture cannot be rendered to", attachment.pin))
        })?;
        let format = wgpu_format(attachment.texture.desc.format);
        match attachment.point {
            AttachmentPoint::Color(n) => {
                let n = usize::from(n);
                if views.len() <= n {
                    views.resize(n + 1, None);
                    key.colors.resize(n + 1, None);
                }
                views[n] = Some(view);
                key.colors[n] = Some(format);
            }
            AttachmentPoint::Depth => {
                depth_view = Some(view);
                key.depth = Some(format);
            }
        }
    }
    Ok((views, key, depth_view))
}

/// Maps what an out-of-memory error scope caught around an allocation.
fn allocation_result(desc: &TextureDesc, caught: Option<wgpu::Error>) -> Result<(), BackendError> {
    match caught {
        None => Ok(()),
        Some(err) => {
            log::warn!("allocating a {}x{} {:?} texture failed: {err}", desc.width, desc.height, desc.format);
            Err(BackendError::out_of_memory(desc))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caught_allocation_errors_are_out_of_memory() {
        let desc = TextureDesc::new(8192, 8192);
        assert!(allocation_result(&desc, None).is_ok());

        let caught = wgpu::Error::OutOfMemory { source: "device lost memory".into() };
        match allocation_result(&desc, Some(caught)) {
            Err(BackendError::OutOfMemory { width, height, .. }) => assert_eq!((width, height), (8192, 8192)),
            other => panic!("unexpected {other:?}"),
        }
    }
}
