use std::path::Path;

use image::DynamicImage;

use crate::compositor::{BackendError, TextureDesc, TextureFormat, TextureLoader, TextureParams, TexturePath};
use crate::coords::Viewport;

use super::wgpu_backend::{wgpu_format, GpuTexture, WgpuBackend};

/// Decodes image files with the `image` crate and uploads them.
///
/// 2D assets become `texture_2d` textures, six-face assets a cube map
/// (`texture_cube` in WGSL). Float formats (`HALF_FLOAT`, `FLOAT`) upload
/// 32-bit float texels; everything else uploads 8-bit RGBA.
#[derive(Debug, Clone, Default)]
pub struct ImageTextureLoader {
    /// Flip rows so the first row is the bottom of the image.
    pub flip_y: bool,
}

impl ImageTextureLoader {
    pub fn new() -> Self {
        Self::default()
    }

    fn decode(&self, path: &Path) -> Result<DynamicImage, BackendError> {
        let img = image::open(path).map_err(|e| BackendError::Load {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Ok(if self.flip_y { img.flipv() } else { img })
    }
}

/// Texel bytes and the format they are laid out in.
fn texels(img: &DynamicImage, requested: TextureFormat) -> (Vec<u8>, TextureFormat, u32) {
    match requested {
        TextureFormat::Rgba16Float | TextureFormat::Rgba32Float => {
            let data = img.to_rgba32f();
            (bytemuck::cast_slice(data.as_raw()).to_vec(), TextureFormat::Rgba32Float, 16)
        }
        TextureFormat::Rgba8UnormSrgb => (img.to_rgba8().into_raw(), TextureFormat::Rgba8UnormSrgb, 4),
        _ => (img.to_rgba8().into_raw(), TextureFormat::Rgba8Unorm, 4),
    }
}

/// Sampler and format settings from `params`, sized to the image.
fn asset_desc(params: &TextureParams, width: u32, height: u32) -> TextureDesc {
    let sized = TextureParams {
        width: None,
        height: None,
        scale: None,
        ..params.clone()
    };
    sized
        .resolve(&Viewport::new(width as f32, height as f32, 1.0))
        .unwrap_or_else(|_| TextureDesc::new(width, height))
}

impl TextureLoader<WgpuBackend> for ImageTextureLoader {
    fn load(
        &mut self,
        backend: &mut WgpuBackend,
        path: &TexturePath,
        params: &TextureParams,
    ) -> Result<GpuTexture, BackendError> {
        let images = path
            .files()
            .into_iter()
            .map(|p| self.decode(p))
            .collect::<Result<Vec<_>, _>>()?;

        let Some(first) = images.first() else {
            return Err(BackendError::Load { path: path.describe(), message: "no files".into() });
        };
        let (width, height) = (first.width(), first.height());
        if let Some(odd) = images.iter().position(|i| i.width() != width || i.height() != height) {
            return Err(BackendError::Load {
                path: path.describe(),
                message: format!("face {odd} is not {width}x{height}"),
            });
        }

        let mut desc = asset_desc(params, width, height);
        let is_cube = matches!(path, TexturePath::Cube(_));
        let layers = images.len() as u32;

        let mut uploads = Vec::with_capacity(images.len());
        for img in &images {
            let (bytes, format, bytes_per_texel) = texels(img, desc.format);
            desc.format = format;
            uploads.push((bytes, bytes_per_texel));
        }

        let texture = backend.device().create_texture(&wgpu::TextureDescriptor {
            label: Some("lumen asset"),
            size: wgpu::Extent3d { width, height, depth_or_array_layers: layers },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu_format(desc.format),
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });

        for (layer, (bytes, bytes_per_texel)) in uploads.iter().enumerate() {
            backend.queue().write_texture(
                wgpu::TexelCopyTextureInfo {
                    texture: &texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d { x: 0, y: 0, z: layer as u32 },
                    aspect: wgpu::TextureAspect::All,
                },
                bytes,
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(width * bytes_per_texel),
                    rows_per_image: Some(height),
                },
                wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
            );
        }

        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some("lumen asset view"),
            dimension: Some(if is_cube { wgpu::TextureViewDimension::Cube } else { wgpu::TextureViewDimension::D2 }),
            ..Default::default()
        });

        log::debug!("loaded {} ({width}x{height}, {:?})", path.describe(), desc.format);
        Ok(backend.adopt(desc, texture, view, None))
    }
}
