use crate::compositor::backend::Backend;

/// Exposes an externally loaded texture as a node output.
///
/// The texture is not owned by the pool and is never released by the
/// compositor. `None` (for example after a failed load) makes every output of
/// the node absent, and readers bind the backend fallback instead.
pub struct TextureSource<B: Backend> {
    texture: Option<B::Texture>,
}

impl<B: Backend> TextureSource<B> {
    pub fn new(texture: Option<B::Texture>) -> Self {
        Self { texture }
    }

    pub fn texture(&self) -> Option<&B::Texture> {
        self.texture.as_ref()
    }

    pub fn set_texture(&mut self, texture: Option<B::Texture>) -> Option<B::Texture> {
        std::mem::replace(&mut self.texture, texture)
    }
}
