//! The graphics-context contract the compositor drives.
//!
//! The compositor never talks to a GPU API directly. Everything it needs
//! (render-target allocation, program compilation, full-screen draws) goes
//! through [`Backend`], which has a wgpu implementation in
//! [`crate::render::WgpuBackend`] and a CPU simulation in
//! [`super::headless::HeadlessBackend`].

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::hash::Hash;

use crate::coords::Viewport;

use super::texture::TextureDesc;

/// Preprocessor-style defines handed to program compilation.
pub type Defines = BTreeMap<String, String>;

/// A compiled fragment program.
pub trait ShaderProgram {
    /// Whether the program declares a texture or uniform called `name`.
    fn has_input(&self, name: &str) -> bool;

    fn label(&self) -> &str;
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum AttachmentPoint {
    Color(u8),
    Depth,
}

impl Default for AttachmentPoint {
    fn default() -> Self {
        AttachmentPoint::Color(0)
    }
}

impl AttachmentPoint {
    const GL_COLOR_ATTACHMENT0: u32 = 36064;
    const GL_DEPTH_ATTACHMENT: u32 = 36096;

    /// Parses `COLOR_ATTACHMENTn` / `DEPTH_ATTACHMENT`.
    pub fn parse(name: &str) -> Option<Self> {
        let upper = name.trim().to_ascii_uppercase();
        if upper == "DEPTH_ATTACHMENT" || upper == "DEPTH" {
            return Some(AttachmentPoint::Depth);
        }
        let index = upper.strip_prefix("COLOR_ATTACHMENT")?;
        index.parse::<u8>().ok().filter(|i| *i < 16).map(AttachmentPoint::Color)
    }

    /// Maps a raw GL enum value.
    pub fn from_gl_enum(value: u32) -> Option<Self> {
        match value {
            Self::GL_DEPTH_ATTACHMENT => Some(AttachmentPoint::Depth),
            v if (Self::GL_COLOR_ATTACHMENT0..Self::GL_COLOR_ATTACHMENT0 + 16).contains(&v) => {
                Some(AttachmentPoint::Color((v - Self::GL_COLOR_ATTACHMENT0) as u8))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Attachment<T> {
    pub point: AttachmentPoint,
    pub pin: String,
    pub texture: T,
}

/// Where a draw lands.
#[derive(Debug, Clone, Copy)]
pub enum RenderTarget<'a, T> {
    /// The presented surface (nodes without outputs).
    Screen,
    Attachments(&'a [Attachment<T>]),
}

impl<'a, T> RenderTarget<'a, T> {
    pub fn attachments(&self) -> &'a [Attachment<T>] {
        match self {
            RenderTarget::Screen => &[],
            RenderTarget::Attachments(a) => a,
        }
    }

    pub fn is_screen(&self) -> bool {
        matches!(self, RenderTarget::Screen)
    }
}

#[derive(Debug, Clone, Copy)]
pub enum BindingValue<'a, T> {
    Texture(&'a T),
    Float(f32),
    Vector(&'a [f32]),
}

#[derive(Debug, Clone, Copy)]
pub struct Binding<'a, T> {
    pub name: &'a str,
    pub value: BindingValue<'a, T>,
}

impl<'a, T> Binding<'a, T> {
    pub fn texture(name: &'a str, texture: &'a T) -> Self {
        Self { name, value: BindingValue::Texture(texture) }
    }

    pub fn float(name: &'a str, value: f32) -> Self {
        Self { name, value: BindingValue::Float(value) }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum BackendError {
    #[error("out of GPU memory allocating {width}x{height} {format}")]
    OutOfMemory {
        width: u32,
        height: u32,
        format: String,
    },
    #[error("program error: {0}")]
    Program(String),
    #[error("draw failed: {0}")]
    Draw(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("failed to load texture {path:?}: {message}")]
    Load { path: String, message: String },
}

impl BackendError {
    pub fn out_of_memory(desc: &TextureDesc) -> Self {
        BackendError::OutOfMemory {
            width: desc.width,
            height: desc.height,
            format: format!("{:?}", desc.format),
        }
    }
}

/// Graphics-context handle consumed by the compositor.
pub trait Backend {
    type Texture: Clone + Eq + Hash + Debug;
    type Program: ShaderProgram;

    /// Current viewport size and device pixel ratio.
    fn viewport(&self) -> Viewport;

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<Self::Texture, BackendError>;

    fn destroy_texture(&mut self, texture: Self::Texture);

    /// A 1x1 transparent texture owned by the backend, bound in place of
    /// absent inputs.
    fn fallback_texture(&self) -> Self::Texture;

    /// Zeroes a texture.
    fn clear_texture(&mut self, texture: &Self::Texture) -> Result<(), BackendError>;

    fn create_program(
        &mut self,
        label: &str,
        fragment: &str,
        defines: &Defines,
    ) -> Result<Self::Program, BackendError>;

    fn draw_fullscreen(
        &mut self,
        program: &mut Self::Program,
        bindings: &[Binding<'_, Self::Texture>],
        target: &RenderTarget<'_, Self::Texture>,
    ) -> Result<(), BackendError>;

    fn clear_target(&mut self, target: &RenderTarget<'_, Self::Texture>) -> Result<(), BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attachment_names() {
        assert_eq!(AttachmentPoint::parse("COLOR_ATTACHMENT0"), Some(AttachmentPoint::Color(0)));
        assert_eq!(AttachmentPoint::parse("color_attachment3"), Some(AttachmentPoint::Color(3)));
        assert_eq!(AttachmentPoint::parse("DEPTH_ATTACHMENT"), Some(AttachmentPoint::Depth));
        assert_eq!(AttachmentPoint::parse("STENCIL"), None);
    }

    #[test]
    fn attachment_gl_enums() {
        assert_eq!(AttachmentPoint::from_gl_enum(36064), Some(AttachmentPoint::Color(0)));
        assert_eq!(AttachmentPoint::from_gl_enum(36065), Some(AttachmentPoint::Color(1)));
        assert_eq!(AttachmentPoint::from_gl_enum(36096), Some(AttachmentPoint::Depth));
        assert_eq!(AttachmentPoint::from_gl_enum(1), None);
    }
}
