//! wgpu implementation of the compositor backend.
//!
//! Convention:
//! - Filter programs are WGSL fragment shaders; the vertex stage is a
//!   built-in full-screen triangle (see [`FULLSCREEN_PRELUDE`]).
//! - Render targets are pooled `GpuTexture`s; the presented surface is the
//!   `Screen` target for the current frame.

mod loader;
mod preprocess;
mod program;
mod wgpu_backend;

pub use loader::ImageTextureLoader;
pub use preprocess::preprocess;
pub use program::{reflect_wgsl, Reflection, UniformBlock, UniformField, WgpuProgram, FRAGMENT_ENTRY, FULLSCREEN_PRELUDE};
pub use wgpu_backend::{wgpu_format, GpuTexture, WgpuBackend};
