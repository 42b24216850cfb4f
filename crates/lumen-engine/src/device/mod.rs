//! GPU device + surface management.
//!
//! [`Gpu`] owns the wgpu instance, adapter, device, queue and the window
//! surface. The compositor's [`crate::render::WgpuBackend`] shares the same
//! device and queue (see [`Gpu::create_backend`]).

mod context;
mod error;
mod frame;
mod init;
mod surface;

pub use context::Gpu;
pub use error::SurfaceErrorAction;
pub use frame::GpuFrame;
pub use init::GpuInit;
