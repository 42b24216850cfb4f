//! Window + runtime loop.
//!
//! Owns the `winit` event loop and windows, and binds one [`crate::device::Gpu`]
//! to each window.

mod runtime;

pub use runtime::{Runtime, RuntimeConfig, RuntimeCtx};
