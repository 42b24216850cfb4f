//! Lumen engine crate.
//!
//! The render-graph [`compositor`] plus the platform and GPU runtime it runs
//! on: wgpu device/surface handling, the winit window loop, frame timing and
//! logging.

pub mod device;
pub mod window;
pub mod time;
pub mod core;

pub mod logging;
pub mod coords;
pub mod compositor;
pub mod render;
