//! Coordinate types shared by the runtime, the compositor and renderers.
//!
//! Canonical CPU space:
//! - Logical pixels (DPI-aware)
//! - Physical pixels = logical * device pixel ratio

mod viewport;

pub use viewport::Viewport;
