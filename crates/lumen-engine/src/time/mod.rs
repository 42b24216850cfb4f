//! Frame timing.
//!
//! One [`FrameClock`] per window; `tick()` once per presented frame. Scene
//! renderers animate from [`FrameTime::elapsed`].

mod frame_clock;

pub use frame_clock::{FrameClock, FrameTime};
