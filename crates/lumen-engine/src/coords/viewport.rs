use lumen_expr::Vars;

/// Viewport size in logical pixels plus the device pixel ratio.
///
/// Compositor size expressions are evaluated against this value each frame.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Viewport {
    pub width: f32,
    pub height: f32,
    pub dpr: f32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 0.0,
            height: 0.0,
            dpr: 1.0,
        }
    }
}

impl Viewport {
    #[inline]
    pub const fn new(width: f32, height: f32, dpr: f32) -> Self {
        Self { width, height, dpr }
    }

    /// Builds a viewport from a physical drawable size and a scale factor.
    #[inline]
    pub fn from_physical(width: u32, height: u32, dpr: f32) -> Self {
        let dpr = if dpr > 0.0 && dpr.is_finite() { dpr } else { 1.0 };
        Self::new(width as f32 / dpr, height as f32 / dpr, dpr)
    }

    #[inline]
    pub fn is_valid(self) -> bool {
        self.width > 0.0 && self.height > 0.0 && self.width.is_finite() && self.height.is_finite()
    }

    /// Physical size in pixels, rounded and clamped to at least 1x1.
    #[inline]
    pub fn physical_size(self) -> (u32, u32) {
        (
            (self.width * self.dpr).round().max(1.0) as u32,
            (self.height * self.dpr).round().max(1.0) as u32,
        )
    }

    /// Expression variables with width/height multiplied by `scale`.
    #[inline]
    pub fn vars(self, scale: f64) -> Vars {
        Vars::new(
            f64::from(self.width) * scale,
            f64::from(self.height) * scale,
            f64::from(self.dpr),
        )
    }
}
