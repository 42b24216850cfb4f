//! Render-target shapes: the pool key and the declarative parameters that
//! resolve to it each frame.

use lumen_expr::ParamValue;

use crate::coords::Viewport;

// ── enums ─────────────────────────────────────────────────────────────────

#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash)]
pub enum TextureFormat {
    #[default]
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Rgba16Float,
    Rgba32Float,
    R16Float,
    R32Float,
    Rg16Float,
    Depth24Plus,
    Depth32Float,
}

impl TextureFormat {
    /// Accepts GL-style names from graph files (`RGBA`, `HALF_FLOAT`, ...) as
    /// well as wgpu-style lower-case names (`rgba16float`).
    pub fn from_name(name: &str) -> Option<Self> {
        let n = name.trim().to_ascii_lowercase().replace(['_', '-'], "");
        Some(match n.as_str() {
            "rgba" | "rgba8" | "rgba8unorm" | "unsignedbyte" => Self::Rgba8Unorm,
            "srgb" | "rgba8srgb" | "rgba8unormsrgb" => Self::Rgba8UnormSrgb,
            "halffloat" | "rgba16f" | "rgba16float" => Self::Rgba16Float,
            "float" | "rgba32f" | "rgba32float" => Self::Rgba32Float,
            "r16f" | "r16float" => Self::R16Float,
            "r32f" | "r32float" => Self::R32Float,
            "rg16f" | "rg16float" => Self::Rg16Float,
            "depthcomponent" | "depth24plus" | "depth" => Self::Depth24Plus,
            "depth32f" | "depth32float" => Self::Depth32Float,
            _ => return None,
        })
    }

    pub fn is_depth(self) -> bool {
        matches!(self, Self::Depth24Plus | Self::Depth32Float)
    }
}

#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash)]
pub enum FilterMode {
    Nearest,
    #[default]
    Linear,
}

#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash)]
pub enum WrapMode {
    #[default]
    ClampToEdge,
    Repeat,
    MirroredRepeat,
}

impl WrapMode {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_uppercase().as_str() {
            "CLAMP_TO_EDGE" | "CLAMP" => Some(Self::ClampToEdge),
            "REPEAT" => Some(Self::Repeat),
            "MIRRORED_REPEAT" => Some(Self::MirroredRepeat),
            _ => None,
        }
    }
}

/// Parses a GL filter name into `(filter, uses_mipmaps)`.
///
/// `LINEAR_MIPMAP_LINEAR` and friends keep the base filter of the first half.
pub fn parse_filter(name: &str) -> Option<(FilterMode, bool)> {
    let upper = name.trim().to_ascii_uppercase();
    let (base, mip) = match upper.split_once("_MIPMAP_") {
        Some((base, _)) => (base, true),
        None => (upper.as_str(), false),
    };
    let mode = match base {
        "LINEAR" => FilterMode::Linear,
        "NEAREST" => FilterMode::Nearest,
        _ => return None,
    };
    Some((mode, mip))
}

// ── TextureDesc ───────────────────────────────────────────────────────────

/// Fully resolved render-target shape. Two textures are interchangeable in the
/// pool iff their descriptors are equal.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub min_filter: FilterMode,
    pub mag_filter: FilterMode,
    pub wrap_s: WrapMode,
    pub wrap_t: WrapMode,
    pub mipmaps: bool,
    pub anisotropy: u8,
}

impl TextureDesc {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            format: TextureFormat::default(),
            min_filter: FilterMode::Linear,
            mag_filter: FilterMode::Linear,
            wrap_s: WrapMode::ClampToEdge,
            wrap_t: WrapMode::ClampToEdge,
            mipmaps: false,
            anisotropy: 1,
        }
    }

    pub fn with_format(mut self, format: TextureFormat) -> Self {
        self.format = format;
        self
    }
}

// ── TextureParams ─────────────────────────────────────────────────────────

/// Size evaluated to a non-finite value.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct NonFiniteSize {
    pub width: f64,
    pub height: f64,
}

/// Declarative output parameters.
///
/// Width and height are literals or `expr(...)` values. Expressions see the
/// viewport multiplied by `scale`; literals are used verbatim. A missing
/// dimension defaults to the scaled viewport size.
#[derive(Debug, Clone, PartialEq)]
pub struct TextureParams {
    pub width: Option<ParamValue>,
    pub height: Option<ParamValue>,
    /// Unset means 1.
    pub scale: Option<f64>,
    pub format: Option<TextureFormat>,
    pub min_filter: Option<FilterMode>,
    pub mag_filter: Option<FilterMode>,
    pub wrap_s: Option<WrapMode>,
    pub wrap_t: Option<WrapMode>,
    pub mipmaps: Option<bool>,
    pub anisotropy: Option<u8>,
}

impl Default for TextureParams {
    fn default() -> Self {
        Self {
            width: None,
            height: None,
            scale: None,
            format: None,
            min_filter: None,
            mag_filter: None,
            wrap_s: None,
            wrap_t: None,
            mipmaps: None,
            anisotropy: None,
        }
    }
}

impl TextureParams {
    /// Full-viewport render target with default format.
    pub fn viewport() -> Self {
        Self::default()
    }

    pub fn fixed(width: u32, height: u32) -> Self {
        Self {
            width: Some(ParamValue::literal(f64::from(width))),
            height: Some(ParamValue::literal(f64::from(height))),
            ..Self::default()
        }
    }

    pub fn with_size(mut self, width: ParamValue, height: ParamValue) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = Some(scale);
        self
    }

    pub fn with_format(mut self, format: TextureFormat) -> Self {
        self.format = Some(format);
        self
    }

    /// Returns `self` with every unset field taken from `base`.
    ///
    /// Used when an output references a named preset and overrides part of it.
    pub fn merged_over(&self, base: &TextureParams) -> TextureParams {
        TextureParams {
            width: self.width.clone().or_else(|| base.width.clone()),
            height: self.height.clone().or_else(|| base.height.clone()),
            scale: self.scale.or(base.scale),
            format: self.format.or(base.format),
            min_filter: self.min_filter.or(base.min_filter),
            mag_filter: self.mag_filter.or(base.mag_filter),
            wrap_s: self.wrap_s.or(base.wrap_s),
            wrap_t: self.wrap_t.or(base.wrap_t),
            mipmaps: self.mipmaps.or(base.mipmaps),
            anisotropy: self.anisotropy.or(base.anisotropy),
        }
    }

    /// Evaluates the parameters for this frame's viewport.
    pub fn resolve(&self, viewport: &Viewport) -> Result<TextureDesc, NonFiniteSize> {
        let vars = viewport.vars(self.scale.unwrap_or(1.0));
        let width = self.width.as_ref().map_or(vars.width, |v| v.eval(&vars));
        let height = self.height.as_ref().map_or(vars.height, |v| v.eval(&vars));

        if !width.is_finite() || !height.is_finite() {
            return Err(NonFiniteSize { width, height });
        }

        let mut desc = TextureDesc::new(to_extent(width), to_extent(height));
        if let Some(format) = self.format {
            desc.format = format;
        }
        if let Some(f) = self.min_filter {
            desc.min_filter = f;
        }
        if let Some(f) = self.mag_filter {
            desc.mag_filter = f;
        }
        if let Some(w) = self.wrap_s {
            desc.wrap_s = w;
        }
        if let Some(w) = self.wrap_t {
            desc.wrap_t = w;
        }
        if let Some(m) = self.mipmaps {
            desc.mipmaps = m;
        }
        if let Some(a) = self.anisotropy {
            desc.anisotropy = a.max(1);
        }
        Ok(desc)
    }
}

fn to_extent(v: f64) -> u32 {
    v.round().clamp(1.0, f64::from(u32::MAX)) as u32
}
