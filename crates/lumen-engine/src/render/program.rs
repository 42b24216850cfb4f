//! WGSL filter programs: preprocessing, naga reflection and pipeline cache.
//!
//! A filter source provides `fs_main`; it is appended to [`FULLSCREEN_PRELUDE`],
//! which supplies `vs_main` and the `FullscreenOut` varyings (`uv` in 0..1,
//! top-left origin). Resources are looked up by name in `@group(0)`:
//!
//! - `var <pin>: texture_2d<f32>` binds the texture wired to input pin `<pin>`
//!   (or a texture parameter of the same name);
//! - `var <pin>_sampler: sampler` binds that texture's sampler, any other
//!   sampler gets a linear clamp sampler;
//! - one `var<uniform>` struct receives float/vector parameters by member name.

use std::collections::HashMap;

use naga::valid::{Capabilities, ValidationFlags, Validator};

use crate::compositor::{BackendError, Defines, ShaderProgram};

use super::preprocess::preprocess;

pub const FULLSCREEN_PRELUDE: &str = r#"
struct FullscreenOut {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> FullscreenOut {
    let uv = vec2<f32>(f32((index << 1u) & 2u), f32(index & 2u));
    var out: FullscreenOut;
    out.position = vec4<f32>(uv.x * 2.0 - 1.0, 1.0 - uv.y * 2.0, 0.0, 1.0);
    out.uv = uv;
    return out;
}
"#;

pub const FRAGMENT_ENTRY: &str = "fs_main";
pub const SAMPLER_SUFFIX: &str = "_sampler";

// ── reflection ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniformField {
    /// Byte offset inside the uniform block.
    pub offset: u32,
    /// Number of f32 components (1 for scalars, 2..4 for vectors).
    pub components: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformBlock {
    pub binding: u32,
    pub size: u32,
    pub fields: HashMap<String, UniformField>,
}

/// Group-0 resources the fragment entry point actually uses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reflection {
    pub textures: HashMap<String, u32>,
    pub samplers: HashMap<String, u32>,
    pub uniforms: Option<UniformBlock>,
    /// `@location(n)` outputs of `fs_main`.
    pub color_outputs: Vec<u32>,
    pub writes_depth: bool,
}

impl Reflection {
    pub fn is_empty(&self) -> bool {
        self.textures.is_empty() && self.samplers.is_empty() && self.uniforms.is_none()
    }
}

/// Parses, validates and reflects a complete WGSL module.
pub fn reflect_wgsl(source: &str) -> Result<Reflection, String> {
    let module = naga::front::wgsl::parse_str(source).map_err(|e| e.emit_to_string(source))?;
    let info = Validator::new(ValidationFlags::all(), Capabilities::all())
        .validate(&module)
        .map_err(|e| e.emit_to_string(source))?;

    let (entry_index, entry) = module
        .entry_points
        .iter()
        .enumerate()
        .find(|(_, ep)| ep.name == FRAGMENT_ENTRY && ep.stage == naga::ShaderStage::Fragment)
        .ok_or_else(|| format!("no @fragment fn {FRAGMENT_ENTRY}"))?;
    let usage = info.get_entry_point(entry_index);

    let mut reflection = Reflection::default();

    for (handle, var) in module.global_variables.iter() {
        let (Some(binding), Some(name)) = (&var.binding, &var.name) else { continue };
        if usage[handle].is_empty() {
            continue;
        }
        if binding.group != 0 {
            return Err(format!("`{name}` uses @group({}); only group 0 is bound", binding.group));
        }
        match &module.types[var.ty].inner {
            naga::TypeInner::Image { .. } => {
                reflection.textures.insert(name.clone(), binding.binding);
            }
            naga::TypeInner::Sampler { .. } => {
                reflection.samplers.insert(name.clone(), binding.binding);
            }
            naga::TypeInner::Struct { members, span } if var.space == naga::AddressSpace::Uniform => {
                if reflection.uniforms.is_some() {
                    return Err(format!("`{name}`: only one uniform block is supported"));
                }
                let fields = members
                    .iter()
                    .filter_map(|m| {
                        let components = float_components(&module.types[m.ty].inner)?;
                        Some((m.name.clone()?, UniformField { offset: m.offset, components }))
                    })
                    .collect();
                reflection.uniforms = Some(UniformBlock {
                    binding: binding.binding,
                    size: *span,
                    fields,
                });
            }
            _ => log::debug!("reflect: ignoring global `{name}`"),
        }
    }

    if let Some(result) = &entry.function.result {
        collect_outputs(&module, result.binding.as_ref(), result.ty, &mut reflection);
    }
    reflection.color_outputs.sort_unstable();

    Ok(reflection)
}

fn float_components(inner: &naga::TypeInner) -> Option<u32> {
    match inner {
        naga::TypeInner::Scalar(s) if s.kind == naga::ScalarKind::Float && s.width == 4 => Some(1),
        naga::TypeInner::Vector { size, scalar } if scalar.kind == naga::ScalarKind::Float && scalar.width == 4 => {
            Some(*size as u32)
        }
        _ => None,
    }
}

fn collect_outputs(
    module: &naga::Module,
    binding: Option<&naga::Binding>,
    ty: naga::Handle<naga::Type>,
    reflection: &mut Reflection,
) {
    match binding {
        Some(naga::Binding::Location { location, .. }) => reflection.color_outputs.push(*location),
        Some(naga::Binding::BuiltIn(naga::BuiltIn::FragDepth)) => reflection.writes_depth = true,
        Some(_) => {}
        None => {
            if let naga::TypeInner::Struct { members, .. } = &module.types[ty].inner {
                for m in members {
                    collect_outputs(module, m.binding.as_ref(), m.ty, reflection);
                }
            }
        }
    }
}

// ── program ───────────────────────────────────────────────────────────────

/// Attachment formats a pipeline was built for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct TargetKey {
    pub colors: Vec<Option<wgpu::TextureFormat>>,
    pub depth: Option<wgpu::TextureFormat>,
}

pub(crate) struct UniformStorage {
    pub block: UniformBlock,
    pub data: Vec<u8>,
    pub buffer: wgpu::Buffer,
    /// Submission the buffer was last written for.
    pub written_in: Option<u64>,
}

/// A compiled filter program (see module docs for the binding convention).
pub struct WgpuProgram {
    label: String,
    module: wgpu::ShaderModule,
    pub(crate) reflection: Reflection,
    pub(crate) uniforms: Option<UniformStorage>,
    pipelines: HashMap<TargetKey, wgpu::RenderPipeline>,
}

impl std::fmt::Debug for WgpuProgram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgpuProgram")
            .field("label", &self.label)
            .field("reflection", &self.reflection)
            .field("pipelines", &self.pipelines.len())
            .finish()
    }
}

impl WgpuProgram {
    pub(crate) fn compile(
        device: &wgpu::Device,
        label: &str,
        fragment: &str,
        defines: &Defines,
    ) -> Result<Self, BackendError> {
        let body = preprocess(fragment, defines).map_err(|e| BackendError::Program(format!("{label}: {e}")))?;
        let source = format!("{FULLSCREEN_PRELUDE}\n{body}");

        // Validated here so wgpu never sees an invalid module.
        let reflection = reflect_wgsl(&source).map_err(|e| BackendError::Program(format!("{label}: {e}")))?;

        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });

        let uniforms = reflection.uniforms.clone().map(|block| {
            let size = u64::from(block.size.max(16)).next_multiple_of(16);
            let buffer = device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            UniformStorage {
                data: vec![0; size as usize],
                block,
                buffer,
                written_in: None,
            }
        });

        log::debug!(
            "compiled program `{label}`: {} textures, {} uniforms",
            reflection.textures.len(),
            reflection.uniforms.as_ref().map_or(0, |u| u.fields.len())
        );

        Ok(Self {
            label: label.to_string(),
            module,
            reflection,
            uniforms,
            pipelines: HashMap::new(),
        })
    }

    pub fn reflection(&self) -> &Reflection {
        &self.reflection
    }

    /// Writes a float or vector parameter into the CPU copy of the uniform
    /// block. Returns false when the program has no such member.
    pub(crate) fn set_uniform(&mut self, name: &str, values: &[f32]) -> bool {
        let Some(storage) = self.uniforms.as_mut() else { return false };
        let Some(field) = storage.block.fields.get(name).copied() else { return false };
        for (i, v) in values.iter().take(field.components as usize).enumerate() {
            let at = field.offset as usize + i * 4;
            storage.data[at..at + 4].copy_from_slice(bytemuck::bytes_of(v));
        }
        true
    }

    pub(crate) fn pipeline(&mut self, device: &wgpu::Device, key: &TargetKey) -> &wgpu::RenderPipeline {
        if !self.pipelines.contains_key(key) {
            let pipeline = self.build_pipeline(device, key);
            self.pipelines.insert(key.clone(), pipeline);
        }
        &self.pipelines[key]
    }

    fn build_pipeline(&self, device: &wgpu::Device, key: &TargetKey) -> wgpu::RenderPipeline {
        log::debug!("building pipeline for `{}` ({:?})", self.label, key);

        let targets: Vec<Option<wgpu::ColorTargetState>> = key
            .colors
            .iter()
            .enumerate()
            .map(|(location, format)| {
                format.map(|format| {
                    let written = self.reflection.color_outputs.contains(&(location as u32));
                    wgpu::ColorTargetState {
                        format,
                        blend: None,
                        write_mask: if written { wgpu::ColorWrites::ALL } else { wgpu::ColorWrites::empty() },
                    }
                })
            })
            .collect();

        let depth_stencil = key.depth.map(|format| wgpu::DepthStencilState {
            format,
            depth_write_enabled: self.reflection.writes_depth,
            depth_compare: wgpu::CompareFunction::Always,
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        });

        device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(&self.label),
            // Derived from the shader; only used bindings appear.
            layout: None,
            vertex: wgpu::VertexState {
                module: &self.module,
                entry_point: Some("vs_main"),
                compilation_options: Default::default(),
                buffers: &[],
            },
            fragment: Some(wgpu::FragmentState {
                module: &self.module,
                entry_point: Some(FRAGMENT_ENTRY),
                compilation_options: Default::default(),
                targets: &targets,
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil,
            multisample: wgpu::MultisampleState::default(),
            multiview_mask: None,
            cache: None,
        })
    }
}

impl ShaderProgram for WgpuProgram {
    fn has_input(&self, name: &str) -> bool {
        self.reflection.textures.contains_key(name)
            || self
                .reflection
                .uniforms
                .as_ref()
                .is_some_and(|u| u.fields.contains_key(name))
    }

    fn label(&self) -> &str {
        &self.label
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_prelude(fragment: &str) -> String {
        format!("{FULLSCREEN_PRELUDE}\n{fragment}")
    }

    const BLUR: &str = r#"
struct Params {
    radius: f32,
    direction: vec2<f32>,
    tint: vec4<f32>,
};

@group(0) @binding(0) var src: texture_2d<f32>;
@group(0) @binding(1) var src_sampler: sampler;
@group(0) @binding(2) var<uniform> params: Params;
@group(0) @binding(3) var unused: texture_2d<f32>;

@fragment
fn fs_main(in: FullscreenOut) -> @location(0) vec4<f32> {
    let offset = params.direction * params.radius;
    return textureSample(src, src_sampler, in.uv + offset) * params.tint;
}
"#;

    #[test]
    fn reflects_used_bindings_by_name() {
        let r = reflect_wgsl(&with_prelude(BLUR)).unwrap();
        assert_eq!(r.textures.get("src"), Some(&0));
        assert_eq!(r.samplers.get("src_sampler"), Some(&1));
        assert!(!r.textures.contains_key("unused"));
        assert_eq!(r.color_outputs, vec![0]);
        assert!(!r.writes_depth);
    }

    #[test]
    fn reflects_uniform_members_with_offsets() {
        let r = reflect_wgsl(&with_prelude(BLUR)).unwrap();
        let block = r.uniforms.unwrap();
        assert_eq!(block.binding, 2);
        assert_eq!(block.fields["radius"], UniformField { offset: 0, components: 1 });
        assert_eq!(block.fields["direction"], UniformField { offset: 8, components: 2 });
        assert_eq!(block.fields["tint"], UniformField { offset: 16, components: 4 });
        assert_eq!(block.size, 32);
    }

    #[test]
    fn multiple_render_targets_are_listed() {
        let src = r#"
struct Out {
    @location(0) color: vec4<f32>,
    @location(1) glow: vec4<f32>,
};

@fragment
fn fs_main(in: FullscreenOut) -> Out {
    var out: Out;
    out.color = vec4<f32>(in.uv, 0.0, 1.0);
    out.glow = vec4<f32>(0.0);
    return out;
}
"#;
        let r = reflect_wgsl(&with_prelude(src)).unwrap();
        assert_eq!(r.color_outputs, vec![0, 1]);
        assert!(r.is_empty());
    }

    #[test]
    fn missing_entry_point_is_an_error() {
        let err = reflect_wgsl(FULLSCREEN_PRELUDE).unwrap_err();
        assert!(err.contains("fs_main"));
    }

    #[test]
    fn invalid_wgsl_is_an_error() {
        assert!(reflect_wgsl(&with_prelude("@fragment fn fs_main( -> {")).is_err());
    }
}
