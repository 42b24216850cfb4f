//! CPU-side [`Backend`] that simulates textures as numbered handles.
//!
//! Each draw writes a fresh content stamp into its target textures and
//! appends a [`DrawRecord`], so tests can check exactly which texture
//! contents a pass sampled. Clears write stamp `0`.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::coords::Viewport;
use crate::render::{preprocess, reflect_wgsl, FRAGMENT_ENTRY, FULLSCREEN_PRELUDE};

use super::backend::{Backend, BackendError, Binding, BindingValue, Defines, RenderTarget, ShaderProgram};
use super::builder::{TextureLoader, TexturePath};
use super::node::SceneRenderer;
use super::texture::{TextureDesc, TextureParams};

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct HeadlessTexture(pub u64);

/// Program with a declared input set.
///
/// WGSL sources (those defining `fs_main`) are preprocessed and reflected
/// exactly like the wgpu backend does, so a dry run rejects the same shaders.
/// Other sources declare the names following `uniform`
/// (`uniform sampler2D tDiffuse;`); a source with neither accepts any input.
#[derive(Debug, Clone)]
pub struct HeadlessProgram {
    label: String,
    declared: Option<BTreeSet<String>>,
    defines: Defines,
}

impl HeadlessProgram {
    fn parse(label: &str, source: &str, defines: &Defines) -> Result<Self, BackendError> {
        if source.contains(FRAGMENT_ENTRY) {
            return Self::reflect(label, source, defines);
        }
        if let Some(line) = source.lines().find(|l| l.trim_start().starts_with("#error")) {
            return Err(BackendError::Program(format!("{label}: {}", line.trim())));
        }
        let declared: BTreeSet<String> = source
            .lines()
            .filter_map(|line| {
                let rest = line.trim().strip_prefix("uniform ")?;
                let decl = rest.split(';').next()?;
                decl.split_whitespace().last().map(str::to_string)
            })
            .collect();
        Ok(Self {
            label: label.to_string(),
            declared: (!declared.is_empty()).then_some(declared),
            defines: defines.clone(),
        })
    }

    fn reflect(label: &str, source: &str, defines: &Defines) -> Result<Self, BackendError> {
        let program_error = |e: String| BackendError::Program(format!("{label}: {e}"));
        let body = preprocess(source, defines).map_err(program_error)?;
        let reflection = reflect_wgsl(&format!("{FULLSCREEN_PRELUDE}\n{body}")).map_err(program_error)?;

        let mut declared: BTreeSet<String> = reflection.textures.into_keys().collect();
        if let Some(block) = reflection.uniforms {
            declared.extend(block.fields.into_keys());
        }
        Ok(Self {
            label: label.to_string(),
            declared: Some(declared),
            defines: defines.clone(),
        })
    }

    pub fn defines(&self) -> &Defines {
        &self.defines
    }
}

impl ShaderProgram for HeadlessProgram {
    fn has_input(&self, name: &str) -> bool {
        self.declared.as_ref().is_none_or(|d| d.contains(name))
    }

    fn label(&self) -> &str {
        &self.label
    }
}

/// One recorded draw.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawRecord {
    pub label: String,
    /// `(binding name, content stamp)` for every bound texture.
    pub inputs: Vec<(String, u64)>,
    pub floats: Vec<(String, f32)>,
    /// `(pin, texture, stamp written)`.
    pub outputs: Vec<(String, HeadlessTexture, u64)>,
    pub to_screen: bool,
}

impl DrawRecord {
    pub fn input(&self, name: &str) -> Option<u64> {
        self.inputs.iter().find(|(n, _)| n == name).map(|(_, c)| *c)
    }

    pub fn output(&self, pin: &str) -> Option<u64> {
        self.outputs.iter().find(|(p, _, _)| p == pin).map(|(_, _, c)| *c)
    }

    pub fn float(&self, name: &str) -> Option<f32> {
        self.floats.iter().find(|(n, _)| n == name).map(|(_, v)| *v)
    }
}

#[derive(Debug, Clone, Copy)]
struct TextureState {
    desc: TextureDesc,
    content: u64,
}

#[derive(Debug)]
pub struct HeadlessBackend {
    viewport: Viewport,
    next_id: u64,
    next_stamp: u64,
    textures: HashMap<HeadlessTexture, TextureState>,
    fallback: HeadlessTexture,
    draws: Vec<DrawRecord>,
    fail_allocations: usize,
    failing_draws: HashSet<String>,
    created: u64,
}

impl HeadlessBackend {
    pub fn new(viewport: Viewport) -> Self {
        let fallback = HeadlessTexture(0);
        let mut textures = HashMap::new();
        textures.insert(
            fallback,
            TextureState {
                desc: TextureDesc::new(1, 1),
                content: 0,
            },
        );
        Self {
            viewport,
            next_id: 1,
            next_stamp: 1,
            textures,
            fallback,
            draws: Vec::new(),
            fail_allocations: 0,
            failing_draws: HashSet::new(),
            created: 0,
        }
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    /// The next `n` texture allocations fail with `OutOfMemory`.
    pub fn fail_next_allocations(&mut self, n: usize) {
        self.fail_allocations = n;
    }

    /// Draws with this program label fail until cleared.
    pub fn fail_draws_of(&mut self, label: impl Into<String>) {
        self.failing_draws.insert(label.into());
    }

    pub fn clear_failures(&mut self) {
        self.fail_allocations = 0;
        self.failing_draws.clear();
    }

    pub fn draws(&self) -> &[DrawRecord] {
        &self.draws
    }

    pub fn take_draws(&mut self) -> Vec<DrawRecord> {
        std::mem::take(&mut self.draws)
    }

    /// Most recent draw by `label`.
    pub fn last_draw(&self, label: &str) -> Option<&DrawRecord> {
        self.draws.iter().rev().find(|d| d.label == label)
    }

    pub fn content(&self, texture: HeadlessTexture) -> Option<u64> {
        self.textures.get(&texture).map(|s| s.content)
    }

    pub fn desc(&self, texture: HeadlessTexture) -> Option<TextureDesc> {
        self.textures.get(&texture).map(|s| s.desc)
    }

    pub fn is_alive(&self, texture: HeadlessTexture) -> bool {
        self.textures.contains_key(&texture)
    }

    /// Textures created and not yet destroyed, excluding the fallback.
    pub fn live_textures(&self) -> usize {
        self.textures.len() - 1
    }

    pub fn textures_created(&self) -> u64 {
        self.created
    }

    /// Creates a texture outside any pool, standing in for a loaded asset.
    pub fn upload(&mut self, desc: TextureDesc) -> HeadlessTexture {
        let texture = self.alloc(desc);
        self.stamp(texture);
        texture
    }

    /// Records a draw into `target`, stamping every attachment with new content.
    pub fn record_draw(
        &mut self,
        label: &str,
        bindings: &[Binding<'_, HeadlessTexture>],
        target: &RenderTarget<'_, HeadlessTexture>,
    ) -> Result<(), BackendError> {
        if self.failing_draws.contains(label) {
            return Err(BackendError::Draw(format!("{label}: injected failure")));
        }
        let mut inputs = Vec::new();
        let mut floats = Vec::new();
        for b in bindings {
            match b.value {
                BindingValue::Texture(t) => {
                    let content = self
                        .content(*t)
                        .ok_or_else(|| BackendError::Draw(format!("{label}: sampled destroyed texture {t:?}")))?;
                    inputs.push((b.name.to_string(), content));
                }
                BindingValue::Float(v) => floats.push((b.name.to_string(), v)),
                BindingValue::Vector(_) => {}
            }
        }
        let mut outputs = Vec::new();
        for a in target.attachments() {
            if !self.is_alive(a.texture) {
                return Err(BackendError::Draw(format!("{label}: target {:?} destroyed", a.texture)));
            }
            let stamp = self.stamp(a.texture);
            outputs.push((a.pin.clone(), a.texture, stamp));
        }
        self.draws.push(DrawRecord {
            label: label.to_string(),
            inputs,
            floats,
            outputs,
            to_screen: target.is_screen(),
        });
        Ok(())
    }

    fn alloc(&mut self, desc: TextureDesc) -> HeadlessTexture {
        let texture = HeadlessTexture(self.next_id);
        self.next_id += 1;
        self.created += 1;
        self.textures.insert(texture, TextureState { desc, content: 0 });
        texture
    }

    fn stamp(&mut self, texture: HeadlessTexture) -> u64 {
        let stamp = self.next_stamp;
        self.next_stamp += 1;
        if let Some(state) = self.textures.get_mut(&texture) {
            state.content = stamp;
        }
        stamp
    }
}

impl Backend for HeadlessBackend {
    type Texture = HeadlessTexture;
    type Program = HeadlessProgram;

    fn viewport(&self) -> Viewport {
        self.viewport
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<HeadlessTexture, BackendError> {
        if self.fail_allocations > 0 {
            self.fail_allocations -= 1;
            return Err(BackendError::out_of_memory(desc));
        }
        Ok(self.alloc(*desc))
    }

    fn destroy_texture(&mut self, texture: HeadlessTexture) {
        if texture != self.fallback {
            self.textures.remove(&texture);
        }
    }

    fn fallback_texture(&self) -> HeadlessTexture {
        self.fallback
    }

    fn clear_texture(&mut self, texture: &HeadlessTexture) -> Result<(), BackendError> {
        match self.textures.get_mut(texture) {
            Some(state) => {
                state.content = 0;
                Ok(())
            }
            None => Err(BackendError::Draw(format!("clear of destroyed texture {texture:?}"))),
        }
    }

    fn create_program(&mut self, label: &str, fragment: &str, defines: &Defines) -> Result<HeadlessProgram, BackendError> {
        HeadlessProgram::parse(label, fragment, defines)
    }

    fn draw_fullscreen(
        &mut self,
        program: &mut HeadlessProgram,
        bindings: &[Binding<'_, HeadlessTexture>],
        target: &RenderTarget<'_, HeadlessTexture>,
    ) -> Result<(), BackendError> {
        let label = program.label.clone();
        self.record_draw(&label, bindings, target)
    }

    fn clear_target(&mut self, target: &RenderTarget<'_, HeadlessTexture>) -> Result<(), BackendError> {
        for a in target.attachments() {
            self.clear_texture(&a.texture)?;
        }
        Ok(())
    }
}

/// Scene stand-in that records a draw with no inputs.
#[derive(Debug, Clone)]
pub struct HeadlessScene {
    label: String,
}

impl HeadlessScene {
    pub fn new(label: impl Into<String>) -> Self {
        Self { label: label.into() }
    }
}

impl SceneRenderer<HeadlessBackend> for HeadlessScene {
    fn render(
        &mut self,
        backend: &mut HeadlessBackend,
        target: &RenderTarget<'_, HeadlessTexture>,
        _viewport: &Viewport,
    ) -> Result<(), BackendError> {
        backend.record_draw(&self.label, &[], target)
    }
}

/// Texture loader for dry runs: every asset becomes an uploaded handle.
///
/// With `require_files`, assets whose files are missing fail to load.
#[derive(Debug, Clone, Default)]
pub struct HeadlessLoader {
    pub require_files: bool,
}

impl TextureLoader<HeadlessBackend> for HeadlessLoader {
    fn load(
        &mut self,
        backend: &mut HeadlessBackend,
        path: &TexturePath,
        params: &TextureParams,
    ) -> Result<HeadlessTexture, BackendError> {
        if self.require_files {
            if let Some(missing) = path.files().into_iter().find(|p| !p.is_file()) {
                return Err(BackendError::Load {
                    path: missing.display().to_string(),
                    message: "file not found".into(),
                });
            }
        }
        let desc = params
            .resolve(&Viewport::new(1.0, 1.0, 1.0))
            .unwrap_or_else(|_| TextureDesc::new(1, 1));
        Ok(backend.upload(desc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compositor::backend::{Attachment, AttachmentPoint};

    #[test]
    fn program_declares_uniform_names() {
        let src = "uniform sampler2D tDiffuse;\nuniform float amount;\nvoid main() {}";
        let p = HeadlessProgram::parse("p", src, &Defines::new()).unwrap();
        assert!(p.has_input("tDiffuse"));
        assert!(p.has_input("amount"));
        assert!(!p.has_input("tDepth"));

        let open = HeadlessProgram::parse("p", "void main() {}", &Defines::new()).unwrap();
        assert!(open.has_input("anything"));
    }

    #[test]
    fn wgsl_sources_are_reflected() {
        let src = r#"
struct Params { amount: f32 };
@group(0) @binding(0) var tDiffuse: texture_2d<f32>;
@group(0) @binding(1) var tDiffuse_sampler: sampler;
@group(0) @binding(2) var<uniform> params: Params;

@fragment
fn fs_main(in: FullscreenOut) -> @location(0) vec4<f32> {
    return textureSample(tDiffuse, tDiffuse_sampler, in.uv) * params.amount;
}
"#;
        let p = HeadlessProgram::parse("p", src, &Defines::new()).unwrap();
        assert!(p.has_input("tDiffuse"));
        assert!(p.has_input("amount"));
        assert!(!p.has_input("tDepth"));

        let broken = "@fragment fn fs_main() -> @location(0) vec4<f32> { return nope; }";
        assert!(HeadlessProgram::parse("p", broken, &Defines::new()).is_err());
    }

    #[test]
    fn error_directive_fails_compile() {
        let mut b = HeadlessBackend::new(Viewport::new(1.0, 1.0, 1.0));
        assert!(b.create_program("bad", "#error nope", &Defines::new()).is_err());
    }

    #[test]
    fn draw_stamps_targets() {
        let mut b = HeadlessBackend::new(Viewport::new(4.0, 4.0, 1.0));
        let src = b.upload(TextureDesc::new(4, 4));
        let dst = b.create_texture(&TextureDesc::new(4, 4)).unwrap();
        let src_stamp = b.content(src).unwrap();

        let attachments = [Attachment { point: AttachmentPoint::Color(0), pin: "out".into(), texture: dst }];
        let mut program = b.create_program("copy", "", &Defines::new()).unwrap();
        b.draw_fullscreen(&mut program, &[Binding::texture("src", &src)], &RenderTarget::Attachments(&attachments))
            .unwrap();

        let rec = b.last_draw("copy").unwrap();
        assert_eq!(rec.input("src"), Some(src_stamp));
        assert_eq!(rec.output("out"), b.content(dst));
        assert!(!rec.to_screen);
    }

    #[test]
    fn injected_allocation_failure() {
        let mut b = HeadlessBackend::new(Viewport::new(4.0, 4.0, 1.0));
        b.fail_next_allocations(1);
        assert!(b.create_texture(&TextureDesc::new(1, 1)).is_err());
        assert!(b.create_texture(&TextureDesc::new(1, 1)).is_ok());
        assert_eq!(b.live_textures(), 1);
    }
}
