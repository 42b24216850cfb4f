//! Builds a [`Compositor`] from a [`GraphDesc`].
//!
//! Structural problems (unknown shaders, malformed expressions, unresolved
//! links, cycles) fail the whole build. Texture assets are loaded first;
//! a failed load is reported in [`Built::texture_loads`] and leaves the
//! texture nodes that use it without output.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use lumen_expr::{ExprError, ParamValue};

use super::backend::{AttachmentPoint, Backend, BackendError};
use super::desc::{
    AttachmentDesc, GraphDesc, InputRefDesc, NodeDesc, NodeType, NumberDesc, OutputDescJson, OutputEntryDesc,
    ParamsDesc, ParamsRefDesc, TexturePathDesc, ValueDesc,
};
use super::error::CompositorError;
use super::graph::{Compositor, CompositorConfig};
use super::node::{
    FilterPass, GroupNode, Node, NodeKind, OutputDesc, PinRef, ScenePass, SceneRenderer, TextureSource, Uniform,
    TEXTURE_PIN,
};
use super::texture::{parse_filter, TextureFormat, TextureParams, WrapMode};

#[derive(thiserror::Error, Debug)]
pub enum BuildError {
    #[error("failed to read graph file {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed graph description: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{node}: {message}")]
    Invalid { node: String, message: String },
    #[error("{context}: invalid expression")]
    Expr {
        context: String,
        #[source]
        source: ExprError,
    },
    #[error("{node}: unknown shader {name:?}")]
    UnknownShader { node: String, name: String },
    #[error(transparent)]
    Graph(#[from] CompositorError),
    #[error("{node}: shader program failed to compile")]
    Program {
        node: String,
        #[source]
        source: BackendError,
    },
}

fn invalid(node: &str, message: impl Into<String>) -> BuildError {
    BuildError::Invalid {
        node: node.to_string(),
        message: message.into(),
    }
}

/// Reads and parses a JSON graph description.
pub fn load_graph_file(path: impl AsRef<Path>) -> Result<GraphDesc, BuildError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|source| BuildError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(GraphDesc::from_json(&text)?)
}

// ── collaborators ─────────────────────────────────────────────────────────

/// Files behind a texture asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TexturePath {
    Single(PathBuf),
    /// +x, -x, +y, -y, +z, -z.
    Cube([PathBuf; 6]),
}

impl TexturePath {
    pub fn files(&self) -> Vec<&Path> {
        match self {
            TexturePath::Single(p) => vec![p.as_path()],
            TexturePath::Cube(faces) => faces.iter().map(PathBuf::as_path).collect(),
        }
    }

    pub fn describe(&self) -> String {
        self.files()
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Creates backend textures from image files.
pub trait TextureLoader<B: Backend> {
    fn load(&mut self, backend: &mut B, path: &TexturePath, params: &TextureParams) -> Result<B::Texture, BackendError>;
}

/// Named shader sources for `#source(name)` and `#name` references.
#[derive(Debug, Clone, Default)]
pub struct ShaderLibrary {
    sources: HashMap<String, String>,
}

impl ShaderLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, source: impl Into<String>) {
        self.sources.insert(name.into(), source.into());
    }

    pub fn with(mut self, name: impl Into<String>, source: impl Into<String>) -> Self {
        self.insert(name, source);
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.sources.get(name).map(String::as_str)
    }

    /// Resolves a node's `shader` field.
    ///
    /// `#source(name)` reads this library, `#name` reads the graph's own
    /// `shaders` block and then this library, anything else is inline source.
    /// Returns the missing name on failure.
    pub fn resolve(&self, shader: &str, graph: &BTreeMap<String, String>) -> Result<String, String> {
        let shader = shader.trim();
        if let Some(name) = shader.strip_prefix("#source(").and_then(|s| s.strip_suffix(')')) {
            let name = name.trim();
            return self.get(name).map(str::to_string).ok_or_else(|| name.to_string());
        }
        if let Some(name) = shader.strip_prefix('#') {
            return graph
                .get(name)
                .map(String::as_str)
                .or_else(|| self.get(name))
                .map(str::to_string)
                .ok_or_else(|| name.to_string());
        }
        Ok(shader.to_string())
    }
}

type SceneFactory<'a, B> = Box<dyn FnMut(&str) -> Box<dyn SceneRenderer<B>> + 'a>;

/// Everything graph construction needs from the host.
pub struct BuildContext<'a, B: Backend> {
    pub backend: &'a mut B,
    pub shaders: ShaderLibrary,
    pub loader: Option<&'a mut dyn TextureLoader<B>>,
    /// Relative texture paths are resolved against this directory.
    pub texture_root: Option<PathBuf>,
    /// Creates the scene collaborator for each `scene` node, by node name.
    pub scene_factory: Option<SceneFactory<'a, B>>,
    pub config: CompositorConfig,
}

impl<'a, B: Backend> BuildContext<'a, B> {
    pub fn new(backend: &'a mut B) -> Self {
        Self {
            backend,
            shaders: ShaderLibrary::default(),
            loader: None,
            texture_root: None,
            scene_factory: None,
            config: CompositorConfig::default(),
        }
    }

    pub fn with_shaders(mut self, shaders: ShaderLibrary) -> Self {
        self.shaders = shaders;
        self
    }

    pub fn with_loader(mut self, loader: &'a mut dyn TextureLoader<B>) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn with_texture_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.texture_root = Some(root.into());
        self
    }

    pub fn with_scene_factory(mut self, factory: impl FnMut(&str) -> Box<dyn SceneRenderer<B>> + 'a) -> Self {
        self.scene_factory = Some(Box::new(factory));
        self
    }

    pub fn with_config(mut self, config: CompositorConfig) -> Self {
        self.config = config;
        self
    }
}

/// Outcome of loading one texture asset.
#[derive(Debug)]
pub struct TextureLoad {
    pub name: String,
    pub path: String,
    pub result: Result<(), BackendError>,
}

pub struct Built<B: Backend> {
    pub compositor: Compositor<B>,
    pub texture_loads: Vec<TextureLoad>,
    /// Successfully loaded assets by name.
    pub textures: HashMap<String, B::Texture>,
}

impl<B: Backend> Built<B> {
    pub fn failed_loads(&self) -> impl Iterator<Item = &TextureLoad> {
        self.texture_loads.iter().filter(|l| l.result.is_err())
    }
}

// ── build ─────────────────────────────────────────────────────────────────

struct Library<'d, T> {
    desc: &'d GraphDesc,
    presets: HashMap<String, TextureParams>,
    textures: HashMap<String, T>,
}

/// Builds and validates a compositor. No partially built graph is returned
/// on error.
pub fn build_compositor<B: Backend>(desc: &GraphDesc, ctx: &mut BuildContext<'_, B>) -> Result<Built<B>, BuildError> {
    let mut presets = HashMap::new();
    for (name, params) in &desc.parameters {
        presets.insert(name.clone(), params_from_desc(params, &format!("parameters.{name}"))?);
    }

    let (textures, texture_loads) = load_textures(desc, ctx)?;
    let lib = Library { desc, presets, textures };

    let (compositor, steps) = match assemble(&lib, ctx) {
        Ok(assembled) => assembled,
        Err(err) => {
            for texture in lib.textures.into_values() {
                ctx.backend.destroy_texture(texture);
            }
            return Err(err);
        }
    };

    info!(
        "compositor built: {} nodes, {} steps, {}/{} textures loaded",
        desc.nodes.len(),
        steps,
        lib.textures.len(),
        texture_loads.len()
    );
    Ok(Built {
        compositor,
        texture_loads,
        textures: lib.textures,
    })
}

fn assemble<B: Backend>(
    lib: &Library<'_, B::Texture>,
    ctx: &mut BuildContext<'_, B>,
) -> Result<(Compositor<B>, usize), BuildError> {
    let mut compositor = Compositor::new(ctx.config.clone());
    for node_desc in &lib.desc.nodes {
        let node = build_node(node_desc, lib, ctx)?;
        compositor.add_node(node)?;
    }
    let steps = compositor.prepare()?.steps().len();
    Ok((compositor, steps))
}

fn load_textures<B: Backend>(
    desc: &GraphDesc,
    ctx: &mut BuildContext<'_, B>,
) -> Result<(HashMap<String, B::Texture>, Vec<TextureLoad>), BuildError> {
    let mut textures = HashMap::new();
    let mut loads = Vec::new();

    // Descriptions are checked before anything is uploaded.
    let mut pending = Vec::with_capacity(desc.textures.len());
    for (name, asset) in &desc.textures {
        let context = format!("textures.{name}");
        let params = match &asset.parameters {
            Some(p) => params_from_desc(p, &context)?,
            None => TextureParams::default(),
        };
        let path = texture_path(&asset.path, ctx.texture_root.as_deref()).map_err(|m| invalid(&context, m))?;
        pending.push((name, params, path));
    }

    for (name, params, path) in pending {
        let result = match ctx.loader.as_deref_mut() {
            Some(loader) => loader.load(ctx.backend, &path, &params),
            None => Err(BackendError::Unsupported("no texture loader configured".into())),
        };
        let result = match result {
            Ok(texture) => {
                debug!("texture {name:?} loaded from {}", path.describe());
                textures.insert(name.clone(), texture);
                Ok(())
            }
            Err(err) => {
                warn!("texture {name:?} failed to load: {err}");
                Err(err)
            }
        };
        loads.push(TextureLoad {
            name: name.clone(),
            path: path.describe(),
            result,
        });
    }
    Ok((textures, loads))
}

fn texture_path(desc: &TexturePathDesc, root: Option<&Path>) -> Result<TexturePath, String> {
    let resolve = |p: &str| match root {
        Some(root) => root.join(p),
        None => PathBuf::from(p),
    };
    match desc {
        TexturePathDesc::Single(p) => Ok(TexturePath::Single(resolve(p))),
        TexturePathDesc::Faces(faces) => {
            let faces: Vec<PathBuf> = faces.iter().map(|p| resolve(p.as_str())).collect();
            let count = faces.len();
            faces
                .try_into()
                .map(TexturePath::Cube)
                .map_err(|_| format!("a cube map needs 6 faces, got {count}"))
        }
        TexturePathDesc::Cube(c) => Ok(TexturePath::Cube(c.ordered().map(resolve))),
    }
}

fn build_node<B: Backend>(
    nd: &NodeDesc,
    lib: &Library<'_, B::Texture>,
    ctx: &mut BuildContext<'_, B>,
) -> Result<Node<B>, BuildError> {
    let name = nd.name.as_str();
    if name.is_empty() {
        return Err(invalid("<unnamed>", "node without a name"));
    }

    let mut node = match nd.kind {
        NodeType::Filter => {
            let shader = nd
                .shader
                .as_deref()
                .ok_or_else(|| invalid(name, "filter node without a shader"))?;
            let source = ctx
                .shaders
                .resolve(shader, &lib.desc.shaders)
                .map_err(|missing| BuildError::UnknownShader {
                    node: name.to_string(),
                    name: missing,
                })?;
            let mut filter = FilterPass::new(source);
            for (key, value) in &nd.defines {
                filter.define(key.clone(), define_value(value));
            }
            for (key, value) in &nd.parameters {
                if let Some(uniform) = uniform_from(value, lib, name, key)? {
                    filter.set_parameter(key.clone(), uniform);
                }
            }
            filter
                .compile(ctx.backend, name)
                .map_err(|source| BuildError::Program {
                    node: name.to_string(),
                    source,
                })?;
            Node::new(name, NodeKind::Filter(filter))
        }
        NodeType::Scene => {
            let factory = ctx
                .scene_factory
                .as_mut()
                .ok_or_else(|| invalid(name, "scene node but no scene renderer was provided"))?;
            Node::new(name, NodeKind::Scene(ScenePass::new(factory(name))))
        }
        NodeType::Texture => {
            let reference = nd.texture.as_deref().or_else(|| {
                nd.parameters.iter().find_map(|(k, v)| match v {
                    ValueDesc::Text(t) if k == "texture" => Some(t.as_str()),
                    _ => None,
                })
            });
            let asset = reference.map_or(name, |r| r.trim().trim_start_matches('#'));
            let texture = lib.textures.get(asset).cloned();
            if texture.is_none() && !lib.desc.textures.contains_key(asset) {
                warn!("{name}: no texture asset named {asset:?}");
            }
            Node::new(name, NodeKind::Texture(TextureSource::new(texture)))
        }
        NodeType::Group => return build_group(nd, lib, ctx),
    };

    for (pin, entry) in &nd.outputs {
        let out = match entry {
            OutputEntryDesc::Output(out) => out,
            OutputEntryDesc::Link(link) => {
                return Err(invalid(name, format!("output {pin:?} links to {link:?} but the node is not a group")));
            }
        };
        node = node.with_output(pin.as_str(), output_from(out, lib, name)?);
    }
    if nd.kind == NodeType::Texture && node.outputs().is_empty() {
        node = node.with_output(TEXTURE_PIN, OutputDesc::default());
    }

    for (pin, source) in &nd.inputs {
        node.set_input(pin.as_str(), pin_ref(source));
    }
    Ok(node)
}

fn build_group<B: Backend>(
    nd: &NodeDesc,
    lib: &Library<'_, B::Texture>,
    ctx: &mut BuildContext<'_, B>,
) -> Result<Node<B>, BuildError> {
    let name = nd.name.as_str();
    let mut group = GroupNode::new();
    for child in &nd.nodes {
        if group.node(&child.name).is_some() {
            return Err(CompositorError::DuplicateNode(format!("{name}/{}", child.name)).into());
        }
        let built = build_node(child, lib, ctx)?;
        group.add_node(built, &[], &[]);
    }

    for (group_input, target) in &nd.inputs {
        let (child, pin) = child_pin(target).ok_or_else(|| {
            invalid(name, format!("group input {group_input:?} must name a child pin as \"child.pin\""))
        })?;
        if group.node(&child).is_none() {
            return Err(invalid(name, format!("group input {group_input:?} links to unknown child {child:?}")));
        }
        group.link_input(group_input.as_str(), child, pin);
    }
    for (group_output, entry) in &nd.outputs {
        let target = match entry {
            OutputEntryDesc::Link(link) => InputRefDesc::Text(link.clone()),
            OutputEntryDesc::Output(_) => {
                return Err(invalid(name, format!("group output {group_output:?} must be a \"child.pin\" link")));
            }
        };
        let (child, pin) = child_pin(&target)
            .ok_or_else(|| invalid(name, format!("group output {group_output:?} must name a child pin")))?;
        match group.node(&child) {
            Some(node) if node.as_group().is_some() || node.output(&pin).is_some() => {}
            Some(_) => {
                return Err(invalid(name, format!("group output {group_output:?}: child {child:?} has no output {pin:?}")));
            }
            None => {
                return Err(invalid(name, format!("group output {group_output:?} links to unknown child {child:?}")));
            }
        }
        group.link_output(group_output.as_str(), child, pin);
    }

    let mut node = Node::group(name, group);
    for (group_input, source) in &nd.bind {
        if !nd.inputs.iter().any(|(pin, _)| pin == group_input) {
            return Err(invalid(name, format!("bind {group_input:?} does not name a group input")));
        }
        node.set_input(group_input.as_str(), pin_ref(source));
    }
    Ok(node)
}

fn pin_ref(desc: &InputRefDesc) -> PinRef {
    match desc {
        InputRefDesc::Text(text) => PinRef::from(text.as_str()),
        InputRefDesc::Pin { node, pin: Some(pin) } => PinRef::pin(node.as_str(), pin.as_str()),
        InputRefDesc::Pin { node, pin: None } => PinRef::node(node.as_str()),
    }
}

fn child_pin(desc: &InputRefDesc) -> Option<(String, String)> {
    match desc {
        InputRefDesc::Text(text) => text
            .trim()
            .rsplit_once('.')
            .map(|(n, p)| (n.to_string(), p.to_string())),
        InputRefDesc::Pin { node, pin: Some(pin) } => Some((node.clone(), pin.clone())),
        InputRefDesc::Pin { pin: None, .. } => None,
    }
}

fn output_from<T>(out: &OutputDescJson, lib: &Library<'_, T>, node: &str) -> Result<OutputDesc, BuildError> {
    let params = match &out.parameters {
        None => TextureParams::default(),
        Some(ParamsRefDesc::Preset(reference)) => {
            let key = reference.trim().trim_start_matches('#');
            lib.presets
                .get(key)
                .cloned()
                .ok_or_else(|| invalid(node, format!("unknown parameters preset {reference:?}")))?
        }
        Some(ParamsRefDesc::Inline(p)) => params_from_desc(p, node)?,
    };
    let attachment = match &out.attachment {
        None => AttachmentPoint::default(),
        Some(AttachmentDesc::Name(n)) => {
            AttachmentPoint::parse(n).ok_or_else(|| invalid(node, format!("unknown attachment {n:?}")))?
        }
        Some(AttachmentDesc::GlEnum(v)) => {
            AttachmentPoint::from_gl_enum(*v).ok_or_else(|| invalid(node, format!("unknown attachment {v}")))?
        }
    };
    Ok(OutputDesc {
        params,
        attachment,
        keep_last_frame: out.keep_last_frame,
        output_last_frame: out.output_last_frame,
        terminal: out.terminal,
    })
}

fn params_from_desc(p: &ParamsDesc, context: &str) -> Result<TextureParams, BuildError> {
    let number = |v: &Option<NumberDesc>| -> Result<Option<ParamValue>, BuildError> {
        match v {
            None => Ok(None),
            Some(NumberDesc::Number(n)) => Ok(Some(ParamValue::literal(*n))),
            Some(NumberDesc::Text(t)) => ParamValue::parse(t).map(Some).map_err(|source| BuildError::Expr {
                context: context.to_string(),
                source,
            }),
        }
    };
    let filter = |v: &Option<String>| match v {
        None => Ok(None),
        Some(name) => parse_filter(name)
            .map(Some)
            .ok_or_else(|| invalid(context, format!("unknown filter {name:?}"))),
    };
    let wrap = |v: &Option<String>| match v {
        None => Ok(None),
        Some(name) => WrapMode::from_name(name)
            .map(Some)
            .ok_or_else(|| invalid(context, format!("unknown wrap mode {name:?}"))),
    };

    let format = match &p.r#type {
        None => None,
        Some(name) => {
            Some(TextureFormat::from_name(name).ok_or_else(|| invalid(context, format!("unknown format {name:?}")))?)
        }
    };
    let min = filter(&p.min_filter)?;
    let mag = filter(&p.mag_filter)?;
    let mip_from_filter = min.is_some_and(|(_, mip)| mip);

    Ok(TextureParams {
        width: number(&p.width)?,
        height: number(&p.height)?,
        scale: p.scale,
        format,
        min_filter: min.map(|(f, _)| f),
        mag_filter: mag.map(|(f, _)| f),
        wrap_s: wrap(&p.wrap_s)?,
        wrap_t: wrap(&p.wrap_t)?,
        mipmaps: p.use_mipmap.or(mip_from_filter.then_some(true)),
        anisotropy: p.anisotropic,
    })
}

fn uniform_from<T: Clone>(
    value: &ValueDesc,
    lib: &Library<'_, T>,
    node: &str,
    key: &str,
) -> Result<Option<Uniform<T>>, BuildError> {
    Ok(Some(match value {
        ValueDesc::Bool(b) => Uniform::Float(if *b { 1.0 } else { 0.0 }),
        ValueDesc::Number(n) => Uniform::Float(*n as f32),
        ValueDesc::Vector(v) => Uniform::Vector(v.iter().map(|x| *x as f32).collect()),
        ValueDesc::Text(text) => {
            let text = text.trim();
            if let Some(asset) = text.strip_prefix('#') {
                match lib.textures.get(asset) {
                    Some(texture) => Uniform::Texture(texture.clone()),
                    None => {
                        warn!("{node}: parameter {key:?} refers to unavailable texture {asset:?}");
                        return Ok(None);
                    }
                }
            } else {
                match ParamValue::parse(text).map_err(|source| BuildError::Expr {
                    context: format!("{node}.parameters.{key}"),
                    source,
                })? {
                    ParamValue::Literal(v) => Uniform::Float(v as f32),
                    ParamValue::Expr(e) => Uniform::Expr(e),
                }
            }
        }
    }))
}

fn define_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Bool(b) => u8::from(*b).to_string(),
        other => other.to_string(),
    }
}
