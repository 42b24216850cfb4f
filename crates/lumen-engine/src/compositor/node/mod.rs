//! Pass nodes: the units the compositor schedules.
//!
//! A [`Node`] has a unique name, ordered input pins (each naming a producer
//! with a [`PinRef`]) and ordered output pins (each with an [`OutputDesc`]).
//! What the node does when executed is decided by its [`NodeKind`].

mod filter;
mod group;
mod scene;
mod source;

use std::fmt;

use crate::coords::Viewport;

use super::backend::{AttachmentPoint, Backend, BackendError, RenderTarget, ShaderProgram};
use super::error::CompositorError;
use super::texture::{TextureDesc, TextureParams};

pub use filter::{FilterPass, Uniform};
pub use group::{GroupInputLink, GroupNode, GroupOutputLink};
pub use scene::{ScenePass, SceneRenderer};
pub use source::TextureSource;

/// Output pin name exposed by texture-source nodes when none is declared.
pub const TEXTURE_PIN: &str = "texture";

// ── PinRef ────────────────────────────────────────────────────────────────

/// Reference to a producer output: `node` or `node.pin`.
///
/// A reference parsed from text keeps the whole text as the node name; the
/// scheduler tries it verbatim first and only then splits at the last `.`,
/// so node names containing dots still resolve.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct PinRef {
    pub node: String,
    pub pin: Option<String>,
}

impl PinRef {
    pub fn node(node: impl Into<String>) -> Self {
        Self { node: node.into(), pin: None }
    }

    pub fn pin(node: impl Into<String>, pin: impl Into<String>) -> Self {
        Self { node: node.into(), pin: Some(pin.into()) }
    }

    /// Candidate `(node, pin)` interpretations in lookup order.
    pub(crate) fn candidates(&self) -> Vec<(&str, Option<&str>)> {
        let mut out = vec![(self.node.as_str(), self.pin.as_deref())];
        if self.pin.is_none() {
            if let Some((node, pin)) = self.node.rsplit_once('.') {
                out.push((node, Some(pin)));
            }
        }
        out
    }
}

impl From<&str> for PinRef {
    fn from(text: &str) -> Self {
        PinRef::node(text.trim())
    }
}

impl From<(&str, &str)> for PinRef {
    fn from((node, pin): (&str, &str)) -> Self {
        PinRef::pin(node, pin)
    }
}

impl fmt::Display for PinRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.pin {
            Some(pin) => write!(f, "{}.{}", self.node, pin),
            None => f.write_str(&self.node),
        }
    }
}

// ── pins ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct InputPin {
    pub name: String,
    pub source: PinRef,
}

/// Per-output declaration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutputDesc {
    pub params: TextureParams,
    pub attachment: AttachmentPoint,
    /// Double-buffer this output: this frame's texture is readable next frame.
    pub keep_last_frame: bool,
    /// Readers of this pin always see the previous frame's texture.
    pub output_last_frame: bool,
    /// Produced and kept for presentation even without consumers.
    pub terminal: bool,
}

impl OutputDesc {
    pub fn new(params: TextureParams) -> Self {
        Self { params, ..Self::default() }
    }

    pub fn with_attachment(mut self, point: AttachmentPoint) -> Self {
        self.attachment = point;
        self
    }

    pub fn keep_last_frame(mut self) -> Self {
        self.keep_last_frame = true;
        self
    }

    pub fn output_last_frame(mut self) -> Self {
        self.output_last_frame = true;
        self
    }

    pub fn terminal(mut self) -> Self {
        self.terminal = true;
        self
    }

    /// Whether the node holds on to last frame's texture for this pin.
    pub fn retains_history(&self) -> bool {
        self.keep_last_frame || self.output_last_frame
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputPin {
    pub name: String,
    pub desc: OutputDesc,
}

/// Textures a node keeps across frames for one output.
#[derive(Debug)]
pub(crate) struct OutputHistory<T> {
    pub previous: Option<T>,
    pub presented: Option<T>,
}

impl<T> Default for OutputHistory<T> {
    fn default() -> Self {
        Self { previous: None, presented: None }
    }
}

// ── Node ──────────────────────────────────────────────────────────────────

pub enum NodeKind<B: Backend> {
    Scene(ScenePass<B>),
    Filter(FilterPass<B>),
    Texture(TextureSource<B>),
    Group(GroupNode<B>),
}

impl<B: Backend> NodeKind<B> {
    pub fn type_name(&self) -> &'static str {
        match self {
            NodeKind::Scene(_) => "scene",
            NodeKind::Filter(_) => "filter",
            NodeKind::Texture(_) => "texture",
            NodeKind::Group(_) => "group",
        }
    }
}

pub struct Node<B: Backend> {
    name: String,
    kind: NodeKind<B>,
    inputs: Vec<InputPin>,
    outputs: Vec<OutputPin>,
    history: Vec<OutputHistory<B::Texture>>,
}

impl<B: Backend> fmt::Debug for Node<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("kind", &self.kind.type_name())
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .finish()
    }
}

impl<B: Backend> Node<B> {
    pub fn new(name: impl Into<String>, kind: NodeKind<B>) -> Self {
        Self {
            name: name.into(),
            kind,
            inputs: Vec::new(),
            outputs: Vec::new(),
            history: Vec::new(),
        }
    }

    pub fn scene(name: impl Into<String>, renderer: impl SceneRenderer<B> + 'static) -> Self {
        Self::new(name, NodeKind::Scene(ScenePass::new(Box::new(renderer))))
    }

    pub fn filter(name: impl Into<String>, fragment: impl Into<String>) -> Self {
        Self::new(name, NodeKind::Filter(FilterPass::new(fragment)))
    }

    /// A texture source exposing `texture` on the pin [`TEXTURE_PIN`].
    pub fn texture(name: impl Into<String>, texture: Option<B::Texture>) -> Self {
        Self::new(name, NodeKind::Texture(TextureSource::new(texture)))
            .with_output(TEXTURE_PIN, OutputDesc::default())
    }

    pub fn group(name: impl Into<String>, group: GroupNode<B>) -> Self {
        Self::new(name, NodeKind::Group(group))
    }

    pub fn with_input(mut self, pin: impl Into<String>, source: impl Into<PinRef>) -> Self {
        self.set_input(pin, source);
        self
    }

    /// Adds or replaces an output pin.
    pub fn with_output(mut self, pin: impl Into<String>, desc: OutputDesc) -> Self {
        let pin = pin.into();
        match self.outputs.iter_mut().find(|o| o.name == pin) {
            Some(existing) => existing.desc = desc,
            None => self.outputs.push(OutputPin { name: pin, desc }),
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &NodeKind<B> {
        &self.kind
    }

    pub fn kind_mut(&mut self) -> &mut NodeKind<B> {
        &mut self.kind
    }

    pub fn inputs(&self) -> &[InputPin] {
        &self.inputs
    }

    pub fn input(&self, pin: &str) -> Option<&PinRef> {
        self.inputs.iter().find(|i| i.name == pin).map(|i| &i.source)
    }

    pub fn outputs(&self) -> &[OutputPin] {
        &self.outputs
    }

    pub fn output(&self, pin: &str) -> Option<&OutputDesc> {
        self.outputs.iter().find(|o| o.name == pin).map(|o| &o.desc)
    }

    pub fn output_mut(&mut self, pin: &str) -> Option<&mut OutputDesc> {
        self.outputs.iter_mut().find(|o| o.name == pin).map(|o| &mut o.desc)
    }

    pub fn output_index(&self, pin: &str) -> Option<usize> {
        self.outputs.iter().position(|o| o.name == pin)
    }

    /// Connects `pin` to a producer, replacing any previous connection.
    pub fn set_input(&mut self, pin: impl Into<String>, source: impl Into<PinRef>) {
        let pin = pin.into();
        let source = source.into();
        match self.inputs.iter_mut().find(|i| i.name == pin) {
            Some(existing) => existing.source = source,
            None => self.inputs.push(InputPin { name: pin, source }),
        }
    }

    pub fn clear_input(&mut self, pin: &str) -> bool {
        let before = self.inputs.len();
        self.inputs.retain(|i| i.name != pin);
        self.inputs.len() != before
    }

    /// Sets a filter parameter. Returns `false` for non-filter nodes.
    pub fn set_parameter(&mut self, name: impl Into<String>, value: Uniform<B::Texture>) -> bool {
        match &mut self.kind {
            NodeKind::Filter(f) => {
                f.set_parameter(name, value);
                true
            }
            _ => false,
        }
    }

    pub fn parameter(&self, name: &str) -> Option<&Uniform<B::Texture>> {
        match &self.kind {
            NodeKind::Filter(f) => f.parameter(name),
            _ => None,
        }
    }

    pub fn define(&mut self, name: impl Into<String>, value: impl Into<String>) -> bool {
        match &mut self.kind {
            NodeKind::Filter(f) => {
                f.define(name, value);
                true
            }
            _ => false,
        }
    }

    pub fn undefine(&mut self, name: &str) -> bool {
        match &mut self.kind {
            NodeKind::Filter(f) => f.undefine(name),
            _ => false,
        }
    }

    /// Replaces the texture of a texture-source node. Returns the old one.
    pub fn set_texture(&mut self, texture: Option<B::Texture>) -> Option<B::Texture> {
        match &mut self.kind {
            NodeKind::Texture(t) => t.set_texture(texture),
            _ => None,
        }
    }

    pub fn as_group(&self) -> Option<&GroupNode<B>> {
        match &self.kind {
            NodeKind::Group(g) => Some(g),
            _ => None,
        }
    }

    pub fn as_group_mut(&mut self) -> Option<&mut GroupNode<B>> {
        match &mut self.kind {
            NodeKind::Group(g) => Some(g),
            _ => None,
        }
    }

    /// False when a compiled filter program does not use `pin`.
    ///
    /// Uncompiled programs accept every pin.
    pub fn accepts_input(&self, pin: &str) -> bool {
        match &self.kind {
            NodeKind::Filter(f) => f.program().is_none_or(|p| p.has_input(pin)),
            _ => true,
        }
    }

    /// Concrete texture shape of output `index` for this frame.
    pub fn resolve_output(&self, index: usize, viewport: &Viewport) -> Result<TextureDesc, CompositorError> {
        let out = self.outputs.get(index).ok_or_else(|| CompositorError::UnknownPin {
            node: self.name.clone(),
            pin: format!("#{index}"),
        })?;
        out.desc.params.resolve(viewport).map_err(|bad| CompositorError::InvalidSize {
            node: self.name.clone(),
            pin: out.name.clone(),
            width: bad.width,
            height: bad.height,
        })
    }

    pub fn resolve_outputs(&self, viewport: &Viewport) -> Result<Vec<(String, TextureDesc)>, CompositorError> {
        (0..self.outputs.len())
            .map(|i| Ok((self.outputs[i].name.clone(), self.resolve_output(i, viewport)?)))
            .collect()
    }

    /// Runs the node's GPU work into `target`.
    pub(crate) fn execute(
        &mut self,
        backend: &mut B,
        inputs: &[(String, B::Texture)],
        target: &RenderTarget<'_, B::Texture>,
        viewport: &Viewport,
    ) -> Result<(), BackendError> {
        match &mut self.kind {
            NodeKind::Scene(scene) => scene.render(backend, target, viewport),
            NodeKind::Filter(filter) => filter.render(backend, &self.name, inputs, target, viewport),
            NodeKind::Texture(_) | NodeKind::Group(_) => Ok(()),
        }
    }

    pub(crate) fn history(&self, index: usize) -> Option<&OutputHistory<B::Texture>> {
        self.history.get(index)
    }

    pub(crate) fn history_mut(&mut self, index: usize) -> &mut OutputHistory<B::Texture> {
        if self.history.len() <= index {
            self.history.resize_with(index + 1, OutputHistory::default);
        }
        &mut self.history[index]
    }

    /// Removes every retained texture from this node and its children.
    pub(crate) fn take_history(&mut self) -> Vec<B::Texture> {
        let mut out = Vec::new();
        for h in self.history.drain(..) {
            if let Some(t) = h.previous {
                out.push(t);
            }
            if let Some(t) = h.presented {
                if !out.contains(&t) {
                    out.push(t);
                }
            }
        }
        if let NodeKind::Group(g) = &mut self.kind {
            for child in g.nodes_mut() {
                out.extend(child.take_history());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compositor::headless::HeadlessBackend;
    use lumen_expr::ParamValue;

    #[test]
    fn pin_ref_candidates() {
        let r = PinRef::from("blur.out");
        assert_eq!(r.candidates(), vec![("blur.out", None), ("blur", Some("out"))]);

        let r = PinRef::from("scene");
        assert_eq!(r.candidates(), vec![("scene", None)]);

        let r = PinRef::from(("a.b", "c"));
        assert_eq!(r.candidates(), vec![("a.b", Some("c"))]);
        assert_eq!(r.to_string(), "a.b.c");
    }

    #[test]
    fn set_input_replaces() {
        let mut n: Node<HeadlessBackend> = Node::filter("f", "").with_input("src", "a");
        n.set_input("src", "b.out");
        n.set_input("other", "c");
        assert_eq!(n.inputs().len(), 2);
        assert_eq!(n.input("src"), Some(&PinRef::from("b.out")));
        assert!(n.clear_input("other"));
        assert!(!n.clear_input("other"));
    }

    #[test]
    fn texture_node_has_default_pin() {
        let n: Node<HeadlessBackend> = Node::texture("noise", None);
        assert_eq!(n.output_index(TEXTURE_PIN), Some(0));
        assert_eq!(n.kind().type_name(), "texture");
    }

    #[test]
    fn resolve_reports_bad_sizes() {
        let params = TextureParams::default().with_size(
            ParamValue::parse("expr(1 / (width - width))").unwrap(),
            ParamValue::literal(4.0),
        );
        let n: Node<HeadlessBackend> = Node::filter("f", "").with_output("out", OutputDesc::new(params));
        let err = n.resolve_outputs(&Viewport::new(10.0, 10.0, 1.0)).unwrap_err();
        assert!(matches!(err, CompositorError::InvalidSize { ref pin, .. } if pin == "out"));
    }

    #[test]
    fn parameters_only_apply_to_filters() {
        let mut f: Node<HeadlessBackend> = Node::filter("f", "");
        assert!(f.set_parameter("amount", Uniform::Float(0.5)));
        assert!(matches!(f.parameter("amount"), Some(Uniform::Float(v)) if *v == 0.5));
        assert!(f.define("TAPS", "9"));
        assert!(f.undefine("TAPS"));

        let mut t: Node<HeadlessBackend> = Node::texture("t", None);
        assert!(!t.set_parameter("amount", Uniform::Float(0.5)));
        assert!(!t.define("X", "1"));
    }
}
