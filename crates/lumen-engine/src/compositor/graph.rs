//! The compositor: owns the node tree, caches the execution plan and runs
//! frames.
//!
//! Per frame, nodes run in plan order. Each output texture comes from the
//! [`TexturePool`] and goes back to it as soon as its last same-frame reader
//! has run, unless the output keeps history or is terminal. History swaps
//! happen only after every node rendered successfully, so a failed frame
//! leaves the previous frame's feedback and presented textures intact.

use log::{debug, trace, warn};

use crate::coords::Viewport;

use super::backend::{Attachment, Backend, RenderTarget};
use super::error::CompositorError;
use super::node::{Node, NodeKind, PinRef, Uniform};
use super::pool::{TexturePool, DEFAULT_MAX_TEXTURES};
use super::schedule::{build_plan, ExecutionPlan, Source};

#[derive(Debug, Clone)]
pub struct CompositorConfig {
    /// Cap on textures owned by the pool (live and free).
    pub max_textures: usize,
    /// Destroy free textures when the viewport changes size.
    pub trim_on_resize: bool,
}

impl Default for CompositorConfig {
    fn default() -> Self {
        Self {
            max_textures: DEFAULT_MAX_TEXTURES,
            trim_on_resize: true,
        }
    }
}

/// Summary of one rendered frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameStats {
    pub frame_index: u64,
    pub nodes_executed: usize,
    pub textures_acquired: usize,
    /// New backend allocations made by the pool during the frame.
    pub textures_allocated: u64,
    pub peak_live: usize,
    pub order: Vec<String>,
}

/// Textures handed out during one frame.
struct Frame<T> {
    /// Per step, per output. Cleared when the texture goes back to the pool.
    current: Vec<Vec<Option<T>>>,
    /// Zeroed stand-ins for history that does not exist yet.
    blanks: Vec<((usize, usize), T)>,
    acquired: usize,
}

impl<T: Clone> Frame<T> {
    fn new(plan: &ExecutionPlan) -> Self {
        Self {
            current: plan.steps().iter().map(|s| vec![None; s.consumers.len()]).collect(),
            blanks: Vec::new(),
            acquired: 0,
        }
    }

    fn blank(&self, key: (usize, usize)) -> Option<&T> {
        self.blanks.iter().find(|(k, _)| *k == key).map(|(_, t)| t)
    }
}

pub struct Compositor<B: Backend> {
    nodes: Vec<Node<B>>,
    plan: Option<ExecutionPlan>,
    pool: TexturePool<B::Texture>,
    config: CompositorConfig,
    frame_index: u64,
    last_viewport: Option<Viewport>,
}

impl<B: Backend> Default for Compositor<B> {
    fn default() -> Self {
        Self::new(CompositorConfig::default())
    }
}

impl<B: Backend> Compositor<B> {
    pub fn new(config: CompositorConfig) -> Self {
        Self {
            nodes: Vec::new(),
            plan: None,
            pool: TexturePool::with_limit(config.max_textures),
            config,
            frame_index: 0,
            last_viewport: None,
        }
    }

    pub fn config(&self) -> &CompositorConfig {
        &self.config
    }

    // ── structure ─────────────────────────────────────────────────────────

    pub fn add_node(&mut self, node: Node<B>) -> Result<(), CompositorError> {
        if self.nodes.iter().any(|n| n.name() == node.name()) {
            return Err(CompositorError::DuplicateNode(node.name().to_string()));
        }
        self.nodes.push(node);
        self.invalidate();
        Ok(())
    }

    /// Removes a node (`group/child` reaches into groups). Textures it kept
    /// across frames go back to the pool.
    pub fn remove_node(&mut self, name: &str) -> Option<Node<B>> {
        let mut node = match name.rsplit_once('/') {
            Some((group, child)) => self.node_mut(group)?.as_group_mut()?.remove_node(child)?,
            None => {
                let index = self.nodes.iter().position(|n| n.name() == name)?;
                self.nodes.remove(index)
            }
        };
        for texture in node.take_history() {
            self.pool.release(texture);
        }
        self.invalidate();
        Some(node)
    }

    pub fn nodes(&self) -> &[Node<B>] {
        &self.nodes
    }

    /// Looks a node up by name; `group/child` reaches into groups.
    pub fn node(&self, name: &str) -> Option<&Node<B>> {
        let mut parts = name.split('/');
        let first = parts.next()?;
        let mut node = self.nodes.iter().find(|n| n.name() == first)?;
        for part in parts {
            node = node.as_group()?.node(part)?;
        }
        Some(node)
    }

    /// Mutable access. Invalidates the cached plan when the node exists.
    pub fn node_mut(&mut self, name: &str) -> Option<&mut Node<B>> {
        self.node(name)?;
        self.invalidate();
        self.find_mut(name)
    }

    fn find_mut(&mut self, name: &str) -> Option<&mut Node<B>> {
        let mut parts = name.split('/');
        let first = parts.next()?;
        let mut node = self.nodes.iter_mut().find(|n| n.name() == first)?;
        for part in parts {
            node = node.as_group_mut()?.node_mut(part)?;
        }
        Some(node)
    }

    /// Updates a filter parameter. Parameters do not affect topology, so the
    /// cached plan is kept.
    pub fn set_parameter(&mut self, node: &str, name: &str, value: Uniform<B::Texture>) -> Result<(), CompositorError> {
        let n = self
            .find_mut(node)
            .ok_or_else(|| CompositorError::UnknownNode(node.to_string()))?;
        if n.set_parameter(name, value) {
            Ok(())
        } else {
            Err(CompositorError::UnknownPin {
                node: node.to_string(),
                pin: name.to_string(),
            })
        }
    }

    /// Adds `node` to the group at `group`, replacing a child with the same
    /// name. Textures the replaced child kept go back to the pool.
    pub fn add_to_group(
        &mut self,
        group: &str,
        node: Node<B>,
        links_to_input: &[(&str, &str)],
        links_to_output: &[(&str, &str)],
    ) -> Result<(), CompositorError> {
        let g = self
            .node_mut(group)
            .and_then(Node::as_group_mut)
            .ok_or_else(|| CompositorError::UnknownNode(group.to_string()))?;
        if let Some(mut replaced) = g.add_node(node, links_to_input, links_to_output) {
            for texture in replaced.take_history() {
                self.pool.release(texture);
            }
        }
        Ok(())
    }

    pub fn set_input(&mut self, node: &str, pin: &str, source: impl Into<PinRef>) -> Result<(), CompositorError> {
        let n = self
            .node_mut(node)
            .ok_or_else(|| CompositorError::UnknownNode(node.to_string()))?;
        n.set_input(pin, source);
        Ok(())
    }

    /// Marks an output as presented: produced every frame and retained until
    /// the next successful frame, even without consumers.
    pub fn mark_terminal(&mut self, node: &str, pin: &str) -> Result<(), CompositorError> {
        let n = self
            .node_mut(node)
            .ok_or_else(|| CompositorError::UnknownNode(node.to_string()))?;
        let desc = n.output_mut(pin).ok_or_else(|| CompositorError::UnknownPin {
            node: node.to_string(),
            pin: pin.to_string(),
        })?;
        desc.terminal = true;
        Ok(())
    }

    fn invalidate(&mut self) {
        if self.plan.take().is_some() {
            trace!("compositor: plan invalidated");
        }
    }

    // ── topology ──────────────────────────────────────────────────────────

    /// Resolves links and ordering now, surfacing structural errors.
    pub fn prepare(&mut self) -> Result<&ExecutionPlan, CompositorError> {
        let plan = match self.plan.take() {
            Some(plan) => plan,
            None => self.rebuild_plan()?,
        };
        Ok(self.plan.insert(plan))
    }

    pub fn execution_order(&mut self) -> Result<Vec<String>, CompositorError> {
        Ok(self.prepare()?.order().map(str::to_string).collect())
    }

    fn rebuild_plan(&self) -> Result<ExecutionPlan, CompositorError> {
        let plan = build_plan(&self.nodes)?;
        debug!("compositor: topology rebuilt, {} steps", plan.steps().len());
        Ok(plan)
    }

    // ── frames ────────────────────────────────────────────────────────────

    /// Renders one frame.
    ///
    /// Per-frame failures (allocation, invalid sizes, draw errors) return
    /// every texture taken this frame to the pool and leave feedback history
    /// and presented outputs as they were after the last good frame.
    pub fn render(&mut self, backend: &mut B) -> Result<FrameStats, CompositorError> {
        let plan = match self.plan.take() {
            Some(plan) => plan,
            None => self.rebuild_plan()?,
        };

        let viewport = backend.viewport();
        if self.config.trim_on_resize && self.last_viewport.is_some_and(|v| v != viewport) {
            debug!("compositor: viewport changed to {}x{}", viewport.width, viewport.height);
            self.pool.trim(backend);
        }
        self.last_viewport = Some(viewport);

        self.pool.reset_peak();
        let allocations = self.pool.total_allocations();
        let mut frame = Frame::new(&plan);

        let result = self.execute(backend, &plan, &viewport, &mut frame);
        let stats = match result {
            Ok(nodes_executed) => {
                let textures_acquired = frame.acquired;
                self.commit(&plan, frame);
                let stats = FrameStats {
                    frame_index: self.frame_index,
                    nodes_executed,
                    textures_acquired,
                    textures_allocated: self.pool.total_allocations() - allocations,
                    peak_live: self.pool.peak_live(),
                    order: plan.order().map(str::to_string).collect(),
                };
                self.frame_index += 1;
                Ok(stats)
            }
            Err(err) => {
                self.rollback(frame);
                warn!("compositor: frame {} skipped: {err}", self.frame_index);
                Err(err)
            }
        };
        self.plan = Some(plan);
        stats
    }

    fn execute(
        &mut self,
        backend: &mut B,
        plan: &ExecutionPlan,
        viewport: &Viewport,
        frame: &mut Frame<B::Texture>,
    ) -> Result<usize, CompositorError> {
        let mut refs: Vec<Vec<usize>> = plan.steps().iter().map(|s| s.consumers.clone()).collect();
        let mut executed = 0;

        for (index, step) in plan.steps().iter().enumerate() {
            if step.is_source {
                executed += 1;
                continue;
            }

            let mut inputs = Vec::with_capacity(step.inputs.len());
            for input in &step.inputs {
                let texture = match input.source {
                    Some(source) => self.input_texture(backend, plan, source, viewport, frame)?,
                    None => backend.fallback_texture(),
                };
                inputs.push((input.pin.clone(), texture));
            }

            let node = node_at(&self.nodes, &step.path)?;
            let mut attachments = Vec::with_capacity(node.outputs().len());
            for (output, pin) in node.outputs().iter().enumerate() {
                let desc = node.resolve_output(output, viewport)?;
                let texture = self.pool.acquire(backend, &desc)?;
                frame.acquired += 1;
                frame.current[index][output] = Some(texture.clone());
                attachments.push(Attachment {
                    point: pin.desc.attachment,
                    pin: pin.name.clone(),
                    texture,
                });
            }

            let target = if attachments.is_empty() {
                RenderTarget::Screen
            } else {
                RenderTarget::Attachments(&attachments)
            };
            trace!("compositor: run {}", step.name);
            node_at_mut(&mut self.nodes, &step.path)?
                .execute(backend, &inputs, &target, viewport)
                .map_err(|source| CompositorError::Node {
                    node: step.name.clone(),
                    source,
                })?;
            executed += 1;

            for source in step.inputs.iter().filter_map(|i| i.source) {
                if source.delayed || plan.steps()[source.step].is_source {
                    continue;
                }
                let remaining = &mut refs[source.step][source.output];
                *remaining = remaining.saturating_sub(1);
                if *remaining == 0 {
                    self.release_transient(plan, source.step, source.output, frame)?;
                }
            }
            for output in 0..attachments.len() {
                if refs[index][output] == 0 {
                    self.release_transient(plan, index, output, frame)?;
                }
            }
        }
        Ok(executed)
    }

    fn input_texture(
        &mut self,
        backend: &mut B,
        plan: &ExecutionPlan,
        source: Source,
        viewport: &Viewport,
        frame: &mut Frame<B::Texture>,
    ) -> Result<B::Texture, CompositorError> {
        let step = &plan.steps()[source.step];
        let producer = node_at(&self.nodes, &step.path)?;

        if let NodeKind::Texture(t) = producer.kind() {
            return Ok(t.texture().cloned().unwrap_or_else(|| backend.fallback_texture()));
        }

        if !source.delayed {
            let current = frame.current[source.step][source.output].clone();
            return Ok(current.unwrap_or_else(|| backend.fallback_texture()));
        }

        if let Some(previous) = producer.history(source.output).and_then(|h| h.previous.clone()) {
            return Ok(previous);
        }
        let key = (source.step, source.output);
        if let Some(blank) = frame.blank(key) {
            return Ok(blank.clone());
        }

        let desc = producer.resolve_output(source.output, viewport)?;
        let texture = self.pool.acquire(backend, &desc)?;
        frame.acquired += 1;
        frame.blanks.push((key, texture.clone()));
        backend.clear_texture(&texture)?;
        trace!("compositor: {} has no history yet, reading a blank texture", step.name);
        Ok(texture)
    }

    /// Returns a same-frame output to the pool unless it must outlive the frame.
    fn release_transient(
        &mut self,
        plan: &ExecutionPlan,
        step: usize,
        output: usize,
        frame: &mut Frame<B::Texture>,
    ) -> Result<(), CompositorError> {
        let node = node_at(&self.nodes, &plan.steps()[step].path)?;
        let desc = &node.outputs()[output].desc;
        if desc.retains_history() || desc.terminal {
            return Ok(());
        }
        if let Some(texture) = frame.current[step][output].take() {
            self.pool.release(texture);
        }
        Ok(())
    }

    /// Swaps history and presented textures after a successful frame.
    fn commit(&mut self, plan: &ExecutionPlan, mut frame: Frame<B::Texture>) {
        for (index, step) in plan.steps().iter().enumerate() {
            if step.is_source {
                continue;
            }
            let Ok(node) = node_at_mut(&mut self.nodes, &step.path) else {
                continue;
            };
            for (output, slot) in frame.current[index].iter_mut().enumerate() {
                let Some(out) = node.outputs().get(output) else {
                    continue;
                };
                let (retain, terminal) = (out.desc.retains_history(), out.desc.terminal);
                let current = slot.take();

                let history = node.history_mut(output);
                let stale = [history.previous.take(), history.presented.take()];
                history.previous = if retain { current.clone() } else { None };
                history.presented = if terminal { current.clone() } else { None };

                let mut released: Vec<B::Texture> = Vec::new();
                for texture in stale.into_iter().flatten() {
                    let kept = history.previous.as_ref() == Some(&texture) || history.presented.as_ref() == Some(&texture);
                    if !kept && !released.contains(&texture) {
                        released.push(texture);
                    }
                }
                if let Some(texture) = current.filter(|_| !retain && !terminal) {
                    released.push(texture);
                }
                for texture in released {
                    self.pool.release(texture);
                }
            }
        }
        for (_, texture) in frame.blanks.drain(..) {
            self.pool.release(texture);
        }
    }

    fn rollback(&mut self, frame: Frame<B::Texture>) {
        let mut returned = 0;
        for texture in frame.current.into_iter().flatten().flatten() {
            returned += usize::from(self.pool.release(texture));
        }
        for (_, texture) in frame.blanks {
            returned += usize::from(self.pool.release(texture));
        }
        debug!("compositor: rolled back {returned} of {} textures", frame.acquired);
    }

    // ── outputs & teardown ────────────────────────────────────────────────

    /// The presented (or, failing that, last kept) texture of `node`.`pin`.
    ///
    /// Group outputs are followed to the child that produces them.
    pub fn output_texture(&self, node: &str, pin: &str) -> Option<&B::Texture> {
        let n = self.node(node)?;
        if let Some(group) = n.as_group() {
            let link = group.output_link(Some(pin))?;
            return self.output_texture(&format!("{node}/{}", link.node), &link.pin);
        }
        let index = n.output_index(pin)?;
        match n.kind() {
            NodeKind::Texture(t) => t.texture(),
            _ => {
                let history = n.history(index)?;
                history.presented.as_ref().or(history.previous.as_ref())
            }
        }
    }

    pub fn pool(&self) -> &TexturePool<B::Texture> {
        &self.pool
    }

    /// Number of frames rendered successfully.
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Drops every retained texture and destroys the pool's GPU memory.
    ///
    /// The graph itself stays usable; the next frame starts without history.
    pub fn dispose(&mut self, backend: &mut B) {
        for node in &mut self.nodes {
            node.take_history();
        }
        self.pool.clear(backend);
        self.last_viewport = None;
        debug!("compositor: disposed");
    }
}

fn node_at<'n, B: Backend>(nodes: &'n [Node<B>], path: &[usize]) -> Result<&'n Node<B>, CompositorError> {
    let missing = || CompositorError::UnknownNode(format!("{path:?}"));
    let (first, rest) = path.split_first().ok_or_else(missing)?;
    let mut node = nodes.get(*first).ok_or_else(missing)?;
    for index in rest {
        node = node.as_group().and_then(|g| g.nodes().get(*index)).ok_or_else(missing)?;
    }
    Ok(node)
}

fn node_at_mut<'n, B: Backend>(nodes: &'n mut [Node<B>], path: &[usize]) -> Result<&'n mut Node<B>, CompositorError> {
    let missing = || CompositorError::UnknownNode(format!("{path:?}"));
    let (first, rest) = path.split_first().ok_or_else(missing)?;
    let mut node = nodes.get_mut(*first).ok_or_else(missing)?;
    for index in rest {
        node = node
            .as_group_mut()
            .and_then(|g| g.nodes_mut().get_mut(*index))
            .ok_or_else(missing)?;
    }
    Ok(node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compositor::headless::{HeadlessBackend, HeadlessScene};
    use crate::compositor::node::{GroupNode, OutputDesc};
    use crate::compositor::texture::TextureParams;
    use lumen_expr::ParamValue;

    fn backend() -> HeadlessBackend {
        HeadlessBackend::new(Viewport::new(800.0, 600.0, 1.0))
    }

    fn out() -> OutputDesc {
        OutputDesc::new(TextureParams::viewport())
    }

    fn feedback_graph() -> Compositor<HeadlessBackend> {
        let mut c = Compositor::default();
        c.add_node(Node::scene("sceneA", HeadlessScene::new("sceneA")).with_output("color", out()))
            .unwrap();
        c.add_node(
            Node::filter("filterB", "")
                .with_input("tDiffuse", "sceneA.color")
                .with_input("tPrev", "filterB.out")
                .with_output("out", out().keep_last_frame()),
        )
        .unwrap();
        c.add_node(Node::filter("screen", "").with_input("tDiffuse", "filterB.out")).unwrap();
        c
    }

    #[test]
    fn feedback_reads_previous_frame() {
        let mut b = backend();
        let mut c = feedback_graph();

        let mut frames = Vec::new();
        for _ in 0..3 {
            c.render(&mut b).unwrap();
            let d = b.last_draw("filterB").unwrap();
            frames.push((d.input("tPrev").unwrap(), d.output("out").unwrap()));
        }

        assert_eq!(frames[0].0, 0, "first frame reads a cleared texture");
        assert_eq!(frames[1].0, frames[0].1);
        assert_eq!(frames[2].0, frames[1].1);
        assert_ne!(frames[2].0, frames[2].1);
    }

    #[test]
    fn chain_returns_everything_to_the_pool() {
        let mut b = backend();
        let mut c = Compositor::default();
        c.add_node(Node::scene("scene", HeadlessScene::new("scene")).with_output("color", out()))
            .unwrap();
        c.add_node(Node::filter("a", "").with_input("src", "scene").with_output("out", out()))
            .unwrap();
        c.add_node(Node::filter("b", "").with_input("src", "a").with_output("out", out()))
            .unwrap();
        c.add_node(Node::filter("present", "").with_input("src", "b")).unwrap();

        let first = c.render(&mut b).unwrap();
        assert_eq!(first.nodes_executed, 4);
        assert!(first.peak_live <= 2);
        assert_eq!(c.pool().live_count(), 0);
        let free = c.pool().free_count();

        let second = c.render(&mut b).unwrap();
        assert_eq!(second.textures_allocated, 0);
        assert_eq!(c.pool().free_count(), free);
        assert!(b.last_draw("present").unwrap().to_screen);
    }

    #[test]
    fn terminal_outputs_survive_the_frame() {
        let mut b = backend();
        let mut c = Compositor::default();
        c.add_node(Node::filter("final", "").with_output("out", out())).unwrap();
        c.mark_terminal("final", "out").unwrap();

        c.render(&mut b).unwrap();
        let shown = *c.output_texture("final", "out").unwrap();
        assert_eq!(b.content(shown), b.last_draw("final").unwrap().output("out"));
        assert_eq!(c.pool().live_count(), 1);

        c.render(&mut b).unwrap();
        assert_eq!(c.pool().live_count(), 1);
        assert!(c.mark_terminal("final", "nope").is_err());
    }

    #[test]
    fn failed_draw_keeps_history() {
        let mut b = backend();
        let mut c = feedback_graph();
        c.render(&mut b).unwrap();
        c.render(&mut b).unwrap();
        let frame2 = b.last_draw("filterB").unwrap().output("out").unwrap();
        let kept = *c.output_texture("filterB", "out").unwrap();
        let live = c.pool().live_count();

        b.fail_draws_of("filterB");
        let err = c.render(&mut b).unwrap_err();
        assert!(matches!(err, CompositorError::Node { ref node, .. } if node == "filterB"));
        assert_eq!(c.frame_index(), 2);
        assert_eq!(c.output_texture("filterB", "out"), Some(&kept));
        assert_eq!(c.pool().live_count(), live);

        b.clear_failures();
        c.render(&mut b).unwrap();
        assert_eq!(b.last_draw("filterB").unwrap().input("tPrev"), Some(frame2));
    }

    #[test]
    fn allocation_failure_skips_the_frame() {
        let mut b = backend();
        let mut c = feedback_graph();
        b.fail_next_allocations(2);

        let err = c.render(&mut b).unwrap_err();
        assert!(matches!(err, CompositorError::Backend(_)));
        assert_eq!(c.pool().live_count(), 0);
        assert_eq!(c.frame_index(), 0);

        // The second injected failure hits the retry, the third attempt renders.
        assert!(c.render(&mut b).is_err());
        let stats = c.render(&mut b).unwrap();
        assert_eq!(stats.frame_index, 0);
        assert_eq!(c.frame_index(), 1);
    }

    #[test]
    fn sizes_follow_viewport_without_rebuild() {
        let mut b = backend();
        let mut c = Compositor::default();
        let half = TextureParams::default().with_size(
            ParamValue::parse("expr(width*0.5)").unwrap(),
            ParamValue::parse("expr(height*0.5)").unwrap(),
        );
        c.add_node(Node::filter("half", "").with_output("out", OutputDesc::new(half))).unwrap();
        c.mark_terminal("half", "out").unwrap();

        c.render(&mut b).unwrap();
        let t = *c.output_texture("half", "out").unwrap();
        assert_eq!(b.desc(t).map(|d| d.width), Some(400));

        b.set_viewport(Viewport::new(640.0, 480.0, 1.0));
        c.render(&mut b).unwrap();
        let t = *c.output_texture("half", "out").unwrap();
        assert_eq!(b.desc(t).map(|d| (d.width, d.height)), Some((320, 240)));
    }

    #[test]
    fn missing_texture_binds_fallback() {
        let mut b = backend();
        let mut c = Compositor::default();
        c.add_node(Node::texture("noise", None)).unwrap();
        c.add_node(Node::filter("use", "").with_input("tNoise", "noise")).unwrap();

        let stats = c.render(&mut b).unwrap();
        assert_eq!(stats.order, ["noise", "use"]);
        assert_eq!(b.last_draw("use").unwrap().input("tNoise"), Some(0));

        let t = b.upload(crate::compositor::texture::TextureDesc::new(4, 4));
        c.node_mut("noise").unwrap().set_texture(Some(t));
        c.render(&mut b).unwrap();
        assert_eq!(b.last_draw("use").unwrap().input("tNoise"), b.content(t));
    }

    #[test]
    fn plan_is_cached_until_structure_changes() {
        let mut c: Compositor<HeadlessBackend> = Compositor::default();
        c.add_node(Node::filter("a", "").with_output("out", out())).unwrap();
        assert_eq!(c.execution_order().unwrap(), ["a"]);
        assert!(c.plan.is_some());

        c.add_node(Node::filter("b", "").with_input("x", "a")).unwrap();
        assert!(c.plan.is_none());
        assert_eq!(c.execution_order().unwrap(), ["a", "b"]);

        assert!(matches!(
            c.add_node(Node::filter("a", "")),
            Err(CompositorError::DuplicateNode(_))
        ));
    }

    #[test]
    fn parameter_updates_keep_the_plan() {
        let mut c = feedback_graph();
        c.prepare().unwrap();

        c.set_parameter("filterB", "gain", Uniform::Float(0.5)).unwrap();
        assert!(c.plan.is_some());
        assert!(c.node_mut("ghost").is_none());
        assert!(c.plan.is_some());
        assert!(matches!(
            c.set_parameter("ghost", "gain", Uniform::Float(1.0)),
            Err(CompositorError::UnknownNode(_))
        ));
        assert!(c.set_parameter("sceneA", "gain", Uniform::Float(1.0)).is_err());

        c.node_mut("filterB").unwrap().define("FAST", "1");
        assert!(c.plan.is_none());
    }

    #[test]
    fn replacing_a_group_child_releases_its_history() {
        let mut b = backend();
        let mut c = Compositor::default();
        let acc = Node::filter("acc", "")
            .with_input("prev", "acc.out")
            .with_output("out", out().keep_last_frame());
        c.add_node(Node::group("g", GroupNode::new().with_node(acc, &[], &[("out", "out")])))
            .unwrap();

        c.render(&mut b).unwrap();
        c.render(&mut b).unwrap();
        assert_eq!(c.pool().live_count(), 1);

        c.add_to_group("g", Node::filter("acc", "").with_output("out", out()), &[], &[("out", "out")])
            .unwrap();
        assert_eq!(c.pool().live_count(), 0);
        assert_eq!(c.execution_order().unwrap(), ["g/acc"]);
        assert!(c.add_to_group("acc", Node::filter("x", ""), &[], &[]).is_err());
    }

    #[test]
    fn dispose_and_remove_release_textures() {
        let mut b = backend();
        let mut c = feedback_graph();
        c.render(&mut b).unwrap();
        assert!(c.pool().live_count() > 0);

        let removed = c.remove_node("filterB").unwrap();
        assert_eq!(removed.name(), "filterB");
        assert_eq!(c.pool().live_count(), 0);
        assert!(c.render(&mut b).is_err(), "screen now reads a missing node");

        c.dispose(&mut b);
        assert_eq!(c.pool().allocated_count(), 0);
        assert_eq!(b.live_textures(), 0);
    }
}
