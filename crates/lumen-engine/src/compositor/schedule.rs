//! Topology resolution.
//!
//! Turns the node tree into an [`ExecutionPlan`]: a flat list of leaf nodes
//! (scene, filter and texture nodes; groups are dissolved) in an order where
//! every producer of a same-frame input runs before its consumer.
//!
//! Ordering is a stable Kahn sort: whenever several nodes are ready, the one
//! inserted first runs first. Groups are ordered as one unit in their parent
//! and their own order is spliced in at that position.
//!
//! Reads are frame-delayed (and impose no order) when they come from an
//! `output_last_frame` pin or are a node reading its own `keep_last_frame`
//! pin. If a cycle remains, reads of `keep_last_frame` pins on that cycle are
//! demoted to delayed reads; any cycle left after that is an error.

use std::collections::{BTreeSet, HashMap};

use log::{debug, warn};

use super::backend::Backend;
use super::error::CompositorError;
use super::node::{Node, NodeKind, PinRef};

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Source {
    /// Producer step index.
    pub step: usize,
    pub output: usize,
    /// Reads the producer's previous-frame texture.
    pub delayed: bool,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ResolvedInput {
    pub pin: String,
    /// `None` binds the fallback texture.
    pub source: Option<Source>,
}

#[derive(Debug, Clone)]
pub struct Step {
    /// Child indices from the top-level node list down to the leaf.
    pub path: Vec<usize>,
    /// Group-qualified name (`group/child`).
    pub name: String,
    pub inputs: Vec<ResolvedInput>,
    /// Same-frame reads of each output.
    pub consumers: Vec<usize>,
    pub is_source: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ExecutionPlan {
    steps: Vec<Step>,
}

impl ExecutionPlan {
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn order(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().map(|s| s.name.as_str())
    }

    pub fn step_named(&self, name: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.name == name)
    }
}

// ── flattening ────────────────────────────────────────────────────────────

#[derive(Clone, Copy)]
enum Unit {
    Leaf(usize),
    Group(usize),
}

struct Member<'n, B: Backend> {
    node: &'n Node<B>,
    qualified: String,
    unit: Unit,
}

struct Scope<'n, B: Backend> {
    parent: Option<usize>,
    owner: Option<&'n Node<B>>,
    members: Vec<Member<'n, B>>,
}

impl<B: Backend> Scope<'_, B> {
    fn member(&self, name: &str) -> Option<usize> {
        self.members.iter().position(|m| m.node.name() == name)
    }
}

struct Leaf {
    path: Vec<usize>,
    scope: usize,
    member: usize,
    /// `(scope, member)` from the root scope down to the leaf itself.
    chain: Vec<(usize, usize)>,
}

#[derive(Debug, Clone, Copy)]
struct Edge {
    from: usize,
    output: usize,
    to: usize,
    input: usize,
    delayed: bool,
    soft: bool,
}

struct Flat<'n, B: Backend> {
    scopes: Vec<Scope<'n, B>>,
    leaves: Vec<Leaf>,
}

impl<'n, B: Backend> Flat<'n, B> {
    fn build(nodes: &'n [Node<B>]) -> Result<Self, CompositorError> {
        let mut flat = Flat { scopes: Vec::new(), leaves: Vec::new() };
        flat.collect(nodes, None, None, &[], "", &[])?;
        Ok(flat)
    }

    fn collect(
        &mut self,
        nodes: &'n [Node<B>],
        parent: Option<usize>,
        owner: Option<&'n Node<B>>,
        base_path: &[usize],
        prefix: &str,
        base_chain: &[(usize, usize)],
    ) -> Result<usize, CompositorError> {
        let scope = self.scopes.len();
        self.scopes.push(Scope { parent, owner, members: Vec::new() });

        for (i, node) in nodes.iter().enumerate() {
            if nodes[..i].iter().any(|n| n.name() == node.name()) {
                return Err(CompositorError::DuplicateNode(node.name().to_string()));
            }
            let mut path = base_path.to_vec();
            path.push(i);
            let mut chain = base_chain.to_vec();
            chain.push((scope, i));
            let qualified = if prefix.is_empty() {
                node.name().to_string()
            } else {
                format!("{prefix}/{}", node.name())
            };

            let unit = match node.kind() {
                NodeKind::Group(g) => {
                    Unit::Group(self.collect(g.nodes(), Some(scope), Some(node), &path, &qualified, &chain)?)
                }
                _ => {
                    self.leaves.push(Leaf { path, scope, member: i, chain });
                    Unit::Leaf(self.leaves.len() - 1)
                }
            };
            self.scopes[scope].members.push(Member { node, qualified, unit });
        }
        Ok(scope)
    }

    fn leaf_member(&self, leaf: usize) -> &Member<'n, B> {
        let l = &self.leaves[leaf];
        &self.scopes[l.scope].members[l.member]
    }

    /// Output `(leaf, index)` behind `member`'s pin, following group outputs.
    fn member_output(&self, scope: usize, member: usize, pin: Option<&str>) -> Option<(usize, usize)> {
        let m = &self.scopes[scope].members[member];
        match m.unit {
            Unit::Leaf(leaf) => {
                let index = match pin {
                    Some(pin) => m.node.output_index(pin)?,
                    None if m.node.outputs().is_empty() => return None,
                    None => 0,
                };
                Some((leaf, index))
            }
            Unit::Group(inner) => {
                let link = m.node.as_group()?.output_link(pin)?;
                let child = self.scopes[inner].member(&link.node)?;
                self.member_output(inner, child, Some(&link.pin))
            }
        }
    }

    /// Resolves a reference from `scope`, searching enclosing scopes outward.
    fn resolve_ref(&self, scope: usize, target: &PinRef) -> Option<(usize, usize)> {
        for (node, pin) in target.candidates() {
            let mut current = Some(scope);
            while let Some(sid) = current {
                if let Some(member) = self.scopes[sid].member(node) {
                    if let Some(found) = self.member_output(sid, member, pin) {
                        return Some(found);
                    }
                    break;
                }
                current = self.scopes[sid].parent;
            }
        }
        None
    }

    /// Producer of `member`'s input `pin`. Group input links take precedence
    /// over the member's own declaration.
    fn resolve_input(
        &self,
        scope: usize,
        member: usize,
        pin: &str,
        source: Option<&PinRef>,
        consumer: &str,
    ) -> Result<Option<(usize, usize)>, CompositorError> {
        let s = &self.scopes[scope];
        let name = s.members[member].node.name();

        if let (Some(owner), Some(parent)) = (s.owner, s.parent) {
            let link = owner.as_group().and_then(|g| g.input_link_for(name, pin));
            if let Some(link) = link {
                let owner_member = self.scopes[parent].member(owner.name()).ok_or_else(|| {
                    CompositorError::UnknownNode(owner.name().to_string())
                })?;
                let outer = owner.input(&link.group_input);
                return self.resolve_input(parent, owner_member, &link.group_input, outer, consumer);
            }
        }

        let Some(source) = source else {
            return Ok(None);
        };
        self.resolve_ref(scope, source)
            .map(Some)
            .ok_or_else(|| CompositorError::UnresolvedLink {
                consumer: consumer.to_string(),
                input: pin.to_string(),
                target: source.to_string(),
            })
    }

    /// Every group link must name an existing child pin, and every group
    /// input a child reads must resolve outside the group.
    fn check_group_links(&self) -> Result<(), CompositorError> {
        for (sid, scope) in self.scopes.iter().enumerate() {
            let (Some(owner), Some(parent)) = (scope.owner, scope.parent) else {
                continue;
            };
            let Some(group) = owner.as_group() else {
                continue;
            };
            let owner_member = self.scopes[parent]
                .members
                .iter()
                .position(|m| matches!(m.unit, Unit::Group(inner) if inner == sid))
                .ok_or_else(|| CompositorError::UnknownNode(owner.name().to_string()))?;
            let qualified = &self.scopes[parent].members[owner_member].qualified;
            let unresolved = |pin: &str, node: &str, child_pin: &str| CompositorError::UnresolvedLink {
                consumer: qualified.clone(),
                input: pin.to_string(),
                target: format!("{node}.{child_pin}"),
            };

            for link in group.input_links() {
                let child = scope
                    .member(&link.node)
                    .ok_or_else(|| unresolved(&link.group_input, &link.node, &link.pin))?;
                if let Some(inner) = scope.members[child].node.as_group() {
                    let known = inner.input_links().iter().any(|l| l.group_input == link.pin)
                        || scope.members[child].node.input(&link.pin).is_some();
                    if !known {
                        return Err(unresolved(&link.group_input, &link.node, &link.pin));
                    }
                }
                let outer = owner.input(&link.group_input);
                self.resolve_input(parent, owner_member, &link.group_input, outer, qualified)?;
            }

            for link in group.output_links() {
                let found = scope
                    .member(&link.node)
                    .and_then(|child| self.member_output(sid, child, Some(&link.pin)));
                if found.is_none() {
                    return Err(unresolved(&link.group_output, &link.node, &link.pin));
                }
            }

            for pin in owner.inputs() {
                if !group.input_links().iter().any(|l| l.group_input == pin.name) {
                    return Err(CompositorError::UnknownPin {
                        node: qualified.clone(),
                        pin: pin.name.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Input pins of a leaf: its own, then pins only a group link feeds.
    fn leaf_pins(&self, leaf: usize) -> Vec<(String, Option<PinRef>)> {
        let l = &self.leaves[leaf];
        let m = self.leaf_member(leaf);
        let mut pins: Vec<(String, Option<PinRef>)> = m
            .node
            .inputs()
            .iter()
            .map(|i| (i.name.clone(), Some(i.source.clone())))
            .collect();
        if let Some(group) = self.scopes[l.scope].owner.and_then(|o| o.as_group()) {
            for link in group.input_links() {
                if link.node == m.node.name() && !pins.iter().any(|(p, _)| *p == link.pin) {
                    pins.push((link.pin.clone(), None));
                }
            }
        }
        pins
    }
}

// ── ordering ──────────────────────────────────────────────────────────────

struct Sorter<'f, 'n, B: Backend> {
    flat: &'f Flat<'n, B>,
    edges: Vec<Edge>,
}

impl<B: Backend> Sorter<'_, '_, B> {
    /// The member of `scope` whose subtree holds `leaf`.
    fn unit_in(&self, scope: usize, leaf: usize) -> Option<usize> {
        self.flat.leaves[leaf].chain.iter().find(|(s, _)| *s == scope).map(|(_, m)| *m)
    }

    /// Same-frame dependencies between members of `scope`, as `(edge, from, to)`.
    fn scope_edges(&self, scope: usize) -> Vec<(usize, usize, usize)> {
        let members = &self.flat.scopes[scope].members;
        self.edges
            .iter()
            .enumerate()
            .filter(|(_, e)| !e.delayed)
            .filter_map(|(i, e)| {
                let from = self.unit_in(scope, e.from)?;
                let to = self.unit_in(scope, e.to)?;
                let internal = from == to && matches!(members[from].unit, Unit::Group(_));
                (!internal).then_some((i, from, to))
            })
            .collect()
    }

    fn order_scope(&mut self, scope: usize) -> Result<Vec<usize>, CompositorError> {
        let count = self.flat.scopes[scope].members.len();
        let order = loop {
            let deps = self.scope_edges(scope);
            let mut indegree = vec![0usize; count];
            let mut successors: Vec<Vec<usize>> = vec![Vec::new(); count];
            for &(_, from, to) in &deps {
                indegree[to] += 1;
                successors[from].push(to);
            }

            let mut ready: BTreeSet<usize> = (0..count).filter(|m| indegree[*m] == 0).collect();
            let mut order = Vec::with_capacity(count);
            while let Some(m) = ready.pop_first() {
                order.push(m);
                for &next in &successors[m] {
                    indegree[next] -= 1;
                    if indegree[next] == 0 {
                        ready.insert(next);
                    }
                }
            }
            if order.len() == count {
                break order;
            }

            let blocked: Vec<usize> = (0..count).filter(|m| indegree[*m] > 0).collect();
            if !self.demote_cycle_edges(&deps, &blocked) {
                let members = &self.flat.scopes[scope].members;
                return Err(CompositorError::CyclicGraph(
                    blocked.iter().map(|m| members[*m].qualified.clone()).collect(),
                ));
            }
        };

        let mut leaves = Vec::new();
        for m in order {
            match self.flat.scopes[scope].members[m].unit {
                Unit::Leaf(leaf) => leaves.push(leaf),
                Unit::Group(inner) => leaves.extend(self.order_scope(inner)?),
            }
        }
        Ok(leaves)
    }

    /// Turns `keep_last_frame` reads that sit on a cycle into delayed reads.
    fn demote_cycle_edges(&mut self, deps: &[(usize, usize, usize)], blocked: &[usize]) -> bool {
        let in_blocked = |m: usize| blocked.contains(&m);
        let reaches = |start: usize, goal: usize| {
            let mut seen = vec![start];
            let mut stack = vec![start];
            while let Some(m) = stack.pop() {
                if m == goal {
                    return true;
                }
                for &(_, from, to) in deps {
                    if from == m && in_blocked(to) && !seen.contains(&to) {
                        seen.push(to);
                        stack.push(to);
                    }
                }
            }
            false
        };

        let on_cycle: Vec<usize> = deps
            .iter()
            .filter(|(e, from, to)| {
                self.edges[*e].soft && in_blocked(*from) && in_blocked(*to) && reaches(*to, *from)
            })
            .map(|(e, _, _)| *e)
            .collect();

        for &e in &on_cycle {
            let edge = &mut self.edges[e];
            edge.delayed = true;
            debug!(
                "schedule: {} reads {} from the previous frame to break a cycle",
                self.flat.leaf_member(edge.to).qualified,
                self.flat.leaf_member(edge.from).qualified
            );
        }
        !on_cycle.is_empty()
    }
}

// ── plan ──────────────────────────────────────────────────────────────────

/// Resolves links and computes the execution order for `nodes`.
pub fn build_plan<B: Backend>(nodes: &[Node<B>]) -> Result<ExecutionPlan, CompositorError> {
    let flat = Flat::build(nodes)?;
    flat.check_group_links()?;

    let mut pins_per_leaf: Vec<Vec<(String, Option<(usize, usize)>)>> = Vec::with_capacity(flat.leaves.len());
    let mut edges = Vec::new();

    for leaf in 0..flat.leaves.len() {
        let l = &flat.leaves[leaf];
        let member = flat.leaf_member(leaf);
        let mut pins = Vec::new();

        for (pin, source) in flat.leaf_pins(leaf) {
            if !member.node.accepts_input(&pin) {
                warn!("{}: input {pin:?} is not used by the program, skipping", member.qualified);
                continue;
            }
            let producer = flat.resolve_input(l.scope, l.member, &pin, source.as_ref(), &member.qualified)?;
            if let Some((from, output)) = producer {
                let desc = &flat.leaf_member(from).node.outputs()[output].desc;
                let delayed = desc.output_last_frame || (from == leaf && desc.keep_last_frame);
                edges.push(Edge {
                    from,
                    output,
                    to: leaf,
                    input: pins.len(),
                    delayed,
                    soft: desc.keep_last_frame,
                });
            }
            pins.push((pin, producer));
        }
        pins_per_leaf.push(pins);
    }

    let mut sorter = Sorter { flat: &flat, edges };
    let order = sorter.order_scope(0)?;
    let edges = sorter.edges;

    let mut step_of = vec![0usize; flat.leaves.len()];
    for (step, leaf) in order.iter().enumerate() {
        step_of[*leaf] = step;
    }

    let mut steps: Vec<Step> = order
        .iter()
        .map(|&leaf| {
            let member = flat.leaf_member(leaf);
            Step {
                path: flat.leaves[leaf].path.clone(),
                name: member.qualified.clone(),
                inputs: Vec::new(),
                consumers: vec![0; member.node.outputs().len()],
                is_source: matches!(member.node.kind(), NodeKind::Texture(_)),
            }
        })
        .collect();

    let delayed: HashMap<(usize, usize), bool> = edges.iter().map(|e| ((e.to, e.input), e.delayed)).collect();
    for (leaf, pins) in pins_per_leaf.into_iter().enumerate() {
        let step = step_of[leaf];
        for (index, (pin, producer)) in pins.into_iter().enumerate() {
            let source = producer.map(|(from, output)| Source {
                step: step_of[from],
                output,
                delayed: delayed.get(&(leaf, index)).copied().unwrap_or(false),
            });
            if let Some(src) = source.filter(|s| !s.delayed) {
                steps[src.step].consumers[src.output] += 1;
            }
            steps[step].inputs.push(ResolvedInput { pin, source });
        }
    }

    debug!(
        "schedule: {} steps: {}",
        steps.len(),
        steps.iter().map(|s| s.name.as_str()).collect::<Vec<_>>().join(", ")
    );
    Ok(ExecutionPlan { steps })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compositor::headless::{HeadlessBackend, HeadlessScene};
    use crate::compositor::node::{GroupNode, OutputDesc};
    use crate::compositor::texture::TextureParams;

    type N = Node<HeadlessBackend>;

    fn out() -> OutputDesc {
        OutputDesc::new(TextureParams::viewport())
    }

    fn filter(name: &str) -> N {
        Node::filter(name, "").with_output("out", out())
    }

    fn order(nodes: &[N]) -> Vec<String> {
        build_plan(nodes).unwrap().order().map(str::to_string).collect()
    }

    #[test]
    fn producers_run_first() {
        let nodes = vec![
            filter("c").with_input("src", "b"),
            filter("b").with_input("src", "a.out"),
            Node::scene("a", HeadlessScene::new("a")).with_output("out", out()),
        ];
        assert_eq!(order(&nodes), ["a", "b", "c"]);
    }

    #[test]
    fn ties_follow_insertion_order() {
        let nodes = vec![filter("z"), filter("m"), filter("a"), filter("sink").with_input("x", "a").with_input("y", "z")];
        assert_eq!(order(&nodes), ["z", "m", "a", "sink"]);
    }

    #[test]
    fn dotted_names_resolve_whole_first() {
        let nodes = vec![filter("pass.1"), filter("sink").with_input("x", "pass.1")];
        let plan = build_plan(&nodes).unwrap();
        let src = plan.steps()[1].inputs[0].source.unwrap();
        assert_eq!((src.step, src.output), (0, 0));
    }

    #[test]
    fn unresolved_link_is_an_error() {
        let nodes = vec![filter("sink").with_input("x", "missing.out")];
        let err = build_plan(&nodes).unwrap_err();
        assert!(matches!(err, CompositorError::UnresolvedLink { ref target, .. } if target == "missing.out"));

        let nodes = vec![filter("a"), filter("sink").with_input("x", "a.nope")];
        assert!(build_plan(&nodes).is_err());
    }

    #[test]
    fn cycle_without_feedback_is_an_error() {
        let nodes = vec![filter("a").with_input("x", "b"), filter("b").with_input("x", "a")];
        match build_plan(&nodes).unwrap_err() {
            CompositorError::CyclicGraph(names) => assert_eq!(names, ["a", "b"]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn keep_last_frame_self_link_is_delayed() {
        let nodes: Vec<N> = vec![Node::filter("acc", "")
            .with_output("out", out().keep_last_frame())
            .with_input("prev", "acc.out")];
        let plan = build_plan(&nodes).unwrap();
        assert!(plan.steps()[0].inputs[0].source.unwrap().delayed);
        assert_eq!(plan.steps()[0].consumers, [0]);
    }

    #[test]
    fn keep_last_frame_breaks_longer_cycles() {
        let nodes = vec![
            Node::filter("a", "").with_output("out", out().keep_last_frame()).with_input("x", "b"),
            filter("b").with_input("x", "a"),
        ];
        let plan = build_plan(&nodes).unwrap();
        let order: Vec<_> = plan.order().collect();
        assert_eq!(order, ["b", "a"]);
        // b reads a's kept texture from the previous frame; a reads b live.
        assert!(plan.steps()[0].inputs[0].source.unwrap().delayed);
        assert!(!plan.steps()[1].inputs[0].source.unwrap().delayed);
    }

    #[test]
    fn output_last_frame_imposes_no_order() {
        let nodes = vec![
            filter("reader").with_input("x", "writer"),
            Node::filter("writer", "").with_output("out", out().output_last_frame()),
        ];
        assert_eq!(order(&nodes), ["reader", "writer"]);
    }

    #[test]
    fn groups_are_spliced_in_place() {
        let group = GroupNode::new()
            .with_node(filter("blur_h"), &[("src", "tex")], &[])
            .with_node(filter("blur_v").with_input("tex", "blur_h"), &[], &[("out", "out")]);
        let nodes = vec![
            filter("tail").with_input("x", "bloom.out"),
            Node::group("bloom", group).with_input("src", "head"),
            filter("head"),
            filter("free"),
        ];
        let plan = build_plan(&nodes).unwrap();
        let order: Vec<_> = plan.order().collect();
        assert_eq!(order, ["head", "bloom/blur_h", "bloom/blur_v", "tail", "free"]);

        let blur_h = &plan.steps()[1];
        assert_eq!(blur_h.inputs[0].pin, "tex");
        assert_eq!(blur_h.inputs[0].source.unwrap().step, 0);
        assert_eq!(plan.steps()[3].inputs[0].source.unwrap().step, 2);
    }

    #[test]
    fn unbound_group_input_reads_fallback() {
        let group = GroupNode::new().with_node(filter("inner"), &[("src", "tex")], &[("out", "out")]);
        let nodes = vec![Node::group("g", group)];
        let plan = build_plan(&nodes).unwrap();
        assert_eq!(plan.steps()[0].inputs[0].source, None);
    }

    #[test]
    fn group_links_must_reach_existing_children() {
        let unresolved = |nodes: &[N]| matches!(build_plan(nodes), Err(CompositorError::UnresolvedLink { .. }));

        let mut group = GroupNode::new().with_node(filter("bright"), &[], &[("out", "out")]);
        group.link_input("src", "brigth", "tDiffuse");
        let nodes = vec![filter("scene"), Node::group("bloom", group).with_input("src", "scene")];
        assert!(unresolved(&nodes));

        let mut group = GroupNode::new().with_node(filter("bright"), &[("src", "tDiffuse")], &[]);
        group.link_output("out", "ghost", "color");
        let nodes = vec![filter("scene"), Node::group("bloom", group).with_input("src", "scene")];
        assert!(unresolved(&nodes));

        let group = GroupNode::new().with_node(filter("bright"), &[("src", "tDiffuse")], &[("out", "nope")]);
        let nodes = vec![filter("scene"), Node::group("bloom", group).with_input("src", "scene")];
        assert!(unresolved(&nodes));
    }

    #[test]
    fn group_bindings_must_resolve() {
        let group = || GroupNode::new().with_node(filter("bright"), &[("src", "tDiffuse")], &[("out", "out")]);

        let nodes = vec![Node::group("bloom", group()).with_input("src", "ghost.color")];
        match build_plan(&nodes).unwrap_err() {
            CompositorError::UnresolvedLink { consumer, target, .. } => {
                assert_eq!(consumer, "bloom");
                assert_eq!(target, "ghost.color");
            }
            other => panic!("unexpected {other:?}"),
        }

        let nodes = vec![filter("scene"), Node::group("bloom", group()).with_input("glow", "scene")];
        assert!(matches!(build_plan(&nodes), Err(CompositorError::UnknownPin { ref pin, .. }) if pin == "glow"));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let nodes = vec![filter("a"), filter("a")];
        assert!(matches!(build_plan(&nodes), Err(CompositorError::DuplicateNode(_))));
    }

    #[test]
    fn consumer_counts() {
        let nodes = vec![filter("a"), filter("b").with_input("x", "a"), filter("c").with_input("x", "a").with_input("y", "a")];
        let plan = build_plan(&nodes).unwrap();
        assert_eq!(plan.steps()[0].consumers, [3]);
        assert_eq!(plan.steps()[2].consumers, [0]);
    }
}
