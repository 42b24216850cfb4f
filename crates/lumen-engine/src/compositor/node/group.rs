use super::Node;
use crate::compositor::backend::Backend;

/// Group input `group_input` feeds the child input `node`.`pin`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupInputLink {
    pub group_input: String,
    pub node: String,
    pub pin: String,
}

/// Group output `group_output` exposes the child output `node`.`pin`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupOutputLink {
    pub group_output: String,
    pub node: String,
    pub pin: String,
}

/// A nested graph. Its children are scheduled together and spliced into the
/// parent's order where the group sits.
pub struct GroupNode<B: Backend> {
    nodes: Vec<Node<B>>,
    input_links: Vec<GroupInputLink>,
    output_links: Vec<GroupOutputLink>,
}

impl<B: Backend> Default for GroupNode<B> {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            input_links: Vec::new(),
            output_links: Vec::new(),
        }
    }
}

impl<B: Backend> GroupNode<B> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a child.
    ///
    /// `links_to_input` pairs are `(group_input, child_input_pin)`;
    /// `links_to_output` pairs are `(group_output, child_output_pin)`.
    /// A child with the same name is replaced along with its links and
    /// returned, so the caller can release what it kept.
    pub fn add_node(
        &mut self,
        node: Node<B>,
        links_to_input: &[(&str, &str)],
        links_to_output: &[(&str, &str)],
    ) -> Option<Node<B>> {
        let name = node.name().to_string();
        let replaced = self.remove_node(&name);
        for (group_input, pin) in links_to_input {
            self.input_links.push(GroupInputLink {
                group_input: (*group_input).to_string(),
                node: name.clone(),
                pin: (*pin).to_string(),
            });
        }
        for (group_output, pin) in links_to_output {
            self.output_links.push(GroupOutputLink {
                group_output: (*group_output).to_string(),
                node: name.clone(),
                pin: (*pin).to_string(),
            });
        }
        self.nodes.push(node);
        replaced
    }

    pub fn with_node(mut self, node: Node<B>, links_to_input: &[(&str, &str)], links_to_output: &[(&str, &str)]) -> Self {
        // Fresh groups have nothing rendered to release.
        let _ = self.add_node(node, links_to_input, links_to_output);
        self
    }

    /// Routes group input `group_input` to the child input `node`.`pin`.
    pub fn link_input(&mut self, group_input: impl Into<String>, node: impl Into<String>, pin: impl Into<String>) {
        self.input_links.push(GroupInputLink {
            group_input: group_input.into(),
            node: node.into(),
            pin: pin.into(),
        });
    }

    /// Exposes the child output `node`.`pin` as `group_output`.
    pub fn link_output(&mut self, group_output: impl Into<String>, node: impl Into<String>, pin: impl Into<String>) {
        self.output_links.push(GroupOutputLink {
            group_output: group_output.into(),
            node: node.into(),
            pin: pin.into(),
        });
    }

    /// Removes a child and every link touching it.
    pub fn remove_node(&mut self, name: &str) -> Option<Node<B>> {
        let index = self.nodes.iter().position(|n| n.name() == name)?;
        self.input_links.retain(|l| l.node != name);
        self.output_links.retain(|l| l.node != name);
        Some(self.nodes.remove(index))
    }

    pub fn node(&self, name: &str) -> Option<&Node<B>> {
        self.nodes.iter().find(|n| n.name() == name)
    }

    pub fn node_mut(&mut self, name: &str) -> Option<&mut Node<B>> {
        self.nodes.iter_mut().find(|n| n.name() == name)
    }

    pub fn nodes(&self) -> &[Node<B>] {
        &self.nodes
    }

    pub(crate) fn nodes_mut(&mut self) -> &mut [Node<B>] {
        &mut self.nodes
    }

    pub fn input_links(&self) -> &[GroupInputLink] {
        &self.input_links
    }

    pub fn output_links(&self) -> &[GroupOutputLink] {
        &self.output_links
    }

    /// The group input feeding `node`.`pin`, if any.
    pub(crate) fn input_link_for(&self, node: &str, pin: &str) -> Option<&GroupInputLink> {
        self.input_links.iter().find(|l| l.node == node && l.pin == pin)
    }

    /// The output link for `pin`, or the first one when `pin` is `None`.
    pub(crate) fn output_link(&self, pin: Option<&str>) -> Option<&GroupOutputLink> {
        match pin {
            Some(pin) => self.output_links.iter().find(|l| l.group_output == pin),
            None => self.output_links.first(),
        }
    }
}
