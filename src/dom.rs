//! Observed document model
//!
//! A small arena-backed element tree mirroring the host page. The host
//! integration applies its renders here; the engine reads and redacts it.
//! Child insertions into the attached tree are journaled while observation
//! is connected, the same way a childList mutation observer batches them.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

#[derive(Debug, Clone, Default)]
struct Node {
    tag: String,
    classes: BTreeSet<String>,
    attrs: BTreeMap<String, String>,
    text: String,
    children: Vec<NodeId>,
    parent: Option<NodeId>,
}

/// Serializable element tree, used for page snapshots
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElementSpec {
    pub tag: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub classes: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub attrs: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub text: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ElementSpec>,
}

impl ElementSpec {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            ..Self::default()
        }
    }

    pub fn class(mut self, class: &str) -> Self {
        self.classes.push(class.to_string());
        self
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.insert(name.to_string(), value.to_string());
        self
    }

    pub fn text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }

    pub fn child(mut self, child: ElementSpec) -> Self {
        self.children.push(child);
        self
    }
}

#[derive(Debug)]
pub struct Document {
    /// Removed nodes leave a `None` slot so ids are never reused
    nodes: Vec<Option<Node>>,
    body: NodeId,
    observing: bool,
    journal: Vec<NodeId>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub fn new() -> Self {
        let body = Node {
            tag: "body".to_string(),
            ..Node::default()
        };
        Self {
            nodes: vec![Some(body)],
            body: NodeId(0),
            observing: false,
            journal: Vec::new(),
        }
    }

    pub fn body(&self) -> NodeId {
        self.body
    }

    fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0).and_then(Option::as_ref)
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.0).and_then(Option::as_mut)
    }

    /// Create a detached element
    pub fn create_element(&mut self, tag: &str) -> NodeId {
        self.nodes.push(Some(Node {
            tag: tag.to_string(),
            ..Node::default()
        }));
        NodeId(self.nodes.len() - 1)
    }

    /// Build a detached subtree from a spec
    pub fn build(&mut self, spec: &ElementSpec) -> NodeId {
        let id = self.create_element(&spec.tag);
        if let Some(node) = self.node_mut(id) {
            node.classes = spec.classes.iter().cloned().collect();
            node.attrs = spec.attrs.clone();
            node.text = spec.text.clone();
        }
        for child in &spec.children {
            let child_id = self.build(child);
            self.link(id, child_id);
        }
        id
    }

    /// Build `spec` and append it under `parent`
    pub fn insert(&mut self, parent: NodeId, spec: &ElementSpec) -> NodeId {
        let id = self.build(spec);
        self.append_child(parent, id);
        id
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        if self.node(parent).is_none() || self.node(child).is_none() {
            return;
        }
        self.detach(child);
        self.link(parent, child);
        if self.observing && self.is_attached(child) {
            self.journal.push(child);
        }
    }

    fn link(&mut self, parent: NodeId, child: NodeId) {
        if let Some(node) = self.node_mut(child) {
            node.parent = Some(parent);
        }
        if let Some(node) = self.node_mut(parent) {
            node.children.push(child);
        }
    }

    fn detach(&mut self, child: NodeId) {
        let Some(parent) = self.node(child).and_then(|n| n.parent) else {
            return;
        };
        if let Some(node) = self.node_mut(parent) {
            node.children.retain(|c| *c != child);
        }
        if let Some(node) = self.node_mut(child) {
            node.parent = None;
        }
    }

    /// Remove a subtree from the document; its ids become dead
    pub fn remove(&mut self, id: NodeId) {
        if id == self.body {
            return;
        }
        self.detach(id);
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.get_mut(current.0).and_then(Option::take) {
                stack.extend(node.children);
            }
        }
    }

    /// Remove every child of `parent`
    pub fn clear_children(&mut self, parent: NodeId) {
        let children = self.children(parent);
        for child in children {
            self.remove(child);
        }
    }

    pub fn exists(&self, id: NodeId) -> bool {
        self.node(id).is_some()
    }

    /// Connected to `body` through its ancestors
    pub fn is_attached(&self, id: NodeId) -> bool {
        let mut current = Some(id);
        while let Some(node_id) = current {
            if node_id == self.body {
                return true;
            }
            current = self.node(node_id).and_then(|n| n.parent);
        }
        false
    }

    pub fn tag(&self, id: NodeId) -> Option<&str> {
        self.node(id).map(|n| n.tag.as_str())
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).and_then(|n| n.parent)
    }

    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.node(id).map(|n| n.children.clone()).unwrap_or_default()
    }

    pub fn has_class(&self, id: NodeId, class: &str) -> bool {
        self.node(id).is_some_and(|n| n.classes.contains(class))
    }

    pub fn add_class(&mut self, id: NodeId, class: &str) {
        if let Some(node) = self.node_mut(id) {
            node.classes.insert(class.to_string());
        }
    }

    pub fn remove_class(&mut self, id: NodeId, class: &str) {
        if let Some(node) = self.node_mut(id) {
            node.classes.remove(class);
        }
    }

    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        self.node(id)
            .and_then(|n| n.attrs.get(name))
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn set_attr(&mut self, id: NodeId, name: &str, value: &str) {
        if let Some(node) = self.node_mut(id) {
            node.attrs.insert(name.to_string(), value.to_string());
        }
    }

    pub fn remove_attr(&mut self, id: NodeId, name: &str) {
        if let Some(node) = self.node_mut(id) {
            node.attrs.remove(name);
        }
    }

    /// Own text of the element
    pub fn text(&self, id: NodeId) -> &str {
        self.node(id).map(|n| n.text.as_str()).unwrap_or("")
    }

    pub fn set_text(&mut self, id: NodeId, text: &str) {
        if let Some(node) = self.node_mut(id) {
            node.text = text.to_string();
        }
    }

    /// Concatenated text of the element and its subtree
    pub fn text_content(&self, id: NodeId) -> String {
        let mut parts = Vec::new();
        for node_id in std::iter::once(id).chain(self.descendants(id)) {
            let text = self.text(node_id).trim();
            if !text.is_empty() {
                parts.push(text.to_string());
            }
        }
        parts.join(" ")
    }

    /// Pre-order descendants, excluding `id`
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(id).into_iter().rev().collect();
        while let Some(current) = stack.pop() {
            out.push(current);
            stack.extend(self.children(current).into_iter().rev());
        }
        out
    }

    /// Descendants of `scope` carrying `class`
    pub fn find_all_by_class(&self, scope: NodeId, class: &str) -> Vec<NodeId> {
        self.descendants(scope)
            .into_iter()
            .filter(|id| self.has_class(*id, class))
            .collect()
    }

    pub fn find_by_class(&self, scope: NodeId, class: &str) -> Option<NodeId> {
        self.descendants(scope)
            .into_iter()
            .find(|id| self.has_class(*id, class))
    }

    /// `id` itself or its nearest ancestor matching `pred`
    pub fn closest(&self, id: NodeId, pred: impl Fn(&Document, NodeId) -> bool) -> Option<NodeId> {
        let mut current = Some(id);
        while let Some(node_id) = current {
            if pred(self, node_id) {
                return Some(node_id);
            }
            current = self.parent(node_id);
        }
        None
    }

    /// Start or stop journaling insertions
    pub fn set_observing(&mut self, observing: bool) {
        self.observing = observing;
        if !observing {
            self.journal.clear();
        }
    }

    pub fn is_observing(&self) -> bool {
        self.observing
    }

    /// Drain the insertion journal, skipping nodes removed since
    pub fn take_mutations(&mut self) -> Vec<NodeId> {
        let journal = std::mem::take(&mut self.journal);
        journal.into_iter().filter(|id| self.is_attached(*id)).collect()
    }

    pub fn has_pending_mutations(&self) -> bool {
        !self.journal.is_empty()
    }

    /// Serialize a subtree back to a spec
    pub fn to_spec(&self, id: NodeId) -> ElementSpec {
        let Some(node) = self.node(id) else {
            return ElementSpec::default();
        };
        ElementSpec {
            tag: node.tag.clone(),
            classes: node.classes.iter().cloned().collect(),
            attrs: node.attrs.clone(),
            text: node.text.clone(),
            children: node.children.iter().map(|c| self.to_spec(*c)).collect(),
        }
    }
}
