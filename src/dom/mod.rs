//! Arena mirror of the host page.
//!
//! The host adapter owns the real document and replays structural changes
//! into this tree; detection and identity resolution only ever read from it.

use std::collections::{BTreeMap, HashMap};

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

pub mod pattern;

pub use pattern::ElementPattern;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub usize);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Viewport-relative bounding box, as reported by the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub top: f64,
    pub left: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(top: f64, left: f64, width: f64, height: f64) -> Self {
        Self {
            top,
            left,
            width,
            height,
        }
    }

    pub fn is_visible(&self) -> bool {
        self.width > 0.0 && self.height > 0.0
    }

    /// Height over width; zero for an empty box.
    pub fn aspect_ratio(&self) -> f64 {
        if self.width > 0.0 {
            self.height / self.width
        } else {
            0.0
        }
    }
}

/// Element description as sent by the host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ElementSpec {
    pub tag: String,
    #[serde(default)]
    pub attrs: BTreeMap<String, String>,
    #[serde(default)]
    pub rect: Rect,
}

impl ElementSpec {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Self::default()
        }
    }

    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.insert(name.into(), value.into());
        self
    }

    pub fn rect(mut self, rect: Rect) -> Self {
        self.rect = rect;
        self
    }
}

#[derive(Debug, Clone)]
pub struct Element {
    pub tag: String,
    pub attrs: BTreeMap<String, String>,
    pub rect: Rect,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl Element {
    fn from_spec(spec: ElementSpec, parent: Option<NodeId>) -> Self {
        Self {
            tag: spec.tag,
            attrs: spec.attrs,
            rect: spec.rect,
            parent,
            children: Vec::new(),
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attrs.contains_key(name)
    }

    pub fn is_tag(&self, tag: &str) -> bool {
        self.tag.eq_ignore_ascii_case(tag)
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.attr("class")
            .map(|classes| classes.split_whitespace().any(|c| c == class))
            .unwrap_or(false)
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }
}

/// The mirrored document. `NodeId(0)` is the root (`body`). Only attached
/// elements are kept: removing a subtree frees it, and ids are never reused.
#[derive(Debug, Clone)]
pub struct Document {
    nodes: HashMap<NodeId, Element>,
    next_id: usize,
    hidden: bool,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub fn new() -> Self {
        let root = Element::from_spec(ElementSpec::new("body"), None);
        Self {
            nodes: HashMap::from([(NodeId(0), root)]),
            next_id: 1,
            hidden: false,
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    pub fn set_hidden(&mut self, hidden: bool) {
        self.hidden = hidden;
    }

    /// Attached elements, root included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    fn node_mut(&mut self, node: NodeId) -> Result<&mut Element> {
        self.nodes
            .get_mut(&node)
            .ok_or_else(|| anyhow!("unknown node {node}"))
    }

    /// Append `spec` as the last child of `parent`.
    pub fn insert(&mut self, parent: NodeId, spec: ElementSpec) -> Result<NodeId> {
        let id = NodeId(self.next_id);
        self.nodes
            .get_mut(&parent)
            .ok_or_else(|| anyhow!("unknown parent node {parent}"))?
            .children
            .push(id);
        self.next_id += 1;
        self.nodes.insert(id, Element::from_spec(spec, Some(parent)));
        Ok(id)
    }

    /// Drop `node` and its subtree. Returns the dropped ids in document order.
    pub fn remove(&mut self, node: NodeId) -> Result<Vec<NodeId>> {
        if node == self.root() {
            return Err(anyhow!("cannot remove the document root"));
        }
        let parent = self
            .element(node)
            .ok_or_else(|| anyhow!("unknown node {node}"))?
            .parent;

        let detached = self.descendants(node);
        if let Some(parent) = parent.and_then(|p| self.nodes.get_mut(&p)) {
            parent.children.retain(|child| *child != node);
        }
        for id in &detached {
            self.nodes.remove(id);
        }
        Ok(detached)
    }

    pub fn set_rect(&mut self, node: NodeId, rect: Rect) -> Result<()> {
        self.node_mut(node)?.rect = rect;
        Ok(())
    }

    pub fn set_attr(&mut self, node: NodeId, name: &str, value: &str) -> Result<()> {
        self.node_mut(node)?
            .attrs
            .insert(name.to_string(), value.to_string());
        Ok(())
    }

    pub fn element(&self, node: NodeId) -> Option<&Element> {
        self.nodes.get(&node)
    }

    pub fn is_attached(&self, node: NodeId) -> bool {
        self.nodes.contains_key(&node)
    }

    /// Strict ancestors of `node`, nearest first.
    pub fn ancestors(&self, node: NodeId) -> Ancestors<'_> {
        Ancestors {
            doc: self,
            next: self.element(node).and_then(Element::parent),
        }
    }

    /// `node` followed by its ancestors, nearest first (the `closest` walk).
    pub fn self_and_ancestors(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        let start = self.element(node).map(|_| node);
        start.into_iter().chain(self.ancestors(node))
    }

    pub fn closest(&self, node: NodeId, pattern: &ElementPattern) -> Option<NodeId> {
        self.self_and_ancestors(node)
            .find(|id| self.element(*id).map(|e| pattern.matches(e)).unwrap_or(false))
    }

    /// `node` and everything below it, in document order.
    pub fn descendants(&self, node: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        if self.element(node).is_none() {
            return out;
        }
        let mut stack = vec![node];
        while let Some(id) = stack.pop() {
            out.push(id);
            if let Some(element) = self.element(id) {
                stack.extend(element.children.iter().rev().copied());
            }
        }
        out
    }

    /// Elements under (and including) `node` matching `pattern`.
    pub fn query_all(&self, node: NodeId, pattern: &ElementPattern) -> Vec<NodeId> {
        self.descendants(node)
            .into_iter()
            .filter(|id| self.element(*id).map(|e| pattern.matches(e)).unwrap_or(false))
            .collect()
    }
}

pub struct Ancestors<'a> {
    doc: &'a Document,
    next: Option<NodeId>,
}

impl Iterator for Ancestors<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let current = self.next?;
        self.next = self.doc.element(current).and_then(Element::parent);
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (Document, NodeId, NodeId, NodeId) {
        let mut doc = Document::new();
        let article = doc.insert(doc.root(), ElementSpec::new("article")).unwrap();
        let wrapper = doc
            .insert(article, ElementSpec::new("div").attr("class", "x1lliihq other"))
            .unwrap();
        let video = doc
            .insert(
                wrapper,
                ElementSpec::new("video").rect(Rect::new(0.0, 0.0, 360.0, 640.0)),
            )
            .unwrap();
        (doc, article, wrapper, video)
    }

    #[test]
    fn closest_includes_self_and_walks_up() {
        let (doc, article, wrapper, video) = sample();
        assert_eq!(doc.closest(video, &ElementPattern::Tag("video")), Some(video));
        assert_eq!(doc.closest(video, &ElementPattern::Tag("article")), Some(article));
        assert_eq!(doc.closest(video, &ElementPattern::Class("x1lliihq")), Some(wrapper));
        assert_eq!(doc.closest(video, &ElementPattern::Tag("section")), None);
    }

    #[test]
    fn descendants_are_in_document_order() {
        let (mut doc, article, wrapper, video) = sample();
        let sibling = doc.insert(article, ElementSpec::new("a")).unwrap();
        assert_eq!(doc.descendants(article), vec![article, wrapper, video, sibling]);
    }

    #[test]
    fn remove_detaches_subtree() {
        let (mut doc, article, wrapper, video) = sample();
        let removed = doc.remove(wrapper).unwrap();
        assert_eq!(removed, vec![wrapper, video]);
        assert!(!doc.is_attached(video));
        assert!(doc.is_attached(article));
        assert!(doc.query_all(doc.root(), &ElementPattern::Tag("video")).is_empty());
        assert!(doc.remove(doc.root()).is_err());
    }

    #[test]
    fn removed_subtrees_are_freed_and_ids_not_reused() {
        let mut doc = Document::new();
        let root = doc.root();
        for _ in 0..50 {
            let article = doc.insert(root, ElementSpec::new("article")).unwrap();
            doc.insert(article, ElementSpec::new("video")).unwrap();
            doc.remove(article).unwrap();
        }
        assert_eq!(doc.len(), 1);
        assert!(doc.is_empty());

        let next = doc.insert(doc.root(), ElementSpec::new("div")).unwrap();
        assert_eq!(next, NodeId(101));
        assert!(doc.insert(NodeId(3), ElementSpec::new("span")).is_err());
        assert!(doc.set_rect(NodeId(3), Rect::default()).is_err());
    }

    #[test]
    fn aspect_ratio_of_empty_rect_is_zero() {
        assert_eq!(Rect::default().aspect_ratio(), 0.0);
        assert!(!Rect::default().is_visible());
        assert!((Rect::new(0.0, 0.0, 100.0, 180.0).aspect_ratio() - 1.8).abs() < 1e-9);
    }
}
