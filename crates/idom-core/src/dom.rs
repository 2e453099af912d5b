//! The DOM collaborator.
//!
//! The engine never touches a concrete document; it goes through [`Dom`].
//! [`MemoryDom`] is an arena-backed implementation used by tests, benches and
//! headless hosts.

use std::any::Any;
use std::fmt::Write as _;
use std::rc::Rc;

use crate::call::{Event, Listener};

pub type NodeId = usize;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomError {
    #[error("node {id} missing")]
    Missing { id: NodeId },
    #[error("node {child} is not a child of node {parent}")]
    NotAChild { parent: NodeId, child: NodeId },
    #[error("node {id} is not an element")]
    NotAnElement { id: NodeId },
}

pub trait Dom: Any {
    fn create_element(&mut self, tag: &str) -> NodeId;
    fn create_text(&mut self, text: &str) -> NodeId;
    fn set_text(&mut self, node: NodeId, text: &str) -> Result<(), DomError>;
    fn text(&self, node: NodeId) -> Option<String>;
    fn set_attribute(&mut self, node: NodeId, name: &str, value: &str) -> Result<(), DomError>;
    fn remove_attribute(&mut self, node: NodeId, name: &str) -> Result<(), DomError>;
    fn attribute(&self, node: NodeId, name: &str) -> Option<String>;

    /// Inserts `child` before `reference` (or appends when `None`). A child
    /// that is already attached somewhere is moved.
    fn insert_before(
        &mut self,
        parent: NodeId,
        child: NodeId,
        reference: Option<NodeId>,
    ) -> Result<(), DomError>;
    fn remove_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), DomError>;

    fn contains(&self, node: NodeId) -> bool;
    fn tag(&self, node: NodeId) -> Option<&str>;
    fn parent(&self, node: NodeId) -> Option<NodeId>;
    fn first_child(&self, node: NodeId) -> Option<NodeId>;
    fn next_sibling(&self, node: NodeId) -> Option<NodeId>;

    fn add_event_listener(
        &mut self,
        node: NodeId,
        event_type: &str,
        listener: &Listener,
    ) -> Result<(), DomError>;
    fn remove_event_listener(
        &mut self,
        node: NodeId,
        event_type: &str,
        listener: &Listener,
    ) -> Result<(), DomError>;
    fn listeners(&self, node: NodeId, event_type: &str) -> Vec<Listener>;

    /// Frees a node that the engine no longer references.
    fn release(&mut self, _node: NodeId) -> Result<(), DomError> {
        Ok(())
    }

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;

    fn children(&self, node: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut child = self.first_child(node);
        while let Some(id) = child {
            out.push(id);
            child = self.next_sibling(id);
        }
        out
    }
}

/// Counters kept by [`MemoryDom`] so tests can assert on native traffic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DomStats {
    pub elements_created: usize,
    pub texts_created: usize,
    pub listeners_attached: usize,
    pub listeners_detached: usize,
    pub nodes_removed: usize,
    pub attributes_set: usize,
    pub attributes_removed: usize,
}

enum DomNodeKind {
    Element {
        tag: Rc<str>,
        attributes: Vec<(String, String)>,
        listeners: Vec<(String, Listener)>,
    },
    Text(String),
}

struct DomNode {
    kind: DomNodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

#[derive(Default)]
pub struct MemoryDom {
    nodes: Vec<Option<DomNode>>,
    stats: DomStats,
}

impl MemoryDom {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> DomStats {
        self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = DomStats::default();
    }

    pub fn len(&self) -> usize {
        self.nodes.iter().filter(|node| node.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn child_ids(&self, node: NodeId) -> Vec<NodeId> {
        self.node(node)
            .map(|node| node.children.clone())
            .unwrap_or_default()
    }

    pub fn listener_count(&self, node: NodeId) -> usize {
        match self.node(node).map(|node| &node.kind) {
            Some(DomNodeKind::Element { listeners, .. }) => listeners.len(),
            _ => 0,
        }
    }

    /// Serialises the subtree under `root` as compact markup.
    pub fn to_html(&self, root: NodeId) -> String {
        let mut output = String::new();
        self.write_html(&mut output, root);
        output
    }

    fn write_html(&self, output: &mut String, id: NodeId) {
        let Some(node) = self.node(id) else {
            return;
        };
        match &node.kind {
            DomNodeKind::Text(text) => push_escaped(output, text),
            DomNodeKind::Element {
                tag, attributes, ..
            } => {
                let _ = write!(output, "<{tag}");
                for (name, value) in attributes {
                    if value.is_empty() {
                        let _ = write!(output, " {name}");
                    } else {
                        let _ = write!(output, " {name}=\"");
                        push_escaped(output, value);
                        output.push('"');
                    }
                }
                output.push('>');
                for child in &node.children {
                    self.write_html(output, *child);
                }
                let _ = write!(output, "</{tag}>");
            }
        }
    }

    /// Indented listing of the subtree under `root`, one node per line.
    pub fn dump_tree(&self, root: Option<NodeId>) -> String {
        let mut output = String::new();
        if let Some(root_id) = root {
            self.dump_node(&mut output, root_id, 0);
        } else {
            output.push_str("(no root)\n");
        }
        output
    }

    fn dump_node(&self, output: &mut String, id: NodeId, depth: usize) {
        let indent = "  ".repeat(depth);
        match self.node(id) {
            Some(node) => {
                match &node.kind {
                    DomNodeKind::Element { tag, .. } => {
                        let _ = writeln!(output, "{indent}[{id}] <{tag}>");
                    }
                    DomNodeKind::Text(text) => {
                        let _ = writeln!(output, "{indent}[{id}] {text:?}");
                    }
                }
                for child in &node.children {
                    self.dump_node(output, *child, depth + 1);
                }
            }
            None => {
                let _ = writeln!(output, "{indent}[{id}] (missing)");
            }
        }
    }

    /// Invokes every listener registered for `event_type` on `node`.
    pub fn dispatch(&self, node: NodeId, event_type: &str) -> usize {
        let listeners = self.listeners(node, event_type);
        let event = Event {
            event_type: Rc::from(event_type),
            target: node,
        };
        for listener in &listeners {
            listener.call(&event);
        }
        listeners.len()
    }

    fn node(&self, id: NodeId) -> Option<&DomNode> {
        self.nodes.get(id).and_then(|slot| slot.as_ref())
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut DomNode, DomError> {
        self.nodes
            .get_mut(id)
            .and_then(|slot| slot.as_mut())
            .ok_or(DomError::Missing { id })
    }

    fn push(&mut self, kind: DomNodeKind) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(Some(DomNode {
            kind,
            parent: None,
            children: Vec::new(),
        }));
        id
    }

    fn detach_from_parent(&mut self, child: NodeId) -> Result<(), DomError> {
        if let Some(parent) = self.node_mut(child)?.parent.take() {
            let parent_node = self.node_mut(parent)?;
            parent_node.children.retain(|&id| id != child);
        }
        Ok(())
    }
}

/// Escapes markup-significant characters for `to_html`.
fn push_escaped(output: &mut String, text: &str) {
    for ch in text.chars() {
        match ch {
            '&' => output.push_str("&amp;"),
            '<' => output.push_str("&lt;"),
            '"' => output.push_str("&quot;"),
            ch => output.push(ch),
        }
    }
}

impl Dom for MemoryDom {
    fn create_element(&mut self, tag: &str) -> NodeId {
        self.stats.elements_created += 1;
        self.push(DomNodeKind::Element {
            tag: Rc::from(tag),
            attributes: Vec::new(),
            listeners: Vec::new(),
        })
    }

    fn create_text(&mut self, text: &str) -> NodeId {
        self.stats.texts_created += 1;
        self.push(DomNodeKind::Text(text.to_string()))
    }

    fn set_text(&mut self, node: NodeId, text: &str) -> Result<(), DomError> {
        match &mut self.node_mut(node)?.kind {
            DomNodeKind::Text(current) => {
                *current = text.to_string();
                Ok(())
            }
            DomNodeKind::Element { .. } => Err(DomError::NotAnElement { id: node }),
        }
    }

    fn text(&self, node: NodeId) -> Option<String> {
        match &self.node(node)?.kind {
            DomNodeKind::Text(text) => Some(text.clone()),
            DomNodeKind::Element { .. } => None,
        }
    }

    fn set_attribute(&mut self, node: NodeId, name: &str, value: &str) -> Result<(), DomError> {
        match &mut self.node_mut(node)?.kind {
            DomNodeKind::Element { attributes, .. } => {
                match attributes.iter_mut().find(|(existing, _)| existing == name) {
                    Some((_, current)) => *current = value.to_string(),
                    None => attributes.push((name.to_string(), value.to_string())),
                }
            }
            DomNodeKind::Text(_) => return Err(DomError::NotAnElement { id: node }),
        }
        self.stats.attributes_set += 1;
        Ok(())
    }

    fn remove_attribute(&mut self, node: NodeId, name: &str) -> Result<(), DomError> {
        let removed = match &mut self.node_mut(node)?.kind {
            DomNodeKind::Element { attributes, .. } => {
                let before = attributes.len();
                attributes.retain(|(existing, _)| existing != name);
                attributes.len() < before
            }
            DomNodeKind::Text(_) => return Err(DomError::NotAnElement { id: node }),
        };
        if removed {
            self.stats.attributes_removed += 1;
        }
        Ok(())
    }

    fn attribute(&self, node: NodeId, name: &str) -> Option<String> {
        match &self.node(node)?.kind {
            DomNodeKind::Element { attributes, .. } => attributes
                .iter()
                .find(|(existing, _)| existing == name)
                .map(|(_, value)| value.clone()),
            DomNodeKind::Text(_) => None,
        }
    }

    fn insert_before(
        &mut self,
        parent: NodeId,
        child: NodeId,
        reference: Option<NodeId>,
    ) -> Result<(), DomError> {
        self.node_mut(parent)?;
        self.detach_from_parent(child)?;
        let parent_node = self.node_mut(parent)?;
        let index = match reference {
            Some(reference) => parent_node
                .children
                .iter()
                .position(|&id| id == reference)
                .ok_or(DomError::NotAChild {
                    parent,
                    child: reference,
                })?,
            None => parent_node.children.len(),
        };
        parent_node.children.insert(index, child);
        self.node_mut(child)?.parent = Some(parent);
        Ok(())
    }

    fn remove_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), DomError> {
        let parent_node = self.node_mut(parent)?;
        let index = parent_node
            .children
            .iter()
            .position(|&id| id == child)
            .ok_or(DomError::NotAChild { parent, child })?;
        parent_node.children.remove(index);
        self.node_mut(child)?.parent = None;
        self.stats.nodes_removed += 1;
        Ok(())
    }

    fn contains(&self, node: NodeId) -> bool {
        self.node(node).is_some()
    }

    fn tag(&self, node: NodeId) -> Option<&str> {
        match &self.node(node)?.kind {
            DomNodeKind::Element { tag, .. } => Some(tag.as_ref()),
            DomNodeKind::Text(_) => None,
        }
    }

    fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.node(node)?.parent
    }

    fn first_child(&self, node: NodeId) -> Option<NodeId> {
        self.node(node)?.children.first().copied()
    }

    fn next_sibling(&self, node: NodeId) -> Option<NodeId> {
        let parent = self.node(self.node(node)?.parent?)?;
        let index = parent.children.iter().position(|&id| id == node)?;
        parent.children.get(index + 1).copied()
    }

    fn add_event_listener(
        &mut self,
        node: NodeId,
        event_type: &str,
        listener: &Listener,
    ) -> Result<(), DomError> {
        match &mut self.node_mut(node)?.kind {
            DomNodeKind::Element { listeners, .. } => {
                listeners.push((event_type.to_string(), listener.clone()));
                self.stats.listeners_attached += 1;
                Ok(())
            }
            DomNodeKind::Text(_) => Err(DomError::NotAnElement { id: node }),
        }
    }

    fn remove_event_listener(
        &mut self,
        node: NodeId,
        event_type: &str,
        listener: &Listener,
    ) -> Result<(), DomError> {
        match &mut self.node_mut(node)?.kind {
            DomNodeKind::Element { listeners, .. } => {
                let position = listeners
                    .iter()
                    .position(|(kind, existing)| kind == event_type && existing.ptr_eq(listener));
                if let Some(index) = position {
                    listeners.remove(index);
                    self.stats.listeners_detached += 1;
                }
                Ok(())
            }
            DomNodeKind::Text(_) => Err(DomError::NotAnElement { id: node }),
        }
    }

    fn listeners(&self, node: NodeId, event_type: &str) -> Vec<Listener> {
        match self.node(node).map(|node| &node.kind) {
            Some(DomNodeKind::Element { listeners, .. }) => listeners
                .iter()
                .filter(|(kind, _)| kind == event_type)
                .map(|(_, listener)| listener.clone())
                .collect(),
            _ => Vec::new(),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn release(&mut self, id: NodeId) -> Result<(), DomError> {
        let children = self.node(id).ok_or(DomError::Missing { id })?.children.clone();
        for child in children {
            let _ = self.release(child);
        }
        if let Some(parent) = self.node(id).and_then(|node| node.parent) {
            self.remove_child(parent, id)?;
        }
        if let Some(slot) = self.nodes.get_mut(id) {
            slot.take();
        }
        Ok(())
    }
}
