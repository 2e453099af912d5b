//! Cursor-based incremental patcher. These are the "original" primitives at
//! the bottom of every renderer's interception stack.
//!
//! A patch context walks the children of a parent node. `open` reuses the
//! node under the cursor when tag and key match, pulls a keyed sibling
//! forward when one exists later in the range, and creates a node otherwise.
//! Whatever is left unvisited when a context closes is removed.

use std::cell::RefCell;
use std::rc::Rc;

use log::{debug, trace};

use crate::call::{OpenCall, Tag, TextCall, Value};
use crate::collections::map::HashMap;
use crate::dom::{Dom, DomError, NodeId};
use crate::error::PatchError;

#[derive(Default)]
struct NodeMeta {
    key: Option<Rc<str>>,
    /// Dynamic attributes as last written, for diffing.
    attrs: Vec<(Rc<str>, String)>,
}

struct Context {
    parent: NodeId,
    /// Next child to visit. `next == end` means the range is exhausted.
    next: Option<NodeId>,
    end: Option<NodeId>,
    /// Tag of the element this context belongs to; `None` for the context
    /// opened by `enter_inner`/`enter_outer`.
    tag: Option<Rc<str>>,
    /// Attributes written last cycle that the open call did not repeat.
    /// Removed on close unless an `attr` call writes them again.
    stale: Vec<(Rc<str>, String)>,
}

impl Context {
    fn cursor(&self) -> Option<NodeId> {
        if self.next == self.end {
            None
        } else {
            self.next
        }
    }
}

pub struct Patcher {
    dom: Box<dyn Dom>,
    contexts: Vec<Context>,
    meta: HashMap<NodeId, NodeMeta>,
    removed: Vec<NodeId>,
    error: Option<PatchError>,
}

impl Patcher {
    pub fn new(dom: Box<dyn Dom>) -> Self {
        Self {
            dom,
            contexts: Vec::new(),
            meta: HashMap::default(),
            removed: Vec::new(),
            error: None,
        }
    }

    pub fn dom(&self) -> &dyn Dom {
        &*self.dom
    }

    pub fn dom_mut(&mut self) -> &mut dyn Dom {
        &mut *self.dom
    }

    pub fn is_patching(&self) -> bool {
        !self.contexts.is_empty()
    }

    /// Patches the children of `parent`.
    pub fn enter_inner(&mut self, parent: NodeId) -> Result<(), PatchError> {
        if !self.dom.contains(parent) {
            return Err(DomError::Missing { id: parent }.into());
        }
        trace!("patch_inner({parent})");
        self.contexts.push(Context {
            parent,
            next: self.dom.first_child(parent),
            end: None,
            tag: None,
            stale: Vec::new(),
        });
        Ok(())
    }

    /// Patches `element` itself in place; the rendered root may replace it.
    pub fn enter_outer(&mut self, element: NodeId) -> Result<(), PatchError> {
        let parent = self
            .dom
            .parent(element)
            .ok_or(PatchError::Detached { node: element })?;
        trace!("patch_outer({element})");
        self.contexts.push(Context {
            parent,
            next: Some(element),
            end: self.dom.next_sibling(element),
            tag: None,
            stale: Vec::new(),
        });
        Ok(())
    }

    /// Leaves the context opened by the matching `enter_*`. Elements left
    /// open are closed implicitly; unvisited nodes in range are removed.
    pub fn exit(&mut self) {
        while let Some(context) = self.contexts.pop() {
            let is_root = context.tag.is_none();
            self.finish_context(&context);
            if is_root {
                return;
            }
        }
    }

    pub fn open(&mut self, call: OpenCall) {
        let tag = match &call.tag {
            Tag::Element(name) => name.clone(),
            Tag::Component(ctor) => {
                self.fail(PatchError::UnhandledComponent {
                    name: Rc::from(ctor.name()),
                });
                return;
            }
        };
        let Some(context) = self.contexts.last() else {
            self.fail(PatchError::OutsidePatch);
            return;
        };
        let (parent, next) = (context.parent, context.next);

        let (node, stale) = match self.find_match(context, &tag, call.key.as_deref()) {
            Some(node) => {
                if Some(node) != next {
                    trace!("moving keyed node {node} into place");
                    if let Err(err) = self.dom.insert_before(parent, node, next) {
                        self.fail(err.into());
                    }
                }
                let stale = self.update_attrs(node, &call.attrs);
                (node, stale)
            }
            None => {
                let node = self.dom.create_element(&tag);
                trace!("created <{tag}> as {node}");
                if let Err(err) = self.dom.insert_before(parent, node, next) {
                    self.fail(err.into());
                }
                for (name, value) in &call.statics {
                    if let Some(value) = value.to_attribute() {
                        self.write_attr(node, name, &value);
                    }
                }
                self.meta.insert(
                    node,
                    NodeMeta {
                        key: call.key.clone(),
                        attrs: Vec::new(),
                    },
                );
                let stale = self.update_attrs(node, &call.attrs);
                (node, stale)
            }
        };

        if next == Some(node) {
            let after = self.dom.next_sibling(node);
            if let Some(context) = self.contexts.last_mut() {
                context.next = after;
            }
        }
        self.contexts.push(Context {
            parent: node,
            next: self.dom.first_child(node),
            end: None,
            tag: Some(tag),
            stale,
        });
    }

    pub fn close(&mut self, tag: &Tag) {
        let expected = match self.contexts.last() {
            Some(Context {
                tag: Some(expected),
                ..
            }) => expected.clone(),
            _ => {
                self.fail(PatchError::CloseWithoutOpen {
                    tag: Rc::from(tag.name()),
                });
                return;
            }
        };
        if &*expected != tag.name() || tag.is_component() {
            self.fail(PatchError::MismatchedClose {
                expected,
                found: Rc::from(tag.name()),
            });
        }
        if let Some(context) = self.contexts.pop() {
            self.finish_context(&context);
        }
    }

    pub fn text(&mut self, call: TextCall) {
        let text = call.formatted();
        let Some(context) = self.contexts.last() else {
            self.fail(PatchError::OutsidePatch);
            return;
        };
        let (parent, next) = (context.parent, context.next);
        let existing = context
            .cursor()
            .filter(|&node| self.dom.tag(node).is_none());

        match existing {
            Some(node) => {
                if self.dom.text(node).as_deref() != Some(text.as_str()) {
                    if let Err(err) = self.dom.set_text(node, &text) {
                        self.fail(err.into());
                    }
                }
                let after = self.dom.next_sibling(node);
                if let Some(context) = self.contexts.last_mut() {
                    context.next = after;
                }
            }
            None => {
                let node = self.dom.create_text(&text);
                if let Err(err) = self.dom.insert_before(parent, node, next) {
                    self.fail(err.into());
                }
            }
        }
    }

    /// Sets an attribute on the element currently open. Writing the value the
    /// element already carries from the last cycle touches nothing.
    pub fn attr(&mut self, name: Rc<str>, value: Value) {
        let Some(element) = self.current_element() else {
            self.fail(PatchError::OutsidePatch);
            return;
        };
        let carried = self.contexts.last_mut().and_then(|context| {
            let index = context.stale.iter().position(|(attr, _)| *attr == name)?;
            Some(context.stale.remove(index).1)
        });
        let previous = self
            .meta
            .get(&element)
            .and_then(|meta| meta.attrs.iter().position(|(attr, _)| *attr == name));
        let last = match previous {
            Some(index) => self
                .meta
                .get(&element)
                .map(|meta| meta.attrs[index].1.clone()),
            None => carried,
        };
        match value.to_attribute() {
            Some(serialized) => {
                if last.as_deref() != Some(serialized.as_str()) {
                    self.write_attr(element, &name, &serialized);
                }
                let meta = self.meta.entry(element).or_default();
                match previous {
                    Some(index) => meta.attrs[index].1 = serialized,
                    None => meta.attrs.push((name, serialized)),
                }
            }
            None => {
                if let Err(err) = self.dom.remove_attribute(element, &name) {
                    self.fail(err.into());
                }
                if let (Some(index), Some(meta)) = (previous, self.meta.get_mut(&element)) {
                    meta.attrs.remove(index);
                }
            }
        }
    }

    /// Closes up to `count` elements left open by an unbalanced render.
    pub fn unwind(&mut self, count: usize) -> usize {
        let mut closed = 0;
        while closed < count {
            match self.contexts.last() {
                Some(Context { tag: Some(_), .. }) => {}
                _ => break,
            }
            if let Some(context) = self.contexts.pop() {
                self.finish_context(&context);
            }
            closed += 1;
        }
        closed
    }

    /// Steps over the node under the cursor without touching it.
    pub fn skip_node(&mut self) {
        let Some(context) = self.contexts.last() else {
            return;
        };
        if let Some(node) = context.cursor() {
            let after = self.dom.next_sibling(node);
            if let Some(context) = self.contexts.last_mut() {
                context.next = after;
            }
        }
    }

    /// Adopts an existing node at the cursor without visiting its subtree.
    pub fn skip_to(&mut self, node: NodeId) {
        let Some(context) = self.contexts.last() else {
            self.fail(PatchError::OutsidePatch);
            return;
        };
        let (parent, next) = (context.parent, context.next);
        if next == Some(node) {
            let after = self.dom.next_sibling(node);
            if let Some(context) = self.contexts.last_mut() {
                context.next = after;
            }
        } else if let Err(err) = self.dom.insert_before(parent, node, next) {
            self.fail(err.into());
        }
    }

    /// The element most recently opened and not yet closed.
    pub fn current_element(&self) -> Option<NodeId> {
        match self.contexts.last() {
            Some(Context {
                parent,
                tag: Some(_),
                ..
            }) => Some(*parent),
            _ => None,
        }
    }

    /// Number of elements open in the innermost patch.
    pub fn open_depth(&self) -> usize {
        self.contexts
            .iter()
            .rev()
            .take_while(|context| context.tag.is_some())
            .count()
    }

    pub fn key_of(&self, node: NodeId) -> Option<Rc<str>> {
        self.meta.get(&node)?.key.clone()
    }

    /// Nodes removed since the last call, including descendants.
    pub fn take_removed(&mut self) -> Vec<NodeId> {
        std::mem::take(&mut self.removed)
    }

    pub fn take_error(&mut self) -> Option<PatchError> {
        self.error.take()
    }

    /// Drops bookkeeping for nodes that are gone for good.
    pub fn forget(&mut self, node: NodeId) {
        self.meta.remove(&node);
    }

    fn fail(&mut self, error: PatchError) {
        debug!("patch error: {error}");
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    fn find_match(&self, context: &Context, tag: &str, key: Option<&str>) -> Option<NodeId> {
        let candidate = context.cursor()?;
        if self.matches(candidate, tag, key) {
            return Some(candidate);
        }
        key?;
        let mut sibling = self.dom.next_sibling(candidate);
        while let Some(node) = sibling {
            if Some(node) == context.end {
                break;
            }
            if self.matches(node, tag, key) {
                return Some(node);
            }
            sibling = self.dom.next_sibling(node);
        }
        None
    }

    fn matches(&self, node: NodeId, tag: &str, key: Option<&str>) -> bool {
        self.dom.tag(node) == Some(tag)
            && self.meta.get(&node).and_then(|meta| meta.key.as_deref()) == key
    }

    fn write_attr(&mut self, node: NodeId, name: &str, value: &str) {
        if let Err(err) = self.dom.set_attribute(node, name, value) {
            self.fail(err.into());
        }
    }

    /// Writes changed dynamic attributes and returns the previous ones the
    /// call no longer names.
    fn update_attrs(
        &mut self,
        node: NodeId,
        attrs: &[(Rc<str>, Value)],
    ) -> Vec<(Rc<str>, String)> {
        let previous = self
            .meta
            .get_mut(&node)
            .map(|meta| std::mem::take(&mut meta.attrs))
            .unwrap_or_default();
        let mut current: Vec<(Rc<str>, String)> = Vec::with_capacity(attrs.len());
        for (name, value) in attrs {
            let Some(serialized) = value.to_attribute() else {
                continue;
            };
            let unchanged = previous
                .iter()
                .any(|(old, old_value)| old == name && *old_value == serialized);
            if !unchanged {
                self.write_attr(node, name, &serialized);
            }
            current.retain(|(existing, _)| existing != name);
            current.push((name.clone(), serialized));
        }
        let stale = previous
            .into_iter()
            .filter(|(name, _)| !current.iter().any(|(existing, _)| existing == name))
            .collect();
        self.meta.entry(node).or_default().attrs = current;
        stale
    }

    fn finish_context(&mut self, context: &Context) {
        for (name, _) in &context.stale {
            if let Err(err) = self.dom.remove_attribute(context.parent, name) {
                self.fail(err.into());
            }
        }
        self.remove_rest(context);
    }

    fn remove_rest(&mut self, context: &Context) {
        let mut cursor = context.cursor();
        while let Some(node) = cursor {
            let after = self.dom.next_sibling(node);
            self.collect_subtree(node);
            match self.dom.remove_child(context.parent, node) {
                Ok(()) => trace!("removed unvisited node {node}"),
                Err(err) => self.fail(err.into()),
            }
            cursor = after.filter(|&after| Some(after) != context.end);
        }
    }

    fn collect_subtree(&mut self, node: NodeId) {
        self.removed.push(node);
        let mut child = self.dom.first_child(node);
        while let Some(id) = child {
            self.collect_subtree(id);
            child = self.dom.next_sibling(id);
        }
    }
}

/// Runs `f` with a patch context over the children of `parent`.
pub fn patch_inner<R>(
    patcher: &RefCell<Patcher>,
    parent: NodeId,
    f: impl FnOnce() -> R,
) -> Result<R, PatchError> {
    patcher.borrow_mut().enter_inner(parent)?;
    let result = f();
    let mut patcher = patcher.borrow_mut();
    patcher.exit();
    match patcher.take_error() {
        Some(error) => Err(error),
        None => Ok(result),
    }
}

/// Runs `f` with a patch context positioned on `element`.
pub fn patch_outer<R>(
    patcher: &RefCell<Patcher>,
    element: NodeId,
    f: impl FnOnce() -> R,
) -> Result<R, PatchError> {
    patcher.borrow_mut().enter_outer(element)?;
    let result = f();
    let mut patcher = patcher.borrow_mut();
    patcher.exit();
    match patcher.take_error() {
        Some(error) => Err(error),
        None => Ok(result),
    }
}

#[cfg(test)]
#[path = "tests/patcher_tests.rs"]
mod tests;
