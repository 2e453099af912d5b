//! Children capture: turns intercepted primitive calls into an explicit tree
//! and replays such trees on demand.
//!
//! Every captured node carries an [`OwnerRef`] naming the component whose
//! render produced it. Replaying a node keeps that owner visible (see
//! [`Captures::replay_owner`]) so reconciliation can attribute nested
//! component tags to the component that authored them rather than the one
//! that happens to render them.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use log::{debug, trace, warn};

use crate::call::{Attr, Formatter, OpenCall, Tag, TextCall, Value};
use crate::component::{ComponentHandle, ComponentInstance};
use crate::error::CaptureError;
use crate::intercept::{Handlers, InterceptionStack};

/// Non-owning reference to the component that produced a node.
#[derive(Clone, Default)]
pub struct OwnerRef(Option<Weak<ComponentInstance>>);

impl OwnerRef {
    pub fn none() -> Self {
        Self(None)
    }

    pub fn of(component: &ComponentHandle) -> Self {
        Self(Some(Rc::downgrade(&component.0)))
    }

    pub fn is_none(&self) -> bool {
        self.0.is_none()
    }

    pub fn upgrade(&self) -> Option<ComponentHandle> {
        self.0.as_ref()?.upgrade().map(ComponentHandle)
    }

    pub fn is(&self, component: &ComponentHandle) -> bool {
        match &self.0 {
            Some(weak) => std::ptr::eq(weak.as_ptr(), Rc::as_ptr(&component.0)),
            None => false,
        }
    }
}

impl PartialEq for OwnerRef {
    fn eq(&self, other: &Self) -> bool {
        match (&self.0, &other.0) {
            (Some(a), Some(b)) => a.ptr_eq(b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl fmt::Debug for OwnerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upgrade() {
            Some(owner) => write!(f, "Owner({})", owner.id()),
            None if self.0.is_some() => f.write_str("Owner(dropped)"),
            None => f.write_str("Owner(none)"),
        }
    }
}

pub struct CapturedText {
    pub value: Rc<str>,
    /// Formatters passed alongside the value; `None` when only the literal
    /// string was given.
    pub format_args: Option<Vec<Formatter>>,
    pub owner: OwnerRef,
}

pub struct CapturedElement {
    pub tag: Tag,
    pub key: Option<Rc<str>>,
    pub statics: Vec<Attr>,
    pub attrs: Vec<Attr>,
    pub children: Vec<CapturedNode>,
    pub owner: OwnerRef,
}

impl CapturedElement {
    pub fn open_call(&self) -> OpenCall {
        OpenCall {
            tag: self.tag.clone(),
            key: self.key.clone(),
            statics: self.statics.clone(),
            attrs: self.attrs.clone(),
        }
    }

    pub fn attr(&self, name: &str) -> Option<&Value> {
        self.statics
            .iter()
            .chain(self.attrs.iter())
            .rev()
            .find(|(attr, _)| &**attr == name)
            .map(|(_, value)| value)
    }
}

#[derive(Clone)]
pub enum CapturedNode {
    Text(Rc<CapturedText>),
    Element(Rc<CapturedElement>),
}

impl CapturedNode {
    pub fn owner(&self) -> &OwnerRef {
        match self {
            CapturedNode::Text(text) => &text.owner,
            CapturedNode::Element(element) => &element.owner,
        }
    }

    pub fn as_element(&self) -> Option<&CapturedElement> {
        match self {
            CapturedNode::Element(element) => Some(element),
            CapturedNode::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&CapturedText> {
        match self {
            CapturedNode::Text(text) => Some(text),
            CapturedNode::Element(_) => None,
        }
    }

    pub fn tag(&self) -> Option<&Tag> {
        self.as_element().map(|element| &element.tag)
    }

    pub fn key(&self) -> Option<&str> {
        self.as_element()?.key.as_deref()
    }

    pub fn children(&self) -> &[CapturedNode] {
        match self {
            CapturedNode::Element(element) => &element.children,
            CapturedNode::Text(_) => &[],
        }
    }

    pub fn ptr_eq(&self, other: &CapturedNode) -> bool {
        match (self, other) {
            (CapturedNode::Text(a), CapturedNode::Text(b)) => Rc::ptr_eq(a, b),
            (CapturedNode::Element(a), CapturedNode::Element(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// Structural equality; owners are compared by identity.
impl PartialEq for CapturedNode {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (CapturedNode::Text(a), CapturedNode::Text(b)) => {
                a.value == b.value && a.format_args == b.format_args && a.owner == b.owner
            }
            (CapturedNode::Element(a), CapturedNode::Element(b)) => {
                a.tag == b.tag
                    && a.key == b.key
                    && a.statics == b.statics
                    && a.attrs == b.attrs
                    && a.children == b.children
                    && a.owner == b.owner
            }
            _ => false,
        }
    }
}

impl fmt::Debug for CapturedNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapturedNode::Text(text) => write!(f, "{:?}", text.value),
            CapturedNode::Element(element) => {
                let mut out = f.debug_struct("Element");
                out.field("tag", &element.tag);
                if let Some(key) = &element.key {
                    out.field("key", key);
                }
                if !element.statics.is_empty() {
                    out.field("statics", &element.statics);
                }
                if !element.attrs.is_empty() {
                    out.field("attrs", &element.attrs);
                }
                if !element.children.is_empty() {
                    out.field("children", &element.children);
                }
                out.finish()
            }
        }
    }
}

pub fn get_owner(node: &CapturedNode) -> &OwnerRef {
    node.owner()
}

/// True when `value` carries captured nodes rather than plain data.
pub fn is_captured(value: &Value) -> bool {
    value.is_captured()
}

struct PendingElement {
    tag: Tag,
    key: Option<Rc<str>>,
    statics: Vec<Attr>,
    attrs: Vec<Attr>,
    children: Vec<CapturedNode>,
    owner: OwnerRef,
}

impl PendingElement {
    fn finish(self) -> CapturedNode {
        CapturedNode::Element(Rc::new(CapturedElement {
            tag: self.tag,
            key: self.key,
            statics: self.statics,
            attrs: self.attrs,
            children: self.children,
            owner: self.owner,
        }))
    }
}

type OnDone = Box<dyn FnOnce(CapturedNode)>;

struct CaptureState {
    owner: OwnerRef,
    /// Stack height right after this capture's frame was pushed.
    height: Cell<usize>,
    open: RefCell<Vec<PendingElement>>,
    on_done: RefCell<Option<OnDone>>,
}

#[derive(Default)]
struct CapturesInner {
    active: RefCell<Vec<Rc<CaptureState>>>,
    replay_owners: RefCell<Vec<OwnerRef>>,
    errors: RefCell<Vec<CaptureError>>,
}

/// Capture registry for one interception stack.
#[derive(Clone, Default)]
pub struct Captures(Rc<CapturesInner>);

impl Captures {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts capturing on `stack`. The first opened element becomes the
    /// root; `on_done` runs once, when that root is closed (or when a text
    /// call arrives before any open).
    pub fn capture(
        &self,
        stack: &InterceptionStack,
        owner: OwnerRef,
        on_done: impl FnOnce(CapturedNode) + 'static,
    ) {
        let state = Rc::new(CaptureState {
            owner,
            height: Cell::new(0),
            open: RefCell::new(Vec::new()),
            on_done: RefCell::new(Some(Box::new(on_done))),
        });

        let handlers = Handlers::new()
            .on_open({
                let captures = self.clone();
                let state = state.clone();
                move |_, call| {
                    let owner = captures.node_owner(&state);
                    state.open.borrow_mut().push(PendingElement {
                        tag: call.tag,
                        key: call.key,
                        statics: call.statics,
                        attrs: call.attrs,
                        children: Vec::new(),
                        owner,
                    });
                }
            })
            .on_close({
                let captures = self.clone();
                let state = state.clone();
                move |next, tag| captures.close(next.stack(), &state, tag)
            })
            .on_text({
                let captures = self.clone();
                let state = state.clone();
                move |next, call| {
                    let node = CapturedNode::Text(Rc::new(CapturedText {
                        value: call.value,
                        format_args: (!call.formatters.is_empty()).then_some(call.formatters),
                        owner: captures.node_owner(&state),
                    }));
                    captures.append(next.stack(), &state, node);
                }
            })
            .on_attr({
                let state = state.clone();
                move |_, name, value| match state.open.borrow_mut().last_mut() {
                    Some(element) => element.attrs.push((name, value)),
                    None => warn!("attr {name} captured before any open; dropped"),
                }
            });

        let height = stack.start(handlers);
        state.height.set(height);
        trace!("capture started for {:?} at height {height}", state.owner);
        self.0.active.borrow_mut().push(state);
    }

    /// Replays `node` through the active primitives. While a capture is the
    /// top frame the node is re-parented into it as-is instead, keeping its
    /// owner. `skip` drops matching nodes and their subtrees.
    pub fn render(
        &self,
        stack: &InterceptionStack,
        node: &CapturedNode,
        skip: Option<&dyn Fn(&CapturedNode) -> bool>,
    ) {
        if let Some(skip) = skip {
            if skip(node) {
                trace!("replay skipped {node:?}");
                return;
            }
        } else if let Some(state) = self.capturing(stack) {
            self.append(stack, &state, node.clone());
            return;
        }

        self.0.replay_owners.borrow_mut().push(node.owner().clone());
        let guard = ReplayGuard(self);
        match node {
            CapturedNode::Text(text) => stack.text(TextCall {
                value: text.value.clone(),
                formatters: text.format_args.clone().unwrap_or_default(),
            }),
            CapturedNode::Element(element) => {
                stack.open(element.open_call());
                for child in &element.children {
                    self.render(stack, child, skip);
                }
                stack.close(&element.tag);
            }
        }
        drop(guard);
    }

    pub fn is_capturing(&self, stack: &InterceptionStack) -> bool {
        self.capturing(stack).is_some()
    }

    /// Number of captures that have started but not finished.
    pub fn depth(&self) -> usize {
        self.0.active.borrow().len()
    }

    /// Abandons captures above `depth`, returning the owners of those that
    /// never completed.
    pub fn truncate(&self, depth: usize) -> Vec<OwnerRef> {
        let mut active = self.0.active.borrow_mut();
        if active.len() <= depth {
            return Vec::new();
        }
        active
            .drain(depth..)
            .map(|state| state.owner.clone())
            .collect()
    }

    /// Owner of the captured node currently being replayed, if any.
    pub fn replay_owner(&self) -> Option<OwnerRef> {
        self.0.replay_owners.borrow().last().cloned()
    }

    /// Hides the replay owners while a nested component renders its own
    /// content.
    pub fn suspend_replay(&self) -> Vec<OwnerRef> {
        std::mem::take(&mut *self.0.replay_owners.borrow_mut())
    }

    pub fn resume_replay(&self, saved: Vec<OwnerRef>) {
        *self.0.replay_owners.borrow_mut() = saved;
    }

    pub fn take_errors(&self) -> Vec<CaptureError> {
        std::mem::take(&mut *self.0.errors.borrow_mut())
    }

    pub(crate) fn record_error(&self, error: CaptureError) {
        self.0.errors.borrow_mut().push(error);
    }

    fn capturing(&self, stack: &InterceptionStack) -> Option<Rc<CaptureState>> {
        let state = self.0.active.borrow().last().cloned()?;
        (state.height.get() == stack.height()).then_some(state)
    }

    fn node_owner(&self, state: &CaptureState) -> OwnerRef {
        self.replay_owner().unwrap_or_else(|| state.owner.clone())
    }

    fn append(&self, stack: &InterceptionStack, state: &Rc<CaptureState>, node: CapturedNode) {
        let root = {
            let mut open = state.open.borrow_mut();
            match open.last_mut() {
                Some(parent) => {
                    parent.children.push(node);
                    None
                }
                None => Some(node),
            }
        };
        if let Some(root) = root {
            self.finish(stack, state, root);
        }
    }

    fn close(&self, stack: &InterceptionStack, state: &Rc<CaptureState>, tag: &Tag) {
        let element = state.open.borrow_mut().pop();
        let Some(element) = element else {
            self.record_error(CaptureError::CloseWithoutOpen {
                tag: Rc::from(tag.name()),
            });
            return;
        };
        if element.tag.name() != tag.name() {
            self.record_error(CaptureError::MismatchedClose {
                expected: Rc::from(element.tag.name()),
                found: Rc::from(tag.name()),
            });
        }
        self.append(stack, state, element.finish());
    }

    fn finish(&self, stack: &InterceptionStack, state: &Rc<CaptureState>, root: CapturedNode) {
        stack.truncate(state.height.get().saturating_sub(1));
        self.0
            .active
            .borrow_mut()
            .retain(|active| !Rc::ptr_eq(active, state));
        debug!("capture for {:?} finished with {root:?}", state.owner);
        let on_done = state.on_done.borrow_mut().take();
        if let Some(on_done) = on_done {
            on_done(root);
        }
    }
}

struct ReplayGuard<'a>(&'a Captures);

impl Drop for ReplayGuard<'_> {
    fn drop(&mut self) {
        self.0 .0.replay_owners.borrow_mut().pop();
    }
}

#[cfg(test)]
#[path = "tests/capture_tests.rs"]
mod tests;
