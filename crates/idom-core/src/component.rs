//! Component instances and the tables that let a patch cycle find them again.

use std::any::{Any, TypeId};
use std::cell::{Cell, Ref, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use log::warn;

use crate::call::{Listener, Value};
use crate::capture::CapturedNode;
use crate::collections::map::{HashMap, IndexMap};
use crate::disposal::Disposable;
use crate::dom::NodeId;
use crate::listeners::ListenerSet;
use crate::renderer::{RenderCx, RendererHandle};

/// A renderable unit. `render` issues primitive calls through the context;
/// everything else has a default.
pub trait Component: Any {
    fn render(&self, cx: &RenderCx<'_>);

    /// Whether a reused instance re-renders after its props were replaced.
    fn should_update(&self, changes: &PropChanges) -> bool {
        !changes.is_empty()
    }

    /// Named handler for string-valued inline-listener attributes.
    fn listener(&self, _name: &str) -> Option<Listener> {
        None
    }

    fn rendered(&self, _first: bool) {}

    fn disposed(&self) {}
}

/// A freshly built component, viewed both as a component and for downcasts.
type Built = (Rc<dyn Component>, Rc<dyn Any>);

struct ComponentRefInner {
    type_id: TypeId,
    name: Rc<str>,
    build: Box<dyn Fn() -> Built>,
}

/// Constructor identity used as a component tag.
#[derive(Clone)]
pub struct ComponentRef(Rc<ComponentRefInner>);

impl ComponentRef {
    pub fn of<C: Component + Default>() -> Self {
        let full = std::any::type_name::<C>();
        let name = full.rsplit("::").next().unwrap_or(full);
        Self::new(name, C::default)
    }

    pub fn new<C: Component>(name: &str, build: impl Fn() -> C + 'static) -> Self {
        Self(Rc::new(ComponentRefInner {
            type_id: TypeId::of::<C>(),
            name: Rc::from(name),
            build: Box::new(move || {
                let component = Rc::new(build());
                (component.clone() as Rc<dyn Component>, component as Rc<dyn Any>)
            }),
        }))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn type_id(&self) -> TypeId {
        self.0.type_id
    }

    pub(crate) fn build(&self) -> Built {
        (self.0.build)()
    }
}

impl PartialEq for ComponentRef {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
            || (self.0.type_id == other.0.type_id && self.0.name == other.0.name)
    }
}

impl fmt::Debug for ComponentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentRef({})", self.0.name)
    }
}

pub const CHILDREN: &str = "children";

/// Data handed to a component through its tag.
#[derive(Clone, Default, PartialEq)]
pub struct Props(IndexMap<Rc<str>, Value>);

impl Props {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<Rc<str>>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<Rc<str>>, value: impl Into<Value>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        self.get(name)?.as_str()
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        self.get(name)?.as_int()
    }

    pub fn bool(&self, name: &str) -> Option<bool> {
        self.get(name)?.as_bool()
    }

    pub fn children(&self) -> &[CapturedNode] {
        self.get(CHILDREN)
            .and_then(Value::as_nodes)
            .unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Rc<str>, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Names whose value differs shallowly between `self` and `next`.
    pub fn diff(&self, next: &Props) -> PropChanges {
        let mut changed = Vec::new();
        for (name, value) in &next.0 {
            if self.0.get(name) != Some(value) {
                changed.push(name.clone());
            }
        }
        for name in self.0.keys() {
            if !next.0.contains_key(name) {
                changed.push(name.clone());
            }
        }
        PropChanges(changed)
    }
}

impl fmt::Debug for Props {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.0.iter()).finish()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PropChanges(Vec<Rc<str>>);

impl PropChanges {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|changed| &**changed == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|name| &**name)
    }
}

type ChildMap = IndexMap<Rc<str>, ComponentHandle>;

/// Reuse table of the nested instances a component authored.
#[derive(Default)]
pub(crate) struct ChildTable {
    current: ChildMap,
    /// Instances claimed during the running cycle.
    used: Option<ChildMap>,
    /// Scheduled for disposal but still reclaimable until the sweep.
    pending: ChildMap,
}

impl ChildTable {
    pub(crate) fn begin_cycle(&mut self) {
        if self.used.is_none() {
            self.used = Some(ChildMap::default());
        }
    }

    pub(crate) fn is_used(&self, id: &str) -> bool {
        self.used.as_ref().is_some_and(|used| used.contains_key(id))
    }

    pub(crate) fn lookup(&mut self, id: &str) -> Option<ComponentHandle> {
        if let Some(found) = self.current.get(id) {
            return Some(found.clone());
        }
        let reclaimed = self.pending.shift_remove(id)?;
        (!reclaimed.is_disposed()).then_some(reclaimed)
    }

    pub(crate) fn mark_used(&mut self, id: Rc<str>, instance: ComponentHandle) {
        match self.used.as_mut() {
            Some(used) => {
                used.insert(id, instance);
            }
            None => {
                self.current.insert(id, instance);
            }
        }
    }

    /// Closes the running cycle and returns the instances it did not claim.
    pub(crate) fn end_cycle(&mut self, keep_unused: bool) -> Vec<ComponentHandle> {
        let Some(mut used) = self.used.take() else {
            return Vec::new();
        };
        let previous = std::mem::take(&mut self.current);
        let mut unused = Vec::new();
        for (id, instance) in previous {
            if used.contains_key(&id) {
                continue;
            }
            if keep_unused {
                used.insert(id, instance);
            } else {
                self.pending.insert(id, instance.clone());
                unused.push(instance);
            }
        }
        self.pending.retain(|_, instance| !instance.is_disposed());
        self.current = used;
        unused
    }

    pub(crate) fn get(&self, id: &str) -> Option<ComponentHandle> {
        self.used
            .as_ref()
            .and_then(|used| used.get(id))
            .or_else(|| self.current.get(id))
            .cloned()
    }

    pub(crate) fn drain(&mut self) -> Vec<ComponentHandle> {
        let mut all: Vec<ComponentHandle> = Vec::new();
        let used = self.used.take().unwrap_or_default();
        for (_, instance) in used
            .into_iter()
            .chain(std::mem::take(&mut self.current))
            .chain(std::mem::take(&mut self.pending))
        {
            if !all.iter().any(|seen| seen.ptr_eq(&instance)) {
                all.push(instance);
            }
        }
        all
    }

    pub(crate) fn len(&self) -> usize {
        self.used
            .as_ref()
            .map_or(self.current.len(), |used| used.len())
    }
}

pub struct ComponentInstance {
    pub(crate) id: Rc<str>,
    key: Option<Rc<str>>,
    ctor: ComponentRef,
    pub(crate) renderer: RendererHandle,
    component: Rc<dyn Component>,
    any: Rc<dyn Any>,
    element: Cell<Option<NodeId>>,
    parent: RefCell<Weak<ComponentInstance>>,
    disposed: Cell<bool>,
    attach_point: Cell<Option<(NodeId, Option<NodeId>)>>,
    props: RefCell<Props>,
    forwarded: RefCell<ListenerSet>,
    pub(crate) children: RefCell<ChildTable>,
    refs: RefCell<HashMap<Rc<str>, Weak<ComponentInstance>>>,
    handlers: RefCell<HashMap<Rc<str>, Option<Listener>>>,
    skip_next_disposal: Cell<bool>,
    force_render: Cell<bool>,
    render_count: Cell<usize>,
}

/// Shared handle to a component instance.
#[derive(Clone)]
pub struct ComponentHandle(pub(crate) Rc<ComponentInstance>);

impl ComponentHandle {
    pub(crate) fn new(
        id: Rc<str>,
        key: Option<Rc<str>>,
        ctor: ComponentRef,
        renderer: RendererHandle,
        props: Props,
        forwarded: ListenerSet,
    ) -> Self {
        let (component, any) = ctor.build();
        Self(Rc::new(ComponentInstance {
            id,
            key,
            ctor,
            renderer,
            component,
            any,
            element: Cell::new(None),
            parent: RefCell::new(Weak::new()),
            disposed: Cell::new(false),
            attach_point: Cell::new(None),
            props: RefCell::new(props),
            forwarded: RefCell::new(forwarded),
            children: RefCell::new(ChildTable::default()),
            refs: RefCell::new(HashMap::default()),
            handlers: RefCell::new(HashMap::default()),
            skip_next_disposal: Cell::new(false),
            force_render: Cell::new(false),
            render_count: Cell::new(0),
        }))
    }

    pub fn id(&self) -> &str {
        &self.0.id
    }

    pub fn key(&self) -> Option<&str> {
        self.0.key.as_deref()
    }

    pub fn ctor(&self) -> &ComponentRef {
        &self.0.ctor
    }

    pub fn component(&self) -> &dyn Component {
        &*self.0.component
    }

    pub fn downcast_ref<C: Component>(&self) -> Option<&C> {
        self.0.any.downcast_ref::<C>()
    }

    pub fn element(&self) -> Option<NodeId> {
        self.0.element.get()
    }

    pub(crate) fn set_element(&self, element: Option<NodeId>) {
        self.0.element.set(element);
    }

    pub fn parent(&self) -> Option<ComponentHandle> {
        self.0.parent.borrow().upgrade().map(ComponentHandle)
    }

    pub(crate) fn set_parent(&self, parent: &ComponentHandle) {
        *self.0.parent.borrow_mut() = Rc::downgrade(&parent.0);
    }

    pub fn is_disposed(&self) -> bool {
        self.0.disposed.get()
    }

    /// Marks the instance disposed; returns false when it already was.
    pub(crate) fn mark_disposed(&self) -> bool {
        !self.0.disposed.replace(true)
    }

    pub fn props(&self) -> Props {
        self.0.props.borrow().clone()
    }

    pub(crate) fn props_ref(&self) -> Ref<'_, Props> {
        self.0.props.borrow()
    }

    /// Replaces the props and reports which names changed.
    pub fn set_props(&self, props: Props) -> PropChanges {
        let mut current = self.0.props.borrow_mut();
        let changes = current.diff(&props);
        *current = props;
        changes
    }

    pub(crate) fn forwarded(&self) -> ListenerSet {
        self.0.forwarded.borrow().clone()
    }

    /// Replaces listeners forwarded from the component tag; true when they
    /// differ from the previous set.
    pub(crate) fn set_forwarded(&self, forwarded: ListenerSet) -> bool {
        let mut current = self.0.forwarded.borrow_mut();
        let changed = current.len() != forwarded.len()
            || forwarded.iter().any(|(event, listener)| {
                current
                    .get(event)
                    .map_or(true, |existing| !existing.ptr_eq(listener))
            });
        *current = forwarded;
        changed
    }

    pub(crate) fn attach_point(&self) -> Option<(NodeId, Option<NodeId>)> {
        self.0.attach_point.get()
    }

    pub(crate) fn set_attach_point(&self, point: Option<(NodeId, Option<NodeId>)>) {
        self.0.attach_point.set(point);
    }

    /// Opts the next cycle out of disposing children it did not render.
    pub fn skip_next_children_disposal(&self) {
        self.0.skip_next_disposal.set(true);
    }

    pub(crate) fn take_skip_next_disposal(&self) -> bool {
        self.0.skip_next_disposal.replace(false)
    }

    pub(crate) fn request_render(&self) {
        self.0.force_render.set(true);
    }

    pub(crate) fn take_render_request(&self) -> bool {
        self.0.force_render.replace(false)
    }

    pub fn render_count(&self) -> usize {
        self.0.render_count.get()
    }

    pub(crate) fn finish_render(&self) -> bool {
        let count = self.0.render_count.get();
        self.0.render_count.set(count + 1);
        count == 0
    }

    pub fn child_component(&self, id: &str) -> Option<ComponentHandle> {
        self.0.children.borrow().get(id)
    }

    pub fn child_count(&self) -> usize {
        self.0.children.borrow().len()
    }

    /// Instance registered under `name` with a `ref` attribute on its tag.
    pub fn component_ref(&self, name: &str) -> Option<ComponentHandle> {
        let refs = self.0.refs.borrow();
        let instance = refs.get(name)?.upgrade().map(ComponentHandle)?;
        (!instance.is_disposed()).then_some(instance)
    }

    pub(crate) fn register_ref(&self, name: Rc<str>, instance: &ComponentHandle) {
        self.0
            .refs
            .borrow_mut()
            .insert(name, Rc::downgrade(&instance.0));
    }

    /// Handler named `name`, resolved once per instance.
    pub fn named_listener(&self, name: &str) -> Option<Listener> {
        if let Some(cached) = self.0.handlers.borrow().get(name) {
            return cached.clone();
        }
        let resolved = self.component().listener(name);
        if resolved.is_none() {
            warn!("component {} has no listener named {name}", self.id());
        }
        self.0
            .handlers
            .borrow_mut()
            .insert(Rc::from(name), resolved.clone());
        resolved
    }

    pub fn renderer_handle(&self) -> RendererHandle {
        self.0.renderer.clone()
    }

    pub fn ptr_eq(&self, other: &ComponentHandle) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for ComponentHandle {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for ComponentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Component")
            .field("ctor", &self.0.ctor.name())
            .field("id", &self.0.id)
            .field("element", &self.element())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl Disposable for ComponentHandle {
    fn is_disposed(&self) -> bool {
        ComponentHandle::is_disposed(self)
    }

    fn has_parent(&self) -> bool {
        self.0.parent.borrow().strong_count() > 0
    }

    fn clear_parent(&self) {
        *self.0.parent.borrow_mut() = Weak::new();
    }

    fn dispose(&self) {
        ComponentHandle::dispose(self);
    }
}
