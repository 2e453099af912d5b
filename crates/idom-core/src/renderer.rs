//! Patch/reconciliation engine.
//!
//! A [`Renderer`] owns everything one render root needs: the interception
//! stack (whose base frame is the incremental [`Patcher`]), the capture
//! registry, listener records and the disposal queue. Patching a component
//! pushes an engine frame that intercepts opens and closes to
//!
//! * turn component tags into captured subtrees and reconcile them against
//!   the owner's reuse table,
//! * pull inline-listener attributes out of intrinsic elements,
//! * key the root element of every rendered component with its id.
//!
//! When the outermost patch scope finishes, listener sets are diffed and the
//! disposal queue is swept.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use log::{debug, error, trace, warn};

use crate::call::{Attr, Event, Listener, OpenCall, Tag, TextCall, Value};
use crate::capture::{CapturedElement, CapturedNode, Captures, OwnerRef};
use crate::collections::map::{HashSet, IndexMap};
use crate::component::{ComponentHandle, ComponentRef, Props, CHILDREN};
use crate::config::{ComponentRegistry, RendererConfig};
use crate::disposal::{Disposable, DisposalQueue};
use crate::dom::{Dom, NodeId};
use crate::error::{CaptureError, PatchError, RenderError};
use crate::intercept::{Handlers, InterceptionStack, Next};
use crate::listeners::{ListenerDiff, ListenerRegistry, ListenerSet};
use crate::patcher::Patcher;

const REF_ATTR: &str = "ref";
const SCRATCH_TAG: &str = "div";

struct PathFrame {
    segment: Rc<str>,
    children: usize,
    unkeyed: usize,
}

impl PathFrame {
    fn new(segment: Rc<str>) -> Self {
        Self {
            segment,
            children: 0,
            unkeyed: 0,
        }
    }
}

/// One component render in progress.
struct RenderFrame {
    component: ComponentHandle,
    /// Intrinsic elements opened by this render and not yet closed.
    depth: usize,
    root: Option<NodeId>,
    forwarded: ListenerSet,
    path: Vec<PathFrame>,
}

impl RenderFrame {
    fn new(component: ComponentHandle) -> Self {
        let forwarded = component.forwarded();
        Self {
            component,
            depth: 0,
            root: None,
            forwarded,
            path: vec![PathFrame::new(Rc::from(""))],
        }
    }

    fn path_string(&self) -> String {
        let mut out = String::new();
        for frame in self.path.iter().skip(1) {
            out.push('/');
            out.push_str(&frame.segment);
        }
        out
    }

    fn enter_element(&mut self, key: Option<&Rc<str>>) {
        let segment = match (key, self.path.last()) {
            (Some(key), _) => key.clone(),
            (None, Some(parent)) => Rc::from(parent.children.to_string()),
            (None, None) => Rc::from("0"),
        };
        if let Some(parent) = self.path.last_mut() {
            parent.children += 1;
        }
        self.path.push(PathFrame::new(segment));
        self.depth += 1;
    }

    fn leave_element(&mut self) {
        if self.path.len() > 1 {
            self.path.pop();
        }
        self.depth -= 1;
    }

    /// Position-derived id for a component tag under the current element.
    fn child_id(&mut self, key: Option<&str>) -> String {
        let path = self.path_string();
        let Some(parent) = self.path.last_mut() else {
            return path;
        };
        parent.children += 1;
        match key {
            Some(key) => format!("{path}/@{key}"),
            None => {
                let index = parent.unkeyed;
                parent.unkeyed += 1;
                format!("{path}/#{index}")
            }
        }
    }
}

/// State of one `patch()` invocation (or one `batch`).
struct PatchScope {
    initiator: Option<ComponentHandle>,
    /// Elements opened in this scope with the listeners they asked for.
    visited: IndexMap<NodeId, ListenerSet>,
    error: Option<RenderError>,
}

impl PatchScope {
    fn new(initiator: Option<ComponentHandle>) -> Self {
        Self {
            initiator,
            visited: IndexMap::default(),
            error: None,
        }
    }
}

pub(crate) struct RendererInner {
    config: RendererConfig,
    registry: RefCell<ComponentRegistry>,
    patcher: RefCell<Patcher>,
    stack: InterceptionStack,
    captures: Captures,
    listeners: RefCell<ListenerRegistry>,
    listener_totals: Cell<ListenerDiff>,
    disposal: DisposalQueue<ComponentHandle>,
    scopes: RefCell<Vec<PatchScope>>,
    renders: RefCell<Vec<RenderFrame>>,
    handle: RendererHandle,
}

/// Weak handle held by component instances.
#[derive(Clone, Default)]
pub struct RendererHandle(Weak<RendererInner>);

impl RendererHandle {
    pub fn upgrade(&self) -> Option<Renderer> {
        self.0.upgrade().map(Renderer)
    }

    fn inner(&self) -> Option<Rc<RendererInner>> {
        self.0.upgrade()
    }
}

#[derive(Clone)]
pub struct Renderer(Rc<RendererInner>);

impl Renderer {
    pub fn new(dom: impl Dom, config: RendererConfig) -> Self {
        let inner = Rc::new_cyclic(|weak: &Weak<RendererInner>| {
            let handle = RendererHandle(weak.clone());
            RendererInner {
                config,
                registry: RefCell::new(ComponentRegistry::new()),
                patcher: RefCell::new(Patcher::new(Box::new(dom))),
                stack: InterceptionStack::new(base_handlers(&handle)),
                captures: Captures::new(),
                listeners: RefCell::new(ListenerRegistry::new()),
                listener_totals: Cell::new(ListenerDiff::default()),
                disposal: DisposalQueue::new(),
                scopes: RefCell::new(Vec::new()),
                renders: RefCell::new(Vec::new()),
                handle,
            }
        });
        Self(inner)
    }

    pub fn handle(&self) -> RendererHandle {
        self.0.handle.clone()
    }

    pub fn config(&self) -> &RendererConfig {
        &self.0.config
    }

    pub fn stack(&self) -> &InterceptionStack {
        &self.0.stack
    }

    pub fn captures(&self) -> &Captures {
        &self.0.captures
    }

    /// Makes `ctor` resolvable as a capitalized string tag.
    pub fn register(&self, ctor: ComponentRef) {
        self.0.registry.borrow_mut().register(ctor);
    }

    /// Creates a root instance. Nothing renders until it is patched or its
    /// element is built.
    pub fn mount(&self, ctor: &ComponentRef, props: Props) -> ComponentHandle {
        let instance = ComponentHandle::new(
            Rc::from(self.0.config.root_key.as_str()),
            None,
            ctor.clone(),
            self.handle(),
            props,
            ListenerSet::default(),
        );
        debug!("mounted {} as {}", ctor.name(), instance.id());
        instance
    }

    /// The component that initiated the outermost running patch.
    pub fn patching_component(&self) -> Option<ComponentHandle> {
        self.0.patching_component()
    }

    /// Runs `f` as one scope: disposal sweeps wait until it returns.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        self.0.scopes.borrow_mut().push(PatchScope::new(None));
        let guard = ScopeGuard {
            inner: &self.0,
            height: self.0.stack.height(),
            armed: true,
        };
        let result = f();
        if let Err(err) = guard.finish() {
            warn!("batch finished with {err}");
        }
        result
    }

    /// Read access to the document.
    pub fn dom<R>(&self, f: impl FnOnce(&dyn Dom) -> R) -> R {
        f(self.0.patcher.borrow().dom())
    }

    pub fn with_dom<D: Dom, R>(&self, f: impl FnOnce(&mut D) -> R) -> Result<R, RenderError> {
        let mut patcher = self.0.patcher.borrow_mut();
        let dom = patcher
            .dom_mut()
            .as_any_mut()
            .downcast_mut::<D>()
            .ok_or(RenderError::DomTypeMismatch)?;
        Ok(f(dom))
    }

    /// Invokes the listeners registered on `node` for `event_type`. The DOM is
    /// not borrowed while handlers run, so they may patch.
    pub fn dispatch(&self, node: NodeId, event_type: &str) -> usize {
        let listeners = self.0.patcher.borrow().dom().listeners(node, event_type);
        let event = Event {
            event_type: Rc::from(event_type),
            target: node,
        };
        for listener in &listeners {
            listener.call(&event);
        }
        trace!(
            "dispatched {event_type} on {node} to {} listener(s)",
            listeners.len()
        );
        listeners.len()
    }

    /// Attach/detach totals across every reconciliation so far.
    pub fn listener_totals(&self) -> ListenerDiff {
        self.0.listener_totals.get()
    }

    pub fn pending_disposals(&self) -> usize {
        self.0.disposal.len()
    }
}

/// Ancestors of `instance` whose render produced nothing but its root
/// `element`.
fn sharing_root(instance: &ComponentHandle, element: Option<NodeId>) -> Vec<ComponentHandle> {
    let mut wrappers = Vec::new();
    let Some(element) = element else {
        return wrappers;
    };
    let mut parent = instance.parent();
    while let Some(wrapper) = parent.filter(|wrapper| wrapper.element() == Some(element)) {
        parent = wrapper.parent();
        wrappers.push(wrapper);
    }
    wrappers
}

/// Adds entries of `from` for events `into` does not handle yet.
fn merge_listeners(into: &mut ListenerSet, from: &ListenerSet) {
    for (event, listener) in from {
        into.entry(event.clone())
            .or_insert_with(|| listener.clone());
    }
}

fn base_handlers(handle: &RendererHandle) -> Handlers {
    Handlers::new()
        .on_open({
            let handle = handle.clone();
            move |_, call| {
                if let Some(inner) = handle.inner() {
                    inner.patcher.borrow_mut().open(call);
                }
            }
        })
        .on_close({
            let handle = handle.clone();
            move |_, tag| {
                if let Some(inner) = handle.inner() {
                    inner.patcher.borrow_mut().close(tag);
                }
            }
        })
        .on_text({
            let handle = handle.clone();
            move |_, call| {
                if let Some(inner) = handle.inner() {
                    inner.patcher.borrow_mut().text(call);
                }
            }
        })
        .on_attr({
            let handle = handle.clone();
            move |_, name, value| {
                if let Some(inner) = handle.inner() {
                    inner.patcher.borrow_mut().attr(name, value);
                }
            }
        })
}

fn engine_handlers(handle: &RendererHandle) -> Handlers {
    Handlers::new()
        .on_open({
            let handle = handle.clone();
            move |next, call| match handle.inner() {
                Some(inner) => inner.engine_open(next, call),
                None => next.open(call),
            }
        })
        .on_close({
            let handle = handle.clone();
            move |next, tag| match handle.inner() {
                Some(inner) => inner.engine_close(next, tag),
                None => next.close(tag),
            }
        })
        .on_attr({
            let handle = handle.clone();
            move |next, name, value| match handle.inner() {
                Some(inner) => inner.engine_attr(next, name, value),
                None => next.attr(name, value),
            }
        })
}

/// Pops a patch scope on every exit path.
struct ScopeGuard<'a> {
    inner: &'a RendererInner,
    height: usize,
    armed: bool,
}

impl ScopeGuard<'_> {
    fn finish(mut self) -> Result<(), RenderError> {
        self.armed = false;
        self.inner.stack.truncate(self.height);
        let scope = self.inner.scopes.borrow_mut().pop();
        self.inner.finish_scope(scope)
    }
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.inner.stack.truncate(self.height);
            self.inner.scopes.borrow_mut().pop();
        }
    }
}

enum Target {
    Outer(NodeId),
    Detached(Option<NodeId>),
}

impl RendererInner {
    fn patching_component(&self) -> Option<ComponentHandle> {
        self.scopes
            .borrow()
            .iter()
            .find_map(|scope| scope.initiator.clone())
    }

    fn record(&self, error: RenderError) {
        let mut scopes = self.scopes.borrow_mut();
        match scopes.last_mut() {
            Some(scope) => {
                debug!("recorded {error}");
                scope.error.get_or_insert(error);
            }
            None => error!("render error outside of a patch: {error}"),
        }
    }

    fn structural(&self, error: RenderError) {
        if self.config.strict_structure {
            self.record(error);
        } else {
            warn!("tolerated structural error: {error}");
        }
    }

    /// Component whose render is issuing calls, or the owner of the captured
    /// node being replayed.
    fn current_owner(&self) -> Option<ComponentHandle> {
        if let Some(owner) = self.captures.replay_owner() {
            if let Some(owner) = owner.upgrade() {
                return Some(owner);
            }
        }
        self.rendering()
    }

    fn rendering(&self) -> Option<ComponentHandle> {
        self.renders
            .borrow()
            .last()
            .map(|frame| frame.component.clone())
    }

    fn resolve_tag(&self, tag: Tag) -> Tag {
        match tag {
            Tag::Element(name) if self.config.compat_capitalized_tags => {
                let capitalized = name.chars().next().is_some_and(char::is_uppercase);
                let registered = capitalized
                    .then(|| self.registry.borrow().get(&name).cloned())
                    .flatten();
                match registered {
                    Some(ctor) => Tag::Component(ctor),
                    None => Tag::Element(name),
                }
            }
            tag => tag,
        }
    }

    fn resolve_listener(&self, value: &Value, owner: Option<&ComponentHandle>) -> Option<Listener> {
        match value {
            Value::Listener(listener) => Some(listener.clone()),
            Value::Str(name) => match owner {
                Some(owner) => owner.named_listener(name),
                None => {
                    warn!("listener {name:?} named outside any component");
                    None
                }
            },
            Value::Null | Value::Bool(false) => None,
            other => {
                warn!("ignoring non-listener value {other:?} on a listener attribute");
                None
            }
        }
    }

    /// Splits inline-listener attributes out of `attrs`.
    fn take_listeners(
        &self,
        attrs: Vec<Attr>,
        owner: Option<&ComponentHandle>,
        listeners: &mut ListenerSet,
    ) -> Vec<Attr> {
        attrs
            .into_iter()
            .filter_map(|(name, value)| match self.config.listener_event(&name) {
                Some(event) => {
                    if let Some(listener) = self.resolve_listener(&value, owner) {
                        listeners.insert(Rc::from(event), listener);
                    }
                    None
                }
                None => Some((name, value)),
            })
            .collect()
    }

    fn engine_open(&self, next: &Next<'_>, call: OpenCall) {
        let mut call = OpenCall {
            tag: self.resolve_tag(call.tag),
            ..call
        };
        if call.tag.is_component() {
            self.begin_component_tag(call);
            return;
        }

        let owner = self.current_owner();
        let mut listeners = ListenerSet::default();
        let statics = std::mem::take(&mut call.statics);
        call.statics = self.take_listeners(statics, owner.as_ref(), &mut listeners);
        let attrs = std::mem::take(&mut call.attrs);
        call.attrs = self.take_listeners(attrs, owner.as_ref(), &mut listeners);

        let root = self.root_identity();
        if let Some(frame) = self.renders.borrow_mut().last_mut() {
            if frame.depth == 0 && frame.root.is_some() {
                debug!("{} renders more than one root element", frame.component.id());
            }
            frame.enter_element(call.key.as_ref());
        }
        if let Some((key, forwarded)) = &root {
            if call.key.is_none() {
                call.key = Some(key.clone());
            }
            merge_listeners(&mut listeners, forwarded);
        }

        next.open(call);

        let node = self.patcher.borrow().current_element();
        let Some(node) = node else {
            return;
        };
        if root.is_some() {
            if let Some(frame) = self.renders.borrow_mut().last_mut() {
                frame.root = Some(node);
            }
        }
        if let Some(scope) = self.scopes.borrow_mut().last_mut() {
            scope.visited.insert(node, listeners);
        }
    }

    /// Key and forwarded listeners for an element that becomes the root of
    /// the rendering component, and of every wrapper component whose render
    /// consists of nothing but that component.
    fn root_identity(&self) -> Option<(Rc<str>, ListenerSet)> {
        let renders = self.renders.borrow();
        let mut forwarded = ListenerSet::default();
        let mut outermost = None;
        for frame in renders
            .iter()
            .rev()
            .take_while(|frame| frame.depth == 0 && frame.root.is_none())
        {
            merge_listeners(&mut forwarded, &frame.forwarded);
            outermost = Some(&frame.component);
        }
        let outermost = outermost?;
        let mut key = outermost.0.id.clone();

        // A directly patched instance keeps the key its element was created
        // with, along with listeners forwarded by wrappers sharing the element.
        let initiator = self
            .scopes
            .borrow()
            .last()
            .and_then(|scope| scope.initiator.clone());
        if let (Some(initiator), Some(element)) = (initiator, outermost.element()) {
            if initiator.ptr_eq(outermost) {
                if let Some(existing) = self.patcher.borrow().key_of(element) {
                    key = existing;
                }
                for wrapper in sharing_root(outermost, Some(element)) {
                    merge_listeners(&mut forwarded, &wrapper.forwarded());
                }
            }
        }
        Some((key, forwarded))
    }

    fn engine_close(&self, next: &Next<'_>, tag: &Tag) {
        let balanced = {
            let mut renders = self.renders.borrow_mut();
            match renders.last_mut() {
                Some(frame) if frame.depth == 0 => false,
                Some(frame) => {
                    frame.leave_element();
                    true
                }
                None => true,
            }
        };
        if !balanced {
            self.structural(
                PatchError::CloseWithoutOpen {
                    tag: Rc::from(tag.name()),
                }
                .into(),
            );
            return;
        }
        next.close(tag);
    }

    fn engine_attr(&self, next: &Next<'_>, name: Rc<str>, value: Value) {
        let Some(event) = self.config.listener_event(&name) else {
            next.attr(name, value);
            return;
        };
        let owner = self.current_owner();
        let listener = self.resolve_listener(&value, owner.as_ref());
        let element = self.patcher.borrow().current_element();
        let (Some(element), Some(listener)) = (element, listener) else {
            return;
        };
        if let Some(scope) = self.scopes.borrow_mut().last_mut() {
            scope
                .visited
                .entry(element)
                .or_default()
                .insert(Rc::from(event), listener);
        }
    }

    /// Captures the component tag with everything up to its close, then
    /// reconciles it.
    fn begin_component_tag(&self, call: OpenCall) {
        let owner = match self.captures.replay_owner() {
            Some(owner) => owner,
            None => self
                .rendering()
                .map(|component| OwnerRef::of(&component))
                .unwrap_or_default(),
        };
        let handle = self.handle.clone();
        self.captures.capture(&self.stack, owner, move |root| {
            if let Some(inner) = handle.inner() {
                inner.reconcile_component(root);
            }
        });
        self.stack.open(call);
    }

    fn component_props(
        &self,
        element: &CapturedElement,
        owner: &ComponentHandle,
    ) -> (Props, ListenerSet, Option<Rc<str>>) {
        let mut props = Props::new();
        let mut forwarded = ListenerSet::default();
        let mut reference = None;
        for (name, value) in element.statics.iter().chain(element.attrs.iter()) {
            if let Some(event) = self.config.listener_event(name) {
                if let Some(listener) = self.resolve_listener(value, Some(owner)) {
                    forwarded.insert(Rc::from(event), listener);
                }
            } else if &**name == REF_ATTR {
                reference = value.as_str().map(Rc::from);
            } else {
                props.insert(name.clone(), value.clone());
            }
        }
        if !element.children.is_empty() {
            props.insert(CHILDREN, element.children.clone());
        }
        (props, forwarded, reference)
    }

    fn reconcile_component(&self, root: CapturedNode) {
        let Some(element) = root.as_element() else {
            return;
        };
        let Tag::Component(ctor) = &element.tag else {
            return;
        };
        let Some(rendering) = self.rendering() else {
            warn!("component tag {} outside of any render", ctor.name());
            return;
        };
        let owner = element.owner.upgrade().unwrap_or_else(|| rendering.clone());

        let local = match self.renders.borrow_mut().last_mut() {
            Some(frame) => frame.child_id(element.key.as_deref()),
            None => return,
        };
        let mut id = if owner.ptr_eq(&rendering) {
            local
        } else {
            format!("{}{local}", rendering.id())
        };
        {
            let children = owner.0.children.borrow();
            if children.is_used(&id) {
                warn!("duplicate component id {id} under {}", owner.id());
                let base = id.clone();
                let mut n = 1;
                while children.is_used(&id) {
                    id = format!("{base}~{n}");
                    n += 1;
                }
            }
        }
        let id: Rc<str> = Rc::from(id);

        let (props, forwarded, reference) = self.component_props(element, &owner);
        let existing = owner.0.children.borrow_mut().lookup(&id);
        let instance = match existing {
            Some(existing) if existing.ctor() == ctor && !existing.is_disposed() => {
                existing.set_parent(&rendering);
                owner
                    .0
                    .children
                    .borrow_mut()
                    .mark_used(id.clone(), existing.clone());
                let changes = existing.set_props(props);
                let listeners_changed = existing.set_forwarded(forwarded);
                let forced = existing.take_render_request();
                let update = forced
                    || listeners_changed
                    || existing.element().is_none()
                    || existing.component().should_update(&changes);
                debug!("reusing {} as {id} (update: {update})", ctor.name());
                if update {
                    self.render_instance(&existing);
                } else if let Some(element) = existing.element() {
                    self.patcher.borrow_mut().skip_to(element);
                }
                existing
            }
            stale => {
                if let Some(stale) = stale {
                    debug!(
                        "{id} changed from {} to {}; replacing",
                        stale.ctor().name(),
                        ctor.name()
                    );
                    stale.dispose();
                }
                let instance = ComponentHandle::new(
                    id.clone(),
                    element.key.clone(),
                    ctor.clone(),
                    self.handle.clone(),
                    props,
                    forwarded,
                );
                debug!("created {} as {id}", ctor.name());
                instance.set_parent(&rendering);
                owner
                    .0
                    .children
                    .borrow_mut()
                    .mark_used(id.clone(), instance.clone());
                self.render_instance(&instance);
                instance
            }
        };

        if let Some(name) = reference {
            owner.register_ref(name, &instance);
        }
        if let Some(frame) = self.renders.borrow_mut().last_mut() {
            if frame.depth == 0 && frame.root.is_none() {
                frame.root = instance.element();
            }
        }
    }

    /// Renders `instance` at the current cursor.
    fn render_instance(&self, instance: &ComponentHandle) {
        if instance.is_disposed() {
            trace!("skipping render of disposed {}", instance.id());
            return;
        }
        let saved_replay = self.captures.suspend_replay();
        let height = self.stack.height();
        let captures = self.captures.depth();

        instance.0.children.borrow_mut().begin_cycle();
        self.renders
            .borrow_mut()
            .push(RenderFrame::new(instance.clone()));
        trace!("render {} ({})", instance.id(), instance.ctor().name());

        let cx = RenderCx {
            inner: self,
            component: instance,
        };
        instance.component().render(&cx);

        let frame = self.renders.borrow_mut().pop();
        for owner in self.captures.truncate(captures) {
            let owner = owner
                .upgrade()
                .map(|owner| Rc::from(owner.id()))
                .unwrap_or_else(|| Rc::from("?"));
            self.structural(CaptureError::Unclosed { owner }.into());
        }
        self.stack.truncate(height);
        self.captures.resume_replay(saved_replay);

        let Some(frame) = frame else {
            return;
        };
        if frame.depth > 0 {
            self.structural(RenderError::Unbalanced {
                component: instance.0.id.clone(),
                open: frame.depth,
            });
            let closed = self.patcher.borrow_mut().unwind(frame.depth);
            debug!("closed {closed} element(s) left open by {}", instance.id());
        }
        instance.set_element(frame.root);

        let keep = instance.take_skip_next_disposal();
        let unused = instance.0.children.borrow_mut().end_cycle(keep);
        if !unused.is_empty() {
            debug!(
                "{} scheduling {} unused child(ren) for disposal",
                instance.id(),
                unused.len()
            );
            self.disposal.schedule(unused);
        }
        let first = instance.finish_render();
        instance.component().rendered(first);
    }

    fn target(&self, instance: &ComponentHandle) -> Target {
        let element = instance.element();
        let patcher = self.patcher.borrow();
        match element {
            Some(element) if patcher.dom().parent(element).is_some() => Target::Outer(element),
            element => Target::Detached(element),
        }
    }

    fn patch(&self, instance: &ComponentHandle) -> Result<(), RenderError> {
        if instance.is_disposed() {
            return Err(RenderError::Disposed);
        }
        if instance.element().is_none() {
            if let Some(parent) = instance.parent() {
                trace!("{} has no element; patching {}", instance.id(), parent.id());
                instance.request_render();
                return self.patch(&parent);
            }
        }
        let old_root = instance.element();
        let wrappers = sharing_root(instance, old_root);
        let result = match self.target(instance) {
            Target::Outer(element) => self.run_scope(instance, |inner| {
                inner.patcher.borrow_mut().enter_outer(element)?;
                inner.render_instance(instance);
                inner.patcher.borrow_mut().exit();
                Ok(())
            }),
            Target::Detached(element) => {
                let attach_point = std::iter::once(instance)
                    .chain(&wrappers)
                    .find_map(ComponentHandle::attach_point);
                self.patch_detached(instance, element, attach_point)
            }
        };

        let new_root = instance.element();
        if new_root != old_root {
            for wrapper in &wrappers {
                trace!("{} follows its root to {new_root:?}", wrapper.id());
                wrapper.set_element(new_root);
            }
        }
        result
    }

    /// Patches through a scratch parent, then puts the root back where
    /// `attach` last placed it.
    fn patch_detached(
        &self,
        instance: &ComponentHandle,
        element: Option<NodeId>,
        attach_point: Option<(NodeId, Option<NodeId>)>,
    ) -> Result<(), RenderError> {
        let scratch = {
            let mut patcher = self.patcher.borrow_mut();
            let dom = patcher.dom_mut();
            let scratch = dom.create_element(SCRATCH_TAG);
            if let Some(element) = element {
                dom.insert_before(scratch, element, None)?;
            }
            scratch
        };
        let result = self.run_scope(instance, |inner| {
            inner.patcher.borrow_mut().enter_inner(scratch)?;
            inner.render_instance(instance);
            inner.patcher.borrow_mut().exit();
            Ok(())
        });

        let root = instance.element();
        let mut patcher = self.patcher.borrow_mut();
        let dom = patcher.dom_mut();
        if let Some(root) = root {
            if dom.parent(root) == Some(scratch) {
                dom.remove_child(scratch, root)?;
            }
        }
        dom.release(scratch)?;
        if let (Some(root), Some((parent, before))) = (root, attach_point) {
            let before = before.filter(|&before| dom.parent(before) == Some(parent));
            dom.insert_before(parent, root, before)?;
        }
        result
    }

    fn run_scope(
        &self,
        initiator: &ComponentHandle,
        body: impl FnOnce(&Self) -> Result<(), RenderError>,
    ) -> Result<(), RenderError> {
        let height = self.stack.height();
        self.scopes
            .borrow_mut()
            .push(PatchScope::new(Some(initiator.clone())));
        let guard = ScopeGuard {
            inner: self,
            height,
            armed: true,
        };
        self.stack.start(engine_handlers(&self.handle));
        debug!("patch of {} started", initiator.id());

        let result = body(self);
        let finished = guard.finish();
        debug!("patch of {} finished", initiator.id());
        result.and(finished)
    }

    fn finish_scope(&self, scope: Option<PatchScope>) -> Result<(), RenderError> {
        let Some(scope) = scope else {
            return Ok(());
        };
        let outermost = self.scopes.borrow().is_empty();
        let patch_error = self.patcher.borrow_mut().take_error();
        let capture_error = self.captures.take_errors().into_iter().next();

        {
            let mut patcher = self.patcher.borrow_mut();
            let mut listeners = self.listeners.borrow_mut();
            let diff = listeners.reconcile_all(patcher.dom_mut(), scope.visited);
            let mut totals = self.listener_totals.get();
            totals.merge(diff);
            self.listener_totals.set(totals);

            if outermost {
                let removed = patcher.take_removed();
                let removed_set: HashSet<NodeId> = removed.iter().copied().collect();
                for node in removed {
                    let mut top = node;
                    while let Some(parent) = patcher.dom().parent(top) {
                        top = parent;
                    }
                    if removed_set.contains(&top) {
                        listeners.forget(node);
                        patcher.forget(node);
                    }
                }
            }
        }

        if outermost {
            self.disposal.sweep();
        }

        let error = scope
            .error
            .or_else(|| patch_error.map(RenderError::from))
            .or_else(|| capture_error.map(RenderError::from));
        match error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn dispose(&self, instance: &ComponentHandle) {
        if !instance.mark_disposed() {
            return;
        }
        debug!("disposing {} ({})", instance.id(), instance.ctor().name());
        let children = instance.0.children.borrow_mut().drain();
        for child in children {
            child.dispose();
        }
        if instance.attach_point().is_some() {
            instance.set_attach_point(None);
            if let Some(element) = instance.element() {
                let mut patcher = self.patcher.borrow_mut();
                let dom = patcher.dom_mut();
                match dom.parent(element) {
                    Some(parent) => {
                        if let Err(err) = dom.remove_child(parent, element) {
                            warn!("removing {} from the document: {err}", instance.id());
                        }
                    }
                    None => warn!(
                        "{} was attached but is no longer in the document",
                        instance.id()
                    ),
                }
            }
        }
        Disposable::clear_parent(instance);
        instance.component().disposed();
    }
}

impl ComponentHandle {
    fn inner(&self) -> Result<Rc<RendererInner>, RenderError> {
        self.0.renderer.inner().ok_or(RenderError::RendererGone)
    }

    /// Re-renders in place.
    pub fn patch(&self) -> Result<(), RenderError> {
        self.inner()?.patch(self)
    }

    /// Replaces the props and patches when `should_update` agrees. Returns
    /// whether a patch ran.
    pub fn update(&self, props: Props) -> Result<bool, RenderError> {
        let changes = self.set_props(props);
        if !self.component().should_update(&changes) {
            return Ok(false);
        }
        self.patch()?;
        Ok(true)
    }

    /// Renders the component if it has not rendered yet and returns its root
    /// node, detached unless the component was attached.
    pub fn build_element(&self) -> Result<Option<NodeId>, RenderError> {
        if self.element().is_none() || self.render_count() == 0 {
            self.patch()?;
        }
        Ok(self.element())
    }

    /// Inserts the root element under `parent`; the position is remembered
    /// for later renders that replace or produce the root.
    pub fn attach(&self, parent: NodeId, before: Option<NodeId>) -> Result<(), RenderError> {
        let inner = self.inner()?;
        self.set_attach_point(Some((parent, before)));
        if let Some(element) = self.element() {
            inner
                .patcher
                .borrow_mut()
                .dom_mut()
                .insert_before(parent, element, before)?;
        }
        Ok(())
    }

    pub fn detach(&self) -> Result<(), RenderError> {
        let inner = self.inner()?;
        self.set_attach_point(None);
        let Some(element) = self.element() else {
            return Ok(());
        };
        let mut patcher = inner.patcher.borrow_mut();
        let dom = patcher.dom_mut();
        if let Some(parent) = dom.parent(element) {
            dom.remove_child(parent, element)?;
        }
        Ok(())
    }

    pub fn is_in_document(&self) -> bool {
        let (Some(element), Ok(inner)) = (self.element(), self.inner()) else {
            return false;
        };
        let patcher = inner.patcher.borrow();
        patcher.dom().parent(element).is_some()
    }

    /// Disposes this instance and every child it owns.
    pub fn dispose(&self) {
        match self.0.renderer.inner() {
            Some(inner) => inner.dispose(self),
            None => {
                if self.mark_disposed() {
                    for child in self.0.children.borrow_mut().drain() {
                        child.dispose();
                    }
                    self.component().disposed();
                }
            }
        }
    }
}

/// Authoring API handed to [`crate::Component::render`].
pub struct RenderCx<'a> {
    inner: &'a RendererInner,
    component: &'a ComponentHandle,
}

impl<'a> RenderCx<'a> {
    pub fn component(&self) -> &'a ComponentHandle {
        self.component
    }

    pub fn props(&self) -> Props {
        self.component.props()
    }

    pub fn prop(&self, name: &str) -> Option<Value> {
        self.component.props_ref().get(name).cloned()
    }

    pub fn children(&self) -> Vec<CapturedNode> {
        self.component.props_ref().children().to_vec()
    }

    pub fn open(&self, call: OpenCall) {
        self.inner.stack.open(call);
    }

    pub fn close(&self, tag: impl Into<Tag>) {
        self.inner.stack.close(&tag.into());
    }

    pub fn text(&self, call: impl Into<TextCall>) {
        self.inner.stack.text(call.into());
    }

    pub fn attr(&self, name: impl Into<Rc<str>>, value: impl Into<Value>) {
        self.inner.stack.attr(name.into(), value.into());
    }

    pub fn open_start(&self, call: OpenCall) {
        self.inner.stack.open_start(call);
    }

    pub fn open_end(&self) {
        self.inner.stack.open_end();
    }

    pub fn void(&self, call: OpenCall) {
        self.inner.stack.void_element(call);
    }

    pub fn render_child(&self, node: &CapturedNode) {
        self.inner.captures.render(&self.inner.stack, node, None);
    }

    pub fn render_child_with(&self, node: &CapturedNode, skip: impl Fn(&CapturedNode) -> bool) {
        let skip: &dyn Fn(&CapturedNode) -> bool = &skip;
        self.inner
            .captures
            .render(&self.inner.stack, node, Some(skip));
    }

    pub fn render_children(&self) {
        for child in self.children() {
            self.render_child(&child);
        }
    }

    /// Captures whatever `f` emits instead of rendering it.
    pub fn capture(&self, f: impl FnOnce(&Self)) -> Option<CapturedNode> {
        let slot = Rc::new(RefCell::new(None));
        self.inner.captures.capture(&self.inner.stack, OwnerRef::of(self.component), {
            let slot = slot.clone();
            move |node| *slot.borrow_mut() = Some(node)
        });
        let height = self.inner.stack.height();
        f(self);
        let node = slot.borrow_mut().take();
        if node.is_none() {
            self.inner.stack.truncate(height.saturating_sub(1));
            self.inner.captures.truncate(self.inner.captures.depth().saturating_sub(1));
        }
        node
    }

    /// Resolves a tag name, honouring compatibility mode.
    pub fn tag(&self, name: &str) -> Tag {
        self.inner.resolve_tag(Tag::element(name))
    }

    /// Handler named `name` on this component.
    pub fn listener(&self, name: &str) -> Option<Listener> {
        self.component.named_listener(name)
    }

    pub fn patching_component(&self) -> Option<ComponentHandle> {
        self.inner.patching_component()
    }
}

#[cfg(test)]
#[path = "tests/renderer_tests.rs"]
mod tests;
