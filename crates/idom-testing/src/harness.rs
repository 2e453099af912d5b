use std::cell::RefCell;
use std::rc::Rc;

use idom_core::{
    ComponentHandle, ComponentRef, Dom, DomStats, MemoryDom, NodeId, Props, RenderError,
    Renderer, RendererConfig,
};

/// Routes `log` output through the test harness. Safe to call repeatedly.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A renderer over a [`MemoryDom`] with a `<body>` container to mount into.
pub struct TestRoot {
    renderer: Renderer,
    container: NodeId,
}

impl Default for TestRoot {
    fn default() -> Self {
        Self::new()
    }
}

impl TestRoot {
    pub fn new() -> Self {
        Self::with_config(RendererConfig::default())
    }

    pub fn with_config(config: RendererConfig) -> Self {
        init_logging();
        let mut dom = MemoryDom::new();
        let container = dom.create_element("body");
        Self {
            renderer: Renderer::new(dom, config),
            container,
        }
    }

    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    pub fn container(&self) -> NodeId {
        self.container
    }

    /// Creates a root component, attaches it to the container and renders it.
    pub fn mount(&self, ctor: &ComponentRef, props: Props) -> Result<ComponentHandle, RenderError> {
        let component = self.renderer.mount(ctor, props);
        component.attach(self.container, None)?;
        component.build_element()?;
        Ok(component)
    }

    /// Markup of everything inside the container.
    pub fn html(&self) -> String {
        self.with_memory(|dom| {
            dom.children(self.container)
                .into_iter()
                .map(|child| dom.to_html(child))
                .collect()
        })
    }

    pub fn html_of(&self, node: NodeId) -> String {
        self.with_memory(|dom| dom.to_html(node))
    }

    pub fn stats(&self) -> DomStats {
        self.with_memory(|dom| dom.stats())
    }

    pub fn reset_stats(&self) {
        let _ = self.renderer.with_dom::<MemoryDom, _>(|dom| dom.reset_stats());
    }

    pub fn listener_count(&self, node: NodeId) -> usize {
        self.with_memory(|dom| dom.listener_count(node))
    }

    pub fn attribute(&self, node: NodeId, name: &str) -> Option<String> {
        self.renderer.dom(|dom| dom.attribute(node, name))
    }

    pub fn children(&self, node: NodeId) -> Vec<NodeId> {
        self.renderer.dom(|dom| dom.children(node))
    }

    /// First element with `tag` in document order under the container.
    pub fn find(&self, tag: &str) -> Option<NodeId> {
        self.find_all(tag).into_iter().next()
    }

    pub fn find_all(&self, tag: &str) -> Vec<NodeId> {
        self.renderer.dom(|dom| {
            let mut found = Vec::new();
            collect(dom, self.container, tag, &mut found);
            found
        })
    }

    /// Fires `event_type` at `node`; returns how many listeners ran.
    pub fn fire(&self, node: NodeId, event_type: &str) -> usize {
        self.renderer.dispatch(node, event_type)
    }

    fn with_memory<R: Default>(&self, f: impl FnOnce(&mut MemoryDom) -> R) -> R {
        self.renderer
            .with_dom::<MemoryDom, _>(f)
            .unwrap_or_default()
    }
}

fn collect(dom: &dyn Dom, node: NodeId, tag: &str, found: &mut Vec<NodeId>) {
    for child in dom.children(node) {
        if dom.tag(child) == Some(tag) {
            found.push(child);
        }
        collect(dom, child, tag, found);
    }
}

/// Shared, ordered log of lifecycle events written by test components.
#[derive(Clone, Default)]
pub struct EventLog(Rc<RefCell<Vec<String>>>);

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.0.borrow_mut().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.borrow().clone()
    }

    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.0.borrow_mut())
    }

    /// Number of entries equal to `entry`.
    pub fn count(&self, entry: &str) -> usize {
        self.0.borrow().iter().filter(|logged| *logged == entry).count()
    }
}
