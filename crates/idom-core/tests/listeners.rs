use std::cell::{Cell, RefCell};
use std::rc::Rc;

use idom_core::{Event, ListenerDiff};
use idom_testing::prelude::*;

/// A button whose click handler is created once per instance.
struct Clicker {
    clicks: Rc<Cell<usize>>,
    on_click: Listener,
    attribute: &'static str,
}

impl Clicker {
    fn new(clicks: Rc<Cell<usize>>, attribute: &'static str) -> Self {
        let on_click = {
            let clicks = clicks.clone();
            Listener::new(move |event: &Event| {
                assert_eq!(&*event.event_type, "click");
                clicks.set(clicks.get() + 1);
            })
        };
        Self {
            clicks,
            on_click,
            attribute,
        }
    }
}

impl Component for Clicker {
    fn render(&self, cx: &RenderCx<'_>) {
        cx.open(OpenCall::new("button").attr(self.attribute, self.on_click.clone()));
        cx.text(format!("clicked {}", self.clicks.get()));
        cx.close("button");
    }
}

fn clicker(clicks: &Rc<Cell<usize>>, attribute: &'static str) -> ComponentRef {
    let clicks = clicks.clone();
    ComponentRef::new("Clicker", move || Clicker::new(clicks.clone(), attribute))
}

#[test]
fn inline_listener_is_attached_once() {
    let clicks = Rc::new(Cell::new(0));
    let root = TestRoot::new();
    let handle = root
        .mount(&clicker(&clicks, "data-onclick"), Props::new())
        .expect("mount");
    let button = root.find("button").expect("button");

    handle.patch().expect("patch");
    handle.patch().expect("patch");

    assert_eq!(root.stats().listeners_attached, 1);
    assert_eq!(root.stats().listeners_detached, 0);
    assert_eq!(root.listener_count(button), 1);
    assert_eq!(root.html(), "<button>clicked 0</button>");
    assert_eq!(root.attribute(button, "data-onclick"), None);

    assert_eq!(root.fire(button, "click"), 1);
    assert_eq!(clicks.get(), 1);
}

#[test]
fn capitalized_on_prefix_is_a_listener() {
    let clicks = Rc::new(Cell::new(0));
    let root = TestRoot::new();
    root.mount(&clicker(&clicks, "onClick"), Props::new())
        .expect("mount");
    let button = root.find("button").expect("button");

    assert_eq!(root.fire(button, "click"), 1);
    assert_eq!(clicks.get(), 1);
    assert_eq!(root.html(), "<button>clicked 0</button>");
}

#[test]
fn lowercase_on_attribute_stays_an_attribute() {
    let root = TestRoot::new();
    struct Plain;
    impl Component for Plain {
        fn render(&self, cx: &RenderCx<'_>) {
            cx.open(OpenCall::new("div").attr("one", "1"));
            cx.close("div");
        }
    }
    root.mount(&ComponentRef::new("Plain", || Plain), Props::new())
        .expect("mount");

    assert_eq!(root.html(), "<div one=\"1\"></div>");
    assert_eq!(root.stats().listeners_attached, 0);
}

/// Handler referenced by name; resolved through `Component::listener`.
struct Named {
    log: EventLog,
}

impl Component for Named {
    fn render(&self, cx: &RenderCx<'_>) {
        cx.open(OpenCall::new("form"));
        cx.open(OpenCall::new("button").static_attr("data-onclick", "save"));
        cx.close("button");
        cx.close("form");
    }

    fn listener(&self, name: &str) -> Option<Listener> {
        let log = self.log.clone();
        let name = name.to_string();
        Some(Listener::new(move |_| log.push(format!("called {name}"))))
    }
}

#[test]
fn named_listener_resolves_once_per_instance() {
    let log = EventLog::new();
    let named = {
        let log = log.clone();
        ComponentRef::new("Named", move || Named { log: log.clone() })
    };
    let root = TestRoot::new();
    let handle = root.mount(&named, Props::new()).expect("mount");
    let button = root.find("button").expect("button");

    handle.patch().expect("patch");

    assert_eq!(root.stats().listeners_attached, 1);
    assert_eq!(root.fire(button, "click"), 1);
    assert_eq!(log.entries(), vec!["called save"]);
}

/// Creates a fresh closure on every render.
#[derive(Default)]
struct Unstable;

impl Component for Unstable {
    fn render(&self, cx: &RenderCx<'_>) {
        cx.open(OpenCall::new("input").attr("data-oninput", Listener::new(|_| {})));
        cx.close("input");
    }
}

#[test]
fn replaced_closure_is_swapped() {
    let root = TestRoot::new();
    let handle = root
        .mount(&ComponentRef::of::<Unstable>(), Props::new())
        .expect("mount");
    let input = root.find("input").expect("input");

    handle.patch().expect("patch");

    assert_eq!(root.stats().listeners_attached, 2);
    assert_eq!(root.stats().listeners_detached, 1);
    assert_eq!(root.listener_count(input), 1);
    assert_eq!(
        root.renderer().listener_totals(),
        ListenerDiff {
            attached: 2,
            detached: 1,
            kept: 0,
        }
    );
}

/// Toggles its listener on and off between renders.
struct Toggle {
    enabled: Cell<bool>,
    on_click: Listener,
}

impl Component for Toggle {
    fn render(&self, cx: &RenderCx<'_>) {
        let mut call = OpenCall::new("a");
        if self.enabled.get() {
            call = call.attr("data-onclick", self.on_click.clone());
        }
        cx.open(call);
        cx.close("a");
    }
}

#[test]
fn dropped_listener_is_detached() {
    let root = TestRoot::new();
    let toggle = ComponentRef::new("Toggle", || Toggle {
        enabled: Cell::new(true),
        on_click: Listener::new(|_| {}),
    });
    let handle = root.mount(&toggle, Props::new()).expect("mount");
    let link = root.find("a").expect("a");
    assert_eq!(root.listener_count(link), 1);

    handle
        .downcast_ref::<Toggle>()
        .expect("toggle")
        .enabled
        .set(false);
    handle.patch().expect("patch");

    assert_eq!(root.listener_count(link), 0);
    assert_eq!(root.stats().listeners_detached, 1);
}

/// Sets the listener between `open_start` and `open_end`, and another one
/// after the element is open.
struct Deferred {
    on_click: Listener,
    on_focus: Listener,
}

impl Component for Deferred {
    fn render(&self, cx: &RenderCx<'_>) {
        cx.open_start(OpenCall::new("button"));
        cx.attr("type", "submit");
        cx.attr("data-onclick", self.on_click.clone());
        cx.open_end();
        cx.attr("data-onfocus", self.on_focus.clone());
        cx.close("button");
    }
}

#[test]
fn listeners_set_through_attr_calls() {
    let root = TestRoot::new();
    let deferred = ComponentRef::new("Deferred", || Deferred {
        on_click: Listener::new(|_| {}),
        on_focus: Listener::new(|_| {}),
    });
    let handle = root.mount(&deferred, Props::new()).expect("mount");
    let button = root.find("button").expect("button");

    handle.patch().expect("patch");

    assert_eq!(root.html(), "<button type=\"submit\"></button>");
    assert_eq!(root.fire(button, "click"), 1);
    assert_eq!(root.fire(button, "focus"), 1);
    assert_eq!(root.stats().listeners_attached, 2);
    assert_eq!(root.stats().listeners_detached, 0);
}

#[derive(Default)]
struct Button;

impl Component for Button {
    fn render(&self, cx: &RenderCx<'_>) {
        cx.open(OpenCall::new("button"));
        cx.text("go");
        cx.close("button");
    }
}

/// Passes a listener to a nested component through its tag.
struct Forwarder {
    forward: Cell<bool>,
    on_click: Listener,
}

impl Component for Forwarder {
    fn render(&self, cx: &RenderCx<'_>) {
        let button = ComponentRef::of::<Button>();
        let mut call = OpenCall::new(button.clone());
        if self.forward.get() {
            call = call.attr("data-onclick", self.on_click.clone());
        }
        cx.open(call);
        cx.close(button);
    }
}

#[test]
fn listener_on_component_tag_lands_on_its_root_element() {
    let clicks = Rc::new(Cell::new(0));
    let forwarder = {
        let clicks = clicks.clone();
        ComponentRef::new("Forwarder", move || {
            let clicks = clicks.clone();
            Forwarder {
                forward: Cell::new(true),
                on_click: Listener::new(move |_| clicks.set(clicks.get() + 1)),
            }
        })
    };
    let root = TestRoot::new();
    let handle = root.mount(&forwarder, Props::new()).expect("mount");
    let button = root.find("button").expect("button");
    let totals = || root.renderer().listener_totals();

    assert_eq!((totals().attached, totals().detached), (1, 0));
    assert_eq!(root.fire(button, "click"), 1);
    assert_eq!(clicks.get(), 1);

    handle.patch().expect("patch");
    assert_eq!((totals().attached, totals().detached), (1, 0));

    handle
        .downcast_ref::<Forwarder>()
        .expect("forwarder")
        .forward
        .set(false);
    handle.patch().expect("patch");
    assert_eq!((totals().attached, totals().detached), (1, 1));
    assert_eq!(root.listener_count(button), 0);
    assert_eq!(root.html(), "<button>go</button>");
}

/// Re-renders itself from its own click handler.
struct Counter {
    count: Rc<Cell<usize>>,
    this: Rc<RefCell<Option<ComponentHandle>>>,
}

impl Component for Counter {
    fn render(&self, cx: &RenderCx<'_>) {
        cx.open(OpenCall::new("button").static_attr("data-onclick", "increment"));
        cx.text(self.count.get().to_string());
        cx.close("button");
    }

    fn listener(&self, name: &str) -> Option<Listener> {
        if name != "increment" {
            return None;
        }
        let count = self.count.clone();
        let this = self.this.clone();
        Some(Listener::new(move |_| {
            count.set(count.get() + 1);
            let handle = this.borrow().clone();
            if let Some(handle) = handle {
                handle.patch().expect("patch from handler");
            }
        }))
    }
}

#[test]
fn handler_may_patch_during_dispatch() {
    let this = Rc::new(RefCell::new(None));
    let counter = {
        let this = this.clone();
        ComponentRef::new("Counter", move || Counter {
            count: Rc::new(Cell::new(0)),
            this: this.clone(),
        })
    };
    let root = TestRoot::new();
    let handle = root.mount(&counter, Props::new()).expect("mount");
    *this.borrow_mut() = Some(handle.clone());
    let button = root.find("button").expect("button");

    root.fire(button, "click");
    root.fire(button, "click");

    assert_eq!(root.html(), "<button>2</button>");
    assert_eq!(root.stats().listeners_attached, 1);
}
