use super::*;
use crate::component::{Component, ComponentRef};
use crate::dom::MemoryDom;
use crate::renderer::RenderCx;

fn setup() -> (Patcher, NodeId) {
    let mut patcher = Patcher::new(Box::new(MemoryDom::new()));
    let root = patcher.dom_mut().create_element("body");
    (patcher, root)
}

fn memory(patcher: &Patcher) -> &MemoryDom {
    patcher
        .dom()
        .as_any()
        .downcast_ref::<MemoryDom>()
        .expect("memory dom")
}

fn list(patcher: &mut Patcher, root: NodeId, keys: &[&str]) {
    patcher.enter_inner(root).expect("enter");
    patcher.open(OpenCall::new("ul"));
    for key in keys {
        patcher.open(OpenCall::new("li").key(*key));
        patcher.text(TextCall::new(*key));
        patcher.close(&Tag::element("li"));
    }
    patcher.close(&Tag::element("ul"));
    patcher.exit();
}

#[test]
fn creates_then_reuses_nodes() {
    let (mut patcher, root) = setup();
    let render = |patcher: &mut Patcher, label: &str| {
        patcher.enter_inner(root).expect("enter");
        patcher.open(OpenCall::new("div").static_attr("class", "card"));
        patcher.open(OpenCall::new("span"));
        patcher.text(TextCall::new(label));
        patcher.close(&Tag::element("span"));
        patcher.close(&Tag::element("div"));
        patcher.exit();
    };

    render(&mut patcher, "one");
    let created = memory(&patcher).stats();
    render(&mut patcher, "two");

    assert_eq!(
        memory(&patcher).to_html(root),
        "<body><div class=\"card\"><span>two</span></div></body>"
    );
    assert_eq!(memory(&patcher).stats().elements_created, created.elements_created);
    assert_eq!(memory(&patcher).stats().texts_created, created.texts_created);
    assert!(patcher.take_error().is_none());
}

#[test]
fn statics_apply_only_on_creation() {
    let (mut patcher, root) = setup();
    let render = |patcher: &mut Patcher, class: &str| {
        patcher.enter_inner(root).expect("enter");
        patcher.open(OpenCall::new("div").static_attr("class", class));
        patcher.close(&Tag::element("div"));
        patcher.exit();
    };

    render(&mut patcher, "first");
    render(&mut patcher, "second");

    assert_eq!(memory(&patcher).to_html(root), "<body><div class=\"first\"></div></body>");
}

#[test]
fn dynamic_attributes_are_diffed() {
    let (mut patcher, root) = setup();
    let render = |patcher: &mut Patcher, attrs: &[(&str, Value)]| {
        patcher.enter_inner(root).expect("enter");
        let mut call = OpenCall::new("input");
        for (name, value) in attrs {
            call = call.attr(*name, value.clone());
        }
        patcher.open(call);
        patcher.close(&Tag::element("input"));
        patcher.exit();
    };

    render(&mut patcher, &[("value", "a".into()), ("disabled", true.into())]);
    assert_eq!(
        memory(&patcher).to_html(root),
        "<body><input value=\"a\" disabled></input></body>"
    );

    render(&mut patcher, &[("value", "b".into()), ("disabled", false.into())]);
    assert_eq!(memory(&patcher).to_html(root), "<body><input value=\"b\"></input></body>");

    render(&mut patcher, &[]);
    assert_eq!(memory(&patcher).to_html(root), "<body><input></input></body>");
}

#[test]
fn keyed_children_move_instead_of_being_recreated() {
    let (mut patcher, root) = setup();
    list(&mut patcher, root, &["a", "b", "c"]);
    let ul = patcher.dom().first_child(root).expect("ul");
    let before = memory(&patcher).child_ids(ul);
    let created = memory(&patcher).stats().elements_created;

    list(&mut patcher, root, &["c", "a", "b"]);

    let after = memory(&patcher).child_ids(ul);
    assert_eq!(after, vec![before[2], before[0], before[1]]);
    assert_eq!(memory(&patcher).stats().elements_created, created);
    assert_eq!(
        memory(&patcher).to_html(ul),
        "<ul><li>c</li><li>a</li><li>b</li></ul>"
    );
    assert_eq!(patcher.key_of(after[0]).as_deref(), Some("c"));
}

#[test]
fn unvisited_nodes_are_removed_with_their_subtrees() {
    let (mut patcher, root) = setup();
    list(&mut patcher, root, &["a", "b"]);
    let ul = patcher.dom().first_child(root).expect("ul");
    let b = memory(&patcher).child_ids(ul)[1];
    let b_text = patcher.dom().first_child(b).expect("text");
    patcher.take_removed();

    list(&mut patcher, root, &["a"]);

    let removed = patcher.take_removed();
    assert_eq!(removed, vec![b, b_text]);
    assert_eq!(memory(&patcher).to_html(ul), "<ul><li>a</li></ul>");
}

#[test]
fn tag_change_replaces_the_node() {
    let (mut patcher, root) = setup();
    patcher.enter_inner(root).expect("enter");
    patcher.open(OpenCall::new("p"));
    patcher.close(&Tag::element("p"));
    patcher.exit();
    let p = patcher.dom().first_child(root).expect("p");

    patcher.enter_outer(p).expect("outer");
    patcher.open(OpenCall::new("section"));
    patcher.close(&Tag::element("section"));
    patcher.exit();

    assert_eq!(memory(&patcher).to_html(root), "<body><section></section></body>");
    assert!(patcher.take_removed().contains(&p));
}

#[test]
fn outer_patch_leaves_siblings_alone() {
    let (mut patcher, root) = setup();
    list(&mut patcher, root, &["a", "b", "c"]);
    let ul = patcher.dom().first_child(root).expect("ul");
    let b = memory(&patcher).child_ids(ul)[1];

    patcher.enter_outer(b).expect("outer");
    patcher.open(OpenCall::new("li").key("b"));
    patcher.text(TextCall::new("B"));
    patcher.close(&Tag::element("li"));
    patcher.exit();

    assert_eq!(
        memory(&patcher).to_html(ul),
        "<ul><li>a</li><li>B</li><li>c</li></ul>"
    );
}

#[test]
fn outer_patch_requires_an_attached_element() {
    let mut patcher = Patcher::new(Box::new(MemoryDom::new()));
    let orphan = patcher.dom_mut().create_element("div");

    assert_eq!(
        patcher.enter_outer(orphan),
        Err(PatchError::Detached { node: orphan })
    );
}

#[test]
fn mismatched_close_is_reported() {
    let (mut patcher, root) = setup();
    patcher.enter_inner(root).expect("enter");
    patcher.open(OpenCall::new("div"));
    patcher.close(&Tag::element("span"));
    patcher.exit();

    assert_eq!(
        patcher.take_error(),
        Some(PatchError::MismatchedClose {
            expected: Rc::from("div"),
            found: Rc::from("span"),
        })
    );
}

#[test]
fn close_without_open_is_reported() {
    let (mut patcher, root) = setup();
    patcher.enter_inner(root).expect("enter");
    patcher.close(&Tag::element("div"));
    patcher.exit();

    assert_eq!(
        patcher.take_error(),
        Some(PatchError::CloseWithoutOpen { tag: Rc::from("div") })
    );
}

#[test]
fn calls_outside_a_patch_are_rejected() {
    let mut patcher = Patcher::new(Box::new(MemoryDom::new()));
    patcher.open(OpenCall::new("div"));
    assert_eq!(patcher.take_error(), Some(PatchError::OutsidePatch));
}

#[test]
fn component_tags_are_not_patchable() {
    #[derive(Default)]
    struct Widget;
    impl Component for Widget {
        fn render(&self, _cx: &RenderCx<'_>) {}
    }

    let (mut patcher, root) = setup();
    patcher.enter_inner(root).expect("enter");
    patcher.open(OpenCall::new(ComponentRef::of::<Widget>()));
    patcher.exit();

    assert_eq!(
        patcher.take_error(),
        Some(PatchError::UnhandledComponent { name: Rc::from("Widget") })
    );
}

#[test]
fn skip_to_adopts_a_detached_node() {
    let (mut patcher, root) = setup();
    let kept = patcher.dom_mut().create_element("aside");

    patcher.enter_inner(root).expect("enter");
    patcher.open(OpenCall::new("h1"));
    patcher.close(&Tag::element("h1"));
    patcher.skip_to(kept);
    patcher.exit();

    assert_eq!(memory(&patcher).to_html(root), "<body><h1></h1><aside></aside></body>");
}

#[test]
fn unwind_closes_open_elements_only() {
    let (mut patcher, root) = setup();
    patcher.enter_inner(root).expect("enter");
    patcher.open(OpenCall::new("div"));
    patcher.open(OpenCall::new("span"));
    assert_eq!(patcher.open_depth(), 2);

    assert_eq!(patcher.unwind(5), 2);
    assert_eq!(patcher.open_depth(), 0);
    assert!(patcher.is_patching());
    patcher.exit();
    assert!(!patcher.is_patching());
}

#[test]
fn patch_inner_surfaces_the_first_error() {
    let mut dom = MemoryDom::new();
    let root = dom.create_element("body");
    let patcher = RefCell::new(Patcher::new(Box::new(dom)));

    let ok = patch_inner(&patcher, root, || {
        patcher.borrow_mut().open(OpenCall::new("div"));
        patcher.borrow_mut().close(&Tag::element("div"));
        7
    });
    assert_eq!(ok, Ok(7));

    let failed = patch_inner(&patcher, root, || {
        patcher.borrow_mut().close(&Tag::element("nav"));
        patcher.borrow_mut().close(&Tag::element("main"));
    });
    assert_eq!(
        failed,
        Err(PatchError::CloseWithoutOpen { tag: Rc::from("nav") })
    );
}

#[test]
fn attribute_set_after_open_is_not_rewritten() {
    let (mut patcher, root) = setup();
    let render = |patcher: &mut Patcher, title: &str| {
        patcher.enter_inner(root).expect("enter");
        patcher.open(OpenCall::new("a").attr("href", "/home"));
        patcher.attr(Rc::from("title"), Value::from(title));
        patcher.close(&Tag::element("a"));
        patcher.exit();
    };

    render(&mut patcher, "home");
    let before = memory(&patcher).stats();
    render(&mut patcher, "home");

    let after = memory(&patcher).stats();
    assert_eq!(after.attributes_set, before.attributes_set);
    assert_eq!(after.attributes_removed, before.attributes_removed);
    assert_eq!(
        memory(&patcher).to_html(root),
        "<body><a href=\"/home\" title=\"home\"></a></body>"
    );

    render(&mut patcher, "start");
    assert_eq!(memory(&patcher).stats().attributes_set, after.attributes_set + 1);
    assert_eq!(memory(&patcher).stats().attributes_removed, after.attributes_removed);
}

#[test]
fn attribute_no_longer_set_is_removed_on_close() {
    let (mut patcher, root) = setup();
    let render = |patcher: &mut Patcher, title: Option<&str>| {
        patcher.enter_inner(root).expect("enter");
        patcher.open(OpenCall::new("a"));
        if let Some(title) = title {
            patcher.attr(Rc::from("title"), Value::from(title));
        }
        patcher.close(&Tag::element("a"));
        patcher.exit();
    };

    render(&mut patcher, Some("home"));
    render(&mut patcher, None);

    assert_eq!(memory(&patcher).to_html(root), "<body><a></a></body>");
    assert_eq!(memory(&patcher).stats().attributes_removed, 1);
}

#[test]
fn skip_node_leaves_the_node_in_place() {
    let (mut patcher, root) = setup();
    list(&mut patcher, root, &["a", "b"]);
    let ul = patcher.dom().first_child(root).expect("ul");
    let before = memory(&patcher).child_ids(ul);

    patcher.enter_inner(ul).expect("enter");
    patcher.skip_node();
    patcher.open(OpenCall::new("li").key("b"));
    patcher.text(TextCall::new("b!"));
    patcher.close(&Tag::element("li"));
    patcher.exit();

    assert_eq!(memory(&patcher).child_ids(ul), before);
    assert_eq!(memory(&patcher).to_html(ul), "<ul><li>a</li><li>b!</li></ul>");
}
