use super::*;
use std::cell::RefCell;
use std::rc::Rc;

type Log = Rc<RefCell<Vec<String>>>;

fn recording_base(log: &Log) -> Handlers {
    let open_log = log.clone();
    let close_log = log.clone();
    let text_log = log.clone();
    let attr_log = log.clone();
    Handlers::new()
        .on_open(move |_, call| {
            let attrs: Vec<String> = call
                .attrs
                .iter()
                .map(|(name, value)| format!("{name}={value:?}"))
                .collect();
            open_log
                .borrow_mut()
                .push(format!("open {} [{}]", call.tag, attrs.join(",")));
        })
        .on_close(move |_, tag| close_log.borrow_mut().push(format!("close {tag}")))
        .on_text(move |_, call| text_log.borrow_mut().push(format!("text {}", call.formatted())))
        .on_attr(move |_, name, value| attr_log.borrow_mut().push(format!("attr {name}={value:?}")))
}

#[test]
fn calls_reach_the_base_frame() {
    let log: Log = Rc::default();
    let stack = InterceptionStack::new(recording_base(&log));

    stack.open(OpenCall::new("div"));
    stack.text(TextCall::new("hi"));
    stack.close(&Tag::element("div"));

    assert_eq!(*log.borrow(), vec!["open div []", "text hi", "close div"]);
}

#[test]
fn top_frame_intercepts_and_forwards_below() {
    let log: Log = Rc::default();
    let stack = InterceptionStack::new(recording_base(&log));
    let seen = Rc::new(RefCell::new(Vec::new()));
    {
        let seen = seen.clone();
        stack.start(Handlers::new().on_open(move |next, call| {
            seen.borrow_mut().push(call.tag.name().to_string());
            next.open(call.attr("wrapped", true));
        }));
    }

    stack.open(OpenCall::new("span"));
    stack.close(&Tag::element("span"));

    assert_eq!(*seen.borrow(), vec!["span"]);
    assert_eq!(*log.borrow(), vec!["open span [wrapped=true]", "close span"]);
}

#[test]
fn unset_operations_fall_through() {
    let log: Log = Rc::default();
    let stack = InterceptionStack::new(recording_base(&log));
    stack.start(
        Handlers::new().on_text(|next, call| next.text(TextCall::new(call.value.to_uppercase()))),
    );

    stack.open(OpenCall::new("p"));
    stack.text(TextCall::new("quiet"));
    stack.close(&Tag::element("p"));

    assert_eq!(*log.borrow(), vec!["open p []", "text QUIET", "close p"]);
}

#[test]
fn swallowing_frame_hides_calls() {
    let log: Log = Rc::default();
    let stack = InterceptionStack::new(recording_base(&log));
    stack.start(Handlers::new().on_open(|_, _| {}).on_close(|_, _| {}));

    stack.open(OpenCall::new("div"));
    stack.close(&Tag::element("div"));

    assert!(log.borrow().is_empty());
    assert!(stack.stop());
    stack.open(OpenCall::new("div"));
    assert_eq!(log.borrow().len(), 1);
}

#[test]
fn frames_chain_in_stack_order() {
    let log: Log = Rc::default();
    let stack = InterceptionStack::new(recording_base(&log));
    for suffix in ["a", "b"] {
        stack.start(Handlers::new().on_text(move |next, call| {
            next.text(TextCall::new(format!("{}{suffix}", call.value)))
        }));
    }

    stack.text(TextCall::new("x"));

    assert_eq!(*log.borrow(), vec!["text xba"]);
}

#[test]
fn originals_bypass_every_frame() {
    let log: Log = Rc::default();
    let stack = InterceptionStack::new(recording_base(&log));
    stack.start(Handlers::new().on_open(|_, _| {}));

    stack.originals().open(OpenCall::new("b"));

    assert_eq!(*log.borrow(), vec!["open b []"]);
}

#[test]
fn base_frame_is_never_popped() {
    let stack = InterceptionStack::new(Handlers::new());
    assert_eq!(stack.height(), 1);
    assert!(!stack.stop());
    assert_eq!(stack.height(), 1);

    stack.start(Handlers::new());
    stack.start(Handlers::new());
    stack.truncate(0);
    assert_eq!(stack.height(), 1);
}

#[test]
fn frame_ids_track_the_top() {
    let stack = InterceptionStack::new(Handlers::new());
    let base = stack.base();
    assert_eq!(stack.top(), base);

    stack.start(Handlers::new());
    let pushed = stack.top();
    assert_ne!(pushed, base);
    assert_eq!(stack.base(), base);

    stack.stop();
    assert_eq!(stack.top(), base);
}

#[test]
fn open_start_collects_attributes_until_open_end() {
    let log: Log = Rc::default();
    let stack = InterceptionStack::new(recording_base(&log));

    stack.open_start(OpenCall::new("input"));
    stack.attr(Rc::from("value"), Value::from("v"));
    stack.attr(Rc::from("disabled"), Value::from(true));
    stack.open_end();
    stack.attr(Rc::from("late"), Value::from(1));
    stack.close(&Tag::element("input"));

    assert_eq!(
        *log.borrow(),
        vec![
            "open input [value=\"v\",disabled=true]",
            "attr late=1",
            "close input"
        ]
    );
}

#[test]
fn void_element_opens_and_closes() {
    let log: Log = Rc::default();
    let stack = InterceptionStack::new(recording_base(&log));

    stack.void_element(OpenCall::new("br"));

    assert_eq!(*log.borrow(), vec!["open br []", "close br"]);
}

#[test]
fn handler_may_push_frames_while_dispatching() {
    let log: Log = Rc::default();
    let stack = Rc::new(InterceptionStack::new(recording_base(&log)));
    stack.start(Handlers::new().on_open(|next, call| {
        next.stack().start(Handlers::new().on_text(|_, _| {}));
        next.open(call);
    }));

    stack.open(OpenCall::new("div"));
    stack.text(TextCall::new("dropped"));

    assert_eq!(stack.height(), 3);
    assert_eq!(*log.borrow(), vec!["open div []"]);
}
