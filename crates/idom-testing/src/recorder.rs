use std::cell::RefCell;
use std::rc::Rc;

use idom_core::{Handlers, InterceptionStack, Value};

/// One primitive call as seen by a [`CallRecorder`] frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecordedCall {
    Open {
        tag: String,
        key: Option<String>,
        attrs: Vec<(String, String)>,
    },
    Close(String),
    Text(String),
    Attr(String, String),
}

impl RecordedCall {
    pub fn open(tag: &str) -> Self {
        RecordedCall::Open {
            tag: tag.to_string(),
            key: None,
            attrs: Vec::new(),
        }
    }

    pub fn close(tag: &str) -> Self {
        RecordedCall::Close(tag.to_string())
    }

    pub fn text(text: &str) -> Self {
        RecordedCall::Text(text.to_string())
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::Str(value) => value.to_string(),
        other => format!("{other:?}"),
    }
}

/// Records the calls that reach a frame.
#[derive(Clone, Default)]
pub struct CallRecorder {
    calls: Rc<RefCell<Vec<RecordedCall>>>,
}

impl CallRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handlers that record every call and forward it unchanged.
    pub fn forwarding(&self) -> Handlers {
        self.handlers(true)
    }

    /// Handlers that record every call and stop it there; suitable as the
    /// base frame of a standalone stack.
    pub fn terminal(&self) -> Handlers {
        self.handlers(false)
    }

    /// A stack whose originals only record.
    pub fn stack(&self) -> InterceptionStack {
        InterceptionStack::new(self.terminal())
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.borrow().clone()
    }

    pub fn take(&self) -> Vec<RecordedCall> {
        std::mem::take(&mut *self.calls.borrow_mut())
    }

    pub fn len(&self) -> usize {
        self.calls.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.borrow().is_empty()
    }

    fn handlers(&self, forward: bool) -> Handlers {
        Handlers::new()
            .on_open({
                let calls = self.calls.clone();
                move |next, call| {
                    calls.borrow_mut().push(RecordedCall::Open {
                        tag: call.tag.name().to_string(),
                        key: call.key.as_deref().map(str::to_string),
                        attrs: call
                            .all_attrs()
                            .map(|(name, value)| (name.to_string(), describe(value)))
                            .collect(),
                    });
                    if forward {
                        next.open(call);
                    }
                }
            })
            .on_close({
                let calls = self.calls.clone();
                move |next, tag| {
                    calls.borrow_mut().push(RecordedCall::close(tag.name()));
                    if forward {
                        next.close(tag);
                    }
                }
            })
            .on_text({
                let calls = self.calls.clone();
                move |next, call| {
                    calls.borrow_mut().push(RecordedCall::Text(call.formatted()));
                    if forward {
                        next.text(call);
                    }
                }
            })
            .on_attr({
                let calls = self.calls.clone();
                move |next, name, value| {
                    calls
                        .borrow_mut()
                        .push(RecordedCall::Attr(name.to_string(), describe(&value)));
                    if forward {
                        next.attr(name, value);
                    }
                }
            })
    }
}
