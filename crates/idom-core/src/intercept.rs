//! Layered handler frames for the primitive calls.
//!
//! Every primitive call is routed to the topmost frame that implements it.
//! Handlers receive a [`Next`] that forwards to the frames below, so a frame
//! can observe, rewrite or swallow a call. Frame 0 holds the originals and is
//! never popped.

use std::cell::RefCell;
use std::rc::Rc;

use log::{trace, warn};

use crate::call::{OpenCall, Tag, TextCall, Value};

pub type OpenFn = Rc<dyn Fn(&Next<'_>, OpenCall)>;
pub type CloseFn = Rc<dyn Fn(&Next<'_>, &Tag)>;
pub type TextFn = Rc<dyn Fn(&Next<'_>, TextCall)>;
pub type AttrFn = Rc<dyn Fn(&Next<'_>, Rc<str>, Value)>;

/// A partial handler table. Operations left unset fall through to the frame
/// below.
#[derive(Clone, Default)]
pub struct Handlers {
    open: Option<OpenFn>,
    close: Option<CloseFn>,
    text: Option<TextFn>,
    attr: Option<AttrFn>,
}

impl Handlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_open(mut self, f: impl Fn(&Next<'_>, OpenCall) + 'static) -> Self {
        self.open = Some(Rc::new(f));
        self
    }

    pub fn on_close(mut self, f: impl Fn(&Next<'_>, &Tag) + 'static) -> Self {
        self.close = Some(Rc::new(f));
        self
    }

    pub fn on_text(mut self, f: impl Fn(&Next<'_>, TextCall) + 'static) -> Self {
        self.text = Some(Rc::new(f));
        self
    }

    pub fn on_attr(mut self, f: impl Fn(&Next<'_>, Rc<str>, Value) + 'static) -> Self {
        self.attr = Some(Rc::new(f));
        self
    }
}

/// Identity of a frame, stable for as long as the frame is on the stack.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FrameId(usize);

struct Frame {
    handlers: Handlers,
    /// Element collected between `open_start` and `open_end`.
    pending: RefCell<Option<OpenCall>>,
}

impl Frame {
    fn new(handlers: Handlers) -> Rc<Self> {
        Rc::new(Self {
            handlers,
            pending: RefCell::new(None),
        })
    }
}

/// Forwarding handle given to a handler: calls made through it continue
/// below the frame that owns the handler.
pub struct Next<'a> {
    stack: &'a InterceptionStack,
    below: Option<usize>,
}

impl<'a> Next<'a> {
    pub fn stack(&self) -> &'a InterceptionStack {
        self.stack
    }

    pub fn open(&self, call: OpenCall) {
        self.stack.open_from(self.below, call);
    }

    pub fn close(&self, tag: &Tag) {
        self.stack.close_from(self.below, tag);
    }

    pub fn text(&self, call: TextCall) {
        self.stack.text_from(self.below, call);
    }

    pub fn attr(&self, name: Rc<str>, value: Value) {
        self.stack.attr_from(self.below, name, value);
    }
}

pub struct InterceptionStack {
    frames: RefCell<Vec<Rc<Frame>>>,
}

impl InterceptionStack {
    pub fn new(originals: Handlers) -> Self {
        Self {
            frames: RefCell::new(vec![Frame::new(originals)]),
        }
    }

    /// Pushes a frame and returns the new height.
    pub fn start(&self, handlers: Handlers) -> usize {
        let mut frames = self.frames.borrow_mut();
        frames.push(Frame::new(handlers));
        trace!("interception frame pushed, height {}", frames.len());
        frames.len()
    }

    /// Pops the top frame. The base frame stays; popping it is reported and
    /// ignored.
    pub fn stop(&self) -> bool {
        let mut frames = self.frames.borrow_mut();
        if frames.len() <= 1 {
            warn!("interception stack over-pop ignored");
            return false;
        }
        frames.pop();
        trace!("interception frame popped, height {}", frames.len());
        true
    }

    pub fn height(&self) -> usize {
        self.frames.borrow().len()
    }

    /// Drops every frame above `height` (never the base frame).
    pub fn truncate(&self, height: usize) {
        let mut frames = self.frames.borrow_mut();
        let keep = height.max(1);
        if frames.len() > keep {
            trace!("interception stack restored from {} to {}", frames.len(), keep);
            frames.truncate(keep);
        }
    }

    pub fn top(&self) -> FrameId {
        let frames = self.frames.borrow();
        let top = frames.last().map(Rc::as_ptr).unwrap_or(std::ptr::null());
        FrameId(top as usize)
    }

    pub fn base(&self) -> FrameId {
        let frames = self.frames.borrow();
        let base = frames.first().map(Rc::as_ptr).unwrap_or(std::ptr::null());
        FrameId(base as usize)
    }

    /// The true primitives of frame 0.
    pub fn originals(&self) -> Next<'_> {
        Next {
            stack: self,
            below: Some(0),
        }
    }

    pub fn open(&self, call: OpenCall) {
        self.open_from(self.top_index(), call);
    }

    pub fn close(&self, tag: &Tag) {
        self.close_from(self.top_index(), tag);
    }

    pub fn text(&self, call: TextCall) {
        self.text_from(self.top_index(), call);
    }

    /// Sets an attribute, or collects it when the top frame is between
    /// `open_start` and `open_end`.
    pub fn attr(&self, name: Rc<str>, value: Value) {
        if let Some(frame) = self.top_frame() {
            let mut pending = frame.pending.borrow_mut();
            if let Some(call) = pending.as_mut() {
                call.attrs.push((name, value));
                return;
            }
        }
        self.attr_from(self.top_index(), name, value);
    }

    pub fn open_start(&self, call: OpenCall) {
        let Some(frame) = self.top_frame() else {
            return;
        };
        let previous = frame.pending.borrow_mut().replace(call);
        if let Some(previous) = previous {
            warn!("open_start while {:?} was still collecting attributes", previous.tag);
        }
    }

    pub fn open_end(&self) {
        let pending = self
            .top_frame()
            .and_then(|frame| frame.pending.borrow_mut().take());
        match pending {
            Some(call) => self.open(call),
            None => warn!("open_end without open_start"),
        }
    }

    pub fn void_element(&self, call: OpenCall) {
        let tag = call.tag.clone();
        self.open(call);
        self.close(&tag);
    }

    fn top_frame(&self) -> Option<Rc<Frame>> {
        self.frames.borrow().last().cloned()
    }

    fn top_index(&self) -> Option<usize> {
        self.frames.borrow().len().checked_sub(1)
    }

    fn find<T>(
        &self,
        from: Option<usize>,
        pick: impl Fn(&Handlers) -> Option<T>,
    ) -> Option<(usize, T)> {
        let frames = self.frames.borrow();
        let from = from?.min(frames.len().checked_sub(1)?);
        (0..=from)
            .rev()
            .find_map(|index| pick(&frames[index].handlers).map(|handler| (index, handler)))
    }

    fn next_below(&self, index: usize) -> Next<'_> {
        Next {
            stack: self,
            below: index.checked_sub(1),
        }
    }

    fn open_from(&self, from: Option<usize>, call: OpenCall) {
        match self.find(from, |handlers| handlers.open.clone()) {
            Some((index, handler)) => {
                trace!("open {:?} -> frame {index}", call.tag);
                handler(&self.next_below(index), call);
            }
            None => trace!("open {:?} fell through every frame", call.tag),
        }
    }

    fn close_from(&self, from: Option<usize>, tag: &Tag) {
        match self.find(from, |handlers| handlers.close.clone()) {
            Some((index, handler)) => {
                trace!("close {tag:?} -> frame {index}");
                handler(&self.next_below(index), tag);
            }
            None => trace!("close {tag:?} fell through every frame"),
        }
    }

    fn text_from(&self, from: Option<usize>, call: TextCall) {
        match self.find(from, |handlers| handlers.text.clone()) {
            Some((index, handler)) => {
                trace!("{call:?} -> frame {index}");
                handler(&self.next_below(index), call);
            }
            None => trace!("{call:?} fell through every frame"),
        }
    }

    fn attr_from(&self, from: Option<usize>, name: Rc<str>, value: Value) {
        match self.find(from, |handlers| handlers.attr.clone()) {
            Some((index, handler)) => {
                trace!("attr {name}={value:?} -> frame {index}");
                handler(&self.next_below(index), name, value);
            }
            None => trace!("attr {name} fell through every frame"),
        }
    }
}

#[cfg(test)]
#[path = "tests/intercept_tests.rs"]
mod tests;
