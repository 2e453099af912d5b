//! The primitive call vocabulary shared by the interception stack, the
//! children capture and the patch engine.
//!
//! Tags are resolved once where a call is authored: an [`Tag::Element`] is an
//! intrinsic DOM element, a [`Tag::Component`] names a nested component
//! constructor. Nothing downstream sniffs strings to tell them apart.

use std::fmt;
use std::rc::Rc;

use crate::capture::CapturedNode;
use crate::component::ComponentRef;
use crate::dom::NodeId;

pub type Attr = (Rc<str>, Value);

#[derive(Clone, PartialEq)]
pub enum Tag {
    Element(Rc<str>),
    Component(ComponentRef),
}

impl Tag {
    pub fn element(name: impl Into<Rc<str>>) -> Self {
        Tag::Element(name.into())
    }

    pub fn is_component(&self) -> bool {
        matches!(self, Tag::Component(_))
    }

    pub fn as_component(&self) -> Option<&ComponentRef> {
        match self {
            Tag::Component(ctor) => Some(ctor),
            Tag::Element(_) => None,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Tag::Element(name) => name,
            Tag::Component(ctor) => ctor.name(),
        }
    }
}

impl From<&str> for Tag {
    fn from(name: &str) -> Self {
        Tag::Element(Rc::from(name))
    }
}

impl From<String> for Tag {
    fn from(name: String) -> Self {
        Tag::Element(Rc::from(name))
    }
}

impl From<ComponentRef> for Tag {
    fn from(ctor: ComponentRef) -> Self {
        Tag::Component(ctor)
    }
}

impl From<&ComponentRef> for Tag {
    fn from(ctor: &ComponentRef) -> Self {
        Tag::Component(ctor.clone())
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tag::Element(name) => write!(f, "<{name}>"),
            Tag::Component(ctor) => write!(f, "<{}/>", ctor.name()),
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A DOM event as delivered to inline listeners.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event {
    pub event_type: Rc<str>,
    pub target: NodeId,
}

/// Shared event handler. Two listeners are the same binding only when they
/// point at the same closure.
#[derive(Clone)]
pub struct Listener(Rc<dyn Fn(&Event)>);

impl Listener {
    pub fn new(f: impl Fn(&Event) + 'static) -> Self {
        Self(Rc::new(f))
    }

    pub fn call(&self, event: &Event) {
        (self.0)(event)
    }

    pub fn ptr_eq(&self, other: &Listener) -> bool {
        std::ptr::eq(
            Rc::as_ptr(&self.0) as *const (),
            Rc::as_ptr(&other.0) as *const (),
        )
    }
}

impl PartialEq for Listener {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Listener({:p})", Rc::as_ptr(&self.0) as *const ())
    }
}

/// Text formatter kept alongside a text call so it can be reapplied on replay.
#[derive(Clone)]
pub struct Formatter(Rc<dyn Fn(&str) -> String>);

impl Formatter {
    pub fn new(f: impl Fn(&str) -> String + 'static) -> Self {
        Self(Rc::new(f))
    }

    pub fn apply(&self, input: &str) -> String {
        (self.0)(input)
    }
}

impl PartialEq for Formatter {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(
            Rc::as_ptr(&self.0) as *const (),
            Rc::as_ptr(&other.0) as *const (),
        )
    }
}

impl fmt::Debug for Formatter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Formatter({:p})", Rc::as_ptr(&self.0) as *const ())
    }
}

/// Attribute and prop values.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    Listener(Listener),
    Nodes(Rc<[CapturedNode]>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_listener(&self) -> Option<&Listener> {
        match self {
            Value::Listener(listener) => Some(listener),
            _ => None,
        }
    }

    pub fn as_nodes(&self) -> Option<&[CapturedNode]> {
        match self {
            Value::Nodes(nodes) => Some(nodes),
            _ => None,
        }
    }

    /// True for values that carry previously captured tree nodes rather than
    /// plain data.
    pub fn is_captured(&self) -> bool {
        matches!(self, Value::Nodes(_))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Serialized form written to the DOM. `None` means the attribute must be
    /// absent.
    pub fn to_attribute(&self) -> Option<String> {
        match self {
            Value::Null | Value::Bool(false) => None,
            Value::Bool(true) => Some(String::new()),
            Value::Int(value) => Some(value.to_string()),
            Value::Float(value) => Some(value.to_string()),
            Value::Str(value) => Some(value.to_string()),
            Value::Listener(_) | Value::Nodes(_) => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Listener(a), Value::Listener(b)) => a.ptr_eq(b),
            (Value::Nodes(a), Value::Nodes(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.ptr_eq(y))
            }
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(value) => write!(f, "{value}"),
            Value::Int(value) => write!(f, "{value}"),
            Value::Float(value) => write!(f, "{value}"),
            Value::Str(value) => write!(f, "{value:?}"),
            Value::Listener(listener) => write!(f, "{listener:?}"),
            Value::Nodes(nodes) => f.debug_list().entries(nodes.iter()).finish(),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(Rc::from(value))
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(Rc::from(value))
    }
}

impl From<Rc<str>> for Value {
    fn from(value: Rc<str>) -> Self {
        Value::Str(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value as i64)
    }
}

impl From<usize> for Value {
    fn from(value: usize) -> Self {
        Value::Int(value as i64)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<Listener> for Value {
    fn from(value: Listener) -> Self {
        Value::Listener(value)
    }
}

impl From<Vec<CapturedNode>> for Value {
    fn from(value: Vec<CapturedNode>) -> Self {
        Value::Nodes(Rc::from(value))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

/// `open(tag, key?, statics?, ...attrs)`.
#[derive(Clone, PartialEq)]
pub struct OpenCall {
    pub tag: Tag,
    pub key: Option<Rc<str>>,
    pub statics: Vec<Attr>,
    pub attrs: Vec<Attr>,
}

impl OpenCall {
    pub fn new(tag: impl Into<Tag>) -> Self {
        Self {
            tag: tag.into(),
            key: None,
            statics: Vec::new(),
            attrs: Vec::new(),
        }
    }

    pub fn key(mut self, key: impl Into<Rc<str>>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_key(mut self, key: Option<Rc<str>>) -> Self {
        self.key = key;
        self
    }

    pub fn static_attr(mut self, name: impl Into<Rc<str>>, value: impl Into<Value>) -> Self {
        self.statics.push((name.into(), value.into()));
        self
    }

    pub fn attr(mut self, name: impl Into<Rc<str>>, value: impl Into<Value>) -> Self {
        self.attrs.push((name.into(), value.into()));
        self
    }

    /// Static attributes followed by dynamic ones, in call order.
    pub fn all_attrs(&self) -> impl Iterator<Item = &Attr> {
        self.statics.iter().chain(self.attrs.iter())
    }
}

impl fmt::Debug for OpenCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("OpenCall");
        out.field("tag", &self.tag);
        if let Some(key) = &self.key {
            out.field("key", key);
        }
        if !self.statics.is_empty() {
            out.field("statics", &self.statics);
        }
        if !self.attrs.is_empty() {
            out.field("attrs", &self.attrs);
        }
        out.finish()
    }
}

/// `text(value, ...formatters)`.
#[derive(Clone, PartialEq)]
pub struct TextCall {
    pub value: Rc<str>,
    pub formatters: Vec<Formatter>,
}

impl TextCall {
    pub fn new(value: impl Into<Rc<str>>) -> Self {
        Self {
            value: value.into(),
            formatters: Vec::new(),
        }
    }

    pub fn formatter(mut self, formatter: Formatter) -> Self {
        self.formatters.push(formatter);
        self
    }

    /// The value with every formatter applied in order.
    pub fn formatted(&self) -> String {
        self.formatters
            .iter()
            .fold(self.value.to_string(), |text, formatter| formatter.apply(&text))
    }
}

impl From<&str> for TextCall {
    fn from(value: &str) -> Self {
        TextCall::new(value)
    }
}

impl From<String> for TextCall {
    fn from(value: String) -> Self {
        TextCall::new(value)
    }
}

impl fmt::Debug for TextCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.formatters.is_empty() {
            write!(f, "Text({:?})", self.value)
        } else {
            write!(f, "Text({:?}, {} formatters)", self.value, self.formatters.len())
        }
    }
}
