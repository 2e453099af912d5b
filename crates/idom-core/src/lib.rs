//! Incremental-DOM rendering core: a layered interception stack over the
//! primitive element calls, children capture and replay, and a keyed
//! reconciliation engine for nested components with deferred disposal.

pub mod call;
pub mod capture;
pub mod collections;
pub mod component;
pub mod config;
pub mod disposal;
pub mod dom;
pub mod error;
pub mod intercept;
pub mod listeners;
pub mod patcher;
pub mod renderer;

pub use call::{Attr, Event, Formatter, Listener, OpenCall, Tag, TextCall, Value};
pub use capture::{
    get_owner, is_captured, CapturedElement, CapturedNode, CapturedText, Captures, OwnerRef,
};
pub use component::{
    Component, ComponentHandle, ComponentRef, PropChanges, Props, CHILDREN,
};
pub use config::{ComponentRegistry, RendererConfig};
pub use disposal::{Disposable, DisposalQueue, SweepState};
pub use dom::{Dom, DomError, DomStats, MemoryDom, NodeId};
pub use error::{CaptureError, PatchError, RenderError};
pub use intercept::{FrameId, Handlers, InterceptionStack, Next};
pub use listeners::{ListenerDiff, ListenerRegistry, ListenerSet};
pub use patcher::{patch_inner, patch_outer, Patcher};
pub use renderer::{RenderCx, Renderer, RendererHandle};
