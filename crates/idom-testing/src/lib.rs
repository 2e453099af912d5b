//! Testing utilities and harness for idom

pub mod harness;
pub mod recorder;

pub use harness::*;
pub use recorder::*;

pub mod prelude {
    pub use crate::harness::*;
    pub use crate::recorder::*;
    pub use idom_core::{
        CapturedNode, Component, ComponentHandle, ComponentRef, Listener, OpenCall, Props,
        RenderCx, RenderError, RendererConfig, Tag, TextCall, Value,
    };
}
