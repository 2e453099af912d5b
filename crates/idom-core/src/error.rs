use std::rc::Rc;

use crate::dom::DomError;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PatchError {
    #[error("close({found}) does not match open element <{expected}>")]
    MismatchedClose { expected: Rc<str>, found: Rc<str> },
    #[error("close({tag}) without a matching open")]
    CloseWithoutOpen { tag: Rc<str> },
    #[error("component tag <{name}/> reached the base patcher")]
    UnhandledComponent { name: Rc<str> },
    #[error("primitive call issued outside of a patch")]
    OutsidePatch,
    #[error("patch target {node} has no parent")]
    Detached { node: usize },
    #[error(transparent)]
    Dom(#[from] DomError),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    #[error("close({tag}) issued while capturing without a matching open")]
    CloseWithoutOpen { tag: Rc<str> },
    #[error("close({found}) does not match captured element <{expected}>")]
    MismatchedClose { expected: Rc<str>, found: Rc<str> },
    #[error("capture for {owner} never reached its closing call")]
    Unclosed { owner: Rc<str> },
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RenderError {
    #[error(transparent)]
    Patch(#[from] PatchError),
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Dom(#[from] DomError),
    #[error("component {component} left {open} element(s) open")]
    Unbalanced { component: Rc<str>, open: usize },
    #[error("component is disposed")]
    Disposed,
    #[error("renderer has been dropped")]
    RendererGone,
    #[error("dom is not of the requested type")]
    DomTypeMismatch,
}
