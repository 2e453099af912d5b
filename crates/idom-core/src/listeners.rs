//! Inline-listener bookkeeping.
//!
//! Records which native listeners are attached to which element and diffs
//! each newly wanted set against it, so a binding that did not change is never
//! detached and re-attached.

use std::rc::Rc;

use log::{debug, warn};

use crate::call::Listener;
use crate::collections::map::{HashMap, IndexMap};
use crate::dom::{Dom, NodeId};

pub type ListenerSet = IndexMap<Rc<str>, Listener>;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ListenerDiff {
    pub attached: usize,
    pub detached: usize,
    pub kept: usize,
}

impl ListenerDiff {
    pub fn is_empty(&self) -> bool {
        self.attached == 0 && self.detached == 0
    }

    pub(crate) fn merge(&mut self, other: ListenerDiff) {
        self.attached += other.attached;
        self.detached += other.detached;
        self.kept += other.kept;
    }
}

#[derive(Default)]
pub struct ListenerRegistry {
    attached: HashMap<NodeId, ListenerSet>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attached(&self, node: NodeId) -> Option<&ListenerSet> {
        self.attached.get(&node)
    }

    /// Brings `node`'s native listeners in line with `wanted`.
    pub fn reconcile(
        &mut self,
        dom: &mut dyn Dom,
        node: NodeId,
        wanted: ListenerSet,
    ) -> ListenerDiff {
        let previous = self.attached.remove(&node).unwrap_or_default();
        let mut diff = ListenerDiff::default();

        for (event, listener) in &previous {
            match wanted.get(event) {
                Some(next) if next.ptr_eq(listener) => diff.kept += 1,
                _ => {
                    match dom.remove_event_listener(node, event, listener) {
                        Ok(()) => debug!("detached {event} listener from {node}"),
                        Err(err) => warn!("detaching {event} listener from {node}: {err}"),
                    }
                    diff.detached += 1;
                }
            }
        }
        for (event, listener) in &wanted {
            let unchanged = previous
                .get(event)
                .is_some_and(|existing| existing.ptr_eq(listener));
            if unchanged {
                continue;
            }
            match dom.add_event_listener(node, event, listener) {
                Ok(()) => {
                    debug!("attached {event} listener to {node}");
                    diff.attached += 1;
                }
                Err(err) => warn!("attaching {event} listener to {node}: {err}"),
            }
        }

        if !wanted.is_empty() {
            self.attached.insert(node, wanted);
        }
        diff
    }

    /// Reconciles every element visited in one patch scope.
    pub fn reconcile_all(
        &mut self,
        dom: &mut dyn Dom,
        visited: impl IntoIterator<Item = (NodeId, ListenerSet)>,
    ) -> ListenerDiff {
        let mut total = ListenerDiff::default();
        for (node, wanted) in visited {
            total.merge(self.reconcile(dom, node, wanted));
        }
        total
    }

    /// Drops the record for a node that left the document; its native
    /// listeners went with it.
    pub fn forget(&mut self, node: NodeId) -> bool {
        self.attached.remove(&node).is_some()
    }

    pub fn len(&self) -> usize {
        self.attached.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attached.is_empty()
    }
}
