//! Deferred disposal of component instances that a patch cycle did not
//! reuse.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

use log::{debug, trace};

pub trait Disposable {
    fn is_disposed(&self) -> bool;
    fn has_parent(&self) -> bool;
    fn clear_parent(&self);
    fn dispose(&self);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SweepState {
    Idle,
    Sweeping,
}

pub struct DisposalQueue<T: Disposable> {
    queue: RefCell<VecDeque<T>>,
    state: Cell<SweepState>,
}

impl<T: Disposable> Default for DisposalQueue<T> {
    fn default() -> Self {
        Self {
            queue: RefCell::new(VecDeque::new()),
            state: Cell::new(SweepState::Idle),
        }
    }
}

impl<T: Disposable> DisposalQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues each live instance and orphans it. Anything that claims the
    /// instance again before the sweep restores its parent and survives.
    pub fn schedule(&self, instances: impl IntoIterator<Item = T>) {
        let mut queue = self.queue.borrow_mut();
        for instance in instances {
            if instance.is_disposed() {
                continue;
            }
            instance.clear_parent();
            queue.push_back(instance);
        }
        trace!("disposal queue holds {}", queue.len());
    }

    /// Disposes every queued instance that is still orphaned. A sweep started
    /// from inside a disposal is ignored; the running sweep picks up anything
    /// queued meanwhile. Returns the number of instances disposed.
    pub fn sweep(&self) -> usize {
        if self.state.get() == SweepState::Sweeping {
            trace!("nested sweep ignored");
            return 0;
        }
        self.state.set(SweepState::Sweeping);

        struct Guard<'a, T: Disposable>(&'a DisposalQueue<T>);
        impl<T: Disposable> Drop for Guard<'_, T> {
            fn drop(&mut self) {
                self.0.queue.borrow_mut().clear();
                self.0.state.set(SweepState::Idle);
            }
        }
        let guard = Guard(self);

        let mut disposed = 0;
        loop {
            let next = self.queue.borrow_mut().pop_front();
            let Some(instance) = next else {
                break;
            };
            if instance.is_disposed() || instance.has_parent() {
                continue;
            }
            instance.dispose();
            disposed += 1;
        }
        drop(guard);
        if disposed > 0 {
            debug!("sweep disposed {disposed} instance(s)");
        }
        disposed
    }

    pub fn state(&self) -> SweepState {
        self.state.get()
    }

    pub fn len(&self) -> usize {
        self.queue.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.borrow().is_empty()
    }
}
