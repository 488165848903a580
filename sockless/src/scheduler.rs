//! Deferred task queue shared by the two halves of one injection.
//!
//! Every asynchronous step of an injection (chunk delivery, stream
//! termination, result delivery) is a task pushed onto a [`Scheduler`] and
//! run later, in FIFO order, by whoever drives the queue. Nothing in the
//! engine depends on timers, so runs are fully deterministic.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::mem;
use std::rc::Rc;

use tokio::sync::Notify;
use tracing::trace;

type Task = Box<dyn FnOnce()>;

#[derive(Default)]
struct Shared {
    queue: RefCell<VecDeque<Task>>,
    closed: Cell<bool>,
    wake: Notify,
}

/// A single-threaded "next tick" queue.
///
/// Cloning yields another handle to the same queue.
#[derive(Clone, Default)]
pub struct Scheduler {
    shared: Rc<Shared>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `task` to run on a later turn. Once the queue is closed the
    /// task is dropped without running.
    pub fn defer(&self, task: impl FnOnce() + 'static) {
        if self.shared.closed.get() {
            trace!("task dropped on closed scheduler");
            return;
        }
        self.shared.queue.borrow_mut().push_back(Box::new(task));
        self.shared.wake.notify_one();
    }

    /// Runs the oldest queued task. Returns `false` when the queue was empty.
    pub fn tick(&self) -> bool {
        // The borrow must end before the task runs: tasks defer more tasks.
        let task = self.shared.queue.borrow_mut().pop_front();
        match task {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Runs tasks until the queue is empty, including tasks queued while
    /// draining. Returns the number of tasks run.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        while self.tick() {
            ran += 1;
        }
        trace!(tasks = ran, "scheduler idle");
        ran
    }

    /// Number of tasks waiting to run.
    pub fn pending(&self) -> usize {
        self.shared.queue.borrow().len()
    }

    pub fn is_idle(&self) -> bool {
        self.shared.queue.borrow().is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.get()
    }

    /// Resolves once a task has been queued since the last wake-up. A task
    /// deferred while nobody waits is remembered, so no wake-up is lost.
    pub async fn queued(&self) {
        self.shared.wake.notified().await;
    }

    /// Drops every queued task unrun and refuses further ones.
    pub(crate) fn close(&self) {
        self.shared.closed.set(true);
        let dropped = mem::take(&mut *self.shared.queue.borrow_mut());
        trace!(tasks = dropped.len(), "scheduler closed");
        drop(dropped);
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("pending", &self.pending())
            .field("closed", &self.is_closed())
            .finish()
    }
}
