//! Completion detection for one injection.
//!
//! The response's first effective `end()` is the only completion signal.
//! The signal carries the assembled result; delivery to the caller's
//! callback is queued on the scheduler and happens at most once.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tracing::debug;
use uuid::Uuid;

use crate::reply::InjectResponse;
use crate::scheduler::Scheduler;

pub(crate) type OnComplete = Box<dyn FnOnce(InjectResponse)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Progress {
    Pending,
    Signalled,
    Delivered,
}

pub(crate) struct Completion {
    id: Uuid,
    scheduler: Scheduler,
    on_complete: RefCell<Option<OnComplete>>,
    progress: Rc<Cell<Progress>>,
}

impl Completion {
    pub(crate) fn new(id: Uuid, scheduler: Scheduler, on_complete: OnComplete) -> Self {
        Self {
            id,
            scheduler,
            on_complete: RefCell::new(Some(on_complete)),
            progress: Rc::new(Cell::new(Progress::Pending)),
        }
    }

    /// Queues delivery of `result`. Returns `false`, dropping `result`, when
    /// the injection was already signalled.
    pub(crate) fn signal(&self, result: InjectResponse) -> bool {
        let Some(on_complete) = self.on_complete.borrow_mut().take() else {
            return false;
        };

        self.progress.set(Progress::Signalled);
        debug!(
            id = %self.id,
            status = result.status().as_u16(),
            bytes = result.payload().len(),
            "injection complete"
        );

        let progress = self.progress.clone();
        self.scheduler.defer(move || {
            progress.set(Progress::Delivered);
            on_complete(result);
        });
        true
    }

    /// Drops the callback if it has not been handed a result yet.
    pub(crate) fn discard(&self) {
        let on_complete = self.on_complete.borrow_mut().take();
        drop(on_complete);
    }

    pub(crate) fn progress(&self) -> Progress {
        self.progress.get()
    }
}
