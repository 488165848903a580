//! Entry points that drive a handler with a synthetic request/response pair.

use std::rc::Rc;

use tokio::sync::oneshot;
use tracing::{Span, debug, info_span};
use uuid::Uuid;

use crate::completion::{Completion, Progress};
use crate::error::Result;
use crate::options::InjectOptions;
use crate::reply::InjectResponse;
use crate::request::Request;
use crate::response::Response;
use crate::scheduler::Scheduler;

/// Injects a request into `dispatch`.
///
/// The options are validated first; a malformed method, URL, header or
/// payload is returned as an error before `dispatch` runs. `dispatch` is
/// then called once, synchronously, with a fresh [`Request`] and
/// [`Response`]; its return value is ignored and a panic inside it unwinds
/// to the caller.
///
/// Everything after that (request data events, termination, and the call
/// to `on_complete`) happens while the returned [`Injection`] is driven with
/// [`Injection::run`] or [`Injection::tick`]. `on_complete` runs exactly
/// once, on the turn after the handler's first `end()`. If the handler
/// never ends the response, `on_complete` never runs.
///
/// # Examples
///
/// ```
/// use std::cell::RefCell;
/// use std::rc::Rc;
/// use sockless::prelude::*;
///
/// let body = Rc::new(RefCell::new(None));
/// let slot = body.clone();
///
/// let injection = inject(
///     |_req, res| {
///         res.write_head(200, &[("content-type", "text/plain")]).unwrap();
///         res.end_with("Hello World");
///     },
///     InjectOptions::get("/"),
///     move |res| *slot.borrow_mut() = res.text().map(str::to_owned),
/// )
/// .unwrap();
///
/// assert!(body.borrow().is_none());
/// injection.run();
/// assert_eq!(body.borrow().as_deref(), Some("Hello World"));
/// ```
pub fn inject<D, R, C>(dispatch: D, options: InjectOptions, on_complete: C) -> Result<Injection>
where
    D: FnOnce(Request, Response) -> R,
    C: FnOnce(InjectResponse) + 'static,
{
    let descriptor = options.into_descriptor()?;

    let id = Uuid::new_v4();
    let span = info_span!(
        "inject",
        id = %id,
        method = %descriptor.method,
        url = %descriptor.url,
    );

    let scheduler = Scheduler::new();
    let completion = Rc::new(Completion::new(
        id,
        scheduler.clone(),
        Box::new(on_complete),
    ));
    let req = Request::new(id, descriptor, scheduler.clone());
    let res = Response::new(id, completion.clone());
    let request = req.clone();

    {
        let _entered = span.enter();
        let _ = dispatch(req, res);
    }

    Ok(Injection {
        id,
        scheduler,
        request,
        completion,
        span,
    })
}

/// Injects a request and resolves with the assembled response.
///
/// The injection's queue is drained one task at a time, yielding to the
/// runtime in between. When the queue runs dry before the response has
/// ended, the future sleeps until something is queued again, so a handler
/// may finish from tasks it spawned on the runtime (for example with
/// `tokio::task::spawn_local`). If the handler never ends the response the
/// returned future never resolves; wrap it in `tokio::time::timeout` when a
/// bound is needed. Dropping the future abandons the injection.
pub async fn inject_async<D, R>(dispatch: D, options: InjectOptions) -> Result<InjectResponse>
where
    D: FnOnce(Request, Response) -> R,
{
    let (tx, rx) = oneshot::channel();
    let injection = inject(dispatch, options, move |res| {
        let _ = tx.send(res);
    })?;

    loop {
        while injection.tick() {
            tokio::task::yield_now().await;
        }
        if injection.is_complete() {
            break;
        }
        debug!(id = %injection.id(), "queue idle before completion; waiting");
        injection.scheduler.queued().await;
    }

    match rx.await {
        Ok(res) => Ok(res),
        Err(_) => std::future::pending().await,
    }
}

/// A running injection.
///
/// Holds the injection's task queue. Nothing after the handler's
/// synchronous part happens until the queue is driven. Dropping it abandons
/// the injection: queued tasks are discarded, request listeners are released
/// and the completion callback will never run.
#[must_use = "an injection does nothing until it is run"]
pub struct Injection {
    id: Uuid,
    scheduler: Scheduler,
    request: Request,
    completion: Rc<Completion>,
    span: Span,
}

impl Injection {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Runs one queued task. Returns `false` when nothing was queued.
    pub fn tick(&self) -> bool {
        let _entered = self.span.enter();
        self.scheduler.tick()
    }

    /// Runs queued tasks until none are left. Returns the number run.
    pub fn run(&self) -> usize {
        let _entered = self.span.enter();
        self.scheduler.run_until_idle()
    }

    /// `true` once the handler has ended the response.
    pub fn is_ended(&self) -> bool {
        self.completion.progress() != Progress::Pending
    }

    /// `true` once the result has been handed to the completion callback.
    pub fn is_complete(&self) -> bool {
        self.completion.progress() == Progress::Delivered
    }

    /// `true` when no task is queued. An idle injection that is not complete
    /// will never complete.
    pub fn is_idle(&self) -> bool {
        self.scheduler.is_idle()
    }
}

impl Drop for Injection {
    fn drop(&mut self) {
        let _entered = self.span.enter();
        if !self.is_complete() {
            debug!(id = %self.id, "injection dropped before completion");
        }
        self.scheduler.close();
        self.request.release();
        self.completion.discard();
    }
}

impl std::fmt::Debug for Injection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Injection")
            .field("id", &self.id)
            .field("progress", &self.completion.progress())
            .field("pending", &self.scheduler.pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::cell::{Cell, RefCell};

    #[test]
    fn test_on_complete_is_not_called_synchronously() {
        let calls = Rc::new(Cell::new(0));

        let count = calls.clone();
        let injection = inject(
            |_req, res| {
                res.end();
            },
            InjectOptions::get("/"),
            move |_| count.set(count.get() + 1),
        )
        .unwrap();

        assert_eq!(calls.get(), 0);
        assert!(injection.is_ended());
        assert!(!injection.is_complete());

        injection.run();
        assert_eq!(calls.get(), 1);
        assert!(injection.is_complete());
        assert!(injection.is_idle());
    }

    #[test]
    fn test_dropping_unfinished_injection_releases_handler_state() {
        let marker = Rc::new(());

        let held = marker.clone();
        let injection = inject(
            move |req, res| {
                let handle = req.clone();
                req.on_data(move |_| handle.pause());
                req.on_end(move || {
                    let _held = &held;
                    res.end();
                });
            },
            InjectOptions::post("/").payload("abc"),
            |_| {},
        )
        .unwrap();

        assert!(!injection.is_idle());
        assert_eq!(Rc::strong_count(&marker), 2);

        drop(injection);
        assert_eq!(Rc::strong_count(&marker), 1);
    }

    #[test]
    fn test_dropping_stalled_injection_releases_completion_callback() {
        let marker = Rc::new(());

        let held = marker.clone();
        let injection = inject(
            |req, _res| req.on_data(|_| {}),
            InjectOptions::post("/").payload("abc"),
            move |_| {
                let _held = &held;
            },
        )
        .unwrap();

        injection.run();
        assert!(injection.is_idle());
        assert!(!injection.is_complete());
        assert_eq!(Rc::strong_count(&marker), 2);

        drop(injection);
        assert_eq!(Rc::strong_count(&marker), 1);
    }

    #[test]
    fn test_dispatch_is_called_once_with_fresh_pair() {
        let seen = Rc::new(RefCell::new(Vec::new()));

        let log = seen.clone();
        let injection = inject(
            move |req, res| {
                log.borrow_mut().push((req.id(), res.id()));
                res.end();
            },
            InjectOptions::get("/"),
            |_| {},
        )
        .unwrap();

        let pairs = seen.borrow();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].0, injection.id());
        assert_eq!(pairs[0].1, injection.id());
    }

    #[test]
    fn test_dispatch_return_value_is_ignored() {
        let injection = inject(
            |_req, res| res.end_with("done"),
            InjectOptions::get("/"),
            |_| {},
        )
        .unwrap();
        assert!(injection.is_ended());
    }

    #[test]
    fn test_configuration_error_skips_dispatch() {
        let called = Rc::new(Cell::new(false));

        let flag = called.clone();
        let result = inject(
            move |_req, _res| flag.set(true),
            InjectOptions::new("", "/"),
            |_| {},
        );

        assert!(matches!(result, Err(Error::InvalidMethod(_))));
        assert!(!called.get());
    }

    #[test]
    #[should_panic(expected = "handler exploded")]
    fn test_handler_panic_propagates() {
        let _ = inject(
            |_req, res| {
                if !res.headers_sent() {
                    panic!("handler exploded");
                }
                res.end();
            },
            InjectOptions::get("/"),
            |_| {},
        );
    }

    #[test]
    fn test_never_ending_handler_never_completes() {
        let calls = Rc::new(Cell::new(0));

        let count = calls.clone();
        let injection = inject(
            |req, _res| {
                req.on_data(|_| {});
            },
            InjectOptions::post("/").payload("ignored"),
            move |_| count.set(count.get() + 1),
        )
        .unwrap();

        assert!(injection.run() > 0);
        assert!(injection.is_idle());
        assert!(!injection.is_ended());
        assert!(!injection.is_complete());
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn test_tick_steps_through_the_queue() {
        let injection = inject(
            |req, res| {
                req.on_end(move || {
                    res.end();
                });
                req.resume();
            },
            InjectOptions::post("/").payload("x"),
            |_| {},
        )
        .unwrap();

        // data, then end, then delivery
        assert!(injection.tick());
        assert!(!injection.is_ended());
        assert!(injection.tick());
        assert!(injection.is_ended());
        assert!(injection.tick());
        assert!(injection.is_complete());
        assert!(!injection.tick());
    }
}
