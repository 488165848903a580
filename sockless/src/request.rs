//! The synthetic incoming request.
//!
//! A [`Request`] replays the injected payload as a stream: listeners
//! registered with [`Request::on_data`] receive the payload one chunk per
//! scheduler turn while the stream is flowing, then the stream terminates
//! through `end` (or `error`/`close` when simulated) followed by `close`.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::mem;
use std::net::IpAddr;
use std::num::NonZeroUsize;
use std::rc::Rc;

use bytes::Bytes;
use http::{HeaderMap, Method, Uri, Version};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::options::{Descriptor, Simulate};
use crate::scheduler::Scheduler;

/// Flow-control state of a [`Request`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    /// No data listener and no `resume()` yet.
    Initial,
    Flowing,
    Paused,
}

/// How a [`Request`] stream terminated. Set once, never changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminal {
    Ended,
    Closed,
    Errored,
}

/// Error handed to `on_error` listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamError {
    kind: StreamErrorKind,
    message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamErrorKind {
    /// Produced by [`Simulate::error`].
    Simulated,
}

impl StreamError {
    pub(crate) fn simulated() -> Self {
        Self {
            kind: StreamErrorKind::Simulated,
            message: "Simulated".to_string(),
        }
    }

    pub fn kind(&self) -> StreamErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "request stream error: {}", self.message)
    }
}

impl std::error::Error for StreamError {}

type DataListener = Box<dyn FnMut(&Bytes)>;
type EventListener = Box<dyn FnOnce()>;
type ErrorListener = Box<dyn FnOnce(&StreamError)>;

struct StreamState {
    flow: FlowState,
    pending: VecDeque<Bytes>,
    terminal: Option<Terminal>,
    tick_scheduled: bool,
    close_emitted: bool,
    destroyed: bool,
    released: bool,
    on_data: Vec<DataListener>,
    on_end: Vec<EventListener>,
    on_close: Vec<EventListener>,
    on_error: Vec<ErrorListener>,
}

struct Inner {
    id: Uuid,
    method: Method,
    url: String,
    uri: Uri,
    headers: HeaderMap,
    remote_address: IpAddr,
    simulate: Simulate,
    scheduler: Scheduler,
    state: RefCell<StreamState>,
}

enum Step {
    Idle,
    Data(Bytes, Vec<DataListener>),
    Finish,
}

/// The request half handed to a handler.
///
/// Cloning yields another handle to the same stream, so clones can be moved
/// into listeners. Listeners are never called while the stream's internal
/// state is borrowed: they may freely call `pause`, `resume`, `destroy` or
/// register further listeners.
#[derive(Clone)]
pub struct Request {
    inner: Rc<Inner>,
}

impl Request {
    pub(crate) fn new(id: Uuid, descriptor: Descriptor, scheduler: Scheduler) -> Self {
        let pending = split_payload(descriptor.payload, descriptor.chunk_size);

        Self {
            inner: Rc::new(Inner {
                id,
                method: descriptor.method,
                url: descriptor.url,
                uri: descriptor.uri,
                headers: descriptor.headers,
                remote_address: descriptor.remote_address,
                simulate: descriptor.simulate,
                scheduler,
                state: RefCell::new(StreamState {
                    flow: FlowState::Initial,
                    pending,
                    terminal: None,
                    tick_scheduled: false,
                    close_emitted: false,
                    destroyed: false,
                    released: false,
                    on_data: Vec::new(),
                    on_end: Vec::new(),
                    on_close: Vec::new(),
                    on_error: Vec::new(),
                }),
            }),
        }
    }

    /// Identifier shared by both halves of the injection.
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn method(&self) -> &Method {
        &self.inner.method
    }

    /// The URL exactly as given in the injection options.
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    pub fn uri(&self) -> &Uri {
        &self.inner.uri
    }

    pub fn path(&self) -> &str {
        self.inner.uri.path()
    }

    pub fn query(&self) -> Option<&str> {
        self.inner.uri.query()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.inner.headers
    }

    /// Looks up a header by case-insensitive name. Non-text values read as
    /// `None`.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.inner
            .headers
            .get(name)
            .and_then(|value| value.to_str().ok())
    }

    /// Injected requests always speak HTTP/1.1.
    pub fn version(&self) -> Version {
        Version::HTTP_11
    }

    pub fn remote_address(&self) -> IpAddr {
        self.inner.remote_address
    }

    /// Handle to the queue driving this injection, for handlers that want
    /// to defer their own work to a later turn.
    pub fn scheduler(&self) -> Scheduler {
        self.inner.scheduler.clone()
    }

    pub fn flow_state(&self) -> FlowState {
        self.inner.state.borrow().flow
    }

    pub fn is_paused(&self) -> bool {
        self.flow_state() == FlowState::Paused
    }

    pub fn terminal(&self) -> Option<Terminal> {
        self.inner.state.borrow().terminal
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.state.borrow().destroyed
    }

    /// Registers a data listener. The first one starts the flow unless the
    /// stream was explicitly paused.
    pub fn on_data(&self, listener: impl FnMut(&Bytes) + 'static) {
        {
            let mut state = self.inner.state.borrow_mut();
            if state.terminal.is_some() || state.released {
                trace!(id = %self.inner.id, "data listener ignored after termination");
                return;
            }
            state.on_data.push(Box::new(listener));
            if state.flow == FlowState::Initial {
                state.flow = FlowState::Flowing;
            }
        }
        self.schedule_tick();
    }

    pub fn on_end(&self, listener: impl FnOnce() + 'static) {
        let mut state = self.inner.state.borrow_mut();
        if state.terminal.is_none() && !state.released {
            state.on_end.push(Box::new(listener));
        }
    }

    pub fn on_error(&self, listener: impl FnOnce(&StreamError) + 'static) {
        let mut state = self.inner.state.borrow_mut();
        if state.terminal.is_none() && !state.released {
            state.on_error.push(Box::new(listener));
        }
    }

    /// Registers a close listener. Close fires after `end` or `error`, after
    /// a simulated close, and after [`Request::destroy`].
    pub fn on_close(&self, listener: impl FnOnce() + 'static) {
        let mut state = self.inner.state.borrow_mut();
        if !state.close_emitted && !state.released {
            state.on_close.push(Box::new(listener));
        }
    }

    /// Stops data delivery. Calling it again has no further effect.
    pub fn pause(&self) {
        self.inner.state.borrow_mut().flow = FlowState::Paused;
    }

    /// Restarts data delivery on a later turn. Calling it again has no
    /// further effect.
    pub fn resume(&self) {
        self.inner.state.borrow_mut().flow = FlowState::Flowing;
        self.schedule_tick();
    }

    /// Tears the stream down: pending chunks are dropped, `data`, `end` and
    /// `error` never fire, and `close` fires on a later turn. Does nothing
    /// once the stream has terminated.
    pub fn destroy(&self) {
        {
            let mut state = self.inner.state.borrow_mut();
            if state.terminal.is_some() {
                return;
            }
            state.terminal = Some(Terminal::Closed);
            state.destroyed = true;
            state.pending.clear();
            state.on_data.clear();
            state.on_end.clear();
            state.on_error.clear();
        }

        debug!(id = %self.inner.id, "request destroyed");
        let this = self.clone();
        self.inner.scheduler.defer(move || this.emit_close());
    }

    /// Drops pending chunks and every registered listener, and refuses new
    /// ones. Used when the owning injection goes away, so that listeners
    /// holding handles to this stream do not keep it alive.
    pub(crate) fn release(&self) {
        let released = {
            let mut state = self.inner.state.borrow_mut();
            state.released = true;
            (
                mem::take(&mut state.pending),
                mem::take(&mut state.on_data),
                mem::take(&mut state.on_end),
                mem::take(&mut state.on_close),
                mem::take(&mut state.on_error),
            )
        };
        drop(released);
    }

    fn schedule_tick(&self) {
        {
            let mut state = self.inner.state.borrow_mut();
            if state.flow != FlowState::Flowing
                || state.tick_scheduled
                || state.terminal.is_some()
            {
                return;
            }
            state.tick_scheduled = true;
        }

        let this = self.clone();
        self.inner.scheduler.defer(move || this.tick());
    }

    fn tick(&self) {
        let step = {
            let mut state = self.inner.state.borrow_mut();
            state.tick_scheduled = false;
            if state.flow != FlowState::Flowing || state.terminal.is_some() {
                Step::Idle
            } else if let Some(chunk) = state.pending.pop_front() {
                Step::Data(chunk, mem::take(&mut state.on_data))
            } else {
                Step::Finish
            }
        };

        match step {
            Step::Idle => {}
            Step::Data(chunk, mut listeners) => {
                trace!(id = %self.inner.id, len = chunk.len(), "request data");
                for listener in listeners.iter_mut() {
                    listener(&chunk);
                }
                {
                    let mut state = self.inner.state.borrow_mut();
                    if state.terminal.is_none() {
                        let added = mem::replace(&mut state.on_data, listeners);
                        state.on_data.extend(added);
                    }
                }
                self.schedule_tick();
            }
            Step::Finish => self.finish(),
        }
    }

    fn finish(&self) {
        let simulate = self.inner.simulate;
        let terminal = if simulate.error {
            Terminal::Errored
        } else if simulate.close {
            Terminal::Closed
        } else {
            Terminal::Ended
        };

        let (end_listeners, error_listeners) = {
            let mut state = self.inner.state.borrow_mut();
            state.terminal = Some(terminal);
            state.on_data.clear();
            (
                mem::take(&mut state.on_end),
                mem::take(&mut state.on_error),
            )
        };

        debug!(id = %self.inner.id, terminal = ?terminal, "request finished");

        match terminal {
            Terminal::Ended => {
                for listener in end_listeners {
                    listener();
                }
            }
            Terminal::Errored => {
                let err = StreamError::simulated();
                for listener in error_listeners {
                    listener(&err);
                }
            }
            Terminal::Closed => {}
        }

        self.emit_close();
    }

    fn emit_close(&self) {
        let listeners = {
            let mut state = self.inner.state.borrow_mut();
            if state.close_emitted {
                return;
            }
            state.close_emitted = true;
            mem::take(&mut state.on_close)
        };

        for listener in listeners {
            listener();
        }
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("Request")
            .field("id", &self.inner.id)
            .field("method", &self.inner.method)
            .field("url", &self.inner.url)
            .field("flow", &state.flow)
            .field("pending", &state.pending.len())
            .field("terminal", &state.terminal)
            .finish()
    }
}

fn split_payload(payload: Option<Bytes>, chunk_size: Option<NonZeroUsize>) -> VecDeque<Bytes> {
    let mut pending = VecDeque::new();
    let Some(mut payload) = payload else {
        return pending;
    };

    match chunk_size {
        Some(size) => {
            while payload.len() > size.get() {
                pending.push_back(payload.split_to(size.get()));
            }
            if !payload.is_empty() {
                pending.push_back(payload);
            }
        }
        None if payload.is_empty() => {}
        None => pending.push_back(payload),
    }
    pending
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::InjectOptions;
    use std::cell::Cell;

    fn request(options: InjectOptions) -> (Request, Scheduler) {
        let scheduler = Scheduler::new();
        let descriptor = options.into_descriptor().unwrap();
        let req = Request::new(Uuid::new_v4(), descriptor, scheduler.clone());
        (req, scheduler)
    }

    fn record(req: &Request) -> Rc<RefCell<Vec<String>>> {
        let events = Rc::new(RefCell::new(Vec::new()));

        let log = events.clone();
        req.on_data(move |chunk| {
            log.borrow_mut()
                .push(format!("data:{}", String::from_utf8_lossy(chunk)))
        });
        let log = events.clone();
        req.on_end(move || log.borrow_mut().push("end".to_string()));
        let log = events.clone();
        req.on_error(move |err| log.borrow_mut().push(format!("error:{}", err.message())));
        let log = events.clone();
        req.on_close(move || log.borrow_mut().push("close".to_string()));

        events
    }

    #[test]
    fn test_request_line() {
        let (req, _) = request(InjectOptions::new("post", "/items?page=2"));
        assert_eq!(req.method(), Method::POST);
        assert_eq!(req.url(), "/items?page=2");
        assert_eq!(req.path(), "/items");
        assert_eq!(req.query(), Some("page=2"));
        assert_eq!(req.version(), Version::HTTP_11);
        assert_eq!(req.header("User-Agent"), Some("sockless"));
        assert_eq!(req.remote_address().to_string(), "127.0.0.1");
    }

    #[test]
    fn test_initial_state() {
        let (req, scheduler) = request(InjectOptions::get("/").payload("x"));
        assert_eq!(req.flow_state(), FlowState::Initial);
        assert!(req.terminal().is_none());
        assert!(!req.is_destroyed());
        assert!(scheduler.is_idle());
    }

    #[test]
    fn test_data_is_never_delivered_synchronously() {
        let (req, scheduler) = request(InjectOptions::post("/").payload("abc"));
        let events = record(&req);

        assert_eq!(req.flow_state(), FlowState::Flowing);
        assert!(events.borrow().is_empty());

        scheduler.run_until_idle();
        assert_eq!(*events.borrow(), vec!["data:abc", "end", "close"]);
        assert_eq!(req.terminal(), Some(Terminal::Ended));
    }

    #[test]
    fn test_one_chunk_per_tick_in_order() {
        let (req, scheduler) = request(InjectOptions::post("/").payload("abcde").chunk_size(2));
        let events = record(&req);

        assert!(scheduler.tick());
        assert_eq!(*events.borrow(), vec!["data:ab"]);
        assert!(scheduler.tick());
        assert_eq!(*events.borrow(), vec!["data:ab", "data:cd"]);

        scheduler.run_until_idle();
        assert_eq!(
            *events.borrow(),
            vec!["data:ab", "data:cd", "data:e", "end", "close"]
        );
    }

    #[test]
    fn test_absent_payload_still_terminates() {
        let (req, scheduler) = request(InjectOptions::get("/"));
        let events = record(&req);

        scheduler.run_until_idle();
        assert_eq!(*events.borrow(), vec!["end", "close"]);
    }

    #[test]
    fn test_end_listener_alone_does_not_start_flow() {
        let (req, scheduler) = request(InjectOptions::get("/").payload("x"));
        let ended = Rc::new(Cell::new(false));

        let flag = ended.clone();
        req.on_end(move || flag.set(true));

        scheduler.run_until_idle();
        assert!(!ended.get());
        assert_eq!(req.flow_state(), FlowState::Initial);

        req.resume();
        scheduler.run_until_idle();
        assert!(ended.get());
    }

    #[test]
    fn test_pause_is_idempotent_and_respected_by_data_listener() {
        let (req, scheduler) = request(InjectOptions::post("/").payload("abc"));
        req.pause();
        req.pause();
        let events = record(&req);

        assert!(req.is_paused());
        scheduler.run_until_idle();
        assert!(events.borrow().is_empty());

        req.resume();
        req.resume();
        assert_eq!(scheduler.pending(), 1);

        scheduler.run_until_idle();
        assert_eq!(*events.borrow(), vec!["data:abc", "end", "close"]);
    }

    #[test]
    fn test_pause_between_chunks() {
        let (req, scheduler) = request(InjectOptions::post("/").payload("abcd").chunk_size(2));
        let events = record(&req);

        let handle = req.clone();
        req.on_data(move |_| handle.pause());

        scheduler.run_until_idle();
        assert_eq!(*events.borrow(), vec!["data:ab"]);
        assert!(req.is_paused());

        req.resume();
        scheduler.run_until_idle();
        assert_eq!(*events.borrow(), vec!["data:ab", "data:cd"]);

        req.resume();
        scheduler.run_until_idle();
        assert_eq!(*events.borrow(), vec!["data:ab", "data:cd", "end", "close"]);
    }

    #[test]
    fn test_resume_before_listener_does_not_drop_chunks() {
        let (req, scheduler) = request(InjectOptions::post("/").payload("abc"));
        req.resume();
        let events = record(&req);

        scheduler.run_until_idle();
        assert_eq!(*events.borrow(), vec!["data:abc", "end", "close"]);
    }

    #[test]
    fn test_simulated_error() {
        let (req, scheduler) =
            request(InjectOptions::post("/").payload("abc").simulate(Simulate::error()));
        let events = record(&req);

        scheduler.run_until_idle();
        assert_eq!(
            *events.borrow(),
            vec!["data:abc", "error:Simulated", "close"]
        );
        assert_eq!(req.terminal(), Some(Terminal::Errored));
    }

    #[test]
    fn test_simulated_close() {
        let (req, scheduler) =
            request(InjectOptions::post("/").payload("abc").simulate(Simulate::close()));
        let events = record(&req);

        scheduler.run_until_idle();
        assert_eq!(*events.borrow(), vec!["data:abc", "close"]);
        assert_eq!(req.terminal(), Some(Terminal::Closed));
    }

    #[test]
    fn test_destroy_before_end() {
        let (req, scheduler) = request(InjectOptions::post("/").payload("abcd").chunk_size(2));
        let events = record(&req);

        assert!(scheduler.tick());
        req.destroy();
        req.destroy();

        scheduler.run_until_idle();
        assert_eq!(*events.borrow(), vec!["data:ab", "close"]);
        assert!(req.is_destroyed());
        assert_eq!(req.terminal(), Some(Terminal::Closed));
    }

    #[test]
    fn test_destroy_after_end_has_no_effect() {
        let (req, scheduler) = request(InjectOptions::post("/").payload("abc"));
        let events = record(&req);

        let handle = req.clone();
        req.on_end(move || handle.destroy());

        scheduler.run_until_idle();
        assert_eq!(*events.borrow(), vec!["data:abc", "end", "close"]);
        assert!(!req.is_destroyed());
        assert_eq!(req.terminal(), Some(Terminal::Ended));
    }

    #[test]
    fn test_listeners_after_close_are_ignored() {
        let (req, scheduler) = request(InjectOptions::get("/"));
        let _events = record(&req);
        scheduler.run_until_idle();

        let fired = Rc::new(Cell::new(0));
        let count = fired.clone();
        req.on_close(move || count.set(count.get() + 1));
        let count = fired.clone();
        req.on_end(move || count.set(count.get() + 1));
        let count = fired.clone();
        req.on_data(move |_| count.set(count.get() + 1));

        scheduler.run_until_idle();
        assert_eq!(fired.get(), 0);
        assert!(scheduler.is_idle());
    }

    #[test]
    fn test_listener_registered_during_data_is_kept() {
        let (req, scheduler) = request(InjectOptions::post("/").payload("abcd").chunk_size(2));
        let late = Rc::new(RefCell::new(Vec::new()));

        let handle = req.clone();
        let sink = late.clone();
        let registered = Cell::new(false);
        req.on_data(move |_| {
            if !registered.replace(true) {
                let sink = sink.clone();
                handle.on_data(move |chunk| sink.borrow_mut().push(chunk.clone()));
            }
        });

        scheduler.run_until_idle();
        assert_eq!(*late.borrow(), vec![Bytes::from_static(b"cd")]);
    }

    #[test]
    fn test_split_payload() {
        let size = NonZeroUsize::new(3);
        let chunks = split_payload(Some(Bytes::from_static(b"abcdefg")), size);
        assert_eq!(chunks, vec![&b"abc"[..], &b"def"[..], &b"g"[..]]);

        assert!(split_payload(Some(Bytes::new()), None).is_empty());
        assert!(split_payload(None, size).is_empty());
        assert_eq!(split_payload(Some(Bytes::from_static(b"ab")), None).len(), 1);
    }

    #[test]
    fn test_stream_error_display() {
        let err = StreamError::simulated();
        assert_eq!(err.kind(), StreamErrorKind::Simulated);
        assert_eq!(err.to_string(), "request stream error: Simulated");
    }
}
