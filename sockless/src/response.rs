//! The synthetic outgoing response.
//!
//! A [`Response`] records the status, headers and body chunks a handler
//! produces. Its first `end()` freezes that record into an
//! [`InjectResponse`] and signals completion; everything afterwards is
//! ignored.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::accumulator::{Accumulator, Chunk};
use crate::completion::Completion;
use crate::error::{Error, Result};
use crate::options::parse_header;
use crate::reply::InjectResponse;

struct SinkState {
    status: Option<StatusCode>,
    headers: HeaderMap,
    trailers: HeaderMap,
    body: Accumulator,
    headers_sent: bool,
    ended: bool,
}

struct Inner {
    id: Uuid,
    state: RefCell<SinkState>,
    completion: Rc<Completion>,
}

/// The response half handed to a handler.
///
/// Cloning yields another handle to the same response, so clones can be
/// moved into request listeners that finish the response later.
#[derive(Clone)]
pub struct Response {
    inner: Rc<Inner>,
}

impl Response {
    pub(crate) fn new(id: Uuid, completion: Rc<Completion>) -> Self {
        Self {
            inner: Rc::new(Inner {
                id,
                state: RefCell::new(SinkState {
                    status: None,
                    headers: HeaderMap::new(),
                    trailers: HeaderMap::new(),
                    body: Accumulator::new(),
                    headers_sent: false,
                    ended: false,
                }),
                completion,
            }),
        }
    }

    /// Identifier shared by both halves of the injection.
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Records the status line and merges `headers` into the response
    /// headers. May be called again; later values overwrite earlier ones.
    ///
    /// ```
    /// # use sockless::prelude::*;
    /// # let options = InjectOptions::get("/");
    /// # let injection = inject(|_req, res| {
    /// res.write_head(200, &[("content-type", "text/plain")]).unwrap();
    /// res.end_with("ok");
    /// # }, options, |_| {}).unwrap();
    /// ```
    pub fn write_head(&self, status: u16, headers: &[(&str, &str)]) -> Result<()> {
        let status = parse_status(status)?;
        let parsed = headers
            .iter()
            .map(|(name, value)| parse_header(name, value))
            .collect::<Result<Vec<_>>>()?;

        let mut state = self.inner.state.borrow_mut();
        if state.ended {
            debug!(id = %self.inner.id, "write_head after end ignored");
            return Ok(());
        }
        state.status = Some(status);
        for (name, value) in parsed {
            state.headers.insert(name, value);
        }
        state.headers_sent = true;
        Ok(())
    }

    /// Sets the status code without marking headers as sent.
    pub fn set_status(&self, status: u16) -> Result<()> {
        let status = parse_status(status)?;
        let mut state = self.inner.state.borrow_mut();
        if !state.ended {
            state.status = Some(status);
        }
        Ok(())
    }

    /// The status set so far, if any.
    pub fn status(&self) -> Option<StatusCode> {
        self.inner.state.borrow().status
    }

    /// Sets one header, replacing any previous value for the same name.
    pub fn set_header(&self, name: &str, value: &str) -> Result<()> {
        let (name, value) = parse_header(name, value)?;
        let mut state = self.inner.state.borrow_mut();
        if !state.ended {
            state.headers.insert(name, value);
        }
        Ok(())
    }

    pub fn header(&self, name: &str) -> Option<HeaderValue> {
        self.inner.state.borrow().headers.get(name).cloned()
    }

    pub fn remove_header(&self, name: &str) -> Option<HeaderValue> {
        let mut state = self.inner.state.borrow_mut();
        if state.ended {
            return None;
        }
        state.headers.remove(name)
    }

    /// Adds trailing headers, reported separately in the result.
    pub fn add_trailers(&self, trailers: &[(&str, &str)]) -> Result<()> {
        let parsed = trailers
            .iter()
            .map(|(name, value)| parse_header(name, value))
            .collect::<Result<Vec<(HeaderName, HeaderValue)>>>()?;

        let mut state = self.inner.state.borrow_mut();
        if !state.ended {
            for (name, value) in parsed {
                state.trailers.insert(name, value);
            }
        }
        Ok(())
    }

    /// Appends a body chunk. Returns `false` when the response has already
    /// ended and the chunk was dropped.
    pub fn write(&self, chunk: impl Into<Chunk>) -> bool {
        let mut state = self.inner.state.borrow_mut();
        if state.ended {
            trace!(id = %self.inner.id, "write after end ignored");
            return false;
        }
        let chunk = chunk.into();
        trace!(id = %self.inner.id, len = chunk.len(), "response write");
        state.body.push(chunk);
        state.headers_sent = true;
        true
    }

    /// Finishes the response. Only the first call has an effect; it returns
    /// `true`, later calls return `false`.
    pub fn end(&self) -> bool {
        self.finish(None)
    }

    /// Appends `chunk` and finishes the response, like [`Response::end`].
    pub fn end_with(&self, chunk: impl Into<Chunk>) -> bool {
        self.finish(Some(chunk.into()))
    }

    fn finish(&self, chunk: Option<Chunk>) -> bool {
        let result = {
            let mut state = self.inner.state.borrow_mut();
            if state.ended {
                debug!(id = %self.inner.id, "end called on an ended response");
                return false;
            }
            if let Some(chunk) = chunk {
                state.body.push(chunk);
            }
            state.ended = true;
            state.headers_sent = true;

            InjectResponse::new(
                self.inner.id,
                state.status.unwrap_or(StatusCode::OK),
                state.headers.clone(),
                std::mem::take(&mut state.trailers),
                std::mem::take(&mut state.body),
            )
        };

        self.inner.completion.signal(result)
    }

    /// `true` once `write_head`, `write` or `end` has run.
    pub fn headers_sent(&self) -> bool {
        self.inner.state.borrow().headers_sent
    }

    pub fn is_ended(&self) -> bool {
        self.inner.state.borrow().ended
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("Response")
            .field("id", &self.inner.id)
            .field("status", &state.status)
            .field("headers", &state.headers)
            .field("written", &state.body.len())
            .field("ended", &state.ended)
            .finish()
    }
}

fn parse_status(status: u16) -> Result<StatusCode> {
    StatusCode::from_u16(status).map_err(|_| Error::InvalidStatus(status))
}
