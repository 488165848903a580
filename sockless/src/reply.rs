//! The assembled result of an injection.

use std::borrow::Cow;

use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use http_body_util::Full;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::accumulator::Accumulator;

/// Everything the handler sent, delivered once the response has ended.
///
/// `payload` is the exact concatenation of the chunks passed to `write` and
/// `end` up to the first effective `end`.
#[derive(Debug, Clone)]
pub struct InjectResponse {
    id: Uuid,
    status: StatusCode,
    headers: HeaderMap,
    trailers: HeaderMap,
    payload: Bytes,
    raw_chunks: Vec<Bytes>,
}

impl InjectResponse {
    pub(crate) fn new(
        id: Uuid,
        status: StatusCode,
        headers: HeaderMap,
        trailers: HeaderMap,
        body: Accumulator,
    ) -> Self {
        Self {
            id,
            status,
            headers,
            trailers,
            payload: body.concat(),
            raw_chunks: body.into_chunks(),
        }
    }

    /// Identifier of the injection that produced this response.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The status code. `200 OK` when the handler never set one.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Looks up a response header by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    pub fn trailers(&self) -> &HeaderMap {
        &self.trailers
    }

    /// The response body as raw bytes.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// The body chunks in the order they were written.
    pub fn raw_chunks(&self) -> &[Bytes] {
        &self.raw_chunks
    }

    /// The body as text, or `None` when it is not valid UTF-8.
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }

    /// The body as text, with invalid UTF-8 sequences replaced.
    pub fn text_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }

    /// Deserializes the body as JSON.
    ///
    /// # Panics
    ///
    /// Panics when the body is not valid JSON for `T`; use
    /// [`InjectResponse::try_json`] to handle that case.
    pub fn json<T: DeserializeOwned>(&self) -> T {
        self.try_json()
            .unwrap_or_else(|err| panic!("response body is not valid JSON: {}", err))
    }

    /// Attempts to deserialize the body as JSON.
    pub fn try_json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }

    /// Converts into an `http::Response` carrying the payload as its body.
    pub fn into_http(self) -> http::Response<Full<Bytes>> {
        let mut response = http::Response::new(Full::new(self.payload));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}
