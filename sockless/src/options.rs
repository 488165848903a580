//! Injection options: the description of one synthetic request.

use std::net::IpAddr;
use std::num::NonZeroUsize;

use bytes::Bytes;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE, HOST, USER_AGENT};
use http::{HeaderMap, HeaderName, HeaderValue, Method, Uri};
use serde::Serialize;

use crate::accumulator::Chunk;
use crate::config::InjectDefaults;
use crate::error::{Error, Result};

/// Alternate ways for the request stream to terminate.
///
/// With `error` set the stream emits an error instead of `end`; with `close`
/// set it emits only `close`. In both cases `close` listeners still run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Simulate {
    pub error: bool,
    pub close: bool,
}

impl Simulate {
    pub fn error() -> Self {
        Self {
            error: true,
            close: false,
        }
    }

    pub fn close() -> Self {
        Self {
            error: false,
            close: true,
        }
    }

    pub fn is_set(&self) -> bool {
        self.error || self.close
    }
}

/// Builder describing the request to inject.
///
/// Nothing is validated until [`inject`](crate::inject::inject) runs, so a
/// malformed method, URL, header or payload is reported there, before the
/// handler is called.
///
/// # Examples
///
/// ```
/// use sockless::options::{InjectOptions, Simulate};
///
/// let options = InjectOptions::post("/upload")
///     .header("x-request-id", "abc")
///     .payload("hello")
///     .simulate(Simulate::close());
/// ```
#[derive(Debug)]
pub struct InjectOptions {
    method: String,
    url: String,
    headers: Vec<(String, String)>,
    payload: Option<Chunk>,
    chunk_size: Option<NonZeroUsize>,
    simulate: Simulate,
    remote_address: Option<IpAddr>,
    authority: Option<String>,
    defaults: InjectDefaults,
    invalid: Option<Error>,
}

impl InjectOptions {
    /// Creates options for `method` (any case) and `url`.
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            headers: Vec::new(),
            payload: None,
            chunk_size: None,
            simulate: Simulate::default(),
            remote_address: None,
            authority: None,
            defaults: InjectDefaults::default(),
            invalid: None,
        }
    }

    /// Like [`InjectOptions::new`], with defaults read by
    /// [`InjectDefaults::from_env`].
    pub fn from_env(method: impl Into<String>, url: impl Into<String>) -> Result<Self> {
        let defaults = InjectDefaults::from_env()?;
        Ok(Self::new(method, url).defaults(defaults))
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new("GET", url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new("POST", url)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::new("PUT", url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new("DELETE", url)
    }

    pub fn patch(url: impl Into<String>) -> Self {
        Self::new("PATCH", url)
    }

    /// Adds a request header. Names are case-insensitive; a later value for
    /// the same name replaces an earlier one.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets the request payload, as text or raw bytes.
    pub fn payload(mut self, payload: impl Into<Chunk>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    /// Serializes `body` as the JSON payload and defaults `content-type` to
    /// `application/json`.
    pub fn json<T: Serialize>(mut self, body: &T) -> Self {
        match serde_json::to_vec(body) {
            Ok(bytes) => {
                self.payload = Some(bytes.into());
                self.default_content_type("application/json");
            }
            Err(err) => self.invalid = Some(err.into()),
        }
        self
    }

    /// Serializes `body` as a URL-encoded form payload and defaults
    /// `content-type` to `application/x-www-form-urlencoded`.
    pub fn form<T: Serialize>(mut self, body: &T) -> Self {
        match serde_urlencoded::to_string(body) {
            Ok(text) => {
                self.payload = Some(text.into());
                self.default_content_type("application/x-www-form-urlencoded");
            }
            Err(err) => self.invalid = Some(err.into()),
        }
        self
    }

    /// Splits the payload into `data` events of at most `size` bytes. By
    /// default the whole payload is delivered as one chunk. Zero is ignored.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = NonZeroUsize::new(size);
        self
    }

    pub fn simulate(mut self, simulate: Simulate) -> Self {
        self.simulate = simulate;
        self
    }

    /// Overrides the remote address reported by the request.
    pub fn remote_address(mut self, addr: IpAddr) -> Self {
        self.remote_address = Some(addr);
        self
    }

    /// Overrides the `host` used when the URL carries no authority.
    pub fn authority(mut self, authority: impl Into<String>) -> Self {
        self.authority = Some(authority.into());
        self
    }

    /// Replaces the stand-in defaults, e.g. with [`InjectDefaults::from_env`].
    pub fn defaults(mut self, defaults: InjectDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    fn default_content_type(&mut self, value: &str) {
        let present = self
            .headers
            .iter()
            .any(|(name, _)| name.eq_ignore_ascii_case(CONTENT_TYPE.as_str()));
        if !present {
            self.headers
                .push((CONTENT_TYPE.as_str().to_string(), value.to_string()));
        }
    }

    /// Validates the options and resolves defaulted headers.
    pub(crate) fn into_descriptor(self) -> Result<Descriptor> {
        if let Some(err) = self.invalid {
            return Err(err);
        }

        let method = parse_method(&self.method)?;
        let uri = parse_url(&self.url)?;

        let mut headers = HeaderMap::with_capacity(self.headers.len() + 3);
        for (name, value) in &self.headers {
            let (name, value) = parse_header(name, value)?;
            headers.insert(name, value);
        }

        if !headers.contains_key(USER_AGENT) {
            let value = HeaderValue::from_str(&self.defaults.user_agent).map_err(|_| {
                Error::InvalidHeaderValue {
                    name: USER_AGENT.as_str().to_string(),
                }
            })?;
            headers.insert(USER_AGENT, value);
        }

        if !headers.contains_key(HOST) {
            let host = match uri.authority() {
                Some(authority) => authority.as_str().to_string(),
                None => self
                    .authority
                    .unwrap_or_else(|| self.defaults.authority.clone()),
            };
            let value = HeaderValue::from_str(&host).map_err(|_| Error::InvalidHeaderValue {
                name: HOST.as_str().to_string(),
            })?;
            headers.insert(HOST, value);
        }

        let payload = self.payload.map(Chunk::into_bytes);
        if let Some(payload) = &payload {
            if !payload.is_empty() && !headers.contains_key(CONTENT_LENGTH) {
                headers.insert(CONTENT_LENGTH, HeaderValue::from(payload.len()));
            }
        }

        Ok(Descriptor {
            method,
            url: self.url,
            uri,
            headers,
            payload,
            chunk_size: self.chunk_size,
            simulate: self.simulate,
            remote_address: self
                .remote_address
                .unwrap_or(self.defaults.remote_address),
        })
    }
}

/// Validated, immutable form of [`InjectOptions`].
#[derive(Debug, Clone)]
pub(crate) struct Descriptor {
    pub method: Method,
    pub url: String,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub payload: Option<Bytes>,
    pub chunk_size: Option<NonZeroUsize>,
    pub simulate: Simulate,
    pub remote_address: IpAddr,
}

fn parse_method(method: &str) -> Result<Method> {
    let upper = method.trim().to_ascii_uppercase();
    if upper.is_empty() {
        return Err(Error::InvalidMethod(method.to_string()));
    }
    Method::from_bytes(upper.as_bytes()).map_err(|_| Error::InvalidMethod(method.to_string()))
}

fn parse_url(url: &str) -> Result<Uri> {
    if url.is_empty() {
        return Err(Error::invalid_url(url, "url is empty"));
    }
    url.parse::<Uri>().map_err(|err| Error::invalid_url(url, err))
}

pub(crate) fn parse_header(name: &str, value: &str) -> Result<(HeaderName, HeaderValue)> {
    let header_name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| Error::InvalidHeaderName(name.to_string()))?;
    let header_value = HeaderValue::from_str(value).map_err(|_| Error::InvalidHeaderValue {
        name: name.to_string(),
    })?;
    Ok((header_name, header_value))
}
