//! Drive HTTP handlers with synthetic streams, without a socket.
//!
//! A handler written against a streaming [`Request`]/[`Response`] pair is
//! called with objects that behave like an incoming and an outgoing
//! message. The request replays an injected payload under pause/resume
//! flow control; the response captures status, headers and body chunks.
//! When the handler ends the response, the result is assembled and handed
//! to the caller exactly once.
//!
//! ```
//! use sockless::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let res = inject_async(
//!     |req, res| {
//!         let echo = res.clone();
//!         let body = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
//!         let sink = body.clone();
//!         req.on_data(move |chunk| sink.borrow_mut().extend_from_slice(chunk));
//!         req.on_end(move || {
//!             echo.write_head(200, &[]).unwrap();
//!             echo.end_with(body.take());
//!         });
//!     },
//!     InjectOptions::post("/echo").payload("ping"),
//! )
//! .await
//! .unwrap();
//!
//! assert_eq!(res.status(), StatusCode::OK);
//! assert_eq!(res.text(), Some("ping"));
//! # }
//! ```

pub mod accumulator;
pub mod config;
pub mod error;
pub mod identity;
pub mod inject;
pub mod observability;
pub mod options;
pub mod reply;
pub mod request;
pub mod response;
pub mod scheduler;

mod completion;

pub use identity::is_injection;
pub use inject::{Injection, inject, inject_async};
pub use options::{InjectOptions, Simulate};
pub use reply::InjectResponse;
pub use request::{Request, StreamError};
pub use response::Response;

pub mod prelude {
    pub use crate::accumulator::Chunk;
    pub use crate::config::InjectDefaults;
    pub use crate::error::{Error, Result};
    pub use crate::identity::is_injection;
    pub use crate::inject::{Injection, inject, inject_async};
    pub use crate::options::{InjectOptions, Simulate};
    pub use crate::reply::InjectResponse;
    pub use crate::request::{FlowState, Request, StreamError, Terminal};
    pub use crate::response::Response;
    pub use crate::scheduler::Scheduler;

    pub use bytes::Bytes;
    pub use http::{Method, StatusCode};
}
