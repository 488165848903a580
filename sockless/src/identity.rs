use std::any::Any;

use crate::request::Request;
use crate::response::Response;

/// Returns `true` when `value` is a request or response created by an
/// injection, letting handlers and middleware tell synthetic transport
/// objects from real ones.
///
/// ```
/// use sockless::is_injection;
///
/// assert!(!is_injection(&"not a stream"));
/// ```
pub fn is_injection(value: &dyn Any) -> bool {
    value.is::<Request>() || value.is::<Response>()
}
