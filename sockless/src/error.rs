//! Error type for the injection engine.
//!
//! Only configuration mistakes surface as [`Error`]: a malformed method or
//! URL in the injection options, or an invalid status/header passed to the
//! synthetic response. Simulated transport faults are not errors here; they
//! reach the handler as [`StreamError`](crate::request::StreamError) values
//! on the request's error listener.

use std::fmt;

use crate::config::ConfigError;

/// Errors returned by the injection engine.
#[derive(Debug)]
pub enum Error {
    /// The request method is empty or not a valid HTTP token.
    InvalidMethod(String),
    /// The request URL is empty or cannot be parsed.
    InvalidUrl { url: String, reason: String },
    /// A header name contains characters not allowed by HTTP.
    InvalidHeaderName(String),
    /// A header value contains characters not allowed by HTTP.
    InvalidHeaderValue { name: String },
    /// A status code outside `100..=999`.
    InvalidStatus(u16),
    /// A JSON or form payload could not be serialized.
    Serialize(String),
    /// Environment-driven defaults could not be loaded.
    Config(ConfigError),
}

impl Error {
    pub(crate) fn invalid_url(url: impl Into<String>, reason: impl fmt::Display) -> Self {
        Error::InvalidUrl {
            url: url.into(),
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidMethod(method) => write!(f, "invalid request method '{}'", method),
            Error::InvalidUrl { url, reason } => {
                write!(f, "invalid request url '{}': {}", url, reason)
            }
            Error::InvalidHeaderName(name) => write!(f, "invalid header name '{}'", name),
            Error::InvalidHeaderValue { name } => {
                write!(f, "invalid value for header '{}'", name)
            }
            Error::InvalidStatus(status) => write!(f, "invalid status code {}", status),
            Error::Serialize(message) => write!(f, "failed to serialize payload: {}", message),
            Error::Config(err) => write!(f, "configuration error: {}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Config(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialize(err.to_string())
    }
}

impl From<serde_urlencoded::ser::Error> for Error {
    fn from(err: serde_urlencoded::ser::Error) -> Self {
        Error::Serialize(err.to_string())
    }
}

/// A type alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_method() {
        let err = Error::InvalidMethod("GE T".to_string());
        assert_eq!(err.to_string(), "invalid request method 'GE T'");
    }

    #[test]
    fn test_error_display_url() {
        let err = Error::invalid_url("", "url is empty");
        assert_eq!(err.to_string(), "invalid request url '': url is empty");
    }

    #[test]
    fn test_error_display_header() {
        let err = Error::InvalidHeaderName("bad name".to_string());
        assert_eq!(err.to_string(), "invalid header name 'bad name'");

        let err = Error::InvalidHeaderValue {
            name: "x-test".to_string(),
        };
        assert_eq!(err.to_string(), "invalid value for header 'x-test'");
    }

    #[test]
    fn test_error_display_status() {
        let err = Error::InvalidStatus(42);
        assert_eq!(err.to_string(), "invalid status code 42");
    }

    #[test]
    fn test_error_from_config_error() {
        let err: Error = ConfigError::Missing("SOCKLESS_REMOTE_ADDR".to_string()).into();
        assert!(matches!(err, Error::Config(_)));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_error_from_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Serialize(_)));
    }

    #[test]
    fn test_error_is_std_error() {
        let err = Error::InvalidStatus(1000);
        let _: &dyn std::error::Error = &err;
    }
}
