//
use std::fmt;
use std::io;

use crate::api::ApiProblem;

/// acme-dns-tiny result.
pub type Result<T> = ::std::result::Result<T, Error>;

/// acme-dns-tiny errors.
///
/// Every variant aborts the current run. The variants are kept distinct so the caller
/// can tell a rejected validation from a poll timeout or a flaky nonce.
#[derive(Debug)]
pub enum Error {
    /// The ACME API answered with a non-2xx status and a problem document.
    Api(ApiProblem),
    /// The API rejected the nonce twice in a row.
    NonceRetryExhausted(ApiProblem),
    /// A resource did not reach a final status within the poll budget.
    Timeout {
        /// What was polled, e.g. `authorization for example.org`.
        what: String,
        /// Number of attempts made before giving up.
        attempts: usize,
    },
    /// The ACME API rejected the validation of an identifier.
    ValidationRejected {
        identifier: String,
        problem: Option<ApiProblem>,
    },
    /// The order went `invalid`.
    OrderInvalid(Option<ApiProblem>),
    /// The external DNS hook failed.
    Hook {
        identifier: String,
        action: &'static str,
        reason: String,
    },
    /// Network level failure talking to the API.
    Call(String),
    /// Key or CSR material could not be used.
    Crypto(openssl::error::ErrorStack),
    /// JSON serialization/deserialization error.
    Json(serde_json::Error),
    /// std::io error.
    Io(io::Error),
    /// Some other error. Notice that `Error` is
    /// `From<String>` and `From<&str>` and it becomes `Other`.
    Other(String),
}
impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Api(p) => write!(f, "{}", p),
            Error::NonceRetryExhausted(p) => write!(f, "nonce retry exhausted: {}", p),
            Error::Timeout { what, attempts } => {
                write!(f, "timeout after {} attempts waiting for {}", attempts, what)
            }
            Error::ValidationRejected {
                identifier,
                problem: Some(p),
            } => write!(f, "validation of {} rejected: {}", identifier, p),
            Error::ValidationRejected {
                identifier,
                problem: None,
            } => write!(f, "validation of {} rejected", identifier),
            Error::OrderInvalid(Some(p)) => write!(f, "order is invalid: {}", p),
            Error::OrderInvalid(None) => write!(f, "order is invalid"),
            Error::Hook {
                identifier,
                action,
                reason,
            } => write!(f, "dns hook {} failed for {}: {}", action, identifier, reason),
            Error::Call(s) => write!(f, "{}", s),
            Error::Crypto(e) => write!(f, "{}", e),
            Error::Json(e) => write!(f, "{}", e),
            Error::Io(e) => write!(f, "{}", e),
            Error::Other(s) => write!(f, "{}", s),
        }
    }
}

impl From<ApiProblem> for Error {
    fn from(p: ApiProblem) -> Self {
        Error::Api(p)
    }
}

impl From<openssl::error::ErrorStack> for Error {
    fn from(e: openssl::error::ErrorStack) -> Self {
        Error::Crypto(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(e)
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}
