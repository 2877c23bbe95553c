use std::backtrace::Backtrace;
use std::error::Error as StdError;
use std::fmt;
use std::path::PathBuf;

/// HTTP method type, re-exported for use with error inspection.
pub use reqwest::Method;
/// HTTP status code type, re-exported for use with error inspection.
pub use reqwest::StatusCode;
use reqwest::header;

#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// Error related to non-successful HTTP call
    Status,
    /// Error related to invalid input or an unexpected response shape
    Validation,
    /// Error related to the local machine: lockfile, companion log, region discovery
    Environment,
    /// Error related to credentials being rejected after renewal
    Authentication,
    /// Internal error from dependencies
    Internal,
    /// Error related to the social stream connection
    Stream,
}

#[derive(Debug)]
pub struct Error {
    kind: Kind,
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
    backtrace: Backtrace,
}

impl Error {
    pub fn with_source<S: StdError + Send + Sync + 'static>(kind: Kind, source: S) -> Self {
        Self {
            kind,
            source: Some(Box::new(source)),
            backtrace: Backtrace::capture(),
        }
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    pub fn inner(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.source.as_deref()
    }

    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        let e = self.source.as_deref()?;
        e.downcast_ref::<E>()
    }

    pub fn validation<S: Into<String>>(message: S) -> Self {
        Validation {
            reason: message.into(),
        }
        .into()
    }

    pub fn status<S: Into<String>>(
        status_code: StatusCode,
        method: Method,
        path: String,
        message: S,
    ) -> Self {
        Status {
            status_code,
            method,
            path,
            message: message.into(),
        }
        .into()
    }

    pub fn environment<S: Into<String>>(path: Option<PathBuf>, reason: S) -> Self {
        Environment {
            path,
            reason: reason.into(),
        }
        .into()
    }

    pub fn authentication<E: Into<String>, S: Into<String>>(endpoint: E, reason: S) -> Self {
        Authentication {
            endpoint: endpoint.into(),
            reason: reason.into(),
        }
        .into()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(src) => write!(f, "{:?}: {}", self.kind, src),
            None => write!(f, "{:?}", self.kind),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn StdError + 'static))
    }
}

#[non_exhaustive]
#[derive(Debug)]
pub struct Status {
    pub status_code: StatusCode,
    pub method: Method,
    pub path: String,
    pub message: String,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "error({}) making {} call to {} with {}",
            self.status_code, self.method, self.path, self.message
        )
    }
}

impl StdError for Status {}

#[non_exhaustive]
#[derive(Debug)]
pub struct Validation {
    pub reason: String,
}

impl fmt::Display for Validation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid: {}", self.reason)
    }
}

impl StdError for Validation {}

/// The local machine is not in a usable state: the lockfile or the companion log is missing
/// or does not contain what we expect. These errors are never retried.
#[non_exhaustive]
#[derive(Debug)]
pub struct Environment {
    /// The file that was being read, if any
    pub path: Option<PathBuf>,
    pub reason: String,
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(path) => write!(f, "environment error reading {}: {}", path.display(), self.reason),
            None => write!(f, "environment error: {}", self.reason),
        }
    }
}

impl StdError for Environment {}

/// Credentials were rejected even after a renewal.
#[non_exhaustive]
#[derive(Debug)]
pub struct Authentication {
    /// The endpoint, or handshake phase, that rejected the credentials
    pub endpoint: String,
    pub reason: String,
}

impl fmt::Display for Authentication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "authentication rejected by {}: {}",
            self.endpoint, self.reason
        )
    }
}

impl StdError for Authentication {}

/// The API answered `BAD_CLAIMS`: the presented tokens are no longer accepted.
#[non_exhaustive]
#[derive(Debug)]
pub struct BadClaims {
    pub method: Method,
    pub path: String,
}

impl fmt::Display for BadClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BAD_CLAIMS returned by {} {}", self.method, self.path)
    }
}

impl StdError for BadClaims {}

impl From<base64::DecodeError> for Error {
    fn from(e: base64::DecodeError) -> Self {
        Error::with_source(Kind::Internal, e)
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::with_source(Kind::Internal, e)
    }
}

impl From<header::InvalidHeaderValue> for Error {
    fn from(e: header::InvalidHeaderValue) -> Self {
        Error::with_source(Kind::Internal, e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::with_source(Kind::Internal, e)
    }
}

impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Error::with_source(Kind::Internal, e)
    }
}

impl From<Validation> for Error {
    fn from(err: Validation) -> Self {
        Error::with_source(Kind::Validation, err)
    }
}

impl From<Status> for Error {
    fn from(err: Status) -> Self {
        Error::with_source(Kind::Status, err)
    }
}

impl From<Environment> for Error {
    fn from(err: Environment) -> Self {
        Error::with_source(Kind::Environment, err)
    }
}

impl From<BadClaims> for Error {
    fn from(err: BadClaims) -> Self {
        Error::with_source(Kind::Authentication, err)
    }
}

impl From<Authentication> for Error {
    fn from(err: Authentication) -> Self {
        Error::with_source(Kind::Authentication, err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_display_should_include_path() {
        let err = Environment {
            path: Some(PathBuf::from("/tmp/lockfile")),
            reason: "expected 5 fields, found 2".to_owned(),
        };

        assert_eq!(
            err.to_string(),
            "environment error reading /tmp/lockfile: expected 5 fields, found 2"
        );
    }

    #[test]
    fn environment_into_error_should_succeed() {
        let error = Error::environment(None, "LOCALAPPDATA is not set");

        assert_eq!(error.kind(), Kind::Environment);
        assert!(error.to_string().contains("LOCALAPPDATA"));
        assert!(error.downcast_ref::<Environment>().is_some());
    }

    #[test]
    fn authentication_into_error_should_succeed() {
        let error = Error::authentication("local/help", "BAD_CLAIMS after renewal");

        assert_eq!(error.kind(), Kind::Authentication);
        let auth = error.downcast_ref::<Authentication>().unwrap();
        assert_eq!(auth.endpoint, "local/help");
    }
}
