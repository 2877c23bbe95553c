#![expect(
    clippy::module_name_repetitions,
    reason = "Error types include the module name to indicate their scope"
)]

use std::error::Error as StdError;
use std::fmt;
use std::io;

/// Social stream error variants.
#[non_exhaustive]
#[derive(Debug)]
pub enum StreamError {
    /// Error opening the TCP connection to the chat server
    Connect(io::Error),
    /// Error negotiating TLS on top of the TCP connection
    Tls(io::Error),
    /// Error reading from or writing to an established connection
    Io(io::Error),
    /// The server closed the connection
    ConnectionClosed,
    /// A phase of the connection did not complete in time
    Timeout {
        /// The handshake step or operation that timed out
        phase: &'static str,
    },
    /// Incomplete data grew past the framer's limit and was discarded
    BufferOverflow {
        /// Configured maximum of buffered bytes
        limit: usize,
    },
    /// A fragment could not be parsed as markup
    Markup(String),
    /// The client is not listening
    NotConnected,
    /// No listener is registered under the given id
    ListenerNotFound,
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect(e) => write!(f, "Unable to connect to chat server: {e}"),
            Self::Tls(e) => write!(f, "TLS negotiation failed: {e}"),
            Self::Io(e) => write!(f, "Stream I/O error: {e}"),
            Self::ConnectionClosed => write!(f, "Stream connection closed"),
            Self::Timeout { phase } => write!(f, "Timed out during {phase}"),
            Self::BufferOverflow { limit } => {
                write!(f, "Incomplete stream data exceeded {limit} bytes")
            }
            Self::Markup(reason) => write!(f, "Invalid stream markup: {reason}"),
            Self::NotConnected => write!(f, "Social client is not listening"),
            Self::ListenerNotFound => write!(f, "Listener not found"),
        }
    }
}

impl StdError for StreamError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Connect(e) | Self::Tls(e) | Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

// Integration with main Error type
impl From<StreamError> for crate::error::Error {
    fn from(e: StreamError) -> Self {
        crate::error::Error::with_source(crate::error::Kind::Stream, e)
    }
}

impl From<io::Error> for StreamError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => Self::ConnectionClosed,
            _ => Self::Io(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Kind};

    #[test]
    fn stream_error_into_error_should_succeed() {
        let error: Error = StreamError::Timeout { phase: "auth" }.into();

        assert_eq!(error.kind(), Kind::Stream);
        assert!(matches!(
            error.downcast_ref::<StreamError>(),
            Some(StreamError::Timeout { phase: "auth" })
        ));
        assert_eq!(error.to_string(), "Stream: Timed out during auth");
    }

    #[test]
    fn reset_is_connection_closed() {
        let error = StreamError::from(io::Error::from(io::ErrorKind::ConnectionReset));
        assert!(matches!(error, StreamError::ConnectionClosed));

        let error = StreamError::from(io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(matches!(error, StreamError::Io(_)));
    }
}
