use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use rater_proto::EncodeError;
use rater_proto::ProtocolError;

/// The exchange phase a timer was guarding when it fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutPhase {
    Connect,
    Send,
    Read,
}

impl fmt::Display for TimeoutPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect => f.write_str("connecting to"),
            Self::Send => f.write_str("sending to"),
            Self::Read => f.write_str("reading from"),
        }
    }
}

/// Errors produced while checking a request against the backend.
///
/// All of them are local to a single request. None is retried.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RaterError {
    /// The prefixed key exceeds what the backend accepts.
    #[error("the rate limit key is more than 65535 bytes ({len} bytes)")]
    KeyTooLong { len: usize },

    /// The command could not be framed. This is a defect, not bad input.
    #[error("failed to encode rate limit command: {0}")]
    Encode(#[source] Arc<EncodeError>),

    /// A per-request backend target evaluated to nothing.
    #[error("empty rate limit backend target")]
    EmptyTarget,

    /// A per-request backend target named a group that was never registered.
    #[error("rate limit backend \"{0}\" not found")]
    UnknownBackend(String),

    #[error("connect() to rate limit backend {endpoint} failed: {source}")]
    Connect {
        endpoint: SocketAddr,
        #[source]
        source: Arc<io::Error>,
    },

    #[error("rate limit backend I/O error: {0}")]
    Io(#[source] Arc<io::Error>),

    /// The backend closed the connection before a full reply arrived.
    #[error("rate limit backend prematurely closed connection")]
    PrematureClose,

    #[error("timed out {phase} rate limit backend")]
    Timeout { phase: TimeoutPhase },

    /// The reply did not follow the expected layout.
    #[error("rate limit backend sent invalid response \"{received}\": {source}")]
    Protocol {
        #[source]
        source: ProtocolError,
        /// Everything received so far, escaped for logging.
        received: String,
    },

    /// The reply did not fit in the receive buffer.
    #[error("rate limit backend sent too big response (buffer is {capacity} bytes)")]
    ResponseTooLarge { capacity: usize },

    /// The owning request went away before the exchange finished.
    #[error("rate limit exchange aborted")]
    Aborted,
}

impl RaterError {
    pub(crate) fn io(err: io::Error) -> Self {
        Self::Io(Arc::new(err))
    }

    pub(crate) fn connect(endpoint: SocketAddr, err: io::Error) -> Self {
        Self::Connect {
            endpoint,
            source: Arc::new(err),
        }
    }

    /// Check if this error is due to an expired timer.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Whether the backend itself misbehaved or was unreachable, as opposed
    /// to a local input or setup problem.
    pub fn is_backend_failure(&self) -> bool {
        matches!(
            self,
            Self::Connect { .. }
                | Self::Io(_)
                | Self::PrematureClose
                | Self::Timeout { .. }
                | Self::Protocol { .. }
                | Self::ResponseTooLarge { .. }
        )
    }

    /// Short, stable label used as a metric attribute.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::KeyTooLong { .. } => "key_too_long",
            Self::Encode(_) => "encode",
            Self::EmptyTarget => "empty_target",
            Self::UnknownBackend(_) => "unknown_backend",
            Self::Connect { .. } => "connect",
            Self::Io(_) => "io",
            Self::PrematureClose => "premature_close",
            Self::Timeout { .. } => "timeout",
            Self::Protocol { .. } => "protocol",
            Self::ResponseTooLarge { .. } => "response_too_large",
            Self::Aborted => "aborted",
        }
    }
}

impl From<EncodeError> for RaterError {
    fn from(err: EncodeError) -> Self {
        match err {
            EncodeError::KeyTooLong { len } => Self::KeyTooLong { len },
            other => Self::Encode(Arc::new(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_display_names_the_phase() {
        let err = RaterError::Timeout {
            phase: TimeoutPhase::Read,
        };
        assert_eq!(err.to_string(), "timed out reading from rate limit backend");
        assert!(err.is_timeout());
        assert!(err.is_backend_failure());
    }

    #[test]
    fn encode_errors_keep_key_length_distinct() {
        let err = RaterError::from(EncodeError::KeyTooLong { len: 70000 });
        assert!(matches!(err, RaterError::KeyTooLong { len: 70000 }));
        assert!(!err.is_backend_failure());

        let err = RaterError::from(EncodeError::LengthMismatch {
            expected: 10,
            written: 9,
        });
        assert_eq!(err.kind(), "encode");
        assert!(err.to_string().contains("wrote 9 bytes, expected 10"));
    }

    #[test]
    fn errors_are_cloneable() {
        let err = RaterError::connect(
            "127.0.0.1:6379".parse().unwrap(),
            io::Error::from(io::ErrorKind::ConnectionRefused),
        );
        let cloned = err.clone();
        assert_eq!(err.to_string(), cloned.to_string());
        assert_eq!(cloned.kind(), "connect");
    }
}
