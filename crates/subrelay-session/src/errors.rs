//! Session error types.

use subrelay_core::ErrorKind;

use crate::close_code;

/// Errors opening or using a session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The socket could not be established.
    #[error("connect to {url} failed: {message}")]
    Connect {
        /// Target URL.
        url: String,
        /// Underlying error.
        message: String,
    },

    /// The session closed before a welcome arrived.
    #[error("handshake failed: session closed with {code} ({})", close_code::describe(*code))]
    Handshake {
        /// Close code reported by the session.
        code: u16,
    },

    /// The session has no id yet (not welcomed) or is already closed.
    #[error("session is not active")]
    NotActive,
}

impl SessionError {
    /// Classification for the control bus.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Connect { .. } | Self::Handshake { .. } => ErrorKind::TransportFailure,
            Self::NotActive => ErrorKind::Failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_display_names_code() {
        let err = SessionError::Handshake {
            code: close_code::PROTOCOL_VIOLATION,
        };
        assert_eq!(
            err.to_string(),
            "handshake failed: session closed with 4909 (protocol violation)"
        );
        assert_eq!(err.kind(), ErrorKind::TransportFailure);
    }

    #[test]
    fn connect_display() {
        let err = SessionError::Connect {
            url: "wss://example".into(),
            message: "refused".into(),
        };
        assert!(err.to_string().contains("wss://example"));
    }
}
