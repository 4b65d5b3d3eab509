//! The crate-wide error type and its recovery policy.

use std::io;

use crate::errorcodes::ErrorKind;

/// Errors produced while driving a connection.
///
/// Variants split into two groups. `Command`, `Unsupported` and `Internal`
/// are *recoverable*: the connection writes a well-formed error packet and
/// stays in the command loop. Everything else is *fatal*: no valid protocol
/// response can be produced, and the connection is torn down (with a final
/// 1152 error packet if authentication had already completed).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed frame, out-of-order sequence id, or truncated packet.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Credential rejection during the authentication phase.
    #[error("access denied for user '{username}'")]
    Auth {
        /// The username the client presented.
        username: String,
        /// Optional plugin-supplied detail.
        reason: Option<String>,
    },

    /// A structured application-level error returned by a [`Session`]
    /// callback, relayed to the client verbatim.
    ///
    /// [`Session`]: crate::Session
    #[error("{msg}")]
    Command {
        /// The MySQL error code (and therefore SQLSTATE) to report.
        kind: ErrorKind,
        /// Human-readable message.
        msg: String,
    },

    /// An unknown opcode or a feature the negotiated capabilities do not
    /// admit.
    #[error("{msg}")]
    Unsupported {
        /// The MySQL error code to report, typically 1047 or 1289.
        kind: ErrorKind,
        /// Human-readable message.
        msg: String,
    },

    /// An unstructured failure inside a callback; reported as 1105.
    #[error("internal error: {0}")]
    Internal(String),

    /// The underlying stream failed.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    /// Construct a [`Error::Command`] from a code and message.
    pub fn command(kind: ErrorKind, msg: impl Into<String>) -> Self {
        Error::Command {
            kind,
            msg: msg.into(),
        }
    }

    /// True if the command loop may keep running after reporting this error
    /// to the client.
    pub(crate) fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Command { .. } | Error::Unsupported { .. } | Error::Internal(_)
        )
    }

    /// The error code and message to put in the ERR packet for a
    /// recoverable error.
    pub(crate) fn to_wire(&self) -> (ErrorKind, String) {
        match self {
            Error::Command { kind, msg } | Error::Unsupported { kind, msg } => {
                (*kind, msg.clone())
            }
            Error::Internal(msg) => (ErrorKind::ER_UNKNOWN_ERROR, msg.clone()),
            Error::Auth { username, reason } => (
                ErrorKind::ER_ACCESS_DENIED_ERROR,
                reason
                    .clone()
                    .unwrap_or_else(|| format!("Access denied for user '{}'", username)),
            ),
            Error::Protocol(msg) => (ErrorKind::ER_ABORTING_CONNECTION, msg.clone()),
            Error::Io(e) => (ErrorKind::ER_UNKNOWN_ERROR, e.to_string()),
        }
    }
}
