//! The error taxonomy and its wire envelope.
//!
//! Every error a runtime operation can produce is one of these kinds. They
//! cross the HTTP boundary as a JSON envelope under a dedicated status code
//! and are reconstructed by kind name on the client side.

use serde::{Deserialize, Serialize};
use serde_json::json;

/// Status code carrying taxonomy errors over HTTP. A non-overloaded code so
/// a typed application error can never be mistaken for a transport failure.
pub const ERROR_HTTP_STATUS: u16 = 511;

/// Typed errors produced by the runtime. Each variant carries its full,
/// human-readable message so reconstruction from an envelope is lossless.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RuntimeError {
    /// Create was called with a name already present.
    #[error("{0}")]
    SessionExists(String),
    /// A session operation named an unknown session.
    #[error("{0}")]
    SessionDoesNotExist(String),
    /// Run was called before prompt sync completed, or after the shell died.
    #[error("{0}")]
    SessionNotInitialized(String),
    /// The static syntax pre-check rejected the command.
    #[error("{0}")]
    BashIncorrectSyntax(String),
    /// The command did not complete within its deadline.
    #[error("{message}")]
    CommandTimeout {
        message: String,
        /// The deadline that elapsed, in seconds.
        timeout: f64,
        /// True when the interrupt brought the shell back to its prompt and
        /// the session stays usable; false when the session is now failed.
        recovered: bool,
        /// Whatever sanitized output had been collected when time ran out.
        partial_output: String,
    },
    /// Non-zero exit with `check = raise`.
    #[error("{message}")]
    NonZeroExitCode {
        message: String,
        exit_code: i32,
        output: String,
    },
    /// The completion sentinel appeared but its exit-code suffix was
    /// malformed. Indicates shell corruption.
    #[error("{0}")]
    NoExitCode(String),
    /// The runtime facade was used before start completed.
    #[error("{0}")]
    DeploymentNotStarted(String),
    /// File read/write/upload failure; wraps the OS error message.
    #[error("{0}")]
    FileOp(String),
}

impl RuntimeError {
    pub fn session_exists(session: &str) -> Self {
        RuntimeError::SessionExists(format!("session {session} already exists"))
    }

    pub fn session_does_not_exist(session: &str) -> Self {
        RuntimeError::SessionDoesNotExist(format!("session {session:?} does not exist"))
    }

    /// The taxonomy name used as `error_kind` on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            RuntimeError::SessionExists(_) => "SessionExistsError",
            RuntimeError::SessionDoesNotExist(_) => "SessionDoesNotExistError",
            RuntimeError::SessionNotInitialized(_) => "SessionNotInitializedError",
            RuntimeError::BashIncorrectSyntax(_) => "BashIncorrectSyntaxError",
            RuntimeError::CommandTimeout { .. } => "CommandTimeoutError",
            RuntimeError::NonZeroExitCode { .. } => "NonZeroExitCodeError",
            RuntimeError::NoExitCode(_) => "NoExitCodeError",
            RuntimeError::DeploymentNotStarted(_) => "DeploymentNotStartedError",
            RuntimeError::FileOp(_) => "FileOpError",
        }
    }

    /// Structured payload beyond the message, for kinds that carry one.
    pub fn extra(&self) -> Option<serde_json::Value> {
        match self {
            RuntimeError::CommandTimeout {
                timeout,
                recovered,
                partial_output,
                ..
            } => Some(json!({
                "timeout": timeout,
                "recovered": recovered,
                "partial_output": partial_output,
            })),
            RuntimeError::NonZeroExitCode {
                exit_code, output, ..
            } => Some(json!({
                "exit_code": exit_code,
                "output": output,
            })),
            _ => None,
        }
    }

    pub fn to_envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            error_kind: self.kind().to_string(),
            message: self.to_string(),
            extra: self.extra(),
        }
    }

    /// Rebuild the typed error from its wire envelope. Unknown kinds fold
    /// into `FileOp` with the kind preserved in the message.
    pub fn from_envelope(envelope: &ErrorEnvelope) -> Self {
        let message = envelope.message.clone();
        let extra = envelope.extra.as_ref();
        match envelope.error_kind.as_str() {
            "SessionExistsError" => RuntimeError::SessionExists(message),
            "SessionDoesNotExistError" => RuntimeError::SessionDoesNotExist(message),
            "SessionNotInitializedError" => RuntimeError::SessionNotInitialized(message),
            "BashIncorrectSyntaxError" => RuntimeError::BashIncorrectSyntax(message),
            "CommandTimeoutError" => RuntimeError::CommandTimeout {
                message,
                timeout: extra
                    .and_then(|e| e.get("timeout"))
                    .and_then(|v| v.as_f64())
                    .unwrap_or(0.0),
                recovered: extra
                    .and_then(|e| e.get("recovered"))
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false),
                partial_output: extra
                    .and_then(|e| e.get("partial_output"))
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
            },
            "NonZeroExitCodeError" => RuntimeError::NonZeroExitCode {
                message,
                exit_code: extra
                    .and_then(|e| e.get("exit_code"))
                    .and_then(|v| v.as_i64())
                    .unwrap_or(-1) as i32,
                output: extra
                    .and_then(|e| e.get("output"))
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
            },
            "NoExitCodeError" => RuntimeError::NoExitCode(message),
            "DeploymentNotStartedError" => RuntimeError::DeploymentNotStarted(message),
            "FileOpError" => RuntimeError::FileOp(message),
            other => RuntimeError::FileOp(format!("{other}: {message}")),
        }
    }
}

/// JSON body sent with [`ERROR_HTTP_STATUS`] responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error_kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_round_trip_preserves_timeout_payload() {
        let err = RuntimeError::CommandTimeout {
            message: "timeout (2s) while running command 'sleep 30'".into(),
            timeout: 2.0,
            recovered: true,
            partial_output: "partial".into(),
        };
        let envelope = err.to_envelope();
        assert_eq!(envelope.error_kind, "CommandTimeoutError");

        let json = serde_json::to_string(&envelope).unwrap();
        let parsed: ErrorEnvelope = serde_json::from_str(&json).unwrap();
        match RuntimeError::from_envelope(&parsed) {
            RuntimeError::CommandTimeout {
                timeout,
                recovered,
                partial_output,
                ..
            } => {
                assert_eq!(timeout, 2.0);
                assert!(recovered);
                assert_eq!(partial_output, "partial");
            }
            other => panic!("unexpected reconstruction: {other:?}"),
        }
    }

    #[test]
    fn envelope_without_extra_omits_field() {
        let err = RuntimeError::session_exists("s");
        let json = serde_json::to_string(&err.to_envelope()).unwrap();
        assert!(!json.contains("extra"));
        assert!(json.contains("SessionExistsError"));
    }

    #[test]
    fn non_zero_exit_code_survives_the_wire() {
        let err = RuntimeError::NonZeroExitCode {
            message: "command 'false' failed with exit code 1".into(),
            exit_code: 1,
            output: String::new(),
        };
        let back = RuntimeError::from_envelope(&err.to_envelope());
        match back {
            RuntimeError::NonZeroExitCode { exit_code, .. } => assert_eq!(exit_code, 1),
            other => panic!("unexpected reconstruction: {other:?}"),
        }
    }

    #[test]
    fn unknown_kind_folds_into_file_op() {
        let envelope = ErrorEnvelope {
            error_kind: "SomethingNew".into(),
            message: "boom".into(),
            extra: None,
        };
        match RuntimeError::from_envelope(&envelope) {
            RuntimeError::FileOp(msg) => assert_eq!(msg, "SomethingNew: boom"),
            other => panic!("unexpected reconstruction: {other:?}"),
        }
    }
}
