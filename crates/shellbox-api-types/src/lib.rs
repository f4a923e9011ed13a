//! Shared request/response models for the shellbox runtime API.
//!
//! Everything that crosses the HTTP boundary lives here so the server and
//! any client reconstruct the exact same shapes. Session-typed requests are
//! internally tagged on `session_type` so further session kinds can extend
//! the wire format without breaking existing callers.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub mod error;

pub use error::{ErrorEnvelope, RuntimeError, ERROR_HTTP_STATUS};

fn default_session() -> String {
    "default".to_string()
}

fn default_startup_timeout() -> f64 {
    1.0
}

fn default_command_timeout() -> f64 {
    30.0
}

fn bash_session_type() -> String {
    "bash".to_string()
}

/// Liveness probe result. `is_alive` is unconditionally true when the
/// process answered; `message` carries diagnostics for the false case a
/// client synthesizes on connection failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsAliveResponse {
    pub is_alive: bool,
    #[serde(default)]
    pub message: String,
}

impl Default for IsAliveResponse {
    fn default() -> Self {
        Self {
            is_alive: true,
            message: String::new(),
        }
    }
}

/// Request to create a new session, discriminated by session type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "session_type", rename_all = "snake_case")]
pub enum CreateSessionRequest {
    Bash(CreateBashSessionRequest),
}

impl CreateSessionRequest {
    pub fn session(&self) -> &str {
        match self {
            CreateSessionRequest::Bash(req) => &req.session,
        }
    }
}

/// Parameters for a new interactive Bash session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateBashSessionRequest {
    /// Caller-chosen name, unique within the runtime.
    #[serde(default = "default_session")]
    pub session: String,
    /// Files to `source` (and verify exit 0) right after the shell reaches
    /// its first prompt. These often overwrite PS1, so they run before the
    /// prompt export.
    #[serde(default)]
    pub startup_source: Vec<String>,
    /// Seconds to wait for each startup step (spawn, prompt sync).
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout: f64,
    /// Default per-command timeout in seconds, used when an action carries
    /// no timeout of its own.
    #[serde(default = "default_command_timeout")]
    pub default_timeout: f64,
}

impl Default for CreateBashSessionRequest {
    fn default() -> Self {
        Self {
            session: default_session(),
            startup_source: Vec::new(),
            startup_timeout: default_startup_timeout(),
            default_timeout: default_command_timeout(),
        }
    }
}

/// Startup output (shell banner plus startup-source output).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateSessionResponse {
    #[serde(default)]
    pub output: String,
}

/// Whether a non-zero exit code raises or is reported silently.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitCheck {
    #[default]
    Silent,
    Raise,
}

/// A command to run inside an existing Bash session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BashAction {
    /// May be multi-line and may contain heredocs and quoting.
    pub command: String,
    #[serde(default = "default_session")]
    pub session: String,
    /// Seconds; falls back to the session default when absent.
    #[serde(default)]
    pub timeout: Option<f64>,
    /// True for commands driving an interactive program (a REPL, gdb, …):
    /// no sentinel wrapping and no exit-code retrieval.
    #[serde(default)]
    pub is_interactive_command: bool,
    /// Send the quit byte (Ctrl-D) before the command; with an empty
    /// command only the quit byte is written.
    #[serde(default)]
    pub is_interactive_quit: bool,
    #[serde(default)]
    pub check: ExitCheck,
    /// Strings besides the prompt that end an interactive read.
    #[serde(default)]
    pub expect: Vec<String>,
    /// Optional prefix for the non-zero-exit error message.
    #[serde(default)]
    pub error_msg: String,
}

impl BashAction {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            session: default_session(),
            timeout: None,
            is_interactive_command: false,
            is_interactive_quit: false,
            check: ExitCheck::Silent,
            expect: Vec::new(),
            error_msg: String::new(),
        }
    }
}

/// Result of a session command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BashObservation {
    /// Sanitized output: no prompts, no sentinel lines, no echoed command.
    #[serde(default)]
    pub output: String,
    /// Populated only for non-interactive commands that returned to the
    /// prompt within the deadline.
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub failure_reason: String,
    /// Which `expect` string terminated an interactive read; empty when the
    /// prompt (or the deadline) did.
    #[serde(default)]
    pub expect_string: String,
    #[serde(default = "bash_session_type")]
    pub session_type: String,
}

impl Default for BashObservation {
    fn default() -> Self {
        Self {
            output: String::new(),
            exit_code: None,
            failure_reason: String::new(),
            expect_string: String::new(),
            session_type: bash_session_type(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseBashSessionRequest {
    #[serde(default = "default_session")]
    pub session: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CloseSessionResponse {}

/// One-shot command payload: either an argv vector run directly, or a
/// single string handed to `sh -c` when `shell` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandSpec {
    Shell(String),
    Argv(Vec<String>),
}

/// A command executed in a fresh child process, independent of sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub command: CommandSpec,
    #[serde(default)]
    pub shell: bool,
    /// Replaces the inherited environment entirely when present.
    #[serde(default)]
    pub env: Option<HashMap<String, String>>,
    #[serde(default)]
    pub cwd: Option<String>,
    /// Seconds; on expiry the process group is killed and the partial
    /// buffers collected so far are returned.
    #[serde(default)]
    pub timeout: Option<f64>,
    /// Written to the child's stdin before it is closed.
    #[serde(default)]
    pub stdin: Option<String>,
}

impl Command {
    pub fn shell(command: impl Into<String>) -> Self {
        Self {
            command: CommandSpec::Shell(command.into()),
            shell: true,
            env: None,
            cwd: None,
            timeout: None,
            stdin: None,
        }
    }

    pub fn argv<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: CommandSpec::Argv(argv.into_iter().map(Into::into).collect()),
            shell: false,
            env: None,
            cwd: None,
            timeout: None,
            stdin: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandResponse {
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    /// None when the command was killed (timeout or signal).
    #[serde(default)]
    pub exit_code: Option<i32>,
    /// `exit_code == 0`; false on cancellation.
    #[serde(default)]
    pub success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadFileRequest {
    pub path: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReadFileResponse {
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteFileRequest {
    pub content: String,
    pub path: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WriteFileResponse {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadResponse {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CloseResponse {}
