//! Core engine for the sandboxed shell-execution runtime.
//!
//! Persistent PTY-backed Bash sessions, a stateless one-shot executor, and
//! file operations, all behind the [`Runtime`] facade trait the HTTP
//! surface exposes. Sessions live in memory and die with the process.

pub mod executor;
pub mod local;
pub mod pty;
pub mod registry;
pub mod sanitize;
pub mod session;
pub mod syntax;

pub use local::LocalRuntime;
pub use registry::SessionRegistry;
pub use session::BashSession;

use shellbox_api_types::{
    BashAction, BashObservation, CloseBashSessionRequest, CloseResponse, CloseSessionResponse,
    Command, CommandResponse, CreateSessionRequest, CreateSessionResponse, IsAliveResponse,
    ReadFileRequest, ReadFileResponse, RuntimeError, UploadResponse, WriteFileRequest,
    WriteFileResponse,
};

/// Every operation the control surface exposes. Implemented by
/// [`LocalRuntime`]; a remote client can implement the same trait against
/// the HTTP surface.
#[async_trait::async_trait]
pub trait Runtime: Send + Sync + 'static {
    async fn is_alive(&self) -> Result<IsAliveResponse, RuntimeError>;

    async fn create_session(
        &self,
        request: CreateSessionRequest,
    ) -> Result<CreateSessionResponse, RuntimeError>;

    async fn run_in_session(&self, action: BashAction) -> Result<BashObservation, RuntimeError>;

    async fn close_session(
        &self,
        request: CloseBashSessionRequest,
    ) -> Result<CloseSessionResponse, RuntimeError>;

    async fn execute(&self, command: Command) -> Result<CommandResponse, RuntimeError>;

    async fn read_file(&self, request: ReadFileRequest) -> Result<ReadFileResponse, RuntimeError>;

    async fn write_file(
        &self,
        request: WriteFileRequest,
    ) -> Result<WriteFileResponse, RuntimeError>;

    /// Store `data` at `target_path`, creating parents. With `unpack` the
    /// payload is treated as a (possibly gzipped) tar archive and extracted
    /// into `target_path` instead.
    async fn upload(
        &self,
        target_path: String,
        data: Vec<u8>,
        unpack: bool,
    ) -> Result<UploadResponse, RuntimeError>;

    /// Close every session. Idempotent.
    async fn close(&self) -> Result<CloseResponse, RuntimeError>;
}
