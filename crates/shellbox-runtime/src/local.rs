//! The local runtime: the facade implementation that actually owns shells
//! and touches the filesystem.

use crate::executor;
use crate::registry::SessionRegistry;
use crate::Runtime;
use shellbox_api_types::{
    BashAction, BashObservation, CloseBashSessionRequest, CloseResponse, CloseSessionResponse,
    Command, CommandResponse, CreateSessionRequest, CreateSessionResponse, IsAliveResponse,
    ReadFileRequest, ReadFileResponse, RuntimeError, UploadResponse, WriteFileRequest,
    WriteFileResponse,
};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Default)]
pub struct LocalRuntime {
    registry: Arc<SessionRegistry>,
}

impl LocalRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }
}

/// Run `fut` on a detached task. Handler futures die with their connection;
/// a command that has been dispatched must run to completion or timeout, so
/// the work is decoupled from the caller that requested it.
async fn detached<T, F>(fut: F) -> Result<T, RuntimeError>
where
    T: Send + 'static,
    F: Future<Output = Result<T, RuntimeError>> + Send + 'static,
{
    tokio::spawn(fut)
        .await
        .map_err(|e| RuntimeError::SessionNotInitialized(format!("runtime task failed: {e}")))?
}

#[async_trait::async_trait]
impl Runtime for LocalRuntime {
    async fn is_alive(&self) -> Result<IsAliveResponse, RuntimeError> {
        // Reachability is the proof.
        Ok(IsAliveResponse::default())
    }

    async fn create_session(
        &self,
        request: CreateSessionRequest,
    ) -> Result<CreateSessionResponse, RuntimeError> {
        match request {
            CreateSessionRequest::Bash(request) => {
                info!(session = %request.session, "creating bash session");
                let registry = Arc::clone(&self.registry);
                detached(async move { registry.create(request).await }).await
            }
        }
    }

    async fn run_in_session(&self, action: BashAction) -> Result<BashObservation, RuntimeError> {
        let handle = self.registry.get(&action.session)?;
        detached(async move {
            let mut session = handle.lock().await;
            session.run(&action).await
        })
        .await
    }

    async fn close_session(
        &self,
        request: CloseBashSessionRequest,
    ) -> Result<CloseSessionResponse, RuntimeError> {
        let registry = Arc::clone(&self.registry);
        detached(async move {
            registry.remove(&request.session).await?;
            Ok(CloseSessionResponse {})
        })
        .await
    }

    async fn execute(&self, command: Command) -> Result<CommandResponse, RuntimeError> {
        detached(async move { Ok(executor::execute(&command).await) }).await
    }

    async fn read_file(&self, request: ReadFileRequest) -> Result<ReadFileResponse, RuntimeError> {
        let content = tokio::fs::read_to_string(&request.path)
            .await
            .map_err(|e| RuntimeError::FileOp(format!("failed to read {}: {e}", request.path)))?;
        Ok(ReadFileResponse { content })
    }

    async fn write_file(
        &self,
        request: WriteFileRequest,
    ) -> Result<WriteFileResponse, RuntimeError> {
        let path = Path::new(&request.path);
        ensure_parent_dirs(path).await?;
        tokio::fs::write(path, &request.content)
            .await
            .map_err(|e| RuntimeError::FileOp(format!("failed to write {}: {e}", request.path)))?;
        Ok(WriteFileResponse {})
    }

    async fn upload(
        &self,
        target_path: String,
        data: Vec<u8>,
        unpack: bool,
    ) -> Result<UploadResponse, RuntimeError> {
        let target = PathBuf::from(&target_path);
        let byte_len = data.len();
        if unpack {
            tokio::fs::create_dir_all(&target).await.map_err(|e| {
                RuntimeError::FileOp(format!("failed to create {target_path}: {e}"))
            })?;
            tokio::task::spawn_blocking(move || unpack_archive(&data, &target))
                .await
                .map_err(|e| RuntimeError::FileOp(format!("archive task failed: {e}")))??;
        } else {
            ensure_parent_dirs(&target).await?;
            tokio::fs::write(&target, &data).await.map_err(|e| {
                RuntimeError::FileOp(format!("failed to write {target_path}: {e}"))
            })?;
        }
        info!(target = %target_path, unpack, bytes = byte_len, "upload complete");
        Ok(UploadResponse {})
    }

    async fn close(&self) -> Result<CloseResponse, RuntimeError> {
        let registry = Arc::clone(&self.registry);
        detached(async move {
            registry.close_all().await;
            Ok(CloseResponse {})
        })
        .await
    }
}

async fn ensure_parent_dirs(path: &Path) -> Result<(), RuntimeError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                RuntimeError::FileOp(format!("failed to create {}: {e}", parent.display()))
            })?;
        }
    }
    Ok(())
}

/// Unpack a tar (optionally gzipped, detected by magic bytes) into `target`.
fn unpack_archive(data: &[u8], target: &Path) -> Result<(), RuntimeError> {
    let result = if data.starts_with(&[0x1f, 0x8b]) {
        tar::Archive::new(flate2::read::GzDecoder::new(data)).unpack(target)
    } else {
        tar::Archive::new(data).unpack(target)
    };
    result.map_err(|e| {
        RuntimeError::FileOp(format!(
            "failed to unpack archive into {}: {e}",
            target.display()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = LocalRuntime::new();
        let path = dir.path().join("nested/deeper/f.txt");

        runtime
            .write_file(WriteFileRequest {
                path: path.display().to_string(),
                content: "payload".to_string(),
            })
            .await
            .unwrap();

        let read = runtime
            .read_file(ReadFileRequest {
                path: path.display().to_string(),
            })
            .await
            .unwrap();
        assert_eq!(read.content, "payload");
    }

    #[tokio::test]
    async fn write_file_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = LocalRuntime::new();
        let path = dir.path().join("f.txt").display().to_string();

        for content in ["first", "second"] {
            runtime
                .write_file(WriteFileRequest {
                    path: path.clone(),
                    content: content.to_string(),
                })
                .await
                .unwrap();
        }
        let read = runtime
            .read_file(ReadFileRequest { path })
            .await
            .unwrap();
        assert_eq!(read.content, "second");
    }

    #[tokio::test]
    async fn read_missing_file_is_a_file_op_error() {
        let runtime = LocalRuntime::new();
        let err = runtime
            .read_file(ReadFileRequest {
                path: "/definitely/not/here".to_string(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "FileOpError");
    }

    #[tokio::test]
    async fn plain_upload_writes_bytes_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = LocalRuntime::new();
        let target = dir.path().join("up/loaded.bin");
        let payload: Vec<u8> = (0..=255u8).cycle().take(1024).collect();

        runtime
            .upload(target.display().to_string(), payload.clone(), false)
            .await
            .unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), payload);
    }

    #[tokio::test]
    async fn archive_upload_unpacks_into_target() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = LocalRuntime::new();

        let mut builder = tar::Builder::new(Vec::new());
        let body = b"from the archive";
        let mut header = tar::Header::new_gnu();
        header.set_path("inner/file.txt").unwrap();
        header.set_size(body.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append(&header, body.as_slice()).unwrap();
        let archive = builder.into_inner().unwrap();

        let target = dir.path().join("extracted");
        runtime
            .upload(target.display().to_string(), archive, true)
            .await
            .unwrap();
        assert_eq!(
            std::fs::read_to_string(target.join("inner/file.txt")).unwrap(),
            "from the archive"
        );
    }
}
