//! One-shot command execution, independent of any session.
//!
//! Runs the command in a fresh child with captured stdout/stderr. Non-zero
//! exits are reported in the response, never raised. A timeout kills the
//! whole process group and returns whatever had been captured by then with
//! `success = false` and no exit code.

use shellbox_api_types::{Command as CommandRequest, CommandResponse, CommandSpec};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::warn;

pub async fn execute(request: &CommandRequest) -> CommandResponse {
    let mut cmd = match build_command(request) {
        Ok(cmd) => cmd,
        Err(message) => {
            return CommandResponse {
                stderr: message,
                ..Default::default()
            }
        }
    };
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.stdin(if request.stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    });
    // Fresh process group so a timeout can take down the whole tree.
    #[cfg(unix)]
    unsafe {
        cmd.pre_exec(|| {
            libc::setpgid(0, 0);
            Ok(())
        });
    }

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            return CommandResponse {
                stderr: format!("failed to spawn command: {e}"),
                ..Default::default()
            }
        }
    };
    let pid = child.id();

    if let Some(data) = request.stdin.clone() {
        if let Some(mut stdin) = child.stdin.take() {
            tokio::spawn(async move {
                let _ = stdin.write_all(data.as_bytes()).await;
            });
        }
    }

    let stdout_task = tokio::spawn(read_all(child.stdout.take()));
    let stderr_task = tokio::spawn(read_all(child.stderr.take()));

    let status = match request.timeout.filter(|t| t.is_finite() && *t > 0.0) {
        Some(secs) => {
            match tokio::time::timeout(Duration::from_secs_f64(secs), child.wait()).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(?pid, timeout = secs, "one-shot deadline elapsed; killing process group");
                    kill_group(pid);
                    let _ = child.wait().await;
                    return CommandResponse {
                        stdout: stdout_task.await.unwrap_or_default(),
                        stderr: stderr_task.await.unwrap_or_default(),
                        exit_code: None,
                        success: false,
                    };
                }
            }
        }
        None => child.wait().await,
    };

    let stdout = stdout_task.await.unwrap_or_default();
    let stderr = stderr_task.await.unwrap_or_default();
    match status {
        Ok(status) => {
            let exit_code = status.code();
            CommandResponse {
                stdout,
                stderr,
                exit_code,
                success: exit_code == Some(0),
            }
        }
        Err(e) => CommandResponse {
            stdout,
            stderr: format!("{stderr}\nfailed to wait for command: {e}"),
            exit_code: None,
            success: false,
        },
    }
}

fn build_command(request: &CommandRequest) -> Result<Command, String> {
    let mut cmd = match &request.command {
        // A bare string always goes through the shell; the flag exists for
        // wire compatibility and for forcing argv vectors through `sh -c`.
        CommandSpec::Shell(script) => {
            let mut c = Command::new("/bin/sh");
            c.arg("-c").arg(script);
            c
        }
        CommandSpec::Argv(argv) if request.shell => {
            let mut c = Command::new("/bin/sh");
            c.arg("-c").arg(argv.join(" "));
            c
        }
        CommandSpec::Argv(argv) => {
            let Some((program, args)) = argv.split_first() else {
                return Err("empty argv".to_string());
            };
            let mut c = Command::new(program);
            c.args(args);
            c
        }
    };
    if let Some(env) = &request.env {
        cmd.env_clear();
        cmd.envs(env);
    }
    if let Some(cwd) = &request.cwd {
        cmd.current_dir(cwd);
    }
    Ok(cmd)
}

async fn read_all<R>(pipe: Option<R>) -> String
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let Some(mut pipe) = pipe else {
        return String::new();
    };
    let mut buf = Vec::new();
    let _ = pipe.read_to_end(&mut buf).await;
    String::from_utf8_lossy(&buf).into_owned()
}

#[cfg(unix)]
fn kill_group(pid: Option<u32>) {
    if let Some(pid) = pid {
        unsafe {
            libc::killpg(pid as libc::pid_t, libc::SIGKILL);
        }
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: Option<u32>) {}

#[cfg(test)]
mod tests {
    use super::*;
    use shellbox_api_types::Command as CommandRequest;
    use std::collections::HashMap;

    #[tokio::test]
    async fn argv_command_captures_stdout() {
        let response = execute(&CommandRequest::argv(["echo", "hello"])).await;
        assert_eq!(response.stdout, "hello\n");
        assert_eq!(response.exit_code, Some(0));
        assert!(response.success);
    }

    #[tokio::test]
    async fn shell_command_supports_pipelines() {
        let response = execute(&CommandRequest::shell("printf 'a\\nb\\n' | wc -l")).await;
        assert_eq!(response.stdout.trim(), "2");
        assert!(response.success);
    }

    #[tokio::test]
    async fn stderr_is_captured_separately() {
        let response = execute(&CommandRequest::shell("echo out; echo err >&2")).await;
        assert_eq!(response.stdout, "out\n");
        assert_eq!(response.stderr, "err\n");
    }

    #[tokio::test]
    async fn non_zero_exit_is_reported_not_raised() {
        let response = execute(&CommandRequest::argv(["false"])).await;
        assert_eq!(response.exit_code, Some(1));
        assert!(!response.success);
    }

    #[tokio::test]
    async fn stdin_is_fed_to_the_child() {
        let mut request = CommandRequest::argv(["cat"]);
        request.stdin = Some("fed through stdin".to_string());
        let response = execute(&request).await;
        assert_eq!(response.stdout, "fed through stdin");
    }

    #[tokio::test]
    async fn timeout_kills_the_process_group() {
        let mut request = CommandRequest::shell("echo started; sleep 30");
        request.timeout = Some(0.5);
        let started = std::time::Instant::now();
        let response = execute(&request).await;
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(response.exit_code, None);
        assert!(!response.success);
        assert_eq!(response.stdout, "started\n", "partial output is kept");
    }

    #[tokio::test]
    async fn env_replaces_the_inherited_environment() {
        let mut request = CommandRequest::shell("echo \"${MARKER:-unset}:${PATH:+haspath}\"");
        let mut env = HashMap::new();
        env.insert("MARKER".to_string(), "present".to_string());
        request.env = Some(env);
        let response = execute(&request).await;
        assert_eq!(response.stdout, "present:\n");
    }

    #[tokio::test]
    async fn cwd_is_honored() {
        let dir = tempfile::tempdir().unwrap();
        let mut request = CommandRequest::argv(["pwd"]);
        request.cwd = Some(dir.path().display().to_string());
        let response = execute(&request).await;
        let reported = std::path::PathBuf::from(response.stdout.trim());
        assert_eq!(
            reported.canonicalize().unwrap(),
            dir.path().canonicalize().unwrap()
        );
    }

    #[tokio::test]
    async fn empty_argv_is_an_error_response() {
        let response = execute(&CommandRequest::argv(Vec::<String>::new())).await;
        assert!(!response.success);
        assert!(response.stderr.contains("empty argv"));
    }
}
