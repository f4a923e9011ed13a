//! Static pre-flight syntax check for session commands.
//!
//! An interactive shell that receives an incomplete command (open quote,
//! open heredoc, trailing pipe) drops into its continuation prompt and
//! blocks everything that follows. Commands are therefore parsed by
//! `bash -n` in a throwaway process before they ever reach a session.
//!
//! Two gaps `bash -n` leaves open are closed explicitly: an open heredoc
//! only produces a warning, and a trailing line continuation is silently
//! completed at EOF. The check is conservative on purpose.

use shellbox_api_types::RuntimeError;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

pub async fn check_bash_syntax(command: &str) -> Result<(), RuntimeError> {
    if ends_in_line_continuation(command) {
        return Err(RuntimeError::BashIncorrectSyntax(format!(
            "command {command:?} ends in a line continuation"
        )));
    }

    let mut child = Command::new("/bin/bash")
        .arg("-n")
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| {
            RuntimeError::BashIncorrectSyntax(format!("failed to spawn bash -n: {e}"))
        })?;

    if let Some(mut stdin) = child.stdin.take() {
        let mut payload = command.as_bytes().to_vec();
        payload.push(b'\n');
        let _ = stdin.write_all(&payload).await;
        let _ = stdin.shutdown().await;
    }

    let output = child.wait_with_output().await.map_err(|e| {
        RuntimeError::BashIncorrectSyntax(format!("failed to run bash -n: {e}"))
    })?;
    let stderr = String::from_utf8_lossy(&output.stderr);

    if !output.status.success() {
        return Err(RuntimeError::BashIncorrectSyntax(format!(
            "syntax check failed (exit {:?}) for command {:?}\n---- stderr ----\n{}",
            output.status.code(),
            command,
            stderr.trim_end()
        )));
    }
    if stderr.contains("delimited by end-of-file") {
        return Err(RuntimeError::BashIncorrectSyntax(format!(
            "command {command:?} ends in an open heredoc"
        )));
    }
    Ok(())
}

/// True when the command ends with an odd number of backslashes, i.e. a
/// continuation waiting for another line.
fn ends_in_line_continuation(command: &str) -> bool {
    let trailing = command
        .trim_end()
        .chars()
        .rev()
        .take_while(|&c| c == '\\')
        .count();
    trailing % 2 == 1
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn rejected(command: &str) -> bool {
        matches!(
            check_bash_syntax(command).await,
            Err(RuntimeError::BashIncorrectSyntax(_))
        )
    }

    #[tokio::test]
    async fn complete_commands_pass() {
        assert!(check_bash_syntax("echo hello").await.is_ok());
        assert!(check_bash_syntax("x=1; echo \"$x\" | wc -c").await.is_ok());
        assert!(check_bash_syntax("").await.is_ok());
        assert!(check_bash_syntax("# just a comment").await.is_ok());
    }

    #[tokio::test]
    async fn terminated_heredoc_passes() {
        assert!(
            check_bash_syntax("cat <<EOF\nline1\nline2\nEOF").await.is_ok()
        );
    }

    #[tokio::test]
    async fn open_quote_is_rejected() {
        assert!(rejected("echo \"unterminated").await);
        assert!(rejected("echo 'unterminated").await);
    }

    #[tokio::test]
    async fn open_heredoc_is_rejected() {
        assert!(rejected("cat <<EOF\nline1").await);
    }

    #[tokio::test]
    async fn dangling_operators_are_rejected() {
        assert!(rejected("echo hi |").await);
        assert!(rejected("true &&").await);
        assert!(rejected("false ||").await);
    }

    #[tokio::test]
    async fn unterminated_substitution_is_rejected() {
        assert!(rejected("echo $(date").await);
        assert!(rejected("cat <(echo hi").await);
    }

    #[tokio::test]
    async fn line_continuation_is_rejected() {
        assert!(rejected("echo hi \\").await);
        assert!(rejected("echo hi \\\n").await);
    }

    #[tokio::test]
    async fn escaped_backslash_is_not_a_continuation() {
        assert!(check_bash_syntax("echo hi \\\\").await.is_ok());
    }

    #[test]
    fn continuation_detection_counts_backslashes() {
        assert!(ends_in_line_continuation("echo \\"));
        assert!(!ends_in_line_continuation("echo \\\\"));
        assert!(ends_in_line_continuation("echo \\\\\\"));
        assert!(!ends_in_line_continuation("echo hi"));
    }
}
