//! Interactive Bash session state machine.
//!
//! One session owns one bash child on one PTY. Commands are wrapped with
//! per-call sentinel markers whose printing doubles as the completion
//! signal; the exit code rides on the second marker. A deadline that
//! elapses triggers an interrupt and a bounded recovery read; a shell that
//! cannot be recovered (or that dies) latches the session into a failed
//! state, after which every run reports it as uninitialized.

use crate::pty::{PtyProcess, PtyRead};
use crate::sanitize;
use crate::syntax;
use portable_pty::CommandBuilder;
use shellbox_api_types::{
    BashAction, BashObservation, CreateBashSessionRequest, CreateSessionResponse, ExitCheck,
    RuntimeError,
};
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

/// Prompt strings exported into the session. Literal ASCII chosen to be
/// vanishingly unlikely in natural output; sanitization removes them.
pub const PS1: &str = "SHELLBOX-PS1>";
pub const PS2: &str = "SHELLBOX-PS2>";

/// Granularity of a single PTY read wait.
const READ_WAIT: Duration = Duration::from_millis(200);
/// How long the shell gets to come back to a prompt after an interrupt.
const RECOVERY_TIMEOUT: Duration = Duration::from_secs(3);
/// Grace for `exit` before the child is terminated forcibly.
const CLOSE_GRACE: Duration = Duration::from_secs(2);
/// Ctrl-D, sent ahead of `is_interactive_quit` actions.
const QUIT_BYTE: u8 = 0x04;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Created,
    Running,
    Failed,
    Closed,
}

enum DrainOutcome {
    /// The predicate matched; decoded buffer at that point.
    Done(String),
    /// The deadline elapsed first.
    TimedOut(String),
    /// The shell closed its side of the terminal.
    Eof(String),
}

pub struct BashSession {
    name: String,
    startup_source: Vec<String>,
    startup_timeout: Duration,
    default_timeout: Duration,
    pty: Option<PtyProcess>,
    /// Raw bytes accumulated for the command currently being read.
    buffer: Vec<u8>,
    state: SessionState,
}

impl BashSession {
    pub fn new(request: CreateBashSessionRequest) -> Self {
        Self {
            name: request.session.clone(),
            startup_source: request.startup_source,
            startup_timeout: secs(request.startup_timeout),
            default_timeout: secs(request.default_timeout),
            pty: None,
            buffer: Vec::new(),
            state: SessionState::Created,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Spawn bash, quiet the terminal, synchronize on the first prompt, and
    /// run the startup sources (each must exit 0).
    pub async fn start(&mut self) -> Result<CreateSessionResponse, RuntimeError> {
        if self.state != SessionState::Created {
            return Err(RuntimeError::SessionNotInitialized(format!(
                "session {} has already been started",
                self.name
            )));
        }

        let mut cmd = CommandBuilder::new("/bin/bash");
        cmd.args(["--norc", "--noprofile"]);
        cmd.env("TERM", "dumb");
        if let Ok(cwd) = std::env::current_dir() {
            cmd.cwd(cwd);
        }
        let pty = PtyProcess::spawn(cmd).map_err(|e| {
            RuntimeError::SessionNotInitialized(format!(
                "failed to spawn bash for session {}: {e}",
                self.name
            ))
        })?;
        debug!(session = %self.name, pid = ?pty.process_id(), "spawned bash");
        self.pty = Some(pty);
        self.state = SessionState::Running;

        // No input echo, no line editing, no history expansion, deterministic
        // prompts. The ready marker is echoed through split quoting so the
        // terminal's own echo of this line (echo is still on when it arrives)
        // cannot match it.
        let nonce = fresh_nonce();
        let ready = format!("READY:{nonce}");
        // `min 1 time 0` matters: VMIN shares its slot with VEOF, so plain
        // `-icanon` would leave reads waiting for four bytes and swallow
        // single-byte writes like the quit byte.
        let setup = format!(
            "stty -echo -icanon min 1 time 0 2>/dev/null; \
             set +o emacs +o vi +o history +H 2>/dev/null; \
             export PS1='{PS1}' PS2='{PS2}' PS0='' PROMPT_COMMAND=''; echo \"READY:\"'{nonce}'\n"
        );
        self.write(setup.as_bytes()).await?;

        let startup_timeout = self.startup_timeout;
        match self.drain_until(startup_timeout, |text| text.contains(&ready)).await {
            DrainOutcome::Done(_) => {}
            DrainOutcome::TimedOut(_) => {
                self.fail();
                return Err(RuntimeError::SessionNotInitialized(format!(
                    "timeout while initializing shell for session {}",
                    self.name
                )));
            }
            DrainOutcome::Eof(_) => {
                self.fail();
                return Err(RuntimeError::SessionNotInitialized(format!(
                    "bash exited while initializing session {}",
                    self.name
                )));
            }
        }
        match self.drain_until(startup_timeout, at_prompt).await {
            DrainOutcome::Done(_) => {}
            DrainOutcome::TimedOut(_) | DrainOutcome::Eof(_) => {
                self.fail();
                return Err(RuntimeError::SessionNotInitialized(format!(
                    "timeout while waiting for the first prompt in session {}",
                    self.name
                )));
            }
        }

        let raw = String::from(sanitize::decode_utf8_prefix(&self.buffer));
        let mut output = sanitize::sanitize_output(&raw, "", &[PS1, PS2], &[&nonce]);
        self.buffer.clear();

        for path in self.startup_source.clone() {
            let command = format!("source {path}");
            let observation = self.run_wrapped(&command, self.default_timeout).await?;
            if observation.exit_code != Some(0) {
                self.fail();
                return Err(RuntimeError::SessionNotInitialized(format!(
                    "startup source {path} exited with {:?} in session {}: {}",
                    observation.exit_code, self.name, observation.output
                )));
            }
            output.push_str(&observation.output);
        }

        debug!(session = %self.name, "session ready");
        Ok(CreateSessionResponse { output })
    }

    /// Run one action. Non-interactive commands are syntax-checked, wrapped
    /// with sentinels, and produce an exit code; interactive ones are
    /// written as-is and read until an expect string, the prompt, or the
    /// deadline.
    pub async fn run(&mut self, action: &BashAction) -> Result<BashObservation, RuntimeError> {
        if self.state != SessionState::Running || self.pty.is_none() {
            return Err(RuntimeError::SessionNotInitialized(format!(
                "session {} is not running (state: {:?})",
                self.name, self.state
            )));
        }
        if action.is_interactive_command || action.is_interactive_quit {
            return self.run_interactive(action).await;
        }

        syntax::check_bash_syntax(&action.command).await?;
        let timeout = action.timeout.map(secs).unwrap_or(self.default_timeout);
        let observation = self.run_wrapped(&action.command, timeout).await?;

        if action.check == ExitCheck::Raise && observation.exit_code != Some(0) {
            let mut message = format!(
                "command {:?} failed with exit code {:?}. Here is the output:\n{}",
                action.command, observation.exit_code, observation.output
            );
            if !action.error_msg.is_empty() {
                message = format!("{}: {message}", action.error_msg);
            }
            return Err(RuntimeError::NonZeroExitCode {
                message,
                exit_code: observation.exit_code.unwrap_or(-1),
                output: observation.output,
            });
        }
        Ok(observation)
    }

    async fn run_wrapped(
        &mut self,
        command: &str,
        timeout: Duration,
    ) -> Result<BashObservation, RuntimeError> {
        let nonce = fresh_nonce();
        let out_marker = format!("SOUT:{nonce}");
        let code_marker = format!("SCODE:{nonce}:");
        // Exit-code capture must run before the marker echoes (the echoes
        // overwrite $?). The markers are printed through split quoting so an
        // echoed copy of this line can never equal the printed marker.
        let wrapped = format!(
            "{command}\nEC=$?; echo \"SOUT:\"'{nonce}'; echo \"SCODE:\"'{nonce}'\":$EC\"\n"
        );

        self.buffer.clear();
        if let Some(pty) = self.pty.as_mut() {
            pty.discard_pending();
        }
        self.write(wrapped.as_bytes()).await?;

        match self
            .drain_until(timeout, |text| wrapped_command_done(text, &code_marker))
            .await
        {
            DrainOutcome::Done(text) => {
                let exit_code = parse_exit_code(&text, &code_marker).ok_or_else(|| {
                    RuntimeError::NoExitCode(format!(
                        "sentinel found but the exit-code suffix was malformed for command {command:?}"
                    ))
                })?;
                let raw = text.split(&out_marker).next().unwrap_or("");
                let output = sanitize::sanitize_output(raw, command, &[PS1, PS2], &[&nonce]);
                Ok(BashObservation {
                    output,
                    exit_code: Some(exit_code),
                    ..Default::default()
                })
            }
            DrainOutcome::TimedOut(_) => {
                self.recover_from_timeout(command, timeout, &out_marker, &nonce)
                    .await
            }
            DrainOutcome::Eof(_) => {
                self.fail();
                Err(RuntimeError::SessionNotInitialized(format!(
                    "bash exited unexpectedly while running {command:?} in session {}",
                    self.name
                )))
            }
        }
    }

    /// Interrupt the wedged foreground job and try to get back to a prompt.
    async fn recover_from_timeout(
        &mut self,
        command: &str,
        timeout: Duration,
        out_marker: &str,
        nonce: &str,
    ) -> Result<BashObservation, RuntimeError> {
        warn!(session = %self.name, command, "command deadline elapsed; interrupting");
        if let Some(pty) = self.pty.as_ref() {
            let _ = pty.interrupt().await;
        }
        let outcome = self.drain_until(RECOVERY_TIMEOUT, at_prompt).await;

        let text = match &outcome {
            DrainOutcome::Done(t) | DrainOutcome::TimedOut(t) | DrainOutcome::Eof(t) => t.clone(),
        };
        // The command may have finished in the window between deadline and
        // interrupt; partial output still stops at the marker.
        let raw = text.split(out_marker).next().unwrap_or("");
        let partial_output = sanitize::sanitize_output(raw, command, &[PS1, PS2], &[nonce]);
        let message = format!(
            "timeout ({}s) while running command {command:?}",
            timeout.as_secs_f64()
        );

        match outcome {
            DrainOutcome::Done(_) => {
                debug!(session = %self.name, "shell recovered after interrupt");
                Err(RuntimeError::CommandTimeout {
                    message,
                    timeout: timeout.as_secs_f64(),
                    recovered: true,
                    partial_output,
                })
            }
            DrainOutcome::TimedOut(_) | DrainOutcome::Eof(_) => {
                warn!(session = %self.name, "shell did not recover; terminating");
                self.fail();
                if let Some(mut pty) = self.pty.take() {
                    pty.terminate().await;
                }
                Err(RuntimeError::CommandTimeout {
                    message: format!("{message}; the shell did not return to its prompt"),
                    timeout: timeout.as_secs_f64(),
                    recovered: false,
                    partial_output,
                })
            }
        }
    }

    /// Drive an interactive program: no sentinel wrapping, no exit code.
    /// Reads until an expect string or the prompt shows up, or the deadline
    /// passes — whatever is present is returned either way.
    async fn run_interactive(
        &mut self,
        action: &BashAction,
    ) -> Result<BashObservation, RuntimeError> {
        let timeout = action.timeout.map(secs).unwrap_or(self.default_timeout);
        self.buffer.clear();
        if let Some(pty) = self.pty.as_mut() {
            pty.discard_pending();
        }

        if action.is_interactive_quit {
            self.write(&[QUIT_BYTE]).await?;
        }
        let quit_only = action.is_interactive_quit && action.command.is_empty();
        if !quit_only {
            let mut line = action.command.clone().into_bytes();
            line.push(b'\n');
            self.write(&line).await?;
        }

        let expect = &action.expect;
        let mut matched = String::new();
        let outcome = self
            .drain_until(timeout, |text| {
                let clean =
                    sanitize::strip_control_sequences(&sanitize::normalize_newlines(text));
                if let Some(hit) = expect.iter().find(|e| clean.contains(e.as_str())) {
                    matched = hit.clone();
                    return true;
                }
                clean.trim_end().ends_with(PS1)
            })
            .await;

        let text = match outcome {
            DrainOutcome::Done(t) | DrainOutcome::TimedOut(t) => t,
            DrainOutcome::Eof(_) => {
                self.fail();
                return Err(RuntimeError::SessionNotInitialized(format!(
                    "bash exited during an interactive command in session {}",
                    self.name
                )));
            }
        };

        // Interactive programs frequently re-enable echo; trim the edges the
        // way a human reads a REPL transcript.
        let clean = sanitize::strip_control_sequences(&sanitize::normalize_newlines(&text));
        let without_prompts = sanitize::strip_prompts(&clean, &[PS1, PS2]);
        let output = sanitize::strip_echoed_command(&without_prompts, &action.command)
            .trim()
            .to_string();

        Ok(BashObservation {
            output,
            exit_code: None,
            expect_string: matched,
            ..Default::default()
        })
    }

    /// Ask the shell to exit, then force the issue if it lingers. Idempotent
    /// at this level; the registry decides what a second close means.
    pub async fn close(&mut self) -> Result<(), RuntimeError> {
        if self.state == SessionState::Closed {
            return Ok(());
        }
        self.state = SessionState::Closed;
        let Some(mut pty) = self.pty.take() else {
            return Ok(());
        };
        let _ = pty.write(b"exit\n").await;
        if pty.wait_exit(CLOSE_GRACE).await {
            debug!(session = %self.name, "shell exited cleanly");
        } else {
            warn!(session = %self.name, "shell ignored exit; terminating");
        }
        pty.terminate().await;
        Ok(())
    }

    fn fail(&mut self) {
        if self.state == SessionState::Running {
            self.state = SessionState::Failed;
        }
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<(), RuntimeError> {
        let result = match self.pty.as_ref() {
            Some(pty) => pty.write(bytes).await,
            None => {
                return Err(RuntimeError::SessionNotInitialized(format!(
                    "session {} has no shell attached",
                    self.name
                )))
            }
        };
        if let Err(e) = result {
            self.fail();
            return Err(RuntimeError::SessionNotInitialized(format!(
                "failed to write to session {}: {e}",
                self.name
            )));
        }
        Ok(())
    }

    /// Accumulate PTY output until `done` is satisfied, the deadline lapses,
    /// or the shell goes away. The predicate sees the decoded buffer after
    /// every chunk.
    async fn drain_until<F>(&mut self, deadline: Duration, mut done: F) -> DrainOutcome
    where
        F: FnMut(&str) -> bool,
    {
        let start = Instant::now();
        loop {
            let text = String::from(sanitize::decode_utf8_prefix(&self.buffer));
            if done(&text) {
                return DrainOutcome::Done(text);
            }
            let elapsed = start.elapsed();
            if elapsed >= deadline {
                return DrainOutcome::TimedOut(text);
            }
            let wait = READ_WAIT.min(deadline - elapsed);
            let Some(pty) = self.pty.as_mut() else {
                return DrainOutcome::Eof(text);
            };
            match pty.read_chunk(wait).await {
                PtyRead::Data(bytes) => self.buffer.extend_from_slice(&bytes),
                PtyRead::Timeout => {}
                PtyRead::Eof => {
                    return DrainOutcome::Eof(String::from(sanitize::decode_utf8_prefix(
                        &self.buffer,
                    )))
                }
            }
        }
    }
}

/// The prompt at the (cleaned) tail of the stream is the idle state.
fn at_prompt(text: &str) -> bool {
    sanitize::strip_control_sequences(&sanitize::normalize_newlines(text))
        .trim_end()
        .ends_with(PS1)
}

/// A wrapped command is done once the exit-code marker line is complete and
/// the shell is back at its prompt.
fn wrapped_command_done(text: &str, code_marker: &str) -> bool {
    let Some(pos) = text.find(code_marker) else {
        return false;
    };
    let rest = &text[pos + code_marker.len()..];
    let digit_end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    if digit_end == rest.len() {
        // the number may still be streaming in
        return false;
    }
    at_prompt(text)
}

fn parse_exit_code(text: &str, code_marker: &str) -> Option<i32> {
    let pos = text.find(code_marker)?;
    let rest = &text[pos + code_marker.len()..];
    let digit_end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    rest[..digit_end].parse().ok()
}

fn fresh_nonce() -> String {
    Uuid::new_v4().simple().to_string()
}

fn secs(value: f64) -> Duration {
    if value.is_finite() && value > 0.0 {
        Duration::from_secs_f64(value)
    } else {
        Duration::ZERO
    }
}
