//! A child process attached to a pseudo-terminal, with chunked non-blocking
//! reads and offloaded writes.
//!
//! A background thread pumps the PTY master into an async channel so the
//! session layer can poll for output with a small wait without ever parking
//! an executor thread on a blocking `read`. The child's EOF surfaces as a
//! distinguished read result so callers can tell "no output yet" from "the
//! process is gone".

use anyhow::{Context, Result};
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use std::io::{Read, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

const READ_CHUNK: usize = 8192;

/// Outcome of a single read attempt against the PTY output stream.
#[derive(Debug)]
pub enum PtyRead {
    /// Bytes that were buffered, or arrived within the wait window. May end
    /// mid-UTF-8-sequence; callers accumulate raw bytes.
    Data(Vec<u8>),
    /// Nothing arrived within the wait window.
    Timeout,
    /// The child closed its side of the terminal; it has exited.
    Eof,
}

pub struct PtyProcess {
    master: Box<dyn MasterPty + Send>,
    child: Box<dyn Child + Send + Sync>,
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
    output: mpsc::UnboundedReceiver<Vec<u8>>,
    eof_seen: bool,
}

// `master` is held only to keep the pty's master fd alive for the process's
// lifetime; it is never read through a shared reference, so concurrent
// access to `&PtyProcess` from multiple threads (required for spawning
// handler work onto the executor) cannot race on it.
unsafe impl Sync for PtyProcess {}

impl PtyProcess {
    /// Spawn `cmd` with stdin/stdout/stderr tied to the slave side of a
    /// fresh PTY. A wide window keeps long lines from wrapping into the
    /// output stream.
    pub fn spawn(cmd: CommandBuilder) -> Result<Self> {
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: 24,
                cols: 250,
                pixel_width: 0,
                pixel_height: 0,
            })
            .context("failed to open pty")?;

        let child = pair
            .slave
            .spawn_command(cmd)
            .context("failed to spawn child on pty")?;
        drop(pair.slave);

        let mut reader = pair
            .master
            .try_clone_reader()
            .context("failed to clone pty reader")?;
        let writer = pair
            .master
            .take_writer()
            .context("failed to take pty writer")?;

        let (tx, rx) = mpsc::unbounded_channel();
        std::thread::spawn(move || {
            let mut buf = [0u8; READ_CHUNK];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if tx.send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    // EIO when the slave side goes away on Linux
                    Err(_) => break,
                }
            }
        });

        Ok(Self {
            master: pair.master,
            child,
            writer: Arc::new(Mutex::new(writer)),
            output: rx,
            eof_seen: false,
        })
    }

    pub fn process_id(&self) -> Option<u32> {
        self.child.process_id()
    }

    /// Write bytes to the child's terminal. Writes are small, but they go
    /// through the blocking pool so a full kernel buffer cannot stall the
    /// executor.
    pub async fn write(&self, bytes: &[u8]) -> Result<()> {
        let writer = Arc::clone(&self.writer);
        let bytes = bytes.to_vec();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut writer = writer.lock().unwrap();
            writer.write_all(&bytes)?;
            writer.flush()?;
            Ok(())
        })
        .await
        .context("pty write task failed")?
    }

    /// Return whatever output is currently buffered; if none, wait up to
    /// `wait` for the next chunk.
    pub async fn read_chunk(&mut self, wait: Duration) -> PtyRead {
        if self.eof_seen {
            return PtyRead::Eof;
        }
        match self.output.try_recv() {
            Ok(data) => PtyRead::Data(data),
            Err(TryRecvError::Empty) => match tokio::time::timeout(wait, self.output.recv()).await {
                Ok(Some(data)) => PtyRead::Data(data),
                Ok(None) => {
                    self.eof_seen = true;
                    PtyRead::Eof
                }
                Err(_) => PtyRead::Timeout,
            },
            Err(TryRecvError::Disconnected) => {
                self.eof_seen = true;
                PtyRead::Eof
            }
        }
    }

    /// Discard everything currently buffered without waiting.
    pub fn discard_pending(&mut self) {
        while self.output.try_recv().is_ok() {}
    }

    /// Interrupt the foreground job. ETX through the line discipline reaches
    /// the foreground process group; a signal aimed at the shell pid would
    /// miss the running command, which job control puts in its own group.
    pub async fn interrupt(&self) -> Result<()> {
        self.write(&[0x03]).await
    }

    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Poll for child exit for up to `grace`, reaping it on success.
    pub async fn wait_exit(&mut self, grace: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + grace;
        loop {
            match self.child.try_wait() {
                Ok(Some(_)) => return true,
                Err(_) => return true,
                Ok(None) => {}
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Best-effort shutdown: SIGTERM, a short grace window, then SIGKILL and
    /// a reap. Dropping the process afterwards hangs up the line for
    /// anything still attached.
    pub async fn terminate(&mut self) {
        #[cfg(unix)]
        if let Some(pid) = self.child.process_id() {
            unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
        }
        if self.wait_exit(Duration::from_secs(1)).await {
            return;
        }
        let _ = self.child.kill();
        // SIGKILL takes effect within a scheduler tick; reap shortly after
        let _ = self.wait_exit(Duration::from_millis(500)).await;
    }
}

impl Drop for PtyProcess {
    fn drop(&mut self) {
        // last line of defense against orphaned shells and zombies
        let _ = self.child.kill();
        let _ = self.child.try_wait();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> CommandBuilder {
        let mut cmd = CommandBuilder::new("/bin/sh");
        cmd.args(["-c", script]);
        cmd
    }

    #[tokio::test]
    async fn captures_child_output() {
        let mut pty = PtyProcess::spawn(sh("printf hello")).unwrap();
        let mut collected = Vec::new();
        for _ in 0..20 {
            match pty.read_chunk(Duration::from_millis(200)).await {
                PtyRead::Data(data) => collected.extend_from_slice(&data),
                PtyRead::Timeout => continue,
                PtyRead::Eof => break,
            }
        }
        assert!(String::from_utf8_lossy(&collected).contains("hello"));
        pty.terminate().await;
    }

    #[tokio::test]
    async fn eof_is_reported_after_exit() {
        let mut pty = PtyProcess::spawn(sh("true")).unwrap();
        let mut saw_eof = false;
        for _ in 0..50 {
            if matches!(pty.read_chunk(Duration::from_millis(100)).await, PtyRead::Eof) {
                saw_eof = true;
                break;
            }
        }
        assert!(saw_eof, "child exit should surface as Eof");
        assert!(!pty.is_alive());
        pty.terminate().await;
    }

    #[tokio::test]
    async fn write_reaches_the_child() {
        let mut pty = PtyProcess::spawn(sh("read line; printf 'got:%s' \"$line\"")).unwrap();
        pty.write(b"ping\n").await.unwrap();
        let mut collected = Vec::new();
        for _ in 0..30 {
            match pty.read_chunk(Duration::from_millis(200)).await {
                PtyRead::Data(data) => collected.extend_from_slice(&data),
                PtyRead::Timeout => continue,
                PtyRead::Eof => break,
            }
        }
        assert!(String::from_utf8_lossy(&collected).contains("got:ping"));
        pty.terminate().await;
    }
}
