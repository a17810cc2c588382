//! Owned handle on a spawned runner process
//!
//! The child is started in its own process group. Its stdin is fed and its
//! stdout/stderr are drained on helper threads, so neither side can block on
//! a full pipe while the parent is waiting. Killing always targets the whole
//! group so descendants forked by submitted code go down with the runner.

use crate::{PyboxError, Result};
use nix::errno::Errno;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use std::io::{self, Read, Write};
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

/// How often a running child is polled for exit
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How long to wait for a pipe to reach EOF once the child is gone
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Bytes read from one child pipe
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Captured {
    pub bytes: Vec<u8>,
    /// More data arrived than the capture limit allowed
    pub truncated: bool,
}

impl Captured {
    /// Lossy UTF-8 view of the captured bytes
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

/// Result of waiting on a child
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The child terminated and has been reaped
    Exited(ExitStatus),
    /// The deadline passed while the child was still running
    DeadlineExceeded,
}

/// Everything a terminated child left behind
#[derive(Debug)]
pub struct ChildOutput {
    pub status: ExitStatus,
    pub stdout: Captured,
    pub stderr: Captured,
}

/// A running child process owned by exactly one caller.
///
/// Dropping the handle without reaping kills and reaps the process group.
#[derive(Debug)]
pub struct ChildHandle {
    child: Child,
    pgid: Pid,
    stdout: Option<Receiver<Captured>>,
    stderr: Option<Receiver<Captured>>,
    status: Option<ExitStatus>,
}

impl ChildHandle {
    /// Spawn `command` with piped stdio in a new process group.
    ///
    /// `stdin` is written in full and then closed; `None` gives the child an
    /// empty stdin. Each output stream keeps at most `output_limit` bytes.
    pub fn spawn(command: &mut Command, stdin: Option<&str>, output_limit: usize) -> Result<Self> {
        command
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);

        let mut child = command.spawn().map_err(|source| PyboxError::Spawn {
            path: PathBuf::from(command.get_program()),
            source,
        })?;

        let pgid = Pid::from_raw(i32::try_from(child.id()).map_err(|_| {
            PyboxError::Io(io::Error::other(format!("pid {} out of range", child.id())))
        })?);

        if let (Some(data), Some(pipe)) = (stdin, child.stdin.take()) {
            feed_stdin(pipe, data.to_owned());
        }
        let stdout = child.stdout.take().map(|pipe| drain(pipe, output_limit));
        let stderr = child.stderr.take().map(|pipe| drain(pipe, output_limit));

        tracing::debug!(pid = child.id(), "child spawned");

        Ok(Self {
            child,
            pgid,
            stdout,
            stderr,
            status: None,
        })
    }

    /// OS process id of the child
    #[must_use]
    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Block until the child exits or `deadline` has elapsed
    pub fn wait_with_deadline(&mut self, deadline: Duration) -> Result<WaitOutcome> {
        if let Some(status) = self.status {
            return Ok(WaitOutcome::Exited(status));
        }

        let start = Instant::now();
        loop {
            if let Some(status) = self.child.try_wait()? {
                self.status = Some(status);
                return Ok(WaitOutcome::Exited(status));
            }

            let elapsed = start.elapsed();
            if elapsed >= deadline {
                return Ok(WaitOutcome::DeadlineExceeded);
            }
            thread::sleep(POLL_INTERVAL.min(deadline - elapsed));
        }
    }

    /// Force-kill the child and its process group, then reap it
    pub fn kill_and_reap(&mut self) -> Result<ExitStatus> {
        self.kill_group();

        if let Some(status) = self.status {
            return Ok(status);
        }

        match self.child.kill() {
            Ok(()) => {}
            // already exited
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => {}
            Err(e) => return Err(e.into()),
        }

        let status = self.child.wait()?;
        self.status = Some(status);
        tracing::debug!(pid = self.child.id(), ?status, "child killed and reaped");
        Ok(status)
    }

    /// Reap the child if needed, kill leftover descendants and collect output
    pub fn finish(mut self) -> Result<ChildOutput> {
        let status = match self.status {
            Some(status) => status,
            None => self.kill_and_reap()?,
        };
        self.kill_group();

        let stdout = collect(self.stdout.take(), "stdout");
        let stderr = collect(self.stderr.take(), "stderr");

        Ok(ChildOutput {
            status,
            stdout,
            stderr,
        })
    }

    fn kill_group(&self) {
        match killpg(self.pgid, Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => tracing::warn!(pgid = %self.pgid, error = %e, "failed to kill process group"),
        }
    }
}

impl Drop for ChildHandle {
    fn drop(&mut self) {
        if self.status.is_none() {
            if let Err(e) = self.kill_and_reap() {
                tracing::warn!(pid = self.child.id(), error = %e, "failed to reap child on drop");
            }
        } else {
            self.kill_group();
        }
    }
}

fn feed_stdin(mut pipe: ChildStdin, data: String) {
    thread::spawn(move || {
        if let Err(e) = pipe.write_all(data.as_bytes()) {
            // the child may exit without reading its input
            if e.kind() != io::ErrorKind::BrokenPipe {
                tracing::debug!(error = %e, "failed to feed child stdin");
            }
        }
    });
}

fn drain<R: Read + Send + 'static>(mut pipe: R, limit: usize) -> Receiver<Captured> {
    let (tx, rx) = mpsc::channel();

    thread::spawn(move || {
        let mut captured = Captured::default();
        let mut chunk = [0u8; 8192];

        loop {
            match pipe.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    let room = limit.saturating_sub(captured.bytes.len());
                    if n > room {
                        captured.truncated = true;
                    }
                    captured.bytes.extend_from_slice(&chunk[..n.min(room)]);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    tracing::debug!(error = %e, "child pipe read failed");
                    break;
                }
            }
        }

        let _ = tx.send(captured);
    });

    rx
}

fn collect(rx: Option<Receiver<Captured>>, stream: &'static str) -> Captured {
    let Some(rx) = rx else {
        return Captured::default();
    };

    match rx.recv_timeout(DRAIN_TIMEOUT) {
        Ok(captured) => captured,
        Err(RecvTimeoutError::Timeout) => {
            tracing::warn!(stream, "pipe still held open after child exit");
            Captured {
                bytes: Vec::new(),
                truncated: true,
            }
        }
        Err(RecvTimeoutError::Disconnected) => Captured::default(),
    }
}
