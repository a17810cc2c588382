//! Result channel back to the orchestrator
//!
//! The orchestrator reads the runner's stdout and expects exactly one JSON
//! line there. [`ProtocolChannel::claim_stdout`] moves the real stdout to a
//! private descriptor and points fd 1 at `/dev/null`, so whatever the
//! submission writes to the raw descriptor cannot end up on the protocol
//! stream.
//!
//! The private descriptor itself is only hidden, not sealed. It is
//! close-on-exec, but code that guesses its number (the lowest free one
//! from 3 up) can still `os.write` to it directly. A stray write usually
//! ends as a protocol error on the orchestrator side, but a submission that
//! writes a well-formed line and then calls `os._exit(0)` is able to report
//! a result of its own choosing. Closing that gap needs a channel the
//! submission cannot name, such as a pipe held by a process outside the
//! interpreter.

use crate::error::{Result, RunnerError};
use pybox_core::{ExecutionResult, protocol};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::io::{AsRawFd, FromRawFd};

pub struct ProtocolChannel {
    sink: Box<dyn Write + Send>,
}

impl std::fmt::Debug for ProtocolChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolChannel").finish_non_exhaustive()
    }
}

impl ProtocolChannel {
    /// Take exclusive ownership of the process stdout
    pub fn claim_stdout() -> Result<Self> {
        io::stdout().flush().map_err(RunnerError::Channel)?;

        // SAFETY: duplicating fd 1; the new descriptor is owned below
        let fd = unsafe { libc::fcntl(libc::STDOUT_FILENO, libc::F_DUPFD_CLOEXEC, 3) };
        if fd < 0 {
            return Err(RunnerError::Channel(io::Error::last_os_error()));
        }

        // SAFETY: We just created this file descriptor
        let stdout = unsafe { File::from_raw_fd(fd) };

        let devnull = OpenOptions::new()
            .write(true)
            .open("/dev/null")
            .map_err(RunnerError::Channel)?;

        // SAFETY: dup2 onto fd 1, both descriptors are valid
        let ret = unsafe { libc::dup2(devnull.as_raw_fd(), libc::STDOUT_FILENO) };
        if ret < 0 {
            return Err(RunnerError::Channel(io::Error::last_os_error()));
        }

        tracing::debug!(fd, "protocol channel claimed");
        Ok(Self::from_writer(stdout))
    }

    /// Channel over an arbitrary writer
    pub fn from_writer(sink: impl Write + Send + 'static) -> Self {
        Self {
            sink: Box::new(sink),
        }
    }

    /// Write the result line and flush it
    pub fn emit(&mut self, result: &ExecutionResult) -> Result<()> {
        let line = protocol::encode_line(result)?;
        self.sink
            .write_all(line.as_bytes())
            .map_err(RunnerError::Channel)?;
        self.sink.flush().map_err(RunnerError::Channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::SharedBuffer;

    #[test]
    fn emits_one_line() {
        let buffer = SharedBuffer::default();
        let mut channel = ProtocolChannel::from_writer(buffer.clone());

        channel
            .emit(&ExecutionResult::failed("", "", "SystemExit: 3"))
            .unwrap();

        let written = buffer.contents();
        assert!(written.ends_with('\n'));
        assert_eq!(written.lines().count(), 1);
        let decoded = protocol::decode_line(written.as_bytes()).unwrap();
        assert_eq!(decoded.error.as_deref(), Some("SystemExit: 3"));
    }
}
