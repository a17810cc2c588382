//! # pybox-runner
//!
//! Child side of the sandbox boundary. The `pybox-runner` binary executes one
//! Python source file inside an embedded interpreter and reports the outcome
//! as a single JSON line on its original stdout.
//!
//! Setup happens in a fixed order enforced by [`sandbox::Sandbox`]:
//! 1. resource limits are installed on the process
//! 2. network entry points are replaced by refusing capabilities
//! 3. the module search path is narrowed to the standard library
//! 4. the code runs in a fresh namespace with captured output
//! 5. the result line is emitted
//!
//! A failing submission is still a successful run of the runner. Only a
//! malfunction of the runner itself ends in a nonzero exit status.

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod args;
pub mod channel;
pub mod context;
pub mod error;
pub mod network;
pub mod sandbox;
pub mod search_path;

pub use error::{Result, RunnerError};

#[cfg(test)]
pub(crate) mod test_support {
    use pybox_core::{ResourceLimiter, ResourceLimits};
    use std::io::Write;
    use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

    static INTERPRETER: Mutex<()> = Mutex::new(());

    /// Serializes tests that touch interpreter-global state
    pub fn interpreter() -> MutexGuard<'static, ()> {
        INTERPRETER.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cloneable in-memory writer
    #[derive(Clone, Default)]
    pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl SharedBuffer {
        pub fn contents(&self) -> String {
            let bytes = self.0.lock().unwrap();
            String::from_utf8(bytes.clone()).unwrap()
        }
    }

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Limiter that only remembers what it was asked to apply
    #[derive(Default)]
    pub struct RecordingLimiter {
        applied: Mutex<Vec<ResourceLimits>>,
    }

    impl RecordingLimiter {
        pub fn applied(&self) -> Vec<ResourceLimits> {
            self.applied.lock().unwrap().clone()
        }
    }

    impl ResourceLimiter for RecordingLimiter {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn apply(&self, limits: &ResourceLimits) -> pybox_core::Result<()> {
            self.applied.lock().unwrap().push(*limits);
            Ok(())
        }
    }
}
