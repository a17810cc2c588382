//! Per-invocation scratch workspace
//!
//! Layout inside the scratch root:
//!
//! ```text
//! <scratch_root>/runner-XXXXXX/
//!     main.py       staged source
//!     workspace/    working directory of the runner
//! ```
//!
//! The directory is removed when the [`ScratchWorkspace`] is closed or
//! dropped, whichever comes first. Removal failures are logged, never
//! returned, so they cannot mask the outcome of the run.

use crate::{PyboxError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// File name of the staged source
pub const CODE_FILE: &str = "main.py";

/// Name of the working subdirectory
pub const WORKDIR: &str = "workspace";

#[derive(Debug)]
pub struct ScratchWorkspace {
    dir: Option<TempDir>,
    root: PathBuf,
    code_path: PathBuf,
    workdir: PathBuf,
}

impl ScratchWorkspace {
    /// Create a fresh workspace under `scratch_root` and stage `code` in it
    pub fn create(scratch_root: &Path, code: &str) -> Result<Self> {
        fs::create_dir_all(scratch_root).map_err(|source| PyboxError::Workspace {
            path: scratch_root.to_path_buf(),
            source,
        })?;

        let dir = tempfile::Builder::new()
            .prefix("runner-")
            .tempdir_in(scratch_root)
            .map_err(|source| PyboxError::Workspace {
                path: scratch_root.to_path_buf(),
                source,
            })?;

        let root = dir.path().to_path_buf();
        let code_path = root.join(CODE_FILE);
        let workdir = root.join(WORKDIR);

        // From here on `dir` cleans up after itself if staging fails
        fs::write(&code_path, code).map_err(|source| PyboxError::Workspace {
            path: code_path.clone(),
            source,
        })?;
        fs::create_dir(&workdir).map_err(|source| PyboxError::Workspace {
            path: workdir.clone(),
            source,
        })?;

        tracing::debug!(workspace = %root.display(), "workspace staged");

        Ok(Self {
            dir: Some(dir),
            root,
            code_path,
            workdir,
        })
    }

    /// Root directory of this workspace
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Staged source file
    #[must_use]
    pub fn code_path(&self) -> &Path {
        &self.code_path
    }

    /// Working directory handed to the runner
    #[must_use]
    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Unique directory name, usable as a per-run identifier
    #[must_use]
    pub fn name(&self) -> String {
        self.root
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Remove the workspace now, logging any failure
    pub fn close(mut self) {
        self.remove();
    }

    fn remove(&mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };

        match dir.close() {
            Ok(()) => tracing::debug!(workspace = %self.root.display(), "workspace removed"),
            Err(e) => tracing::warn!(
                workspace = %self.root.display(),
                error = %e,
                "failed to remove workspace"
            ),
        }
    }
}

impl Drop for ScratchWorkspace {
    fn drop(&mut self) {
        self.remove();
    }
}
