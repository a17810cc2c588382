//! Module search path narrowing

use pyo3::prelude::*;
use pyo3::types::PyList;
use std::path::Path;

/// Path components that mark third-party package locations
const THIRD_PARTY_DIRS: [&str; 2] = ["site-packages", "dist-packages"];

/// Recursion ceiling for submitted code
pub const RECURSION_LIMIT: u32 = 1000;

/// Keep the script directory first, then only standard library entries.
///
/// Empty entries and `.` (the working directory) are dropped as well, so
/// files written by the submission are never importable by accident.
#[must_use]
pub fn narrow(entries: &[String], script_dir: &Path) -> Vec<String> {
    let script_dir = script_dir.to_string_lossy().into_owned();
    let mut narrowed = vec![script_dir.clone()];

    narrowed.extend(
        entries
            .iter()
            .filter(|entry| !entry.is_empty() && entry.as_str() != "." && **entry != script_dir)
            .filter(|entry| !is_third_party(entry))
            .cloned(),
    );
    narrowed.dedup();
    narrowed
}

fn is_third_party(entry: &str) -> bool {
    Path::new(entry).components().any(|component| {
        THIRD_PARTY_DIRS
            .iter()
            .any(|dir| component.as_os_str() == *dir)
    })
}

/// Replace `sys.path` of the running interpreter
pub fn apply(py: Python<'_>, script_dir: &Path) -> PyResult<Vec<String>> {
    let sys = py.import_bound("sys")?;
    let current: Vec<String> = sys.getattr("path")?.extract()?;
    let narrowed = narrow(&current, script_dir);

    sys.setattr("path", PyList::new_bound(py, &narrowed))?;
    sys.setattr("dont_write_bytecode", true)?;
    sys.call_method1("setrecursionlimit", (RECURSION_LIMIT,))?;

    tracing::debug!(
        before = current.len(),
        after = narrowed.len(),
        "module search path narrowed"
    );
    Ok(narrowed)
}
