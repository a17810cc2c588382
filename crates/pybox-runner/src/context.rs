//! Execution of submitted source inside an explicit context
//!
//! An [`ExecutionContext`] owns the namespace the code runs in and the two
//! in-memory sinks standing in for `sys.stdout` and `sys.stderr`. The sinks
//! are swapped in only while the code runs.
//!
//! Failures of the submitted code are classified into an [`Outcome`], never
//! returned as errors:
//! - `SystemExit` is a controlled termination, successful only when its code
//!   compares equal to 0 (`None` does not)
//! - anything else is a failure carrying the formatted traceback

use pybox_core::ExecutionResult;
use pyo3::exceptions::PySystemExit;
use pyo3::prelude::*;
use pyo3::types::{PyDict, PyModule, PyString};
use std::path::Path;

/// Namespace plus captured output streams for one execution
pub struct ExecutionContext<'py> {
    namespace: Bound<'py, PyDict>,
    stdout: Bound<'py, PyAny>,
    stderr: Bound<'py, PyAny>,
}

impl<'py> ExecutionContext<'py> {
    /// Fresh context: a namespace with only the module dunders and builtins
    pub fn new(py: Python<'py>, script_path: &Path) -> PyResult<Self> {
        let namespace = PyDict::new_bound(py);
        namespace.set_item("__name__", "__main__")?;
        namespace.set_item("__file__", script_path.to_string_lossy())?;
        namespace.set_item("__package__", py.None())?;
        namespace.set_item("__builtins__", py.import_bound("builtins")?)?;

        let string_io = py.import_bound("io")?.getattr("StringIO")?;
        let stdout = string_io.call0()?;
        let stderr = string_io.call0()?;

        Ok(Self {
            namespace,
            stdout,
            stderr,
        })
    }

    #[must_use]
    pub const fn namespace(&self) -> &Bound<'py, PyDict> {
        &self.namespace
    }

    /// Everything written to the captured stdout so far
    pub fn captured_stdout(&self) -> PyResult<String> {
        self.stdout.call_method0("getvalue")?.extract()
    }

    /// Everything written to the captured stderr so far
    pub fn captured_stderr(&self) -> PyResult<String> {
        self.stderr.call_method0("getvalue")?.extract()
    }

    /// Compile `source` as one unit and run it in this context
    pub fn execute(&self, source: &str, filename: &str) -> Outcome {
        let py = self.namespace.py();

        let run = || -> PyResult<()> {
            let builtins = py.import_bound("builtins")?;
            let code = builtins
                .getattr("compile")?
                .call1((source, filename, "exec"))?;

            let _redirect = StreamRedirect::install(py, &self.stdout, &self.stderr)?;
            builtins.getattr("exec")?.call1((code, &self.namespace))?;
            Ok(())
        };

        match run() {
            Ok(()) => Outcome::Completed,
            Err(err) => Outcome::from_error(py, &err),
        }
    }
}

/// How the submitted code ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Ran off the end of the module
    Completed,
    /// Requested termination through `SystemExit`
    Terminated(ExitRequest),
    /// Raised any other exception; carries the formatted traceback
    Failed(String),
}

/// Code passed to `SystemExit`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitRequest {
    /// `str()` of the code
    pub status: String,
    /// The code compares equal to 0
    pub zero: bool,
}

impl Outcome {
    fn from_error(py: Python<'_>, err: &PyErr) -> Self {
        if err.is_instance_of::<PySystemExit>(py) {
            return Self::Terminated(exit_request(py, err));
        }
        Self::Failed(format_traceback(py, err))
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        match self {
            Self::Completed => true,
            Self::Terminated(request) => request.zero,
            Self::Failed(_) => false,
        }
    }

    /// Error text for the result, `None` on success
    #[must_use]
    pub fn error(&self) -> Option<String> {
        match self {
            Self::Completed => None,
            Self::Terminated(request) if request.zero => None,
            Self::Terminated(request) => Some(format!("SystemExit: {}", request.status)),
            Self::Failed(trace) => Some(trace.clone()),
        }
    }

    /// Combine with the captured streams into the emitted result
    #[must_use]
    pub fn into_result(self, stdout: String, stderr: String) -> ExecutionResult {
        match self.error() {
            None => ExecutionResult::succeeded(stdout, stderr),
            Some(error) => ExecutionResult::failed(stdout, stderr, error),
        }
    }
}

/// `SystemExit.code`, compared with 0 by Python equality
fn exit_request(py: Python<'_>, err: &PyErr) -> ExitRequest {
    let Ok(code) = err.value_bound(py).getattr("code") else {
        return ExitRequest {
            status: "<unknown>".to_owned(),
            zero: false,
        };
    };

    ExitRequest {
        status: code
            .str()
            .map_or_else(|_| "<unprintable>".to_owned(), |s| s.to_string()),
        zero: code.eq(0).unwrap_or(false),
    }
}

/// Full `traceback.format_exception` text, falling back to `Type: message`
fn format_traceback(py: Python<'_>, err: &PyErr) -> String {
    let formatted = || -> PyResult<String> {
        let traceback = py.import_bound("traceback")?;
        let lines = traceback.call_method1(
            "format_exception",
            (
                err.get_type_bound(py),
                err.value_bound(py).clone(),
                err.traceback_bound(py),
            ),
        )?;
        PyString::new_bound(py, "")
            .call_method1("join", (lines,))?
            .extract()
    };

    formatted().unwrap_or_else(|_| err.to_string())
}

/// Swaps `sys.stdout`/`sys.stderr` for the context sinks until dropped
struct StreamRedirect<'py> {
    sys: Bound<'py, PyModule>,
    stdout: Bound<'py, PyAny>,
    stderr: Bound<'py, PyAny>,
}

impl<'py> StreamRedirect<'py> {
    fn install(
        py: Python<'py>,
        stdout: &Bound<'py, PyAny>,
        stderr: &Bound<'py, PyAny>,
    ) -> PyResult<Self> {
        let sys = py.import_bound("sys")?;
        let redirect = Self {
            stdout: sys.getattr("stdout")?,
            stderr: sys.getattr("stderr")?,
            sys,
        };

        redirect.sys.setattr("stdout", stdout.clone())?;
        redirect.sys.setattr("stderr", stderr.clone())?;
        Ok(redirect)
    }
}

impl Drop for StreamRedirect<'_> {
    fn drop(&mut self) {
        let restored = self
            .sys
            .setattr("stdout", self.stdout.clone())
            .and_then(|()| self.sys.setattr("stderr", self.stderr.clone()));
        if let Err(e) = restored {
            tracing::error!(error = %e, "failed to restore interpreter streams");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::interpreter;

    fn run(source: &str) -> (Outcome, String, String) {
        let _guard = interpreter();
        Python::with_gil(|py| {
            let context = ExecutionContext::new(py, Path::new("/scratch/main.py")).unwrap();
            let outcome = context.execute(source, "/scratch/main.py");
            (
                outcome,
                context.captured_stdout().unwrap(),
                context.captured_stderr().unwrap(),
            )
        })
    }

    #[test]
    fn captures_both_streams() {
        let (outcome, stdout, stderr) =
            run("import sys\nprint('hi')\nprint('warn', file=sys.stderr)");
        assert_eq!(outcome, Outcome::Completed);
        assert_eq!(stdout, "hi\n");
        assert_eq!(stderr, "warn\n");
    }

    #[test]
    fn streams_are_restored_afterwards() {
        let (_, stdout, _) = run("print('inside')");
        assert_eq!(stdout, "inside\n");

        let _guard = interpreter();
        Python::with_gil(|py| {
            let sys = py.import_bound("sys").unwrap();
            let current = sys.getattr("stdout").unwrap();
            let original = sys.getattr("__stdout__").unwrap();
            assert!(current.is(&original));
        });
    }

    #[test]
    fn exit_equal_to_zero_is_success() {
        for source in [
            "import sys\nsys.exit(0)",
            "import sys\nsys.exit(0.0)",
            "import sys\nsys.exit(False)",
            "raise SystemExit(0)",
        ] {
            let (outcome, _, _) = run(source);
            assert!(outcome.is_success(), "{source}: {outcome:?}");
            assert_eq!(outcome.error(), None);
        }
    }

    #[test]
    fn exit_without_code_is_failure() {
        for source in ["import sys\nsys.exit()", "raise SystemExit"] {
            let (outcome, _, _) = run(source);
            assert!(!outcome.is_success(), "{source}: {outcome:?}");
            assert_eq!(outcome.error().as_deref(), Some("SystemExit: None"), "{source}");
        }
    }

    #[test]
    fn exit_status_keeps_its_python_text() {
        let (outcome, _, _) = run("import sys\nsys.exit(True)");
        assert_eq!(outcome.error().as_deref(), Some("SystemExit: True"));
    }

    #[test]
    fn nonzero_exit_records_status() {
        let (outcome, stdout, _) = run("print('before')\nimport sys\nsys.exit(3)\nprint('after')");
        assert_eq!(
            outcome,
            Outcome::Terminated(ExitRequest {
                status: "3".into(),
                zero: false,
            })
        );
        assert_eq!(outcome.error().as_deref(), Some("SystemExit: 3"));
        assert_eq!(stdout, "before\n");
    }

    #[test]
    fn exit_with_message_is_failure() {
        let (outcome, _, _) = run("raise SystemExit('bad input')");
        assert!(!outcome.is_success());
        assert_eq!(outcome.error().as_deref(), Some("SystemExit: bad input"));
    }

    #[test]
    fn exception_yields_traceback() {
        let (outcome, _, _) = run("def f():\n    return 1 / 0\n\nf()");
        let Outcome::Failed(trace) = outcome else {
            panic!("expected failure, got {outcome:?}");
        };
        assert!(trace.starts_with("Traceback"), "{trace}");
        assert!(trace.contains("/scratch/main.py"), "{trace}");
        assert!(trace.contains("in f"), "{trace}");
        assert!(trace.contains("ZeroDivisionError"), "{trace}");
    }

    #[test]
    fn syntax_error_is_failure() {
        let (outcome, _, _) = run("def broken(:\n    pass");
        let error = outcome.error().unwrap();
        assert!(error.contains("SyntaxError"), "{error}");
    }

    #[test]
    fn top_level_definitions_share_one_namespace() {
        let (outcome, stdout, _) =
            run("def helper():\n    return 41\n\ndef main():\n    print(helper() + 1)\n\nmain()");
        assert_eq!(outcome, Outcome::Completed);
        assert_eq!(stdout, "42\n");
    }

    #[test]
    fn namespace_has_only_module_bindings() {
        let (outcome, stdout, _) = run(
            "print(sorted(k for k in globals() if not k.startswith('__')))\nprint(__name__)",
        );
        assert_eq!(outcome, Outcome::Completed);
        assert_eq!(stdout, "[]\n__main__\n");
    }

    #[test]
    fn outcome_maps_to_result() {
        let result = Outcome::Completed.into_result("hi\n".into(), String::new());
        assert_eq!(result, ExecutionResult::succeeded("hi\n", ""));

        let request = ExitRequest {
            status: "2".into(),
            zero: false,
        };
        let result = Outcome::Terminated(request).into_result(String::new(), String::new());
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("SystemExit: 2"));
    }
}
