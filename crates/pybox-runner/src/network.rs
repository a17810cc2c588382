//! Outbound network policy
//!
//! [`DenyNetwork`] swaps every socket construction and name resolution entry
//! point of the `socket` and `_socket` modules for a [`NetworkCapability`]
//! object that refuses to do anything. Submitted code that reaches for the
//! network gets an `OSError` naming the blocked call.
//!
//! Socket classes stay classes: they are replaced by a subclass whose
//! `__init__` is the refusing capability, so modules that subclass them at
//! import time (`ssl`, and through it `asyncio` or `http.client`) still load.
//!
//! This is a process-local, best-effort restriction. Code that loads a
//! native extension or issues raw syscalls some other way is not stopped
//! here; only a kernel-level network namespace would do that.

use pyo3::exceptions::PyOSError;
use pyo3::prelude::*;
use pyo3::types::{PyDict, PyTuple, PyType};

/// Message carried by every refused network call
pub const NETWORK_DISABLED_MESSAGE: &str = "Network access is disabled in the sandbox";

/// Modules whose entry points are replaced
const GUARDED_MODULES: [&str; 2] = ["socket", "_socket"];

/// Entry points that construct sockets or resolve names
const GUARDED_ENTRY_POINTS: [&str; 11] = [
    "socket",
    "SocketType",
    "socketpair",
    "fromfd",
    "create_connection",
    "create_server",
    "getaddrinfo",
    "gethostbyname",
    "gethostbyname_ex",
    "gethostbyaddr",
    "getfqdn",
];

/// Callable that stands in for one network entry point and always refuses
#[pyclass(frozen, module = "pybox")]
pub struct NetworkCapability {
    entry_point: String,
}

#[pymethods]
impl NetworkCapability {
    #[new]
    fn py_new(entry_point: String) -> Self {
        Self::new(entry_point)
    }

    #[pyo3(signature = (*_args, **_kwargs))]
    fn __call__(
        &self,
        _args: &Bound<'_, PyTuple>,
        _kwargs: Option<&Bound<'_, PyDict>>,
    ) -> PyResult<PyObject> {
        Err(PyOSError::new_err(self.message()))
    }

    fn __repr__(&self) -> String {
        format!("<disabled network entry point {}>", self.entry_point)
    }
}

impl NetworkCapability {
    #[must_use]
    pub fn new(entry_point: impl Into<String>) -> Self {
        Self {
            entry_point: entry_point.into(),
        }
    }

    /// Error text raised on every call
    #[must_use]
    pub fn message(&self) -> String {
        format!("{NETWORK_DISABLED_MESSAGE} ({} blocked)", self.entry_point)
    }
}

/// How the runner treats network access of submitted code
pub trait NetworkPolicy {
    /// Short policy name for logs
    fn name(&self) -> &'static str;

    /// Install the policy into the interpreter
    fn install(&self, py: Python<'_>) -> PyResult<()>;
}

/// Default policy: every network entry point refuses
#[derive(Debug, Clone, Copy, Default)]
pub struct DenyNetwork;

impl NetworkPolicy for DenyNetwork {
    fn name(&self) -> &'static str {
        "deny"
    }

    fn install(&self, py: Python<'_>) -> PyResult<()> {
        let mut replaced = 0usize;

        for module_name in GUARDED_MODULES {
            let module = py.import_bound(module_name)?;
            for entry_point in GUARDED_ENTRY_POINTS {
                if !module.hasattr(entry_point)? {
                    continue;
                }
                let original = module.getattr(entry_point)?;
                let capability =
                    Bound::new(py, NetworkCapability::new(format!("{module_name}.{entry_point}")))?;

                let replacement = match original.downcast::<PyType>() {
                    Ok(class) => refusing_subclass(py, class, capability)?,
                    Err(_) => capability.into_any(),
                };
                module.setattr(entry_point, replacement)?;
                replaced += 1;
            }
        }

        tracing::debug!(replaced, "network entry points disabled");
        Ok(())
    }
}

/// Subclass of `class` that keeps its name but refuses to initialise
fn refusing_subclass<'py>(
    py: Python<'py>,
    class: &Bound<'py, PyType>,
    capability: Bound<'py, NetworkCapability>,
) -> PyResult<Bound<'py, PyAny>> {
    let namespace = PyDict::new_bound(py);
    namespace.set_item("__init__", capability)?;
    namespace.set_item("__module__", class.getattr("__module__")?)?;
    namespace.set_item("__qualname__", class.getattr("__qualname__")?)?;

    py.import_bound("builtins")?
        .getattr("type")?
        .call1((class.getattr("__name__")?, (class.clone(),), namespace))
}

/// Leaves networking untouched; only for tests of unrelated behaviour
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowNetwork;

impl NetworkPolicy for AllowNetwork {
    fn name(&self) -> &'static str {
        "allow"
    }

    fn install(&self, _py: Python<'_>) -> PyResult<()> {
        tracing::warn!("network access left enabled");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::interpreter;

    #[test]
    fn capability_refuses_any_call() {
        let _guard = interpreter();
        Python::with_gil(|py| {
            let capability = Bound::new(py, NetworkCapability::new("socket.socket")).unwrap();

            let err = capability.call1(("example.org", 80)).unwrap_err();
            assert!(err.is_instance_of::<PyOSError>(py));
            let text = err.value_bound(py).to_string();
            assert!(text.contains(NETWORK_DISABLED_MESSAGE), "{text}");
            assert!(text.contains("socket.socket"), "{text}");

            let kwargs = PyDict::new_bound(py);
            kwargs.set_item("family", 2).unwrap();
            assert!(capability.call((), Some(&kwargs)).is_err());
        });
    }

    #[test]
    fn deny_replaces_entry_points() {
        let _guard = interpreter();
        Python::with_gil(|py| {
            DenyNetwork.install(py).unwrap();

            let socket = py.import_bound("socket").unwrap();
            for name in ["create_connection", "getaddrinfo"] {
                let attr = socket.getattr(name).unwrap();
                assert!(attr.is_instance_of::<NetworkCapability>(), "{name}");
            }

            let err = py
                .run_bound("import socket\nsocket.socket()", None, None)
                .unwrap_err();
            assert!(err.is_instance_of::<PyOSError>(py));
        });
    }

    #[test]
    fn socket_classes_stay_subclassable() {
        let _guard = interpreter();
        Python::with_gil(|py| {
            DenyNetwork.install(py).unwrap();

            let source = "import socket\n\
                          class Wrapped(socket.socket):\n    pass\n\
                          assert isinstance(socket.socket, type)\n\
                          assert socket.socket.__name__ == 'socket'\n\
                          Wrapped()\n";
            let err = py.run_bound(source, None, None).unwrap_err();
            assert!(err.is_instance_of::<PyOSError>(py));
            let text = err.value_bound(py).to_string();
            assert!(text.contains(NETWORK_DISABLED_MESSAGE), "{text}");

            let err = py
                .run_bound("import socket\nsocket.SocketType()", None, None)
                .unwrap_err();
            assert!(err.is_instance_of::<PyOSError>(py));
        });
    }
}
