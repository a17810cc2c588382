//! Runner result line protocol
//!
//! On its success path the runner writes exactly one line of UTF-8 JSON to
//! its standard output:
//!
//! ```text
//! {"success":true,"stdout":"hi\n","stderr":"","error":null}
//! ```
//!
//! Nothing else may appear on that stream. Anything else is a protocol
//! violation and is reported as [`PyboxError::Protocol`].

use crate::{ExecutionResult, PyboxError, Result};

/// Upper bound on what the orchestrator accepts from a runner's stdout
pub const MAX_RESULT_BYTES: usize = 10 * 1024 * 1024;

/// Encode a result as one newline-terminated JSON line
pub fn encode_line(result: &ExecutionResult) -> Result<String> {
    // serde_json escapes control characters, so the body never contains '\n'
    let mut line = serde_json::to_string(result)?;
    line.push('\n');
    Ok(line)
}

/// Decode the complete stdout of a runner into a result
pub fn decode_line(raw: &[u8]) -> Result<ExecutionResult> {
    if raw.len() > MAX_RESULT_BYTES {
        return Err(PyboxError::Protocol(format!(
            "result too large: {} bytes",
            raw.len()
        )));
    }

    let text = std::str::from_utf8(raw)
        .map_err(|e| PyboxError::Protocol(format!("runner output is not UTF-8: {e}")))?;

    let line = text.strip_suffix('\n').unwrap_or(text);
    let line = line.strip_suffix('\r').unwrap_or(line);

    if line.trim().is_empty() {
        return Err(PyboxError::Protocol("runner produced no result line".into()));
    }

    let lines = line.split('\n').count();
    if lines != 1 {
        return Err(PyboxError::Protocol(format!(
            "expected exactly one result line, got {lines}"
        )));
    }

    serde_json::from_str(line)
        .map_err(|e| PyboxError::Protocol(format!("malformed result object: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoded_line_is_single_line() {
        let result = ExecutionResult::failed("a\nb\n", "warn\n", "Traceback\n  line\n");
        let line = encode_line(&result).unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);
        assert_eq!(decode_line(line.as_bytes()).unwrap(), result);
    }

    #[test]
    fn non_ascii_is_not_escaped() {
        let line = encode_line(&ExecutionResult::succeeded("你好\n", "")).unwrap();
        assert!(line.contains("你好"));
    }

    #[test]
    fn accepts_missing_trailing_newline() {
        let raw = br#"{"success":true,"stdout":"hi\n","stderr":"","error":null}"#;
        let result = decode_line(raw).unwrap();
        assert!(result.success);
        assert_eq!(result.stdout, "hi\n");
    }

    #[test]
    fn rejects_extra_output() {
        let raw = b"hello\n{\"success\":true,\"stdout\":\"\",\"stderr\":\"\",\"error\":null}\n";
        let err = decode_line(raw).unwrap_err();
        assert!(matches!(err, PyboxError::Protocol(_)));
        assert!(err.to_string().contains("exactly one"));
    }

    #[test]
    fn rejects_trailing_garbage_on_the_line() {
        let raw = br#"{"success":true,"stdout":"","stderr":"","error":null} trailing"#;
        assert!(matches!(decode_line(raw), Err(PyboxError::Protocol(_))));
    }

    #[test]
    fn rejects_wrong_shape() {
        for raw in [
            &br#"{"success":"yes","stdout":"","stderr":"","error":null}"#[..],
            br#"{"success":true,"stdout":"","stderr":"","error":null,"extra":1}"#,
            br#"{"success":true,"stderr":"","error":null}"#,
            b"[1,2,3]",
        ] {
            assert!(
                matches!(decode_line(raw), Err(PyboxError::Protocol(_))),
                "{}",
                String::from_utf8_lossy(raw)
            );
        }
    }

    #[test]
    fn rejects_empty_and_invalid_utf8() {
        assert!(matches!(decode_line(b""), Err(PyboxError::Protocol(_))));
        assert!(matches!(decode_line(b"\n"), Err(PyboxError::Protocol(_))));
        assert!(matches!(decode_line(&[0xff, 0xfe]), Err(PyboxError::Protocol(_))));
    }
}
