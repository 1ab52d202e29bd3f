//! Classify tool responses into failure signatures.

use once_cell::sync::Lazy;
use regex::Regex;

static KNOWN_SIGNATURES: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    [
        ("build_timeout", r"(?i)\btimed?\s*out\b|\btimeout\b"),
        ("permission_denied", r"(?i)permission denied|operation not permitted|\bEACCES\b"),
        ("command_not_found", r"(?i)command not found|no such file or directory"),
        ("build_failed", r"(?i)\bbuild failed\b|compil(e|ation) (error|failed)|error\[E\d+\]|^error:"),
        ("test_failed", r"(?i)\btests? failed\b|\bFAILED\b|assertion .*failed"),
    ]
    .into_iter()
    .map(|(name, pattern)| {
        let pattern = format!("(?m){pattern}");
        (name, Regex::new(&pattern).expect("failure signature patterns are valid"))
    })
    .collect()
});

/// Signatures that mark a failure on their own. Timeouts, missing files and
/// permission errors also show up in warnings from commands that succeeded.
const STDERR_FAILURE_SIGNATURES: &[&str] = &["build_failed", "test_failed"];

static DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("valid regex"));
static SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Whether a tool call failed, and what it said when it did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutcome {
    pub failed: bool,
    pub error_text: String,
}

impl ToolOutcome {
    pub fn success() -> Self {
        Self {
            failed: false,
            error_text: String::new(),
        }
    }

    fn failure(error_text: impl Into<String>) -> Self {
        Self {
            failed: true,
            error_text: error_text.into(),
        }
    }

    /// Stable signature for this failure, see [`error_signature`].
    pub fn signature(&self) -> String {
        error_signature(&self.error_text)
    }
}

/// Interpret a post-tool-use `tool_response`.
///
/// A response counts as failed when it flags an error, reports a non-zero
/// exit code, was interrupted, or (with no exit code reported) its stderr
/// reports a build or test failure.
pub fn outcome_from_response(response: &serde_json::Value) -> ToolOutcome {
    if let Some(text) = response.as_str() {
        return if text.trim_start().starts_with("Error") {
            ToolOutcome::failure(text)
        } else {
            ToolOutcome::success()
        };
    }

    let Some(obj) = response.as_object() else {
        return ToolOutcome::success();
    };

    let stderr = obj.get("stderr").and_then(|v| v.as_str()).unwrap_or_default();
    let describe = |fallback: &str| -> String {
        if let Some(err) = obj.get("error").and_then(|v| v.as_str()) {
            err.to_string()
        } else if !stderr.trim().is_empty() {
            stderr.to_string()
        } else {
            fallback.to_string()
        }
    };

    let flagged = ["is_error", "isError"]
        .iter()
        .any(|k| obj.get(*k).and_then(|v| v.as_bool()) == Some(true));
    if flagged || obj.get("error").is_some_and(|v| !v.is_null()) {
        return ToolOutcome::failure(describe("tool reported an error"));
    }

    let exit_code = ["exit_code", "exitCode", "returnCode"]
        .iter()
        .find_map(|k| obj.get(*k).and_then(|v| v.as_i64()));
    if let Some(code) = exit_code.filter(|c| *c != 0) {
        return ToolOutcome::failure(describe(&format!("exit code {code}")));
    }

    if obj.get("interrupted").and_then(|v| v.as_bool()) == Some(true) {
        return ToolOutcome::failure(describe("command timed out (interrupted)"));
    }

    // A reported zero exit code is authoritative; stderr is only consulted
    // when there is no exit code at all.
    if exit_code.is_none()
        && known_signature(stderr).is_some_and(|name| STDERR_FAILURE_SIGNATURES.contains(&name))
    {
        return ToolOutcome::failure(stderr);
    }

    ToolOutcome::success()
}

/// Map error output onto a short, stable signature.
///
/// Known failure shapes get a readable name; anything else is named after a
/// digest of its first non-empty line with numbers masked, so repeats of the
/// same error share a signature.
pub fn error_signature(text: &str) -> String {
    if let Some(name) = known_signature(text) {
        return name.to_string();
    }

    let first_line = text
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("unknown error")
        .to_lowercase();
    let masked = DIGITS.replace_all(&first_line, "#");
    let normalized = SPACES.replace_all(&masked, " ");
    let digest = blake3::hash(normalized.as_bytes());
    format!("error_{}", &digest.to_hex()[..12])
}

fn known_signature(text: &str) -> Option<&'static str> {
    KNOWN_SIGNATURES
        .iter()
        .find(|(_, re)| re.is_match(text))
        .map(|(name, _)| *name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_known_signatures() {
        assert_eq!(error_signature("xcodebuild: Timed out after 600s"), "build_timeout");
        assert_eq!(error_signature("bash: foo: command not found"), "command_not_found");
        assert_eq!(error_signature("rm: x: Permission denied"), "permission_denied");
        assert_eq!(error_signature("3 tests failed"), "test_failed");
        assert_eq!(error_signature("error[E0308]: mismatched types"), "build_failed");
    }

    #[test]
    fn test_unknown_errors_share_signature_modulo_numbers() {
        let a = error_signature("Segment 12 exploded at 0");
        let b = error_signature("\n  Segment 99 exploded   at 7\nmore");
        assert_eq!(a, b);
        assert!(a.starts_with("error_"));
        assert_ne!(a, error_signature("something else entirely"));
    }

    #[test]
    fn test_outcome_flags() {
        assert!(outcome_from_response(&json!({"is_error": true})).failed);
        assert!(outcome_from_response(&json!({"exit_code": 1, "stderr": "boom"})).failed);
        assert!(outcome_from_response(&json!({"interrupted": true})).failed);
        assert!(outcome_from_response(&json!("Error: file not found")).failed);
        assert!(!outcome_from_response(&json!({"stdout": "ok", "stderr": ""})).failed);
        assert!(!outcome_from_response(&json!({"exit_code": 0})).failed);
        assert!(!outcome_from_response(&json!(null)).failed);
    }

    #[test]
    fn test_stderr_only_counts_when_recognized() {
        let warning = outcome_from_response(&json!({"stdout": "", "stderr": "warning: unused"}));
        assert!(!warning.failed);

        let failure = outcome_from_response(&json!({"stdout": "", "stderr": "** BUILD FAILED **"}));
        assert!(failure.failed);
        assert_eq!(failure.signature(), "build_failed");
    }

    #[test]
    fn test_incidental_stderr_does_not_count_as_failure() {
        let ok_with_warning = json!({
            "exit_code": 0,
            "stderr": "warning: connection timeout, retrying\nls: cache: No such file or directory"
        });
        assert!(!outcome_from_response(&ok_with_warning).failed);

        let zero_exit_with_marker = json!({"exit_code": 0, "stderr": "1 test failed (flaky, retried)"});
        assert!(!outcome_from_response(&zero_exit_with_marker).failed);

        for stderr in ["request timeout", "cat: x: No such file or directory", "Permission denied"] {
            assert!(!outcome_from_response(&json!({"stderr": stderr})).failed, "{stderr}");
        }
        assert!(outcome_from_response(&json!({"stderr": "test result: FAILED"})).failed);
    }

    #[test]
    fn test_interrupted_maps_to_timeout() {
        let outcome = outcome_from_response(&json!({"interrupted": true, "stderr": ""}));
        assert_eq!(outcome.signature(), "build_timeout");
    }
}
