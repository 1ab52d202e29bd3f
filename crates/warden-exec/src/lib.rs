//! Bounded subprocess execution for verification probes.
//!
//! Policy checks occasionally need to ask an external tool a question (most
//! often `git rev-parse HEAD`). Every such call carries an explicit timeout;
//! running out of time is reported as an error, never as a successful answer.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Result from a finished command.
#[derive(Debug, Clone)]
pub struct RunResult {
    /// Child process stdout.
    pub stdout: Vec<u8>,
    /// Child process stderr.
    pub stderr: Vec<u8>,
    /// Child process exit code. -1 when unavailable.
    pub exit_code: i32,
    /// Whether process exited with success status.
    pub success: bool,
}

impl RunResult {
    /// Stdout decoded lossily and trimmed.
    pub fn stdout_trimmed(&self) -> String {
        String::from_utf8_lossy(&self.stdout).trim().to_string()
    }

    /// Stderr decoded lossily and trimmed.
    pub fn stderr_trimmed(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }
}

/// Errors returned by the command runner.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    /// Command execution exceeded timeout.
    #[error("Command timed out after {0}ms")]
    Timeout(u128),
    /// The program could not be found on PATH.
    #[error("Program not found: {0}")]
    NotFound(String),
    /// Process execution failed.
    #[error("Failed to execute command: {0}")]
    Execution(String),
}

/// Run `program` with `args` in `cwd`, killing it if it outlives `timeout`.
///
/// Stdin is closed so a probe can never hang waiting for input.
pub async fn run_command(
    program: &str,
    args: &[&str],
    cwd: &Path,
    timeout: Duration,
) -> Result<RunResult, ExecError> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    tracing::debug!(program, ?args, cwd = %cwd.display(), "running probe command");
    run_with_timeout(cmd, program, timeout).await
}

async fn run_with_timeout(
    mut command: Command,
    program: &str,
    timeout: Duration,
) -> Result<RunResult, ExecError> {
    let output = tokio::time::timeout(timeout, command.output())
        .await
        .map_err(|_| ExecError::Timeout(timeout.as_millis()))?
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ExecError::NotFound(program.to_string()),
            _ => ExecError::Execution(e.to_string()),
        })?;

    Ok(RunResult {
        stdout: output.stdout,
        stderr: output.stderr,
        exit_code: output.status.code().unwrap_or(-1),
        success: output.status.success(),
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_run_echo() {
        let dir = TempDir::new().unwrap();
        let result = run_command("echo", &["hello"], dir.path(), Duration::from_secs(5))
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.stdout_trimmed(), "hello");
    }

    #[tokio::test]
    async fn test_run_reports_exit_code() {
        let dir = TempDir::new().unwrap();
        let result = run_command("sh", &["-c", "exit 3"], dir.path(), Duration::from_secs(5))
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.exit_code, 3);
    }

    #[tokio::test]
    async fn test_run_timeout_is_error() {
        let dir = TempDir::new().unwrap();
        let result = run_command("sleep", &["10"], dir.path(), Duration::from_millis(100)).await;

        match result {
            Err(ExecError::Timeout(ms)) => assert_eq!(ms, 100),
            other => panic!("Expected Timeout, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_program() {
        let dir = TempDir::new().unwrap();
        let result = run_command(
            "definitely-not-a-real-program-xyz",
            &[],
            dir.path(),
            Duration::from_secs(1),
        )
        .await;

        assert!(matches!(result, Err(ExecError::NotFound(_))));
    }
}
