//! Subprocess spawning and output capture

use std::path::Path;
use std::time::{Duration, Instant};
use tokio::process::Command;

use crate::error::Result;

/// Captured output of one finished subprocess
#[derive(Clone, Debug)]
pub struct ExecutionResult {
    /// Captured standard output
    pub stdout: String,

    /// Captured standard error
    pub stderr: String,

    /// Exit code (-1 when the process was terminated by a signal)
    pub exit_code: i32,

    /// Wall-clock run time
    pub duration: Duration,
}

impl ExecutionResult {
    /// Whether the process exited zero
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs the tool to completion and captures its output
///
/// Spawn failures (binary vanished between resolution and launch,
/// permission problems) surface as [`Error::Io`](crate::Error::Io).
/// A non-zero exit is not an error at this layer; callers classify it.
pub async fn run_tool(executable: &Path, arguments: &[String]) -> Result<ExecutionResult> {
    let started = Instant::now();
    let output = Command::new(executable).args(arguments).output().await?;

    Ok(ExecutionResult {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        exit_code: output.status.code().unwrap_or(-1),
        duration: started.elapsed(),
    })
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[tokio::test]
    async fn missing_binary_surfaces_as_io_error() {
        let result = run_tool(
            &PathBuf::from("/nonexistent/path/to/ipatool"),
            &["search".into()],
        )
        .await;

        assert!(matches!(result, Err(crate::Error::Io(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn captures_stdout_stderr_and_exit_code() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake-tool");
        std::fs::write(&script, "#!/bin/sh\necho out-line\necho err-line >&2\nexit 3\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let result = run_tool(&script, &[]).await.unwrap();

        assert_eq!(result.stdout.trim(), "out-line");
        assert_eq!(result.stderr.trim(), "err-line");
        assert_eq!(result.exit_code, 3);
        assert!(!result.succeeded());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn arguments_reach_the_process() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake-tool");
        std::fs::write(&script, "#!/bin/sh\necho \"$@\"\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let result = run_tool(&script, &["search".into(), "twitter".into()])
            .await
            .unwrap();

        assert_eq!(result.stdout.trim(), "search twitter");
        assert!(result.succeeded());
    }
}
