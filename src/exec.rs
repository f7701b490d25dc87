use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Captured result of a finished external command.
#[derive(Debug)]
pub struct ExecOutput {
    /// Process exit code (None if killed by signal).
    pub exit_code: Option<i32>,
    /// Captured stdout, lossily decoded.
    pub stdout: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Errors from running an external command.
#[derive(Debug)]
pub enum ExecError {
    /// Failed to spawn the command.
    Spawn {
        command: String,
        source: std::io::Error,
    },
    /// Failed while waiting for the command.
    Wait {
        command: String,
        source: std::io::Error,
    },
    /// The command exceeded its wall-clock limit and was killed.
    Timeout { command: String, limit: Duration },
}

impl std::fmt::Display for ExecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecError::Spawn { command, source } => {
                write!(f, "failed to spawn {command}: {source}")
            }
            ExecError::Wait { command, source } => {
                write!(f, "failed waiting for {command}: {source}")
            }
            ExecError::Timeout { command, limit } => {
                write!(f, "{command} timed out after {}s", limit.as_secs())
            }
        }
    }
}

impl std::error::Error for ExecError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ExecError::Spawn { source, .. } => Some(source),
            ExecError::Wait { source, .. } => Some(source),
            ExecError::Timeout { .. } => None,
        }
    }
}

/// Run a command with arguments, capturing stdout, bounded by `limit`.
///
/// The tick must never stall behind a hung collaborator: on timeout the
/// child is killed and `ExecError::Timeout` is returned. A non-zero exit is
/// not an error here; callers judge `ExecOutput`.
pub async fn run(command: &str, args: &[String], limit: Duration) -> Result<ExecOutput, ExecError> {
    tracing::debug!(command, ?args, "running external command");

    let child = Command::new(command)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| ExecError::Spawn {
            command: command.to_string(),
            source: e,
        })?;

    // Dropping the wait future on timeout kills the child (kill_on_drop)
    let output = match tokio::time::timeout(limit, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            return Err(ExecError::Wait {
                command: command.to_string(),
                source: e,
            })
        }
        Err(_) => {
            return Err(ExecError::Timeout {
                command: command.to_string(),
                limit,
            })
        }
    };

    Ok(ExecOutput {
        exit_code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn captures_stdout_and_exit_zero() {
        let out = run("echo", &args(&["hello"]), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn reports_nonzero_exit_code() {
        let out = run("sh", &args(&["-c", "exit 3"]), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(!out.success());
        assert_eq!(out.exit_code, Some(3));
    }

    #[tokio::test]
    async fn stderr_is_not_mixed_into_stdout() {
        let out = run(
            "sh",
            &args(&["-c", "echo visible; echo hidden >&2"]),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        assert_eq!(out.stdout.trim(), "visible");
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let err = run("nonexistent-binary-xyz", &[], Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Spawn { .. }));
        assert!(err.to_string().contains("failed to spawn"));
    }

    #[tokio::test]
    async fn hung_command_times_out() {
        let err = run("sleep", &args(&["5"]), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Timeout { .. }));
    }
}
