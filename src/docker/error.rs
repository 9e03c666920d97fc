use std::fmt;
use std::time::Duration;

/// Structured error type for Docker CLI operations.
///
/// Machine-actionable variants rather than a stringly-typed wrapper, so the
/// manager can distinguish "mapping not registered yet" (retriable) from
/// "docker binary missing" (fatal).
#[derive(Debug)]
pub enum DockerError {
    /// Docker command timed out.
    Timeout { command: String, timeout: Duration },

    /// Docker command ran but returned non-zero exit.
    CommandFailed {
        command: String,
        stderr: String,
        exit_code: Option<i32>,
    },

    /// Docker binary couldn't be executed (not in PATH, permission denied).
    ExecFailed {
        command: String,
        source: std::io::Error,
    },

    /// The container has no host binding for the requested internal port.
    /// Transient right after start — mapping registration can lag `docker run`.
    PortNotPublished { container: String, port: u16 },

    /// Docker daemon not responding.
    DaemonUnavailable,
}

impl DockerError {
    /// Create a timeout error.
    pub fn timeout(cmd: impl Into<String>, dur: Duration) -> Self {
        DockerError::Timeout {
            command: cmd.into(),
            timeout: dur,
        }
    }

    /// Create a command-failed error from an `std::process::Output`.
    pub fn failed(cmd: impl Into<String>, output: &std::process::Output) -> Self {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        DockerError::CommandFailed {
            command: cmd.into(),
            stderr,
            exit_code: output.status.code(),
        }
    }

    /// Create an exec-failed error (binary not found / permission denied).
    pub fn exec_failed(cmd: impl Into<String>, err: std::io::Error) -> Self {
        DockerError::ExecFailed {
            command: cmd.into(),
            source: err,
        }
    }

    /// True for failures worth retrying with backoff; false for failures
    /// that no amount of waiting will fix.
    pub fn is_transient(&self) -> bool {
        match self {
            DockerError::PortNotPublished { .. } | DockerError::Timeout { .. } => true,
            DockerError::CommandFailed { .. } => true,
            DockerError::ExecFailed { .. } | DockerError::DaemonUnavailable => false,
        }
    }
}

impl fmt::Display for DockerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DockerError::Timeout { command, timeout } => {
                write!(
                    f,
                    "Timed out running '{}' (exceeded {} seconds)",
                    command,
                    timeout.as_secs()
                )
            }
            DockerError::CommandFailed {
                command,
                stderr,
                exit_code,
            } => {
                if let Some(code) = exit_code {
                    write!(f, "'{}' failed (exit code {}): {}", command, code, stderr)
                } else {
                    write!(f, "'{}' failed: {}", command, stderr)
                }
            }
            DockerError::ExecFailed { command, source } => {
                write!(f, "Failed to execute '{}': {}", command, source)
            }
            DockerError::PortNotPublished { container, port } => {
                write!(
                    f,
                    "Container '{}' has no host binding for port {}/tcp",
                    container, port
                )
            }
            DockerError::DaemonUnavailable => {
                write!(f, "Docker daemon is not responding")
            }
        }
    }
}

impl std::error::Error for DockerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DockerError::ExecFailed { source, .. } => Some(source),
            _ => None,
        }
    }
}
