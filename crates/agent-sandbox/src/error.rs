//! Error types for the sandbox crate.

use std::path::PathBuf;

/// Errors produced by the sandbox layer.
///
/// Ordinary command failures are *not* errors: a nonzero exit, a working
/// directory outside the boundary, or a guard match all come back as a
/// [`CommandResult`](crate::CommandResult). These variants cover the hard
/// faults callers must handle.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("path is outside the sandbox: {}", path.display())]
    OutsideSandbox { path: PathBuf },

    #[error("command timed out after {limit_ms}ms and was terminated: {command}")]
    Timeout { command: String, limit_ms: u64 },

    #[error("failed to start container with {engine} (image {image}): {reason}")]
    ContainerStartup {
        engine: String,
        image: String,
        reason: String,
    },

    #[error("container engine `{engine}` is unavailable: {reason}")]
    EngineUnavailable { engine: String, reason: String },

    #[error("container engine command `{args}` exited with {exit_code}: {stderr}")]
    EngineCommand {
        args: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("job protocol error: {0}")]
    Protocol(String),

    #[error("not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("invalid pattern: {0}")]
    InvalidPattern(String),

    #[error("invalid sandbox configuration: {0}")]
    InvalidConfig(String),

    #[error("config parse error: {0}")]
    Config(#[from] serde_json::Error),

    #[error("sandbox has been disposed")]
    Disposed,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for sandbox operations.
pub type SandboxResult<T> = std::result::Result<T, SandboxError>;

impl SandboxError {
    /// Map an I/O error on `path` to `NotFound` when appropriate.
    pub(crate) fn io_at(err: std::io::Error, path: &std::path::Path) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            SandboxError::NotFound {
                path: path.to_path_buf(),
            }
        } else {
            SandboxError::Io(err)
        }
    }
}
