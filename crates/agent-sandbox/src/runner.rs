//! Command Runner Abstraction.
//!
//! The container backend talks to the engine only through [`CommandRunner`],
//! so its argument construction (mount, network and capability flags, exec
//! wrapper scripts) can be verified with [`RecordingRunner`] and no live
//! engine.

use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::{SandboxError, SandboxResult};
use crate::process::exit_code_of;

/// Output of one engine CLI invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl RunOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Invokes the container engine CLI.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Name of the engine, for error messages.
    fn engine(&self) -> &str;

    /// Run the engine with `args`, bounded by `timeout`.
    async fn run(&self, args: &[String], timeout: Duration) -> SandboxResult<RunOutput>;
}

/// Runs the real engine binary (`docker` / `podman`).
#[derive(Debug, Clone)]
pub struct CliRunner {
    engine: String,
}

impl CliRunner {
    pub fn new(engine: impl Into<String>) -> Self {
        Self {
            engine: engine.into(),
        }
    }
}

#[async_trait]
impl CommandRunner for CliRunner {
    fn engine(&self) -> &str {
        &self.engine
    }

    async fn run(&self, args: &[String], timeout: Duration) -> SandboxResult<RunOutput> {
        debug!(engine = %self.engine, args = ?args, "engine call");
        let child = Command::new(&self.engine)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SandboxError::EngineUnavailable {
                engine: self.engine.clone(),
                reason: e.to_string(),
            })?;

        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| SandboxError::Timeout {
                command: format!("{} {}", self.engine, args.join(" ")),
                limit_ms: timeout.as_millis() as u64,
            })??;

        Ok(RunOutput {
            exit_code: exit_code_of(output.status),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

type Responder = Box<dyn Fn(&[String]) -> RunOutput + Send + Sync>;

/// Fake runner that records every invocation and answers from a closure.
pub struct RecordingRunner {
    engine: String,
    calls: Mutex<Vec<Vec<String>>>,
    responder: Responder,
}

impl RecordingRunner {
    pub fn new(responder: impl Fn(&[String]) -> RunOutput + Send + Sync + 'static) -> Self {
        Self {
            engine: "docker".to_string(),
            calls: Mutex::new(Vec::new()),
            responder: Box::new(responder),
        }
    }

    /// Every call succeeds with empty output.
    pub fn succeeding() -> Self {
        Self::new(|_| RunOutput::ok(""))
    }

    /// Argument vectors of every call so far, in order.
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Calls whose first argument is `subcommand`.
    pub fn calls_to(&self, subcommand: &str) -> Vec<Vec<String>> {
        self.calls()
            .into_iter()
            .filter(|args| args.first().map(String::as_str) == Some(subcommand))
            .collect()
    }
}

impl std::fmt::Debug for RecordingRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingRunner")
            .field("engine", &self.engine)
            .field("calls", &self.calls.lock().map(|c| c.len()).unwrap_or(0))
            .finish()
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    fn engine(&self) -> &str {
        &self.engine
    }

    async fn run(&self, args: &[String], _timeout: Duration) -> SandboxResult<RunOutput> {
        self.calls.lock().unwrap_or_else(|p| p.into_inner()).push(args.to_vec());
        Ok((self.responder)(args))
    }
}
