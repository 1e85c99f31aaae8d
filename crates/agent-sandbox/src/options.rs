//! Construction-time and per-call configuration.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{SandboxError, SandboxResult};

fn default_true() -> bool {
    true
}

fn default_timeout_ms() -> u64 {
    120_000
}

/// Configuration for a sandbox instance. Immutable once the sandbox is built.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SandboxOptions {
    /// Sandbox root. Relative paths resolve against it.
    pub working_directory: PathBuf,
    /// Additional absolute roots outside the working directory that are permitted.
    #[serde(default)]
    pub allow_paths: Vec<PathBuf>,
    /// When `false`, every path is permitted.
    #[serde(default = "default_true")]
    pub enforce_boundary: bool,
    /// Environment merged into every command.
    #[serde(default)]
    pub environment: HashMap<String, String>,
    /// Default wall-clock limit for foreground commands (milliseconds).
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Container isolation. `None` selects the host backend.
    #[serde(default)]
    pub isolation: Option<ContainerOptions>,
}

impl SandboxOptions {
    /// Options rooted at `working_directory` with defaults for everything else.
    pub fn new(working_directory: impl Into<PathBuf>) -> Self {
        Self {
            working_directory: working_directory.into(),
            allow_paths: Vec::new(),
            enforce_boundary: true,
            environment: HashMap::new(),
            timeout_ms: default_timeout_ms(),
            isolation: None,
        }
    }

    pub fn with_allow_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.allow_paths.push(path.into());
        self
    }

    pub fn with_enforce_boundary(mut self, enforce: bool) -> Self {
        self.enforce_boundary = enforce;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_isolation(mut self, isolation: ContainerOptions) -> Self {
        self.isolation = Some(isolation);
        self
    }

    /// Default foreground timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Load options from a JSON config file.
    pub fn from_json_file(path: &Path) -> SandboxResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| SandboxError::io_at(e, path))?;
        let options: SandboxOptions = serde_json::from_str(&raw)?;
        options.validate()?;
        Ok(options)
    }

    /// Reject configurations no backend can honour.
    pub fn validate(&self) -> SandboxResult<()> {
        if self.working_directory.as_os_str().is_empty() {
            return Err(SandboxError::InvalidConfig(
                "working_directory must not be empty".into(),
            ));
        }
        if let Some(relative) = self.allow_paths.iter().find(|p| !p.is_absolute()) {
            return Err(SandboxError::InvalidConfig(format!(
                "allow path must be absolute: {}",
                relative.display()
            )));
        }
        if self.timeout_ms == 0 {
            return Err(SandboxError::InvalidConfig(
                "timeout_ms must be greater than zero".into(),
            ));
        }
        if let Some(isolation) = &self.isolation {
            if isolation.image.trim().is_empty() {
                return Err(SandboxError::InvalidConfig(
                    "container image must not be empty".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Which container engine CLI drives the container backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerRuntime {
    #[default]
    Docker,
    Podman,
}

impl ContainerRuntime {
    /// Name of the engine binary on `PATH`.
    pub fn binary(&self) -> &'static str {
        match self {
            ContainerRuntime::Docker => "docker",
            ContainerRuntime::Podman => "podman",
        }
    }
}

impl std::fmt::Display for ContainerRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.binary())
    }
}

fn default_image() -> String {
    "debian:bookworm-slim".to_string()
}

fn default_network_mode() -> String {
    "none".to_string()
}

fn default_startup_timeout_ms() -> u64 {
    60_000
}

/// Container-specific settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContainerOptions {
    #[serde(default)]
    pub runtime: ContainerRuntime,
    #[serde(default = "default_image")]
    pub image: String,
    /// Value for `--network`. Networking is off unless configured.
    #[serde(default = "default_network_mode")]
    pub network_mode: String,
    /// Where job bookkeeping files live on the host.
    #[serde(default)]
    pub state_directory: Option<PathBuf>,
    /// Value for `--user`. Defaults to the host uid:gid on Unix.
    #[serde(default)]
    pub user: Option<String>,
    /// Passed to `run` verbatim, before the image.
    #[serde(default)]
    pub extra_args: Vec<String>,
    /// Bound on each engine call made while starting the container.
    #[serde(default = "default_startup_timeout_ms")]
    pub startup_timeout_ms: u64,
}

impl Default for ContainerOptions {
    fn default() -> Self {
        Self {
            runtime: ContainerRuntime::default(),
            image: default_image(),
            network_mode: default_network_mode(),
            state_directory: None,
            user: None,
            extra_args: Vec::new(),
            startup_timeout_ms: default_startup_timeout_ms(),
        }
    }
}

impl ContainerOptions {
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    pub fn with_runtime(mut self, runtime: ContainerRuntime) -> Self {
        self.runtime = runtime;
        self
    }

    pub fn with_network_mode(mut self, mode: impl Into<String>) -> Self {
        self.network_mode = mode.into();
        self
    }

    pub fn with_state_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_directory = Some(dir.into());
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }
}

/// Per-call command settings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandOptions {
    /// Overrides the sandbox root as the command's working directory.
    pub working_directory: Option<PathBuf>,
    /// Return immediately with a job handle instead of waiting.
    pub background: bool,
    /// Merged over the sandbox environment.
    pub environment: HashMap<String, String>,
    /// Overrides the sandbox default timeout.
    pub timeout: Option<Duration>,
}

impl CommandOptions {
    pub fn background() -> Self {
        Self {
            background: true,
            ..Self::default()
        }
    }

    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Per-call timeout, else the sandbox default.
    pub fn effective_timeout(&self, sandbox: &SandboxOptions) -> Duration {
        self.timeout.unwrap_or_else(|| sandbox.timeout())
    }

    /// Sandbox environment with per-call overrides applied.
    pub fn merged_environment(&self, sandbox: &SandboxOptions) -> HashMap<String, String> {
        let mut env = sandbox.environment.clone();
        env.extend(
            self.environment
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        env
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_minimal_json() {
        let opts: SandboxOptions =
            serde_json::from_str(r#"{"working_directory": "/tmp/ws"}"#).unwrap();
        assert_eq!(opts.working_directory, PathBuf::from("/tmp/ws"));
        assert!(opts.enforce_boundary);
        assert!(opts.allow_paths.is_empty());
        assert_eq!(opts.timeout(), Duration::from_secs(120));
        assert!(opts.isolation.is_none());
    }

    #[test]
    fn test_container_defaults_from_json() {
        let opts: SandboxOptions = serde_json::from_str(
            r#"{"working_directory": "/tmp/ws", "isolation": {"runtime": "podman"}}"#,
        )
        .unwrap();
        let iso = opts.isolation.unwrap();
        assert_eq!(iso.runtime, ContainerRuntime::Podman);
        assert_eq!(iso.image, "debian:bookworm-slim");
        assert_eq!(iso.network_mode, "none");
    }

    #[test]
    fn test_validate_rejects_relative_allow_path() {
        let opts = SandboxOptions::new("/tmp/ws").with_allow_path("relative/dir");
        let err = opts.validate().unwrap_err();
        assert!(err.to_string().contains("relative/dir"));
    }

    #[test]
    fn test_validate_rejects_zero_timeout_and_empty_image() {
        let opts = SandboxOptions::new("/tmp/ws").with_timeout(Duration::ZERO);
        assert!(opts.validate().is_err());

        let opts =
            SandboxOptions::new("/tmp/ws").with_isolation(ContainerOptions::default().with_image(" "));
        assert!(opts.validate().is_err());
    }

    #[test]
    fn test_command_options_merge_and_timeout() {
        let sandbox = SandboxOptions::new("/tmp/ws")
            .with_env("A", "1")
            .with_env("B", "2")
            .with_timeout(Duration::from_secs(5));
        let call = CommandOptions::default().with_env("B", "override");

        let env = call.merged_environment(&sandbox);
        assert_eq!(env.get("A").map(String::as_str), Some("1"));
        assert_eq!(env.get("B").map(String::as_str), Some("override"));
        assert_eq!(call.effective_timeout(&sandbox), Duration::from_secs(5));

        let call = call.with_timeout(Duration::from_millis(10));
        assert_eq!(call.effective_timeout(&sandbox), Duration::from_millis(10));
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sandbox.json");
        std::fs::write(
            &path,
            r#"{"working_directory": "/tmp/ws", "allow_paths": ["/opt/data"], "timeout_ms": 500}"#,
        )
        .unwrap();
        let opts = SandboxOptions::from_json_file(&path).unwrap();
        assert_eq!(opts.allow_paths, vec![PathBuf::from("/opt/data")]);
        assert_eq!(opts.timeout_ms, 500);

        let missing = SandboxOptions::from_json_file(&dir.path().join("nope.json"));
        assert!(matches!(missing, Err(SandboxError::NotFound { .. })));
    }
}
