//! Records returned by sandbox operations. Identical across backends.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identity of a sandbox instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SandboxId(pub String);

impl SandboxId {
    /// Generate a new random SandboxId
    pub fn new() -> Self {
        SandboxId(uuid::Uuid::new_v4().to_string())
    }

    /// First 12 characters, used in container names and log lines.
    pub fn short(&self) -> &str {
        match self.0.char_indices().nth(12) {
            Some((end, _)) => &self.0[..end],
            None => &self.0,
        }
    }
}

impl Default for SandboxId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SandboxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque job handle, valid only for the sandbox that issued it.
///
/// This is a sandbox-local sequence number, never an OS or container pid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessId(pub u64);

impl std::fmt::Display for ProcessId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ProcessId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(ProcessId)
    }
}

/// Outcome of `execute_command`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    pub exit_code: i32,
    /// Empty for background calls.
    pub stdout: String,
    /// Empty for background calls.
    pub stderr: String,
    /// Job handle for background calls.
    pub process_id: Option<ProcessId>,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
}

impl CommandResult {
    /// Whether the command exited with code 0.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// A failure that never reached a process: boundary or guard rejection.
    pub(crate) fn rejected(message: impl Into<String>) -> Self {
        Self {
            exit_code: 1,
            stdout: String::new(),
            stderr: message.into(),
            process_id: None,
            duration: Duration::ZERO,
        }
    }

    pub(crate) fn started(id: ProcessId, duration: Duration) -> Self {
        Self {
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
            process_id: Some(id),
            duration,
        }
    }
}

/// Snapshot of a background job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub id: ProcessId,
    pub command: String,
    pub is_running: bool,
    /// `None` until the job's exit status is known.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub name: String,
    pub path: PathBuf,
    pub is_directory: bool,
    pub is_file: bool,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

/// Options for `grep`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GrepOptions {
    /// Directory or file to search. Defaults to the sandbox root.
    pub path: Option<PathBuf>,
    /// File-name glob filter, e.g. `*.rs`.
    pub glob: Option<String>,
    pub case_insensitive: bool,
    pub max_results: Option<usize>,
}

/// A matching line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrepResult {
    pub path: PathBuf,
    /// 1-based.
    pub line_number: usize,
    pub line: String,
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sandbox_ids_are_unique() {
        let a = SandboxId::new();
        let b = SandboxId::new();
        assert_ne!(a, b);
        assert_eq!(a.short().len(), 12);
    }

    #[test]
    fn test_short_id_respects_char_boundaries() {
        let id = SandboxId("ünïcødé-sändbox-ïd".to_string());
        assert_eq!(id.short(), "ünïcødé-sänd");
        assert_eq!(SandboxId("abc".to_string()).short(), "abc");
    }

    #[test]
    fn test_process_id_parses_trimmed() {
        let id: ProcessId = " 42\n".parse().unwrap();
        assert_eq!(id, ProcessId(42));
        assert!("abc".parse::<ProcessId>().is_err());
    }

    #[test]
    fn test_rejected_result_is_soft_failure() {
        let r = CommandResult::rejected("nope");
        assert!(!r.success());
        assert_eq!(r.stderr, "nope");
        assert!(r.process_id.is_none());
    }

    #[test]
    fn test_command_result_serializes_duration_as_ms() {
        let r = CommandResult {
            exit_code: 0,
            stdout: "hi".into(),
            stderr: String::new(),
            process_id: Some(ProcessId(3)),
            duration: Duration::from_millis(1500),
        };
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["duration"], 1500);
        assert_eq!(json["process_id"], 3);
    }
}
