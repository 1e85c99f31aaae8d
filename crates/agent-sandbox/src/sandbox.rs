//! The sandbox contract shared by every backend.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::SandboxResult;
use crate::options::{CommandOptions, SandboxOptions};
use crate::types::{
    CommandResult, DirectoryEntry, GrepOptions, GrepResult, ProcessId, ProcessInfo, SandboxId,
};

/// Filesystem and command access constrained to a boundary.
///
/// Callers obtain an implementation from [`create_sandbox`](crate::create_sandbox)
/// and never learn which backend is underneath.
///
/// Error contract:
/// - `execute_command` reports ordinary failure (nonzero exit, working
///   directory outside the boundary, blocked command) in the returned
///   [`CommandResult`]; it errors only on timeout, disposal, or internal faults.
/// - File operations fail with `OutsideSandbox` on a boundary violation.
/// - Job queries on an unknown handle return `None` / `false`.
#[async_trait]
pub trait Sandbox: Send + Sync {
    fn id(&self) -> &SandboxId;

    fn options(&self) -> &SandboxOptions;

    /// The sandbox root, absolute and normalized.
    fn working_directory(&self) -> &Path;

    async fn execute_command(
        &self,
        command: &str,
        options: CommandOptions,
    ) -> SandboxResult<CommandResult>;

    async fn read_file(&self, path: &Path) -> SandboxResult<String>;

    /// Creates parent directories as needed.
    async fn write_file(&self, path: &Path, content: &str) -> SandboxResult<()>;

    async fn exists(&self, path: &Path) -> SandboxResult<bool>;

    async fn create_directory(&self, path: &Path) -> SandboxResult<()>;

    /// Removes a file or a whole directory tree.
    async fn delete(&self, path: &Path) -> SandboxResult<()>;

    async fn list_directory(&self, path: &Path) -> SandboxResult<Vec<DirectoryEntry>>;

    /// Pattern is relative to the sandbox root.
    async fn glob(&self, pattern: &str) -> SandboxResult<Vec<PathBuf>>;

    async fn grep(&self, pattern: &str, options: GrepOptions) -> SandboxResult<Vec<GrepResult>>;

    async fn get_process(&self, id: ProcessId) -> SandboxResult<Option<ProcessInfo>>;

    /// `true` if a running job was terminated, `false` if it had already
    /// finished or is unknown.
    async fn kill_process(&self, id: ProcessId) -> SandboxResult<bool>;

    async fn list_processes(&self) -> SandboxResult<Vec<ProcessInfo>>;

    /// Terminate every job still owned and release backend resources.
    /// Idempotent.
    async fn dispose(&self) -> SandboxResult<()>;
}
