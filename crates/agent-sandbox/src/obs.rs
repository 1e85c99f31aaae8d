//! Structured observability hooks for sandbox lifecycle events.
//!
//! This module provides:
//! - Sandbox-scoped tracing spans via [`sandbox_span`]
//! - Emission functions for key lifecycle events: creation, command start and
//!   finish, rejections, background jobs, and disposal
//!
//! Events are emitted at `info!` level (filter with `RUST_LOG`), rejections
//! and best-effort cleanup failures at `warn!`.

use tracing::{info, warn};

use crate::types::{ProcessId, SandboxId};

/// Span carrying the sandbox id and backend.
///
/// Attach it to backend futures with [`tracing::Instrument`]; an entered
/// guard cannot be held across an `.await` in a `Send` future.
///
/// # Example
///
/// ```ignore
/// use tracing::Instrument;
/// work.instrument(obs::sandbox_span(sandbox.id(), "host")).await
/// ```
pub fn sandbox_span(sandbox_id: &SandboxId, backend: &str) -> tracing::Span {
    tracing::info_span!("sandbox", sandbox_id = %sandbox_id.short(), backend = %backend)
}

/// Emit event: sandbox created.
pub fn emit_sandbox_created(sandbox_id: &SandboxId, backend: &str, root: &std::path::Path) {
    info!(
        event = "sandbox.created",
        sandbox_id = %sandbox_id,
        backend = %backend,
        root = %root.display(),
    );
}

/// Emit event: foreground command started.
pub fn emit_command_started(sandbox_id: &SandboxId, command: &str) {
    info!(event = "command.started", sandbox_id = %sandbox_id.short(), command = %command);
}

/// Emit event: foreground command finished.
pub fn emit_command_finished(sandbox_id: &SandboxId, exit_code: i32, duration_ms: u64) {
    info!(
        event = "command.finished",
        sandbox_id = %sandbox_id.short(),
        exit_code = exit_code,
        duration_ms = duration_ms,
    );
}

/// Emit event: command refused before anything was spawned.
pub fn emit_command_rejected(sandbox_id: &SandboxId, command: &str, reason: &str) {
    warn!(
        event = "command.rejected",
        sandbox_id = %sandbox_id.short(),
        command = %command,
        reason = %reason,
    );
}

/// Emit event: command exceeded its timeout and its process group was killed.
pub fn emit_command_timed_out(sandbox_id: &SandboxId, command: &str, limit_ms: u64) {
    warn!(
        event = "command.timed_out",
        sandbox_id = %sandbox_id.short(),
        command = %command,
        limit_ms = limit_ms,
    );
}

/// Emit event: background job registered.
pub fn emit_job_started(sandbox_id: &SandboxId, job: ProcessId, command: &str) {
    info!(event = "job.started", sandbox_id = %sandbox_id.short(), job = %job, command = %command);
}

/// Emit event: background job killed on request.
pub fn emit_job_killed(sandbox_id: &SandboxId, job: ProcessId) {
    info!(event = "job.killed", sandbox_id = %sandbox_id.short(), job = %job);
}

/// Emit event: sandbox disposed, with the number of jobs still running at the time.
pub fn emit_sandbox_disposed(sandbox_id: &SandboxId, terminated_jobs: usize) {
    info!(
        event = "sandbox.disposed",
        sandbox_id = %sandbox_id,
        terminated_jobs = terminated_jobs,
    );
}

/// Emit event: best-effort cleanup step failed (warning level).
pub fn emit_cleanup_error(sandbox_id: &SandboxId, step: &str, error: &dyn std::fmt::Display) {
    warn!(event = "sandbox.cleanup_error", sandbox_id = %sandbox_id.short(), step = %step, error = %error);
}
