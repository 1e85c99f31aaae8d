//! Host backend: commands run as direct child processes of this process.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn, Instrument};

use crate::boundary::BoundaryChecker;
use crate::error::{SandboxError, SandboxResult};
use crate::fs_ops::SandboxFs;
use crate::guard::CommandGuard;
use crate::jobs::{JobTable, KILLED_EXIT_CODE};
use crate::obs;
use crate::options::{CommandOptions, SandboxOptions};
use crate::process::{exit_code_of, is_process_alive, kill_process_group, new_process_group};
use crate::sandbox::Sandbox;
use crate::types::{
    CommandResult, DirectoryEntry, GrepOptions, GrepResult, ProcessId, ProcessInfo, SandboxId,
};

/// How long to keep reading pipes after the leader exits. Grandchildren that
/// inherited the pipes can otherwise hold them open indefinitely.
const IO_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Bytes read from one pipe, shared with the task reading it so a reader
/// cut off at the drain deadline still leaves what it got.
#[derive(Debug, Clone, Default)]
struct Capture(Arc<Mutex<Vec<u8>>>);

impl Capture {
    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<u8>> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn append(&self, bytes: &[u8]) {
        self.lock().extend_from_slice(bytes);
    }

    fn text(&self) -> String {
        String::from_utf8_lossy(&self.lock()).into_owned()
    }
}

#[derive(Debug, Default)]
struct JobState {
    /// Set once the shell has been reaped. Its pid, and so its process
    /// group id, may be reused from then on.
    leader_exit: Option<i32>,
    exit_code: Option<i32>,
    ended_at: Option<DateTime<Utc>>,
}

/// A background job with a live process handle.
#[derive(Debug)]
struct HostJob {
    id: ProcessId,
    command: String,
    pid: Option<u32>,
    started_at: DateTime<Utc>,
    stdout: Capture,
    stderr: Capture,
    state: Mutex<JobState>,
}

impl HostJob {
    fn lock(&self) -> std::sync::MutexGuard<'_, JobState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_running(&self) -> bool {
        self.lock().exit_code.is_none()
    }

    /// Record the terminal state unless one is already recorded.
    fn finish(&self, exit_code: i32) -> bool {
        let mut state = self.lock();
        if state.exit_code.is_some() {
            return false;
        }
        state.exit_code = Some(exit_code);
        state.ended_at = Some(Utc::now());
        true
    }

    fn info(&self) -> ProcessInfo {
        let state = self.lock();
        ProcessInfo {
            id: self.id,
            command: self.command.clone(),
            is_running: state.exit_code.is_none(),
            exit_code: state.exit_code,
            stdout: self.stdout.text(),
            stderr: self.stderr.text(),
            started_at: self.started_at,
            ended_at: state.ended_at,
        }
    }

    fn leader_exited(&self, exit_code: i32) {
        self.lock().leader_exit = Some(exit_code);
    }

    /// SIGKILL the job's group. A job whose shell is already reaped is only
    /// marked finished, with the shell's own exit code.
    fn terminate(&self) -> bool {
        let leader_exit = {
            let state = self.lock();
            if state.exit_code.is_some() {
                return false;
            }
            state.leader_exit
        };
        if let Some(code) = leader_exit {
            debug!(job = %self.id, exit_code = code, "job leader already exited, not signalling");
            self.finish(code);
            return false;
        }
        if let Some(pid) = self.pid {
            if let Err(e) = kill_process_group(pid) {
                warn!(job = %self.id, pid, error = %e, "process group kill failed");
            }
        }
        self.finish(KILLED_EXIT_CODE)
    }
}

/// Sandbox whose commands run as host subprocesses.
pub struct HostSandbox {
    id: SandboxId,
    options: SandboxOptions,
    fs: SandboxFs,
    jobs: JobTable<HostJob>,
    disposed: AtomicBool,
}

impl HostSandbox {
    pub fn new(options: SandboxOptions) -> SandboxResult<Self> {
        options.validate()?;
        let boundary = BoundaryChecker::from_options(&options);
        let id = SandboxId::new();
        obs::emit_sandbox_created(&id, "host", boundary.root());
        Ok(Self {
            id,
            options,
            fs: SandboxFs::new(boundary),
            jobs: JobTable::new(),
            disposed: AtomicBool::new(false),
        })
    }

    fn ensure_live(&self) -> SandboxResult<()> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(SandboxError::Disposed);
        }
        Ok(())
    }

    fn shell_command(&self, command: &str, cwd: &Path, env: &HashMap<String, String>) -> Command {
        let mut cmd = if cfg!(windows) {
            let mut c = Command::new("cmd");
            c.arg("/C").arg(command);
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c").arg(command);
            c
        };
        cmd.current_dir(cwd)
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        new_process_group(&mut cmd);
        cmd
    }

    async fn run_foreground(
        &self,
        command: &str,
        cwd: &Path,
        env: &HashMap<String, String>,
        timeout: Duration,
    ) -> SandboxResult<CommandResult> {
        let start = Instant::now();
        obs::emit_command_started(&self.id, command);

        let mut child = self.shell_command(command, cwd, env).kill_on_drop(true).spawn()?;
        let pid = child.id();
        let (stdout, stderr) = (Capture::default(), Capture::default());
        let out = tokio::spawn(pump(child.stdout.take(), stdout.clone()));
        let err = tokio::spawn(pump(child.stderr.take(), stderr.clone()));

        let status = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                let limit_ms = timeout.as_millis() as u64;
                kill_tree(&mut child, pid).await;
                out.abort();
                err.abort();
                obs::emit_command_timed_out(&self.id, command, limit_ms);
                return Err(SandboxError::Timeout {
                    command: command.to_string(),
                    limit_ms,
                });
            }
        };

        drain(out, err).await;
        let exit_code = exit_code_of(status);
        let duration = start.elapsed();
        obs::emit_command_finished(&self.id, exit_code, duration.as_millis() as u64);

        Ok(CommandResult {
            exit_code,
            stdout: stdout.text(),
            stderr: stderr.text(),
            process_id: None,
            duration,
        })
    }

    async fn execute(
        &self,
        command: &str,
        options: CommandOptions,
    ) -> SandboxResult<CommandResult> {
        self.ensure_live()?;

        let requested = options
            .working_directory
            .clone()
            .unwrap_or_else(|| self.working_directory().to_path_buf());
        let cwd = match self.fs.boundary().check(&requested) {
            Ok(cwd) => cwd,
            Err(_) => {
                let reason = format!(
                    "working directory is outside the sandbox: {}",
                    self.fs.boundary().resolve(&requested).display()
                );
                obs::emit_command_rejected(&self.id, command, &reason);
                return Ok(CommandResult::rejected(reason));
            }
        };
        if !cwd.is_dir() {
            let reason = format!("working directory does not exist: {}", cwd.display());
            obs::emit_command_rejected(&self.id, command, &reason);
            return Ok(CommandResult::rejected(reason));
        }
        if let Some(hit) = CommandGuard::standard().check(command) {
            let reason = hit.to_string();
            obs::emit_command_rejected(&self.id, command, &reason);
            return Ok(CommandResult::rejected(reason));
        }

        let env = options.merged_environment(&self.options);
        if options.background {
            self.start_background(command, &cwd, &env)
        } else {
            let timeout = options.effective_timeout(&self.options);
            self.run_foreground(command, &cwd, &env, timeout).await
        }
    }

    fn start_background(
        &self,
        command: &str,
        cwd: &Path,
        env: &HashMap<String, String>,
    ) -> SandboxResult<CommandResult> {
        let start = Instant::now();
        let mut child = self.shell_command(command, cwd, env).spawn()?;

        let id = self.jobs.allocate();
        let job = Arc::new(HostJob {
            id,
            command: command.to_string(),
            pid: child.id(),
            started_at: Utc::now(),
            stdout: Capture::default(),
            stderr: Capture::default(),
            state: Mutex::new(JobState::default()),
        });
        self.jobs.insert(id, Arc::clone(&job));
        obs::emit_job_started(&self.id, id, command);

        let out = tokio::spawn(pump(child.stdout.take(), job.stdout.clone()));
        let err = tokio::spawn(pump(child.stderr.take(), job.stderr.clone()));
        tokio::spawn(async move {
            let exit_code = match child.wait().await {
                Ok(status) => exit_code_of(status),
                Err(e) => {
                    warn!(job = %job.id, error = %e, "waiting on background job failed");
                    -1
                }
            };
            job.leader_exited(exit_code);
            // Publish the exit code only once output is captured.
            drain(out, err).await;
            if job.finish(exit_code) {
                debug!(job = %job.id, exit_code, "background job exited");
            }
        });

        Ok(CommandResult::started(id, start.elapsed()))
    }
}

impl Drop for HostSandbox {
    fn drop(&mut self) {
        if self.disposed.load(Ordering::Acquire) {
            return;
        }
        for (_, job) in self.jobs.drain() {
            job.terminate();
        }
    }
}

/// Wait for both pipe readers under a single deadline, then cut them off.
async fn drain(out: JoinHandle<()>, err: JoinHandle<()>) {
    let (out_abort, err_abort) = (out.abort_handle(), err.abort_handle());
    let both = async {
        let _ = tokio::join!(out, err);
    };
    if tokio::time::timeout(IO_DRAIN_TIMEOUT, both).await.is_err() {
        debug!("pipes still open after the leader exited, keeping partial output");
        out_abort.abort();
        err_abort.abort();
    }
}

async fn pump<R: AsyncRead + Unpin>(reader: Option<R>, sink: Capture) {
    let Some(mut reader) = reader else {
        return;
    };
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => sink.append(&chunk[..n]),
        }
    }
}

async fn kill_tree(child: &mut Child, pid: Option<u32>) {
    if let Some(pid) = pid {
        if let Err(e) = kill_process_group(pid) {
            warn!(pid, error = %e, "process group kill failed");
        }
    }
    let _ = child.start_kill();
    let _ = child.wait().await;
    if let Some(pid) = pid {
        debug!(pid, alive = is_process_alive(pid), "process tree terminated");
    }
}

#[async_trait]
impl Sandbox for HostSandbox {
    fn id(&self) -> &SandboxId {
        &self.id
    }

    fn options(&self) -> &SandboxOptions {
        &self.options
    }

    fn working_directory(&self) -> &Path {
        self.fs.boundary().root()
    }

    async fn execute_command(
        &self,
        command: &str,
        options: CommandOptions,
    ) -> SandboxResult<CommandResult> {
        self.execute(command, options)
            .instrument(obs::sandbox_span(&self.id, "host"))
            .await
    }

    async fn read_file(&self, path: &Path) -> SandboxResult<String> {
        self.ensure_live()?;
        self.fs.read_file(path)
    }

    async fn write_file(&self, path: &Path, content: &str) -> SandboxResult<()> {
        self.ensure_live()?;
        self.fs.write_file(path, content)
    }

    async fn exists(&self, path: &Path) -> SandboxResult<bool> {
        self.ensure_live()?;
        self.fs.exists(path)
    }

    async fn create_directory(&self, path: &Path) -> SandboxResult<()> {
        self.ensure_live()?;
        self.fs.create_directory(path)
    }

    async fn delete(&self, path: &Path) -> SandboxResult<()> {
        self.ensure_live()?;
        self.fs.delete(path)
    }

    async fn list_directory(&self, path: &Path) -> SandboxResult<Vec<DirectoryEntry>> {
        self.ensure_live()?;
        self.fs.list_directory(path)
    }

    async fn glob(&self, pattern: &str) -> SandboxResult<Vec<PathBuf>> {
        self.ensure_live()?;
        self.fs.glob(pattern)
    }

    async fn grep(&self, pattern: &str, options: GrepOptions) -> SandboxResult<Vec<GrepResult>> {
        self.ensure_live()?;
        self.fs.grep(pattern, &options)
    }

    async fn get_process(&self, id: ProcessId) -> SandboxResult<Option<ProcessInfo>> {
        self.ensure_live()?;
        Ok(self.jobs.get(id).map(|job| job.info()))
    }

    async fn kill_process(&self, id: ProcessId) -> SandboxResult<bool> {
        self.ensure_live()?;
        let Some(job) = self.jobs.get(id) else {
            return Ok(false);
        };
        let killed = job.terminate();
        if killed {
            obs::emit_job_killed(&self.id, id);
        }
        Ok(killed)
    }

    async fn list_processes(&self) -> SandboxResult<Vec<ProcessInfo>> {
        self.ensure_live()?;
        Ok(self
            .jobs
            .snapshot()
            .into_iter()
            .map(|(_, job)| job.info())
            .collect())
    }

    async fn dispose(&self) -> SandboxResult<()> {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let terminated = self
            .jobs
            .drain()
            .into_iter()
            .filter(|(_, job)| job.terminate())
            .count();
        obs::emit_sandbox_disposed(&self.id, terminated);
        Ok(())
    }
}
