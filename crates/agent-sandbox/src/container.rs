//! Container backend.
//!
//! One long-lived container per sandbox. Host directories are bind mounted in
//! and every command, foreground or background, runs through the same job
//! primitive: a wrapper script started with `exec` that detaches the command
//! into its own process group and leaves `stdout`, `stderr` and `exit_code`
//! files in a mounted state directory. The host reads those files to learn
//! what happened, so no handle into the container's process table is needed.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn, Instrument};

use crate::boundary::{is_under, BoundaryChecker};
use crate::error::{SandboxError, SandboxResult};
use crate::fs_ops::SandboxFs;
use crate::guard::CommandGuard;
use crate::jobs::{JobTable, KILLED_EXIT_CODE};
use crate::obs;
use crate::options::{CommandOptions, ContainerOptions, SandboxOptions};
use crate::runner::{CommandRunner, RunOutput};
use crate::sandbox::Sandbox;
use crate::types::{
    CommandResult, DirectoryEntry, GrepOptions, GrepResult, ProcessId, ProcessInfo, SandboxId,
};

/// Container path of the working directory.
pub const WORKSPACE_MOUNT: &str = "/workspace";
/// Container path of the job state directory when it is mounted separately.
pub const STATE_MOUNT: &str = "/sandbox-state";
const ALLOW_MOUNT_PREFIX: &str = "/mnt/allow";

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);
const READY_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Bound on engine calls made after startup (exec, kill, rm).
const ENGINE_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// One bind mount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mount {
    pub host: PathBuf,
    pub container: PathBuf,
}

impl Mount {
    fn new(host: impl Into<PathBuf>, container: impl Into<PathBuf>) -> Self {
        Self {
            host: host.into(),
            container: container.into(),
        }
    }

    fn volume_arg(&self) -> String {
        format!("{}:{}", self.host.display(), self.container.display())
    }
}

/// Host to container path mapping, fixed at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MountTable {
    mounts: Vec<Mount>,
}

impl MountTable {
    /// The working directory mounts at [`WORKSPACE_MOUNT`]. Allow-paths not
    /// already nested under it get `/mnt/allow<N>`, numbered from 0. The state
    /// directory gets [`STATE_MOUNT`] unless the workspace mount covers it.
    pub fn compute(boundary: &BoundaryChecker, state_directory: &Path) -> Self {
        let root = boundary.root();
        let mut mounts = vec![Mount::new(root, WORKSPACE_MOUNT)];

        let mut next = 0;
        for allowed in boundary.allow_paths() {
            if is_under(allowed, root) || mounts.iter().any(|m| &m.host == allowed) {
                debug!(path = %allowed.display(), "allow path already covered, not mounted");
                continue;
            }
            mounts.push(Mount::new(allowed, format!("{ALLOW_MOUNT_PREFIX}{next}")));
            next += 1;
        }

        let state = path_clean::clean(state_directory);
        if !is_under(&state, root) {
            mounts.push(Mount::new(state, STATE_MOUNT));
        }
        Self { mounts }
    }

    pub fn mounts(&self) -> &[Mount] {
        &self.mounts
    }

    /// Map a host path through the longest matching mount.
    pub fn to_container_path(&self, host: &Path) -> Option<PathBuf> {
        let host = path_clean::clean(host);
        self.mounts
            .iter()
            .filter_map(|m| host.strip_prefix(&m.host).ok().map(|rest| (m, rest)))
            .max_by_key(|(m, _)| m.host.components().count())
            .map(|(m, rest)| join_rest(&m.container, rest))
    }

    /// Inverse of [`to_container_path`](Self::to_container_path).
    pub fn to_host_path(&self, container: &Path) -> Option<PathBuf> {
        let container = path_clean::clean(container);
        self.mounts
            .iter()
            .filter_map(|m| container.strip_prefix(&m.container).ok().map(|rest| (m, rest)))
            .max_by_key(|(m, _)| m.container.components().count())
            .map(|(m, rest)| join_rest(&m.host, rest))
    }

    fn volume_args(&self) -> Vec<String> {
        self.mounts
            .iter()
            .flat_map(|m| ["-v".to_string(), m.volume_arg()])
            .collect()
    }
}

fn join_rest(base: &Path, rest: &Path) -> PathBuf {
    if rest.as_os_str().is_empty() {
        base.to_path_buf()
    } else {
        base.join(rest)
    }
}

/// Default job state directory: `<temp>/agent-sandbox/<sandbox id>`.
pub fn default_state_directory(id: &SandboxId) -> PathBuf {
    std::env::temp_dir().join("agent-sandbox").join(&id.0)
}

/// State directory for a sandbox: the configured one resolved against the
/// working directory, else the default.
pub fn state_directory_for(
    options: &ContainerOptions,
    boundary: &BoundaryChecker,
    id: &SandboxId,
) -> PathBuf {
    match &options.state_directory {
        Some(dir) => boundary.resolve(dir),
        None => default_state_directory(id),
    }
}

/// Host uid:gid, so files written through bind mounts are not root-owned.
#[cfg(unix)]
fn host_user() -> Option<String> {
    let uid = unsafe { libc::getuid() };
    let gid = unsafe { libc::getgid() };
    Some(format!("{uid}:{gid}"))
}

#[cfg(not(unix))]
fn host_user() -> Option<String> {
    None
}

/// Arguments for `<engine> run` that start the long-lived container.
pub fn launch_args(
    name: &str,
    options: &ContainerOptions,
    mounts: &MountTable,
    environment: &HashMap<String, String>,
) -> Vec<String> {
    let mut args: Vec<String> = ["run", "-d", "--name", name, "--init"]
        .iter()
        .map(|s| s.to_string())
        .collect();

    args.push("--network".to_string());
    args.push(options.network_mode.clone());

    args.push("--cap-drop".to_string());
    args.push("ALL".to_string());
    // enough for an unprivileged user to manage its own files and jobs
    for cap in ["CHOWN", "DAC_OVERRIDE", "FOWNER", "KILL", "SETGID", "SETUID"] {
        args.push("--cap-add".to_string());
        args.push(cap.to_string());
    }
    args.push("--security-opt".to_string());
    args.push("no-new-privileges".to_string());

    if let Some(user) = options.user.clone().or_else(host_user) {
        args.push("--user".to_string());
        args.push(user);
    }

    args.push("-w".to_string());
    args.push(WORKSPACE_MOUNT.to_string());
    args.extend(mounts.volume_args());
    args.extend(env_args(environment));
    args.extend(options.extra_args.iter().cloned());

    args.push(options.image.clone());
    args.push("sleep".to_string());
    args.push("infinity".to_string());
    args
}

/// `-e K=V` pairs in key order.
fn env_args(environment: &HashMap<String, String>) -> Vec<String> {
    environment
        .iter()
        .collect::<BTreeMap<_, _>>()
        .into_iter()
        .flat_map(|(k, v)| ["-e".to_string(), format!("{k}={v}")])
        .collect()
}

/// Quote for a POSIX shell single-quoted string.
fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

/// Script that starts `command` detached in its own process group and prints
/// its pid. `job_dir` is the job's directory as seen inside the container.
///
/// The command runs in a child shell so `exit`, `exec` or `set -e` cannot skip
/// the exit-code write. The code is written to a temp file and renamed, so a
/// reader never sees a partial `exit_code`, and it appears only after the
/// command has finished writing its output.
pub fn wrapper_script(command: &str, job_dir: &Path) -> String {
    let file = |name: &str| shell_quote(&job_dir.join(name).to_string_lossy());
    let tmp = file("exit_code.tmp");
    let inner = format!(
        "sh -c {}\necho $? > {tmp} && mv {tmp} {}",
        shell_quote(command),
        file("exit_code")
    );
    format!(
        "setsid sh -c {} > {} 2> {} < /dev/null & echo $!",
        shell_quote(&inner),
        file("stdout"),
        file("stderr"),
    )
}

/// Liveness check through the shell builtin; images need not ship `kill`.
fn liveness_script(pid: u32) -> String {
    format!("if kill -0 {pid} 2>/dev/null; then echo alive; else echo gone; fi")
}

/// SIGKILL the group led by `pid`, falling back to the pid alone.
fn kill_script(pid: u32) -> String {
    format!(
        "if kill -9 -- -{pid} 2>/dev/null || kill -9 {pid} 2>/dev/null; then echo killed; else echo gone; fi"
    )
}

/// `true` for `yes`, `false` for `no`, anything else is a protocol fault.
fn parse_verdict(stdout: &str, yes: &str, no: &str) -> SandboxResult<bool> {
    match stdout.trim() {
        s if s == yes => Ok(true),
        s if s == no => Ok(false),
        other => Err(SandboxError::Protocol(format!(
            "expected `{yes}` or `{no}`, got {other:?}"
        ))),
    }
}

fn exec_args(
    container: &str,
    cwd: &Path,
    environment: &HashMap<String, String>,
    script: &str,
) -> Vec<String> {
    let mut args = vec!["exec".to_string()];
    args.extend(env_args(environment));
    args.push("-w".to_string());
    args.push(cwd.to_string_lossy().into_owned());
    args.push(container.to_string());
    args.push("sh".to_string());
    args.push("-c".to_string());
    args.push(script.to_string());
    args
}

fn parse_pid(stdout: &str) -> SandboxResult<u32> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .last()
        .and_then(|line| line.parse::<u32>().ok())
        .filter(|pid| *pid > 0)
        .ok_or_else(|| SandboxError::Protocol(format!("expected a job pid, got {stdout:?}")))
}

#[derive(Debug, Default)]
struct JobState {
    finished: bool,
    exit_code: Option<i32>,
    ended_at: Option<DateTime<Utc>>,
}

/// A job known only through its files and in-container pid.
#[derive(Debug)]
struct ContainerJob {
    id: ProcessId,
    command: String,
    pid: u32,
    dir: PathBuf,
    started_at: DateTime<Utc>,
    state: Mutex<JobState>,
}

impl ContainerJob {
    fn lock(&self) -> std::sync::MutexGuard<'_, JobState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_finished(&self) -> bool {
        self.lock().finished
    }

    /// Record the terminal state unless one is already recorded.
    fn finish(&self, exit_code: Option<i32>) -> bool {
        let mut state = self.lock();
        if state.finished {
            return false;
        }
        state.finished = true;
        state.exit_code = exit_code;
        state.ended_at = Some(Utc::now());
        true
    }

    fn read_exit_code(&self) -> SandboxResult<Option<i32>> {
        match std::fs::read_to_string(self.dir.join("exit_code")) {
            Ok(raw) => raw.trim().parse().map(Some).map_err(|_| {
                SandboxError::Protocol(format!("malformed exit code for job {}: {raw:?}", self.id))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn output(&self, name: &str) -> String {
        std::fs::read(self.dir.join(name))
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .unwrap_or_default()
    }

    fn info(&self) -> ProcessInfo {
        let state = self.lock();
        ProcessInfo {
            id: self.id,
            command: self.command.clone(),
            is_running: !state.finished,
            exit_code: state.exit_code,
            stdout: self.output("stdout"),
            stderr: self.output("stderr"),
            started_at: self.started_at,
            ended_at: state.ended_at,
        }
    }
}

/// Sandbox backed by one long-lived container.
pub struct ContainerSandbox {
    id: SandboxId,
    options: SandboxOptions,
    image: String,
    name: String,
    fs: SandboxFs,
    mounts: MountTable,
    state_dir: PathBuf,
    runner: Arc<dyn CommandRunner>,
    jobs: JobTable<ContainerJob>,
    disposed: AtomicBool,
}

impl ContainerSandbox {
    /// Verify the image, launch the container and wait until it is running.
    pub async fn start(
        options: SandboxOptions,
        runner: Arc<dyn CommandRunner>,
    ) -> SandboxResult<Self> {
        options.validate()?;
        let container = options.isolation.clone().ok_or_else(|| {
            SandboxError::InvalidConfig("container backend requires isolation options".into())
        })?;

        let id = SandboxId::new();
        let boundary = BoundaryChecker::from_options(&options);
        let state_dir = state_directory_for(&container, &boundary, &id);
        std::fs::create_dir_all(state_dir.join("jobs"))?;
        let mounts = MountTable::compute(&boundary, &state_dir);
        let name = format!("agent-sandbox-{}", id.short());

        let sandbox = Self {
            id,
            image: container.image.clone(),
            name,
            fs: SandboxFs::new(boundary),
            mounts,
            state_dir,
            runner,
            jobs: JobTable::new(),
            disposed: AtomicBool::new(false),
            options,
        };

        let span = obs::sandbox_span(&sandbox.id, "container");
        sandbox.boot(&container).instrument(span).await?;
        obs::emit_sandbox_created(&sandbox.id, "container", sandbox.fs.boundary().root());
        Ok(sandbox)
    }

    async fn boot(&self, container: &ContainerOptions) -> SandboxResult<()> {
        let limit = container.startup_timeout();

        let inspect = vec!["image".to_string(), "inspect".to_string(), self.image.clone()];
        let out = self
            .runner
            .run(&inspect, limit)
            .await
            .map_err(|e| self.startup_error(e))?;
        if !out.success() {
            return Err(self.startup_error(format!("image not available: {}", out.stderr.trim())));
        }

        let args = launch_args(&self.name, container, &self.mounts, &self.options.environment);
        let out = self
            .runner
            .run(&args, limit)
            .await
            .map_err(|e| self.startup_error(e))?;
        if !out.success() {
            return Err(self.startup_error(out.stderr.trim()));
        }

        if tokio::time::timeout(limit, self.wait_until_running()).await.is_err() {
            self.remove_container().await;
            return Err(self.startup_error(format!(
                "container not running after {}ms",
                limit.as_millis()
            )));
        }
        debug!(container = %self.name, "container running");
        Ok(())
    }

    async fn wait_until_running(&self) {
        let args: Vec<String> = ["inspect", "-f", "{{.State.Running}}", self.name.as_str()]
            .iter()
            .map(|s| s.to_string())
            .collect();
        loop {
            match self.runner.run(&args, ENGINE_CALL_TIMEOUT).await {
                Ok(out) if out.success() && out.stdout.trim() == "true" => return,
                Ok(out) => debug!(stdout = %out.stdout.trim(), "container not running yet"),
                Err(e) => debug!(error = %e, "inspect failed"),
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
    }

    fn startup_error(&self, reason: impl std::fmt::Display) -> SandboxError {
        SandboxError::ContainerStartup {
            engine: self.runner.engine().to_string(),
            image: self.image.clone(),
            reason: reason.to_string(),
        }
    }

    pub fn container_name(&self) -> &str {
        &self.name
    }

    pub fn mounts(&self) -> &MountTable {
        &self.mounts
    }

    pub fn state_directory(&self) -> &Path {
        &self.state_dir
    }

    fn ensure_live(&self) -> SandboxResult<()> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(SandboxError::Disposed);
        }
        Ok(())
    }

    /// Run an engine call that must succeed.
    async fn engine_checked(&self, args: Vec<String>) -> SandboxResult<RunOutput> {
        let out = self.runner.run(&args, ENGINE_CALL_TIMEOUT).await?;
        if !out.success() {
            return Err(SandboxError::EngineCommand {
                args: args.join(" "),
                exit_code: out.exit_code,
                stderr: out.stderr.trim().to_string(),
            });
        }
        Ok(out)
    }

    fn exec_in_container(&self, argv: &[&str]) -> Vec<String> {
        let mut args = vec!["exec".to_string(), self.name.clone()];
        args.extend(argv.iter().map(|s| s.to_string()));
        args
    }

    async fn launch(
        &self,
        command: &str,
        cwd: &Path,
        env: &HashMap<String, String>,
    ) -> SandboxResult<Arc<ContainerJob>> {
        let id = self.jobs.allocate();
        let dir = self.state_dir.join("jobs").join(id.to_string());
        std::fs::create_dir_all(&dir)?;
        std::fs::write(dir.join("command"), command)?;

        let container_dir = self.mounts.to_container_path(&dir).ok_or_else(|| {
            SandboxError::Protocol(format!("job directory is not mounted: {}", dir.display()))
        })?;
        let script = wrapper_script(command, &container_dir);
        let out = self
            .engine_checked(exec_args(&self.name, cwd, env, &script))
            .await?;
        let pid = parse_pid(&out.stdout)?;
        debug!(job = %id, pid, "job launched");

        Ok(Arc::new(ContainerJob {
            id,
            command: command.to_string(),
            pid,
            dir,
            started_at: Utc::now(),
            state: Mutex::new(JobState::default()),
        }))
    }

    async fn wait_for_exit(&self, job: &ContainerJob) -> SandboxResult<i32> {
        loop {
            if let Some(code) = job.read_exit_code()? {
                job.finish(Some(code));
                return Ok(code);
            }
            tokio::time::sleep(EXIT_POLL_INTERVAL).await;
        }
    }

    async fn is_alive(&self, pid: u32) -> SandboxResult<bool> {
        let out = self
            .engine_checked(self.exec_in_container(&["sh", "-c", &liveness_script(pid)]))
            .await?;
        parse_verdict(&out.stdout, "alive", "gone")
    }

    /// Bring a job's terminal state up to date. The exit file is authoritative.
    async fn refresh(&self, job: &ContainerJob) -> SandboxResult<()> {
        if job.is_finished() {
            return Ok(());
        }
        if let Some(code) = job.read_exit_code()? {
            job.finish(Some(code));
            return Ok(());
        }
        if self.is_alive(job.pid).await? {
            return Ok(());
        }
        // the exit file may have landed between the two checks
        let code = job.read_exit_code()?;
        job.finish(code);
        Ok(())
    }

    /// SIGKILL the job's process group. `false` if nothing was left to signal.
    async fn kill_group(&self, pid: u32) -> SandboxResult<bool> {
        let out = self
            .engine_checked(self.exec_in_container(&["sh", "-c", &kill_script(pid)]))
            .await?;
        parse_verdict(&out.stdout, "killed", "gone")
    }

    async fn remove_container(&self) -> bool {
        let args = vec!["rm".to_string(), "-f".to_string(), self.name.clone()];
        match self.runner.run(&args, ENGINE_CALL_TIMEOUT).await {
            Ok(out) if out.success() => true,
            Ok(out) => {
                obs::emit_cleanup_error(&self.id, "rm", &out.stderr.trim());
                false
            }
            Err(e) => {
                obs::emit_cleanup_error(&self.id, "rm", &e);
                false
            }
        }
    }

    fn reject(&self, command: &str, reason: String) -> SandboxResult<CommandResult> {
        obs::emit_command_rejected(&self.id, command, &reason);
        Ok(CommandResult::rejected(reason))
    }

    async fn execute(
        &self,
        command: &str,
        options: CommandOptions,
    ) -> SandboxResult<CommandResult> {
        self.ensure_live()?;

        let boundary = self.fs.boundary();
        let requested = options
            .working_directory
            .clone()
            .unwrap_or_else(|| boundary.root().to_path_buf());
        let Ok(cwd) = boundary.check(&requested) else {
            let reason = format!(
                "working directory is outside the sandbox: {}",
                boundary.resolve(&requested).display()
            );
            return self.reject(command, reason);
        };
        let Some(container_cwd) = self.mounts.to_container_path(&cwd) else {
            let reason = format!(
                "working directory is not mounted in the container: {}",
                cwd.display()
            );
            return self.reject(command, reason);
        };
        if let Some(hit) = CommandGuard::standard().check(command) {
            return self.reject(command, hit.to_string());
        }

        let start = Instant::now();
        let env = options.merged_environment(&self.options);
        let job = self.launch(command, &container_cwd, &env).await?;

        if options.background {
            let id = job.id;
            self.jobs.insert(id, job);
            obs::emit_job_started(&self.id, id, command);
            return Ok(CommandResult::started(id, start.elapsed()));
        }

        obs::emit_command_started(&self.id, command);
        let timeout = options.effective_timeout(&self.options);
        match tokio::time::timeout(timeout, self.wait_for_exit(&job)).await {
            Ok(exit_code) => {
                let exit_code = exit_code?;
                let duration = start.elapsed();
                obs::emit_command_finished(&self.id, exit_code, duration.as_millis() as u64);
                Ok(CommandResult {
                    exit_code,
                    stdout: job.output("stdout"),
                    stderr: job.output("stderr"),
                    process_id: None,
                    duration,
                })
            }
            Err(_) => {
                let limit_ms = timeout.as_millis() as u64;
                if let Err(e) = self.kill_group(job.pid).await {
                    warn!(job = %job.id, pid = job.pid, error = %e, "timed-out job could not be killed");
                }
                job.finish(Some(KILLED_EXIT_CODE));
                obs::emit_command_timed_out(&self.id, command, limit_ms);
                Err(SandboxError::Timeout {
                    command: command.to_string(),
                    limit_ms,
                })
            }
        }
    }
}

impl Drop for ContainerSandbox {
    fn drop(&mut self) {
        if self.disposed.load(Ordering::Acquire) {
            return;
        }
        let args = vec!["rm".to_string(), "-f".to_string(), self.name.clone()];
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let runner = Arc::clone(&self.runner);
                handle.spawn(async move {
                    let _ = runner.run(&args, ENGINE_CALL_TIMEOUT).await;
                });
            }
            Err(_) => warn!(container = %self.name, "dropped outside a runtime, container left running"),
        }
    }
}

#[async_trait]
impl Sandbox for ContainerSandbox {
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
            .instrument(obs::sandbox_span(&self.id, "container"))
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
        let Some(job) = self.jobs.get(id) else {
            return Ok(None);
        };
        self.refresh(&job).await?;
        Ok(Some(job.info()))
    }

    async fn kill_process(&self, id: ProcessId) -> SandboxResult<bool> {
        self.ensure_live()?;
        let Some(job) = self.jobs.get(id) else {
            return Ok(false);
        };
        self.refresh(&job).await?;
        if job.is_finished() {
            return Ok(false);
        }
        if !self.kill_group(job.pid).await? {
            // exited on its own between the refresh and the signal
            job.finish(job.read_exit_code()?);
            return Ok(false);
        }
        let killed = job.finish(Some(KILLED_EXIT_CODE));
        if killed {
            obs::emit_job_killed(&self.id, id);
        }
        Ok(killed)
    }

    async fn list_processes(&self) -> SandboxResult<Vec<ProcessInfo>> {
        self.ensure_live()?;
        let mut infos = Vec::new();
        for (_, job) in self.jobs.snapshot() {
            self.refresh(&job).await?;
            infos.push(job.info());
        }
        Ok(infos)
    }

    async fn dispose(&self) -> SandboxResult<()> {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        // removing the container takes every job with it
        let terminated = self
            .jobs
            .drain()
            .into_iter()
            .filter(|(_, job)| job.finish(Some(KILLED_EXIT_CODE)))
            .count();
        self.remove_container().await;
        obs::emit_sandbox_disposed(&self.id, terminated);
        Ok(())
    }
}
