//! Agent Sandbox
//!
//! Boundary-enforced command execution and filesystem access for autonomous
//! agents. Two backends sit behind the [`Sandbox`] trait: host subprocesses
//! and a long-lived container driven through the engine CLI. Use
//! [`create_sandbox`] to obtain one.

pub mod boundary;
pub mod container;
pub mod error;
pub mod factory;
pub mod fs_ops;
pub mod guard;
pub mod host;
pub mod jobs;
pub mod obs;
pub mod options;
pub mod process;
pub mod runner;
pub mod sandbox;
pub mod telemetry;
pub mod types;

pub use boundary::BoundaryChecker;
pub use container::{
    default_state_directory, launch_args, state_directory_for, wrapper_script, ContainerSandbox,
    Mount, MountTable,
};
pub use error::{SandboxError, SandboxResult};
pub use factory::{create_sandbox, create_sandbox_with_runner};
pub use guard::{CommandGuard, GuardMatch};
pub use host::HostSandbox;
pub use jobs::KILLED_EXIT_CODE;
pub use options::{CommandOptions, ContainerOptions, ContainerRuntime, SandboxOptions};
pub use runner::{CliRunner, CommandRunner, RecordingRunner, RunOutput};
pub use sandbox::Sandbox;
pub use telemetry::init_tracing;
pub use types::{
    CommandResult, DirectoryEntry, GrepOptions, GrepResult, ProcessId, ProcessInfo, SandboxId,
};
