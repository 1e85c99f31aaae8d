use std::path::{Path, PathBuf};
use std::sync::Arc;

use agent_sandbox::{
    create_sandbox_with_runner, BoundaryChecker, CommandOptions, ContainerOptions, MountTable,
    RecordingRunner, RunOutput, SandboxError, SandboxOptions,
};

/// Engine whose container is always running and whose jobs finish at once
/// with exit code 5, writing into the host-side job directory.
fn engine(state: PathBuf) -> Arc<RecordingRunner> {
    Arc::new(RecordingRunner::new(move |args| match args[0].as_str() {
        "inspect" => RunOutput::ok("true\n"),
        "exec" => {
            let script = args.last().cloned().unwrap_or_default();
            if let Some(rest) = script.split("/sandbox-state/jobs/").nth(1) {
                let n: String = rest.chars().take_while(char::is_ascii_digit).collect();
                let dir = state.join("jobs").join(n);
                std::fs::write(dir.join("stdout"), "built\n").unwrap();
                std::fs::write(dir.join("stderr"), "warning\n").unwrap();
                std::fs::write(dir.join("exit_code"), "5").unwrap();
            }
            RunOutput::ok("31\n")
        }
        _ => RunOutput::ok(""),
    }))
}

#[test]
fn test_mount_mapping_for_workspace_and_allow_paths() {
    let boundary = BoundaryChecker::new(
        "/home/agent/project",
        &[PathBuf::from("/data/models")],
        true,
    );
    let table = MountTable::compute(&boundary, Path::new("/var/tmp/agent-sandbox/1"));

    assert_eq!(
        table.to_container_path(Path::new("/home/agent/project/x/y")),
        Some(PathBuf::from("/workspace/x/y"))
    );
    assert_eq!(
        table.to_container_path(Path::new("/data/models/z")),
        Some(PathBuf::from("/mnt/allow0/z"))
    );
    assert_eq!(
        table.to_container_path(Path::new("/var/tmp/agent-sandbox/1/jobs/4")),
        Some(PathBuf::from("/sandbox-state/jobs/4"))
    );
}

#[tokio::test]
async fn test_foreground_command_through_factory() {
    agent_sandbox::init_tracing(false, tracing::Level::DEBUG);
    let workspace = tempfile::tempdir().unwrap();
    let allowed = tempfile::tempdir().unwrap();
    let state = tempfile::tempdir().unwrap();
    let runner = engine(state.path().to_path_buf());

    let options = SandboxOptions::new(workspace.path())
        .with_allow_path(allowed.path())
        .with_env("CI", "1")
        .with_isolation(
            ContainerOptions::default()
                .with_image("rust:1-slim")
                .with_network_mode("bridge")
                .with_state_directory(state.path()),
        );
    let sandbox = create_sandbox_with_runner(options, runner.clone())
        .await
        .unwrap();

    let launch = runner.calls_to("run").remove(0);
    let joined = launch.join(" ");
    assert!(joined.contains("--network bridge"));
    assert!(joined.contains(&format!("{}:/mnt/allow0", allowed.path().display())));
    assert!(joined.contains("-e CI=1"));
    assert!(joined.contains("rust:1-slim sleep infinity"));

    let r = sandbox
        .execute_command(
            "cargo build",
            CommandOptions::default().in_dir(allowed.path()),
        )
        .await
        .unwrap();
    assert_eq!(r.exit_code, 5);
    assert_eq!(r.stdout, "built\n");
    assert_eq!(r.stderr, "warning\n");

    let exec = runner.calls_to("exec").remove(0);
    let w = exec.iter().position(|a| a == "-w").unwrap();
    assert_eq!(exec[w + 1], "/mnt/allow0");

    sandbox.dispose().await.unwrap();
    assert!(matches!(
        sandbox.read_file(Path::new("x")).await,
        Err(SandboxError::Disposed)
    ));
}

#[tokio::test]
async fn test_engine_missing_is_startup_error() {
    let workspace = tempfile::tempdir().unwrap();
    let state = tempfile::tempdir().unwrap();
    let options = SandboxOptions::new(workspace.path()).with_isolation(
        ContainerOptions::default()
            .with_runtime(agent_sandbox::ContainerRuntime::Podman)
            .with_state_directory(state.path()),
    );
    // point the real CLI runner at a binary that cannot exist
    let runner = Arc::new(agent_sandbox::CliRunner::new("agent-sandbox-no-such-engine"));
    let err = match create_sandbox_with_runner(options, runner).await {
        Err(e) => e,
        Ok(_) => panic!("startup should fail"),
    };
    match err {
        SandboxError::ContainerStartup { engine, .. } => {
            assert_eq!(engine, "agent-sandbox-no-such-engine")
        }
        other => panic!("expected ContainerStartup, got {other:?}"),
    }
}
