#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use agent_sandbox::{
    create_sandbox, CommandOptions, GrepOptions, ProcessId, Sandbox, SandboxError, SandboxOptions,
};

async fn host_sandbox(options: SandboxOptions) -> Box<dyn Sandbox> {
    agent_sandbox::init_tracing(false, tracing::Level::DEBUG);
    create_sandbox(options).await.unwrap()
}

#[tokio::test]
async fn test_echo_hello() {
    let dir = tempfile::tempdir().unwrap();
    let sandbox = host_sandbox(SandboxOptions::new(dir.path())).await;

    let r = sandbox
        .execute_command("echo hello", CommandOptions::default())
        .await
        .unwrap();
    assert_eq!(r.exit_code, 0);
    assert_eq!(r.stdout, "hello\n");
    assert!(r.process_id.is_none());

    sandbox.dispose().await.unwrap();
}

#[tokio::test]
async fn test_background_job_then_output() {
    let dir = tempfile::tempdir().unwrap();
    let sandbox = host_sandbox(SandboxOptions::new(dir.path())).await;

    let r = sandbox
        .execute_command("sleep 1; echo done", CommandOptions::background())
        .await
        .unwrap();
    let id = r.process_id.unwrap();

    let info = sandbox.get_process(id).await.unwrap().unwrap();
    assert!(info.is_running);
    assert_eq!(info.command, "sleep 1; echo done");

    let mut finished = None;
    for _ in 0..100 {
        let info = sandbox.get_process(id).await.unwrap().unwrap();
        if !info.is_running {
            finished = Some(info);
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    let info = finished.expect("job should finish");
    assert_eq!(info.exit_code, Some(0));
    assert!(info.stdout.contains("done"));

    // finished jobs stay queryable
    assert_eq!(sandbox.list_processes().await.unwrap().len(), 1);
    sandbox.dispose().await.unwrap();
}

#[tokio::test]
async fn test_escape_attempts_are_denied() {
    let dir = tempfile::tempdir().unwrap();
    let sandbox = host_sandbox(SandboxOptions::new(dir.path())).await;

    let err = sandbox
        .read_file(Path::new("../../etc/passwd"))
        .await
        .unwrap_err();
    assert!(matches!(err, SandboxError::OutsideSandbox { .. }));

    let err = sandbox
        .write_file(Path::new("/etc/agent-sandbox-test"), "x")
        .await
        .unwrap_err();
    assert!(matches!(err, SandboxError::OutsideSandbox { .. }));

    let r = sandbox
        .execute_command("ls", CommandOptions::default().in_dir("/etc"))
        .await
        .unwrap();
    assert_ne!(r.exit_code, 0);
    assert!(r.stderr.contains("outside the sandbox"));
}

#[tokio::test]
async fn test_allow_path_and_disabled_enforcement() {
    let dir = tempfile::tempdir().unwrap();
    let extra = tempfile::tempdir().unwrap();
    std::fs::write(extra.path().join("shared.txt"), "shared").unwrap();

    let sandbox =
        host_sandbox(SandboxOptions::new(dir.path()).with_allow_path(extra.path())).await;
    let content = sandbox
        .read_file(&extra.path().join("shared.txt"))
        .await
        .unwrap();
    assert_eq!(content, "shared");

    let open = host_sandbox(SandboxOptions::new(dir.path()).with_enforce_boundary(false)).await;
    let r = open
        .execute_command("pwd", CommandOptions::default().in_dir(extra.path()))
        .await
        .unwrap();
    assert_eq!(r.exit_code, 0);
}

#[tokio::test]
async fn test_file_operations_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let sandbox = host_sandbox(SandboxOptions::new(dir.path())).await;

    sandbox
        .write_file(Path::new("src/lib.rs"), "fn main() {}\n// TODO: more\n")
        .await
        .unwrap();
    sandbox
        .write_file(Path::new("README.md"), "todo list\n")
        .await
        .unwrap();
    assert!(sandbox.exists(Path::new("src/lib.rs")).await.unwrap());

    let files = sandbox.glob("**/*.rs").await.unwrap();
    assert_eq!(files, vec![dir.path().join("src/lib.rs")]);

    let hits = sandbox
        .grep(
            "todo",
            GrepOptions {
                case_insensitive: true,
                glob: Some("*.rs".into()),
                ..GrepOptions::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].line_number, 2);

    let entries = sandbox.list_directory(Path::new(".")).await.unwrap();
    let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["README.md", "src"]);

    sandbox.delete(Path::new("src")).await.unwrap();
    assert!(!sandbox.exists(Path::new("src")).await.unwrap());
    assert!(matches!(
        sandbox.delete(Path::new("src")).await,
        Err(SandboxError::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_concurrent_jobs_do_not_interfere() {
    let dir = tempfile::tempdir().unwrap();
    let sandbox: Arc<dyn Sandbox> = Arc::from(host_sandbox(SandboxOptions::new(dir.path())).await);

    let mut handles = Vec::new();
    for i in 0..8 {
        let sandbox = Arc::clone(&sandbox);
        handles.push(tokio::spawn(async move {
            sandbox
                .execute_command(&format!("echo job{i}"), CommandOptions::background())
                .await
                .unwrap()
                .process_id
                .unwrap()
        }));
    }
    let mut ids: Vec<ProcessId> = Vec::new();
    for h in handles {
        ids.push(h.await.unwrap());
    }
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 8);

    let long = sandbox
        .execute_command("sleep 30", CommandOptions::background())
        .await
        .unwrap()
        .process_id
        .unwrap();
    assert!(sandbox.kill_process(long).await.unwrap());
    assert!(sandbox.get_process(ids[0]).await.unwrap().is_some());

    sandbox.dispose().await.unwrap();
}

#[tokio::test]
async fn test_timeout_kills_whole_tree() {
    let dir = tempfile::tempdir().unwrap();
    let sandbox = host_sandbox(SandboxOptions::new(dir.path())).await;
    let marker: PathBuf = dir.path().join("grandchild.pid");

    let err = sandbox
        .execute_command(
            &format!("sh -c 'echo $$ > {}; sleep 30' & wait", marker.display()),
            CommandOptions::default().with_timeout(Duration::from_millis(300)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SandboxError::Timeout { .. }));

    let pid: u32 = std::fs::read_to_string(&marker)
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!agent_sandbox::process::is_process_alive(pid));
}
