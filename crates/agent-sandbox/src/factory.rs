//! Backend selection. Callers receive a `Box<dyn Sandbox>` and never learn
//! which backend is underneath.

use std::sync::Arc;

use tracing::debug;

use crate::container::ContainerSandbox;
use crate::error::SandboxResult;
use crate::host::HostSandbox;
use crate::options::SandboxOptions;
use crate::runner::{CliRunner, CommandRunner};
use crate::sandbox::Sandbox;

/// Build a sandbox: the container backend when `options.isolation` is set,
/// the host backend otherwise.
pub async fn create_sandbox(options: SandboxOptions) -> SandboxResult<Box<dyn Sandbox>> {
    let runner = options
        .isolation
        .as_ref()
        .map(|iso| Arc::new(CliRunner::new(iso.runtime.binary())) as Arc<dyn CommandRunner>);
    build(options, runner).await
}

/// Like [`create_sandbox`], with an injected engine runner for the container
/// backend. The runner is ignored when no isolation is configured.
pub async fn create_sandbox_with_runner(
    options: SandboxOptions,
    runner: Arc<dyn CommandRunner>,
) -> SandboxResult<Box<dyn Sandbox>> {
    build(options, Some(runner)).await
}

async fn build(
    options: SandboxOptions,
    runner: Option<Arc<dyn CommandRunner>>,
) -> SandboxResult<Box<dyn Sandbox>> {
    match (options.isolation.is_some(), runner) {
        (true, Some(runner)) => {
            debug!(engine = %runner.engine(), "selecting container backend");
            Ok(Box::new(ContainerSandbox::start(options, runner).await?))
        }
        _ => {
            debug!("selecting host backend");
            Ok(Box::new(HostSandbox::new(options)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::ContainerOptions;
    use crate::runner::{RecordingRunner, RunOutput};

    #[tokio::test]
    async fn test_host_without_isolation() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(RecordingRunner::succeeding());
        let sandbox = create_sandbox_with_runner(SandboxOptions::new(dir.path()), runner.clone())
            .await
            .unwrap();
        assert_eq!(sandbox.working_directory(), dir.path());
        assert!(runner.calls().is_empty());
        sandbox.dispose().await.unwrap();
    }

    #[tokio::test]
    async fn test_container_with_isolation() {
        let dir = tempfile::tempdir().unwrap();
        let state = tempfile::tempdir().unwrap();
        let runner = Arc::new(RecordingRunner::new(|args| {
            if args[0] == "inspect" {
                RunOutput::ok("true")
            } else {
                RunOutput::ok("")
            }
        }));
        let options = SandboxOptions::new(dir.path())
            .with_isolation(ContainerOptions::default().with_state_directory(state.path()));
        let sandbox = create_sandbox_with_runner(options, runner.clone()).await.unwrap();
        assert_eq!(runner.calls_to("run").len(), 1);
        sandbox.dispose().await.unwrap();
        assert_eq!(runner.calls_to("rm").len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_options_rejected() {
        let options = SandboxOptions::new("/tmp").with_allow_path("relative");
        assert!(create_sandbox(options).await.is_err());
    }
}
