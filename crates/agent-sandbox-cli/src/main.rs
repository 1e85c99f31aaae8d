//! Agent Sandbox CLI
//!
//! The `agent-sandbox` command runs a single command inside a fresh sandbox
//! and inspects how a configuration would confine it.
//!
//! ## Commands
//!
//! - `exec`: run one foreground command and exit with its code
//! - `check`: report whether a path is inside the boundary
//! - `mounts`: print the container mount table for the configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, Level};

use agent_sandbox::{
    create_sandbox, state_directory_for, BoundaryChecker, CommandOptions, CommandResult,
    MountTable, SandboxId, SandboxOptions,
};

#[derive(Parser)]
#[command(name = "agent-sandbox")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run agent commands inside a boundary-enforced sandbox", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Sandbox configuration file (JSON)
    #[arg(short, long, global = true, env = "AGENT_SANDBOX_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one command in a fresh sandbox and exit with its code
    Exec {
        /// Working directory for the command (must be inside the sandbox)
        #[arg(long)]
        cwd: Option<PathBuf>,

        /// Timeout in milliseconds (default: from config, else 120000)
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Run inside a container instead of on the host
        #[arg(long)]
        container: bool,

        /// Container image (implies --container)
        #[arg(long)]
        image: Option<String>,

        /// Additional absolute path the sandbox may touch
        #[arg(long = "allow")]
        allow: Vec<PathBuf>,

        /// Command line, run through `sh -c`
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Report whether a path is inside the sandbox boundary
    Check {
        path: PathBuf,

        /// Additional absolute path the sandbox may touch
        #[arg(long = "allow")]
        allow: Vec<PathBuf>,
    },

    /// Print the container mount table for the configuration
    Mounts {
        /// Additional absolute path the sandbox may touch
        #[arg(long = "allow")]
        allow: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    agent_sandbox::init_tracing(cli.json, level);

    let base = load_options(cli.config.as_deref())?;

    match cli.command {
        Commands::Exec {
            cwd,
            timeout_ms,
            container,
            image,
            allow,
            command,
        } => {
            let options = with_overrides(base, &allow, container, image);
            let code = cmd_exec(options, &command.join(" "), cwd, timeout_ms).await?;
            std::process::exit(code);
        }
        Commands::Check { path, allow } => {
            let options = with_overrides(base, &allow, false, None);
            let inside = cmd_check(&options, &path);
            println!(
                "{}: {}",
                path.display(),
                if inside { "inside" } else { "outside" }
            );
            if !inside {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Mounts { allow } => {
            let options = with_overrides(base, &allow, true, None);
            let table = cmd_mounts(&options);
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&table)?);
            } else {
                for mount in table.mounts() {
                    println!("{} -> {}", mount.host.display(), mount.container.display());
                }
            }
            Ok(())
        }
    }
}

/// Options from the config file, or rooted at the current directory.
fn load_options(config: Option<&Path>) -> Result<SandboxOptions> {
    match config {
        Some(path) => SandboxOptions::from_json_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => {
            let cwd = std::env::current_dir().context("Failed to read current directory")?;
            Ok(SandboxOptions::new(cwd))
        }
    }
}

/// Layer command-line flags over file options.
fn with_overrides(
    mut options: SandboxOptions,
    allow: &[PathBuf],
    container: bool,
    image: Option<String>,
) -> SandboxOptions {
    options.allow_paths.extend(allow.iter().cloned());
    if container || image.is_some() {
        let mut isolation = options.isolation.take().unwrap_or_default();
        if let Some(image) = image {
            isolation.image = image;
        }
        options.isolation = Some(isolation);
    }
    options
}

/// Run one foreground command, always disposing the sandbox.
async fn cmd_exec(
    options: SandboxOptions,
    command: &str,
    cwd: Option<PathBuf>,
    timeout_ms: Option<u64>,
) -> Result<i32> {
    let sandbox = create_sandbox(options)
        .await
        .context("Failed to create sandbox")?;
    debug!(sandbox_id = %sandbox.id(), "sandbox ready");

    let call = CommandOptions {
        working_directory: cwd,
        timeout: timeout_ms.map(Duration::from_millis),
        ..CommandOptions::default()
    };

    let outcome = sandbox.execute_command(command, call).await;
    if let Err(e) = sandbox.dispose().await {
        tracing::warn!(error = %e, "dispose failed");
    }

    let result: CommandResult = outcome.context("Command failed")?;
    print!("{}", result.stdout);
    eprint!("{}", result.stderr);
    Ok(result.exit_code)
}

fn cmd_check(options: &SandboxOptions, path: &Path) -> bool {
    let boundary = BoundaryChecker::from_options(options);
    let resolved = boundary.resolve(path);
    boundary.is_inside(&resolved)
}

fn cmd_mounts(options: &SandboxOptions) -> MountTable {
    let boundary = BoundaryChecker::from_options(options);
    let isolation = options.isolation.clone().unwrap_or_default();
    // a fresh id stands in for the one a real sandbox would get
    let state = state_directory_for(&isolation, &boundary, &SandboxId::new());
    MountTable::compute(&boundary, &state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_options_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sandbox.json");
        std::fs::write(
            &path,
            r#"{"working_directory": "/srv/ws", "isolation": {"image": "alpine:3"}}"#,
        )
        .unwrap();
        let opts = load_options(Some(&path)).unwrap();
        assert_eq!(opts.working_directory, PathBuf::from("/srv/ws"));
        assert_eq!(opts.isolation.unwrap().image, "alpine:3");

        let err = load_options(Some(&dir.path().join("missing.json"))).unwrap_err();
        assert!(err.to_string().contains("Failed to load config"));
    }

    #[test]
    fn test_overrides_layer_over_config() {
        let base = SandboxOptions::new("/srv/ws").with_allow_path("/opt/a");
        let opts = with_overrides(base.clone(), &[PathBuf::from("/opt/b")], false, None);
        assert_eq!(opts.allow_paths.len(), 2);
        assert!(opts.isolation.is_none());

        let opts = with_overrides(base, &[], false, Some("alpine:3".into()));
        assert_eq!(opts.isolation.unwrap().image, "alpine:3");
    }

    #[test]
    fn test_check_and_mounts() {
        let opts = SandboxOptions::new("/srv/ws").with_allow_path("/opt/data");
        assert!(cmd_check(&opts, Path::new("src/main.rs")));
        assert!(cmd_check(&opts, Path::new("/opt/data/x")));
        assert!(!cmd_check(&opts, Path::new("../other")));

        let opts = with_overrides(opts, &[], true, None);
        let table = cmd_mounts(&opts);
        assert_eq!(table.mounts()[0].container, PathBuf::from("/workspace"));
        assert_eq!(table.mounts()[1].container, PathBuf::from("/mnt/allow0"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exec_returns_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let code = cmd_exec(SandboxOptions::new(dir.path()), "exit 3", None, None)
            .await
            .unwrap();
        assert_eq!(code, 3);

        let err = cmd_exec(SandboxOptions::new(dir.path()), "sleep 5", None, Some(100))
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("timed out"));
    }
}
