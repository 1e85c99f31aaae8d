//! Tracing setup for programs embedding a sandbox.
//!
//! [`init_tracing`] installs a stderr subscriber scoped to this crate: sandbox
//! events follow the requested level while dependencies stay at `warn`, so a
//! verbose run is not flooded by the async runtime. `AGENT_SANDBOX_LOG`, then
//! `RUST_LOG`, override the default directives.
//!
//! At `debug` and finer, every `sandbox` span also logs when it closes, with
//! its busy and idle time, which gives a per-command timing line.
//!
//! Later calls are ignored; the global subscriber is set once per process.

use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable holding filter directives for sandbox logging.
pub const LOG_ENV: &str = "AGENT_SANDBOX_LOG";

/// Directives used when neither [`LOG_ENV`] nor `RUST_LOG` is set.
pub fn default_directives(level: Level) -> String {
    let level = level.as_str().to_ascii_lowercase();
    format!("warn,agent_sandbox={level}")
}

/// Span lifecycle events worth logging at `level`.
fn span_events(level: Level) -> FmtSpan {
    if level >= Level::DEBUG {
        FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    }
}

fn sandbox_filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)))
}

/// Initialise the global tracing subscriber.
///
/// * `json`: when `true`, emit newline-delimited JSON log lines.
/// * `level`: verbosity for sandbox events when no directives are set.
///
/// Logs go to stderr so command output on stdout stays clean.
pub fn init_tracing(json: bool, level: Level) {
    let layer = fmt::layer()
        .with_target(false)
        .with_span_events(span_events(level))
        .with_writer(std::io::stderr);
    let registry = tracing_subscriber::registry().with(sandbox_filter(level));

    if json {
        registry.with(layer.json()).try_init().ok();
    } else {
        registry.with(layer).try_init().ok();
    }
}
