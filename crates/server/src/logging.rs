use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,tower_http=warn,hyper=warn";

/// Keeps the non-blocking writer alive for the life of the process.
pub struct LoggingHandle {
    pub run_id: String,
    pub guard: WorkerGuard,
}

fn log_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
    PathBuf::from(home).join(".hireloop").join("logs")
}

fn resolve_filter() -> EnvFilter {
    std::env::var("HIRELOOP_LOG_FILTER")
        .ok()
        .and_then(|value| EnvFilter::try_new(value).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}

/// Set up file logging under `~/.hireloop/logs/server.log`.
///
/// `HIRELOOP_LOG_FORMAT=pretty` switches from the default JSON lines to a
/// human-readable layout for local debugging.
pub fn init_logging() -> anyhow::Result<LoggingHandle> {
    let dir = log_dir();
    std::fs::create_dir_all(&dir)?;
    let log_path = dir.join("server.log");

    let appender = tracing_appender::rolling::never(&dir, "server.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let format = std::env::var("HIRELOOP_LOG_FORMAT").unwrap_or_else(|_| "json".into());

    let registry = tracing_subscriber::registry().with(resolve_filter());
    if format.eq_ignore_ascii_case("pretty") {
        registry
            .with(
                fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .pretty()
                    .with_file(true)
                    .with_line_number(true)
                    .with_target(true),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_writer(writer)
                    .json()
                    .flatten_event(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_target(true)
                    .with_current_span(true),
            )
            .init();
    }

    let run_id = std::env::var("HIRELOOP_RUN_ID").unwrap_or_else(|_| {
        let started = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        format!("pid-{}-{}", std::process::id(), started)
    });

    tracing::info!(
        component = "logging",
        event = "logging.initialized",
        log_path = %log_path.display(),
        format = %format,
        run_id = %run_id,
    );

    Ok(LoggingHandle { run_id, guard })
}
