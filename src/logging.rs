//! Logging setup: journald on Linux, a daily rolling file everywhere else.
//!
//! Filter directives come from `DOORBELL_FACES_LOG`, then `RUST_LOG`, then
//! a default of `info` with the HTTP client held at `warn`.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_ENV: &str = "DOORBELL_FACES_LOG";
const DEFAULT_DIRECTIVES: &str = "info,ureq=warn";

/// Where log records end up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogBackend {
    Journald,
    File(PathBuf),
}

/// Pick the first non-empty directive string; a bare level such as `debug`
/// keeps the HTTP client quiet.
fn resolve_directives(ours: Option<String>, rust_log: Option<String>) -> String {
    let chosen = [ours, rust_log]
        .into_iter()
        .flatten()
        .map(|d| d.trim().to_string())
        .find(|d| !d.is_empty());

    match chosen {
        Some(d) if d.contains('=') || d.contains(',') => d,
        Some(level) => format!("{},ureq=warn", level),
        None => DEFAULT_DIRECTIVES.to_string(),
    }
}

fn env_filter() -> EnvFilter {
    let directives = resolve_directives(
        std::env::var(LOG_ENV).ok(),
        std::env::var("RUST_LOG").ok(),
    );
    EnvFilter::try_new(&directives).unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES))
}

pub fn default_log_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("doorbell-faces")
        .join("logs")
}

/// Install the global subscriber. Call once at startup.
pub fn init(log_dir: Option<PathBuf>) -> Result<LogBackend> {
    #[cfg(target_os = "linux")]
    {
        if let Ok(journald_layer) = tracing_journald::layer() {
            tracing_subscriber::registry()
                .with(env_filter())
                .with(journald_layer)
                .try_init()
                .context("installing journald subscriber")?;

            tracing::info!("Logging initialized with journald backend");
            return Ok(LogBackend::Journald);
        }
    }

    let log_dir = log_dir.unwrap_or_else(default_log_dir);
    init_file(&log_dir)?;
    Ok(LogBackend::File(log_dir))
}

fn init_file(log_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("creating log directory {}", log_dir.display()))?;

    let file_appender = tracing_appender::rolling::daily(log_dir, "doorbell-faces.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // The writer thread stops when the guard drops.
    static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
        std::sync::OnceLock::new();
    let _ = GUARD.set(guard);

    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .try_init()
        .context("installing file subscriber")?;

    tracing::info!(dir = ?log_dir, "Logging initialized with file backend");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives() {
        assert_eq!(resolve_directives(None, None), "info,ureq=warn");
        assert_eq!(resolve_directives(Some("  ".to_string()), None), "info,ureq=warn");
    }

    #[test]
    fn test_own_variable_wins() {
        let resolved = resolve_directives(Some("debug".to_string()), Some("trace".to_string()));
        assert_eq!(resolved, "debug,ureq=warn");
    }

    #[test]
    fn test_full_directives_pass_through() {
        let resolved = resolve_directives(None, Some("doorbell_faces=trace,ureq=debug".to_string()));
        assert_eq!(resolved, "doorbell_faces=trace,ureq=debug");
        assert!(EnvFilter::try_new(&resolved).is_ok());
    }

    #[test]
    fn test_default_log_dir_is_namespaced() {
        assert!(default_log_dir().ends_with("doorbell-faces/logs"));
    }
}
