use std::path::Path;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{fmt, fmt::time::UtcTime, prelude::*, EnvFilter};

use crate::config::LoggingConfig;
use crate::{AppError, AppResult};

pub const LOG_ENV_VAR: &str = "CAD_DISPATCH_LOG";
pub const DEFAULT_LOG_FILTER: &str = "cad_dispatch=info,sqlx=warn";
const LOG_FILE_PREFIX: &str = "cad-dispatch.log";

/// Keeps the background file writer alive; drop it last.
#[must_use]
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

/// Environment wins over the config file, which wins over the default.
pub fn resolve_filter(from_env: Option<String>, configured: Option<&str>) -> String {
    from_env
        .filter(|v| !v.trim().is_empty())
        .or_else(|| configured.map(str::to_string))
        .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string())
}

/// Installs the JSON subscriber on stderr, plus a daily-rolled file when
/// `config.dir` is set. A second call keeps the first subscriber and
/// only logs that it was skipped.
pub fn init_logging(config: &LoggingConfig) -> AppResult<LogGuard> {
    let directives = resolve_filter(std::env::var(LOG_ENV_VAR).ok(), config.filter.as_deref());
    let filter = EnvFilter::try_new(&directives).map_err(|err| {
        AppError::new("LOGGING/INVALID_FILTER", err.to_string()).with_context("filter", directives.clone())
    })?;

    // stderr keeps stdout clean for command output such as `status`.
    let console = fmt::layer()
        .json()
        .with_target(true)
        .with_timer(UtcTime::rfc_3339())
        .with_writer(std::io::stderr);

    let file = match config.dir.as_deref() {
        Some(dir) => Some(file_writer(dir)?),
        None => None,
    };
    let (writer, file_guard) = match file {
        Some((writer, guard)) => (Some(writer), Some(guard)),
        None => (None, None),
    };
    let file_layer = writer.map(|writer| {
        fmt::layer()
            .json()
            .with_target(true)
            .with_timer(UtcTime::rfc_3339())
            .with_ansi(false)
            .with_writer(writer)
    });

    if let Err(err) = tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .try_init()
    {
        // The subscriber already in place keeps receiving events.
        tracing::debug!(
            target: "cad_dispatch",
            event = "logging_already_initialized",
            error = %err
        );
    }

    Ok(LogGuard { _file: file_guard })
}

fn file_writer(dir: &Path) -> AppResult<(NonBlocking, WorkerGuard)> {
    std::fs::create_dir_all(dir)
        .map_err(|err| AppError::from(err).with_context("log_dir", dir.display().to_string()))?;
    let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
    Ok(tracing_appender::non_blocking(appender))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_filter_beats_config() {
        assert_eq!(
            resolve_filter(Some("debug".into()), Some("warn")),
            "debug".to_string()
        );
        assert_eq!(resolve_filter(None, Some("warn")), "warn".to_string());
        assert_eq!(resolve_filter(Some("  ".into()), None), DEFAULT_LOG_FILTER);
    }

    #[test]
    fn bad_filter_is_reported() {
        let config = LoggingConfig {
            dir: None,
            filter: Some("cad_dispatch=loud".into()),
        };
        if std::env::var(LOG_ENV_VAR).is_err() {
            let err = init_logging(&config).err().expect("invalid filter");
            assert_eq!(err.code(), "LOGGING/INVALID_FILTER");
        }
    }

    #[test]
    fn second_init_keeps_first_subscriber() {
        let config = LoggingConfig {
            dir: None,
            filter: Some("cad_dispatch=warn".into()),
        };
        if std::env::var(LOG_ENV_VAR).is_err() {
            let _first = init_logging(&config).expect("first init");
            let _second = init_logging(&config).expect("second init is not an error");
        }
    }
}
