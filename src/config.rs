//! Service configuration
//!
//! Loaded from a TOML file and then overridden by CLI flags / environment.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::callsign::DEFAULT_CALLSIGN_TEMPLATE;
use crate::error::CONFIG_INVALID;
use crate::{AppError, AppResult};

pub const APP_DIR_NAME: &str = "cad-dispatch";
pub const DB_FILE_NAME: &str = "cad-dispatch.sqlite3";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database file
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

/// Settings consumed by the assignment workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Maximum number of open calls a unit may be assigned to; unlimited when absent.
    #[serde(default)]
    pub max_assignments_per_unit: Option<u32>,

    /// Status given to a unit when it gets attached to a call.
    #[serde(default)]
    pub assigned_status_id: Option<String>,

    #[serde(default = "default_callsign_template")]
    pub callsign_template: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_assignments_per_unit: None,
            assigned_status_id: None,
            callsign_template: default_callsign_template(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Directory for the rolling JSON log file; stdout only when absent.
    #[serde(default)]
    pub dir: Option<PathBuf>,

    /// `EnvFilter` directives, e.g. `cad_dispatch=debug,sqlx=warn`.
    #[serde(default)]
    pub filter: Option<String>,
}

fn default_db_path() -> PathBuf {
    let base = dirs::data_dir()
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(std::env::temp_dir);
    base.join(APP_DIR_NAME).join(DB_FILE_NAME)
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_callsign_template() -> String {
    DEFAULT_CALLSIGN_TEMPLATE.to_string()
}

impl Config {
    /// Reads `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> AppResult<Config> {
        if !path.exists() {
            tracing::info!(
                target: "cad_dispatch",
                event = "config_defaults",
                path = %path.display()
            );
            return Ok(Config::default());
        }
        let raw = std::fs::read_to_string(path)
            .map_err(|err| AppError::from(err).with_context("path", path.display().to_string()))?;
        let config = Config::from_toml(&raw)
            .map_err(|err| err.with_context("path", path.display().to_string()))?;
        tracing::info!(
            target: "cad_dispatch",
            event = "config_loaded",
            path = %path.display()
        );
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> AppResult<Config> {
        let config: Config = toml::from_str(raw).map_err(|err| {
            AppError::new(CONFIG_INVALID, "Configuration file could not be parsed")
                .with_context("cause", err.to_string())
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.dispatch.max_assignments_per_unit == Some(0) {
            return Err(AppError::new(
                CONFIG_INVALID,
                "max_assignments_per_unit must be at least 1",
            ));
        }
        if self.dispatch.callsign_template.trim().is_empty() {
            return Err(AppError::new(
                CONFIG_INVALID,
                "callsign_template must not be empty",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = Config::from_toml("").expect("defaults");
        assert_eq!(config.dispatch, DispatchConfig::default());
        assert_eq!(config.server.listen.port(), 8080);
        assert!(config.database.path.ends_with(DB_FILE_NAME));
    }

    #[test]
    fn parses_dispatch_section() {
        let config = Config::from_toml(
            r#"
            [dispatch]
            max_assignments_per_unit = 2
            assigned_status_id = "st-assigned"
            callsign_template = "{callsign1}{callsign2}"

            [server]
            listen = "0.0.0.0:9000"
            "#,
        )
        .expect("parse");
        assert_eq!(config.dispatch.max_assignments_per_unit, Some(2));
        assert_eq!(config.dispatch.assigned_status_id.as_deref(), Some("st-assigned"));
        assert_eq!(config.server.listen.port(), 9000);
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let err = Config::from_toml("[dispatch]\nmax_assignments_per_unit = 0\n").unwrap_err();
        assert_eq!(err.code(), CONFIG_INVALID);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = Config::load(&dir.path().join("absent.toml")).expect("defaults");
        assert!(config.dispatch.assigned_status_id.is_none());
    }

    #[test]
    fn malformed_file_reports_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cad-dispatch.toml");
        std::fs::write(&path, "[dispatch\n").expect("write");
        let err = Config::load(&path).unwrap_err();
        assert_eq!(err.code(), CONFIG_INVALID);
        assert!(err.context().contains_key("path"));
    }
}
