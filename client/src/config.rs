//! Client configuration
//!
//! Loaded from an optional TOML file named by `SEALROOM_CONFIG`, then
//! overridden field by field from the environment. Every field except the user
//! id has a default, so a bare `SEALROOM_USER=alice` is enough to start.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{AppError, AppResult};

pub const CONFIG_PATH_VAR: &str = "SEALROOM_CONFIG";
pub const USER_VAR: &str = "SEALROOM_USER";
pub const DATABASE_VAR: &str = "SEALROOM_DB";
pub const DIRECTORY_URL_VAR: &str = "SEALROOM_DIRECTORY_URL";
pub const LOG_VAR: &str = "SEALROOM_LOG";

/// Client configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Local user name, as known to the relay and the directory
    pub user_id: String,
    /// SQLite key store file
    pub database_path: PathBuf,
    /// Relay server base URL serving `/get_public_key/{user}`
    pub directory_url: String,
    /// Directory request timeout
    pub request_timeout_secs: u64,
    /// `tracing` filter directive, overridden by `RUST_LOG`
    pub log_filter: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            user_id: String::new(),
            database_path: PathBuf::from("sealroom.db"),
            directory_url: "http://localhost:5000/".into(),
            request_timeout_secs: 30,
            log_filter: "sealroom=info".into(),
        }
    }
}

impl ClientConfig {
    /// Load from `SEALROOM_CONFIG` (if set) and the environment, then validate
    pub fn from_env() -> AppResult<Self> {
        let mut config = match std::env::var(CONFIG_PATH_VAR) {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_overrides(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file; missing fields keep their defaults
    pub fn from_file(path: &Path) -> AppResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Replace fields with any non-empty value `lookup` returns for their variable
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let value = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(user) = value(USER_VAR) {
            self.user_id = user;
        }
        if let Some(path) = value(DATABASE_VAR) {
            self.database_path = PathBuf::from(path);
        }
        if let Some(url) = value(DIRECTORY_URL_VAR) {
            self.directory_url = url;
        }
        if let Some(filter) = value(LOG_VAR) {
            self.log_filter = filter;
        }
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.user_id.trim().is_empty() {
            return Err(AppError::Config(format!(
                "No user id configured (set user_id or {})",
                USER_VAR
            )));
        }
        if self.request_timeout_secs == 0 {
            return Err(AppError::Config("request_timeout_secs must be positive".into()));
        }
        self.directory_url()?;
        Ok(())
    }

    /// Parsed directory base URL, always ending in `/`
    pub fn directory_url(&self) -> AppResult<Url> {
        let mut url = Url::parse(&self.directory_url)
            .map_err(|e| AppError::Config(format!("Invalid directory URL '{}': {}", self.directory_url, e)))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(AppError::Config(format!(
                "Directory URL must be http or https: {}",
                self.directory_url
            )));
        }
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        Ok(url)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
