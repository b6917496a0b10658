//! Runtime configuration
//!
//! Loaded from a JSON file or the environment and passed explicitly to the
//! client and reconciler.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::ReconcileMode;
use crate::reconcile::ReconcileOptions;

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_LISTEN: &str = "0.0.0.0:8000";

/// Environment variable prefix
pub const ENV_PREFIX: &str = "TEAMGRANT_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the dashboard platform
    #[serde(alias = "grafana_url")]
    pub api_url: String,
    /// Bearer token for the management API
    pub api_token: String,
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub tls_verify: bool,
    pub journal_path: Option<PathBuf>,
    pub link_external_groups: bool,
    pub default_mode: ReconcileMode,
    pub listen: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: String::new(),
            api_token: String::new(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            tls_verify: true,
            journal_path: None,
            link_external_groups: false,
            default_mode: ReconcileMode::Strict,
            listen: DEFAULT_LISTEN.to_string(),
        }
    }
}

impl Config {
    /// Read a JSON config file and validate it
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let config = Self::read_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a JSON config file without validating, so callers can layer overrides
    pub fn read_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        serde_json::from_str(&text).map_err(|e| Error::Config(format!("invalid {}: {e}", path.display())))
    }

    /// Defaults overridden by `TEAMGRANT_*` variables, validated
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Override fields from `lookup("TEAMGRANT_API_URL")` and friends
    pub fn apply_env<F: Fn(&str) -> Option<String>>(&mut self, lookup: F) -> Result<()> {
        let get = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));
        if let Some(v) = get("API_URL") {
            self.api_url = v;
        }
        if let Some(v) = get("API_TOKEN") {
            self.api_token = v;
        }
        if let Some(v) = get("TIMEOUT_SECS") {
            self.timeout_secs = parse("TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("CONNECT_TIMEOUT_SECS") {
            self.connect_timeout_secs = parse("CONNECT_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("TLS_VERIFY") {
            self.tls_verify = parse("TLS_VERIFY", &v)?;
        }
        if let Some(v) = get("JOURNAL") {
            self.journal_path = Some(PathBuf::from(v));
        }
        if let Some(v) = get("LINK_EXTERNAL_GROUPS") {
            self.link_external_groups = parse("LINK_EXTERNAL_GROUPS", &v)?;
        }
        if let Some(v) = get("MODE") {
            self.default_mode = match v.as_str() {
                "strict" => ReconcileMode::Strict,
                "continue" => ReconcileMode::Continue,
                other => return Err(Error::Config(format!("{ENV_PREFIX}MODE: unknown mode '{other}'"))),
            };
        }
        if let Some(v) = get("LISTEN") {
            self.listen = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.api_url.trim().is_empty() || self.api_token.trim().is_empty() {
            return Err(Error::Config("API URL or API token is missing".into()));
        }
        if !(self.api_url.starts_with("http://") || self.api_url.starts_with("https://")) {
            return Err(Error::Config(format!("API URL must be http(s): {}", self.api_url)));
        }
        if self.timeout_secs == 0 {
            return Err(Error::Config("timeout_secs must be positive".into()));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn reconcile_options(&self) -> ReconcileOptions {
        ReconcileOptions { default_mode: self.default_mode, link_external_groups: self.link_external_groups }
    }
}

fn parse<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{ENV_PREFIX}{name}: cannot parse '{value}'")))
}
