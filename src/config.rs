//! Run configuration.
//!
//! Loaded once at startup from defaults, an optional JSON file, `ASC_*`
//! environment variables and CLI flags (in that order), then validated and
//! passed down explicitly.
use crate::poller::{
    PollSettings, DEFAULT_MAX_WAIT, DEFAULT_POLL_INTERVAL, MAX_WAIT_LIMIT,
};
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_API_BASE_URL: &str = "https://api.appstoreconnect.apple.com";
pub const CONFIG_PATH_ENV: &str = "TFPILOT_CONFIG";
pub const DEFAULT_CERTIFICATE_TYPE: &str = "DEVELOPER_ID_APPLICATION";

const ENV_ISSUER_ID: &str = "ASC_ISSUER_ID";
const ENV_KEY_ID: &str = "ASC_KEY_ID";
const ENV_KEY_PATH: &str = "ASC_KEY_PATH";
const ENV_APP_ID: &str = "ASC_APP_ID";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub issuer_id: String,
    pub key_id: String,
    pub key_path: PathBuf,
    pub app_id: String,
    pub api_base_url: String,
    pub request_timeout_secs: u64,
    pub poll_interval_secs: u64,
    pub max_wait_minutes: u64,
    pub recent_build_limit: usize,
    pub certificate: CertificateConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            issuer_id: String::new(),
            key_id: String::new(),
            key_path: PathBuf::new(),
            app_id: String::new(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            request_timeout_secs: 30,
            poll_interval_secs: DEFAULT_POLL_INTERVAL.as_secs(),
            max_wait_minutes: DEFAULT_MAX_WAIT.as_secs() / 60,
            recent_build_limit: 10,
            certificate: CertificateConfig::default(),
        }
    }
}

/// Defaults for `tfpilot certificate`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CertificateConfig {
    pub certificate_type: String,
    pub email: Option<String>,
    pub common_name: Option<String>,
    pub country: String,
    /// Where the private key and certificate are written; `~/.private_keys`
    /// when unset.
    pub output_dir: Option<PathBuf>,
}

impl Default for CertificateConfig {
    fn default() -> Self {
        Self {
            certificate_type: DEFAULT_CERTIFICATE_TYPE.to_string(),
            email: None,
            common_name: None,
            country: "US".to_string(),
            output_dir: None,
        }
    }
}

impl Config {
    pub fn poll_settings(&self) -> PollSettings {
        PollSettings {
            interval: Duration::from_secs(self.poll_interval_secs),
            max_wait: Duration::from_secs(self.max_wait_minutes.saturating_mul(60)),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Key path with a leading `~/` expanded.
    pub fn resolved_key_path(&self) -> PathBuf {
        expand_home(&self.key_path)
    }
}

/// `<config dir>/tfpilot/config.json` for the current platform.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("tfpilot").join("config.json"))
}

/// Load config from `explicit`, `$TFPILOT_CONFIG`, or the default location,
/// then apply `ASC_*` environment overrides.
///
/// Only the default location may be absent.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let named = explicit
        .map(Path::to_path_buf)
        .or_else(|| env::var_os(CONFIG_PATH_ENV).map(PathBuf::from));
    let mut config = match named {
        Some(path) => read_config(&path)?,
        None => match default_config_path() {
            Some(path) if path.is_file() => read_config(&path)?,
            _ => Config::default(),
        },
    };
    apply_env_overrides(&mut config, |name| env::var(name).ok());
    Ok(config)
}

pub fn read_config(path: &Path) -> Result<Config> {
    let bytes = fs::read(path).with_context(|| format!("read config {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("parse config JSON {}", path.display()))
}

/// Overlay non-empty `ASC_*` variables from `lookup`.
pub fn apply_env_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    let value = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
    if let Some(issuer_id) = value(ENV_ISSUER_ID) {
        config.issuer_id = issuer_id;
    }
    if let Some(key_id) = value(ENV_KEY_ID) {
        config.key_id = key_id;
    }
    if let Some(key_path) = value(ENV_KEY_PATH) {
        config.key_path = PathBuf::from(key_path);
    }
    if let Some(app_id) = value(ENV_APP_ID) {
        config.app_id = app_id;
    }
}

/// Check the fields every API call needs.
pub fn validate_config(config: &Config) -> Result<()> {
    require(&config.issuer_id, "issuer_id", ENV_ISSUER_ID)?;
    require(&config.key_id, "key_id", ENV_KEY_ID)?;
    if config.key_path.as_os_str().is_empty() {
        return Err(anyhow!(
            "key_path is not configured (set it in the config file or {ENV_KEY_PATH})"
        ));
    }
    let key_path = config.resolved_key_path();
    if !key_path.is_file() {
        return Err(anyhow!(
            "API private key not found at {} (download it from App Store Connect > Users and Access > Keys)",
            key_path.display()
        ));
    }
    if !config.api_base_url.starts_with("https://") && !config.api_base_url.starts_with("http://")
    {
        return Err(anyhow!(
            "api_base_url must be an http(s) URL (got {:?})",
            config.api_base_url
        ));
    }
    if config.request_timeout_secs == 0 {
        return Err(anyhow!("request_timeout_secs must be greater than zero"));
    }
    validate_polling(config)
}

/// The release workflow additionally needs an app and sane polling bounds.
pub fn validate_release_config(config: &Config) -> Result<()> {
    validate_config(config)?;
    require(&config.app_id, "app_id", ENV_APP_ID)
}

fn validate_polling(config: &Config) -> Result<()> {
    if config.poll_interval_secs == 0 {
        return Err(anyhow!("poll_interval_secs must be greater than zero"));
    }
    if config.max_wait_minutes == 0 {
        return Err(anyhow!("max_wait_minutes must be greater than zero"));
    }
    let limit_minutes = MAX_WAIT_LIMIT.as_secs() / 60;
    let within_limit = config
        .max_wait_minutes
        .checked_mul(60)
        .is_some_and(|secs| secs <= MAX_WAIT_LIMIT.as_secs());
    if !within_limit {
        return Err(anyhow!(
            "max_wait_minutes must be at most {limit_minutes} (got {})",
            config.max_wait_minutes
        ));
    }
    if config.recent_build_limit == 0 {
        return Err(anyhow!("recent_build_limit must be greater than zero"));
    }
    Ok(())
}

fn require(value: &str, field: &str, env_name: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(anyhow!(
            "{field} is not configured (set it in the config file or {env_name})"
        ));
    }
    Ok(())
}

pub fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), dirs::home_dir()) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
