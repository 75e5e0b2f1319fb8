use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::bucket;
use crate::sigv4::{self, Credentials};
use crate::kudos::{self, DEFAULT_PAGE_SIZE};
use crate::visibility::{DEFAULT_ROOT_MARGIN, DEFAULT_THRESHOLD};

const DEFAULT_ENV_PREFIX: &str = "KUDOS";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub ui: UIConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("config: site.base_url {0:?} is not a valid http(s) url")]
    BaseUrl(String),
    #[error("config: feed.page_size must be between 1 and 100")]
    PageSize,
    #[error("config: feed.visibility_threshold must be within 0..=1")]
    Threshold,
    #[error("config: storage.{0} is required for uploads")]
    Storage(&'static str),
    #[error("config: storage.endpoint {0:?} is not a valid url")]
    StorageEndpoint(String),
    #[error("config: storage.access_key and storage.secret_key must be set together")]
    StorageKeys,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SiteConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub session_token: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_site_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            session_token: String::new(),
            user_agent: default_user_agent(),
            timeout: default_site_timeout(),
        }
    }
}

fn default_base_url() -> String {
    kudos::DEFAULT_BASE_URL.to_string()
}

fn default_user_agent() -> String {
    format!("kudos-tui/{}", crate::VERSION)
}

fn default_site_timeout() -> Duration {
    Duration::from_secs(20)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedConfig {
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_root_margin_rows")]
    pub root_margin_rows: u16,
    #[serde(default = "default_visibility_threshold")]
    pub visibility_threshold: f32,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            root_margin_rows: default_root_margin_rows(),
            visibility_threshold: default_visibility_threshold(),
        }
    }
}

fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

fn default_root_margin_rows() -> u16 {
    DEFAULT_ROOT_MARGIN
}

fn default_visibility_threshold() -> f32 {
    DEFAULT_THRESHOLD
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub bucket: String,
    #[serde(default)]
    pub access_key: String,
    #[serde(default)]
    pub secret_key: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub access_token: String,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    #[serde(default = "default_storage_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            bucket: String::new(),
            access_key: String::new(),
            secret_key: String::new(),
            region: default_region(),
            access_token: String::new(),
            key_prefix: default_key_prefix(),
            timeout: default_storage_timeout(),
        }
    }
}

fn default_region() -> String {
    sigv4::DEFAULT_REGION.to_string()
}

fn default_key_prefix() -> String {
    bucket::DEFAULT_KEY_PREFIX.to_string()
}

fn default_storage_timeout() -> Duration {
    Duration::from_secs(30)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UIConfig {
    #[serde(default = "default_theme")]
    pub theme: String,
}

impl Default for UIConfig {
    fn default() -> Self {
        Self {
            theme: default_theme(),
        }
    }
}

fn default_theme() -> String {
    "default".into()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "warn".into()
}

impl Config {
    /// Checks the settings every run depends on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match Url::parse(self.site.base_url.trim()) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            _ => return Err(ConfigError::BaseUrl(self.site.base_url.clone())),
        }
        if self.feed.page_size == 0 || self.feed.page_size > 100 {
            return Err(ConfigError::PageSize);
        }
        if !(0.0..=1.0).contains(&self.feed.visibility_threshold) {
            return Err(ConfigError::Threshold);
        }
        Ok(())
    }

    /// Checks the storage section; only needed by upload and delete.
    pub fn validate_storage(&self) -> Result<(), ConfigError> {
        if self.storage.endpoint.trim().is_empty() {
            return Err(ConfigError::Storage("endpoint"));
        }
        if self.storage.bucket.trim().is_empty() {
            return Err(ConfigError::Storage("bucket"));
        }
        if Url::parse(self.storage.endpoint.trim()).is_err() {
            return Err(ConfigError::StorageEndpoint(self.storage.endpoint.clone()));
        }
        if self.storage.access_key.trim().is_empty() != self.storage.secret_key.is_empty() {
            return Err(ConfigError::StorageKeys);
        }
        Ok(())
    }

    pub fn bucket_config(&self) -> bucket::Config {
        bucket::Config {
            endpoint: self.storage.endpoint.clone(),
            bucket: self.storage.bucket.clone(),
            credentials: self.storage_credentials(),
            region: self.storage.region.clone(),
            access_token: Some(self.storage.access_token.clone())
                .filter(|token| !token.trim().is_empty()),
            key_prefix: self.storage.key_prefix.clone(),
            timeout: self.storage.timeout,
            http_client: None,
        }
    }

    fn storage_credentials(&self) -> Option<Credentials> {
        let access_key = self.storage.access_key.trim();
        if access_key.is_empty() || self.storage.secret_key.is_empty() {
            return None;
        }
        Some(Credentials {
            access_key: access_key.to_string(),
            secret_key: self.storage.secret_key.clone(),
        })
    }

    pub fn session_token(&self) -> Option<String> {
        let token = self.site.session_token.trim();
        (!token.is_empty()).then(|| token.to_string())
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub config_file: Option<PathBuf>,
    pub env_prefix: Option<String>,
}

pub fn load(options: LoadOptions) -> Result<Config> {
    let mut cfg = Config::default();

    if let Some(path) = options.config_file.as_ref() {
        if path.exists() {
            let from_file = read_config_file(path)?;
            cfg = merge_config(cfg, from_file);
        }
    } else if let Some(default_path) = default_config_path() {
        if default_path.exists() {
            let from_file = read_config_file(&default_path)?;
            cfg = merge_config(cfg, from_file);
        }
    }

    let prefix = options.env_prefix.as_deref().unwrap_or(DEFAULT_ENV_PREFIX);
    cfg = merge_env(cfg, &load_env(prefix));

    Ok(cfg)
}

fn read_config_file(path: &Path) -> Result<Config> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&data)
        .with_context(|| format!("Failed to parse config file at {}", path.display()))?;
    Ok(config)
}

fn merge_config(mut base: Config, other: Config) -> Config {
    if !other.site.base_url.is_empty() {
        base.site.base_url = other.site.base_url;
    }
    if !other.site.session_token.is_empty() {
        base.site.session_token = other.site.session_token;
    }
    if !other.site.user_agent.is_empty() {
        base.site.user_agent = other.site.user_agent;
    }
    if !other.site.timeout.is_zero() {
        base.site.timeout = other.site.timeout;
    }

    if other.feed.page_size != 0 {
        base.feed.page_size = other.feed.page_size;
    }
    base.feed.root_margin_rows = other.feed.root_margin_rows;
    base.feed.visibility_threshold = other.feed.visibility_threshold;

    if !other.storage.endpoint.is_empty() {
        base.storage.endpoint = other.storage.endpoint;
    }
    if !other.storage.bucket.is_empty() {
        base.storage.bucket = other.storage.bucket;
    }
    if !other.storage.access_key.is_empty() {
        base.storage.access_key = other.storage.access_key;
    }
    if !other.storage.secret_key.is_empty() {
        base.storage.secret_key = other.storage.secret_key;
    }
    if !other.storage.region.is_empty() {
        base.storage.region = other.storage.region;
    }
    if !other.storage.access_token.is_empty() {
        base.storage.access_token = other.storage.access_token;
    }
    base.storage.key_prefix = other.storage.key_prefix;
    if !other.storage.timeout.is_zero() {
        base.storage.timeout = other.storage.timeout;
    }

    if !other.ui.theme.is_empty() {
        base.ui.theme = other.ui.theme;
    }

    if !other.log.level.is_empty() {
        base.log.level = other.log.level;
    }
    if other.log.file.is_some() {
        base.log.file = other.log.file;
    }

    base
}

fn load_env(prefix: &str) -> HashMap<String, String> {
    let upper_prefix = format!("{}_", prefix.to_uppercase());
    env::vars()
        .filter_map(|(key, value)| {
            key.strip_prefix(&upper_prefix)
                .map(|stripped| (stripped.to_ascii_lowercase().replace("__", "."), value))
        })
        .collect()
}

// Env values land directly on the merged config; unlike file sections they
// only carry the keys that were actually set.
fn merge_env(mut cfg: Config, vars: &HashMap<String, String>) -> Config {
    for (key, value) in vars {
        apply_env_value(&mut cfg, key, value.clone());
    }
    cfg
}

fn apply_env_value(cfg: &mut Config, key: &str, value: String) {
    match key {
        "site.base_url" => cfg.site.base_url = value,
        "site.session_token" => cfg.site.session_token = value,
        "site.user_agent" => cfg.site.user_agent = value,
        "site.timeout" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.site.timeout = duration;
            }
        }
        "feed.page_size" => {
            if let Ok(parsed) = value.parse::<u32>() {
                cfg.feed.page_size = parsed;
            }
        }
        "feed.root_margin_rows" => {
            if let Ok(parsed) = value.parse::<u16>() {
                cfg.feed.root_margin_rows = parsed;
            }
        }
        "feed.visibility_threshold" => {
            if let Ok(parsed) = value.parse::<f32>() {
                cfg.feed.visibility_threshold = parsed;
            }
        }
        "storage.endpoint" => cfg.storage.endpoint = value,
        "storage.bucket" => cfg.storage.bucket = value,
        "storage.access_key" => cfg.storage.access_key = value,
        "storage.secret_key" => cfg.storage.secret_key = value,
        "storage.region" => cfg.storage.region = value,
        "storage.access_token" => cfg.storage.access_token = value,
        "storage.key_prefix" => cfg.storage.key_prefix = value,
        "storage.timeout" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.storage.timeout = duration;
            }
        }
        "ui.theme" => cfg.ui.theme = value,
        "log.level" => cfg.log.level = value,
        "log.file" => cfg.log.file = Some(PathBuf::from(value)),
        _ => log::debug!("config: ignoring unknown env key {key}"),
    }
}

pub fn default_path() -> Option<PathBuf> {
    default_config_path()
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("kudos-tui").join("config.yaml"))
}

/// Stores the site session cookie value, keeping every other setting.
pub fn save_session_token(path: Option<PathBuf>, token: &str) -> Result<PathBuf> {
    let token = token.trim();
    anyhow::ensure!(!token.is_empty(), "config: site.session_token is required");

    let path = if let Some(path) = path {
        path
    } else {
        default_config_path().context("config: unable to determine default config path")?
    };

    let mut cfg = if path.exists() {
        read_config_file(&path)?
    } else {
        Config::default()
    };
    cfg.site.session_token = token.to_string();

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("config: failed to create directory {}", parent.display()))?;
    }

    let contents = serde_yaml::to_string(&cfg).context("config: failed to serialize config")?;
    fs::write(&path, contents)
        .with_context(|| format!("config: failed to write file {}", path.display()))?;

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn missing_file() -> LoadOptions {
        LoadOptions {
            config_file: Some(PathBuf::from("/nonexistent/kudos-tui/config.yaml")),
            env_prefix: Some("KUDOS_TEST_NONE".into()),
        }
    }

    #[test]
    fn load_defaults_without_files() {
        let cfg = load(missing_file()).unwrap();
        assert_eq!(cfg.ui.theme, "default");
        assert_eq!(cfg.site.base_url, kudos::DEFAULT_BASE_URL);
        assert_eq!(cfg.site.timeout, Duration::from_secs(20));
        assert_eq!(cfg.feed.page_size, 10);
        assert_eq!(cfg.feed.root_margin_rows, 4);
        assert_eq!(cfg.log.level, "warn");
        assert!(cfg.session_token().is_none());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn file_values_merge_over_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            "site:\n  base_url: https://kudos.example\n  timeout: 5s\nfeed:\n  page_size: 25\nstorage:\n  endpoint: https://e2.example\n  bucket: kudos-images\n",
        )
        .unwrap();
        let cfg = load(LoadOptions {
            config_file: Some(path),
            env_prefix: Some("KUDOS_TEST_NONE".into()),
        })
        .unwrap();
        assert_eq!(cfg.site.base_url, "https://kudos.example");
        assert_eq!(cfg.site.timeout, Duration::from_secs(5));
        assert_eq!(cfg.feed.page_size, 25);
        assert_eq!(cfg.feed.visibility_threshold, DEFAULT_THRESHOLD);
        assert_eq!(cfg.storage.key_prefix, "kudos");
        assert!(cfg.validate_storage().is_ok());

        let bucket = cfg.bucket_config();
        assert_eq!(bucket.bucket, "kudos-images");
        assert!(bucket.access_token.is_none());
        assert!(bucket.credentials.is_none());
        assert_eq!(bucket.region, "us-east-1");
    }

    #[test]
    fn storage_keys_become_signing_credentials() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            "storage:\n  endpoint: https://e2.example\n  bucket: kudos-images\n  access_key: AKID\n  secret_key: shh\n  region: eu-west-2\n",
        )
        .unwrap();
        let cfg = load(LoadOptions {
            config_file: Some(path),
            env_prefix: Some("KUDOS_TEST_NONE".into()),
        })
        .unwrap();
        assert!(cfg.validate_storage().is_ok());
        let bucket = cfg.bucket_config();
        assert_eq!(
            bucket.credentials,
            Some(Credentials {
                access_key: "AKID".into(),
                secret_key: "shh".into(),
            })
        );
        assert_eq!(bucket.region, "eu-west-2");

        let mut half = cfg.clone();
        half.storage.secret_key.clear();
        assert_eq!(half.validate_storage(), Err(ConfigError::StorageKeys));
        assert!(half.bucket_config().credentials.is_none());
    }

    #[test]
    fn save_token_creates_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.yaml");
        save_session_token(Some(path.clone()), "  abc123 ").unwrap();
        let saved = read_config_file(&path).unwrap();
        assert_eq!(saved.site.session_token, "abc123");
        assert!(save_session_token(Some(path), " ").is_err());
    }

    #[test]
    fn env_overrides() {
        env::set_var("KUDOS_ENVTEST_UI__THEME", "dracula");
        env::set_var("KUDOS_ENVTEST_FEED__PAGE_SIZE", "3");
        env::set_var("KUDOS_ENVTEST_SITE__TIMEOUT", "2s");
        let cfg = load(LoadOptions {
            config_file: Some(PathBuf::from("/nonexistent/config.yaml")),
            env_prefix: Some("KUDOS_ENVTEST".into()),
        })
        .unwrap();
        assert_eq!(cfg.ui.theme, "dracula");
        assert_eq!(cfg.feed.page_size, 3);
        assert_eq!(cfg.site.timeout, Duration::from_secs(2));
        env::remove_var("KUDOS_ENVTEST_UI__THEME");
        env::remove_var("KUDOS_ENVTEST_FEED__PAGE_SIZE");
        env::remove_var("KUDOS_ENVTEST_SITE__TIMEOUT");
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut cfg = Config::default();
        cfg.site.base_url = "ftp://kudos.example".into();
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::BaseUrl("ftp://kudos.example".into()))
        );

        let mut cfg = Config::default();
        cfg.feed.page_size = 0;
        assert_eq!(cfg.validate(), Err(ConfigError::PageSize));

        let mut cfg = Config::default();
        cfg.feed.visibility_threshold = 1.5;
        assert_eq!(cfg.validate(), Err(ConfigError::Threshold));

        assert_eq!(
            Config::default().validate_storage(),
            Err(ConfigError::Storage("endpoint"))
        );
    }
}
