//! Configuration loader and validator for the forum mailer.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::normalize::address::clean_address;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub site: Site,
    #[serde(default)]
    pub batching: Batching,
    pub transport: Transport,
    pub smtp: Smtp,
    #[serde(default)]
    pub policy: Policy,
}

/// Worker and storage settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    pub poll_interval_ms: u64,
    pub max_backoff_seconds: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

/// Site identity used for default senders and templates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Site {
    pub name: String,
    pub home_url: String,
    #[serde(default)]
    pub from_email: Option<String>,
    #[serde(default)]
    pub logo_url: Option<String>,
}

/// Upper bound for `batching.interval_seconds` and `batching.jitter_seconds`.
pub const MAX_BATCH_DELAY_SECS: u64 = 86_400;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Batching {
    pub batch_size: usize,
    pub interval_seconds: u64,
    #[serde(default)]
    pub jitter_seconds: u64,
}

impl Default for Batching {
    fn default() -> Self {
        Self {
            batch_size: 10,
            interval_seconds: 60,
            jitter_seconds: 0,
        }
    }
}

/// Preferred HTTP transport credentials. An empty key means no direct client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transport {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_api_base")]
    pub base_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

/// Fallback SMTP relay used for per-recipient sends.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Smtp {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub tls: bool,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

/// Extra CC/BCC recipients added to every batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Policy {
    #[serde(default)]
    pub cc: Vec<String>,
    #[serde(default)]
    pub bcc: Vec<String>,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_api_base() -> String {
    "https://api.emailit.com/".into()
}

fn default_timeout() -> u64 {
    30
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    /// SQLite URL for the outbox, overridable through `DATABASE_URL`.
    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| format!("sqlite://{}/forum-mailer.db", self.app.data_dir))
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.poll_interval_ms == 0 {
        return Err(ConfigError::Invalid("app.poll_interval_ms must be > 0"));
    }
    if cfg.app.max_attempts == 0 {
        return Err(ConfigError::Invalid("app.max_attempts must be > 0"));
    }

    if cfg.site.name.trim().is_empty() {
        return Err(ConfigError::Invalid("site.name must be non-empty"));
    }
    let home = reqwest::Url::parse(&cfg.site.home_url)
        .map_err(|_| ConfigError::Invalid("site.home_url must be an absolute URL"))?;
    if home.host_str().is_none() {
        return Err(ConfigError::Invalid("site.home_url must include a host"));
    }
    if let Some(from) = cfg.site.from_email.as_deref().filter(|f| !f.trim().is_empty()) {
        if clean_address(from).is_none() {
            return Err(ConfigError::Invalid("site.from_email must be a valid address"));
        }
    }

    if cfg.batching.batch_size == 0 {
        return Err(ConfigError::Invalid("batching.batch_size must be > 0"));
    }
    if cfg.batching.interval_seconds > MAX_BATCH_DELAY_SECS {
        return Err(ConfigError::Invalid("batching.interval_seconds must be <= 86400"));
    }
    if cfg.batching.jitter_seconds > MAX_BATCH_DELAY_SECS {
        return Err(ConfigError::Invalid("batching.jitter_seconds must be <= 86400"));
    }

    if reqwest::Url::parse(&cfg.transport.base_url).is_err() {
        return Err(ConfigError::Invalid("transport.base_url must be an absolute URL"));
    }
    if cfg.transport.timeout_seconds == 0 {
        return Err(ConfigError::Invalid("transport.timeout_seconds must be > 0"));
    }

    if cfg.smtp.host.trim().is_empty() {
        return Err(ConfigError::Invalid("smtp.host must be non-empty"));
    }
    if cfg.smtp.port == 0 {
        return Err(ConfigError::Invalid("smtp.port must be > 0"));
    }

    Ok(())
}

/// Returns the example YAML configuration.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  poll_interval_ms: 500
  max_backoff_seconds: 300
  max_attempts: 5

site:
  name: "Example Forum"
  home_url: "https://forum.example.com"
  logo_url: "https://forum.example.com/logo.png"

batching:
  batch_size: 10
  interval_seconds: 60
  jitter_seconds: 0

transport:
  api_key: "YOUR_EMAILIT_API_KEY"
  base_url: "https://api.emailit.com/"
  timeout_seconds: 30

smtp:
  host: "localhost"
  port: 25
  tls: false

policy:
  cc: []
  bcc:
    - "moderators@forum.example.com"
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn example_config() -> Config {
        serde_yaml::from_str(example()).unwrap()
    }

    #[test]
    fn parse_example_ok() {
        let cfg = example_config();
        validate(&cfg).unwrap();
        assert_eq!(cfg.batching.batch_size, 10);
        assert_eq!(cfg.policy.bcc, vec!["moderators@forum.example.com"]);
        assert_eq!(cfg.smtp.timeout_seconds, 30);
    }

    #[test]
    fn sections_with_defaults_may_be_omitted() {
        let yaml = r#"app:
  data_dir: "./data"
  poll_interval_ms: 100
  max_backoff_seconds: 60
site:
  name: "Forum"
  home_url: "https://forum.example.com"
transport: {}
smtp:
  host: "mail.example.com"
  port: 587
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.app.max_attempts, 5);
        assert_eq!(cfg.batching, Batching::default());
        assert!(cfg.transport.api_key.is_empty());
        assert_eq!(cfg.transport.base_url, "https://api.emailit.com/");
        assert_eq!(cfg.policy, Policy::default());
    }

    #[test]
    fn invalid_site() {
        let mut cfg = example_config();
        cfg.site.home_url = "not a url".into();
        match validate(&cfg).unwrap_err() {
            ConfigError::Invalid(msg) => assert!(msg.contains("site.home_url")),
            _ => panic!("wrong error"),
        }

        let mut cfg = example_config();
        cfg.site.from_email = Some("nope".into());
        match validate(&cfg).unwrap_err() {
            ConfigError::Invalid(msg) => assert!(msg.contains("site.from_email")),
            _ => panic!("wrong error"),
        }

        let mut cfg = example_config();
        cfg.site.name = " ".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn invalid_batching_and_smtp() {
        let mut cfg = example_config();
        cfg.batching.batch_size = 0;
        match validate(&cfg).unwrap_err() {
            ConfigError::Invalid(msg) => assert!(msg.contains("batch_size")),
            _ => panic!("wrong error"),
        }

        let mut cfg = example_config();
        cfg.batching.interval_seconds = u64::MAX;
        match validate(&cfg).unwrap_err() {
            ConfigError::Invalid(msg) => assert!(msg.contains("interval_seconds")),
            _ => panic!("wrong error"),
        }

        let mut cfg = example_config();
        cfg.batching.jitter_seconds = MAX_BATCH_DELAY_SECS + 1;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg = example_config();
        cfg.smtp.host = "".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg = example_config();
        cfg.app.poll_interval_ms = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn ensure_dirs_creates_data_dir() {
        let td = tempdir().unwrap();
        let data_path = td.path().join("data");
        let mut cfg = example_config();
        cfg.app.data_dir = data_path.to_string_lossy().to_string();
        cfg.ensure_dirs().unwrap();
        assert!(data_path.exists());
    }

    #[test]
    fn load_from_file_ok() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.yaml");
        fs::write(&p, example()).unwrap();
        let cfg = load(Some(&p)).unwrap();
        assert_eq!(cfg.site.name, "Example Forum");
    }
}
