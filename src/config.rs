use crate::tags::TagMapping;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AccountConfig {
    pub well_known_url: String,
    pub username: String,
    pub password: Option<String>,
    pub password_command: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MailConfig {
    pub inbox_folder: String,
    pub archive_folder: String,
    pub poll_interval: Duration,
    /// 0 disables periodic retraining.
    pub retrain_every_cycles: u32,
}

/// Settings fixed for the life of the process. Built once in `main` and
/// handed to each component by reference.
#[derive(Debug, Clone)]
pub struct Config {
    pub account: AccountConfig,
    pub mail: MailConfig,
    pub model_path: PathBuf,
    pub tags: TagMapping,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(String),
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    account: RawAccountFields,
    #[serde(default)]
    mail: RawMailConfig,
    #[serde(default)]
    model: RawModelConfig,
    #[serde(default)]
    tags: BTreeMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawAccountFields {
    well_known_url: Option<String>,
    username: Option<String>,
    password: Option<String>,
    password_command: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawMailConfig {
    inbox_folder: Option<String>,
    archive_folder: Option<String>,
    poll_interval_secs: Option<u64>,
    #[serde(default)]
    retrain_every_cycles: u32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawModelConfig {
    path: Option<PathBuf>,
}

const DEFAULT_INBOX_FOLDER: &str = "INBOX";
const DEFAULT_ARCHIVE_FOLDER: &str = "Archive";
const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;

pub fn default_config_path() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        PathBuf::from(xdg).join("mailtagger").join("config.toml")
    } else if let Ok(home) = std::env::var("HOME") {
        PathBuf::from(home)
            .join(".config")
            .join("mailtagger")
            .join("config.toml")
    } else {
        PathBuf::from("config.toml")
    }
}

fn default_model_path(env: &impl Fn(&str) -> Option<String>) -> PathBuf {
    if let Some(xdg) = env("XDG_DATA_HOME") {
        PathBuf::from(xdg).join("mailtagger").join("model.redb")
    } else if let Some(home) = env("HOME") {
        PathBuf::from(home)
            .join(".local")
            .join("share")
            .join("mailtagger")
            .join("model.redb")
    } else {
        PathBuf::from("model.redb")
    }
}

impl Config {
    /// Read and validate the config file. A missing file is not an error:
    /// every setting then has to come from the environment.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    path = %path.display(),
                    "Config file not found, using environment defaults"
                );
                String::new()
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };
        Self::parse_with_env(&contents, |key| std::env::var(key).ok())
    }

    /// Parse `contents`, filling settings the file leaves out from `env`.
    pub fn parse_with_env(
        contents: &str,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let raw: RawConfig =
            toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))?;

        let account = AccountConfig {
            well_known_url: require_field(
                raw.account
                    .well_known_url
                    .or_else(|| env("MAILTAGGER_WELL_KNOWN_URL")),
                "missing well_known_url (in [account] or MAILTAGGER_WELL_KNOWN_URL)",
            )?,
            username: require_field(
                raw.account.username.or_else(|| env("MAILTAGGER_USERNAME")),
                "missing username (in [account] or MAILTAGGER_USERNAME)",
            )?,
            password: raw.account.password.or_else(|| env("MAILTAGGER_PASSWORD")),
            password_command: raw.account.password_command,
        };

        let poll_interval_secs = match raw.mail.poll_interval_secs {
            Some(secs) => secs,
            None => match env("MAILTAGGER_POLL_INTERVAL") {
                Some(value) => value.trim().parse().map_err(|_| {
                    ConfigError::Parse(format!(
                        "MAILTAGGER_POLL_INTERVAL must be a whole number of seconds, got '{}'",
                        value
                    ))
                })?,
                None => DEFAULT_POLL_INTERVAL_SECS,
            },
        };
        if poll_interval_secs == 0 {
            return Err(ConfigError::Parse(
                "poll_interval_secs must be greater than 0".to_string(),
            ));
        }

        let mail = MailConfig {
            inbox_folder: raw
                .mail
                .inbox_folder
                .or_else(|| env("MAILTAGGER_INBOX_FOLDER"))
                .unwrap_or_else(|| DEFAULT_INBOX_FOLDER.to_string()),
            archive_folder: raw
                .mail
                .archive_folder
                .or_else(|| env("MAILTAGGER_ARCHIVE_FOLDER"))
                .unwrap_or_else(|| DEFAULT_ARCHIVE_FOLDER.to_string()),
            poll_interval: Duration::from_secs(poll_interval_secs),
            retrain_every_cycles: raw.mail.retrain_every_cycles,
        };

        let tags = TagMapping::new(raw.tags)
            .map_err(|e| ConfigError::Parse(format!("invalid [tags]: {}", e)))?;
        if tags.is_empty() {
            tracing::warn!("No [tags] configured; nothing will be classified or filed");
        }

        Ok(Config {
            account,
            mail,
            model_path: raw.model.path.unwrap_or_else(|| default_model_path(&env)),
            tags,
        })
    }
}

fn require_field(value: Option<String>, err: &str) -> Result<String, ConfigError> {
    value.ok_or_else(|| ConfigError::Parse(err.to_string()))
}
