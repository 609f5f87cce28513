//! Top-level settings: YAML file plus environment-variable credentials.
//!
//! Structure and the custom enum `Deserialize` impls follow the teacher's
//! `LibLaaSConfig`/`LoggingLevel` pattern (`src/config/src/lib.rs`); the
//! fields themselves mirror `mailroom/core/config.py`'s `PollingSettings`,
//! `TriageSettings`, `LabelSettings`, `LoggingSettings` and `MailroomSettings`.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::de::{self, Deserializer, Visitor};
use serde::Deserialize;

use crate::categories::{resolve_categories, ResolvedCategory, TriageCategory};

pub const CONFIG_PATH_ENV: &str = "MAILROOM_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config.yaml";

const JMAP_TOKEN_ENV: &str = "MAILROOM_JMAP_TOKEN";
const CARDDAV_USERNAME_ENV: &str = "MAILROOM_CARDDAV_USERNAME";
const CARDDAV_PASSWORD_ENV: &str = "MAILROOM_CARDDAV_PASSWORD";

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("config file not found at '{0}' (set {CONFIG_PATH_ENV} or place a config.yaml in the working directory)")]
    NotFound(PathBuf),
    #[error("failed to load config file '{path}': {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: config::ConfigError,
    },
    #[error("{JMAP_TOKEN_ENV} is required but was not set")]
    MissingJmapToken,
    #[error("invalid triage category configuration: {0}")]
    InvalidCategories(String),
}

/// Logging verbosity, parsed case-insensitively from a handful of
/// accepted spellings -- same shape as the teacher's `LoggingLevel`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggingLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl Default for LoggingLevel {
    fn default() -> Self {
        LoggingLevel::Info
    }
}

impl fmt::Display for LoggingLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LoggingLevel::Trace => "trace",
            LoggingLevel::Debug => "debug",
            LoggingLevel::Info => "info",
            LoggingLevel::Warn => "warn",
            LoggingLevel::Error => "error",
        };
        write!(f, "{s}")
    }
}

impl<'de> Deserialize<'de> for LoggingLevel {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct LevelVisitor;

        impl<'de> Visitor<'de> for LevelVisitor {
            type Value = LoggingLevel;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("one of trace, debug, info, warn, error")
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                match v.to_ascii_lowercase().as_str() {
                    "trace" => Ok(LoggingLevel::Trace),
                    "debug" => Ok(LoggingLevel::Debug),
                    "info" => Ok(LoggingLevel::Info),
                    "warn" | "warning" => Ok(LoggingLevel::Warn),
                    "error" => Ok(LoggingLevel::Error),
                    other => Err(de::Error::unknown_variant(
                        other,
                        &["trace", "debug", "info", "warn", "error"],
                    )),
                }
            }
        }

        deserializer.deserialize_str(LevelVisitor)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollingSettings {
    #[serde(default = "default_fallback_interval_secs")]
    pub fallback_interval_secs: u64,
    #[serde(default = "default_debounce_secs")]
    pub debounce_secs: u64,
}

fn default_fallback_interval_secs() -> u64 {
    300
}

fn default_debounce_secs() -> u64 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct TriageSettings {
    #[serde(default)]
    pub categories: Option<Vec<TriageCategory>>,
    #[serde(default = "default_sender_screen_mailbox")]
    pub sender_screen_mailbox: String,
}

fn default_sender_screen_mailbox() -> String {
    "SenderScreen".to_string()
}

impl Default for TriageSettings {
    fn default() -> Self {
        Self {
            categories: None,
            sender_screen_mailbox: default_sender_screen_mailbox(),
        }
    }
}

/// Names of the two cross-cutting labels the screener applies itself
/// (as opposed to the user-applied action labels): the error label
/// marking a stuck sender, and an optional warning label for
/// name mismatches.
#[derive(Debug, Clone, Deserialize)]
pub struct LabelSettings {
    #[serde(default = "default_error_label")]
    pub error_label: String,
    #[serde(default)]
    pub warning_label: Option<String>,
}

fn default_error_label() -> String {
    "@MailroomError".to_string()
}

impl Default for LabelSettings {
    fn default() -> Self {
        Self {
            error_label: default_error_label(),
            warning_label: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSettings {
    #[serde(default)]
    pub level: LoggingLevel,
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: LoggingLevel::default(),
            log_file: None,
        }
    }
}

/// The on-disk shape of `config.yaml` -- no secrets here, those come from
/// environment variables only (see [`MailroomSettings::load`]).
#[derive(Debug, Clone, Deserialize, Default)]
struct FileConfig {
    #[serde(default)]
    polling: PollingSettings,
    #[serde(default)]
    triage: TriageSettings,
    #[serde(default)]
    labels: LabelSettings,
    #[serde(default)]
    logging: LoggingSettings,
    #[serde(default)]
    mail_hostname: Option<String>,
    #[serde(default)]
    carddav_url: Option<String>,
}

impl Default for PollingSettings {
    fn default() -> Self {
        PollingSettings {
            fallback_interval_secs: default_fallback_interval_secs(),
            debounce_secs: default_debounce_secs(),
        }
    }
}

/// Fully loaded, fully resolved settings: YAML file contents plus
/// environment-provided credentials, with triage categories resolved.
#[derive(Debug, Clone)]
pub struct MailroomSettings {
    pub polling: PollingSettings,
    pub sender_screen_mailbox: String,
    pub labels: LabelSettings,
    pub logging: LoggingSettings,
    pub jmap_token: String,
    pub mail_hostname: Option<String>,
    pub carddav_url: Option<String>,
    pub carddav_username: Option<String>,
    pub carddav_password: Option<String>,
    pub categories: Vec<ResolvedCategory>,
}

impl MailroomSettings {
    /// Load settings from the YAML file resolved by [`resolve_config_path`]
    /// and layer on environment-variable credentials, mirroring
    /// `config.py::MailroomSettings` (pydantic `env_prefix="MAILROOM_"`).
    pub fn load() -> Result<Self, ConfigError> {
        let path = resolve_config_path();
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let built = config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Yaml))
            .build()
            .map_err(|source| ConfigError::Load {
                path: path.to_path_buf(),
                source,
            })?;
        let file: FileConfig = built.try_deserialize().map_err(|source| ConfigError::Load {
            path: path.to_path_buf(),
            source,
        })?;

        let jmap_token = env::var(JMAP_TOKEN_ENV).map_err(|_| ConfigError::MissingJmapToken)?;
        let carddav_username = env::var(CARDDAV_USERNAME_ENV).ok();
        let carddav_password = env::var(CARDDAV_PASSWORD_ENV).ok();

        let raw_categories = file
            .triage
            .categories
            .clone()
            .unwrap_or_else(crate::categories::default_categories);
        let categories =
            resolve_categories(&raw_categories).map_err(ConfigError::InvalidCategories)?;

        Ok(Self {
            polling: file.polling,
            sender_screen_mailbox: file.triage.sender_screen_mailbox,
            labels: file.labels,
            logging: file.logging,
            jmap_token,
            mail_hostname: file.mail_hostname,
            carddav_url: file.carddav_url,
            carddav_username,
            carddav_password,
            categories,
        })
    }

    /// The set of action labels the screener watches for, e.g. `@ToImbox`.
    pub fn triage_labels(&self) -> Vec<&str> {
        self.categories.iter().map(|c| c.label.as_str()).collect()
    }

    /// Maps each triage label back to its resolved category.
    pub fn label_to_category_mapping(&self) -> HashMap<&str, &ResolvedCategory> {
        self.categories
            .iter()
            .map(|c| (c.label.as_str(), c))
            .collect()
    }

    /// Every mailbox name that must exist at startup: `Inbox`, the
    /// screener mailbox, the error label, every category's action label
    /// and destination mailbox, and the warning label if configured.
    pub fn required_mailboxes(&self) -> Vec<&str> {
        let mut seen = vec!["Inbox", self.sender_screen_mailbox.as_str(), self.labels.error_label.as_str()];
        for c in &self.categories {
            if !seen.contains(&c.label.as_str()) {
                seen.push(c.label.as_str());
            }
            if !seen.contains(&c.destination_mailbox.as_str()) {
                seen.push(c.destination_mailbox.as_str());
            }
        }
        if let Some(warning) = &self.labels.warning_label {
            if !seen.contains(&warning.as_str()) {
                seen.push(warning.as_str());
            }
        }
        seen
    }

    /// Every contact group referenced by a category, deduplicated.
    pub fn contact_groups(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for c in &self.categories {
            if !seen.contains(&c.contact_group.as_str()) {
                seen.push(c.contact_group.as_str());
            }
        }
        seen
    }
}

/// `MAILROOM_CONFIG` env var if set, else `./config.yaml`.
pub fn resolve_config_path() -> PathBuf {
    match env::var(CONFIG_PATH_ENV) {
        Ok(p) if !p.is_empty() => PathBuf::from(p),
        _ => PathBuf::from(DEFAULT_CONFIG_PATH),
    }
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            polling: PollingSettings::default(),
            triage: TriageSettings::default(),
            labels: LabelSettings::default(),
            logging: LoggingSettings::default(),
            mail_hostname: None,
            carddav_url: None,
        }
    }
}

pub const DEFAULT_MAIL_HOSTNAME: &str = "api.fastmail.com";
pub const DEFAULT_CARDDAV_HOSTNAME: &str = "carddav.fastmail.com";

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp_yaml(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    #[test]
    fn loads_minimal_config_with_defaults() {
        env::set_var(JMAP_TOKEN_ENV, "test-token");
        let f = write_temp_yaml("polling:\n  fallback_interval_secs: 120\n");
        let settings = MailroomSettings::load_from(f.path()).unwrap();
        assert_eq!(settings.polling.fallback_interval_secs, 120);
        assert_eq!(settings.polling.debounce_secs, 5);
        assert_eq!(settings.jmap_token, "test-token");
        assert_eq!(settings.categories.len(), 5);
        env::remove_var(JMAP_TOKEN_ENV);
    }

    #[test]
    fn missing_jmap_token_is_an_error() {
        env::remove_var(JMAP_TOKEN_ENV);
        let f = write_temp_yaml("polling:\n  fallback_interval_secs: 120\n");
        let err = MailroomSettings::load_from(f.path()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingJmapToken));
    }

    #[test]
    fn missing_file_is_reported_clearly() {
        env::set_var(JMAP_TOKEN_ENV, "test-token");
        let err = MailroomSettings::load_from(Path::new("/nonexistent/config.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
        env::remove_var(JMAP_TOKEN_ENV);
    }

    #[test]
    fn triage_labels_reflect_default_categories() {
        env::set_var(JMAP_TOKEN_ENV, "test-token");
        let f = write_temp_yaml("");
        let settings = MailroomSettings::load_from(f.path()).unwrap();
        assert!(settings.triage_labels().contains(&"@ToImbox"));
        assert!(settings.required_mailboxes().contains(&"Inbox"));
        env::remove_var(JMAP_TOKEN_ENV);
    }
}
