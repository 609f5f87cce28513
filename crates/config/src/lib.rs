//! Configuration loading and triage-category resolution for mailroom.
//!
//! Named `mailroom-config` (not `config`) to avoid colliding with the
//! upstream `config` crate this crate's own YAML loading used to depend on.

pub mod categories;
pub mod settings;

pub use categories::{derive_label, resolve_categories, ContactType, ResolvedCategory, TriageCategory};
pub use settings::{
    resolve_config_path, ConfigError, LabelSettings, LoggingLevel, LoggingSettings,
    MailroomSettings, PollingSettings, TriageSettings, CONFIG_PATH_ENV, DEFAULT_CARDDAV_HOSTNAME,
    DEFAULT_MAIL_HOSTNAME,
};
