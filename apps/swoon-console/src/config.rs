//! Environment-backed runtime configuration for `swoon-console`.

use std::{env, path::PathBuf};

use backend_core::BackendInitConfig;
use thiserror::Error;

const DEFAULT_DATA_DIR: &str = "./.swoon-console-store";
const LOGIN_PROFILE_FILENAME: &str = "login-profile.json";
const SECRETS_FILENAME: &str = "secrets.json";
const DEFAULT_MEMBERS_PAGE_SIZE: u16 = 20;

/// Runtime configuration used by the console client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleConfig {
    /// REST root used when no login profile names one.
    pub prefill_base_url: Option<String>,
    pub prefill_username: Option<String>,
    /// With a username, triggers a login at startup.
    pub prefill_password: Option<String>,
    /// Directory for the login profile and the file-backed secret store.
    pub data_dir: PathBuf,
    /// Whether a successful login is remembered for the next start.
    pub remember_session: bool,
    /// Page size for `/members`.
    pub members_page_size: u16,
    /// Backend runtime tuning forwarded to `BackendCommand::Init`.
    pub init_config: Option<BackendInitConfig>,
}

impl ConsoleConfig {
    /// Parse configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let prefill_base_url = optional_trimmed_env("SWOON_BASE_URL", &mut lookup);
        let prefill_username = optional_trimmed_env("SWOON_USER", &mut lookup);
        let prefill_password = optional_trimmed_env("SWOON_PASSWORD", &mut lookup);
        let data_dir = optional_trimmed_env("SWOON_DATA_DIR", &mut lookup)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
        let remember_session = parse_optional_bool("SWOON_REMEMBER_SESSION", &mut lookup)?
            .unwrap_or(true);
        let members_page_size = parse_optional::<u16, _>("SWOON_MEMBERS_PAGE_SIZE", &mut lookup)?
            .unwrap_or(DEFAULT_MEMBERS_PAGE_SIZE);

        let poll_interval_ms = parse_optional::<u64, _>("SWOON_POLL_INTERVAL_MS", &mut lookup)?;
        let pending_ttl_ms = parse_optional::<u64, _>("SWOON_PENDING_TTL_MS", &mut lookup)?;
        let thread_page_size = parse_optional::<u16, _>("SWOON_THREAD_PAGE_SIZE", &mut lookup)?;
        let request_timeout_ms =
            parse_optional::<u64, _>("SWOON_REQUEST_TIMEOUT_MS", &mut lookup)?;
        let timeline_max_items =
            parse_optional::<usize, _>("SWOON_TIMELINE_MAX_ITEMS", &mut lookup)?;

        require_positive("SWOON_POLL_INTERVAL_MS", poll_interval_ms)?;
        require_positive("SWOON_PENDING_TTL_MS", pending_ttl_ms)?;
        require_positive("SWOON_REQUEST_TIMEOUT_MS", request_timeout_ms)?;
        require_positive(
            "SWOON_TIMELINE_MAX_ITEMS",
            timeline_max_items.map(|value| value as u64),
        )?;
        if members_page_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "SWOON_MEMBERS_PAGE_SIZE",
                value: "0".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }

        let init_config = BackendInitConfig {
            poll_interval_ms,
            pending_ttl_ms,
            thread_page_size,
            request_timeout_ms,
            timeline_max_items,
        };
        let init_config = (init_config != BackendInitConfig::default()).then_some(init_config);

        Ok(Self {
            prefill_base_url,
            prefill_username,
            prefill_password,
            data_dir,
            remember_session,
            members_page_size,
            init_config,
        })
    }

    /// Location of the non-secret login profile.
    pub fn auth_profile_path(&self) -> PathBuf {
        self.data_dir.join(LOGIN_PROFILE_FILENAME)
    }

    /// Location of the file-backed secret store.
    pub fn secrets_path(&self) -> PathBuf {
        self.data_dir.join(SECRETS_FILENAME)
    }
}

/// Errors produced while parsing runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// An environment variable could not be parsed.
    #[error("invalid {key}='{value}': {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

fn optional_trimmed_env<F>(key: &'static str, lookup: &mut F) -> Option<String>
where
    F: FnMut(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn parse_optional<T, F>(key: &'static str, lookup: &mut F) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(None);
    };
    value
        .parse::<T>()
        .map(Some)
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}

fn parse_optional_bool<F>(key: &'static str, lookup: &mut F) -> Result<Option<bool>, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(None);
    };
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => Err(ConfigError::InvalidValue {
            key,
            value,
            reason: "expected true/false".to_owned(),
        }),
    }
}

fn require_positive(key: &'static str, value: Option<u64>) -> Result<(), ConfigError> {
    if value == Some(0) {
        return Err(ConfigError::InvalidValue {
            key,
            value: "0".to_owned(),
            reason: "must be at least 1".to_owned(),
        });
    }
    Ok(())
}
