use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::upload_request::PrivacyStatus;

pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(300);
pub const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_PROJECT_ID: &str = "recording-uploader";
pub const DEFAULT_TOKEN_FILE: &str = "token.json";

const CLIENT_ID_VAR: &str = "YOUTUBE_CLIENT_ID";
const CLIENT_SECRET_VAR: &str = "YOUTUBE_CLIENT_SECRET";
const PROJECT_ID_VAR: &str = "YOUTUBE_PROJECT_ID";

pub const WATCH_DIR_VAR: &str = "UPLOADER_WATCH_DIR";
pub const CHECK_INTERVAL_VAR: &str = "UPLOADER_CHECK_INTERVAL_SECS";
const TOKEN_FILE_VAR: &str = "UPLOADER_TOKEN_FILE";
const PRIVACY_VAR: &str = "UPLOADER_PRIVACY";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("environment variable {0} is not set")]
    MissingEnv(&'static str),
    #[error("invalid value {value:?} for {name}")]
    InvalidValue { name: &'static str, value: String },
    #[error("could not determine the home directory")]
    NoHomeDir,
}

/// OAuth client registration for the installed-app flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSecrets {
    pub client_id: String,
    pub client_secret: String,
    pub project_id: String,
}

impl ClientSecrets {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Resolves the client secrets through `lookup`, treating empty values as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let client_id = get(CLIENT_ID_VAR).ok_or(ConfigError::MissingEnv(CLIENT_ID_VAR))?;
        let client_secret =
            get(CLIENT_SECRET_VAR).ok_or(ConfigError::MissingEnv(CLIENT_SECRET_VAR))?;
        let project_id = get(PROJECT_ID_VAR).unwrap_or_else(|| DEFAULT_PROJECT_ID.to_string());

        Ok(Self {
            client_id,
            client_secret,
            project_id,
        })
    }

    /// Shell snippet shown when the secrets are missing.
    pub fn setup_hint() -> String {
        format!(
            "Please set {CLIENT_ID_VAR} and {CLIENT_SECRET_VAR}, for example:\n  \
             export {CLIENT_ID_VAR}='your-client-id'\n  \
             export {CLIENT_SECRET_VAR}='your-client-secret'"
        )
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub watch_dir: PathBuf,
    pub check_interval: Duration,
    pub token_file: PathBuf,
    pub auth_timeout: Duration,
    pub privacy: PrivacyStatus,
    pub client: ClientSecrets,
}

impl Config {
    /// Builds the configuration, falling back to `~/Videos` and a five minute
    /// interval when no explicit values are given.
    pub fn new(
        watch_dir: Option<PathBuf>,
        check_interval: Option<Duration>,
    ) -> Result<Self, ConfigError> {
        Self::from_lookup(watch_dir, check_interval, |name| std::env::var(name).ok())
    }

    /// Like [`Config::new`], but every environment setting (secrets, token
    /// file, privacy) is resolved through `lookup`. Empty values count as unset.
    pub fn from_lookup<F>(
        watch_dir: Option<PathBuf>,
        check_interval: Option<Duration>,
        lookup: F,
    ) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let watch_dir = match watch_dir {
            Some(dir) => dir,
            None => default_watch_dir()?,
        };
        let get = |name: &str| lookup(name).filter(|v| !v.is_empty());

        let token_file = get(TOKEN_FILE_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_TOKEN_FILE));
        let privacy = match get(PRIVACY_VAR) {
            Some(raw) => parse_privacy(&raw)?,
            None => PrivacyStatus::Private,
        };

        Ok(Self {
            watch_dir,
            check_interval: check_interval.unwrap_or(DEFAULT_CHECK_INTERVAL),
            token_file,
            auth_timeout: DEFAULT_AUTH_TIMEOUT,
            privacy,
            client: ClientSecrets::from_lookup(&lookup)?,
        })
    }

    /// Reads the optional watch directory and interval overrides from the environment.
    pub fn overrides_from_env() -> Result<(Option<PathBuf>, Option<Duration>), ConfigError> {
        let watch_dir = std::env::var(WATCH_DIR_VAR)
            .ok()
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        let interval = match std::env::var(CHECK_INTERVAL_VAR) {
            Ok(raw) if !raw.is_empty() => Some(parse_interval(CHECK_INTERVAL_VAR, &raw)?),
            _ => None,
        };
        Ok((watch_dir, interval))
    }
}

pub fn default_watch_dir() -> Result<PathBuf, ConfigError> {
    dirs::home_dir()
        .map(|home| home.join("Videos"))
        .ok_or(ConfigError::NoHomeDir)
}

fn parse_interval(name: &'static str, raw: &str) -> Result<Duration, ConfigError> {
    match raw.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
        _ => Err(ConfigError::InvalidValue {
            name,
            value: raw.to_string(),
        }),
    }
}

fn parse_privacy(raw: &str) -> Result<PrivacyStatus, ConfigError> {
    raw.parse().map_err(|_| ConfigError::InvalidValue {
        name: PRIVACY_VAR,
        value: raw.to_string(),
    })
}
