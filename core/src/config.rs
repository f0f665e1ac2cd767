use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use astra_backend_client::normalize_base_url;
use serde::Deserialize;
use thiserror::Error;

use crate::auth::CredentialsStoreMode;
use crate::ingest::PollSettings;
use crate::notifications::DEFAULT_DISMISS_AFTER;

pub const ASTRA_HOME_ENV_VAR: &str = "ASTRA_HOME";
pub const API_BASE_URL_ENV_VAR: &str = "ASTRA_API_BASE_URL";
pub const CONFIG_TOML_FILE: &str = "config.toml";

const DEFAULT_HOME_DIR_NAME: &str = ".astramind";
const DEFAULT_APP_URL: &str = "http://localhost:5173";
const DEFAULT_LOGIN_PATH: &str = "/login";
const DEFAULT_LOGOUT_REDIRECT_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(
        "API base URL is not configured; set {} or `api_base_url` in {}",
        API_BASE_URL_ENV_VAR,
        CONFIG_TOML_FILE
    )]
    MissingApiBaseUrl,
    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value for {field}: {message}")]
    InvalidValue {
        field: &'static str,
        message: String,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// On-disk shape of `config.toml`. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigToml {
    pub api_base_url: Option<String>,
    /// Where the web front end is served; relative redirects resolve here.
    pub app_url: Option<String>,
    pub login_path: Option<String>,
    pub credentials_store: Option<CredentialsStoreMode>,
    pub logout_redirect_delay_ms: Option<u64>,
    pub notification_timeout_ms: Option<u64>,
    pub ingest: Option<IngestToml>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IngestToml {
    pub poll_interval_ms: Option<u64>,
    pub max_poll_attempts: Option<u32>,
}

/// Values supplied on the command line; they win over the environment and
/// the config file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub api_base_url: Option<String>,
    pub astra_home: Option<PathBuf>,
    pub credentials_store: Option<CredentialsStoreMode>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub astra_home: PathBuf,
    /// Normalized: no trailing slash, always ends in `/api`.
    pub api_base_url: String,
    pub app_url: String,
    pub login_path: String,
    pub credentials_store: CredentialsStoreMode,
    pub logout_redirect_delay: Duration,
    pub notification_timeout: Duration,
    pub ingest: PollSettings,
}

impl Config {
    /// Resolves the home directory, reads `config.toml` if present and
    /// applies the environment and `overrides` on top.
    pub fn load(overrides: ConfigOverrides) -> Result<Self, ConfigError> {
        let astra_home = match overrides.astra_home.clone() {
            Some(home) => home,
            None => find_astra_home()?,
        };
        let cfg = load_config_toml(&astra_home)?;
        let env_base_url = std::env::var(API_BASE_URL_ENV_VAR)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        Self::load_from_base_config_with_overrides(cfg, overrides, astra_home, env_base_url)
    }

    pub fn load_from_base_config_with_overrides(
        cfg: ConfigToml,
        overrides: ConfigOverrides,
        astra_home: PathBuf,
        env_base_url: Option<String>,
    ) -> Result<Self, ConfigError> {
        let api_base_url = overrides
            .api_base_url
            .or(env_base_url)
            .or(cfg.api_base_url)
            .filter(|url| !url.trim().is_empty())
            .ok_or(ConfigError::MissingApiBaseUrl)?;
        url::Url::parse(&api_base_url).map_err(|err| ConfigError::InvalidValue {
            field: "api_base_url",
            message: format!("{api_base_url:?} is not a valid URL: {err}"),
        })?;

        let app_url = cfg
            .app_url
            .unwrap_or_else(|| DEFAULT_APP_URL.to_string());
        url::Url::parse(&app_url).map_err(|err| ConfigError::InvalidValue {
            field: "app_url",
            message: format!("{app_url:?} is not a valid URL: {err}"),
        })?;

        let login_path = cfg
            .login_path
            .unwrap_or_else(|| DEFAULT_LOGIN_PATH.to_string());

        let ingest_cfg = cfg.ingest.unwrap_or_default();
        let defaults = PollSettings::default();
        let interval = match ingest_cfg.poll_interval_ms {
            Some(0) => {
                return Err(ConfigError::InvalidValue {
                    field: "ingest.poll_interval_ms",
                    message: "must be greater than zero".to_string(),
                });
            }
            Some(ms) => Duration::from_millis(ms),
            None => defaults.interval,
        };
        let max_attempts = match ingest_cfg.max_poll_attempts {
            Some(0) => {
                return Err(ConfigError::InvalidValue {
                    field: "ingest.max_poll_attempts",
                    message: "must be greater than zero".to_string(),
                });
            }
            Some(attempts) => attempts,
            None => defaults.max_attempts,
        };

        Ok(Self {
            astra_home,
            api_base_url: normalize_base_url(&api_base_url),
            app_url,
            login_path,
            credentials_store: overrides
                .credentials_store
                .or(cfg.credentials_store)
                .unwrap_or_default(),
            logout_redirect_delay: cfg
                .logout_redirect_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_LOGOUT_REDIRECT_DELAY),
            notification_timeout: cfg
                .notification_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_DISMISS_AFTER),
            ingest: PollSettings {
                interval,
                max_attempts,
            },
        })
    }
}

/// Reads `config.toml` from `astra_home`. A missing file is the same as an
/// empty one.
pub fn load_config_toml(astra_home: &Path) -> Result<ConfigToml, ConfigError> {
    let path = astra_home.join(CONFIG_TOML_FILE);
    let contents = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(ConfigToml::default()),
        Err(err) => return Err(err.into()),
    };
    toml::from_str(&contents).map_err(|source| ConfigError::Parse { path, source })
}

/// `$ASTRA_HOME` when set (it must be an existing directory), otherwise
/// `~/.astramind`, which is not required to exist yet.
pub fn find_astra_home() -> std::io::Result<PathBuf> {
    let env_value = std::env::var(ASTRA_HOME_ENV_VAR)
        .ok()
        .filter(|value| !value.is_empty());
    resolve_astra_home(env_value.as_deref())
}

fn resolve_astra_home(env_value: Option<&str>) -> std::io::Result<PathBuf> {
    let Some(value) = env_value else {
        let mut home = dirs::home_dir().ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "could not determine the user's home directory",
            )
        })?;
        home.push(DEFAULT_HOME_DIR_NAME);
        return Ok(home);
    };

    let path = PathBuf::from(value);
    let metadata = std::fs::metadata(&path).map_err(|err| {
        std::io::Error::new(
            err.kind(),
            format!("{ASTRA_HOME_ENV_VAR} is set to {value:?}, which cannot be read: {err}"),
        )
    })?;
    if !metadata.is_dir() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("{ASTRA_HOME_ENV_VAR} is set to {value:?}, which is not a directory"),
        ));
    }
    path.canonicalize()
}
