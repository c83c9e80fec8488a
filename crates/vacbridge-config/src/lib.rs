//! Configuration for vacbridge hosts.
//!
//! A TOML file in the platform config directory, overridable through
//! `VACBRIDGE_`-prefixed environment variables, plus credential resolution
//! (env, keyring, plaintext) and translation to
//! `vacbridge_core::BridgeConfig`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use vacbridge_core::{BridgeConfig, CoreError, RetryPolicy};

const KEYRING_SERVICE: &str = "vacbridge";
const PASSWORD_ENV: &str = "VACBRIDGE_PASSWORD";
const MACHINE_ID_PATHS: [&str; 2] = ["/etc/machine-id", "/var/lib/dbus/machine-id"];

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no password configured for '{login}'")]
    NoCredentials { login: String },

    #[error("cannot determine a machine id for the device fingerprint")]
    NoMachineId,

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub account: Account,

    #[serde(default)]
    pub connection: Connection,
}

/// Vendor account settings.
#[derive(Debug, Deserialize, Serialize)]
pub struct Account {
    /// Account login, usually an e-mail address.
    #[serde(default)]
    pub login: String,

    /// Password (plaintext; prefer the keyring or `VACBRIDGE_PASSWORD`).
    pub password: Option<String>,

    /// Two-letter country code of the account.
    #[serde(default = "default_country")]
    pub country: String,

    /// Device fingerprint source. Defaults to the host's machine id.
    pub machine_id: Option<String>,
}

impl Default for Account {
    fn default() -> Self {
        Self {
            login: String::new(),
            password: None,
            country: default_country(),
            machine_id: None,
        }
    }
}

fn default_country() -> String {
    "US".into()
}

/// Connection tuning.
#[derive(Debug, Deserialize, Serialize)]
pub struct Connection {
    /// Device handshake timeout in seconds.
    #[serde(default = "default_ready_timeout")]
    pub ready_timeout: u64,

    /// First retry delay in milliseconds.
    #[serde(default = "default_retry_initial_delay")]
    pub retry_initial_delay_ms: u64,

    /// Retry delay cap in milliseconds.
    #[serde(default = "default_retry_max_delay")]
    pub retry_max_delay_ms: u64,

    /// Attempts per operation, including the first.
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,
}

impl Default for Connection {
    fn default() -> Self {
        Self {
            ready_timeout: default_ready_timeout(),
            retry_initial_delay_ms: default_retry_initial_delay(),
            retry_max_delay_ms: default_retry_max_delay(),
            retry_max_attempts: default_retry_max_attempts(),
        }
    }
}

fn default_ready_timeout() -> u64 {
    30
}
fn default_retry_initial_delay() -> u64 {
    1_000
}
fn default_retry_max_delay() -> u64 {
    30_000
}
fn default_retry_max_attempts() -> u32 {
    5
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("org", "vacbridge", "vacbridge").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("vacbridge");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load Config from `path` + environment. A missing file yields defaults.
/// Hosts normally pass [`config_path()`].
///
/// Environment keys nest with a double underscore:
/// `VACBRIDGE_ACCOUNT__LOGIN`, `VACBRIDGE_CONNECTION__READY_TIMEOUT`.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("VACBRIDGE_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write it to `path`, creating parent
/// directories as needed.
pub fn save_config(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Credential resolution ───────────────────────────────────────────

/// Resolve the account password: `VACBRIDGE_PASSWORD`, then the system
/// keyring, then the plaintext value in the config file.
pub fn resolve_password(account: &Account) -> Result<SecretString, ConfigError> {
    password_chain(
        account,
        std::env::var(PASSWORD_ENV).ok(),
        || {
            keyring::Entry::new(KEYRING_SERVICE, &keyring_user(&account.login))
                .and_then(|entry| entry.get_password())
                .ok()
        },
    )
}

fn password_chain(
    account: &Account,
    from_env: Option<String>,
    from_keyring: impl FnOnce() -> Option<String>,
) -> Result<SecretString, ConfigError> {
    // 1. Env var
    if let Some(pw) = from_env.filter(|pw| !pw.is_empty()) {
        debug!(source = "env", "resolved account password");
        return Ok(SecretString::from(pw));
    }

    // 2. Keyring
    if let Some(pw) = from_keyring() {
        debug!(source = "keyring", "resolved account password");
        return Ok(SecretString::from(pw));
    }

    // 3. Plaintext in config
    if let Some(ref pw) = account.password {
        debug!(source = "config", "resolved account password");
        return Ok(SecretString::from(pw.clone()));
    }

    Err(ConfigError::NoCredentials {
        login: account.login.clone(),
    })
}

fn keyring_user(login: &str) -> String {
    format!("{login}/password")
}

/// Resolve the machine id the device fingerprint is derived from: the
/// configured value, the systemd / D-Bus machine id, then the hostname.
pub fn resolve_machine_id(account: &Account) -> Result<String, ConfigError> {
    let candidates: Vec<PathBuf> = MACHINE_ID_PATHS.iter().map(PathBuf::from).collect();
    machine_id_chain(account.machine_id.as_deref(), &candidates, hostname)
}

fn machine_id_chain(
    configured: Option<&str>,
    candidates: &[PathBuf],
    fallback: impl FnOnce() -> Option<String>,
) -> Result<String, ConfigError> {
    if let Some(id) = configured.map(str::trim).filter(|id| !id.is_empty()) {
        return Ok(id.to_owned());
    }

    for path in candidates {
        if let Ok(contents) = std::fs::read_to_string(path) {
            let id = contents.trim();
            if !id.is_empty() {
                debug!(path = %path.display(), "using machine id");
                return Ok(id.to_owned());
            }
        }
    }

    fallback()
        .map(|h| h.trim().to_owned())
        .filter(|h| !h.is_empty())
        .ok_or(ConfigError::NoMachineId)
}

fn hostname() -> Option<String> {
    std::fs::read_to_string("/etc/hostname")
        .ok()
        .or_else(|| std::env::var("HOSTNAME").ok())
}

// ── Translation ─────────────────────────────────────────────────────

/// Validate the config and build a `BridgeConfig`, resolving the password
/// and machine id.
pub fn to_bridge_config(cfg: &Config) -> Result<BridgeConfig, ConfigError> {
    let password = resolve_password(&cfg.account)?;
    let machine_id = resolve_machine_id(&cfg.account)?;
    build_bridge_config(cfg, password, machine_id)
}

fn build_bridge_config(
    cfg: &Config,
    password: SecretString,
    machine_id: String,
) -> Result<BridgeConfig, ConfigError> {
    let conn = &cfg.connection;

    if conn.retry_max_attempts == 0 {
        return Err(ConfigError::Validation {
            field: "connection.retry_max_attempts".into(),
            reason: "must be at least 1".into(),
        });
    }
    if conn.retry_initial_delay_ms > conn.retry_max_delay_ms {
        return Err(ConfigError::Validation {
            field: "connection.retry_initial_delay_ms".into(),
            reason: format!(
                "{} exceeds retry_max_delay_ms ({})",
                conn.retry_initial_delay_ms, conn.retry_max_delay_ms
            ),
        });
    }
    if conn.ready_timeout == 0 {
        return Err(ConfigError::Validation {
            field: "connection.ready_timeout".into(),
            reason: "must be at least 1 second".into(),
        });
    }

    let mut bridge = BridgeConfig::new(
        cfg.account.login.trim(),
        password,
        cfg.account.country.trim(),
        machine_id,
    );
    bridge.retry = RetryPolicy {
        initial_delay: Duration::from_millis(conn.retry_initial_delay_ms),
        max_delay: Duration::from_millis(conn.retry_max_delay_ms),
        max_attempts: conn.retry_max_attempts,
    };
    bridge.ready_timeout = Duration::from_secs(conn.ready_timeout);

    // Login and country are checked by deriving the credentials once.
    bridge.credentials().map_err(|e| match e {
        CoreError::Config { message } => ConfigError::Validation {
            field: if cfg.account.login.trim().is_empty() {
                "account.login".into()
            } else {
                "account.country".into()
            },
            reason: message,
        },
        other => ConfigError::Validation {
            field: "account".into(),
            reason: other.to_string(),
        },
    })?;

    Ok(bridge)
}

// ── Tests ───────────────────────────────────────────────────────────
