//! Shared configuration for IntelliCenter tools.
//!
//! TOML profiles (server address + connection tuning), layered with
//! `INTELLIPOOL_*` environment variables, and translation to
//! `intellipool_core::ControllerConfig`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use intellipool_core::ControllerConfig;

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("profile '{name}' not found")]
    UnknownProfile { name: String },

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
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// Default profile name.
    pub default_profile: Option<String>,

    /// Tuning applied to every profile unless overridden.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named controller profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Defaults {
    /// Minimum gap between raw-socket sends, in milliseconds.
    #[serde(default = "default_send_interval_ms")]
    pub send_interval_ms: u64,

    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,

    #[serde(default = "default_server_timeout_secs")]
    pub server_timeout_secs: u64,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Hub reconnect schedule, in seconds.
    #[serde(default = "default_reconnect_delays_secs")]
    pub reconnect_delays_secs: Vec<u64>,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            send_interval_ms: default_send_interval_ms(),
            keepalive_secs: default_keepalive_secs(),
            server_timeout_secs: default_server_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            reconnect_delays_secs: default_reconnect_delays_secs(),
        }
    }
}

fn default_send_interval_ms() -> u64 {
    50
}
fn default_keepalive_secs() -> u64 {
    5
}
fn default_server_timeout_secs() -> u64 {
    30
}
fn default_request_timeout_secs() -> u64 {
    10
}
fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_reconnect_delays_secs() -> Vec<u64> {
    vec![0, 5, 20]
}

/// A named controller profile.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Profile {
    /// Controller address. `http(s)://host/hub` selects the streaming
    /// hub, `ws(s)://host:6680` the raw socket.
    pub server: String,

    /// Override the send interval (ms).
    pub send_interval_ms: Option<u64>,

    /// Override the request timeout (seconds).
    pub request_timeout_secs: Option<u64>,

    /// Override the hub reconnect schedule (seconds).
    pub reconnect_delays_secs: Option<Vec<u64>>,
}

impl Profile {
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            send_interval_ms: None,
            request_timeout_secs: None,
            reconnect_delays_secs: None,
        }
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "intellipool", "intellipool").map_or_else(
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
    p.push("intellipool");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from an explicit file, still layering the environment on top.
///
/// A missing file is not an error; defaults apply.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("INTELLIPOOL_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load only the defaults and the file, without the environment layer.
///
/// Use this when the result is written back to disk, so env overrides
/// never end up persisted.
pub fn load_config_file(path: &Path) -> Result<Config, ConfigError> {
    let config: Config = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .extract()?;
    Ok(config)
}

/// Load config, returning a default if anything goes wrong.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Profile resolution ──────────────────────────────────────────────

/// Pick a profile by name, falling back to `default_profile`.
pub fn resolve_profile<'a>(
    cfg: &'a Config,
    name: Option<&str>,
) -> Result<(&'a str, &'a Profile), ConfigError> {
    let name = name
        .or(cfg.default_profile.as_deref())
        .unwrap_or("default");
    cfg.profiles
        .get_key_value(name)
        .map(|(k, p)| (k.as_str(), p))
        .ok_or_else(|| ConfigError::UnknownProfile { name: name.into() })
}

/// Validate a server address and check that its scheme selects a
/// transport.
pub fn parse_server(server: &str) -> Result<Url, ConfigError> {
    let url: Url = server.trim().parse().map_err(|e| ConfigError::Validation {
        field: "server".into(),
        reason: format!("invalid URL '{server}': {e}"),
    })?;
    match url.scheme() {
        "http" | "https" | "ws" | "wss" => Ok(url),
        other => Err(ConfigError::Validation {
            field: "server".into(),
            reason: format!("scheme '{other}' is not one of http, https, ws, wss"),
        }),
    }
}

/// Build the server URL and `ControllerConfig` for a profile.
pub fn profile_to_controller_config(
    profile: &Profile,
    defaults: &Defaults,
) -> Result<(Url, ControllerConfig), ConfigError> {
    let url = parse_server(&profile.server)?;
    Ok((url, controller_config(defaults, Some(profile))?))
}

/// `ControllerConfig` from the global defaults plus optional profile
/// overrides.
pub fn controller_config(
    defaults: &Defaults,
    profile: Option<&Profile>,
) -> Result<ControllerConfig, ConfigError> {
    non_zero("defaults.keepalive_secs", defaults.keepalive_secs)?;
    non_zero("defaults.server_timeout_secs", defaults.server_timeout_secs)?;

    let send_interval_ms = profile
        .and_then(|p| p.send_interval_ms)
        .unwrap_or(defaults.send_interval_ms);
    let request_timeout_secs = profile
        .and_then(|p| p.request_timeout_secs)
        .unwrap_or(defaults.request_timeout_secs);
    let reconnect_delays_secs = profile
        .and_then(|p| p.reconnect_delays_secs.clone())
        .unwrap_or_else(|| defaults.reconnect_delays_secs.clone());

    Ok(ControllerConfig {
        send_interval: Duration::from_millis(send_interval_ms),
        keepalive_interval: Duration::from_secs(defaults.keepalive_secs),
        server_timeout: Duration::from_secs(defaults.server_timeout_secs),
        request_timeout: Duration::from_secs(request_timeout_secs),
        connect_timeout: Duration::from_secs(defaults.connect_timeout_secs),
        reconnect_delays: reconnect_delays_secs
            .into_iter()
            .map(Duration::from_secs)
            .collect(),
        ..ControllerConfig::default()
    })
}

fn non_zero(field: &str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::Validation {
            field: field.into(),
            reason: "must be greater than zero".into(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        figment::Jail::expect_with(|_jail| {
            let dir = tempfile::tempdir().unwrap();
            let cfg = load_config_from(&dir.path().join("absent.toml")).unwrap();
            assert_eq!(cfg.default_profile.as_deref(), Some("default"));
            assert_eq!(cfg.defaults, Defaults::default());
            assert!(cfg.profiles.is_empty());
            Ok(())
        });
    }

    #[test]
    fn file_profiles_and_overrides() {
        figment::Jail::expect_with(|_jail| {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("config.toml");
            std::fs::write(
                &path,
                r#"
    default_profile = "backyard"

    [defaults]
    send_interval_ms = 75

    [profiles.backyard]
    server = "ws://192.168.1.50:6680"
    reconnect_delays_secs = [1, 2]

    [profiles.remote]
    server = "https://pool.example.net/hub"
    "#,
            )
            .unwrap();

            let cfg = load_config_from(&path).unwrap();
            assert_eq!(cfg.defaults.send_interval_ms, 75);
            assert_eq!(cfg.defaults.keepalive_secs, 5);

            let (name, profile) = resolve_profile(&cfg, None).unwrap();
            assert_eq!(name, "backyard");

            let (url, controller) = profile_to_controller_config(profile, &cfg.defaults).unwrap();
            assert_eq!(url.scheme(), "ws");
            assert_eq!(controller.send_interval, Duration::from_millis(75));
            assert_eq!(
                controller.reconnect_delays,
                vec![Duration::from_secs(1), Duration::from_secs(2)]
            );

            let (_, remote) = resolve_profile(&cfg, Some("remote")).unwrap();
            let (_, controller) = profile_to_controller_config(remote, &cfg.defaults).unwrap();
            assert_eq!(
                controller.reconnect_delays,
                vec![Duration::ZERO, Duration::from_secs(5), Duration::from_secs(20)]
            );
            Ok(())
        });
    }

    #[test]
    fn unknown_profile_is_an_error() {
        let cfg = Config::default();
        assert!(matches!(
            resolve_profile(&cfg, Some("garage")),
            Err(ConfigError::UnknownProfile { name }) if name == "garage"
        ));
    }

    #[test]
    fn server_scheme_is_validated() {
        assert!(parse_server("ws://10.0.0.5:6680").is_ok());
        assert!(parse_server(" https://10.0.0.5/hub ").is_ok());
        assert!(matches!(
            parse_server("ftp://10.0.0.5"),
            Err(ConfigError::Validation { .. })
        ));
        assert!(parse_server("10.0.0.5").is_err());
    }

    #[test]
    fn zero_keepalive_is_rejected() {
        figment::Jail::expect_with(|_jail| {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("config.toml");
            std::fs::write(
                &path,
                r#"
    [defaults]
    keepalive_secs = 0

    [profiles.default]
    server = "http://10.0.0.5/hub"
    "#,
            )
            .unwrap();

            let cfg = load_config_from(&path).unwrap();
            let (_, profile) = resolve_profile(&cfg, None).unwrap();
            assert!(matches!(
                profile_to_controller_config(profile, &cfg.defaults),
                Err(ConfigError::Validation { field, .. }) if field == "defaults.keepalive_secs"
            ));

            let defaults = Defaults {
                server_timeout_secs: 0,
                ..Defaults::default()
            };
            assert!(controller_config(&defaults, None).is_err());
            Ok(())
        });
    }

    #[test]
    fn file_layer_ignores_environment() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "config.toml",
                r#"
[profiles.backyard]
server = "ws://192.168.1.50:6680"
"#,
            )?;
            jail.set_env("INTELLIPOOL_DEFAULTS__SEND_INTERVAL_MS", "99");
            let path = jail.directory().join("config.toml");

            let merged = load_config_from(&path).map_err(|e| e.to_string())?;
            assert_eq!(merged.defaults.send_interval_ms, 99);

            let file_only = load_config_file(&path).map_err(|e| e.to_string())?;
            assert_eq!(file_only.defaults.send_interval_ms, 50);
            assert!(file_only.profiles.contains_key("backyard"));
            Ok(())
        });
    }

    #[test]
    fn save_then_load() {
        figment::Jail::expect_with(|_jail| {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("nested").join("config.toml");

            let mut cfg = Config::default();
            cfg.profiles
                .insert("default".into(), Profile::new("ws://10.0.0.5:6680"));
            save_config_to(&cfg, &path).unwrap();

            let loaded = load_config_from(&path).unwrap();
            assert_eq!(loaded, cfg);
            Ok(())
        });
    }
}
