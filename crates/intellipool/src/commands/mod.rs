//! Command handlers and dispatch.

pub mod config_cmd;
pub mod query;
pub mod send;
pub mod watch;

use url::Url;

use intellipool_config::{self as config, Config, ConfigError};
use intellipool_core::{Controller, ControllerConfig};

use crate::cli::{ControllerCommand, GlobalOpts};
use crate::error::CliError;

/// Resolve the controller address and tuning from flags, env, and config.
///
/// `--server` wins over the profile's address; tuning still comes from the
/// selected (or default) profile when one exists.
pub fn build_connection(
    global: &GlobalOpts,
    cfg: &Config,
) -> Result<(Url, ControllerConfig), CliError> {
    if let Some(server) = global.server.as_deref() {
        let profile = match global.profile.as_deref() {
            Some(name) => Some(
                config::resolve_profile(cfg, Some(name))
                    .map_err(|e| profile_error(e, cfg))?
                    .1,
            ),
            None => config::resolve_profile(cfg, None).ok().map(|(_, p)| p),
        };
        let url = config::parse_server(server)?;
        return Ok((url, config::controller_config(&cfg.defaults, profile)?));
    }

    let (name, profile) = config::resolve_profile(cfg, global.profile.as_deref())
        .map_err(|e| profile_error(e, cfg))?;
    tracing::debug!(profile = name, server = %profile.server, "using profile");
    Ok(config::profile_to_controller_config(profile, &cfg.defaults)?)
}

fn profile_error(err: ConfigError, cfg: &Config) -> CliError {
    match err {
        ConfigError::UnknownProfile { .. } if cfg.profiles.is_empty() => CliError::NoConfig {
            path: config::config_path().display().to_string(),
        },
        ConfigError::UnknownProfile { name } => {
            let mut names: Vec<_> = cfg.profiles.keys().map(String::as_str).collect();
            names.sort_unstable();
            CliError::ProfileNotFound {
                name,
                available: names.join(", "),
            }
        }
        other => other.into(),
    }
}

/// Build a controller and connect it.
pub async fn connect(global: &GlobalOpts) -> Result<Controller, CliError> {
    let cfg = config::load_config()?;
    let (url, controller_config) = build_connection(global, &cfg)?;

    let controller = Controller::new(controller_config);
    if !controller.connect(url.as_str()).await {
        return Err(CliError::ConnectionFailed {
            url: url.to_string(),
        });
    }
    tracing::info!(
        url = %url,
        transport = ?controller.transport_kind(),
        "connected"
    );
    Ok(controller)
}

/// Run a command that needs a live controller.
pub async fn dispatch(
    cmd: ControllerCommand,
    controller: &Controller,
    color: bool,
) -> Result<(), CliError> {
    match cmd {
        ControllerCommand::Watch(args) => watch::handle(args, controller, color).await,
        ControllerCommand::Set(args) => send::set(args, controller).await,
        ControllerCommand::Invoke(args) => send::invoke(args, controller).await,
        ControllerCommand::Get(args) => query::get(args, controller).await,
        ControllerCommand::Schedules(args) => query::schedules(args, controller).await,
        ControllerCommand::Hardware(args) => query::hardware(args, controller).await,
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::time::Duration;

    use intellipool_config::Profile;

    use super::*;
    use crate::cli::ColorMode;

    fn global(profile: Option<&str>, server: Option<&str>) -> GlobalOpts {
        GlobalOpts {
            profile: profile.map(str::to_owned),
            server: server.map(str::to_owned),
            color: ColorMode::Never,
            verbose: 0,
            log_json: false,
        }
    }

    fn config_with_backyard() -> Config {
        let mut cfg = Config::default();
        let mut profile = Profile::new("ws://192.168.1.50:6680");
        profile.send_interval_ms = Some(80);
        cfg.profiles.insert("backyard".into(), profile);
        cfg.default_profile = Some("backyard".into());
        cfg
    }

    #[test]
    fn server_flag_overrides_profile_address() {
        let cfg = config_with_backyard();
        let (url, controller) =
            build_connection(&global(None, Some("http://10.0.0.9/hub")), &cfg).unwrap();
        assert_eq!(url.as_str(), "http://10.0.0.9/hub");
        assert_eq!(controller.send_interval, Duration::from_millis(80));
    }

    #[test]
    fn default_profile_is_used() {
        let cfg = config_with_backyard();
        let (url, _) = build_connection(&global(None, None), &cfg).unwrap();
        assert_eq!(url.as_str(), "ws://192.168.1.50:6680/");
    }

    #[test]
    fn missing_configuration_is_reported() {
        let err = build_connection(&global(None, None), &Config::default()).unwrap_err();
        assert!(matches!(err, CliError::NoConfig { .. }));
    }

    #[test]
    fn unknown_profile_lists_alternatives() {
        let err = build_connection(&global(Some("garage"), None), &config_with_backyard())
            .unwrap_err();
        match err {
            CliError::ProfileNotFound { name, available } => {
                assert_eq!(name, "garage");
                assert_eq!(available, "backyard");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
