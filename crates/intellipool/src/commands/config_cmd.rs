//! Config subcommand handlers.

use std::path::Path;

use intellipool_config::{self as config, Config, Profile};

use crate::cli::{ConfigArgs, ConfigCommand};
use crate::error::CliError;
use crate::output;

pub fn handle(args: ConfigArgs) -> Result<(), CliError> {
    handle_at(args, &config::config_path())
}

/// Same as [`handle`], against an explicit config file.
pub fn handle_at(args: ConfigArgs, path: &Path) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Path => {
            output::print_output(&path.display().to_string());
            Ok(())
        }
        ConfigCommand::Show => {
            let cfg = config::load_config_from(path)?;
            output::print_output(&render(&cfg)?);
            Ok(())
        }
        ConfigCommand::Add {
            name,
            server,
            default,
        } => {
            config::parse_server(&server)?;
            let mut cfg = config::load_config_file(path)?;
            let first = cfg.profiles.is_empty();
            cfg.profiles.insert(name.clone(), Profile::new(server));
            if default || first {
                cfg.default_profile = Some(name.clone());
            }
            config::save_config_to(&cfg, path)?;
            tracing::info!(profile = %name, path = %path.display(), "profile saved");
            Ok(())
        }
    }
}

fn render(cfg: &Config) -> Result<String, CliError> {
    toml::to_string_pretty(cfg).map_err(|e| CliError::Config(e.into()))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use pretty_assertions::assert_eq;

    use super::*;

    fn add(name: &str, server: &str, default: bool) -> ConfigArgs {
        ConfigArgs {
            command: ConfigCommand::Add {
                name: name.into(),
                server: server.into(),
                default,
            },
        }
    }

    #[test]
    fn first_profile_becomes_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        handle_at(add("backyard", "ws://192.168.1.50:6680", false), &path).unwrap();
        handle_at(add("remote", "https://pool.example.net/hub", false), &path).unwrap();

        let cfg = config::load_config_from(&path).unwrap();
        assert_eq!(cfg.default_profile.as_deref(), Some("backyard"));
        assert_eq!(cfg.profiles.len(), 2);
        assert_eq!(cfg.profiles["remote"].server, "https://pool.example.net/hub");
    }

    #[test]
    fn explicit_default_replaces_previous() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        handle_at(add("backyard", "ws://192.168.1.50:6680", false), &path).unwrap();
        handle_at(add("remote", "https://pool.example.net/hub", true), &path).unwrap();

        let cfg = config::load_config_from(&path).unwrap();
        assert_eq!(cfg.default_profile.as_deref(), Some("remote"));
    }

    #[test]
    fn environment_overrides_are_not_saved() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("INTELLIPOOL_DEFAULTS__KEEPALIVE_SECS", "42");
            let path = jail.directory().join("config.toml");

            handle_at(add("backyard", "ws://192.168.1.50:6680", false), &path)
                .map_err(|e| e.to_string())?;

            let written = config::load_config_file(&path).map_err(|e| e.to_string())?;
            assert_eq!(written.defaults.keepalive_secs, 5);
            assert!(written.profiles.contains_key("backyard"));
            Ok(())
        });
    }

    #[test]
    fn bad_server_is_not_saved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let err = handle_at(add("garage", "ftp://10.0.0.5", false), &path).unwrap_err();
        assert!(matches!(err, CliError::Validation { .. }));
        assert!(!path.exists());
    }
}
