//! Clap derive structures for the `intellipool` CLI.

use std::str::FromStr;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// intellipool -- talk to a Pentair IntelliCenter from the command line
#[derive(Debug, Parser)]
#[command(
    name = "intellipool",
    version,
    about = "Watch and control IntelliCenter pool equipment",
    long_about = "Connects to an IntelliCenter controller over its streaming hub \
        (http/https addresses) or its raw socket (ws/wss addresses), subscribes \
        to equipment parameters, and sends property updates and commands.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Controller profile to use
    #[arg(long, short = 'p', env = "INTELLIPOOL_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Controller address (overrides profile), e.g. ws://192.168.1.50:6680
    #[arg(long, short = 's', env = "INTELLIPOOL_SERVER", global = true)]
    pub server: Option<String>,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    #[command(flatten)]
    Controller(ControllerCommand),

    /// Manage CLI configuration and profiles
    Config(ConfigArgs),
}

/// Subcommands that talk to a connected controller.
#[derive(Debug, Subcommand)]
pub enum ControllerCommand {
    /// Subscribe to equipment and stream live updates until Ctrl-C
    #[command(alias = "w")]
    Watch(WatchArgs),

    /// Write one property on one object
    Set(SetArgs),

    /// Invoke a controller method on one object
    Invoke(InvokeArgs),

    /// Fetch one object's parameters once
    Get(GetArgs),

    /// Fetch every schedule
    Schedules(ResponseArgs),

    /// Fetch the hardware definition
    #[command(alias = "hw")]
    Hardware(ResponseArgs),
}

// ── Object specs ─────────────────────────────────────────────────────

/// `OBJNAM:KIND`, e.g. `B1101:HEATER`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSpec {
    pub objnam: String,
    pub kind: String,
}

impl FromStr for ObjectSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (objnam, kind) = s
            .split_once(':')
            .ok_or_else(|| format!("expected OBJNAM:KIND, got '{s}'"))?;
        let objnam = objnam.trim();
        let kind = kind.trim();
        if objnam.is_empty() || kind.is_empty() {
            return Err(format!("expected OBJNAM:KIND, got '{s}'"));
        }
        Ok(Self {
            objnam: objnam.to_owned(),
            kind: kind.to_ascii_uppercase(),
        })
    }
}

// ── Subcommand arguments ─────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Objects to subscribe to, as OBJNAM:KIND (e.g. B1101:HEATER C0001:INTELLI)
    #[arg(value_name = "OBJNAM:KIND")]
    pub objects: Vec<ObjectSpec>,

    /// Also fetch every schedule once subscribed
    #[arg(long)]
    pub all_schedules: bool,
}

#[derive(Debug, Args)]
pub struct SetArgs {
    /// Object name (e.g. C0003)
    pub objnam: String,
    /// Property key (e.g. STATUS)
    pub property: String,
    /// New value (e.g. ON)
    pub value: String,
}

#[derive(Debug, Args)]
pub struct InvokeArgs {
    /// Object name the method applies to
    pub objnam: String,
    /// Controller method (e.g. SETIMMEDIATE)
    pub method: String,
    /// Argument value
    pub value: String,
}

#[derive(Debug, Args)]
pub struct GetArgs {
    /// Object to read, as OBJNAM:KIND
    #[arg(value_name = "OBJNAM:KIND")]
    pub object: ObjectSpec,

    #[command(flatten)]
    pub response: ResponseArgs,
}

#[derive(Debug, Args)]
pub struct ResponseArgs {
    /// Seconds to wait for the controller's answer
    #[arg(long, short = 't', default_value = "10")]
    pub timeout: u64,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the config file location
    Path,

    /// Show the resolved configuration
    Show,

    /// Add or replace a profile
    Add {
        /// Profile name
        name: String,
        /// Controller address (http(s)://host/hub or ws(s)://host:6680)
        server: String,
        /// Make this the default profile
        #[arg(long)]
        default: bool,
    },
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use clap::CommandFactory;

    use super::*;

    #[test]
    fn command_tree_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn object_spec_parses() {
        let spec: ObjectSpec = "B1101:heater".parse().unwrap();
        assert_eq!(spec.objnam, "B1101");
        assert_eq!(spec.kind, "HEATER");

        assert!("B1101".parse::<ObjectSpec>().is_err());
        assert!(":HEATER".parse::<ObjectSpec>().is_err());
    }

    #[test]
    fn watch_takes_many_objects() {
        let cli = Cli::try_parse_from([
            "intellipool",
            "-s",
            "ws://10.0.0.5:6680",
            "watch",
            "B1101:HEATER",
            "C0001:INTELLI",
            "--all-schedules",
        ])
        .unwrap();

        assert_eq!(cli.global.server.as_deref(), Some("ws://10.0.0.5:6680"));
        let Command::Controller(ControllerCommand::Watch(args)) = cli.command else {
            panic!("expected watch");
        };
        assert_eq!(args.objects.len(), 2);
        assert!(args.all_schedules);
    }

    #[test]
    fn set_requires_three_arguments() {
        assert!(Cli::try_parse_from(["intellipool", "set", "C0003", "STATUS"]).is_err());
        let cli = Cli::try_parse_from(["intellipool", "set", "C0003", "STATUS", "ON"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Controller(ControllerCommand::Set(SetArgs { ref value, .. })) if value == "ON"
        ));
    }

    #[test]
    fn config_is_separate_from_controller_commands() {
        let cli = Cli::try_parse_from(["intellipool", "config", "path"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Config(ConfigArgs {
                command: ConfigCommand::Path
            })
        ));
        let cli = Cli::try_parse_from(["intellipool", "hw"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Controller(ControllerCommand::Hardware(_))
        ));
    }
}
