//! Output formatting.
//!
//! Data events go to stdout as one JSON document per line so they pipe
//! cleanly into `jq`; connection state changes go to stderr.

use std::io::{self, IsTerminal, Write};

use owo_colors::OwoColorize;
use serde_json::Value;

use intellipool_core::{ConnectionState, DataEvent};

use crate::cli::ColorMode;
use crate::error::CliError;

// ── Color helpers ────────────────────────────────────────────────────

/// Determine whether color output should be enabled.
pub fn should_color(mode: ColorMode) -> bool {
    match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => io::stderr().is_terminal() && std::env::var("NO_COLOR").is_err(),
    }
}

/// One human-readable line describing a connection state change.
pub fn state_line(state: ConnectionState, color: bool) -> String {
    let label = state.to_string();
    if !color {
        return format!("connection: {label}");
    }
    let label = match state {
        ConnectionState::Connected => label.green().bold().to_string(),
        ConnectionState::Connecting | ConnectionState::Reconnecting => {
            label.yellow().to_string()
        }
        ConnectionState::Disconnected => label.red().to_string(),
    };
    format!("{} {label}", "connection:".dimmed())
}

/// Print a state line to stderr.
pub fn print_state(state: ConnectionState, color: bool) {
    let mut stderr = io::stderr().lock();
    let _ = writeln!(stderr, "{}", state_line(state, color));
}

// ── Data events ──────────────────────────────────────────────────────

/// Compact single-line JSON for one data event.
pub fn render_event(event: &DataEvent) -> Result<String, CliError> {
    Ok(serde_json::to_string(event)?)
}

/// Pretty-printed JSON of an event payload.
pub fn render_payload(payload: &Value) -> Result<String, CliError> {
    Ok(serde_json::to_string_pretty(payload)?)
}

/// Write a rendered line to stdout.
pub fn print_output(output: &str) {
    if output.is_empty() {
        return;
    }
    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "{output}");
}
