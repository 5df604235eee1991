//! Host CLI implementation.
//!
//! Provides command-line argument parsing using clap, with environment
//! fallbacks for relay settings (`WORMHOLE_URL`, `WORMHOLE_TOKEN`) and the
//! dev-mode confirmation (`BLACKHOLE_DEV=1`).

use std::path::PathBuf;

use clap::{ArgAction, Parser, ValueEnum};

use blackhole_core::constants::DEFAULT_LAN_PORT;

use crate::controller::HostConfig;
use crate::relay::RelayConfig;

/// Log output format for CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum CliLogFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// Structured JSON output.
    Json,
}

impl From<CliLogFormat> for blackhole_core::LogFormat {
    fn from(fmt: CliLogFormat) -> Self {
        match fmt {
            CliLogFormat::Text => blackhole_core::LogFormat::Text,
            CliLogFormat::Json => blackhole_core::LogFormat::Json,
        }
    }
}

/// Share native terminal sessions over LAN and relay.
#[derive(Debug, Parser)]
#[command(
    name = "blackhole-host",
    version,
    about = "Blackhole host: expose native PTY sessions over LAN or a relay"
)]
pub struct Cli {
    /// LAN listener port
    #[arg(long, default_value_t = DEFAULT_LAN_PORT)]
    pub port: u16,

    /// Disable the LAN listener (relay only)
    #[arg(long)]
    pub no_lan: bool,

    /// Relay base URL (ws:// or wss://)
    #[arg(long, env = "WORMHOLE_URL", value_name = "URL")]
    pub relay_url: Option<String>,

    /// Relay bearer token
    #[arg(long, env = "WORMHOLE_TOKEN", value_name = "TOKEN")]
    pub relay_token: Option<String>,

    /// Shell to spawn for new sessions (default: $SHELL, then bash, then sh)
    #[arg(long, value_name = "PATH")]
    pub shell: Option<String>,

    /// Confirm running the unauthenticated LAN listener in a release build
    #[arg(long)]
    pub dev_mode: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Write logs to a file instead of stderr
    #[arg(long, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Log output format
    #[arg(long, default_value = "text", value_enum)]
    pub log_format: CliLogFormat,
}

impl Cli {
    /// Dev mode via flag or `BLACKHOLE_DEV=1`.
    pub fn dev_mode_enabled(&self) -> bool {
        self.dev_mode
            || std::env::var("BLACKHOLE_DEV")
                .map(|v| v == "1")
                .unwrap_or(false)
    }

    /// Build the controller configuration.
    pub fn host_config(&self) -> HostConfig {
        HostConfig {
            lan_enabled: !self.no_lan,
            lan_port: self.port,
            relay: self.relay_url.clone().map(|url| RelayConfig {
                url,
                token: self.relay_token.clone(),
            }),
            shell: self.shell.clone(),
            dev_mode: self.dev_mode_enabled(),
        }
    }
}
