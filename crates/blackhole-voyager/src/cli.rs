//! Voyager CLI implementation.

use std::path::PathBuf;

use clap::{ArgAction, Parser, ValueEnum};

use crate::transport::TransportConfig;

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

/// Drive blackhole host terminal sessions from this terminal.
#[derive(Debug, Parser)]
#[command(
    name = "blackhole-voyager",
    version,
    about = "Blackhole client: attach to a host's terminal sessions (ctrl-] detaches)"
)]
pub struct Cli {
    /// Host URL (ws://host:9527) or relay base URL
    pub url: String,

    /// Connect through a relay (implied by --session)
    #[arg(long)]
    pub relay: bool,

    /// Relay session code (required with a relay URL)
    #[arg(long, value_name = "CODE")]
    pub session: Option<String>,

    /// Relay bearer token
    #[arg(long, value_name = "TOKEN")]
    pub token: Option<String>,

    /// Do not reconnect after a transport loss
    #[arg(long)]
    pub no_reconnect: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Write logs to a file instead of stderr (stderr corrupts raw mode)
    #[arg(long, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Log output format
    #[arg(long, default_value = "text", value_enum)]
    pub log_format: CliLogFormat,
}

impl Cli {
    /// Build the transport configuration.
    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            url: self.url.clone(),
            relay: self.relay || self.session.is_some(),
            session: self.session.clone(),
            token: self.token.clone(),
            auto_reconnect: !self.no_reconnect,
        }
    }
}
