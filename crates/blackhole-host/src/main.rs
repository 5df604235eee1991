//! blackhole host binary entry point.

use clap::Parser;
use tracing::{error, info};

use blackhole_host::registry::RealPtySpawner;
use blackhole_host::{Cli, HostController};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_format = cli.log_format.into();
    if let Err(e) = blackhole_core::init_logging(cli.verbose, cli.log_file.as_deref(), log_format) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    info!(version = env!("CARGO_PKG_VERSION"), "blackhole-host starting");

    let config = cli.host_config();
    let controller = match HostController::start(config, Box::new(RealPtySpawner)).await {
        Ok(controller) => controller,
        Err(e) => {
            error!(error = %e, "Failed to start host controller");
            std::process::exit(1);
        }
    };

    if let Some(addr) = controller.lan_addr() {
        info!(addr = %addr, "LAN listener ready");
    }

    // Surface relay state changes, notably the assigned session code
    if let Some(mut status) = controller.relay_status() {
        tokio::spawn(async move {
            while status.changed().await.is_ok() {
                let snapshot = status.borrow().clone();
                match &snapshot.session_id {
                    Some(session_id) => {
                        info!(state = ?snapshot.state, session_id = %session_id, "Relay status")
                    }
                    None => info!(state = ?snapshot.state, "Relay status"),
                }
            }
        });
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to wait for ctrl-c");
    }

    info!("Shutting down");
    controller.stop().await;
}
