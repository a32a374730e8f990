//! The flagduel server binary.

use std::process::ExitCode;

use clap::Parser;

use flagduel_server::config::{CliArgs, ServerConfig};
use flagduel_server::platform::{SocketConfig, bind_address, create_listener};
use flagduel_server::scheduler::Scheduler;
use flagduel_server::{logging, shutdown};

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();
    let mut config = ServerConfig::default();
    config.apply_cli_overrides(&args);

    logging::init_logging(&config.log_level);

    let addr = bind_address(config.port);
    let listener = match create_listener(addr, &SocketConfig::default()) {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(%addr, error = %e, "failed to bind listener");
            return ExitCode::FAILURE;
        }
    };

    let (shutdown_tx, shutdown_rx) = shutdown::shutdown_channel();
    if let Err(e) = shutdown::install_signal_handlers(shutdown_tx) {
        tracing::error!(error = %e, "failed to install signal handlers");
        return ExitCode::FAILURE;
    }

    let scheduler = Scheduler::new(config, shutdown_rx);
    match scheduler.run(listener).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "server failed");
            ExitCode::FAILURE
        }
    }
}
