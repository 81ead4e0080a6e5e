mod cli;
mod logging;

use clap::Parser;
use cli::Cli;
use forward::{ForwardError, ForwardManager};
use tracing::{error, info, instrument, warn};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let _log_guard = logging::init_logging(&cli);

    if let Err(e) = run(cli).await {
        error!("Error: {}", e);
        std::process::exit(1);
    }
}

#[instrument(name = "run", skip(cli), fields(bridge = %cli.bridge, ports = ?cli.ports))]
async fn run(cli: Cli) -> forward::Result<()> {
    info!(
        "adb-forward v{} - forwarding through {}",
        env!("CARGO_PKG_VERSION"),
        cli.bridge
    );

    let mut manager = ForwardManager::new(cli.forward_config());
    info!(
        "Bridge {} will forward each port to {}",
        manager.config().bridge_addr,
        manager.config().remote_address
    );
    let running = manager.configure_forwarding(&cli.ports).await;
    if running == 0 {
        return Err(ForwardError::NoForwarders);
    }
    if running < cli.ports.len() {
        warn!(
            "Forwarding {} of {} requested ports: {:?}",
            running,
            cli.ports.len(),
            manager.active_ports()
        );
    }

    wait_for_shutdown_signal().await;
    info!(
        sessions = manager.active_sessions(),
        "Shutdown signal received, closing forwarders"
    );
    manager.shutdown().await;

    Ok(())
}

/// Resolve on Ctrl+C, or SIGTERM where the platform has it.
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
                return;
            }
            Err(e) => warn!("Unable to listen for SIGTERM: {}", e),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Unable to listen for Ctrl+C: {}", e);
    }
}
