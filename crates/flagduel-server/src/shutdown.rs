//! Shutdown coordination: signals in, one flag out.
//!
//! The global shutdown flag is a `watch` channel. The accept loop and every
//! seat handler hold a receiver; [`install_signal_handlers`] raises the flag
//! on the first SIGINT, SIGTERM, SIGQUIT, or SIGHUP.

use tokio::sync::watch;

/// Create the global shutdown flag.
pub fn shutdown_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

/// Spawn the signal listener that raises the shutdown flag.
#[cfg(unix)]
pub fn install_signal_handlers(tx: watch::Sender<bool>) -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut quit = signal(SignalKind::quit())?;
    let mut hangup = signal(SignalKind::hangup())?;

    tokio::spawn(async move {
        let name = tokio::select! {
            _ = interrupt.recv() => "SIGINT",
            _ = terminate.recv() => "SIGTERM",
            _ = quit.recv() => "SIGQUIT",
            _ = hangup.recv() => "SIGHUP",
        };
        tracing::info!(signal = name, "shutdown signal received");
        let _ = tx.send(true);
    });
    Ok(())
}

/// Spawn the signal listener that raises the shutdown flag.
#[cfg(not(unix))]
pub fn install_signal_handlers(tx: watch::Sender<bool>) -> std::io::Result<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("ctrl-c received");
            let _ = tx.send(true);
        }
    });
    Ok(())
}
