//! Shutdown signalling

use tokio::sync::watch;

/// Shutdown channel fired by SIGINT/SIGTERM and by panics
///
/// Returns the sender (kept alive by the caller) and a receiver for the supervisor.
pub fn setup_shutdown() -> Result<(watch::Sender<()>, watch::Receiver<()>), ctrlc::Error> {
    let (tx, rx) = watch::channel(());

    let signal_tx = tx.clone();
    ctrlc::set_handler(move || {
        log::info!("Shutdown signal received");
        let _ = signal_tx.send(());
    })?;

    let panic_tx = tx.clone();
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        default_hook(info);
        log::error!("Panic, shutting down: {}", info);
        let _ = panic_tx.send(());
    }));

    Ok((tx, rx))
}
