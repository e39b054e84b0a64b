use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

/// Install a shutdown handler that listens for SIGTERM and SIGINT.
///
/// Returns a `CancellationToken` that is cancelled when either signal is
/// received. The scheduler loop finishes its current iteration and exits;
/// running job processes are left alone and are picked up again by the
/// startup reconciliation of the next daemon instance.
pub fn install_shutdown_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::spawn(async move {
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, stopping scheduler after current iteration");
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, stopping scheduler after current iteration");
            }
        }

        token_clone.cancel();
    });

    token
}
