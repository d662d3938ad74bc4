//! Process-signal to cancellation bridge.

use tokio_util::sync::CancellationToken;

/// A token cancelled on SIGINT or SIGTERM. Cancellation propagates into
/// every wait in the engine so in-flight containers still pass through
/// cleanup.
pub fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let handler = token.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        tracing::info!("shutdown signal received, canceling run");
        handler.cancel();
    });
    token
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(e) => {
            tracing::warn!("cannot install SIGTERM handler: {e}");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
