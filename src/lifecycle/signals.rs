//! OS signal handling.
//!
//! SIGINT and SIGTERM both trigger a graceful stop of the running instance.

use std::sync::Arc;

use tokio::signal;
use tokio::task::JoinHandle;

use crate::lifecycle::instance::RunningInstance;
use crate::lifecycle::shutdown::ShutdownError;

/// Resolve on the first Ctrl-C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        () = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}

/// Stop `instance` when the process is asked to terminate.
///
/// The returned task resolves with the result of the stop.
pub fn register_graceful_shutdown(instance: Arc<RunningInstance>) -> JoinHandle<Result<(), ShutdownError>> {
    register_shutdown_on(instance, shutdown_signal())
}

/// Stop `instance` once `signal` resolves.
pub fn register_shutdown_on<F>(instance: Arc<RunningInstance>, signal: F) -> JoinHandle<Result<(), ShutdownError>>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        signal.await;
        instance.stop().await
    })
}
