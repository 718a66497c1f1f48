// src/shutdown.rs
//
// Signal handling is kept outside the client: a hook waits for a signal,
// asks the owning task to close the client, then hands control to a
// caller-supplied callback (by default, exiting the process).

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::rabbitmq::ClientHandle;

const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Close `handle`'s client on SIGINT/SIGTERM, then call `on_shutdown`.
pub fn setup_signal_handlers<F>(handle: ClientHandle, on_shutdown: F) -> JoinHandle<()>
where
    F: FnOnce() + Send + 'static,
{
    install_shutdown_hook(handle, wait_for_signal(), on_shutdown)
}

/// Same as `setup_signal_handlers` with an arbitrary trigger.
pub fn install_shutdown_hook<S, F>(handle: ClientHandle, signal: S, on_shutdown: F) -> JoinHandle<()>
where
    S: Future<Output = ()> + Send + 'static,
    F: FnOnce() + Send + 'static,
{
    tokio::spawn(async move {
        signal.await;
        info!("Shutdown requested, closing AMQP client");

        match tokio::time::timeout(CLOSE_TIMEOUT, handle.close_threadsafe()).await {
            Ok(Ok(())) => info!("AMQP client closed"),
            Ok(Err(err)) => warn!("AMQP client could not be closed: {}", err),
            Err(_) => warn!("Timed out waiting for the AMQP client to close"),
        }

        on_shutdown();
    })
}

pub fn exit_process() {
    std::process::exit(0);
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(err) => {
                warn!("Unable to listen for SIGTERM: {}", err);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
