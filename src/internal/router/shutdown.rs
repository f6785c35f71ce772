use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::internal::handler::handler::Handler;
use crate::internal::message::envelope::Endpoint;

/// Owns a reference to every live handler and shuts them all down exactly
/// once, however many times shutdown is requested.
pub struct ShutdownCoordinator {
    handlers: Vec<(Endpoint, Arc<dyn Handler>)>,
    fired: AtomicBool,
}

impl ShutdownCoordinator {
    pub fn new(handlers: Vec<(Endpoint, Arc<dyn Handler>)>) -> Self {
        Self {
            handlers,
            fired: AtomicBool::new(false),
        }
    }

    /// Calls `shutdown` on every handler. Returns false if this was not the
    /// first request. A panicking handler does not stop the others.
    pub fn shutdown_all(&self) -> bool {
        if self.fired.swap(true, Ordering::AcqRel) {
            return false;
        }

        tracing::info!(handlers = self.handlers.len(), "Shutting down handlers");
        for (endpoint, handler) in &self.handlers {
            if catch_unwind(AssertUnwindSafe(|| handler.shutdown())).is_err() {
                tracing::error!(endpoint = %endpoint, "Handler panicked during shutdown");
            } else {
                tracing::debug!(endpoint = %endpoint, "Handler shut down");
            }
        }
        true
    }

    pub fn is_shut_down(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }
}

/// Resolves on SIGINT, or SIGTERM on unix.
pub async fn termination_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}
