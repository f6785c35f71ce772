use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::internal::exec::mode::ExecutionMode;
use crate::internal::message::kernel_event::KernelEvent;

#[derive(Debug, thiserror::Error)]
pub enum ExecuteError {
    #[error("An execution is already in progress")]
    Busy,
    #[error("Execution rejected: {0}")]
    Rejected(String),
    #[error("Execution context has been shut down")]
    ShutDown,
    #[error("Kernel bridge has exited")]
    BridgeExited,
    #[error("Kernel I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Callback side of one execution. Every `emit` delivers one event; dropping
/// the sink ends the stream.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<KernelEvent>,
}

impl EventSink {
    /// Returns false once the receiving side is gone.
    pub fn emit(&self, event: KernelEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

/// The engine that actually runs code.
///
/// `execute` must return as soon as the request is accepted or rejected and
/// deliver events through the sink from its own thread or task.
pub trait ExecutionBackend: Send + Sync {
    fn execute(&self, code: &str, mode: ExecutionMode, sink: EventSink) -> Result<(), ExecuteError>;

    fn interrupt(&self) -> Result<(), ExecuteError>;

    fn shutdown(&self);
}

/// Releases the busy flag when dropped.
#[derive(Debug)]
pub struct ExecutionSlot {
    busy: Arc<AtomicBool>,
}

impl Drop for ExecutionSlot {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

/// Event stream of one accepted execution. Holding it keeps the context busy.
#[derive(Debug)]
pub struct Execution {
    events: mpsc::UnboundedReceiver<KernelEvent>,
    _slot: ExecutionSlot,
}

impl Execution {
    /// Next event in kernel emission order, `None` once the backend is done.
    pub async fn next_event(&mut self) -> Option<KernelEvent> {
        self.events.recv().await
    }
}

/// Shared interpreter state behind a single backend.
///
/// At most one execution is outstanding at a time; a second request fails
/// fast with `ExecuteError::Busy` instead of interleaving with the first.
pub struct ExecutionContext {
    backend: Box<dyn ExecutionBackend>,
    busy: Arc<AtomicBool>,
    shut_down: AtomicBool,
}

impl ExecutionContext {
    pub fn new(backend: Box<dyn ExecutionBackend>) -> Self {
        Self {
            backend,
            busy: Arc::new(AtomicBool::new(false)),
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn execute(&self, code: &str, mode: ExecutionMode) -> Result<Execution, ExecuteError> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(ExecuteError::ShutDown);
        }

        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| ExecuteError::Busy)?;
        let slot = ExecutionSlot {
            busy: Arc::clone(&self.busy),
        };

        let (tx, events) = mpsc::unbounded_channel();
        self.backend.execute(code, mode, EventSink { tx })?;

        tracing::debug!(mode = %mode, bytes = code.len(), "Execution accepted");
        Ok(Execution {
            events,
            _slot: slot,
        })
    }

    /// Best-effort; a running event stream may still deliver events.
    pub fn interrupt(&self) -> Result<(), ExecuteError> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(ExecuteError::ShutDown);
        }
        self.backend.interrupt()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Stops the backend. Only the first call has any effect.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::info!("Shutting down execution context");
        self.backend.shutdown();
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("busy", &self.is_busy())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}
