//! Dispatch loop between the inbound channel and the endpoint handlers.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::internal::handler::handler::{Handler, HandlerError};
use crate::internal::message::envelope::{Endpoint, Message};
use crate::internal::router::shutdown::ShutdownCoordinator;
use crate::internal::transport::outbox::Outbox;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterState {
    Idle,
    Dispatching,
    Draining,
}

#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("No handler registered for endpoint {0}")]
    UnregisteredEndpoint(Endpoint),
    #[error("Endpoint {0} already has a handler")]
    DuplicateEndpoint(Endpoint),
    #[error("Inbound channel error: {0}")]
    Io(#[from] std::io::Error),
}

/// Endpoint to handler mapping, one handler per endpoint.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<Endpoint, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn Handler>) -> Result<(), RouterError> {
        let endpoint = handler.endpoint();
        if self.handlers.contains_key(&endpoint) {
            return Err(RouterError::DuplicateEndpoint(endpoint));
        }
        self.handlers.insert(endpoint, handler);
        Ok(())
    }

    pub fn get(&self, endpoint: Endpoint) -> Option<&Arc<dyn Handler>> {
        self.handlers.get(&endpoint)
    }

    /// Registered endpoints in declaration order.
    pub fn endpoints(&self) -> Vec<Endpoint> {
        Endpoint::ALL
            .iter()
            .copied()
            .filter(|endpoint| self.handlers.contains_key(endpoint))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

pub struct Router {
    registry: HandlerRegistry,
    outbox: Outbox,
    coordinator: Arc<ShutdownCoordinator>,
    state: Mutex<RouterState>,
}

impl Router {
    pub fn new(registry: HandlerRegistry, outbox: Outbox) -> Self {
        let handlers = registry
            .endpoints()
            .into_iter()
            .filter_map(|endpoint| {
                registry
                    .get(endpoint)
                    .map(|handler| (endpoint, Arc::clone(handler)))
            })
            .collect();
        Self {
            registry,
            outbox,
            coordinator: Arc::new(ShutdownCoordinator::new(handlers)),
            state: Mutex::new(RouterState::Idle),
        }
    }

    pub fn state(&self) -> RouterState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn coordinator(&self) -> Arc<ShutdownCoordinator> {
        Arc::clone(&self.coordinator)
    }

    fn transition(&self, next: RouterState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        // Draining is terminal.
        if *state != RouterState::Draining {
            *state = next;
        }
    }

    /// Decodes one inbound line and dispatches it. Undecodable lines are
    /// logged and skipped.
    pub fn dispatch_line(&self, line: &str) -> Result<(), RouterError> {
        match Message::decode(line) {
            Ok(message) => self.dispatch(message),
            Err(e) => {
                tracing::warn!("Skipping undecodable message: {}", e);
                Ok(())
            }
        }
    }

    /// Runs the handler for `message`. Handler failures and panics become an
    /// error reply; only a missing handler is reported to the caller.
    pub fn dispatch(&self, message: Message) -> Result<(), RouterError> {
        let endpoint = message.endpoint();
        let handler = self
            .registry
            .get(endpoint)
            .cloned()
            .ok_or(RouterError::UnregisteredEndpoint(endpoint))?;

        self.transition(RouterState::Dispatching);
        tracing::debug!(
            endpoint = %endpoint,
            command = %message.command.as_str(),
            seq = ?message.seq_number,
            "Dispatching"
        );

        let request = message.clone();
        let outcome = catch_unwind(AssertUnwindSafe(|| handler.handle(message)))
            .unwrap_or_else(|panic| Err(HandlerError::Panicked(panic_message(panic.as_ref()))));

        if let Err(e) = outcome {
            tracing::warn!(
                endpoint = %endpoint,
                command = %request.command.as_str(),
                "Handler failed: {}",
                e
            );
            self.outbox.send(request.error_reply(e.to_string()));
        }

        self.transition(RouterState::Idle);
        Ok(())
    }

    /// Reads newline-delimited envelopes until end of input or until
    /// `shutdown` resolves, then shuts every handler down.
    pub async fn run<R, S>(&self, mut reader: R, shutdown: S) -> Result<(), RouterError>
    where
        R: AsyncBufRead + Unpin,
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut buf = Vec::new();
        tracing::info!(endpoints = ?self.registry.endpoints(), "Router listening");

        let result = loop {
            buf.clear();
            let read = tokio::select! {
                biased;
                _ = &mut shutdown => {
                    tracing::info!("Termination requested");
                    break Ok(());
                }
                read = reader.read_until(b'\n', &mut buf) => read,
            };

            match read {
                Ok(0) => {
                    tracing::info!("Inbound channel closed");
                    break Ok(());
                }
                Ok(_) => {}
                Err(e) => break Err(RouterError::Io(e)),
            }

            let line = match std::str::from_utf8(&buf) {
                Ok(line) => line.trim(),
                Err(e) => {
                    tracing::warn!("Skipping non UTF-8 inbound line: {}", e);
                    continue;
                }
            };
            if line.is_empty() {
                continue;
            }

            if let Err(e) = self.dispatch_line(line) {
                tracing::error!("Fatal dispatch error: {}", e);
                break Err(e);
            }
        };

        self.drain();
        result
    }

    /// Enters the terminal state and shuts handlers down once.
    pub fn drain(&self) {
        self.transition(RouterState::Draining);
        self.coordinator.shutdown_all();
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}
