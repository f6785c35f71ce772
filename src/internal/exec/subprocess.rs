//! Execution backend that talks to an external kernel bridge process.
//!
//! The bridge reads one JSON request per line on stdin and writes one kernel
//! event per line on stdout, in the Jupyter message layout.

use serde::Serialize;
use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use crate::internal::config::KernelConfig;
use crate::internal::exec::context::{EventSink, ExecuteError, ExecutionBackend};
use crate::internal::exec::mode::ExecutionMode;
use crate::internal::message::kernel_event::{KernelChannel, KernelEvent};

const BRIDGE_EXITED: &str = "Kernel bridge exited during execution";
const EXIT_POLLS: u32 = 10;
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum BridgeRequest<'a> {
    Execute {
        msg_id: &'a str,
        session: &'a str,
        code: &'a str,
        mode: ExecutionMode,
    },
    Interrupt {
        session: &'a str,
    },
    Shutdown {
        session: &'a str,
    },
}

struct PendingExecution {
    msg_id: String,
    sink: EventSink,
}

#[derive(Default)]
struct BridgeState {
    pending: Option<PendingExecution>,
    /// Set once the bridge's stdout is gone; nothing can complete after that.
    closed: bool,
}

type Shared = Arc<Mutex<BridgeState>>;

pub struct SubprocessBackend {
    session: String,
    child: Mutex<Option<Child>>,
    stdin: Mutex<Option<ChildStdin>>,
    state: Shared,
}

impl SubprocessBackend {
    pub fn spawn(config: &KernelConfig) -> Result<Self, ExecuteError> {
        let mut command = Command::new(&config.command);
        command
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        if let Some(dir) = &config.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn()?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ExecuteError::Rejected("kernel stdin is not piped".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExecuteError::Rejected("kernel stdout is not piped".to_string()))?;

        let session = uuid::Uuid::new_v4().to_string();
        let state: Shared = Arc::new(Mutex::new(BridgeState::default()));

        let reader_state = Arc::clone(&state);
        let reader_session = session.clone();
        thread::Builder::new()
            .name("kernel-reader".to_string())
            .spawn(move || read_events(stdout, reader_state, &reader_session))?;

        tracing::info!(
            command = %config.command,
            pid = child.id(),
            session = %session,
            "Kernel bridge started"
        );

        Ok(Self {
            session,
            child: Mutex::new(Some(child)),
            stdin: Mutex::new(Some(stdin)),
            state,
        })
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    fn send(&self, request: &BridgeRequest<'_>) -> Result<(), ExecuteError> {
        let mut line = serde_json::to_string(request)
            .map_err(|e| ExecuteError::Rejected(e.to_string()))?;
        line.push('\n');

        let mut stdin = lock(&self.stdin);
        let pipe = stdin.as_mut().ok_or(ExecuteError::ShutDown)?;
        pipe.write_all(line.as_bytes())?;
        pipe.flush()?;
        Ok(())
    }
}

impl ExecutionBackend for SubprocessBackend {
    fn execute(&self, code: &str, mode: ExecutionMode, sink: EventSink) -> Result<(), ExecuteError> {
        let msg_id = uuid::Uuid::new_v4().to_string();
        {
            let mut state = lock(&self.state);
            if state.closed {
                return Err(ExecuteError::BridgeExited);
            }
            state.pending = Some(PendingExecution {
                msg_id: msg_id.clone(),
                sink,
            });
        }

        let request = BridgeRequest::Execute {
            msg_id: &msg_id,
            session: &self.session,
            code,
            mode,
        };
        if let Err(e) = self.send(&request) {
            lock(&self.state).pending.take();
            return Err(e);
        }

        tracing::debug!(msg_id = %msg_id, mode = %mode, "Execute request sent to kernel");
        Ok(())
    }

    fn interrupt(&self) -> Result<(), ExecuteError> {
        self.send(&BridgeRequest::Interrupt {
            session: &self.session,
        })
    }

    fn shutdown(&self) {
        if let Err(e) = self.send(&BridgeRequest::Shutdown {
            session: &self.session,
        }) {
            tracing::debug!("Kernel shutdown request not delivered: {}", e);
        }
        // Closing stdin lets a well-behaved bridge exit on its own.
        lock(&self.stdin).take();

        let Some(mut child) = lock(&self.child).take() else {
            return;
        };
        for _ in 0..EXIT_POLLS {
            match child.try_wait() {
                Ok(Some(status)) => {
                    tracing::info!(%status, "Kernel bridge exited");
                    return;
                }
                Ok(None) => thread::sleep(EXIT_POLL_INTERVAL),
                Err(e) => {
                    tracing::warn!("Failed to poll kernel bridge: {}", e);
                    break;
                }
            }
        }
        if let Err(e) = child.kill() {
            tracing::warn!("Failed to kill kernel bridge: {}", e);
        }
        let _ = child.wait();
    }
}

impl Drop for SubprocessBackend {
    fn drop(&mut self) {
        if let Some(mut child) = lock(&self.child).take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

fn read_events(stdout: ChildStdout, state: Shared, session: &str) {
    let reader = BufReader::new(stdout);
    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!("Kernel output read failed: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let event: KernelEvent = match serde_json::from_str(&line) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!("Skipping malformed kernel event: {}", e);
                continue;
            }
        };

        let mut guard = lock(&state);
        let Some(current) = guard.pending.as_ref() else {
            tracing::debug!(msg_type = %event.header.msg_type, "Kernel event with no pending execution");
            continue;
        };

        let belongs = event
            .parent_msg_id()
            .map_or(true, |parent| parent == current.msg_id);
        if !belongs {
            continue;
        }

        let finished = event.is_idle() && event.parent_msg_id().is_some();
        current.sink.emit(event);
        if finished {
            guard.pending.take();
        }
    }

    let mut guard = lock(&state);
    guard.closed = true;
    // Whatever was running will never finish; fail it instead of going quiet.
    if let Some(current) = guard.pending.take() {
        tracing::warn!(msg_id = %current.msg_id, "Kernel bridge closed its output during an execution");
        current.sink.emit(bridge_exited(session, &current.msg_id));
    }
}

fn bridge_exited(session: &str, parent_msg_id: &str) -> KernelEvent {
    KernelEvent::new(
        "error",
        session,
        json!({
            "ename": "KernelBridgeExited",
            "evalue": BRIDGE_EXITED,
            "traceback": [BRIDGE_EXITED],
        }),
    )
    .with_parent(parent_msg_id)
    .with_channel(KernelChannel::IoPub)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
