#![allow(dead_code)]

use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use execgate::{
    EventSink, ExecuteError, ExecutionBackend, ExecutionMode, KernelChannel, KernelEvent, Message,
    Metadata, OutboundQueue,
};

pub const SESSION: &str = "test-session";
const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// Events one `execute` call replays, plus how long the stream stays open
/// after the last event.
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub events: Vec<KernelEvent>,
    pub hold: Duration,
}

impl Script {
    pub fn new(events: Vec<KernelEvent>) -> Self {
        Self {
            events,
            hold: Duration::ZERO,
        }
    }

    pub fn held_for(mut self, hold: Duration) -> Self {
        self.hold = hold;
        self
    }
}

/// In-process backend replaying canned kernel events from its own thread,
/// the way a real kernel delivers them.
#[derive(Clone, Default)]
pub struct ScriptedBackend {
    scripts: Arc<Mutex<VecDeque<Script>>>,
    executed: Arc<Mutex<Vec<(String, ExecutionMode)>>>,
    interrupts: Arc<AtomicUsize>,
    shutdowns: Arc<AtomicUsize>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_script(&self, script: Script) {
        self.scripts.lock().unwrap().push_back(script);
    }

    pub fn push_events(&self, events: Vec<KernelEvent>) {
        self.push_script(Script::new(events));
    }

    pub fn executed(&self) -> Vec<(String, ExecutionMode)> {
        self.executed.lock().unwrap().clone()
    }

    pub fn interrupts(&self) -> usize {
        self.interrupts.load(Ordering::SeqCst)
    }

    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

impl ExecutionBackend for ScriptedBackend {
    fn execute(&self, code: &str, mode: ExecutionMode, sink: EventSink) -> Result<(), ExecuteError> {
        self.executed.lock().unwrap().push((code.to_string(), mode));
        let script = self.scripts.lock().unwrap().pop_front().unwrap_or_default();

        std::thread::spawn(move || {
            for event in script.events {
                if !sink.emit(event) {
                    return;
                }
            }
            std::thread::sleep(script.hold);
        });
        Ok(())
    }

    fn interrupt(&self) -> Result<(), ExecuteError> {
        self.interrupts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn event(msg_type: &str, content: Value) -> KernelEvent {
    KernelEvent::new(msg_type, SESSION, content).with_channel(KernelChannel::IoPub)
}

pub fn stream(text: &str) -> KernelEvent {
    event("stream", json!({"name": "stdout", "text": text}))
}

pub fn error(traceback: &[&str]) -> KernelEvent {
    event(
        "error",
        json!({"ename": "ZeroDivisionError", "evalue": "division by zero", "traceback": traceback}),
    )
}

pub fn display(data: Value) -> KernelEvent {
    event("display_data", json!({"data": data, "metadata": {}}))
}

pub fn status(state: &str) -> KernelEvent {
    event("status", json!({"execution_state": state}))
}

pub fn metadata(value: Value) -> Metadata {
    match value {
        Value::Object(map) => map,
        other => panic!("metadata must be an object, got {}", other),
    }
}

/// Next outbound message, failing the test if none arrives in time.
pub async fn recv(queue: &mut OutboundQueue) -> Message {
    tokio::time::timeout(RECV_TIMEOUT, queue.recv())
        .await
        .expect("timed out waiting for an outbound message")
        .expect("outbound channel closed")
}

/// Asserts that nothing is sent within `wait`.
pub async fn assert_quiet(queue: &mut OutboundQueue, wait: Duration) {
    if let Ok(Some(message)) = tokio::time::timeout(wait, queue.recv()).await {
        panic!("unexpected outbound message: {:?}", message);
    }
}
