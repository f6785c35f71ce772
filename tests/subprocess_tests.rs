//! Tests for the kernel bridge backend, driven by small shell bridges
#![cfg(unix)]

mod common;

use common::recv;
use execgate::internal::profile::code_registry;
use execgate::{
    Content, Endpoint, ExecuteError, Execution, ExecutionBackend, ExecutionContext, ExecutionMode,
    KernelConfig, KernelEvent, Outbox, Router, SubprocessBackend,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

const STREAM_TIMEOUT: Duration = Duration::from_secs(5);

/// Answers one execute request: an event for another request, a garbage
/// line, the request's own stream (echoing the mode it was sent), an event
/// with no parent, the closing idle status, then a straggler.
const ROUTING_BRIDGE: &str = r#"
read -r line
id=$(printf '%s' "$line" | sed 's/.*"msg_id":"\([^"]*\)".*/\1/')
mode=$(printf '%s' "$line" | sed 's/.*"mode":"\([a-z]*\)".*/\1/')
printf '{"header":{"msg_id":"e1","msg_type":"stream"},"parent_header":{"msg_id":"someone-else"},"content":{"name":"stdout","text":"stray"}}\n'
printf 'not json\n'
printf '{"header":{"msg_id":"e2","msg_type":"stream"},"parent_header":{"msg_id":"%s"},"content":{"name":"stdout","text":"%s"}}\n' "$id" "$mode"
printf '{"header":{"msg_id":"e3","msg_type":"stream"},"content":{"name":"stdout","text":"orphan"}}\n'
printf '{"header":{"msg_id":"e4","msg_type":"status"},"parent_header":{"msg_id":"%s"},"content":{"execution_state":"idle"}}\n' "$id"
printf '{"header":{"msg_id":"e5","msg_type":"stream"},"parent_header":{"msg_id":"%s"},"content":{"name":"stdout","text":"late"}}\n' "$id"
cat >/dev/null
"#;

/// Holds executions open until interrupted, and exits on shutdown.
const INTERRUPTIBLE_BRIDGE: &str = r#"
while read -r line; do
  case "$line" in
    *'"action":"execute"'*)
      id=$(printf '%s' "$line" | sed 's/.*"msg_id":"\([^"]*\)".*/\1/');;
    *'"action":"interrupt"'*)
      printf '{"header":{"msg_id":"i1","msg_type":"error"},"parent_header":{"msg_id":"%s"},"content":{"ename":"KeyboardInterrupt","evalue":"","traceback":["KeyboardInterrupt"]}}\n' "$id"
      printf '{"header":{"msg_id":"i2","msg_type":"status"},"parent_header":{"msg_id":"%s"},"content":{"execution_state":"idle"}}\n' "$id";;
    *'"action":"shutdown"'*)
      exit 0;;
  esac
done
"#;

fn bridge(script: &str) -> SubprocessBackend {
    let config = KernelConfig {
        command: "sh".to_string(),
        args: vec!["-c".to_string(), script.to_string()],
        working_dir: None,
    };
    SubprocessBackend::spawn(&config).expect("Should spawn the bridge")
}

async fn collect(execution: &mut Execution) -> Vec<KernelEvent> {
    let mut events = Vec::new();
    loop {
        let next = tokio::time::timeout(STREAM_TIMEOUT, execution.next_event())
            .await
            .expect("event stream should end");
        match next {
            Some(event) => events.push(event),
            None => return events,
        }
    }
}

fn text(event: &KernelEvent) -> Option<&str> {
    event.content.get("text").and_then(|text| text.as_str())
}

async fn wait_until_idle(context: &ExecutionContext) {
    for _ in 0..200 {
        if !context.is_busy() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("execution never finished");
}

#[tokio::test]
async fn test_events_are_routed_to_the_pending_request() {
    let context = ExecutionContext::new(Box::new(bridge(ROUTING_BRIDGE)));

    let mut execution = context
        .execute("1+1", ExecutionMode::Value)
        .expect("Should accept the execution");
    assert!(context.is_busy());
    let events = collect(&mut execution).await;

    let texts: Vec<Option<&str>> = events.iter().map(text).collect();
    assert_eq!(texts, vec![Some("eval"), Some("orphan"), None]);
    assert!(events.last().unwrap().is_idle());

    drop(execution);
    assert!(!context.is_busy());
    context.shutdown();

    println!("Routing test passed");
}

#[tokio::test]
async fn test_interrupt_ends_a_running_execution() {
    let context = ExecutionContext::new(Box::new(bridge(INTERRUPTIBLE_BRIDGE)));

    let mut execution = context
        .execute("while True: pass", ExecutionMode::Statement)
        .expect("Should accept the execution");
    context.interrupt().expect("Should deliver the interrupt");
    let events = collect(&mut execution).await;

    assert_eq!(events.len(), 2);
    assert_eq!(events[0].header.msg_type, "error");
    assert!(events[1].is_idle());
    context.shutdown();
}

#[tokio::test]
async fn test_bridge_exit_mid_execution_ends_stream_with_error() {
    let context = ExecutionContext::new(Box::new(bridge("head -n1 >/dev/null")));

    let mut execution = context
        .execute("1/0", ExecutionMode::Value)
        .expect("Should accept the execution");
    let events = collect(&mut execution).await;

    assert_eq!(events.len(), 1);
    assert_eq!(events[0].header.msg_type, "error");
    assert!(events[0].parent_msg_id().is_some());
    assert_eq!(
        events[0].content["traceback"][0],
        "Kernel bridge exited during execution"
    );

    drop(execution);
    let again = context.execute("1", ExecutionMode::Value);
    assert!(matches!(again, Err(ExecuteError::BridgeExited)));
}

#[tokio::test]
async fn test_bridge_exit_becomes_error_reply() {
    let context = Arc::new(ExecutionContext::new(Box::new(bridge("head -n1 >/dev/null"))));
    let (outbox, mut queue) = Outbox::channel();
    let registry = code_registry(&outbox, Arc::clone(&context)).expect("Should build registry");
    let router = Router::new(registry, outbox);

    router
        .dispatch_line(r#"{"webapp_endpoint":"CodeEditor","command_name":"execute","seq_number":7,"content":"1/0"}"#)
        .unwrap();

    let reply = recv(&mut queue).await;
    assert_eq!(reply.endpoint(), Endpoint::CodeEditor);
    assert!(reply.error);
    assert_eq!(reply.seq_number, Some(7));
    assert_eq!(
        reply.content,
        Content::Text("Kernel bridge exited during execution".to_string())
    );

    // Later requests fail straight away instead of waiting on a dead bridge.
    wait_until_idle(&context).await;
    router
        .dispatch_line(r#"{"webapp_endpoint":"CodeEditor","command_name":"execute","seq_number":8,"content":"1"}"#)
        .unwrap();
    let reply = recv(&mut queue).await;
    assert!(reply.error);
    assert_eq!(reply.seq_number, Some(8));
}

#[tokio::test]
async fn test_execute_after_bridge_exit_is_refused() {
    let context = ExecutionContext::new(Box::new(bridge("exit 0")));
    tokio::time::sleep(Duration::from_millis(200)).await;

    // Depending on timing the write fails or the closed bridge is noticed
    // first; either way nothing is left pending.
    let result = context.execute("1", ExecutionMode::Value);
    match result {
        Err(ExecuteError::BridgeExited) | Err(ExecuteError::Io(_)) => {}
        Ok(mut execution) => {
            let events = collect(&mut execution).await;
            assert_eq!(events.len(), 1);
            assert_eq!(events[0].header.msg_type, "error");
        }
        Err(other) => panic!("unexpected error: {}", other),
    }
}

#[test]
fn test_shutdown_lets_a_cooperative_bridge_exit() {
    let backend = bridge(INTERRUPTIBLE_BRIDGE);

    let started = Instant::now();
    backend.shutdown();
    assert!(started.elapsed() < Duration::from_millis(450));

    // A second call has nothing left to stop.
    backend.shutdown();
}

#[test]
fn test_shutdown_kills_a_stuck_bridge() {
    let backend = bridge("exec sleep 30");

    let started = Instant::now();
    backend.shutdown();
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(450), "{:?}", elapsed);
    assert!(elapsed < Duration::from_secs(10), "{:?}", elapsed);
}
