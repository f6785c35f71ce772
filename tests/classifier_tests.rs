//! Tests for kernel event classification

mod common;

use common::{display, error, event, status, stream};
use execgate::internal::message::envelope::CodeEditorCommand;
use execgate::{classify, Content, ContentType, KernelEvent, Message, SubContentType};
use serde_json::json;

fn request() -> Message {
    Message::new(CodeEditorCommand::Execute, Content::Text("run()".to_string()))
        .with_seq_number(Some(42))
        .with_metadata_entry("cell_id", json!("cell-1"))
        .with_metadata_entry("session", json!("client-session"))
}

#[test]
fn test_error_event_joins_traceback() {
    let reply = classify(&error(&["line1", "line2"]), &request());

    assert!(reply.error);
    assert_eq!(reply.content_type(), ContentType::Str);
    assert_eq!(reply.content, Content::Text("line1\nline2".to_string()));
    assert_eq!(reply.command, request().command);
    assert_eq!(reply.seq_number, Some(42));
}

#[test]
fn test_error_wins_over_other_content() {
    let noisy = event(
        "error",
        json!({"traceback": ["boom"], "data": {"text/plain": "1"}, "text": "stdout"}),
    );
    let reply = classify(&noisy, &request());
    assert!(reply.error);
    assert_eq!(reply.content, Content::Text("boom".to_string()));
}

#[test]
fn test_stream_text() {
    let reply = classify(&stream("hello\n"), &request());
    assert!(!reply.error);
    assert_eq!(reply.content, Content::Text("hello\n".to_string()));
    assert_eq!(reply.sub_type, None);
}

#[test]
fn test_rich_output_media_map() {
    let reply = classify(
        &display(json!({"text/plain": "<Figure>", "image/png": "iVBORw0KGgo="})),
        &request(),
    );
    assert_eq!(reply.content_type(), ContentType::RichOutput);
    assert_eq!(reply.sub_type, Some(SubContentType::ImagePng));

    let result = event("execute_result", json!({"data": {"text/plain": "2"}, "execution_count": 1}));
    let reply = classify(&result, &request());
    assert_eq!(reply.sub_type, Some(SubContentType::TextPlain));
    let Content::RichOutput(media) = reply.content else {
        panic!("expected rich output");
    };
    assert_eq!(media["text/plain"], json!("2"));
}

#[test]
fn test_plotly_drops_html_alternative() {
    let reply = classify(
        &display(json!({
            "application/vnd.plotly.v1+json": {"data": [], "layout": {}},
            "text/html": "<div>big</div>",
            "text/plain": "Figure()"
        })),
        &request(),
    );

    assert_eq!(reply.sub_type, Some(SubContentType::ApplicationPlotly));
    let Content::RichOutput(media) = reply.content else {
        panic!("expected rich output");
    };
    assert!(!media.contains_key("text/html"));
    assert!(media.contains_key("text/plain"));

    // Without plotly the html stays.
    let reply = classify(&display(json!({"text/html": "<b>x</b>"})), &request());
    assert_eq!(reply.sub_type, Some(SubContentType::TextHtml));
}

#[test]
fn test_empty_media_map_is_empty_string() {
    let reply = classify(&display(json!({})), &request());
    assert_eq!(reply.content, Content::Text(String::new()));

    let reply = classify(&event("display_data", json!({})), &request());
    assert_eq!(reply.content, Content::Text(String::new()));
}

#[test]
fn test_other_events_pass_through_raw() {
    let reply = classify(&status("busy"), &request());
    assert_eq!(reply.content_type(), ContentType::KernelEvent);
    assert_eq!(reply.sub_type, Some(SubContentType::None));
    assert_eq!(reply.content, Content::KernelEvent(json!({"execution_state": "busy"})));
    assert!(!reply.error);
}

#[test]
fn test_metadata_merge_overwrites_kernel_keys_only() {
    let kernel_event: KernelEvent = stream("x");
    let reply = classify(&kernel_event, &request());

    assert_eq!(reply.metadata_str("cell_id"), Some("cell-1"));
    assert_eq!(reply.metadata_str("session"), Some(common::SESSION));
    assert_eq!(reply.metadata_str("msg_id"), Some(kernel_event.header.msg_id.as_str()));
    assert_eq!(reply.metadata_str("msg_type"), Some("stream"));
    assert_eq!(reply.metadata_str("stream_type"), Some("iopub"));

    let mut without_channel = stream("y");
    without_channel.channel = None;
    let reply = classify(&without_channel, &request());
    assert_eq!(reply.metadata.get("stream_type"), Some(&json!(null)));
}

#[test]
fn test_classification_preserves_order() {
    let events = vec![stream("a"), stream("b"), stream("c")];
    let contents: Vec<Content> = events
        .iter()
        .map(|event| classify(event, &request()).content)
        .collect();
    assert_eq!(
        contents,
        vec![
            Content::Text("a".to_string()),
            Content::Text("b".to_string()),
            Content::Text("c".to_string()),
        ]
    );
}
