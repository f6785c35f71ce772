//! Turns raw kernel events into typed outbound messages.
//!
//! Classification is a pure transform: one event and the request that caused
//! it go in, exactly one reply comes out. Events are never reordered or
//! dropped here; filtering is left to handler post-processing.

use serde_json::{Map, Value};

use crate::internal::message::envelope::{Content, Message, Metadata, SubContentType};
use crate::internal::message::kernel_event::{KernelEvent, KernelMessageType};

/// Rich-output media keys in the order they decide `sub_type`.
const MEDIA_PRIORITY: &[SubContentType] = &[
    SubContentType::ApplicationPlotly,
    SubContentType::ImagePng,
    SubContentType::ImageSvg,
    SubContentType::ImageJpeg,
    SubContentType::ApplicationJson,
    SubContentType::TextHtml,
    SubContentType::TextPlain,
];

pub fn classify(event: &KernelEvent, request: &Message) -> Message {
    let reply = request
        .reply(Content::None)
        .with_metadata(merge_metadata(&request.metadata, event));

    match event.message_type() {
        KernelMessageType::Error => {
            let mut reply = reply;
            reply.content = Content::Text(traceback_text(&event.content));
            reply.error = true;
            reply
        }
        KernelMessageType::Stream => {
            let text = field_text(&event.content, "text")
                .or_else(|| field_text(&event.content, "data"))
                .unwrap_or_default();
            Message {
                content: Content::Text(text),
                ..reply
            }
        }
        KernelMessageType::ExecuteResult | KernelMessageType::DisplayData => {
            rich_result(reply, event.content.get("data"))
        }
        _ => Message {
            content: Content::KernelEvent(event.content.clone()),
            sub_type: Some(SubContentType::None),
            ..reply
        },
    }
}

/// Caller metadata, then the kernel identifiers, then the channel. Later keys
/// overwrite earlier ones.
pub fn merge_metadata(base: &Metadata, event: &KernelEvent) -> Metadata {
    let mut merged = base.clone();
    merged.insert(
        "msg_id".to_string(),
        Value::String(event.header.msg_id.clone()),
    );
    merged.insert(
        "msg_type".to_string(),
        Value::String(event.header.msg_type.clone()),
    );
    merged.insert(
        "session".to_string(),
        Value::String(event.header.session.clone()),
    );
    merged.insert(
        "stream_type".to_string(),
        event
            .channel
            .map_or(Value::Null, |channel| Value::String(channel.as_str().to_string())),
    );
    merged
}

fn traceback_text(content: &Value) -> String {
    match content.get("traceback") {
        Some(Value::Array(lines)) => lines
            .iter()
            .map(render_text)
            .collect::<Vec<_>>()
            .join("\n"),
        Some(other) => render_text(other),
        None => String::new(),
    }
}

fn rich_result(reply: Message, data: Option<&Value>) -> Message {
    match data {
        Some(Value::Object(media)) if !media.is_empty() => {
            let mut media: Map<String, Value> = media.clone();
            if media.contains_key(SubContentType::ApplicationPlotly.as_str()) {
                media.remove(SubContentType::TextHtml.as_str());
            }
            let sub_type = MEDIA_PRIORITY
                .iter()
                .copied()
                .find(|sub| media.contains_key(sub.as_str()))
                .unwrap_or(SubContentType::None);
            Message {
                content: Content::RichOutput(media),
                sub_type: Some(sub_type),
                ..reply
            }
        }
        Some(Value::Object(_)) | Some(Value::Null) | None => Message {
            content: Content::Text(String::new()),
            ..reply
        },
        Some(other) => Message {
            content: Content::Text(render_text(other)),
            ..reply
        },
    }
}

fn field_text(content: &Value, key: &str) -> Option<String> {
    match content.get(key) {
        None | Some(Value::Null) => None,
        Some(value) => Some(render_text(value)),
    }
}

fn render_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
