use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::internal::message::wire::wire_enum;

wire_enum! {
    /// Kernel socket an event arrived on.
    pub enum KernelChannel {
        Shell => "shell",
        IoPub => "iopub",
        Stdin => "stdin",
        Control => "control",
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KernelMessageType {
    Error,
    Stream,
    ExecuteResult,
    DisplayData,
    Status,
    ExecuteInput,
    ExecuteReply,
    Other(String),
}

impl KernelMessageType {
    pub fn parse(value: &str) -> Self {
        match value {
            "error" => KernelMessageType::Error,
            "stream" => KernelMessageType::Stream,
            "execute_result" => KernelMessageType::ExecuteResult,
            "display_data" => KernelMessageType::DisplayData,
            "status" => KernelMessageType::Status,
            "execute_input" => KernelMessageType::ExecuteInput,
            "execute_reply" => KernelMessageType::ExecuteReply,
            other => KernelMessageType::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            KernelMessageType::Error => "error",
            KernelMessageType::Stream => "stream",
            KernelMessageType::ExecuteResult => "execute_result",
            KernelMessageType::DisplayData => "display_data",
            KernelMessageType::Status => "status",
            KernelMessageType::ExecuteInput => "execute_input",
            KernelMessageType::ExecuteReply => "execute_reply",
            KernelMessageType::Other(other) => other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct KernelHeader {
    pub msg_id: String,
    pub msg_type: String,
    #[serde(default)]
    pub session: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// One message emitted by a kernel during an execution.
///
/// Mirrors the Jupyter message layout. `parent_header` is empty for events
/// that are not replies to a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelEvent {
    pub header: KernelHeader,
    #[serde(default, deserialize_with = "null_as_default")]
    pub parent_header: Map<String, Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub content: Value,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "buffer_encoding")]
    pub buffers: Option<Vec<Vec<u8>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<KernelChannel>,
}

impl KernelEvent {
    pub fn new(msg_type: &str, session: &str, content: Value) -> Self {
        Self {
            header: KernelHeader {
                msg_id: uuid::Uuid::new_v4().to_string(),
                msg_type: msg_type.to_string(),
                session: session.to_string(),
                username: None,
                date: Some(Utc::now().to_rfc3339()),
                version: None,
            },
            parent_header: Map::new(),
            metadata: Map::new(),
            content,
            buffers: None,
            channel: None,
        }
    }

    pub fn with_parent(mut self, parent_msg_id: &str) -> Self {
        self.parent_header
            .insert("msg_id".to_string(), Value::String(parent_msg_id.to_string()));
        self
    }

    pub fn with_channel(mut self, channel: KernelChannel) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn message_type(&self) -> KernelMessageType {
        KernelMessageType::parse(&self.header.msg_type)
    }

    pub fn parent_msg_id(&self) -> Option<&str> {
        self.parent_header.get("msg_id").and_then(Value::as_str)
    }

    /// True for the `status: idle` event that closes an execution.
    pub fn is_idle(&self) -> bool {
        self.message_type() == KernelMessageType::Status
            && self.content.get("execution_state").and_then(Value::as_str) == Some("idle")
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Binary buffers travel as base64 strings.
mod buffer_encoding {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        buffers: &Option<Vec<Vec<u8>>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match buffers {
            Some(buffers) => {
                let encoded: Vec<String> = buffers.iter().map(|b| STANDARD.encode(b)).collect();
                serializer.collect_seq(encoded)
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<Vec<u8>>>, D::Error> {
        let encoded = Option::<Vec<String>>::deserialize(deserializer)?;
        encoded
            .map(|items| {
                items
                    .iter()
                    .map(|item| STANDARD.decode(item).map_err(D::Error::custom))
                    .collect()
            })
            .transpose()
    }
}
