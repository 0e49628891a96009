pub mod parser;

pub use parser::ChatEventParser;

use serde::Deserialize;
use serde_json::Value;

use crate::error::ParseError;

/// An incremental text answer delta (`message`, `message_replace`).
#[derive(Debug, Clone, Deserialize)]
pub struct MessagePayload {
    pub task_id: Option<String>,
    pub message_id: Option<String>,
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub answer: String,
    pub created_at: Option<i64>,
}

/// A file the assistant attached to the answer.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageFilePayload {
    pub task_id: Option<String>,
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub file_type: Option<String>,
    pub belongs_to: Option<String>,
    pub url: Option<String>,
    pub conversation_id: Option<String>,
}

/// Terminal event of one completed turn. Carries the server-assigned
/// conversation id that later turns must echo back.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageEndPayload {
    pub task_id: Option<String>,
    pub message_id: Option<String>,
    pub conversation_id: Option<String>,
    pub metadata: Option<Value>,
}

/// A TTS audio chunk (`tts_message`) or the end marker
/// (`tts_message_end`, empty `audio`).
#[derive(Debug, Clone, Deserialize)]
pub struct TtsPayload {
    pub task_id: Option<String>,
    pub message_id: Option<String>,
    /// Base64-encoded MP3 bytes
    #[serde(default)]
    pub audio: String,
    pub created_at: Option<i64>,
}

/// Workflow / node progress events share one shape on the wire.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowPayload {
    pub task_id: Option<String>,
    pub workflow_run_id: Option<String>,
    pub data: Option<Value>,
}

/// A server-side error event.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorPayload {
    pub task_id: Option<String>,
    pub message_id: Option<String>,
    pub status: Option<i64>,
    pub code: Option<String>,
    pub message: Option<String>,
}

/// One SSE event, classified by its `event` field.
///
/// Constructed per line and handed to the sink in arrival order; never
/// retained by the session. Kinds the server may add later land in `Unknown`
/// with their payload intact instead of being dropped.
#[derive(Debug, Clone)]
pub enum ChatEvent {
    Message(MessagePayload),
    MessageFile(MessageFilePayload),
    MessageEnd(MessageEndPayload),
    TtsMessage(TtsPayload),
    TtsMessageEnd(TtsPayload),
    MessageReplace(MessagePayload),
    WorkflowStarted(WorkflowPayload),
    NodeStarted(WorkflowPayload),
    NodeFinished(WorkflowPayload),
    WorkflowFinished(WorkflowPayload),
    Error(ErrorPayload),
    Ping,
    Unknown { event: String, payload: Value },
}

impl ChatEvent {
    /// Classify a parsed JSON object by its `event` field.
    pub fn from_value(value: Value) -> Result<Self, ParseError> {
        let kind = value
            .get("event")
            .and_then(Value::as_str)
            .ok_or(ParseError::MissingKind)?
            .to_string();

        let event = match kind.as_str() {
            "message" => ChatEvent::Message(serde_json::from_value(value)?),
            "message_file" => ChatEvent::MessageFile(serde_json::from_value(value)?),
            "message_end" => ChatEvent::MessageEnd(serde_json::from_value(value)?),
            "tts_message" => ChatEvent::TtsMessage(serde_json::from_value(value)?),
            "tts_message_end" => ChatEvent::TtsMessageEnd(serde_json::from_value(value)?),
            "message_replace" => ChatEvent::MessageReplace(serde_json::from_value(value)?),
            "workflow_started" => ChatEvent::WorkflowStarted(serde_json::from_value(value)?),
            "node_started" => ChatEvent::NodeStarted(serde_json::from_value(value)?),
            "node_finished" => ChatEvent::NodeFinished(serde_json::from_value(value)?),
            "workflow_finished" => ChatEvent::WorkflowFinished(serde_json::from_value(value)?),
            "error" => ChatEvent::Error(serde_json::from_value(value)?),
            "ping" => ChatEvent::Ping,
            _ => ChatEvent::Unknown {
                event: kind,
                payload: value,
            },
        };

        Ok(event)
    }

    /// The wire name of this event kind.
    pub fn kind(&self) -> &str {
        match self {
            ChatEvent::Message(_) => "message",
            ChatEvent::MessageFile(_) => "message_file",
            ChatEvent::MessageEnd(_) => "message_end",
            ChatEvent::TtsMessage(_) => "tts_message",
            ChatEvent::TtsMessageEnd(_) => "tts_message_end",
            ChatEvent::MessageReplace(_) => "message_replace",
            ChatEvent::WorkflowStarted(_) => "workflow_started",
            ChatEvent::NodeStarted(_) => "node_started",
            ChatEvent::NodeFinished(_) => "node_finished",
            ChatEvent::WorkflowFinished(_) => "workflow_finished",
            ChatEvent::Error(_) => "error",
            ChatEvent::Ping => "ping",
            ChatEvent::Unknown { event, .. } => event,
        }
    }

    /// The task id targeted by cancellation requests, when present.
    pub fn task_id(&self) -> Option<&str> {
        match self {
            ChatEvent::Message(p) | ChatEvent::MessageReplace(p) => p.task_id.as_deref(),
            ChatEvent::MessageFile(p) => p.task_id.as_deref(),
            ChatEvent::MessageEnd(p) => p.task_id.as_deref(),
            ChatEvent::TtsMessage(p) | ChatEvent::TtsMessageEnd(p) => p.task_id.as_deref(),
            ChatEvent::WorkflowStarted(p)
            | ChatEvent::NodeStarted(p)
            | ChatEvent::NodeFinished(p)
            | ChatEvent::WorkflowFinished(p) => p.task_id.as_deref(),
            ChatEvent::Error(p) => p.task_id.as_deref(),
            ChatEvent::Ping => None,
            ChatEvent::Unknown { payload, .. } => payload.get("task_id").and_then(Value::as_str),
        }
    }
}
