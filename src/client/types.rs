use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Body of `POST /chat-messages`, for both streaming and blocking modes.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub inputs: Map<String, Value>,
    pub query: String,
    pub response_mode: String,
    /// Empty on the first turn; later turns echo the server-assigned id.
    pub conversation_id: String,
    pub user: String,
    pub files: Vec<FileAttachment>,
}

/// A previously uploaded file referenced from a chat request.
#[derive(Debug, Clone, Serialize)]
pub struct FileAttachment {
    #[serde(rename = "type")]
    pub file_type: String,
    pub transfer_method: String,
    pub upload_file_id: String,
}

impl FileAttachment {
    /// Reference an image uploaded through `/files/upload`.
    pub fn local_image(upload_file_id: impl Into<String>) -> Self {
        Self {
            file_type: "image".to_string(),
            transfer_method: "local_file".to_string(),
            upload_file_id: upload_file_id.into(),
        }
    }
}

/// Response of a blocking chat completion.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionResponse {
    pub message_id: Option<String>,
    pub conversation_id: Option<String>,
    pub mode: Option<String>,
    #[serde(default)]
    pub answer: String,
    pub metadata: Option<ResponseMetadata>,
    pub created_at: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResponseMetadata {
    pub usage: Option<Usage>,
    pub retriever_resources: Option<Vec<RetrieverResource>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Usage {
    pub prompt_tokens: Option<i64>,
    pub completion_tokens: Option<i64>,
    pub total_tokens: Option<i64>,
    pub total_price: Option<String>,
    pub currency: Option<String>,
    pub latency: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrieverResource {
    pub position: Option<i64>,
    pub dataset_id: Option<String>,
    pub dataset_name: Option<String>,
    pub document_id: Option<String>,
    pub document_name: Option<String>,
    pub segment_id: Option<String>,
    pub score: Option<f64>,
    pub content: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileUploadResponse {
    pub id: String,
    pub name: Option<String>,
    pub size: Option<i64>,
    pub extension: Option<String>,
    pub mime_type: Option<String>,
    pub created_by: Option<String>,
    pub created_at: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConversationsResponse {
    pub limit: Option<i64>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub data: Vec<Conversation>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub name: Option<String>,
    pub inputs: Option<Value>,
    pub status: Option<String>,
    pub created_at: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConversationMessagesResponse {
    pub limit: Option<i64>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub data: Vec<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: Option<String>,
    pub inputs: Option<Value>,
    pub query: Option<String>,
    pub answer: Option<String>,
    pub message_files: Option<Vec<MessageFile>>,
    pub feedback: Option<Feedback>,
    pub created_at: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageFile {
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub file_type: Option<String>,
    pub url: Option<String>,
    pub belongs_to: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Feedback {
    pub rating: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConversationRenameResponse {
    pub id: String,
    pub name: Option<String>,
    pub introduction: Option<String>,
    pub created_at: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AudioToTextResponse {
    pub text: String,
}
