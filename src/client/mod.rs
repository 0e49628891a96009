pub mod mock;
pub mod transport;
pub mod types;

pub use transport::{EventStreamBody, StreamTransport};
pub use types::*;

use async_trait::async_trait;
use reqwest::multipart;
use serde_json::{json, Map, Value};
use tracing::info;

use crate::config::ServerConfig;
use crate::error::TransportError;
use transport::SseLineStream;

/// HTTP wrapper around the Dify API.
///
/// Holds the bearer token and the user identity; every method is a single
/// request/response exchange except `open_chat_stream`, which hands the body
/// back for incremental reads.
pub struct DifyClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    user: String,
}

impl DifyClient {
    pub fn new(server: &ServerConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: server.endpoint.trim_end_matches('/').to_string(),
            api_key: server.api_key.clone(),
            user: server.user.clone(),
        }
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint, path)
    }

    fn auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request.header("Authorization", format!("Bearer {}", self.api_key))
    }

    /// Map non-2xx responses to `TransportError::Status` with the body text.
    async fn check(response: reqwest::Response) -> Result<reqwest::Response, TransportError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(TransportError::Status { status, body })
    }

    /// Build the `/chat-messages` body shared by both response modes.
    pub fn chat_request(
        &self,
        query: &str,
        inputs: Map<String, Value>,
        conversation_id: Option<&str>,
        file_ids: &[String],
        response_mode: &str,
    ) -> ChatRequest {
        ChatRequest {
            inputs,
            query: query.to_string(),
            response_mode: response_mode.to_string(),
            conversation_id: conversation_id.unwrap_or_default().to_string(),
            user: self.user.clone(),
            files: file_ids
                .iter()
                .map(|id| FileAttachment::local_image(id.clone()))
                .collect(),
        }
    }

    /// One-shot chat completion (`response_mode: "blocking"`).
    pub async fn chat_blocking(
        &self,
        query: &str,
        inputs: Map<String, Value>,
        conversation_id: Option<&str>,
        file_ids: &[String],
    ) -> Result<ChatCompletionResponse, TransportError> {
        let request = self.chat_request(query, inputs, conversation_id, file_ids, "blocking");
        let response = self
            .auth(self.http.post(self.url("/chat-messages")))
            .json(&request)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    /// Upload a file for later reference from a chat request.
    pub async fn upload_file(
        &self,
        data: Vec<u8>,
        file_name: &str,
        mime_type: &str,
    ) -> Result<FileUploadResponse, TransportError> {
        let part = multipart::Part::bytes(data)
            .file_name(file_name.to_string())
            .mime_str(mime_type)?;
        let form = multipart::Form::new()
            .part("file", part)
            .text("user", self.user.clone());

        let response = self
            .auth(self.http.post(self.url("/files/upload")))
            .multipart(form)
            .send()
            .await?;
        let uploaded: FileUploadResponse = Self::check(response).await?.json().await?;
        info!(file_id = %uploaded.id, "file uploaded");
        Ok(uploaded)
    }

    /// List conversations for this user.
    pub async fn conversations(
        &self,
        last_id: Option<&str>,
        limit: u32,
        pinned: Option<bool>,
    ) -> Result<ConversationsResponse, TransportError> {
        let mut query: Vec<(&str, String)> = vec![
            ("user", self.user.clone()),
            ("last_id", last_id.unwrap_or_default().to_string()),
            ("limit", limit.to_string()),
        ];
        if let Some(pinned) = pinned {
            query.push(("pinned", pinned.to_string()));
        }

        let response = self
            .auth(self.http.get(self.url("/conversations")).query(&query))
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    /// Message history of one conversation.
    pub async fn conversation_messages(
        &self,
        conversation_id: &str,
        first_id: Option<&str>,
        limit: u32,
    ) -> Result<ConversationMessagesResponse, TransportError> {
        let query = [
            ("conversation_id", conversation_id.to_string()),
            ("user", self.user.clone()),
            ("first_id", first_id.unwrap_or_default().to_string()),
            ("limit", limit.to_string()),
        ];

        let response = self
            .auth(self.http.get(self.url("/messages")).query(&query))
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    /// Rename a conversation, or let the server pick a name.
    pub async fn rename_conversation(
        &self,
        conversation_id: &str,
        name: Option<&str>,
        auto_generate: bool,
    ) -> Result<ConversationRenameResponse, TransportError> {
        let body = json!({
            "name": name.unwrap_or_default(),
            "auto_generate": auto_generate,
        });

        let response = self
            .auth(
                self.http
                    .post(self.url(&format!("/conversations/{conversation_id}/name"))),
            )
            .json(&body)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    pub async fn delete_conversation(&self, conversation_id: &str) -> Result<(), TransportError> {
        let body = json!({ "user": self.user });
        let response = self
            .auth(
                self.http
                    .delete(self.url(&format!("/conversations/{conversation_id}"))),
            )
            .json(&body)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    /// Synthesize speech for a text or an existing message. Returns raw MP3
    /// bytes; playback is the caller's concern.
    pub async fn text_to_audio(
        &self,
        text: Option<&str>,
        message_id: Option<&str>,
    ) -> Result<Vec<u8>, TransportError> {
        let body = match message_id {
            Some(id) => json!({ "message_id": id, "user": self.user }),
            None => json!({ "text": text.unwrap_or_default(), "user": self.user }),
        };

        let response = self
            .auth(self.http.post(self.url("/text-to-audio")))
            .json(&body)
            .send()
            .await?;
        Ok(Self::check(response).await?.bytes().await?.to_vec())
    }

    /// Transcribe recorded audio. The caller supplies encoded bytes; capture
    /// and encoding stay outside this crate.
    pub async fn audio_to_text(
        &self,
        data: Vec<u8>,
        file_name: &str,
        mime_type: &str,
    ) -> Result<String, TransportError> {
        let part = multipart::Part::bytes(data)
            .file_name(file_name.to_string())
            .mime_str(mime_type)?;
        let form = multipart::Form::new()
            .part("file", part)
            .text("user", self.user.clone());

        let response = self
            .auth(self.http.post(self.url("/audio-to-text")))
            .multipart(form)
            .send()
            .await?;
        let transcript: AudioToTextResponse = Self::check(response).await?.json().await?;
        Ok(transcript.text)
    }
}

#[async_trait]
impl StreamTransport for DifyClient {
    async fn open_chat_stream(
        &self,
        request: &ChatRequest,
    ) -> Result<Box<dyn EventStreamBody>, TransportError> {
        let response = self
            .auth(self.http.post(self.url("/chat-messages")))
            .header("Accept", "text/event-stream")
            .json(request)
            .send()
            .await?;
        let response = Self::check(response).await?;
        Ok(Box::new(SseLineStream::new(response.bytes_stream())))
    }

    async fn stop_generation(&self, task_id: &str) -> Result<(), TransportError> {
        let body = json!({ "user": self.user });
        let response = self
            .auth(
                self.http
                    .post(self.url(&format!("/chat-messages/{task_id}/stop"))),
            )
            .json(&body)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}
