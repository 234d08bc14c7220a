//! Inbound text messages from the media server.
//!
//! The server does not tag its replies. Each message is decoded against the
//! known variants in a fixed order (progress, then completion) and anything
//! that matches neither is kept as plain text for the log.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Sent by the server after each chunk frame is stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressResponse {
    pub filename: String,
    /// The server spells this `chunksSended`
    #[serde(alias = "chunksSended")]
    pub chunks_sent: u32,
    pub total_chunks: u32,
}

impl ProgressResponse {
    /// `round(chunks_sent / total_chunks * 100)`, capped at 100.
    /// `None` when the server reports zero chunks.
    pub fn percent(&self) -> Option<u8> {
        if self.total_chunks == 0 {
            return None;
        }
        let sent = self.chunks_sent as u64;
        let total = self.total_chunks as u64;
        // integer round-half-up of sent * 100 / total
        Some(((sent * 200 + total) / (2 * total)).min(100) as u8)
    }
}

/// Stored media record, as echoed back on completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoInfo {
    pub original_filename: String,
    #[serde(default)]
    pub id: Option<i64>,
    /// Format depends on the server's date serializer, so it stays untyped
    #[serde(default)]
    pub created_at: Option<Value>,
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
}

/// Sent by the server once a whole file has been received and stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub photo: PhotoInfo,
    #[serde(default)]
    pub message: String,
}

impl CompletionResponse {
    pub fn filename(&self) -> &str {
        &self.photo.original_filename
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    Progress(ProgressResponse),
    Completion(CompletionResponse),
    /// Not JSON, or JSON of an unknown shape
    Text(String),
}

impl ServerMessage {
    pub fn parse(text: &str) -> Self {
        let Ok(value) = serde_json::from_str::<Value>(text) else {
            return ServerMessage::Text(text.to_string());
        };
        if let Ok(progress) = ProgressResponse::deserialize(&value) {
            return ServerMessage::Progress(progress);
        }
        if let Ok(completion) = CompletionResponse::deserialize(&value) {
            return ServerMessage::Completion(completion);
        }
        ServerMessage::Text(text.to_string())
    }
}
