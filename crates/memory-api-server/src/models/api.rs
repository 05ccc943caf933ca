use serde::{Deserialize, Serialize};

use super::message::{Metadata, Role};

// ===== REQUEST MODELS =====

#[derive(Debug, Deserialize)]
pub struct SaveMessageRequest {
    pub session_id: String,
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub metadata: Option<Metadata>,
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ContextQuery {
    #[serde(default)]
    pub max_chars: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct CleanupQuery {
    pub days: u32,
}

#[derive(Debug, Deserialize)]
pub struct BuildPromptRequest {
    pub message: String,
    #[serde(default)]
    pub limit: Option<usize>,
}

// ===== RESPONSE MODELS =====

#[derive(Debug, Serialize)]
pub struct SaveMessageResponse {
    pub success: bool,
    pub status: &'static str, // inserted, duplicate, unavailable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ContextResponse {
    pub session_id: String,
    pub context: String,
}

#[derive(Debug, Serialize)]
pub struct ClearSessionResponse {
    pub session_id: String,
    pub deleted: u64,
}

#[derive(Debug, Serialize)]
pub struct CleanupResponse {
    pub days: u32,
    pub deleted: u64,
}

#[derive(Debug, Serialize)]
pub struct PromptResponse {
    pub session_id: String,
    pub prompt: String,
}

#[derive(Debug, Serialize)]
pub struct SummaryResponse {
    pub session_id: String,
    pub summary: String,
}
