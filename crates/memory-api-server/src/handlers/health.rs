use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;

use crate::services::memory::HealthReport;
use crate::services::ConversationMemory;

pub async fn health_check(
    State(memory): State<Arc<ConversationMemory>>,
) -> (StatusCode, Json<HealthReport>) {
    (StatusCode::OK, Json(memory.health_check().await))
}

/// Ready once the durable store answers; a missing cache only degrades
pub async fn readiness_check(State(memory): State<Arc<ConversationMemory>>) -> StatusCode {
    if memory.health_check().await.store_connected {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}
