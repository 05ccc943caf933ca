use axum::extract::FromRef;
use std::sync::Arc;

use crate::config::Settings;
use crate::services::ConversationMemory;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub memory: Arc<ConversationMemory>,
    pub settings: Arc<Settings>,
}

impl AppState {
    pub fn new(memory: Arc<ConversationMemory>, settings: Settings) -> Self {
        Self {
            memory,
            settings: Arc::new(settings),
        }
    }
}

impl FromRef<AppState> for Arc<ConversationMemory> {
    fn from_ref(state: &AppState) -> Self {
        state.memory.clone()
    }
}

impl FromRef<AppState> for Arc<Settings> {
    fn from_ref(state: &AppState) -> Self {
        state.settings.clone()
    }
}
