use std::sync::Arc;

use crate::config::Config;
use crate::services::conversation_service::ConversationService;
use crate::services::message_service::MessagePipeline;

/// Shared handler state. Everything inside is reference-counted, so cloning
/// per request is cheap.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub conversations: Arc<ConversationService>,
    pub pipeline: Arc<MessagePipeline>,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        conversations: Arc<ConversationService>,
        pipeline: Arc<MessagePipeline>,
    ) -> Self {
        Self {
            config,
            conversations,
            pipeline,
        }
    }
}
