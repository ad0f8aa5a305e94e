use std::sync::Arc;

use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::database::repositories::ConversationRepository;
use crate::error::Result;
use crate::models::conversation::{ConversationEntry, MessageDirection, MessageType};

/// Append-only audit trail of everything said to and by a candidate.
#[derive(Clone)]
pub struct ConversationService {
    repo: Arc<dyn ConversationRepository>,
}

impl ConversationService {
    pub fn new(repo: Arc<dyn ConversationRepository>) -> Self {
        Self { repo }
    }

    pub async fn log_inbound(
        &self,
        candidate_id: Uuid,
        request_id: Option<Uuid>,
        message_type: MessageType,
        content: &str,
        metadata: JsonValue,
    ) -> Result<()> {
        self.append(
            candidate_id,
            request_id,
            MessageDirection::Inbound,
            message_type,
            content,
            metadata,
        )
        .await
    }

    pub async fn log_outbound(
        &self,
        candidate_id: Uuid,
        request_id: Option<Uuid>,
        message_type: MessageType,
        content: &str,
        metadata: JsonValue,
    ) -> Result<()> {
        self.append(
            candidate_id,
            request_id,
            MessageDirection::Outbound,
            message_type,
            content,
            metadata,
        )
        .await
    }

    async fn append(
        &self,
        candidate_id: Uuid,
        request_id: Option<Uuid>,
        direction: MessageDirection,
        message_type: MessageType,
        content: &str,
        metadata: JsonValue,
    ) -> Result<()> {
        let entry = ConversationEntry::new(
            candidate_id,
            request_id,
            direction,
            message_type,
            content,
            metadata,
        );
        self.repo.append(&entry).await
    }

    pub async fn history(&self, candidate_id: Uuid) -> Result<Vec<ConversationEntry>> {
        self.repo.list_for_candidate(candidate_id).await
    }

    pub async fn latest_request_id(&self, candidate_id: Uuid) -> Result<Option<Uuid>> {
        self.repo.latest_request_id(candidate_id).await
    }
}
