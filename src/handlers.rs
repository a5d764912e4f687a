//! Application event handlers registered by the bridge

use anyhow::anyhow;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use crate::backend::string_or_number;
use crate::dispatch::MessageHandler;
use crate::poll::PollManager;
use crate::queued::{QueuedPollPipeline, RawQueuedPoll};
use crate::wire::InboundEnvelope;

/// Event broadcast when a viewer votes
pub const VOTE_CREATED_EVENT: &str = "App\\Events\\VoteCreated";

/// Event broadcast when a queued poll is proposed
pub const QUEUED_POLL_CREATED_EVENT: &str = "App\\Events\\QueuedPollCreated";

/// Payload of a viewer vote
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct VotePayload {
    #[serde(default)]
    pub poll_id: Option<i64>,
    /// Id of the chosen option
    pub value: Uuid,
    /// Voter id at the streaming provider
    #[serde(deserialize_with = "string_or_number")]
    pub provider_id: String,
}

/// Records viewer votes on the current poll
pub struct VoteHandler {
    polls: PollManager,
}

impl VoteHandler {
    pub fn new(polls: PollManager) -> Self {
        Self { polls }
    }
}

#[async_trait]
impl MessageHandler for VoteHandler {
    fn name(&self) -> &str {
        "vote"
    }

    fn priority(&self) -> i32 {
        10
    }

    async fn handle(&self, envelope: &InboundEnvelope) -> anyhow::Result<bool> {
        if !envelope.is_event(VOTE_CREATED_EVENT) {
            return Ok(false);
        }

        let vote: VotePayload = envelope
            .data()
            .ok_or_else(|| anyhow!("vote payload is malformed"))?;

        let counted = self
            .polls
            .cast_vote(&vote.provider_id, vote.poll_id, vote.value)
            .await;
        debug!(voter = %vote.provider_id, option = %vote.value, counted, "Vote received");

        Ok(true)
    }
}

/// Feeds backend-proposed polls into the validation pipeline
pub struct QueuedPollCreatedHandler {
    pipeline: QueuedPollPipeline,
}

impl QueuedPollCreatedHandler {
    pub fn new(pipeline: QueuedPollPipeline) -> Self {
        Self { pipeline }
    }
}

#[async_trait]
impl MessageHandler for QueuedPollCreatedHandler {
    fn name(&self) -> &str {
        "queued_poll_created"
    }

    async fn handle(&self, envelope: &InboundEnvelope) -> anyhow::Result<bool> {
        if !envelope.is_event(QUEUED_POLL_CREATED_EVENT) {
            return Ok(false);
        }

        let raw: RawQueuedPoll = envelope
            .data()
            .ok_or_else(|| anyhow!("queued poll payload is malformed"))?;

        debug!(queued_id = raw.id, "Queued poll proposed");
        if !self.pipeline.submit(raw).await {
            return Err(anyhow!("queued poll pipeline has stopped"));
        }
        Ok(true)
    }
}
