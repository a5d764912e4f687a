//! Contract with the broadcasting backend's REST API
//!
//! Every call converts transport and decoding failures into a sentinel
//! (`None` or `false`) at this boundary. Callers branch on the sentinel.

mod http;

pub use http::HttpBackend;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::queued::{RawQueuedPoll, ValidationReport};

/// Remote operations the core depends on
#[async_trait]
pub trait BackendClient: Send + Sync {
    /// Fetch the signature authorizing `socket_id` to join `channel`
    async fn authorize_channel(&self, socket_id: &str, channel: &str) -> Option<String>;

    /// Register a poll, returning its authoritative id
    async fn create_poll(&self, request: &CreatePollRequest) -> Option<i64>;

    /// Delete the running poll, returning the final tally
    async fn delete_poll(&self) -> Option<DeletePollResponse>;

    /// One page of queued polls awaiting validation
    async fn list_queued_polls(&self, page: u32) -> Option<QueuedPollPage>;

    /// Report a validation outcome; `true` only when the backend confirms
    async fn report_validation(&self, queued_id: i64, report: &ValidationReport) -> bool;

    /// Remove a queued poll record
    async fn delete_queued_poll(&self, queued_id: i64) -> bool;
}

/// Body of the poll creation call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatePollRequest {
    pub title: String,
    /// Minutes
    pub length: u64,
    pub options: Vec<CreatePollOption>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatePollOption {
    /// Local option id, echoed back by votes
    pub value: Uuid,
    pub label: String,
}

/// Final tally returned when a poll is deleted
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeletePollResponse {
    /// Id of the poll the backend deleted, when it says so
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub votes: Vec<VoteRecord>,
}

/// A single vote in the authoritative tally
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRecord {
    #[serde(deserialize_with = "string_or_number")]
    pub user_id: String,
    pub choice_id: Uuid,
}

/// Paginated listing of queued polls
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueuedPollPage {
    #[serde(default)]
    pub data: Vec<RawQueuedPoll>,
    #[serde(default = "first_page")]
    pub current_page: u32,
    #[serde(default = "first_page")]
    pub last_page: u32,
}

impl QueuedPollPage {
    /// Whether pages follow `page`, judged by `last_page` alone since
    /// `current_page` is only echoed back
    pub fn has_more_after(&self, page: u32) -> bool {
        page < self.last_page
    }
}

fn first_page() -> u32 {
    1
}

/// Viewer ids arrive as strings or integers depending on the provider
pub(crate) fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(i64),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Text(text) => text,
        Id::Number(number) => number.to_string(),
    })
}
