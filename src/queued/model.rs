use serde::{Deserialize, Serialize};

/// A backend-proposed poll before it has been checked against the game
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawQueuedPoll {
    pub id: i64,
    pub title: String,
    /// Minutes the poll runs once admitted
    pub length: u64,
    #[serde(default)]
    pub options: Vec<RawQueuedOption>,
    #[serde(default, alias = "validationError")]
    pub validation_error: Option<String>,
    #[serde(default, alias = "createdById")]
    pub created_by_id: Option<i64>,
    #[serde(default, alias = "channelId")]
    pub channel_id: Option<i64>,
    #[serde(default, alias = "updatedAt")]
    pub updated_at: Option<String>,
}

/// One option of a raw queued poll, naming an incident by mod and def
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawQueuedOption {
    #[serde(alias = "modId")]
    pub mod_id: String,
    #[serde(alias = "defName")]
    pub def_name: String,
    pub label: String,
}

/// Validation outcome reported back to the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_error: Option<String>,
}

impl ValidationReport {
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            validation_error: None,
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            validation_error: Some(message.into()),
        }
    }
}
