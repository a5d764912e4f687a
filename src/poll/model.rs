use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use tracing::warn;
use uuid::Uuid;

use crate::backend::{CreatePollOption, CreatePollRequest, VoteRecord};
use crate::events::OptionTally;

/// Options a poll may carry
pub const OPTIONS_PER_POLL: usize = 2;

/// Deferred effect of a winning option, run at most once
pub type PollAction = Box<dyn FnOnce() -> anyhow::Result<()> + Send + 'static>;

/// One choice in a poll
pub struct PollOption {
    pub id: Uuid,
    pub label: String,
    pub tooltip: Option<String>,
    action: Option<PollAction>,
    voters: HashSet<String>,
}

impl PollOption {
    pub fn new<F>(label: impl Into<String>, action: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        Self {
            id: Uuid::new_v4(),
            label: label.into(),
            tooltip: None,
            action: Some(Box::new(action)),
            voters: HashSet::new(),
        }
    }

    pub fn with_tooltip(mut self, tooltip: impl Into<String>) -> Self {
        self.tooltip = Some(tooltip.into());
        self
    }

    pub fn votes(&self) -> usize {
        self.voters.len()
    }

    pub fn has_voter(&self, user_id: &str) -> bool {
        self.voters.contains(user_id)
    }

    /// Idempotent per user
    pub fn register_vote(&mut self, user_id: &str) -> bool {
        self.voters.insert(user_id.to_string())
    }

    pub fn unregister_vote(&mut self, user_id: &str) -> bool {
        self.voters.remove(user_id)
    }

    pub fn clear_votes(&mut self) {
        self.voters.clear();
    }

    /// Take the action out; later calls return `None`
    pub fn take_action(&mut self) -> Option<PollAction> {
        self.action.take()
    }

    pub fn tally(&self) -> OptionTally {
        OptionTally {
            id: self.id,
            label: self.label.clone(),
            votes: self.votes(),
        }
    }
}

impl fmt::Debug for PollOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollOption")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("votes", &self.votes())
            .field("has_action", &self.action.is_some())
            .finish()
    }
}

/// How a poll came to exist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PollKind {
    /// Proposed by the game itself
    Standard,
    /// Proposed by the backend and validated locally
    Queued {
        /// Remote queued-poll record, retired before the poll is created
        queued_id: i64,
        /// Minutes, overriding the configured duration
        length: u64,
    },
}

/// A timed vote between two options
#[derive(Debug)]
pub struct Poll {
    pub local_id: Uuid,
    /// Authoritative id assigned by the backend
    pub id: Option<i64>,
    pub caption: String,
    pub kind: PollKind,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    options: Vec<PollOption>,
}

impl Poll {
    /// A game-proposed poll; extra options beyond two are dropped
    pub fn new(caption: impl Into<String>, options: Vec<PollOption>) -> Self {
        Self::with_kind(caption.into(), options, PollKind::Standard)
    }

    /// A backend-proposed poll with its own length in minutes
    pub fn queued(queued_id: i64, title: impl Into<String>, length: u64, options: Vec<PollOption>) -> Self {
        Self::with_kind(title.into(), options, PollKind::Queued { queued_id, length })
    }

    fn with_kind(caption: String, mut options: Vec<PollOption>, kind: PollKind) -> Self {
        if options.len() > OPTIONS_PER_POLL {
            warn!(
                caption = %caption,
                offered = options.len(),
                "Poll offered too many options, keeping the first two"
            );
            options.truncate(OPTIONS_PER_POLL);
        }

        Self {
            local_id: Uuid::new_v4(),
            id: None,
            caption,
            kind,
            started_at: None,
            ended_at: None,
            options,
        }
    }

    pub fn options(&self) -> &[PollOption] {
        &self.options
    }

    pub fn option(&self, option_id: Uuid) -> Option<&PollOption> {
        self.options.iter().find(|option| option.id == option_id)
    }

    /// How long the poll runs, given the configured default
    pub fn duration(&self, default: Duration) -> Duration {
        match self.kind {
            PollKind::Standard => default,
            PollKind::Queued { length, .. } => Duration::minutes(length as i64),
        }
    }

    /// Mark the poll started at `now`
    pub fn start(&mut self, now: DateTime<Utc>, default: Duration) {
        self.started_at = Some(now);
        self.ended_at = Some(now + self.duration(default));
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.ended_at.is_some_and(|ended_at| now >= ended_at)
    }

    /// Add `user_id` to the option; `false` if the option is unknown or already held
    pub fn register_vote(&mut self, user_id: &str, option_id: Uuid) -> bool {
        match self.options.iter_mut().find(|option| option.id == option_id) {
            Some(option) => option.register_vote(user_id),
            None => false,
        }
    }

    /// Remove `user_id` from every option, returning whether any vote was removed
    pub fn unregister_vote(&mut self, user_id: &str) -> bool {
        let mut removed = false;
        for option in &mut self.options {
            removed |= option.unregister_vote(user_id);
        }
        removed
    }

    pub fn total_votes(&self) -> usize {
        self.options.iter().map(PollOption::votes).sum()
    }

    /// Replace local votes with an authoritative tally, returning how many were unknown
    pub fn replace_votes(&mut self, votes: &[VoteRecord]) -> usize {
        for option in &mut self.options {
            option.clear_votes();
        }

        let mut unknown = 0;
        for vote in votes {
            if self.option(vote.choice_id).is_none() {
                unknown += 1;
                continue;
            }
            self.register_vote(&vote.user_id, vote.choice_id);
        }
        unknown
    }

    /// Index of the winner, ties broken uniformly with `rng`
    pub fn winning_option(&self, rng: &mut fastrand::Rng) -> Option<usize> {
        let votes: Vec<usize> = self.options.iter().map(PollOption::votes).collect();
        winning_index(&votes, rng)
    }

    pub fn take_action(&mut self, index: usize) -> Option<PollAction> {
        self.options.get_mut(index).and_then(PollOption::take_action)
    }

    pub fn tally(&self) -> Vec<OptionTally> {
        self.options.iter().map(PollOption::tally).collect()
    }

    pub fn to_create_request(&self, default: Duration) -> CreatePollRequest {
        CreatePollRequest {
            title: self.caption.clone(),
            length: self.duration(default).num_minutes().max(0) as u64,
            options: self
                .options
                .iter()
                .map(|option| CreatePollOption {
                    value: option.id,
                    label: option.label.clone(),
                })
                .collect(),
        }
    }

    pub fn view(&self) -> PollView {
        PollView {
            local_id: self.local_id,
            id: self.id,
            caption: self.caption.clone(),
            kind: self.kind,
            started_at: self.started_at,
            ended_at: self.ended_at,
            options: self.tally(),
        }
    }
}

/// Pick the index with the most votes, uniformly among ties
pub fn winning_index(votes: &[usize], rng: &mut fastrand::Rng) -> Option<usize> {
    let max = *votes.iter().max()?;
    let leaders: Vec<usize> = votes
        .iter()
        .enumerate()
        .filter(|(_, count)| **count == max)
        .map(|(index, _)| index)
        .collect();

    match leaders.as_slice() {
        [only] => Some(*only),
        _ => Some(leaders[rng.usize(..leaders.len())]),
    }
}

/// Read-only copy of a poll for observers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollView {
    pub local_id: Uuid,
    pub id: Option<i64>,
    pub caption: String,
    pub kind: PollKind,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub options: Vec<OptionTally>,
}

impl PollView {
    pub fn votes_for(&self, option_id: Uuid) -> Option<usize> {
        self.options
            .iter()
            .find(|option| option.id == option_id)
            .map(|option| option.votes)
    }
}
