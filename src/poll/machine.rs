use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::model::{Poll, PollAction, PollKind, PollView, OPTIONS_PER_POLL};
use crate::backend::{CreatePollRequest, DeletePollResponse};
use crate::events::OptionTally;

/// Where the current poll is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollPhase {
    /// No current poll
    Idle,
    Active,
    /// Deletion requested, waiting out the buffer
    Concluding,
    /// Delete call in flight
    Deleting,
}

/// A poll that just became active and must be registered remotely
#[derive(Debug, Clone)]
pub struct StartedPoll {
    pub local_id: Uuid,
    pub caption: String,
    pub request: CreatePollRequest,
    /// Queued-poll record to delete before creation
    pub retire_queued: Option<i64>,
    pub options: Vec<OptionTally>,
    pub ends_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreatedOutcome {
    Registered(i64),
    /// Backend gave no id; the poll was dropped
    Discarded,
    /// The poll is no longer current
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcludeOutcome {
    /// Deletion requested; the buffer starts now
    Requested,
    NotDue,
    /// Already concluding or deleting
    Pending,
    NoPoll,
}

/// The winning option of a concluded poll
pub struct Winner {
    pub option_id: Uuid,
    pub label: String,
    pub action: Option<PollAction>,
}

/// End of a poll's life
pub enum Finalized {
    Concluded {
        local_id: Uuid,
        caption: String,
        winner: Option<Winner>,
        tally: Vec<OptionTally>,
        /// Tally entries naming options this poll does not have
        unknown_votes: usize,
    },
    Discarded {
        local_id: Uuid,
        caption: String,
        reason: String,
        /// Local state disagreed with the backend
        desync: bool,
    },
}

/// Single current poll plus a FIFO of pending ones
///
/// Pure state; the poll actor performs every side effect this returns.
pub struct PollStateMachine {
    current: Option<Poll>,
    phase: PollPhase,
    queue: VecDeque<Poll>,
    duration: Duration,
    rng: fastrand::Rng,
}

impl PollStateMachine {
    pub fn new(duration: Duration) -> Self {
        Self::with_rng(duration, fastrand::Rng::new())
    }

    pub fn with_rng(duration: Duration, rng: fastrand::Rng) -> Self {
        Self {
            current: None,
            phase: PollPhase::Idle,
            queue: VecDeque::new(),
            duration,
            rng,
        }
    }

    pub fn current(&self) -> Option<&Poll> {
        self.current.as_ref()
    }

    pub fn phase(&self) -> PollPhase {
        self.phase
    }

    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    /// Set once conclusion has been requested for the current poll
    pub fn delete_requested(&self) -> bool {
        matches!(self.phase, PollPhase::Concluding | PollPhase::Deleting)
    }

    /// Set while the delete call is in flight
    pub fn deleting_poll(&self) -> bool {
        self.phase == PollPhase::Deleting
    }

    pub fn view(&self) -> Option<PollView> {
        self.current.as_ref().map(Poll::view)
    }

    /// Append a poll; rejected unless it has exactly two options
    pub fn queue(&mut self, poll: Poll) -> bool {
        if poll.options().len() != OPTIONS_PER_POLL {
            warn!(
                caption = %poll.caption,
                options = poll.options().len(),
                "Rejecting poll without two options"
            );
            return false;
        }

        debug!(caption = %poll.caption, pending = self.queue.len() + 1, "Poll queued");
        self.queue.push_back(poll);
        true
    }

    /// Promote the next queued poll if nothing is current
    pub fn start_next(&mut self, now: DateTime<Utc>) -> Option<StartedPoll> {
        if self.current.is_some() {
            return None;
        }
        let mut poll = self.queue.pop_front()?;
        poll.start(now, self.duration);

        let ends_at = poll.ended_at.unwrap_or(now);
        let retire_queued = match poll.kind {
            PollKind::Queued { queued_id, .. } => Some(queued_id),
            PollKind::Standard => None,
        };
        let started = StartedPoll {
            local_id: poll.local_id,
            caption: poll.caption.clone(),
            request: poll.to_create_request(self.duration),
            retire_queued,
            options: poll.tally(),
            ends_at,
        };

        info!(caption = %poll.caption, %ends_at, "Poll started");
        self.current = Some(poll);
        self.phase = PollPhase::Active;
        Some(started)
    }

    /// Apply the backend's answer to poll creation
    pub fn on_created(&mut self, local_id: Uuid, id: Option<i64>) -> (CreatedOutcome, Option<Finalized>) {
        let is_current = self.current.as_ref().is_some_and(|poll| poll.local_id == local_id);
        if !is_current {
            return (CreatedOutcome::Stale, None);
        }

        match id {
            Some(id) => {
                if let Some(poll) = self.current.as_mut() {
                    poll.id = Some(id);
                }
                (CreatedOutcome::Registered(id), None)
            }
            None => {
                let finalized = self.discard("backend did not register the poll", false);
                (CreatedOutcome::Discarded, finalized)
            }
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.phase == PollPhase::Active && self.current.as_ref().is_some_and(|poll| poll.is_due(now))
    }

    /// Request conclusion of the current poll; idempotent once requested
    pub fn conclude(&mut self, now: DateTime<Utc>) -> ConcludeOutcome {
        match self.phase {
            PollPhase::Idle => ConcludeOutcome::NoPoll,
            PollPhase::Concluding | PollPhase::Deleting => ConcludeOutcome::Pending,
            PollPhase::Active if !self.is_due(now) => ConcludeOutcome::NotDue,
            PollPhase::Active => {
                self.phase = PollPhase::Concluding;
                ConcludeOutcome::Requested
            }
        }
    }

    /// Move from the buffer to the delete call; `false` if that already happened
    pub fn begin_deletion(&mut self, local_id: Uuid) -> bool {
        let is_current = self.current.as_ref().is_some_and(|poll| poll.local_id == local_id);
        if !is_current || self.phase != PollPhase::Concluding {
            return false;
        }
        self.phase = PollPhase::Deleting;
        true
    }

    /// Replace votes with the backend tally, pick a winner and clear the slot
    pub fn finalize(&mut self, local_id: Uuid, response: Option<DeletePollResponse>) -> Option<Finalized> {
        let is_current = self.current.as_ref().is_some_and(|poll| poll.local_id == local_id);
        if !is_current || self.phase != PollPhase::Deleting {
            debug!(%local_id, "Ignoring delete result for a poll that is not being deleted");
            return None;
        }

        let Some(response) = response else {
            return self.discard("backend did not confirm deletion", false);
        };

        let current_id = self.current.as_ref().and_then(|poll| poll.id);
        if let (Some(confirmed), Some(expected)) = (response.id, current_id) {
            if confirmed != expected {
                return self.discard(
                    format!("backend deleted poll {} but {} was current", confirmed, expected),
                    true,
                );
            }
        }

        let mut poll = self.current.take()?;
        self.phase = PollPhase::Idle;

        let unknown_votes = poll.replace_votes(&response.votes);
        let winner = poll.winning_option(&mut self.rng).map(|index| {
            let option = &poll.options()[index];
            let (option_id, label) = (option.id, option.label.clone());
            Winner {
                option_id,
                label,
                action: poll.take_action(index),
            }
        });

        info!(
            caption = %poll.caption,
            winner = winner.as_ref().map(|w| w.label.as_str()).unwrap_or("none"),
            votes = poll.total_votes(),
            "Poll concluded"
        );

        Some(Finalized::Concluded {
            local_id,
            tally: poll.tally(),
            caption: poll.caption,
            winner,
            unknown_votes,
        })
    }

    fn discard(&mut self, reason: impl Into<String>, desync: bool) -> Option<Finalized> {
        let poll = self.current.take()?;
        self.phase = PollPhase::Idle;
        let reason = reason.into();

        warn!(caption = %poll.caption, reason = %reason, "Poll discarded");
        Some(Finalized::Discarded {
            local_id: poll.local_id,
            caption: poll.caption,
            reason,
            desync,
        })
    }

    fn accepts_votes(&self) -> bool {
        matches!(self.phase, PollPhase::Active | PollPhase::Concluding)
    }

    pub fn register_vote(&mut self, user_id: &str, option_id: Uuid) -> bool {
        if !self.accepts_votes() {
            return false;
        }
        self.current
            .as_mut()
            .is_some_and(|poll| poll.register_vote(user_id, option_id))
    }

    pub fn unregister_vote(&mut self, user_id: &str) -> bool {
        if !self.accepts_votes() {
            return false;
        }
        self.current
            .as_mut()
            .is_some_and(|poll| poll.unregister_vote(user_id))
    }

    /// Last vote wins: clear the user's vote, then record the new one
    ///
    /// A vote naming a poll id other than the current one is ignored.
    pub fn cast_vote(&mut self, user_id: &str, poll_id: Option<i64>, option_id: Uuid) -> bool {
        let Some(poll) = self.current.as_ref() else {
            return false;
        };
        if let (Some(voted), Some(current)) = (poll_id, poll.id) {
            if voted != current {
                debug!(voted, current, "Vote for a poll that is not current");
                return false;
            }
        }
        let known = poll.option(option_id).is_some();

        // A vote always clears the voter's previous choice, even when the new one is unusable
        self.unregister_vote(user_id);
        known && self.register_vote(user_id, option_id)
    }
}
