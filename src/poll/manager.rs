use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::clock::Clock;
use super::machine::{ConcludeOutcome, CreatedOutcome, Finalized, PollPhase, PollStateMachine, StartedPoll};
use super::model::{Poll, PollAction, PollView};
use crate::backend::{BackendClient, DeletePollResponse};
use crate::config::PollConfig;
use crate::error::{backend_desync, backend_request_failed, poll_action_failed};
use crate::events::{PollEvent, PollEventBus, PollEventKind};
use crate::game::MainThreadHandle;
use crate::message_log::MessageLog;

const COMMAND_CAPACITY: usize = 256;

/// Timings for the poll actor
#[derive(Debug, Clone)]
pub struct PollSettings {
    pub duration: chrono::Duration,
    pub delete_buffer: Duration,
}

impl From<&PollConfig> for PollSettings {
    fn from(config: &PollConfig) -> Self {
        Self {
            duration: config.duration(),
            delete_buffer: config.delete_buffer(),
        }
    }
}

/// Point-in-time view of the poll actor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollSnapshot {
    pub current: Option<PollView>,
    pub phase: PollPhase,
    pub queued: usize,
    pub delete_requested: bool,
    pub deleting_poll: bool,
}

enum PollCommand {
    Queue(Poll, oneshot::Sender<bool>),
    Tick,
    Conclude(oneshot::Sender<ConcludeOutcome>),
    RegisterVote {
        user_id: String,
        option_id: Uuid,
        reply: oneshot::Sender<bool>,
    },
    UnregisterVote {
        user_id: String,
        reply: oneshot::Sender<bool>,
    },
    CastVote {
        user_id: String,
        poll_id: Option<i64>,
        option_id: Uuid,
        reply: oneshot::Sender<bool>,
    },
    Snapshot(oneshot::Sender<PollSnapshot>),
    Created {
        local_id: Uuid,
        id: Option<i64>,
    },
    BufferElapsed {
        local_id: Uuid,
    },
    Deleted {
        local_id: Uuid,
        response: Option<DeletePollResponse>,
    },
    Shutdown(oneshot::Sender<()>),
}

/// Handle to the task that owns every poll
///
/// All state changes go through one actor, so votes, ticks and backend
/// completions never interleave.
#[derive(Clone)]
pub struct PollManager {
    tx: mpsc::Sender<PollCommand>,
}

/// Collaborators of the poll actor
pub struct PollDeps {
    pub backend: Arc<dyn BackendClient>,
    pub main_thread: MainThreadHandle,
    pub clock: Arc<dyn Clock>,
    pub events: PollEventBus,
    pub message_log: Arc<MessageLog>,
}

impl PollManager {
    pub fn spawn(settings: PollSettings, deps: PollDeps) -> (Self, JoinHandle<()>) {
        Self::spawn_with_rng(settings, deps, fastrand::Rng::new())
    }

    /// Spawn with a seeded tie-breaker
    pub fn spawn_with_rng(settings: PollSettings, deps: PollDeps, rng: fastrand::Rng) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(COMMAND_CAPACITY);
        let actor = PollActor {
            machine: PollStateMachine::with_rng(settings.duration, rng),
            delete_buffer: settings.delete_buffer,
            rx,
            self_tx: tx.downgrade(),
            tasks: JoinSet::new(),
            deps,
        };

        let handle = tokio::spawn(actor.run());
        (Self { tx }, handle)
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> PollCommand) -> Option<T> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(make(reply)).await.ok()?;
        rx.await.ok()
    }

    /// Add a poll to the back of the queue
    pub async fn queue(&self, poll: Poll) -> bool {
        self.request(|reply| PollCommand::Queue(poll, reply))
            .await
            .unwrap_or(false)
    }

    /// Start the next poll or conclude a due one
    pub async fn tick(&self) {
        if self.tx.send(PollCommand::Tick).await.is_err() {
            debug!("Poll actor stopped, tick dropped");
        }
    }

    /// Request conclusion of the current poll if it is due
    pub async fn conclude_poll(&self) -> ConcludeOutcome {
        self.request(PollCommand::Conclude)
            .await
            .unwrap_or(ConcludeOutcome::NoPoll)
    }

    pub async fn register_vote(&self, user_id: impl Into<String>, option_id: Uuid) -> bool {
        let user_id = user_id.into();
        self.request(|reply| PollCommand::RegisterVote {
            user_id,
            option_id,
            reply,
        })
        .await
        .unwrap_or(false)
    }

    pub async fn unregister_vote(&self, user_id: impl Into<String>) -> bool {
        let user_id = user_id.into();
        self.request(|reply| PollCommand::UnregisterVote { user_id, reply })
            .await
            .unwrap_or(false)
    }

    /// Record a viewer's vote, replacing any earlier one
    pub async fn cast_vote(&self, user_id: impl Into<String>, poll_id: Option<i64>, option_id: Uuid) -> bool {
        let user_id = user_id.into();
        self.request(|reply| PollCommand::CastVote {
            user_id,
            poll_id,
            option_id,
            reply,
        })
        .await
        .unwrap_or(false)
    }

    pub async fn snapshot(&self) -> Option<PollSnapshot> {
        self.request(PollCommand::Snapshot).await
    }

    /// Stop the actor and cancel its in-flight backend calls
    pub async fn shutdown(&self) {
        if self.request(PollCommand::Shutdown).await.is_none() {
            debug!("Poll actor already stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }
}

struct PollActor {
    machine: PollStateMachine,
    delete_buffer: Duration,
    rx: mpsc::Receiver<PollCommand>,
    self_tx: mpsc::WeakSender<PollCommand>,
    tasks: JoinSet<()>,
    deps: PollDeps,
}

impl PollActor {
    async fn run(mut self) {
        debug!("Poll actor started");

        loop {
            tokio::select! {
                command = self.rx.recv() => match command {
                    Some(PollCommand::Shutdown(reply)) => {
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle(command).await,
                    None => break,
                },
                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            error!("Poll task panicked");
                        }
                    }
                }
            }
        }

        self.tasks.shutdown().await;
        debug!("Poll actor stopped");
    }

    async fn handle(&mut self, command: PollCommand) {
        match command {
            PollCommand::Queue(poll, reply) => {
                let _ = reply.send(self.machine.queue(poll));
            }
            PollCommand::Tick => self.tick().await,
            PollCommand::Conclude(reply) => {
                let outcome = self.conclude();
                let _ = reply.send(outcome);
            }
            PollCommand::RegisterVote { user_id, option_id, reply } => {
                let _ = reply.send(self.machine.register_vote(&user_id, option_id));
            }
            PollCommand::UnregisterVote { user_id, reply } => {
                let _ = reply.send(self.machine.unregister_vote(&user_id));
            }
            PollCommand::CastVote {
                user_id,
                poll_id,
                option_id,
                reply,
            } => {
                let _ = reply.send(self.machine.cast_vote(&user_id, poll_id, option_id));
            }
            PollCommand::Snapshot(reply) => {
                let _ = reply.send(PollSnapshot {
                    current: self.machine.view(),
                    phase: self.machine.phase(),
                    queued: self.machine.queued_len(),
                    delete_requested: self.machine.delete_requested(),
                    deleting_poll: self.machine.deleting_poll(),
                });
            }
            PollCommand::Created { local_id, id } => self.on_created(local_id, id).await,
            PollCommand::BufferElapsed { local_id } => self.on_buffer_elapsed(local_id),
            PollCommand::Deleted { local_id, response } => {
                if response.is_none() && self.machine.deleting_poll() {
                    self.deps.message_log.register(
                        backend_request_failed("delete_poll", "no tally returned"),
                        Some("polls"),
                    );
                }
                if let Some(finalized) = self.machine.finalize(local_id, response) {
                    self.on_finalized(finalized).await;
                }
            }
            PollCommand::Shutdown(_) => {}
        }
    }

    async fn tick(&mut self) {
        let now = self.deps.clock.now();

        if self.machine.current().is_none() {
            if let Some(started) = self.machine.start_next(now) {
                self.on_started(started).await;
            }
        } else if self.machine.is_due(now) {
            self.conclude();
        }
    }

    fn conclude(&mut self) -> ConcludeOutcome {
        let outcome = self.machine.conclude(self.deps.clock.now());
        if outcome != ConcludeOutcome::Requested {
            debug!(?outcome, "Conclusion not started");
            return outcome;
        }

        if let Some(local_id) = self.machine.current().map(|poll| poll.local_id) {
            let buffer = self.delete_buffer;
            info!(?buffer, "Poll ended, waiting for late votes before deletion");
            self.spawn_reply(async move {
                tokio::time::sleep(buffer).await;
                PollCommand::BufferElapsed { local_id }
            });
        }
        outcome
    }

    fn on_buffer_elapsed(&mut self, local_id: Uuid) {
        if !self.machine.begin_deletion(local_id) {
            return;
        }

        let backend = Arc::clone(&self.deps.backend);
        self.spawn_reply(async move {
            let response = backend.delete_poll().await;
            PollCommand::Deleted { local_id, response }
        });
    }

    #[instrument(skip(self, started), fields(caption = %started.caption), level = "debug")]
    async fn on_started(&mut self, started: StartedPoll) {
        self.publish(
            started.local_id,
            &started.caption,
            PollEventKind::Started {
                options: started.options.clone(),
                ends_at: started.ends_at,
            },
        )
        .await;

        let backend = Arc::clone(&self.deps.backend);
        let StartedPoll {
            local_id,
            request,
            retire_queued,
            ..
        } = started;

        self.spawn_reply(async move {
            if let Some(queued_id) = retire_queued {
                if !backend.delete_queued_poll(queued_id).await {
                    warn!(queued_id, "Queued poll record was not removed");
                }
            }
            let id = backend.create_poll(&request).await;
            PollCommand::Created { local_id, id }
        });
    }

    async fn on_created(&mut self, local_id: Uuid, id: Option<i64>) {
        let caption = self
            .machine
            .current()
            .map(|poll| poll.caption.clone())
            .unwrap_or_default();

        match self.machine.on_created(local_id, id) {
            (CreatedOutcome::Registered(poll_id), _) => {
                debug!(poll_id, "Poll registered with backend");
                self.publish(local_id, &caption, PollEventKind::Registered { poll_id })
                    .await;
            }
            (CreatedOutcome::Discarded, finalized) => {
                self.deps.message_log.register(
                    backend_request_failed("create_poll", "no poll id returned"),
                    Some("polls"),
                );
                if let Some(finalized) = finalized {
                    self.on_finalized(finalized).await;
                }
            }
            (CreatedOutcome::Stale, _) => debug!(%local_id, "Creation result for a poll that is gone"),
        }
    }

    async fn on_finalized(&mut self, finalized: Finalized) {
        match finalized {
            Finalized::Concluded {
                local_id,
                caption,
                winner,
                tally,
                unknown_votes,
            } => {
                if unknown_votes > 0 {
                    warn!(unknown_votes, "Tally named options this poll does not have");
                }

                let winner_label = winner.as_ref().map(|w| w.label.clone());
                if let Some(winner) = winner {
                    self.run_action(winner.label, winner.action);
                }

                self.publish(
                    local_id,
                    &caption,
                    PollEventKind::Concluded {
                        winner: winner_label,
                        tally,
                    },
                )
                .await;
            }
            Finalized::Discarded {
                local_id,
                caption,
                reason,
                desync,
            } => {
                if desync {
                    self.deps
                        .message_log
                        .register(backend_desync(reason.clone()), Some("polls"));
                }
                self.publish(local_id, &caption, PollEventKind::Discarded { reason })
                    .await;
            }
        }
    }

    /// Run the winner's action on the main thread, logging any failure
    fn run_action(&mut self, label: String, action: Option<PollAction>) {
        let Some(action) = action else {
            warn!(option = %label, "Winning option has no action");
            return;
        };

        let main_thread = self.deps.main_thread.clone();
        let message_log = Arc::clone(&self.deps.message_log);
        self.tasks.spawn(async move {
            match main_thread.run(action).await {
                Some(Ok(())) => info!(option = %label, "Winning action ran"),
                Some(Err(e)) => {
                    message_log.register(poll_action_failed(&label, e), Some("polls"));
                }
                None => {
                    message_log.register(
                        poll_action_failed(&label, "action panicked or main thread is gone"),
                        Some("polls"),
                    );
                }
            }
        });
    }

    /// The returned future owns its bus handle, so no borrow of the actor
    /// is held while it is awaited
    fn publish(
        &self,
        local_id: Uuid,
        caption: &str,
        kind: PollEventKind,
    ) -> impl std::future::Future<Output = usize> + Send + 'static {
        let events = self.deps.events.clone();
        let event = PollEvent::new(local_id, caption, kind);
        async move { events.publish(event).await }
    }

    /// Run `work` off the actor and feed its result back as a command
    fn spawn_reply<F>(&mut self, work: F)
    where
        F: std::future::Future<Output = PollCommand> + Send + 'static,
    {
        let tx = self.self_tx.clone();
        self.tasks.spawn(async move {
            let command = work.await;
            match tx.upgrade() {
                Some(tx) => {
                    if tx.send(command).await.is_err() {
                        debug!("Poll actor stopped before result arrived");
                    }
                }
                None => debug!("Poll actor gone, dropping result"),
            }
        });
    }
}
