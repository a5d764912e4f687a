use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::model::{RawQueuedPoll, ValidationReport};
use super::validation::validate;
use crate::backend::BackendClient;
use crate::error::backend_request_failed;
use crate::game::{GameSession, IncidentRegistry, MainThreadHandle};
use crate::message_log::MessageLog;
use crate::poll::PollManager;

const COMMAND_CAPACITY: usize = 128;

/// What became of one queued poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Validated, confirmed and queued for running
    Admitted,
    /// Failed validation; the backend was told why
    Rejected(String),
    /// The backend did not confirm the report, so the poll was dropped
    Unconfirmed,
    /// Held until a game session starts
    Buffered,
    /// The main thread stopped before validation finished
    Abandoned,
}

/// Collaborators of the pipeline
pub struct PipelineDeps {
    pub backend: Arc<dyn BackendClient>,
    pub registry: IncidentRegistry,
    pub session: Arc<dyn GameSession>,
    pub main_thread: MainThreadHandle,
    pub polls: PollManager,
    pub message_log: Arc<MessageLog>,
}

enum PipelineCommand {
    Submit(RawQueuedPoll, Option<oneshot::Sender<Admission>>),
    SessionStarted(oneshot::Sender<usize>),
    Pending(oneshot::Sender<usize>),
    Shutdown(oneshot::Sender<()>),
}

/// Admits backend-proposed polls once the game can actually run them
///
/// One task owns the buffer of records that arrived while no session was
/// active, and processes records one at a time.
#[derive(Clone)]
pub struct QueuedPollPipeline {
    tx: mpsc::Sender<PipelineCommand>,
    backend: Arc<dyn BackendClient>,
}

impl QueuedPollPipeline {
    pub fn spawn(deps: PipelineDeps) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(COMMAND_CAPACITY);
        let backend = Arc::clone(&deps.backend);
        let actor = PipelineActor {
            rx,
            repository: VecDeque::new(),
            deps,
        };

        let handle = tokio::spawn(actor.run());
        (Self { tx, backend }, handle)
    }

    /// Hand a record to the pipeline without waiting for the outcome
    pub async fn submit(&self, raw: RawQueuedPoll) -> bool {
        self.tx.send(PipelineCommand::Submit(raw, None)).await.is_ok()
    }

    /// Hand a record to the pipeline and wait for its outcome
    pub async fn submit_and_wait(&self, raw: RawQueuedPoll) -> Admission {
        let (reply, rx) = oneshot::channel();
        if self
            .tx
            .send(PipelineCommand::Submit(raw, Some(reply)))
            .await
            .is_err()
        {
            return Admission::Abandoned;
        }
        rx.await.unwrap_or(Admission::Abandoned)
    }

    /// Drain the buffer after a game session starts; returns how many were processed
    pub async fn session_started(&self) -> usize {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(PipelineCommand::SessionStarted(reply)).await.is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Records waiting for a game session
    pub async fn pending(&self) -> usize {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(PipelineCommand::Pending(reply)).await.is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Walk every page of queued polls on the backend and submit them
    #[instrument(skip(self), level = "debug")]
    pub async fn sync_from_backend(&self) -> usize {
        let mut page = 1;
        let mut submitted = 0;

        loop {
            let Some(listing) = self.backend.list_queued_polls(page).await else {
                warn!(page, "Could not list queued polls");
                break;
            };

            for raw in listing.data.iter().cloned() {
                if self.submit(raw).await {
                    submitted += 1;
                }
            }

            if !listing.has_more_after(page) {
                break;
            }
            page += 1;
        }

        info!(submitted, "Synced queued polls from backend");
        submitted
    }

    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(PipelineCommand::Shutdown(reply)).await.is_ok() {
            let _ = rx.await;
        }
    }
}

struct PipelineActor {
    rx: mpsc::Receiver<PipelineCommand>,
    repository: VecDeque<RawQueuedPoll>,
    deps: PipelineDeps,
}

impl PipelineActor {
    async fn run(mut self) {
        while let Some(command) = self.rx.recv().await {
            match command {
                PipelineCommand::Submit(raw, reply) => {
                    let outcome = self.submit(raw).await;
                    if let Some(reply) = reply {
                        let _ = reply.send(outcome);
                    }
                }
                PipelineCommand::SessionStarted(reply) => {
                    let drained = self.drain().await;
                    let _ = reply.send(drained);
                }
                PipelineCommand::Pending(reply) => {
                    let _ = reply.send(self.repository.len());
                }
                PipelineCommand::Shutdown(reply) => {
                    let _ = reply.send(());
                    break;
                }
            }
        }

        if !self.repository.is_empty() {
            debug!(pending = self.repository.len(), "Pipeline stopped with buffered polls");
        }
    }

    async fn submit(&mut self, raw: RawQueuedPoll) -> Admission {
        if !self.deps.session.is_active() {
            debug!(queued_id = raw.id, "No game session, buffering queued poll");
            self.repository.push_back(raw);
            return Admission::Buffered;
        }
        self.process(raw).await
    }

    /// Process buffered records in order, stopping if the session ends
    async fn drain(&mut self) -> usize {
        let mut processed = 0;

        while let Some(raw) = self.repository.pop_front() {
            if !self.deps.session.is_active() {
                debug!(remaining = self.repository.len() + 1, "Session ended mid-drain");
                self.repository.push_front(raw);
                break;
            }
            self.process(raw).await;
            processed += 1;
        }

        processed
    }

    #[instrument(skip(self, raw), fields(queued_id = raw.id, title = %raw.title))]
    async fn process(&mut self, raw: RawQueuedPoll) -> Admission {
        let candidate = raw.clone();
        let registry = self.deps.registry.clone();
        let session = Arc::clone(&self.deps.session);

        let validated = match self
            .deps
            .main_thread
            .run(move || validate(&candidate, &registry, &session))
            .await
        {
            Some(result) => result,
            None => {
                warn!("Main thread unavailable, dropping queued poll");
                return Admission::Abandoned;
            }
        };

        let report = match &validated {
            Ok(_) => ValidationReport::valid(),
            Err(e) => ValidationReport::invalid(e.message.clone()),
        };

        if !self.deps.backend.report_validation(raw.id, &report).await {
            self.deps.message_log.register(
                backend_request_failed("report_validation", "backend did not confirm"),
                Some("queued"),
            );
            return Admission::Unconfirmed;
        }

        match validated {
            Ok(poll) => {
                if self.deps.polls.queue(poll).await {
                    info!("Queued poll admitted");
                    Admission::Admitted
                } else {
                    Admission::Rejected("poll could not be queued".to_string())
                }
            }
            Err(e) => {
                let message = e.message.clone();
                self.deps.message_log.register(e, Some("queued"));
                Admission::Rejected(message)
            }
        }
    }
}
