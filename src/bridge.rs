//! Wires the connection, handlers, poll actor and queued-poll pipeline together

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::{BackendClient, HttpBackend};
use crate::config::Config;
use crate::connection::{ConnectionManager, ConnectionSettings, ConnectionState, Connector, TungsteniteConnector};
use crate::dispatch::HandlerRegistry;
use crate::error::PollcastResult;
use crate::events::PollEventBus;
use crate::game::{spawn_pump, GameSession, IncidentRegistry, MainThreadQueue};
use crate::handlers::{QueuedPollCreatedHandler, VoteHandler};
use crate::message_log::MessageLog;
use crate::poll::{Clock, Poll, PollDeps, PollManager, PollSettings, SystemClock};
use crate::queued::{PipelineDeps, QueuedPollPipeline};

/// External collaborators the bridge is built from
pub struct BridgeDeps {
    pub backend: Arc<dyn BackendClient>,
    pub connector: Arc<dyn Connector>,
    pub session: Arc<dyn GameSession>,
    pub registry: IncidentRegistry,
    pub clock: Arc<dyn Clock>,
}

/// Everything the host needs to run viewer polls
pub struct Bridge {
    config: Config,
    message_log: Arc<MessageLog>,
    main_thread: Arc<MainThreadQueue>,
    events: PollEventBus,
    registry: IncidentRegistry,
    polls: PollManager,
    pipeline: QueuedPollPipeline,
    connection: ConnectionManager,
    actors: Mutex<Vec<JoinHandle<()>>>,
    /// Backend syncs; cancelled rather than awaited on shutdown
    syncs: Mutex<Vec<JoinHandle<()>>>,
}

impl Bridge {
    pub async fn new(config: Config, deps: BridgeDeps) -> Self {
        let message_log = Arc::new(MessageLog::default());
        let main_thread = Arc::new(MainThreadQueue::new());
        let events = PollEventBus::default();

        let (polls, polls_task) = PollManager::spawn(
            PollSettings::from(&config.polls),
            PollDeps {
                backend: Arc::clone(&deps.backend),
                main_thread: main_thread.handle(),
                clock: deps.clock,
                events: events.clone(),
                message_log: Arc::clone(&message_log),
            },
        );

        let (pipeline, pipeline_task) = QueuedPollPipeline::spawn(PipelineDeps {
            backend: Arc::clone(&deps.backend),
            registry: deps.registry.clone(),
            session: deps.session,
            main_thread: main_thread.handle(),
            polls: polls.clone(),
            message_log: Arc::clone(&message_log),
        });

        let handlers = HandlerRegistry::new().with_message_log(Arc::clone(&message_log));
        handlers.register(Arc::new(VoteHandler::new(polls.clone()))).await;
        handlers
            .register(Arc::new(QueuedPollCreatedHandler::new(pipeline.clone())))
            .await;

        let connection = ConnectionManager::new(
            ConnectionSettings::from(&config),
            deps.connector,
            deps.backend,
            handlers,
            Arc::clone(&message_log),
        );

        Self {
            config,
            message_log,
            main_thread,
            events,
            registry: deps.registry,
            polls,
            pipeline,
            connection,
            actors: Mutex::new(vec![polls_task, pipeline_task]),
            syncs: Mutex::new(Vec::new()),
        }
    }

    /// Production wiring: HTTP backend, real sockets and the system clock
    pub async fn from_config(
        config: Config,
        session: Arc<dyn GameSession>,
        registry: IncidentRegistry,
    ) -> PollcastResult<Self> {
        config.validate()?;

        let deps = BridgeDeps {
            backend: Arc::new(HttpBackend::from_config(&config.backend)),
            connector: Arc::new(TungsteniteConnector),
            session,
            registry,
            clock: Arc::new(SystemClock),
        };
        Ok(Self::new(config, deps).await)
    }

    /// Connect and pick up queued polls left on the backend
    pub async fn start(&self) -> bool {
        info!(channel = %self.connection.channel(), "Starting poll bridge");
        if !self.connection.connect().await {
            return false;
        }

        let pipeline = self.pipeline.clone();
        let sync = tokio::spawn(async move {
            pipeline.sync_from_backend().await;
        });

        let mut syncs = self.syncs.lock().await;
        syncs.retain(|handle| !handle.is_finished());
        syncs.push(sync);
        true
    }

    /// Advance the poll lifecycle; call about once a second
    pub async fn tick(&self) {
        self.polls.tick().await;
    }

    /// Drain queued polls that arrived while no game was loaded
    pub async fn session_started(&self) -> usize {
        self.pipeline.session_started().await
    }

    pub async fn queue_poll(&self, poll: Poll) -> bool {
        self.polls.queue(poll).await
    }

    /// Run without a host main thread: pump main-thread work in the background,
    /// drain buffered polls, then tick until `stop` resolves and shut down.
    ///
    /// The pump starts first; draining a poll blocks on main-thread work.
    pub async fn run_until<F>(&self, tick_every: Duration, pump_every: Duration, stop: F)
    where
        F: Future<Output = ()>,
    {
        let pump = spawn_pump(Arc::clone(&self.main_thread), pump_every);

        let drained = self.session_started().await;
        debug!(drained, "Buffered queued polls processed");

        tokio::pin!(stop);
        let mut ticker = tokio::time::interval(tick_every);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                    if self.message_log.take_viewer_request() {
                        warn!("A severe error was logged; see the message log above");
                    }
                }
                _ = &mut stop => break,
            }
        }

        self.shutdown().await;
        pump.abort();
    }

    /// Disconnect and stop every actor
    pub async fn shutdown(&self) {
        for sync in self.syncs.lock().await.drain(..) {
            sync.abort();
        }
        self.connection.disconnect().await;
        self.pipeline.shutdown().await;
        self.polls.shutdown().await;

        for actor in self.actors.lock().await.drain(..) {
            if let Err(e) = actor.await {
                debug!(error = %e, "Actor ended abnormally");
            }
        }
        info!("Poll bridge stopped");
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn polls(&self) -> &PollManager {
        &self.polls
    }

    pub fn pipeline(&self) -> &QueuedPollPipeline {
        &self.pipeline
    }

    pub fn events(&self) -> &PollEventBus {
        &self.events
    }

    pub fn message_log(&self) -> &Arc<MessageLog> {
        &self.message_log
    }

    pub fn main_thread(&self) -> &Arc<MainThreadQueue> {
        &self.main_thread
    }

    pub fn registry(&self) -> &IncidentRegistry {
        &self.registry
    }
}
