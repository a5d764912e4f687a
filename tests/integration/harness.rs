//! Bridge test environment: a fake Pusher server, an in-memory backend and a scripted game
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use pollcast::backend::{BackendClient, CreatePollRequest, DeletePollResponse, QueuedPollPage};
use pollcast::config::{BackendConfig, PollConfig, ReconnectConfig};
use pollcast::connection::TungsteniteConnector;
use pollcast::game::{spawn_pump, FireParams, GameSession, Incident, IncidentRegistry, Target, TargetScope};
use pollcast::poll::{Clock, ManualClock};
use pollcast::queued::{RawQueuedPoll, ValidationReport};
use pollcast::{Bridge, BridgeDeps, Config};

use crate::pusher_server::FakePusherServer;

pub const CHANNEL_ID: &str = "42";
pub const CHANNEL: &str = "private-private.42";

/// Backend that answers from memory and remembers what it was asked
pub struct MemoryBackend {
    next_poll_id: AtomicI64,
    delete_response: Mutex<Option<DeletePollResponse>>,
    auth_requests: Mutex<Vec<(String, String)>>,
    reports: Mutex<Vec<(i64, ValidationReport)>>,
    retired: Mutex<Vec<i64>>,
    created: Mutex<Vec<CreatePollRequest>>,
    queued: Mutex<Vec<RawQueuedPoll>>,
    /// When set, listing never answers
    pub hold_listing: AtomicBool,
    pub listing_started: AtomicBool,
    pub listing_cancelled: Arc<AtomicBool>,
}

/// Flags the listing call as cancelled when its future is dropped
struct CancelFlag(Arc<AtomicBool>);

impl Drop for CancelFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self {
            next_poll_id: AtomicI64::new(100),
            delete_response: Mutex::new(Some(DeletePollResponse::default())),
            auth_requests: Mutex::new(Vec::new()),
            reports: Mutex::new(Vec::new()),
            retired: Mutex::new(Vec::new()),
            created: Mutex::new(Vec::new()),
            queued: Mutex::new(Vec::new()),
            hold_listing: AtomicBool::new(false),
            listing_started: AtomicBool::new(false),
            listing_cancelled: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl MemoryBackend {
    /// Leave a record on the backend's queued-poll listing
    pub fn leave_queued(&self, poll: RawQueuedPoll) {
        self.queued.lock().unwrap().push(poll);
    }

    pub fn set_delete_response(&self, response: DeletePollResponse) {
        *self.delete_response.lock().unwrap() = Some(response);
    }

    pub fn auth_requests(&self) -> Vec<(String, String)> {
        self.auth_requests.lock().unwrap().clone()
    }

    pub fn reports(&self) -> Vec<(i64, ValidationReport)> {
        self.reports.lock().unwrap().clone()
    }

    pub fn retired(&self) -> Vec<i64> {
        self.retired.lock().unwrap().clone()
    }

    pub fn created(&self) -> Vec<CreatePollRequest> {
        self.created.lock().unwrap().clone()
    }
}

#[async_trait]
impl BackendClient for MemoryBackend {
    async fn authorize_channel(&self, socket_id: &str, channel: &str) -> Option<String> {
        self.auth_requests
            .lock()
            .unwrap()
            .push((socket_id.to_string(), channel.to_string()));
        Some("xyz".to_string())
    }

    async fn create_poll(&self, request: &CreatePollRequest) -> Option<i64> {
        self.created.lock().unwrap().push(request.clone());
        Some(self.next_poll_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn delete_poll(&self) -> Option<DeletePollResponse> {
        self.delete_response.lock().unwrap().clone()
    }

    async fn list_queued_polls(&self, page: u32) -> Option<QueuedPollPage> {
        self.listing_started.store(true, Ordering::SeqCst);
        if self.hold_listing.load(Ordering::SeqCst) {
            let _flag = CancelFlag(self.listing_cancelled.clone());
            std::future::pending::<()>().await;
        }

        Some(QueuedPollPage {
            data: self.queued.lock().unwrap().clone(),
            current_page: page,
            last_page: 1,
        })
    }

    async fn report_validation(&self, queued_id: i64, report: &ValidationReport) -> bool {
        self.reports.lock().unwrap().push((queued_id, report.clone()));
        true
    }

    async fn delete_queued_poll(&self, queued_id: i64) -> bool {
        self.retired.lock().unwrap().push(queued_id);
        true
    }
}

/// A loaded save with a single map
pub struct LoadedGame;

impl GameSession for LoadedGame {
    fn is_active(&self) -> bool {
        true
    }

    fn world(&self) -> Option<Target> {
        Some(Target("world".to_string()))
    }

    fn current_map(&self) -> Option<Target> {
        Some(Target("colony".to_string()))
    }
}

/// Incident that counts its firings
pub struct CountingIncident {
    def_name: String,
    pub possible: AtomicBool,
    pub fired: AtomicUsize,
}

impl CountingIncident {
    pub fn new(def_name: &str) -> Arc<Self> {
        Arc::new(Self {
            def_name: def_name.to_string(),
            possible: AtomicBool::new(true),
            fired: AtomicUsize::new(0),
        })
    }
}

impl Incident for CountingIncident {
    fn def_name(&self) -> &str {
        &self.def_name
    }

    fn label(&self) -> &str {
        &self.def_name
    }

    fn scope(&self) -> TargetScope {
        TargetScope::Map
    }

    fn can_fire_now(&self, _params: &FireParams) -> bool {
        self.possible.load(Ordering::SeqCst)
    }

    fn fire(&self, _params: &FireParams) -> anyhow::Result<()> {
        self.fired.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A bridge connected to a fake server, with its main thread pumped in the background
pub struct BridgeEnvironment {
    pub bridge: Bridge,
    pub backend: Arc<MemoryBackend>,
    pub clock: Arc<ManualClock>,
    pub registry: IncidentRegistry,
    pump: Option<JoinHandle<()>>,
}

impl BridgeEnvironment {
    pub async fn new(server: &FakePusherServer) -> Self {
        let mut env = Self::unpumped(server).await;
        env.pump = Some(spawn_pump(env.bridge.main_thread().clone(), Duration::from_millis(2)));
        env
    }

    /// Nothing runs main-thread work until the test or the bridge pumps it
    pub async fn unpumped(server: &FakePusherServer) -> Self {
        let backend = Arc::new(MemoryBackend::default());
        let clock = Arc::new(ManualClock::default());
        let registry = IncidentRegistry::new();

        let config = Config {
            backend: BackendConfig {
                ws_url: server.url(),
                api_base_url: "http://127.0.0.1:1/api".to_string(),
                api_token: "token".to_string(),
                channel_id: CHANNEL_ID.to_string(),
            },
            polls: PollConfig {
                duration_minutes: 5,
                delete_buffer_seconds: 0,
            },
            reconnect: ReconnectConfig {
                max_attempts: 5,
                backoff_base_seconds: 0.05,
                jitter_ratio: 0.9,
                connect_timeout_seconds: 2,
                pong_timeout_seconds: 1,
            },
        };

        let bridge = Bridge::new(
            config,
            BridgeDeps {
                backend: backend.clone(),
                connector: Arc::new(TungsteniteConnector),
                session: Arc::new(LoadedGame),
                registry: registry.clone(),
                clock: clock.clone() as Arc<dyn Clock>,
            },
        )
        .await;

        Self {
            bridge,
            backend,
            clock,
            registry,
            pump: None,
        }
    }

    pub async fn cleanup(&self) {
        tokio::time::timeout(Duration::from_secs(5), self.bridge.shutdown())
            .await
            .expect("bridge shut down in time");
    }
}

impl Drop for BridgeEnvironment {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

/// Poll `check` until it holds, for at most `timeout_ms`
pub async fn wait_until<F, Fut>(timeout_ms: u64, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
