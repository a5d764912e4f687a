use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::{filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use pollcast::config;
use pollcast::game::{GameSession, IncidentRegistry, Target};
use pollcast::Bridge;

/// How often the poll lifecycle advances
const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// How often deferred main-thread work runs
const PUMP_INTERVAL: Duration = Duration::from_millis(50);

/// Stand-in session for running the bridge without a game attached
struct HeadlessSession;

impl GameSession for HeadlessSession {
    fn is_active(&self) -> bool {
        true
    }

    fn world(&self) -> Option<Target> {
        Some(Target("world".to_string()))
    }

    fn current_map(&self) -> Option<Target> {
        None
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if it exists
    let env_file_path = dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            if cfg!(debug_assertions) {
                "pollcast=debug,pollcast::connection=trace,warn".into()
            } else {
                "pollcast=info,warn".into()
            }
        }))
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    info!(version = pollcast::VERSION, "pollcast starting");

    match env_file_path {
        Some(path) => info!("Loaded environment variables from {}", path.display()),
        None => debug!("No .env file found. Using existing environment variables."),
    };

    let config = config::load_config().await?;
    let bridge = Bridge::from_config(config, Arc::new(HeadlessSession), IncidentRegistry::new()).await?;

    bridge.start().await;

    info!("Press Ctrl+C to stop");
    let stop = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Could not listen for Ctrl+C");
            return;
        }
        info!("Shutdown signal received, stopping...");
    };
    bridge.run_until(TICK_INTERVAL, PUMP_INTERVAL, stop).await;

    info!("Shutdown complete");
    Ok(())
}
