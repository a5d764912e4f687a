//! Priority-ordered handler chain for application events

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, instrument, trace, warn};

use crate::error::{ErrorCode, ErrorCategory, ErrorSeverity, PollcastError};
use crate::message_log::MessageLog;
use crate::wire::InboundEnvelope;

/// A consumer of inbound application events
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Name used for logging and unregistration
    fn name(&self) -> &str;

    /// Higher priorities run first
    fn priority(&self) -> i32 {
        0
    }

    /// Returns `Ok(true)` when the event was handled and the chain should stop
    async fn handle(&self, envelope: &InboundEnvelope) -> anyhow::Result<bool>;
}

/// Result of dispatching one event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The named handler claimed the event
    Handled(String),
    /// Every handler declined
    Unhandled,
}

/// Registry of handlers, snapshotted per dispatch
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: Arc<RwLock<Vec<Arc<dyn MessageHandler>>>>,
    message_log: Option<Arc<MessageLog>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record handler failures in the message log as well as tracing
    pub fn with_message_log(mut self, message_log: Arc<MessageLog>) -> Self {
        self.message_log = Some(message_log);
        self
    }

    pub async fn register(&self, handler: Arc<dyn MessageHandler>) {
        debug!(handler = handler.name(), priority = handler.priority(), "Registering handler");
        self.handlers.write().await.push(handler);
    }

    /// Remove every handler with this name, returning whether any was removed
    pub async fn unregister(&self, name: &str) -> bool {
        let mut handlers = self.handlers.write().await;
        let before = handlers.len();
        handlers.retain(|handler| handler.name() != name);
        before != handlers.len()
    }

    pub async fn len(&self) -> usize {
        self.handlers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.handlers.read().await.is_empty()
    }

    /// Point-in-time copy sorted by descending priority; ties keep registration order
    pub async fn snapshot(&self) -> Vec<Arc<dyn MessageHandler>> {
        let mut handlers = self.handlers.read().await.clone();
        handlers.sort_by(|a, b| b.priority().cmp(&a.priority()));
        handlers
    }

    /// Run the chain until a handler claims the event
    #[instrument(skip(self, envelope), fields(event = %envelope.event_name), level = "debug")]
    pub async fn dispatch(&self, envelope: &InboundEnvelope) -> DispatchOutcome {
        for handler in self.snapshot().await {
            match handler.handle(envelope).await {
                Ok(true) => {
                    trace!(handler = handler.name(), "Event handled");
                    return DispatchOutcome::Handled(handler.name().to_string());
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(handler = handler.name(), error = %e, "Handler failed, continuing");
                    if let Some(log) = &self.message_log {
                        log.register(
                            PollcastError::new(ErrorCode::Internal)
                                .message(format!("Handler '{}' failed", handler.name()))
                                .context(e.to_string())
                                .category(ErrorCategory::Protocol)
                                .severity(ErrorSeverity::Warning)
                                .build(),
                            Some("dispatch"),
                        );
                    }
                }
            }
        }

        debug!("No handler claimed event");
        DispatchOutcome::Unhandled
    }
}
