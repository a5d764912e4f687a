//! Hub message log
//!
//! Every failure the core recovers from is also recorded here so the host can
//! show it in its log viewer. Severe entries raise a flag the host polls to
//! open that viewer.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::{error, info, warn};

use crate::error::{ErrorCode, ErrorSeverity, PollcastError};

/// Default number of entries kept in history
pub const DEFAULT_LOG_CAPACITY: usize = 500;

/// A single logged failure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub error: PollcastError,
    pub source: Option<String>,
    pub logged_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Default)]
struct LogState {
    history: VecDeque<LogEntry>,
    code_counts: HashMap<ErrorCode, usize>,
    source_counts: HashMap<String, usize>,
}

/// Bounded log of errors with per-code and per-source counters
#[derive(Debug)]
pub struct MessageLog {
    state: Mutex<LogState>,
    max_history: usize,
    viewer_requested: AtomicBool,
}

/// Counters reported by the message log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageLogStats {
    pub counts: HashMap<ErrorCode, usize>,
    pub source_counts: HashMap<String, usize>,
    pub entry_count: usize,
}

impl Default for MessageLog {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

impl MessageLog {
    pub fn new(max_history: usize) -> Self {
        Self {
            state: Mutex::new(LogState {
                history: VecDeque::with_capacity(max_history),
                ..LogState::default()
            }),
            max_history,
            viewer_requested: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LogState> {
        // A poisoned log is still a usable log
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record an error, returning it with an id assigned
    pub fn register(&self, mut error: PollcastError, source: Option<&str>) -> PollcastError {
        if error.error_id.is_none() {
            let now = chrono::Utc::now();
            error.error_id = Some(format!("err-{}-{}", now.timestamp_millis(), fastrand::u32(..)));
        }

        match error.severity {
            ErrorSeverity::Info => info!(code = %error.code, source = ?source, "{}", error.message),
            ErrorSeverity::Warning => {
                warn!(code = %error.code, source = ?source, "{}", error.message)
            }
            ErrorSeverity::Error | ErrorSeverity::Critical => {
                error!(code = %error.code, source = ?source, "{}", error.message)
            }
        }

        if error.is_severe() {
            self.viewer_requested.store(true, Ordering::SeqCst);
        }

        let mut state = self.lock();
        *state.code_counts.entry(error.code).or_insert(0) += 1;
        if let Some(src) = source {
            *state.source_counts.entry(src.to_string()).or_insert(0) += 1;
        }

        if state.history.len() >= self.max_history {
            state.history.pop_front();
        }
        state.history.push_back(LogEntry {
            error: error.clone(),
            source: source.map(str::to_string),
            logged_at: chrono::Utc::now(),
        });

        error
    }

    /// Count of entries logged with the given code
    pub fn count(&self, code: ErrorCode) -> usize {
        self.lock().code_counts.get(&code).copied().unwrap_or(0)
    }

    pub fn history(&self) -> Vec<LogEntry> {
        self.lock().history.iter().cloned().collect()
    }

    pub fn stats(&self) -> MessageLogStats {
        let state = self.lock();
        MessageLogStats {
            counts: state.code_counts.clone(),
            source_counts: state.source_counts.clone(),
            entry_count: state.history.len(),
        }
    }

    /// Returns true once per severe error burst; the host opens its log viewer
    pub fn take_viewer_request(&self) -> bool {
        self.viewer_requested.swap(false, Ordering::SeqCst)
    }

    pub fn clear(&self) {
        *self.lock() = LogState::default();
        self.viewer_requested.store(false, Ordering::SeqCst);
    }
}
