use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tracing::{error, trace};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Work that must run on the host's main thread
///
/// Async code posts closures through a [`MainThreadHandle`]; the host drains
/// them with [`MainThreadQueue::pump`] once per frame.
pub struct MainThreadQueue {
    tx: mpsc::UnboundedSender<Job>,
    rx: Mutex<mpsc::UnboundedReceiver<Job>>,
}

/// Cloneable sender side of the main-thread queue
#[derive(Clone)]
pub struct MainThreadHandle {
    tx: mpsc::UnboundedSender<Job>,
}

impl Default for MainThreadQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MainThreadQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }

    pub fn handle(&self) -> MainThreadHandle {
        MainThreadHandle {
            tx: self.tx.clone(),
        }
    }

    /// Run every queued job on the calling thread, returning how many ran
    ///
    /// A panicking job is logged and does not stop the rest.
    pub fn pump(&self) -> usize {
        let mut rx = self.rx.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut ran = 0;

        while let Ok(job) = rx.try_recv() {
            if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                error!("Main-thread job panicked");
            }
            ran += 1;
        }

        if ran > 0 {
            trace!(ran, "Pumped main-thread jobs");
        }
        ran
    }
}

impl MainThreadHandle {
    /// Run `f` on the main thread and wait for its result
    ///
    /// `None` if the queue is gone or the job panicked.
    pub async fn run<F, T>(&self, f: F) -> Option<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let job: Job = Box::new(move || {
            let _ = reply_tx.send(f());
        });

        self.tx.send(job).ok()?;
        reply_rx.await.ok()
    }
}

/// Pump `queue` on a dedicated task, for hosts without their own frame loop
pub fn spawn_pump(queue: Arc<MainThreadQueue>, every: std::time::Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            queue.pump();
        }
    })
}
