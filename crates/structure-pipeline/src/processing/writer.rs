//! Single-consumer persistence writer
//!
//! Every store write of the pipeline is queued here and executed one at a
//! time on the blocking pool, highest priority first and FIFO within a
//! priority band. A failing or panicking task is logged and dropped.

use parking_lot::Mutex;
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::providers::Persistence;

/// Queue priority of a persistence task
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Low,
    Medium,
    High,
}

/// A unit of blocking work executed by the writer
pub trait PersistenceTask: Send + 'static {
    /// Short description for logs
    fn describe(&self) -> String;

    /// Execute against the stores
    fn run(self: Box<Self>, persistence: &Persistence) -> Result<()>;
}

/// Closure-backed task
struct FnTask<F> {
    label: String,
    f: F,
}

impl<F> PersistenceTask for FnTask<F>
where
    F: FnOnce(&Persistence) -> Result<()> + Send + 'static,
{
    fn describe(&self) -> String {
        self.label.clone()
    }

    fn run(self: Box<Self>, persistence: &Persistence) -> Result<()> {
        (self.f)(persistence)
    }
}

/// Wrap a closure as a persistence task
pub fn task_fn<F>(label: impl Into<String>, f: F) -> Box<dyn PersistenceTask>
where
    F: FnOnce(&Persistence) -> Result<()> + Send + 'static,
{
    Box::new(FnTask {
        label: label.into(),
        f,
    })
}

/// Count of persistence-bound messages not yet fully handled, shared by the
/// reporter, the writer and the supervisor
#[derive(Debug, Default)]
pub struct Activity {
    pending: AtomicUsize,
    notify: Notify,
}

impl Activity {
    pub fn begin(&self) {
        self.pending.fetch_add(1, Ordering::SeqCst);
    }

    pub fn end(&self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.notify.notify_waiters();
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Wake waiters after some other idle condition changed
    pub fn touch(&self) {
        self.notify.notify_waiters();
    }

    /// Resolve once nothing is pending and `quiet` holds
    pub async fn wait_until(&self, quiet: impl Fn() -> bool) {
        loop {
            let notified = self.notify.notified();
            if quiet() && self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }
}

struct QueuedTask {
    priority: Priority,
    sequence: u64,
    task: Box<dyn PersistenceTask>,
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}

impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    // Max-heap: higher priority first, then the lower sequence number
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

struct WriterInner {
    queue: Mutex<BinaryHeap<QueuedTask>>,
    notify: Notify,
    sequence: AtomicU64,
    closed: AtomicBool,
    activity: Arc<Activity>,
}

/// Handle to the persistence writer
#[derive(Clone)]
pub struct PersistenceWriter {
    inner: Arc<WriterInner>,
}

impl PersistenceWriter {
    /// Start the consumer. The returned receiver fires once it is running.
    pub fn start(
        persistence: Persistence,
        activity: Arc<Activity>,
    ) -> (Self, JoinHandle<()>, oneshot::Receiver<()>) {
        let inner = Arc::new(WriterInner {
            queue: Mutex::new(BinaryHeap::new()),
            notify: Notify::new(),
            sequence: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            activity,
        });
        let (ready_tx, ready_rx) = oneshot::channel();
        let handle = tokio::spawn(Self::consume(inner.clone(), persistence, ready_tx));
        (Self { inner }, handle, ready_rx)
    }

    /// Queue a task. Returns false when the writer is closed.
    pub fn enqueue(&self, priority: Priority, task: Box<dyn PersistenceTask>) -> bool {
        if self.inner.closed.load(Ordering::SeqCst) {
            tracing::warn!("Persistence writer closed, dropping {}", task.describe());
            return false;
        }
        let sequence = self.inner.sequence.fetch_add(1, Ordering::SeqCst);
        self.inner.activity.begin();
        self.inner.queue.lock().push(QueuedTask {
            priority,
            sequence,
            task,
        });
        self.inner.notify.notify_one();
        true
    }

    /// Tasks waiting to run
    pub fn queued(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// Stop accepting tasks; the consumer exits once the queue is drained
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.notify.notify_one();
    }

    async fn consume(inner: Arc<WriterInner>, persistence: Persistence, ready: oneshot::Sender<()>) {
        tracing::info!("Persistence writer started");
        let _ = ready.send(());

        loop {
            let next = inner.queue.lock().pop();
            let Some(queued) = next else {
                if inner.closed.load(Ordering::SeqCst) {
                    break;
                }
                inner.notify.notified().await;
                continue;
            };

            let label = queued.task.describe();
            let persistence = persistence.clone();
            let task = queued.task;
            match tokio::task::spawn_blocking(move || task.run(&persistence)).await {
                Ok(Ok(())) => tracing::debug!("Persisted {}", label),
                Ok(Err(e)) => tracing::error!("Persistence task {} failed: {}", label, e),
                Err(e) if e.is_panic() => tracing::error!("Persistence task {} panicked", label),
                Err(e) => tracing::error!("Persistence task {} was cancelled: {}", label, e),
            }
            inner.activity.end();
        }

        tracing::info!("Persistence writer stopped");
    }
}
