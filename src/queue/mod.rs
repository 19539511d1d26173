//! The engine work queue.
//!
//! One dedicated worker thread owns the engines. Connections submit
//! [`Task`]s with [`WorkQueue::add_task`]; the worker runs them one at a
//! time and replies through each task's [`Responder`].
//!
//! Startup happens in two phases. The thread starts immediately but waits
//! until [`WorkQueue::initialize`] hands it the settings, then loads the
//! engine and pattern sets. A load failure fires the fatal-error callback
//! and the thread exits without ever running a task.

pub mod stats;
pub mod task;
pub mod tasks;

use std::collections::VecDeque;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use thiserror::Error;
use tokio::sync::watch;

use crate::engine::{DocumentEngine, EngineLoader, EngineSettings, PatternEngine};

pub use stats::{MEMORY_HISTORY, MemorySnapshot, QueueStats};
pub use task::{EngineHandle, EngineKind, Responder, Task, TaskReply};

pub type FatalErrorCallback = Box<dyn Fn(&str) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueState {
    /// Waiting for `initialize` or loading engines.
    Starting,
    Ready,
    Failed(String),
    ShutDown,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("work queue is already initialized")]
    AlreadyInitialized,

    #[error("work queue is shut down")]
    ShutDown,
}

struct TaskQueue {
    settings: Option<EngineSettings>,
    tasks: VecDeque<Box<dyn Task>>,
    executing: bool,
    shutdown: bool,
}

struct Shared {
    queue: Mutex<TaskQueue>,
    cond: Condvar,
    stats: Mutex<QueueStats>,
    state: watch::Sender<QueueState>,
    fatal: Mutex<Option<FatalErrorCallback>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct WorkQueue {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl WorkQueue {
    /// Starts the worker thread. It idles until [`WorkQueue::initialize`].
    ///
    /// Create one per process and share the returned handle.
    pub fn start(loader: Box<dyn EngineLoader>) -> io::Result<Arc<Self>> {
        let (state, _) = watch::channel(QueueState::Starting);
        let shared = Arc::new(Shared {
            queue: Mutex::new(TaskQueue {
                settings: None,
                tasks: VecDeque::new(),
                executing: false,
                shutdown: false,
            }),
            cond: Condvar::new(),
            stats: Mutex::new(QueueStats::new(Instant::now())),
            state,
            fatal: Mutex::new(None),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("engine-worker".to_string())
            .spawn(move || Worker::new(worker_shared).run(loader))?;

        Ok(Arc::new(Self {
            shared,
            worker: Mutex::new(Some(worker)),
        }))
    }

    pub fn set_fatal_error_callback(&self, callback: FatalErrorCallback) {
        *lock(&self.shared.fatal) = Some(callback);
    }

    /// Supplies the settings and lets the worker start loading engines.
    pub fn initialize(&self, settings: EngineSettings) -> Result<(), QueueError> {
        let mut queue = lock(&self.shared.queue);
        if queue.shutdown {
            return Err(QueueError::ShutDown);
        }
        if queue.settings.is_some() {
            return Err(QueueError::AlreadyInitialized);
        }
        tracing::info!(language = %settings.language, "work queue initialized");
        queue.settings = Some(settings);
        self.shared.cond.notify_all();
        Ok(())
    }

    /// Queues a task. After shutdown the task is dropped and `false`
    /// returned; its reply channel then closes without a reply.
    pub fn add_task(&self, task: Box<dyn Task>) -> bool {
        let mut queue = lock(&self.shared.queue);
        if queue.shutdown {
            tracing::warn!(task = %task.describe(), "work queue is shut down; dropping task");
            return false;
        }
        tracing::debug!(task = %task.describe(), queued = queue.tasks.len() + 1, "task added");
        queue.tasks.push_back(task);
        self.shared.cond.notify_one();
        true
    }

    /// Stops the worker after its current task. Queued tasks are dropped.
    ///
    /// With `wait`, blocks until the worker thread has exited.
    pub fn shutdown(&self, wait: bool) {
        {
            let mut queue = lock(&self.shared.queue);
            if !queue.shutdown {
                tracing::info!(dropped = queue.tasks.len(), "work queue shutting down");
            }
            queue.shutdown = true;
            queue.tasks.clear();
            self.shared.cond.notify_all();
        }

        if !wait {
            return;
        }
        let Some(worker) = lock(&self.worker).take() else {
            return;
        };
        if worker.thread().id() == thread::current().id() {
            return;
        }
        if worker.join().is_err() {
            tracing::error!("engine worker thread panicked");
        }
    }

    /// Queued tasks plus the one executing, if any.
    pub fn num_tasks_remaining(&self) -> usize {
        let queue = lock(&self.shared.queue);
        queue.tasks.len() + usize::from(queue.executing)
    }

    pub fn tasks_processed(&self) -> u64 {
        lock(&self.shared.stats).tasks_processed
    }

    pub fn tasks_failed(&self) -> u64 {
        lock(&self.shared.stats).tasks_failed
    }

    /// Tasks per hour; see [`QueueStats::throughput_at`].
    pub fn throughput(&self, include_load: bool) -> Option<f64> {
        lock(&self.shared.stats).throughput_at(include_load, Instant::now())
    }

    pub fn status(&self) -> String {
        lock(&self.shared.stats).status.clone()
    }

    pub fn memory_history(&self) -> Vec<MemorySnapshot> {
        lock(&self.shared.stats).history().copied().collect()
    }

    pub fn memory_baseline(&self) -> Option<MemorySnapshot> {
        lock(&self.shared.stats).baseline()
    }

    pub fn memory_table_html(&self) -> String {
        lock(&self.shared.stats).memory_table_html()
    }

    pub fn state(&self) -> QueueState {
        self.shared.state.borrow().clone()
    }

    /// Watches startup and shutdown transitions.
    pub fn subscribe(&self) -> watch::Receiver<QueueState> {
        self.shared.state.subscribe()
    }

    pub fn is_shut_down(&self) -> bool {
        lock(&self.shared.queue).shutdown
    }
}

impl Drop for WorkQueue {
    fn drop(&mut self) {
        self.shutdown(false);
    }
}

struct Worker {
    shared: Arc<Shared>,
}

impl Worker {
    fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    fn set_status(&self, status: impl Into<String>) {
        lock(&self.shared.stats).status = status.into();
    }

    fn run(self, mut loader: Box<dyn EngineLoader>) {
        let Some(settings) = self.wait_for_settings() else {
            self.finish();
            return;
        };

        self.set_status("Loading engine");
        let load_started = Instant::now();
        let mut engine = match loader.load_engine(&settings) {
            Ok(engine) => engine,
            Err(e) => return self.fail(&format!("Unable to load engine: {}", e)),
        };

        let patterns = match &settings.pattern_sets {
            Some(path) => {
                self.set_status("Loading pattern sets");
                match loader.load_pattern_sets(path) {
                    Ok(patterns) => Some(patterns),
                    Err(e) => return self.fail(&format!("Unable to load pattern sets: {}", e)),
                }
            }
            None => None,
        };

        {
            let mut stats = lock(&self.shared.stats);
            stats.mark_loaded(Instant::now(), MemorySnapshot::take(0));
            stats.status = "Waiting for a task".to_string();
        }
        tracing::info!(
            load_ms = load_started.elapsed().as_millis() as u64,
            pattern_sets = patterns.is_some(),
            "engines loaded"
        );
        self.shared.state.send_replace(QueueState::Ready);

        while let Some(task) = self.next_task() {
            self.execute(task, engine.as_mut(), patterns.as_deref());
        }

        self.finish();
    }

    fn wait_for_settings(&self) -> Option<EngineSettings> {
        let mut queue = lock(&self.shared.queue);
        loop {
            if queue.shutdown {
                return None;
            }
            if let Some(settings) = &queue.settings {
                return Some(settings.clone());
            }
            queue = self
                .shared
                .cond
                .wait(queue)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Blocks until a task arrives or shutdown is requested.
    fn next_task(&self) -> Option<Box<dyn Task>> {
        let mut queue = lock(&self.shared.queue);
        loop {
            if queue.shutdown {
                return None;
            }
            if let Some(task) = queue.tasks.pop_front() {
                queue.executing = true;
                return Some(task);
            }
            queue = self
                .shared
                .cond
                .wait(queue)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn execute(
        &self,
        mut task: Box<dyn Task>,
        engine: &mut dyn DocumentEngine,
        patterns: Option<&dyn PatternEngine>,
    ) {
        let description = task.describe();
        self.set_status(format!("Performing a task: {}", description));
        let started = Instant::now();

        let handle = match task.kind() {
            EngineKind::Document => EngineHandle::Document(engine),
            EngineKind::PatternSets => EngineHandle::PatternSets(patterns),
        };
        let success = match panic::catch_unwind(AssertUnwindSafe(|| task.run(handle))) {
            Ok(success) => success,
            Err(_) => {
                tracing::error!(task = %description, "task panicked");
                task.responder()
                    .report_error(500, "Internal error while processing the request");
                false
            }
        };
        if !success && !task.responder().has_replied() {
            task.responder().report_error(500, "Task failed");
        }

        {
            let mut stats = lock(&self.shared.stats);
            stats.record(success);
            if let Some(snapshot) = MemorySnapshot::take(stats.tasks_completed()) {
                stats.push_snapshot(snapshot);
            }
            stats.status = "Waiting for a task".to_string();
        }
        lock(&self.shared.queue).executing = false;

        tracing::info!(
            task = %description,
            success,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "task finished"
        );
    }

    fn fail(&self, message: &str) {
        tracing::error!(error = %message, "work queue failed to start");
        self.set_status(format!("Failed: {}", message));
        self.shared
            .state
            .send_replace(QueueState::Failed(message.to_string()));
        if let Some(callback) = lock(&self.shared.fatal).as_ref() {
            callback(message);
        }
    }

    fn finish(&self) {
        self.set_status("Shut down");
        self.shared.state.send_replace(QueueState::ShutDown);
        tracing::debug!("engine worker exiting");
    }
}
