//! Durable single-worker task queue.
//!
//! Producers call [`TaskSubmitter::add_task`] from any thread; one worker
//! thread consumes the queue in FIFO order. Every status transition is
//! written to `{root}/_tasks/{id}.json` before it takes effect in memory,
//! and a new engine re-enqueues any task it finds still Pending or
//! InProgress.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use tokio_util::sync::CancellationToken;

use crate::core::{Task, TaskId};
use crate::store::Store;
use crate::util;
use crate::{flog, flog_debug, flog_error, flog_warn, Error, Result};

/// Executes the payload of one task type.
pub trait TaskHandler: Send + Sync {
    fn execute(&self, params: &serde_json::Value) -> Result<()>;
}

impl<F> TaskHandler for F
where
    F: Fn(&serde_json::Value) -> Result<()> + Send + Sync,
{
    fn execute(&self, params: &serde_json::Value) -> Result<()> {
        self(params)
    }
}

/// State shared by the engine, its submitters and the worker thread.
struct Shared {
    store: Store,
    tasks: RwLock<HashMap<TaskId, Task>>,
    handlers: RwLock<HashMap<String, Arc<dyn TaskHandler>>>,
}

impl Shared {
    fn persist(&self, task: &Task) -> Result<()> {
        self.store.write(&self.store.task_path(&task.id.to_string()), task)
    }
}

/// Cheap, cloneable handle for enqueuing work.
#[derive(Clone)]
pub struct TaskSubmitter {
    shared: Arc<Shared>,
    tx: Sender<TaskId>,
}

impl TaskSubmitter {
    /// Persist a Pending task and enqueue it. Safe to call before the
    /// engine starts; the task waits in the queue.
    pub fn add_task(&self, task_type: &str, params: serde_json::Value) -> Result<TaskId> {
        let task = Task::new(task_type, params);
        let id = task.id;
        self.shared
            .store
            .write(&self.shared.store.task_path(&id.to_string()), &task)?;
        util::write(&self.shared.tasks).insert(id, task);
        self.tx
            .send(id)
            .map_err(|_| Error::Engine("task queue is closed".to_string()))?;
        flog_debug!("TaskEngine: queued {} type={}", id.short(), task_type);
        Ok(id)
    }

    pub fn task(&self, id: &TaskId) -> Option<Task> {
        util::read(&self.shared.tasks).get(id).cloned()
    }
}

impl std::fmt::Debug for TaskSubmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskSubmitter")
            .field("queued", &self.tx.len())
            .finish()
    }
}

pub struct TaskEngine {
    submitter: TaskSubmitter,
    rx: Receiver<TaskId>,
    poll_interval: Duration,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TaskEngine {
    /// Build an engine over `store` and recover unfinished tasks from disk.
    ///
    /// Recovered tasks are queued in creation order ahead of anything
    /// submitted later. The worker does not run until [`start`](Self::start).
    pub fn new(store: Store, poll_interval: Duration) -> Result<Self> {
        let (tx, rx) = unbounded();
        let mut recovered: Vec<Task> = store.read_files(&store.tasks_dir())?;
        recovered.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        let shared = Arc::new(Shared {
            store,
            tasks: RwLock::new(HashMap::new()),
            handlers: RwLock::new(HashMap::new()),
        });

        let mut requeued = 0;
        {
            let mut tasks = util::write(&shared.tasks);
            for mut task in recovered {
                if !task.is_finished() {
                    flog_warn!(
                        "TaskEngine: recovering {} type={} (was {})",
                        task.id.short(),
                        task.task_type,
                        task.status
                    );
                    task.requeue();
                    shared.persist(&task)?;
                    let _ = tx.send(task.id);
                    requeued += 1;
                }
                tasks.insert(task.id, task);
            }
            flog!(
                "TaskEngine: loaded {} tasks, {} requeued",
                tasks.len(),
                requeued
            );
        }

        Ok(Self {
            submitter: TaskSubmitter { shared, tx },
            rx,
            poll_interval: poll_interval.max(Duration::from_millis(1)),
            cancel: CancellationToken::new(),
            worker: Mutex::new(None),
        })
    }

    pub fn submitter(&self) -> TaskSubmitter {
        self.submitter.clone()
    }

    /// Install a closure as the handler for `task_type`.
    pub fn register<F>(&self, task_type: &str, handler: F)
    where
        F: Fn(&serde_json::Value) -> Result<()> + Send + Sync + 'static,
    {
        self.register_handler(task_type, Arc::new(handler));
    }

    /// Install the handler for `task_type`, replacing any previous one.
    pub fn register_handler(&self, task_type: &str, handler: Arc<dyn TaskHandler>) {
        util::write(&self.submitter.shared.handlers).insert(task_type.to_string(), handler);
        flog_debug!("TaskEngine: registered handler for '{}'", task_type);
    }

    /// Spawn the worker thread.
    ///
    /// # Errors
    /// `Engine` if the engine is already running or was stopped.
    pub fn start(&self) -> Result<()> {
        let mut worker = util::lock(&self.worker);
        if worker.is_some() {
            return Err(Error::Engine("task engine already started".to_string()));
        }
        if self.cancel.is_cancelled() {
            return Err(Error::Engine("task engine was stopped".to_string()));
        }

        let shared = Arc::clone(&self.submitter.shared);
        let rx = self.rx.clone();
        let cancel = self.cancel.clone();
        let poll = self.poll_interval;
        let handle = thread::Builder::new()
            .name("callflow-task-worker".to_string())
            .spawn(move || run_worker(&shared, &rx, &cancel, poll))?;
        *worker = Some(handle);
        flog!("TaskEngine: worker started");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        util::lock(&self.worker)
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    pub fn add_task(&self, task_type: &str, params: serde_json::Value) -> Result<TaskId> {
        self.submitter.add_task(task_type, params)
    }

    pub fn task(&self, id: &TaskId) -> Option<Task> {
        self.submitter.task(id)
    }

    /// All known tasks, oldest first.
    pub fn tasks(&self) -> Vec<Task> {
        let mut all: Vec<Task> = util::read(&self.submitter.shared.tasks)
            .values()
            .cloned()
            .collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        all
    }

    pub fn unfinished_count(&self) -> usize {
        util::read(&self.submitter.shared.tasks)
            .values()
            .filter(|t| !t.is_finished())
            .count()
    }

    /// Poll until the task is Completed or Failed.
    ///
    /// # Errors
    /// `NotFound` for an unknown id; `Timeout` if `timeout` elapses first.
    pub fn wait_for_task(&self, id: &TaskId, timeout: Option<Duration>) -> Result<Task> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let task = self.task(id).ok_or_else(|| Error::not_found("task", id))?;
            if task.is_finished() {
                return Ok(task);
            }
            if let (Some(deadline), Some(timeout)) = (deadline, timeout) {
                if Instant::now() >= deadline {
                    return Err(Error::Timeout(timeout));
                }
            }
            thread::sleep(self.poll_interval);
        }
    }

    /// Block until no task is Pending or InProgress. Returns false if
    /// `timeout` elapses first.
    pub fn wait_for_all(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if self.unfinished_count() == 0 {
                return true;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return false;
            }
            thread::sleep(self.poll_interval);
        }
    }

    pub fn drain(&self, timeout: Option<Duration>) -> bool {
        self.wait_for_all(timeout)
    }

    pub async fn wait_for_task_async(&self, id: &TaskId, timeout: Option<Duration>) -> Result<Task> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let task = self.task(id).ok_or_else(|| Error::not_found("task", id))?;
            if task.is_finished() {
                return Ok(task);
            }
            if let (Some(deadline), Some(timeout)) = (deadline, timeout) {
                if Instant::now() >= deadline {
                    return Err(Error::Timeout(timeout));
                }
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    pub async fn wait_for_all_async(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if self.unfinished_count() == 0 {
                return true;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return false;
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Signal shutdown and join the worker once the queue is empty.
    pub fn stop(&self) -> Result<()> {
        self.cancel.cancel();
        let handle = util::lock(&self.worker).take();
        if let Some(handle) = handle {
            handle
                .join()
                .map_err(|p| Error::TaskJoin(util::panic_message(p.as_ref())))?;
            flog!("TaskEngine: worker stopped");
        }
        Ok(())
    }
}

impl Drop for TaskEngine {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            flog_error!("TaskEngine: worker exited abnormally: {}", e);
        }
    }
}

impl std::fmt::Debug for TaskEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskEngine")
            .field("poll_interval", &self.poll_interval)
            .field("running", &self.is_running())
            .field("unfinished", &self.unfinished_count())
            .finish()
    }
}

/// Worker loop. Exits once shutdown was requested and the queue is empty.
fn run_worker(shared: &Shared, rx: &Receiver<TaskId>, cancel: &CancellationToken, poll: Duration) {
    loop {
        match rx.recv_timeout(poll) {
            Ok(id) => execute(shared, id),
            Err(RecvTimeoutError::Timeout) => {
                if cancel.is_cancelled() && rx.is_empty() {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

fn execute(shared: &Shared, id: TaskId) {
    let (task_type, params) = {
        let mut tasks = util::write(&shared.tasks);
        let Some(task) = tasks.get_mut(&id) else {
            flog_warn!("TaskEngine: dequeued unknown task {}", id.short());
            return;
        };
        if task.is_finished() {
            flog_debug!("TaskEngine: {} already {}, skipping", id.short(), task.status);
            return;
        }
        let mut started = task.clone();
        started.start();
        if let Err(e) = shared.persist(&started) {
            flog_error!(
                "TaskEngine: {} left pending, could not persist start: {}",
                id.short(),
                e
            );
            return;
        }
        *task = started;
        (task.task_type.clone(), task.params.clone())
    };
    flog!("TaskEngine: running {} type={}", id.short(), task_type);

    let handler = util::read(&shared.handlers).get(&task_type).cloned();
    let outcome = match handler {
        None => Err(format!("no handler registered for task type '{}'", task_type)),
        Some(handler) => match panic::catch_unwind(AssertUnwindSafe(|| handler.execute(&params))) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(payload) => Err(format!(
                "handler panicked: {}",
                util::panic_message(payload.as_ref())
            )),
        },
    };

    let mut tasks = util::write(&shared.tasks);
    let Some(task) = tasks.get_mut(&id) else {
        return;
    };
    let mut finished = task.clone();
    match &outcome {
        Ok(()) => finished.complete(),
        Err(error) => finished.fail(error),
    }
    // Stays InProgress in memory until the outcome is on disk.
    if let Err(e) = shared.persist(&finished) {
        flog_error!(
            "TaskEngine: {} left in progress, could not persist outcome: {}",
            id.short(),
            e
        );
        return;
    }
    *task = finished;
    match outcome {
        Ok(()) => flog!("TaskEngine: {} completed", id.short()),
        Err(error) => flog_error!("TaskEngine: {} failed: {}", id.short(), error),
    }
}
