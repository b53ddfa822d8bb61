//! Worker pool and scheduling façade.

use std::{
    any::Any,
    env,
    fmt,
    num::NonZeroUsize,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc, LazyLock,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
    thread::{self, JoinHandle, ThreadId},
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use anyhow::anyhow;
use millrace_log::{Level, ScopedTimer};
use millrace_progress::Progress;
use millrace_util::{containers::HashMap, on_scope_exit};
use parking_lot::{Condvar, Mutex};

use crate::{
    error::{ScheduledTaskError, SchedulerError},
    queue::{QueueState, TaskStat},
    task::ScheduledTask,
};

/// How long a worker sleeps on the queue condition variable before
/// rechecking for work or shutdown.
pub const DEFAULT_WAIT_INTERVAL: Duration = Duration::from_millis(10);

/// How often `process` and `process_once` emit a queue status report.
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_millis(5000);

/// Stack size of spawned worker threads.
const WORKER_STACK_SIZE: usize = 16 << 20;

/// How long `wait_all` drains quietly before warning that it is slow.
const WAIT_ALL_WARN_INTERVAL: Duration = Duration::from_secs(10);

/// Environment variable overriding the constructed worker count when set
/// to a positive integer.
const WORKERS_ENV_VAR: &str = "DT_WORKERS";

/// Callback receiving the failure records of one task group.
pub type ErrorObserver = Box<dyn Fn(&ScheduledTaskError) + Send>;

/// Shared countdown of outstanding tasks handed to `wait_all` submitters.
pub type TodoCount = Arc<AtomicUsize>;

static GLOBAL: LazyLock<Scheduler> =
    LazyLock::new(|| Scheduler::new(Scheduler::default_worker_count()));

/// Priority-based task scheduler with a fixed worker pool.
///
/// With two or more workers, tasks run on dedicated OS threads that drain
/// the queue continuously. With a single worker no thread is spawned: the
/// thread that constructed the scheduler executes tasks itself inside
/// [`process`](Self::process).
pub struct Scheduler {
    core: Arc<SchedulerCore>,
    workers: Vec<JoinHandle<()>>,
    worker_ids: HashMap<ThreadId, usize>,
}

struct SchedulerCore {
    queue: Mutex<QueueState>,
    task_available: Condvar,
    task_finished: Condvar,
    observers: Mutex<HashMap<String, ErrorObserver>>,
    num_workers: usize,
    num_active: AtomicUsize,
    shutting_down: AtomicBool,
    success: AtomicBool,
    process_running: AtomicBool,
    wait_all_running: AtomicBool,
    next_report_time: AtomicU64,
}

impl Scheduler {
    /// The process-wide scheduler, created with
    /// [`default_worker_count`](Self::default_worker_count) on first use.
    pub fn global() -> &'static Scheduler {
        &GLOBAL
    }

    pub fn default_worker_count() -> NonZeroUsize {
        thread::available_parallelism().unwrap_or(NonZeroUsize::MIN)
    }

    /// Creates a scheduler with the given number of workers. The
    /// `DT_WORKERS` environment variable overrides the argument when set
    /// to a positive integer.
    pub fn new(num_workers: NonZeroUsize) -> Self {
        let num_workers = resolve_worker_count(num_workers).get();
        millrace_log::info!("scheduler started, worker count: {num_workers}");

        let core = Arc::new(SchedulerCore {
            queue: Mutex::new(QueueState::new(num_workers)),
            task_available: Condvar::new(),
            task_finished: Condvar::new(),
            observers: Mutex::new(HashMap::default()),
            num_workers,
            num_active: AtomicUsize::new(0),
            shutting_down: AtomicBool::new(false),
            success: AtomicBool::new(true),
            process_running: AtomicBool::new(false),
            wait_all_running: AtomicBool::new(false),
            next_report_time: AtomicU64::new(
                now_millis() + DEFAULT_REPORT_INTERVAL.as_millis() as u64,
            ),
        });

        let mut workers = Vec::new();
        let mut worker_ids = HashMap::default();
        if num_workers == 1 {
            // The constructing thread doubles as worker 0 and executes
            // tasks from within `process`.
            worker_ids.insert(thread::current().id(), 0);
        } else {
            for worker_idx in 0..num_workers {
                let core = Arc::clone(&core);
                let handle = thread::Builder::new()
                    .name(format!("worker-{worker_idx}"))
                    .stack_size(WORKER_STACK_SIZE)
                    .spawn(move || core.worker_loop(worker_idx))
                    .expect("failed to spawn scheduler worker thread");
                worker_ids.insert(handle.thread().id(), worker_idx);
                workers.push(handle);
            }
        }

        Self {
            core,
            workers,
            worker_ids,
        }
    }

    pub fn num_workers(&self) -> usize {
        self.core.num_workers
    }

    /// Submits a work item. Non-blocking; the item runs once a worker
    /// reaches it in priority order (larger priorities first).
    pub fn submit<F>(&self, group: impl Into<String>, priority: i64, work: F)
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        self.post(ScheduledTask::new(group, priority, work));
    }

    /// Like [`submit`](Self::submit), but attaches an opaque parameter for
    /// cancellation predicates to match on.
    pub fn submit_with_param<F, P>(&self, group: impl Into<String>, priority: i64, work: F, param: P)
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
        P: Any + Send + 'static,
    {
        self.post(ScheduledTask::with_param(group, priority, work, param));
    }

    /// Enqueues an already-built task and signals one worker.
    pub fn post(&self, task: ScheduledTask) {
        let mut queue = self.core.queue.lock();
        queue.push(task);
        drop(queue);
        self.core.task_available.notify_one();
    }

    /// Atomically removes every queued task matching the predicate and
    /// returns the number of removed tasks. Tasks that are already running
    /// are not interrupted.
    ///
    /// The predicate runs under the queue lock and must not call back into
    /// the scheduler.
    pub fn cancel<P>(&self, pred: P) -> usize
    where
        P: Fn(&str, Option<&(dyn Any + Send)>) -> bool,
    {
        // No notification needed since cancelling never adds work.
        self.core.queue.lock().rebuild_filter(&pred)
    }

    /// Registers the error observer of a task group. Must be called before
    /// any task of the group is submitted; fails with
    /// [`SchedulerError::PreconditionViolated`] otherwise. When an observer
    /// is already registered, `replace` decides between overwriting it and
    /// failing with [`SchedulerError::DuplicateObserver`].
    ///
    /// Observers live until the end of the current `process` cycle.
    pub fn on_error<F>(&self, group: &str, observer: F, replace: bool) -> Result<(), SchedulerError>
    where
        F: Fn(&ScheduledTaskError) + Send + 'static,
    {
        if self.task_count(group) != 0 {
            return Err(SchedulerError::PreconditionViolated {
                group: group.to_owned(),
            });
        }
        let mut observers = self.core.observers.lock();
        if observers.contains_key(group) && !replace {
            return Err(SchedulerError::DuplicateObserver {
                group: group.to_owned(),
            });
        }
        observers.insert(group.to_owned(), Box::new(observer));
        Ok(())
    }

    /// Number of tasks of the group that are queued or currently running.
    pub fn task_count(&self, group: &str) -> usize {
        self.core.queue.lock().group_queued(group)
    }

    /// Snapshot of the group's execution counters.
    pub fn group_stats(&self, group: &str) -> Option<TaskStat> {
        self.core.queue.lock().group_stats(group)
    }

    /// Blocks until all queued and running tasks have completed, then fails
    /// with [`SchedulerError::TaskFailure`] if any task failed during the
    /// cycle. All error observers are discarded on return.
    pub fn process(&self, report_status: bool) -> Result<(), SchedulerError> {
        if !self.process_ok(report_status)? {
            return Err(SchedulerError::TaskFailure);
        }
        Ok(())
    }

    /// Like [`process`](Self::process), but reports task failures as a
    /// `false` return value instead of an error. Still fails with
    /// [`SchedulerError::NestedProcess`] when a cycle is already running.
    pub fn process_ok(&self, report_status: bool) -> Result<bool, SchedulerError> {
        let _timer = ScopedTimer::new("scheduler process cycle", Level::Debug);
        if self
            .core
            .process_running
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return Err(SchedulerError::NestedProcess);
        }
        let core = Arc::clone(&self.core);
        let _finalize = on_scope_exit(move || {
            core.observers.lock().clear();
            core.process_running.store(false, Ordering::Release);
            core.success.store(true, Ordering::Release);
        });
        self.drain(report_status);
        Ok(self.core.success.load(Ordering::Acquire))
    }

    /// Executes at most one queued task when called from a worker thread;
    /// from any other thread it only contributes status reporting. Safe to
    /// call concurrently with `process`.
    pub fn process_once(&self, report_status: bool) {
        if let Some(&worker_idx) = self.worker_ids.get(&thread::current().id()) {
            self.core.try_execute(worker_idx, DEFAULT_WAIT_INTERVAL);
        } else if self.core.num_workers == 1 {
            millrace_log::warn!(
                "thread {:?} outside of the worker pool attempted to execute tasks",
                thread::current().id()
            );
        }
        if report_status {
            self.core.report_status();
        }
    }

    /// Submits a batch of tasks through the provided callback and drains
    /// until every one of them has finished, participating in execution
    /// when called from a worker thread.
    ///
    /// The callback receives the shared outstanding-task counter and a
    /// submitter; each task handed to the submitter is re-wrapped so that
    /// its completion decrements the counter. Failures are counted through
    /// a transient observer on `group` and surface as
    /// [`SchedulerError::TaskFailure`] once the batch has drained.
    pub fn wait_all<F>(&self, group: &str, submit_fn: F) -> Result<(), SchedulerError>
    where
        F: FnOnce(&TodoCount, &dyn Fn(ScheduledTask)),
    {
        if self
            .core
            .wait_all_running
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return Err(SchedulerError::NestedWaitAll);
        }
        let core = Arc::clone(&self.core);
        let _finalize = on_scope_exit(move || {
            core.wait_all_running.store(false, Ordering::Release);
        });

        if self.num_workers() < 4 {
            return Err(SchedulerError::InsufficientWorkers {
                available: self.num_workers(),
            });
        }

        let errors = Arc::new(AtomicUsize::new(0));
        {
            let errors = Arc::clone(&errors);
            self.on_error(
                group,
                move |_| {
                    errors.fetch_add(1, Ordering::Relaxed);
                },
                true,
            )?;
        }

        let todo: TodoCount = Arc::new(AtomicUsize::new(0));
        submit_fn(&todo, &|task: ScheduledTask| {
            let ScheduledTask {
                priority,
                group,
                work,
                param,
            } = task;
            todo.fetch_add(1, Ordering::Relaxed);
            let todo = Arc::clone(&todo);
            let mut wrapped = ScheduledTask::new(group, priority, move || {
                work()?;
                // A failed task keeps its todo slot; the error counter
                // accounts for it instead.
                todo.fetch_sub(1, Ordering::Relaxed);
                Ok(())
            });
            wrapped.param = param;
            self.post(wrapped);
        });

        let wait_start = Instant::now();
        let mut next_warn = wait_start + WAIT_ALL_WARN_INTERVAL;
        let is_worker = self.worker_ids.contains_key(&thread::current().id());
        loop {
            let num_todo =
                todo.load(Ordering::Relaxed) - errors.load(Ordering::Relaxed);
            if num_todo == 0 {
                break;
            }
            let now = Instant::now();
            if now >= next_warn {
                next_warn = now + WAIT_ALL_WARN_INTERVAL;
                millrace_log::warn!(
                    "wait_all on group {group} is taking longer than expected, \
                     todo: {num_todo} errors: {} waiting for: {} secs",
                    errors.load(Ordering::Relaxed),
                    wait_start.elapsed().as_secs()
                );
            }
            if is_worker {
                self.process_once(true);
            } else {
                let mut queue = self.core.queue.lock();
                self.core
                    .task_finished
                    .wait_for(&mut queue, DEFAULT_WAIT_INTERVAL);
                drop(queue);
                self.core.report_status();
            }
        }

        if errors.load(Ordering::Relaxed) > 0 {
            return Err(SchedulerError::TaskFailure);
        }
        Ok(())
    }

    fn drain(&self, report_status: bool) {
        let single_worker = self.core.num_workers == 1;
        loop {
            let mut queue = self.core.queue.lock();
            if queue.total_queued() == 0 && self.core.num_active.load(Ordering::Acquire) == 0 {
                break;
            }
            if single_worker {
                drop(queue);
                self.process_once(report_status);
            } else {
                self.core
                    .task_finished
                    .wait_for(&mut queue, DEFAULT_WAIT_INTERVAL);
                drop(queue);
                if report_status {
                    self.core.report_status();
                }
            }
        }
        if report_status {
            Progress::global().inform();
        }
    }

    fn log_cpu_time_summary(&self) {
        let queue = self.core.queue.lock();
        let mut grouped: HashMap<&str, TaskStat> = HashMap::default();
        let mut total_cpu_time = 0.0;
        for (name, stat) in queue.stats() {
            let prefix = name.split(':').next().unwrap_or(name);
            let entry = grouped.entry(prefix).or_default();
            entry.submitted += stat.submitted;
            entry.completed += stat.completed;
            entry.cpu_time += stat.cpu_time;
            total_cpu_time += stat.cpu_time;
        }
        let mut sorted: Vec<_> = grouped.into_iter().collect();
        sorted.sort_by(|a, b| b.1.cpu_time.total_cmp(&a.1.cpu_time));

        millrace_log::debug!("cumulative cpu utilization by task group:");
        for (name, stat) in sorted {
            let share = if total_cpu_time > 0.0 {
                100.0 * stat.cpu_time / total_cpu_time
            } else {
                0.0
            };
            millrace_log::debug!(
                "task: {name} submitted: {} completed: {} cpu_time: {:.3} sec ({share:.1}%)",
                stat.submitted,
                stat.completed,
                stat.cpu_time
            );
        }
        millrace_log::debug!("total cpu time spent by all tasks: {total_cpu_time:.3} sec");
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.core.shutting_down.store(true, Ordering::Release);
        self.core.task_available.notify_all();
        self.core.task_finished.notify_all();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                millrace_log::error!("scheduler worker thread failed to join");
            }
        }
        self.log_cpu_time_summary();
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("num_workers", &self.core.num_workers)
            .field("num_active", &self.core.num_active.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl SchedulerCore {
    fn worker_loop(&self, worker_idx: usize) {
        millrace_log::trace!("worker-{worker_idx} spawned");
        while self.try_execute(worker_idx, DEFAULT_WAIT_INTERVAL) {}
        millrace_log::trace!("worker-{worker_idx} terminating");
    }

    /// Executes at most one pending task, waiting for work no longer than
    /// `wait_interval`. Returns false when the scheduler is shutting down.
    fn try_execute(&self, worker_idx: usize, wait_interval: Duration) -> bool {
        let sleep_start = Instant::now();
        let mut queue = self.queue.lock();
        if queue.is_empty() && !self.shutting_down.load(Ordering::Acquire) {
            self.task_available.wait_for(&mut queue, wait_interval);
        }
        queue.record_wait(sleep_start.elapsed().as_secs_f64());

        if self.shutting_down.load(Ordering::Acquire) {
            return false;
        }
        let Some(task) = queue.pop_top() else {
            return true;
        };
        let ScheduledTask {
            priority,
            group,
            work,
            param,
        } = task;

        let prev_slot = queue.worker_slots[worker_idx].take();
        let nested = prev_slot.is_some();
        queue.worker_slots[worker_idx] = Some(match &prev_slot {
            Some(parent) => format!("{parent}/{group}"),
            None => group.clone(),
        });
        if !nested {
            self.num_active.fetch_add(1, Ordering::AcqRel);
        }
        drop(queue);

        // The closure is consumed here; only the task's metadata survives
        // into the error record handed to the observer.
        let start = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(work));
        let cpu_time = start.elapsed().as_secs_f64();

        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(error)) => Some(error),
            Err(cause) => Some(anyhow!("task panicked: {}", panic_message(&cause))),
        };

        let mut queue = self.queue.lock();
        if !queue.record_completion(&group, cpu_time) {
            millrace_log::error!("internal error: unknown task group: {group}");
        }
        drop(queue);

        if let Some(error) = failure {
            self.success.store(false, Ordering::Release);
            millrace_log::warn!("worker-{worker_idx} task {group} failed: {error:#}");
            let task_error = ScheduledTaskError::new(group.clone(), priority, param, error);
            let observers = self.observers.lock();
            if let Some(observer) = observers.get(&group) {
                if panic::catch_unwind(AssertUnwindSafe(|| observer(&task_error))).is_err() {
                    millrace_log::error!("error observer for group {group} panicked");
                }
            }
        }

        let mut queue = self.queue.lock();
        queue.worker_slots[worker_idx] = prev_slot;
        drop(queue);
        if !nested {
            self.num_active.fetch_sub(1, Ordering::AcqRel);
        }
        self.task_finished.notify_all();
        true
    }

    /// Emits the queue status at most once per [`DEFAULT_REPORT_INTERVAL`];
    /// concurrent callers race on a compare-exchange of the deadline and
    /// only the winner logs.
    fn report_status(&self) {
        let now = now_millis();
        let prev = self.next_report_time.load(Ordering::Relaxed);
        if now < prev {
            return;
        }
        let next = now + DEFAULT_REPORT_INTERVAL.as_millis() as u64;
        if self
            .next_report_time
            .compare_exchange(prev, next, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            let (total_queued, active) = {
                let queue = self.queue.lock();
                (queue.total_queued(), queue.active_by_group())
            };
            millrace_log::debug!("scheduler tasks total: {total_queued} active: {active:?}");
            Progress::global().inform();
        }
    }
}

fn resolve_worker_count(user_num_workers: NonZeroUsize) -> NonZeroUsize {
    env::var(WORKERS_ENV_VAR)
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .and_then(NonZeroUsize::new)
        .unwrap_or(user_num_workers)
}

fn panic_message(cause: &(dyn Any + Send)) -> &str {
    if let Some(message) = cause.downcast_ref::<&str>() {
        message
    } else if let Some(message) = cause.downcast_ref::<String>() {
        message
    } else {
        "unknown panic payload"
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
