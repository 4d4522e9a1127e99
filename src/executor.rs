// The MIT License (MIT)

// Copyright (c) 2026 cosched developers

// Permission is hereby granted, free of charge, to any person obtaining a copy of
// this software and associated documentation files (the "Software"), to deal in
// the Software without restriction, including without limitation the rights to
// use, copy, modify, merge, publish, distribute, sublicense, and/or sell copies of
// the Software, and to permit persons to whom the Software is furnished to do so,
// subject to the following conditions:

// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.

// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY, FITNESS
// FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR
// COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER
// IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN
// CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE SOFTWARE.

//! The per-worker executor.
//!
//! One executor is driven by one OS thread. It owns four queues:
//!
//! - *runnable*: tasks admitted from outside, ready to run;
//! - *waiting*: tasks parked by [`Executor::hold`];
//! - *awoken*: parked tasks that have been signalled, waiting to be picked;
//! - *finished*: completed tasks pending garbage collection.
//!
//! The worker loop picks the next task, alternating between *runnable* and
//! *awoken* when both have work, switches into it and classifies it on the
//! way out. Within one executor scheduling is single-threaded and
//! cooperative; tasks observe a total order equal to the resume order.

use std::cell::RefCell;
use std::panic;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::coroutine::Status;
use crate::deque::SyncDeque;
use crate::task::{RecoveryEntry, Task, TaskPtr};

/// Run a garbage collection pass once this many tasks have finished.
pub const TRIGGER_GC_TASK_SIZE: usize = 64;

/// An idle worker also collects garbage when the last pass is older than
/// this and the finished queue is non-empty.
pub const GC_INTERVAL: Duration = Duration::from_millis(2000);

/// A single resume running longer than this marks the executor as blocking.
pub const BLOCKING_THRESHOLD: Duration = Duration::from_millis(100);

thread_local! {
    // The executor driving this thread, installed by `process`.
    static CURRENT_EXECUTOR: RefCell<Option<Weak<Executor>>> = const { RefCell::new(None) };
}

/// A single-threaded cooperative scheduler hosting one worker thread and
/// the four task queues.
pub struct Executor {
    id: i32,
    // the scheduler's rebalance pass reads this queue directly
    pub(crate) runnable: SyncDeque<TaskPtr>,
    waiting: SyncDeque<TaskPtr>,
    awoken: SyncDeque<TaskPtr>,
    finished: SyncDeque<TaskPtr>,
    running: Mutex<Option<TaskPtr>>,
    cv: Condvar,
    cv_lock: Mutex<()>,
    // True while the worker is parked on the condition variable; admission
    // and wakeups only notify when it is.
    parked: AtomicBool,
    stopping: AtomicBool,
    // Resumes entered / resumes returned. They differ exactly while a
    // coroutine is switched in.
    switch_cnt: AtomicU64,
    switched_cnt: AtomicU64,
    // Timestamp (us) taken right before the latest resume.
    tick_us: AtomicU64,
    last_gc_ms: AtomicU64,
    started_ms: u64,
}

impl Executor {
    /// Create an executor. Ids start at 1; id 0 is reserved as the
    /// "no executor" sentinel carried by a default [`RecoveryEntry`].
    pub fn new(id: i32) -> Arc<Executor> {
        assert!(id != 0, "executor id 0 is reserved");
        Arc::new(Executor {
            id,
            runnable: SyncDeque::new(),
            waiting: SyncDeque::new(),
            awoken: SyncDeque::new(),
            finished: SyncDeque::new(),
            running: Mutex::new(None),
            cv: Condvar::new(),
            cv_lock: Mutex::new(()),
            parked: AtomicBool::new(true),
            stopping: AtomicBool::new(false),
            switch_cnt: AtomicU64::new(0),
            switched_cnt: AtomicU64::new(0),
            tick_us: AtomicU64::new(0),
            last_gc_ms: AtomicU64::new(now_ms()),
            started_ms: now_ms(),
        })
    }

    #[inline]
    pub fn id(&self) -> i32 {
        self.id
    }

    #[inline]
    pub fn runnable_count(&self) -> usize {
        self.runnable.len()
    }

    #[inline]
    pub fn waiting_count(&self) -> usize {
        self.waiting.len()
    }

    #[inline]
    pub fn awoken_count(&self) -> usize {
        self.awoken.len()
    }

    #[inline]
    pub fn finished_count(&self) -> usize {
        self.finished.len()
    }

    /// Admission load plus parked tasks.
    #[inline]
    pub fn valid_tasks_count(&self) -> usize {
        self.runnable.len() + self.waiting.len()
    }

    #[inline]
    pub fn switch_count(&self) -> u64 {
        self.switch_cnt.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn switched_count(&self) -> u64 {
        self.switched_cnt.load(Ordering::SeqCst)
    }

    /// Completed resumes per elapsed millisecond.
    pub fn efficiency(&self) -> f64 {
        let elapsed = now_ms().saturating_sub(self.started_ms).max(1);
        self.switched_cnt.load(Ordering::SeqCst) as f64 / elapsed as f64
    }

    #[inline]
    pub fn is_stopped(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    /// Request the worker to stop; it exits once the current task returns
    /// control.
    pub fn stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        self.cv.notify_all();
    }

    /// True when the latest resume has been running for longer than
    /// [`BLOCKING_THRESHOLD`] without returning. The dispatcher uses this
    /// to spot a worker stuck inside one coroutine.
    pub fn is_blocking(&self) -> bool {
        let since = now_us().saturating_sub(self.tick_us.load(Ordering::SeqCst));
        since > BLOCKING_THRESHOLD.as_micros() as u64
            && self.switch_cnt.load(Ordering::SeqCst) != self.switched_cnt.load(Ordering::SeqCst)
    }

    /// Push a task onto the runnable queue, waking the worker if it is
    /// parked.
    pub fn add_task(self: &Arc<Self>, task: TaskPtr) {
        task.bind(self);
        self.runnable.push_back(task);
        if self.parked.load(Ordering::SeqCst) {
            self.cv.notify_all();
        }
        debug!("task added for executor-{}", self.id);
    }

    /// Admit a callable as a new task.
    pub fn add_task_fn<F>(self: &Arc<Self>, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.add_task(Task::from_fn(f));
    }

    /// Admit a batch of tasks, taking the runnable-queue lock once.
    pub fn add_tasks<I>(self: &Arc<Self>, tasks: I)
    where
        I: IntoIterator<Item = TaskPtr>,
    {
        let mut count = 0usize;
        {
            let mut queue = self.runnable.lock();
            for task in tasks {
                task.bind(self);
                queue.push_back(task);
                count += 1;
            }
        }
        if self.parked.load(Ordering::SeqCst) {
            self.cv.notify_all();
        }
        debug!("{} task(s) added for executor-{}", count, self.id);
    }

    /// Atomically move up to `n` tasks from the back of the runnable queue
    /// into `out` (all of them when `n` is 0), preserving their order.
    ///
    /// Takes from the back: freshly admitted tasks get relocated,
    /// long-queued head-of-line work keeps its position.
    pub fn give_up_tasks(&self, out: &SyncDeque<TaskPtr>, n: usize) {
        let mut queue = self.runnable.lock();
        let n = if n == 0 { queue.len() } else { n.min(queue.len()) };
        debug!("executor-{} gives up {} task(s)", self.id, n);
        let split = queue.len() - n;
        out.lock().extend(queue.split_off(split));
    }

    /// The worker loop. Runs on the calling thread until the executor
    /// stops.
    ///
    /// `idle_timeout` of `None` waits for work indefinitely; with
    /// `Some(t)`, a worker whose queues stay empty for `t` sets its own
    /// stopping flag and exits.
    pub fn process(self: &Arc<Self>, idle_timeout: Option<Duration>) {
        info!(
            "executor-{} processing on thread '{}'",
            self.id,
            thread::current().name().unwrap_or("<unnamed>")
        );
        CURRENT_EXECUTOR.with(|e| *e.borrow_mut() = Some(Arc::downgrade(self)));
        let mut last_from_awoken = false;
        while !self.is_stopped() {
            let has_runnable = !self.runnable.is_empty();
            let has_awoken = !self.awoken.is_empty();
            let from_awoken = if has_runnable && has_awoken {
                // both queues have work: strictly alternate the source
                !last_from_awoken
            } else if has_awoken {
                true
            } else if has_runnable {
                false
            } else {
                let stale_gc = match idle_timeout {
                    None => self.wait_for_condition(),
                    Some(timeout) => self.wait_for_condition_for(timeout),
                };
                if stale_gc && !self.finished.is_empty() {
                    self.clean();
                }
                continue;
            };
            last_from_awoken = from_awoken;
            let task = if from_awoken {
                self.awoken.pop_front()
            } else {
                self.runnable.pop_front()
            };
            // the dispatcher may have drained the queue in between
            let Some(task) = task else { continue };

            task.bind(self);
            *self.running.lock() = Some(task.clone());
            self.switch_cnt.fetch_add(1, Ordering::SeqCst);
            self.tick_us.store(now_us(), Ordering::SeqCst);
            if let Err(err) = task.coroutine().resume() {
                // a stack that can not be allocated leaves nothing to
                // recover on this worker
                panic!(
                    "executor-{}: resuming coroutine-{} failed: {}",
                    self.id,
                    task.coroutine().id(),
                    err
                );
            }
            self.switched_cnt.fetch_add(1, Ordering::SeqCst);

            match task.coroutine().status() {
                Status::Hold => {
                    // hold() already parked the task in `waiting`; a bare
                    // yield leaves it referenced by the running slot only
                }
                Status::Finished => {
                    self.finished.push_back(task.clone());
                    *self.running.lock() = None;
                }
                Status::Except => {
                    self.finished.push_back(task.clone());
                    *self.running.lock() = None;
                    if let Some(cause) = task.coroutine().take_panic() {
                        // fail fast: surface the coroutine's panic on the
                        // worker thread
                        drop(task);
                        panic::resume_unwind(cause);
                    }
                }
                _ => {}
            }

            if self.finished.len() >= TRIGGER_GC_TASK_SIZE {
                self.clean();
            }
        }
        info!("executor-{} stopped", self.id);
    }

    /// Move the task named by `entry` from *waiting* to *awoken*. Returns
    /// false when the task is not (no longer) parked here.
    pub fn wakeup_from_entry(&self, entry: &RecoveryEntry) -> bool {
        let Some(task) = entry.task() else {
            return false;
        };
        let removed = {
            let mut waiting = self.waiting.lock();
            match waiting.iter().position(|t| Arc::ptr_eq(t, &task)) {
                Some(pos) => {
                    waiting.remove(pos);
                    true
                }
                None => false,
            }
        };
        if removed {
            self.awoken.push_back(task);
            if self.parked.load(Ordering::SeqCst) {
                self.cv.notify_all();
            }
        }
        removed
    }

    /// Drain *waiting* into *awoken*, in order.
    pub fn wakeup_all_tasks(&self) {
        let drained: Vec<TaskPtr> = self.waiting.lock().drain(..).collect();
        if drained.is_empty() {
            return;
        }
        debug!(
            "executor-{} woke up {} waiting task(s)",
            self.id,
            drained.len()
        );
        self.awoken.lock().extend(drained);
        if self.parked.load(Ordering::SeqCst) {
            self.cv.notify_all();
        }
    }

    /// The executor driving the calling thread, if any.
    pub fn current() -> Option<Arc<Executor>> {
        CURRENT_EXECUTOR.with(|e| e.borrow().as_ref().and_then(Weak::upgrade))
    }

    /// The task the current executor is presently resumed into.
    pub fn current_task() -> Option<TaskPtr> {
        Executor::current().and_then(|executor| executor.running.lock().clone())
    }

    /// Cooperatively yield the current task's coroutine.
    ///
    /// The coroutine goes `Hold` with no wake path; callers that need the
    /// task to run again use [`Executor::hold`] and [`Executor::wakeup`].
    pub fn yield_current() {
        let Some(task) = Executor::current_task() else {
            panic!("yield_current() called outside a running task");
        };
        task.coroutine().give_up();
    }

    /// Park the currently running task.
    ///
    /// The task moves to the *waiting* queue and its [`RecoveryEntry`] is
    /// handed to `publish` *before* the coroutine is switched out, so any
    /// state `publish` writes to is visible to whoever will wake the task.
    /// Returns (to the coroutine) only after a wakeup.
    pub fn hold<F>(publish: F)
    where
        F: FnOnce(RecoveryEntry),
    {
        let Some(task) = Executor::current_task() else {
            panic!("hold() called outside a running task");
        };
        let executor = task
            .executor()
            .expect("a running task is always bound to its executor");
        executor.hold_there(task, publish);
    }

    fn hold_there<F>(&self, task: TaskPtr, publish: F)
    where
        F: FnOnce(RecoveryEntry),
    {
        assert_eq!(
            task.coroutine().status(),
            Status::Running,
            "only the running task can be parked"
        );
        self.waiting.push_back(task.clone());
        publish(RecoveryEntry::new(Arc::downgrade(&task), self.id));
        task.coroutine().give_up();
    }

    /// Park the current task for `dur`.
    ///
    /// Nothing drives the wake yet, so this returns immediately.
    /// TODO: back this and `hold_until` with a timer wheel that calls
    /// `wakeup` on a stored entry when it fires.
    pub fn hold_for(_dur: Duration) {}

    /// Park the current task until `deadline`. See [`Executor::hold_for`].
    pub fn hold_until(_deadline: Instant) {}

    /// Un-park a task parked by [`Executor::hold`], from any thread.
    ///
    /// Routes through the task's executor back-pointer. Returns false for
    /// an expired or invalid entry, or when the task is no longer waiting
    /// (a second wakeup with the same entry fails silently).
    pub fn wakeup(entry: &RecoveryEntry) -> bool {
        if !entry.is_valid() {
            return false;
        }
        let Some(task) = entry.task() else {
            return false;
        };
        let Some(executor) = task.executor() else {
            return false;
        };
        executor.wakeup_from_entry(entry)
    }

    /// Drain the current executor's *waiting* queue into *awoken*.
    pub fn wakeup_all() {
        if let Some(executor) = Executor::current() {
            executor.wakeup_all_tasks();
        }
    }

    // Exit conditions for the condition-variable wait:
    // runnable has work, stop was requested, a wakeup landed in awoken, or
    // an idle GC is due.
    fn predicate(&self) -> bool {
        let has_task = !self.runnable.is_empty();
        let gonna_stop = self.stopping.load(Ordering::SeqCst);
        let has_awoken = !self.awoken.is_empty();
        let need_gc = !has_task && !self.finished.is_empty() && self.gc_interval_elapsed();
        has_task || gonna_stop || need_gc || has_awoken
    }

    fn gc_interval_elapsed(&self) -> bool {
        now_ms().saturating_sub(self.last_gc_ms.load(Ordering::SeqCst))
            > GC_INTERVAL.as_millis() as u64
    }

    // Both waits return whether a stale GC is due when they exit.
    fn wait_for_condition(&self) -> bool {
        let mut guard = self.cv_lock.lock();
        self.parked.store(true, Ordering::SeqCst);
        debug!("executor-{} waiting for condition", self.id);
        self.cv.wait_while(&mut guard, |_| !self.predicate());
        self.parked.store(false, Ordering::SeqCst);
        self.gc_interval_elapsed()
    }

    fn wait_for_condition_for(&self, timeout: Duration) -> bool {
        let mut guard = self.cv_lock.lock();
        self.parked.store(true, Ordering::SeqCst);
        debug!(
            "executor-{} waiting for condition for {:?}",
            self.id, timeout
        );
        let result = self
            .cv
            .wait_while_for(&mut guard, |_| !self.predicate(), timeout);
        if result.timed_out() {
            warn!(
                "executor-{} saw nothing to do for {:?}, stopping",
                self.id, timeout
            );
            self.stopping.store(true, Ordering::SeqCst);
        }
        self.parked.store(false, Ordering::SeqCst);
        self.gc_interval_elapsed()
    }

    /// Drop every reference held by the finished queue. This may free the
    /// coroutines and their stacks.
    fn clean(&self) {
        self.last_gc_ms.store(now_ms(), Ordering::SeqCst);
        let dropped = self.finished.take_all();
        info!(
            "executor-{} cleaned {} finished task(s)",
            self.id,
            dropped.len()
        );
        drop(dropped);
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        if !self.finished.is_empty() {
            self.clean();
        }
    }
}

/// Introspection of the coroutine the caller is running in.
pub mod this_coroutine {
    use super::Executor;

    /// Cooperatively yield the current coroutine.
    ///
    /// A no-op outside of any executor. The coroutine is left in `Hold`
    /// with no wake path; pair [`Executor::hold`] with
    /// [`Executor::wakeup`] when the task must run again.
    pub fn yield_now() {
        if Executor::current().is_some() {
            Executor::yield_current();
        }
    }

    /// Id of the current task's coroutine, or -1 outside of any task.
    pub fn id() -> i64 {
        match Executor::current_task() {
            Some(task) => task.coroutine().id(),
            None => -1,
        }
    }
}

static START: OnceLock<Instant> = OnceLock::new();

fn epoch() -> Instant {
    *START.get_or_init(Instant::now)
}

pub(crate) fn now_ms() -> u64 {
    epoch().elapsed().as_millis() as u64
}

pub(crate) fn now_us() -> u64 {
    epoch().elapsed().as_micros() as u64
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    use parking_lot::Mutex;

    use super::{this_coroutine, Executor};
    use crate::coroutine::{panic_message, Status};
    use crate::task::{RecoveryEntry, Task};

    fn run_worker(executor: &Arc<Executor>, idle_timeout: Duration) -> thread::JoinHandle<()> {
        let executor = executor.clone();
        thread::Builder::new()
            .name(format!("test-executor-{}", executor.id()))
            .spawn(move || executor.process(Some(idle_timeout)))
            .unwrap()
    }

    fn wait_until<F: Fn() -> bool>(what: &str, cond: F) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "timed out waiting for {}", what);
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_hold_wakeup_single_worker() {
        let transcript: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
        let entry: Arc<Mutex<RecoveryEntry>> = Arc::new(Mutex::new(RecoveryEntry::default()));
        let executor = Executor::new(1);

        let t1 = {
            let transcript = transcript.clone();
            let entry = entry.clone();
            Task::from_fn(move || {
                transcript.lock().push("t1-start");
                transcript.lock().push("t1-hold");
                Executor::hold(|e| *entry.lock() = e);
                transcript.lock().push("t1-resume");
                transcript.lock().push("t1-end");
            })
        };
        let t2 = {
            let transcript = transcript.clone();
            let entry = entry.clone();
            Task::from_fn(move || {
                transcript.lock().push("t2-start");
                assert!(Executor::wakeup(&entry.lock()));
                transcript.lock().push("t2-wakeup");
                transcript.lock().push("t2-end");
            })
        };
        let t3 = {
            let transcript = transcript.clone();
            Task::from_fn(move || {
                transcript.lock().push("t3-start");
                assert_ne!(this_coroutine::id(), -1);
                transcript.lock().push("t3-end");
            })
        };

        executor.add_task(t1);
        executor.add_task(t2);
        executor.add_task(t3);
        let worker = run_worker(&executor, Duration::from_millis(300));
        worker.join().unwrap();

        assert_eq!(
            *transcript.lock(),
            vec![
                "t1-start", "t1-hold", "t2-start", "t2-wakeup", "t2-end", "t1-resume", "t1-end",
                "t3-start", "t3-end",
            ]
        );

        // t1 was switched in twice, t2 and t3 once each
        assert_eq!(executor.switch_count(), 4);
        assert_eq!(executor.switched_count(), 4);
        assert!(!executor.is_blocking());

        // everything has drained into finished
        assert_eq!(executor.runnable_count(), 0);
        assert_eq!(executor.waiting_count(), 0);
        assert_eq!(executor.awoken_count(), 0);
        assert_eq!(executor.finished_count(), 3);
        for task in executor.finished.lock().iter() {
            assert_eq!(task.coroutine().status(), Status::Finished);
        }
    }

    #[test]
    fn test_wakeup_roundtrip_and_expiry() {
        let entry: Arc<Mutex<RecoveryEntry>> = Arc::new(Mutex::new(RecoveryEntry::default()));
        let executor = Executor::new(2);
        {
            let entry = entry.clone();
            executor.add_task_fn(move || {
                Executor::hold(|e| *entry.lock() = e);
            });
        }
        let worker = run_worker(&executor, Duration::from_millis(300));

        wait_until("the task to park", || entry.lock().is_valid());
        assert_eq!(entry.lock().executor_id(), 2);

        // the first wakeup succeeds exactly once
        assert!(Executor::wakeup(&entry.lock()));
        assert!(!Executor::wakeup(&entry.lock()));

        wait_until("the task to finish", || executor.finished_count() == 1);
        assert!(!Executor::wakeup(&entry.lock()));

        // cleaning drops the last owning reference; the entry expires
        executor.clean();
        assert!(!entry.lock().is_valid());
        assert!(!Executor::wakeup(&entry.lock()));

        worker.join().unwrap();
    }

    #[test]
    fn test_alternation_policy() {
        let transcript: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
        let e1: Arc<Mutex<RecoveryEntry>> = Arc::new(Mutex::new(RecoveryEntry::default()));
        let e2: Arc<Mutex<RecoveryEntry>> = Arc::new(Mutex::new(RecoveryEntry::default()));
        let gate_entered = Arc::new(AtomicBool::new(false));
        let gate_release = Arc::new(AtomicBool::new(false));
        let executor = Executor::new(3);

        let a1 = {
            let transcript = transcript.clone();
            let e1 = e1.clone();
            Task::from_fn(move || {
                transcript.lock().push("a1");
                Executor::hold(|e| *e1.lock() = e);
                transcript.lock().push("a1-resume");
            })
        };
        let a2 = {
            let transcript = transcript.clone();
            let e2 = e2.clone();
            Task::from_fn(move || {
                transcript.lock().push("a2");
                Executor::hold(|e| *e2.lock() = e);
                transcript.lock().push("a2-resume");
            })
        };
        let gate = {
            let entered = gate_entered.clone();
            let release = gate_release.clone();
            Task::from_fn(move || {
                entered.store(true, Ordering::SeqCst);
                while !release.load(Ordering::SeqCst) {
                    thread::sleep(Duration::from_millis(1));
                }
            })
        };

        executor.add_task(a1);
        executor.add_task(a2);
        executor.add_task(gate);
        let worker = run_worker(&executor, Duration::from_millis(300));

        // the gate keeps the worker busy while the queues are staged
        wait_until("the gate to start", || gate_entered.load(Ordering::SeqCst));
        assert_eq!(executor.waiting_count(), 2);
        for task in executor.waiting.lock().iter() {
            assert_eq!(task.coroutine().status(), Status::Hold);
        }

        assert!(Executor::wakeup(&e1.lock()));
        assert!(Executor::wakeup(&e2.lock()));
        assert_eq!(executor.waiting_count(), 0);
        assert_eq!(executor.awoken_count(), 2);

        let r1 = {
            let transcript = transcript.clone();
            Task::from_fn(move || transcript.lock().push("r1"))
        };
        let r2 = {
            let transcript = transcript.clone();
            Task::from_fn(move || transcript.lock().push("r2"))
        };
        executor.add_tasks(vec![r1, r2]);
        assert_eq!(executor.runnable_count(), 2);

        gate_release.store(true, Ordering::SeqCst);
        worker.join().unwrap();

        // with both queues non-empty the source strictly alternates,
        // starting from awoken because the gate came from runnable
        assert_eq!(
            *transcript.lock(),
            vec!["a1", "a2", "a1-resume", "r1", "a2-resume", "r2"]
        );
    }

    #[test]
    fn test_batch_add_and_gc_trigger() {
        let counter = Arc::new(AtomicUsize::new(0));
        let executor = Executor::new(4);

        let tasks: Vec<_> = (0..70)
            .map(|_| {
                let counter = counter.clone();
                Task::from_fn(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();
        executor.add_tasks(tasks);
        assert_eq!(executor.runnable_count(), 70);

        let worker = run_worker(&executor, Duration::from_millis(300));
        worker.join().unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 70);
        // one pass fired when the 64th task finished; the remainder is
        // still pending collection
        assert_eq!(executor.finished_count(), 70 - super::TRIGGER_GC_TASK_SIZE);
    }

    #[test]
    fn test_gc_after_idle_interval() {
        let counter = Arc::new(AtomicUsize::new(0));
        let executor = Executor::new(5);
        for _ in 0..10 {
            let counter = counter.clone();
            executor.add_task_fn(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        // long enough for the stale-GC trigger to come due while idle
        let worker = run_worker(&executor, super::GC_INTERVAL + Duration::from_millis(300));
        worker.join().unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 10);
        assert_eq!(executor.finished_count(), 0);
        assert!(executor.is_stopped());
    }

    #[test]
    fn test_exception_fail_fast() {
        let executor = Executor::new(6);
        executor.add_task_fn(|| panic!("boom in coroutine"));

        let worker = run_worker(&executor, Duration::from_millis(300));
        let cause = worker.join().expect_err("the worker must die");
        assert_eq!(panic_message(cause.as_ref()), "boom in coroutine");

        assert_eq!(executor.finished_count(), 1);
        assert_eq!(
            executor.finished.lock()[0].coroutine().status(),
            Status::Except
        );
        assert!(executor.running.lock().is_none());
    }

    #[test]
    fn test_hold_outside_task_panics() {
        let result = std::panic::catch_unwind(|| Executor::hold(|_| {}));
        assert!(result.is_err());
    }

    #[test]
    fn test_this_coroutine_outside_task() {
        assert_eq!(this_coroutine::id(), -1);
        // a yield outside of any executor does nothing
        this_coroutine::yield_now();
    }

    #[test]
    fn test_wakeup_all() {
        let parked = Arc::new(AtomicUsize::new(0));
        let executor = Executor::new(8);
        // three tasks park themselves, the fourth drains them all
        for _ in 0..3 {
            let parked = parked.clone();
            executor.add_task_fn(move || {
                parked.fetch_add(1, Ordering::SeqCst);
                Executor::hold(|_| {});
                parked.fetch_sub(1, Ordering::SeqCst);
            });
        }
        {
            let inner = executor.clone();
            executor.add_task_fn(move || {
                assert_eq!(inner.waiting_count(), 3);
                Executor::wakeup_all();
                assert_eq!(inner.waiting_count(), 0);
                assert_eq!(inner.awoken_count(), 3);
            });
        }

        let worker = run_worker(&executor, Duration::from_millis(300));
        worker.join().unwrap();

        assert_eq!(parked.load(Ordering::SeqCst), 0);
        assert_eq!(executor.waiting_count(), 0);
        assert_eq!(executor.finished_count(), 4);
    }
}
