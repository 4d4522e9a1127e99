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

//! The process-wide scheduler.
//!
//! Owns the executors, admits new tasks and hosts the dispatcher thread
//! that periodically moves queued work from overloaded executors to
//! underloaded ones. Executor 0 of the vector is the *main* executor,
//! driven by the thread that calls [`Scheduler::start`]; the rest each get
//! a worker thread of their own.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::Duration;

use parking_lot::RwLock;

use crate::deque::SyncDeque;
use crate::executor::Executor;
use crate::task::{Task, TaskPtr};

/// How often the dispatcher recomputes loads and rebalances.
const DISPATCH_INTERVAL: Duration = Duration::from_millis(1000);

/// Idle timeout handed to every worker: an executor with nothing to do for
/// this long stops itself.
const DEBUG_IDLE_TIMEOUT: Duration = Duration::from_millis(2000);

pub struct Scheduler {
    executors: RwLock<Vec<Arc<Executor>>>,
    started: AtomicBool,
    stopping: AtomicBool,
}

impl Scheduler {
    /// The scheduler singleton.
    pub fn instance() -> &'static Scheduler {
        static INSTANCE: OnceLock<Scheduler> = OnceLock::new();
        INSTANCE.get_or_init(Scheduler::new)
    }

    fn new() -> Scheduler {
        // there is always at least the main executor, so tasks may be
        // admitted before `start`
        Scheduler {
            executors: RwLock::new(vec![Executor::new(1)]),
            started: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
        }
    }

    /// Start scheduling, blocking the calling thread on the main executor
    /// until the scheduler stops.
    ///
    /// `min_threads` of 0 defaults to the hardware concurrency;
    /// `max_threads` below `min_threads` is clamped up to it. Panics when
    /// called a second time.
    pub fn start(&self, min_threads: usize, max_threads: usize) {
        if self.stopping.load(Ordering::SeqCst) {
            warn!("scheduler is stopping, can not start");
            return;
        }
        if self
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            panic!("Scheduler::start may only be called once");
        }

        let min_threads = if min_threads == 0 {
            num_cpus::get()
        } else {
            min_threads
        };
        let max_threads = max_threads.max(min_threads);

        for _ in 0..min_threads - 1 {
            self.create_executor(max_threads);
        }

        if max_threads > 1 {
            thread::Builder::new()
                .name("sched-dispat".to_string())
                .spawn(|| Scheduler::instance().dispatcher_loop())
                .expect("failed to spawn the dispatcher thread");
        } else {
            debug!("no dispatcher is needed");
        }

        info!(
            "scheduler started with min_threads = {} max_threads = {}",
            min_threads, max_threads
        );

        let main_executor = self.executors.read()[0].clone();
        main_executor.process(Some(DEBUG_IDLE_TIMEOUT));
    }

    /// Start scheduling on a detached helper thread, so the caller does
    /// not block.
    pub fn begin(&self, min_threads: usize, max_threads: usize) {
        thread::Builder::new()
            .name("cosched".to_string())
            .spawn(move || Scheduler::instance().start(min_threads, max_threads))
            .expect("failed to spawn the scheduler thread");
    }

    /// Request shutdown. The scheduler can not be restarted afterwards.
    pub fn stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        let mut executors = self.executors.write();
        for executor in executors.iter() {
            executor.stop();
        }
        executors.clear();
    }

    /// Admit a callable as a new coroutine task. A no-op once the
    /// scheduler is stopping.
    pub fn spawn<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.stopping.load(Ordering::SeqCst) {
            return;
        }
        self.add_task(Task::from_fn(f));
    }

    fn add_task(&self, task: TaskPtr) {
        let executors = self.executors.read();
        match executors.len() {
            0 => {}
            1 => executors[0].add_task(task),
            // placement is naive; the dispatcher rebalances later
            n => {
                let pick = rand::random::<usize>() % n;
                executors[pick].add_task(task);
                debug!(
                    "scheduler assigned new task to executor-{}",
                    executors[pick].id()
                );
            }
        }
    }

    fn create_executor(&self, max_threads: usize) {
        let mut executors = self.executors.write();
        if executors.len() < max_threads {
            let executor = Executor::new(executors.len() as i32 + 1);
            let worker = executor.clone();
            thread::Builder::new()
                .name(format!("executor-{}", executor.id()))
                .spawn(move || worker.process(Some(DEBUG_IDLE_TIMEOUT)))
                .expect("failed to spawn an executor thread");
            executors.push(executor);
        }
    }

    fn dispatcher_loop(&self) {
        while !self.stopping.load(Ordering::SeqCst) {
            thread::sleep(DISPATCH_INTERVAL);
            let executors = self.executors.read().clone();
            rebalance(&executors);
        }
        info!("dispatcher stopped");
    }
}

/// One rebalance pass: compute per-executor loads, drain the tail of every
/// over-average runnable queue (all of it when the executor is blocking)
/// and hand the collected tasks to the under-average executors by
/// ascending index, least-loaded executor taking any remainder.
///
/// Greedy first-fit by ascending index; the pass bounds imbalance rather
/// than minimising it.
fn rebalance(executors: &[Arc<Executor>]) {
    if executors.is_empty() {
        return;
    }
    let total_load: usize = executors.iter().map(|e| e.valid_tasks_count()).sum();
    if total_load == 0 {
        debug!("no dispatching is needed, total load is 0");
        return;
    }
    let avg_load = total_load / executors.len();

    let stolen: SyncDeque<TaskPtr> = SyncDeque::new();
    let mut low_load: BTreeMap<usize, usize> = BTreeMap::new();
    let mut min_load_idx = 0usize;
    let mut min_load = executors[0].runnable_count();
    for (idx, executor) in executors.iter().enumerate() {
        let load = executor.runnable_count();
        debug!(
            "executor-{} load = {} (efficiency {:.3}/ms)",
            executor.id(),
            load,
            executor.efficiency()
        );
        if load < min_load {
            min_load = load;
            min_load_idx = idx;
        }
        if load > avg_load {
            if executor.is_blocking() {
                // a worker stuck inside one coroutine: relocate everything
                // still queued so the rest of the work makes progress
                executor.give_up_tasks(&stolen, 0);
            } else {
                executor.give_up_tasks(&stolen, load - avg_load);
            }
        } else {
            low_load.insert(idx, load);
        }
    }

    if stolen.is_empty() {
        debug!("no extra tasks collected");
        return;
    }
    info!(
        "collected {} task(s) from {} executor(s)",
        stolen.len(),
        executors.len()
    );

    // top up the low-load executors by ascending index, head of `stolen`
    // first
    let mut batch = VecDeque::new();
    for (&idx, &load) in low_load.iter() {
        if stolen.is_empty() {
            break;
        }
        let supply = avg_load - load;
        if supply == 0 {
            continue;
        }
        stolen.pop_front_replace(supply, &mut batch);
        debug!(
            "executor-{} got {} task(s) from the dispatcher",
            executors[idx].id(),
            batch.len()
        );
        executors[idx].add_tasks(batch.drain(..));
    }

    if !stolen.is_empty() {
        let rest = stolen.take_all();
        debug!(
            "executor-{} got the remaining {} task(s)",
            executors[min_load_idx].id(),
            rest.len()
        );
        executors[min_load_idx].add_tasks(rest);
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use super::rebalance;
    use crate::executor::Executor;
    use crate::task::Task;

    fn stuff_tasks(executor: &Arc<Executor>, n: usize) {
        executor.add_tasks((0..n).map(|_| Task::from_fn(|| {})));
    }

    fn queued_ids(executors: &[Arc<Executor>]) -> Vec<i64> {
        let mut ids: Vec<i64> = executors
            .iter()
            .flat_map(|e| {
                e.runnable
                    .lock()
                    .iter()
                    .map(|t| t.coroutine().id())
                    .collect::<Vec<_>>()
            })
            .collect();
        ids.sort_unstable();
        ids
    }

    #[test]
    fn test_rebalance_even_split() {
        let e1 = Executor::new(1);
        let e2 = Executor::new(2);
        stuff_tasks(&e1, 100);

        let executors = vec![e1.clone(), e2.clone()];
        rebalance(&executors);

        assert_eq!(e1.runnable_count(), 50);
        assert_eq!(e2.runnable_count(), 50);
    }

    #[test]
    fn test_rebalance_conserves_tasks() {
        let e1 = Executor::new(1);
        let e2 = Executor::new(2);
        let e3 = Executor::new(3);
        stuff_tasks(&e1, 17);
        stuff_tasks(&e2, 3);

        let executors = vec![e1, e2, e3];
        let before = queued_ids(&executors);
        rebalance(&executors);
        let after = queued_ids(&executors);

        assert_eq!(before, after);
    }

    #[test]
    fn test_rebalance_bound() {
        let e1 = Executor::new(1);
        let e2 = Executor::new(2);
        let e3 = Executor::new(3);
        stuff_tasks(&e1, 9);
        stuff_tasks(&e2, 3);

        // total 12 over 3 executors: every queue ends up at the average
        let executors = vec![e1.clone(), e2.clone(), e3.clone()];
        rebalance(&executors);

        assert_eq!(e1.runnable_count(), 4);
        assert_eq!(e2.runnable_count(), 4);
        assert_eq!(e3.runnable_count(), 4);
    }

    #[test]
    fn test_rebalance_noop_when_idle() {
        let e1 = Executor::new(1);
        let e2 = Executor::new(2);
        rebalance(&[e1.clone(), e2.clone()]);
        assert_eq!(e1.runnable_count(), 0);
        assert_eq!(e2.runnable_count(), 0);
    }

    #[test]
    fn test_rebalance_evacuates_blocking_executor() {
        let e1 = Executor::new(1);
        let e2 = Executor::new(2);

        let entered = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicUsize::new(0));
        {
            let entered = entered.clone();
            let finished = finished.clone();
            // a busy loop that far exceeds the blocking threshold
            e1.add_task_fn(move || {
                entered.store(true, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(500));
                finished.fetch_add(1, Ordering::SeqCst);
            });
        }
        let worker = {
            let e1 = e1.clone();
            thread::Builder::new()
                .name("blocked-worker".to_string())
                .spawn(move || e1.process(Some(Duration::from_millis(300))))
                .unwrap()
        };
        while !entered.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(1));
        }
        // 20 more tasks pile up behind the stuck coroutine
        stuff_tasks(&e1, 20);
        thread::sleep(Duration::from_millis(150));
        assert!(e1.is_blocking());

        rebalance(&[e1.clone(), e2.clone()]);

        // everything queued was evacuated; the stuck coroutine itself
        // stays where it is and completes on its own worker
        assert_eq!(e1.runnable_count(), 0);
        assert_eq!(e2.runnable_count(), 20);
        worker.join().unwrap();
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert_eq!(e1.finished_count(), 1);
    }
}
