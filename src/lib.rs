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

//! An M:N scheduler for stackful coroutines.
//!
//! A large population of lightweight coroutines is multiplexed over a small
//! pool of OS threads. Each worker thread hosts one [`Executor`] that drives
//! its own ready/waiting/awoken/finished queues; the process-wide
//! [`Scheduler`] owns the executors, admits new tasks and periodically moves
//! queued work from overloaded workers to underloaded ones.
//!
//! ```no_run
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! static DONE: AtomicUsize = AtomicUsize::new(0);
//!
//! let sched = cosched::Scheduler::instance();
//! for _ in 0..100 {
//!     cosched::spawn(|| {
//!         DONE.fetch_add(1, Ordering::SeqCst);
//!     });
//! }
//! // Blocks the calling thread on the main executor until the scheduler
//! // stops; use `begin` to drive it from a background thread instead.
//! sched.start(2, 4);
//! ```

/* How a task moves through the system:
 *
 *           Scheduler::spawn
 *                 |
 *                 v            (dispatcher may move queued
 *          [ runnable ] <----- tasks between executors)
 *                 |
 *          pick & resume                 master context
 *                 |                           ^
 *                 v         hold()            |
 *             running  ---------------> [ waiting ]
 *              |    \                         |
 *       return |     \ panic          wakeup(entry)
 *              v      v                       |
 *          [ finished ] <--+            [ awoken ]
 *                 |         \                 |
 *               Clean        +--- pick & resume (alternating with
 *                                 the runnable queue)
 *
 * Every switch goes through the worker's master coroutine: resume switches
 * master -> task, give_up and a normal return switch task -> master. Tasks
 * never switch directly to other tasks, so each worker only ever tracks a
 * single "who is running here" slot.
 */

#[macro_use]
extern crate log;

pub use crate::builder::Builder;
pub use crate::coroutine::{coroutine_count, Coroutine, Handle, Status, DEFAULT_STACK_SIZE};
pub use crate::deque::SyncDeque;
pub use crate::executor::{
    this_coroutine, Executor, BLOCKING_THRESHOLD, GC_INTERVAL, TRIGGER_GC_TASK_SIZE,
};
pub use crate::options::Options;
pub use crate::scheduler::Scheduler;
pub use crate::task::{RecoveryEntry, Task, TaskPtr};

mod builder;
mod coroutine;
mod deque;
mod executor;
mod options;
mod scheduler;
mod task;

use std::fmt;
use std::io;

/// Failures surfaced to callers.
///
/// Coroutine state violations (resuming a running coroutine, destroying a
/// held one, parking outside a task) are programming errors and assert
/// instead; panics raised inside a coroutine are captured on the coroutine
/// and rethrown on its worker thread.
#[derive(Debug)]
pub enum Error {
    /// A system-level failure while allocating a coroutine stack.
    Sys(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Sys(err) => write!(f, "coroutine stack allocation failed: {}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Sys(err) => Some(err),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Admit a callable to the scheduler as a new coroutine task.
///
/// Equivalent to `Scheduler::instance().spawn(f)`.
pub fn spawn<F>(f: F)
where
    F: FnOnce() + Send + 'static,
{
    Scheduler::instance().spawn(f)
}
