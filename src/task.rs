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

use std::fmt::{self, Debug};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::coroutine::{Coroutine, Handle};
use crate::executor::Executor;

/// Shared ownership of a task: queues and recovery entries may reference it
/// at the same time.
pub type TaskPtr = Arc<Task>;

/// A coroutine bound to an Executor for scheduling.
pub struct Task {
    co: Handle,
    // Which executor is currently responsible for this task. Written by the
    // receiving executor at admission and refreshed at every pick; this is
    // the source of truth a wakeup routes through.
    executor: Mutex<Weak<Executor>>,
}

impl Task {
    /// Wrap an existing coroutine.
    pub fn new(co: Handle) -> TaskPtr {
        Arc::new(Task {
            co,
            executor: Mutex::new(Weak::new()),
        })
    }

    /// Build a task around a callable, with a default-stack coroutine.
    pub fn from_fn<F>(f: F) -> TaskPtr
    where
        F: FnOnce() + Send + 'static,
    {
        Task::new(Coroutine::spawn(f))
    }

    #[inline]
    pub fn coroutine(&self) -> &Handle {
        &self.co
    }

    /// The executor currently responsible for this task, if it is alive.
    pub fn executor(&self) -> Option<Arc<Executor>> {
        self.executor.lock().upgrade()
    }

    pub(crate) fn bind(&self, executor: &Arc<Executor>) {
        *self.executor.lock() = Arc::downgrade(executor);
    }
}

impl Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Task({:?})", self.co)
    }
}

/// A non-owning handle to a parked task plus the id of the Executor that
/// parked it. Handed out by `Executor::hold`; any thread may later pass it
/// to `Executor::wakeup`. The wakeup routes through the task's executor
/// back-pointer; the id is informational.
#[derive(Clone, Default)]
pub struct RecoveryEntry {
    task: Weak<Task>,
    id: i32,
}

impl RecoveryEntry {
    pub(crate) fn new(task: Weak<Task>, id: i32) -> RecoveryEntry {
        RecoveryEntry { task, id }
    }

    /// True while the parked task is still alive and the entry names an
    /// executor. Executor ids start at 1; id 0 is the "no executor"
    /// sentinel a default entry carries.
    pub fn is_valid(&self) -> bool {
        self.task.upgrade().is_some() && self.id != 0
    }

    /// Id of the executor the task was parked on.
    pub fn executor_id(&self) -> i32 {
        self.id
    }

    pub(crate) fn task(&self) -> Option<TaskPtr> {
        self.task.upgrade()
    }
}

impl PartialEq for RecoveryEntry {
    fn eq(&self, other: &RecoveryEntry) -> bool {
        let same_task = match (self.task.upgrade(), other.task.upgrade()) {
            (Some(a), Some(b)) => Arc::ptr_eq(&a, &b),
            (None, None) => true,
            _ => false,
        };
        same_task && self.id == other.id
    }
}

impl Debug for RecoveryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoveryEntry")
            .field("valid", &self.is_valid())
            .field("id", &self.id)
            .finish()
    }
}
