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

//! The stackful Coroutine and its context-switch state machine.
//!
//! ```
//! use cosched::Coroutine;
//!
//! let coro = Coroutine::spawn(|| {
//!     println!("Before yield");
//!
//!     // Give control back to whoever resumed this coroutine
//!     Coroutine::sched();
//!
//!     println!("I am back!");
//! });
//!
//! // Starts the Coroutine
//! coro.resume().expect("Failed to resume");
//!
//! println!("Back to main");
//!
//! // Resume it
//! coro.resume().expect("Failed to resume");
//!
//! println!("Coroutine finished");
//! ```
//!
//! Every worker thread owns one distinguished *master* coroutine with no
//! stack of its own: it runs on the OS thread stack and acts as the
//! switching hub. A resume switches master -> task; `give_up` (and a normal
//! return) switches task -> master. A coroutine is bound to the master that
//! first resumed it and stays on that worker for the rest of its life.

use std::any::Any;
use std::cell::Cell;
use std::fmt::{self, Debug};
use std::ops::Deref;
use std::panic::{self, AssertUnwindSafe};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use corosensei::stack::DefaultStack;
use corosensei::{CoroutineResult, Yielder};
use parking_lot::Mutex;

use crate::options::Options;
use crate::{Error, Result};

/// Default stack size of a new coroutine: 128 KiB.
pub const DEFAULT_STACK_SIZE: usize = 128 * 1024;

// Process-wide monotonic id source and live-coroutine metric.
static NEXT_CO_ID: AtomicI64 = AtomicI64::new(0);
static CO_COUNT: AtomicUsize = AtomicUsize::new(0);

/// Number of coroutines currently alive in the process, masters included.
pub fn coroutine_count() -> usize {
    CO_COUNT.load(Ordering::Relaxed)
}

thread_local! {
    // The switching hub of this thread. Created on first touch, exactly like
    // a worker coroutine except that it has no stack and no callable.
    static MASTER: Handle = Handle::new_master();

    // Coroutine currently switched in on this thread, if any. Set by
    // `resume` for the duration of the switch; `give_up` checks it.
    static CURRENT: Cell<Option<NonNull<Coroutine>>> = const { Cell::new(None) };

    // Suspend point of the currently running coroutine, type-erased. Valid
    // only while that coroutine is switched in.
    static YIELDER: Cell<Option<NonNull<()>>> = const { Cell::new(None) };
}

/// Handle of this thread's master coroutine.
pub fn master() -> Handle {
    MASTER.with(|m| m.clone())
}

/// State of a Coroutine
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Status {
    /// Constructed but never resumed; no stack allocated yet
    Idle,

    /// Switched in on its worker thread
    Running,

    /// Suspended. Can be switched back in by `resume`
    Hold,

    /// The callable returned normally
    Finished,

    /// The callable panicked; cannot be resumed again
    Except,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Idle => "IDLE",
            Status::Running => "RUNNING",
            Status::Hold => "HOLD",
            Status::Finished => "FINISHED",
            Status::Except => "EXCEPT",
        };
        f.write_str(name)
    }
}

type Callable = Box<dyn FnOnce() + Send + 'static>;
type RawCoroutine = corosensei::Coroutine<(), (), thread::Result<()>>;

enum Body {
    /// Not yet started; the stack is allocated on first resume.
    Pending(Callable),

    /// Switched in at least once; owns its stack until the coroutine drops.
    Live(RawCoroutine),
}

/// A stackful execution unit.
///
/// Constructed `Idle` with no stack; the stack and the machine context come
/// into existence on the first `resume`. Destroying a `Running` or `Hold`
/// coroutine is a programming error and asserts.
pub struct Coroutine {
    id: i64,
    stack_size: usize,
    name: Option<String>,
    status: Mutex<Status>,
    // `None` only for masters, which run on the host thread's own stack.
    body: Mutex<Option<Body>>,
    // Id of the master this coroutine was first resumed under, -1 before
    // the first resume. Fixed for the rest of the coroutine's life.
    master: AtomicI64,
    yield_cnt: AtomicU64,
    panic: Mutex<Option<Box<dyn Any + Send>>>,
    is_master: bool,
}

// The body is only ever touched by the worker that first resumed the
// coroutine (enforced by the master binding below); before the first resume
// there is no stack and the callable is `Send`. Queues and recovery entries
// may therefore share the coroutine across threads.
unsafe impl Send for Coroutine {}
unsafe impl Sync for Coroutine {}

/// Cloneable shared handle of a Coroutine
#[derive(Clone)]
pub struct Handle(Arc<Coroutine>);

impl Handle {
    fn new(c: Coroutine) -> Handle {
        Handle(Arc::new(c))
    }

    fn new_master() -> Handle {
        let id = NEXT_CO_ID.fetch_add(1, Ordering::Relaxed);
        CO_COUNT.fetch_add(1, Ordering::Relaxed);
        debug!(
            "master coroutine (id={}) created for thread '{}'",
            id,
            thread::current().name().unwrap_or("<unnamed>")
        );
        Handle::new(Coroutine {
            id,
            stack_size: 0,
            name: Some("<master>".to_string()),
            status: Mutex::new(Status::Running),
            body: Mutex::new(None),
            master: AtomicI64::new(id),
            yield_cnt: AtomicU64::new(0),
            panic: Mutex::new(None),
            is_master: true,
        })
    }

    /// Resume this coroutine until it is `Finished` or `Except`.
    pub fn join(&self) -> Result<()> {
        loop {
            match self.status() {
                Status::Idle | Status::Hold => self.resume()?,
                _ => break,
            }
        }
        Ok(())
    }
}

impl Deref for Handle {
    type Target = Coroutine;

    #[inline]
    fn deref(&self) -> &Coroutine {
        &self.0
    }
}

impl Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "Coroutine-{}('{}')[{}]", self.id(), name, self.status()),
            None => write!(f, "Coroutine-{}[{}]", self.id(), self.status()),
        }
    }
}

impl Coroutine {
    /// Spawn a Coroutine with options
    pub fn spawn_opts<F>(f: F, opts: Options) -> Handle
    where
        F: FnOnce() + Send + 'static,
    {
        let stack_size = if opts.stack_size == 0 {
            DEFAULT_STACK_SIZE
        } else {
            opts.stack_size
        };
        CO_COUNT.fetch_add(1, Ordering::Relaxed);
        Handle::new(Coroutine {
            id: NEXT_CO_ID.fetch_add(1, Ordering::Relaxed),
            stack_size,
            name: opts.name,
            status: Mutex::new(Status::Idle),
            body: Mutex::new(Some(Body::Pending(Box::new(f)))),
            master: AtomicI64::new(-1),
            yield_cnt: AtomicU64::new(0),
            panic: Mutex::new(None),
            is_master: false,
        })
    }

    /// Spawn a Coroutine with default options
    pub fn spawn<F>(f: F) -> Handle
    where
        F: FnOnce() + Send + 'static,
    {
        Coroutine::spawn_opts(f, Default::default())
    }

    /// Switch into this coroutine.
    ///
    /// A no-op when the coroutine is already `Finished` or `Except`.
    /// Asserts when the coroutine is `Running`, when it is resumed from
    /// inside another coroutine (all switches go through the master), or
    /// when it is resumed under a different master than the one it was
    /// first resumed under.
    pub fn resume(&self) -> Result<()> {
        match self.status() {
            Status::Finished | Status::Except => return Ok(()),
            status => assert!(
                matches!(status, Status::Idle | Status::Hold),
                "coroutine-{} can not resume from {}",
                self.id,
                status
            ),
        }
        assert!(!self.is_master, "the master coroutine is not resumable");
        assert!(
            CURRENT.with(|c| c.get()).is_none(),
            "coroutine-{} must be resumed from the master context, not from inside another coroutine",
            self.id
        );

        // First resume binds the coroutine to this worker's master; from
        // then on only this worker may switch it in.
        let master_id = master().id();
        if let Err(bound) =
            self.master
                .compare_exchange(-1, master_id, Ordering::AcqRel, Ordering::Acquire)
        {
            assert!(
                bound == master_id,
                "coroutine-{} is bound to master-{} but was resumed under master-{}",
                self.id,
                bound,
                master_id
            );
        }

        let mut body = self.body.lock();
        if matches!(body.as_ref(), Some(Body::Pending(_))) {
            let stack = DefaultStack::new(self.stack_size).map_err(Error::Sys)?;
            let Some(Body::Pending(f)) = body.take() else {
                unreachable!()
            };
            *body = Some(Body::Live(self.start_raw(stack, f)));
        }
        let Some(Body::Live(raw)) = body.as_mut() else {
            unreachable!()
        };

        self.set_status(Status::Running);
        CURRENT.with(|c| c.set(Some(NonNull::from(self))));
        let ret = raw.resume(());
        CURRENT.with(|c| c.set(None));
        YIELDER.with(|y| y.set(None));

        match ret {
            // `give_up` already moved the status to Hold before suspending
            CoroutineResult::Yield(()) => {}
            CoroutineResult::Return(Ok(())) => self.set_status(Status::Finished),
            CoroutineResult::Return(Err(cause)) => {
                *self.panic.lock() = Some(cause);
                self.set_status(Status::Except);
            }
        }
        Ok(())
    }

    /// Build the machine context. The closure is the trampoline: it runs
    /// the user callable and hands its outcome back to the resumer, which
    /// lands on the master when the callable returns.
    fn start_raw(&self, stack: DefaultStack, f: Callable) -> RawCoroutine {
        let id = self.id;
        let name = self.name.clone();
        RawCoroutine::with_stack(stack, move |yielder: &Yielder<(), ()>, _input: ()| {
            install_yielder(yielder);
            let ret = panic::catch_unwind(AssertUnwindSafe(f));
            if let Err(cause) = &ret {
                error!(
                    "coroutine '{}' (id={}) panicked at '{}'",
                    name.as_deref().unwrap_or("<unnamed>"),
                    id,
                    panic_message(cause.as_ref())
                );
            }
            ret
        })
    }

    /// Switch this coroutine out and park it as `Hold`.
    ///
    /// Must only be called while this coroutine is the one running on the
    /// current thread.
    pub fn give_up(&self) {
        let current = CURRENT.with(|c| c.get());
        assert!(
            current.map_or(false, |c| std::ptr::eq(c.as_ptr(), self)),
            "coroutine-{} called give_up while it is not the running coroutine",
            self.id
        );
        self.set_status(Status::Hold);
        self.yield_cnt.fetch_add(1, Ordering::Relaxed);

        let yielder = YIELDER
            .with(|y| y.get())
            .expect("a running coroutine always has a suspend point");
        // Safety: the yielder lives for the duration of the coroutine body
        // and we are inside that body right now.
        let yielder: &Yielder<(), ()> = unsafe { yielder.cast().as_ref() };
        yielder.suspend(());
        // Re-install after waking up: the thread-local was cleared when
        // control went back to the master.
        install_yielder(yielder);
    }

    /// Suspend the coroutine currently running on this thread.
    ///
    /// A no-op outside of any coroutine. The coroutine is left in `Hold`
    /// with nothing scheduled to wake it; in executor context use the
    /// hold/wakeup pair instead so the task runs again.
    pub fn sched() {
        if let Some(current) = CURRENT.with(|c| c.get()) {
            // Safety: CURRENT is only set while the pointee is switched in,
            // and it is cleared before `resume` returns.
            unsafe { current.as_ref() }.give_up();
        }
    }

    #[inline]
    pub fn id(&self) -> i64 {
        self.id
    }

    #[inline]
    pub fn status(&self) -> Status {
        *self.status.lock()
    }

    #[inline]
    fn set_status(&self, status: Status) {
        *self.status.lock() = status;
    }

    /// Get the name of the Coroutine
    #[inline]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    #[inline]
    pub fn stack_size(&self) -> usize {
        self.stack_size
    }

    /// How many times this coroutine has given up control.
    #[inline]
    pub fn yield_count(&self) -> u64 {
        self.yield_cnt.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn is_master(&self) -> bool {
        self.is_master
    }

    /// Take the panic captured when the coroutine went `Except`.
    pub fn take_panic(&self) -> Option<Box<dyn Any + Send>> {
        self.panic.lock().take()
    }

    fn can_destroy(&self) -> bool {
        matches!(
            self.status(),
            Status::Idle | Status::Finished | Status::Except
        )
    }
}

impl Drop for Coroutine {
    fn drop(&mut self) {
        // Only coroutines that own a stack are restricted; masters and
        // never-started coroutines may go at any time.
        let has_stack = matches!(self.body.get_mut().as_ref(), Some(Body::Live(_)));
        if has_stack && !thread::panicking() {
            assert!(
                self.can_destroy(),
                "coroutine-{} can not be destroyed in {} state",
                self.id,
                self.status()
            );
        }
        CO_COUNT.fetch_sub(1, Ordering::Relaxed);
    }
}

fn install_yielder(yielder: &Yielder<(), ()>) {
    YIELDER.with(|y| y.set(Some(NonNull::from(yielder).cast())));
}

/// Best-effort text of a panic payload, for reports.
pub(crate) fn panic_message(cause: &(dyn Any + Send)) -> &str {
    match cause.downcast_ref::<&'static str>() {
        Some(s) => s,
        None => match cause.downcast_ref::<String>() {
            Some(s) => s,
            None => "Box<Any>",
        },
    }
}

#[cfg(test)]
mod test {
    use std::sync::mpsc::channel;
    use std::thread;

    use super::{coroutine_count, Coroutine, Status};
    use crate::builder::Builder;

    #[test]
    fn test_coroutine_basic() {
        let (tx, rx) = channel();
        Coroutine::spawn(move || {
            tx.send(1).unwrap();
        })
        .resume()
        .expect("Failed to resume");

        assert_eq!(rx.recv().unwrap(), 1);
    }

    #[test]
    fn test_coroutine_yield() {
        let (tx, rx) = channel();
        let coro = Coroutine::spawn(move || {
            tx.send(1).unwrap();

            Coroutine::sched();

            tx.send(2).unwrap();
        });
        coro.resume().expect("Failed to resume");
        assert_eq!(rx.recv().unwrap(), 1);
        assert!(rx.try_recv().is_err());
        assert_eq!(coro.status(), Status::Hold);
        assert_eq!(coro.yield_count(), 1);

        coro.resume().expect("Failed to resume");

        assert_eq!(rx.recv().unwrap(), 2);
        assert_eq!(coro.status(), Status::Finished);
    }

    #[test]
    fn test_coroutine_lazy_stack() {
        let coro = Coroutine::spawn(|| {});
        // Constructed Idle; nothing has been allocated or run yet
        assert_eq!(coro.status(), Status::Idle);
        assert!(coro.body.lock().is_some());
        coro.join().unwrap();
        assert_eq!(coro.status(), Status::Finished);
    }

    #[test]
    fn test_coroutine_panic() {
        let coro = Coroutine::spawn(move || {
            panic!("Panic inside a coroutine!!");
        });
        coro.join().unwrap();
        assert_eq!(coro.status(), Status::Except);

        let cause = coro.take_panic().expect("panic should be captured");
        assert_eq!(super::panic_message(cause.as_ref()), "Panic inside a coroutine!!");
    }

    #[test]
    fn test_coroutine_resume_after_finished() {
        let coro = Coroutine::spawn(move || {});
        coro.resume().expect("Failed to resume");
        assert_eq!(coro.status(), Status::Finished);

        // It is already finished, resuming again is a no-op
        assert!(coro.resume().is_ok());
        assert_eq!(coro.status(), Status::Finished);
    }

    #[test]
    fn test_coroutine_yield_in_main() {
        // Outside of any coroutine this does nothing
        Coroutine::sched();
    }

    #[test]
    fn test_coroutine_ids_monotonic() {
        let ids: Vec<i64> = (0..64).map(|_| Coroutine::spawn(|| {}).id()).collect();
        for pair in ids.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn test_coroutine_live_count() {
        let coros: Vec<_> = (0..8).map(|_| Coroutine::spawn(|| {})).collect();
        // other tests may create and drop coroutines concurrently, but ours
        // are certainly alive
        assert!(coroutine_count() >= 8);
        drop(coros);
    }

    #[test]
    fn test_coroutine_worker_affinity() {
        let coro = Coroutine::spawn(|| {
            Coroutine::sched();
        });
        coro.resume().expect("Failed to resume");
        assert_eq!(coro.status(), Status::Hold);

        // Bound to this thread's master now; another worker may not switch
        // it in.
        let stolen = coro.clone();
        let result = thread::spawn(move || stolen.resume()).join();
        assert!(result.is_err());

        coro.resume().expect("Failed to resume");
        assert_eq!(coro.status(), Status::Finished);
    }

    #[test]
    fn test_builder_basic() {
        let (tx, rx) = channel();
        let coro = Builder::new()
            .name("Test builder".to_string())
            .stack_size(64 * 1024)
            .spawn(move || {
                tx.send(1).unwrap();
            });
        coro.join().expect("Failed to join");
        assert_eq!(rx.recv().unwrap(), 1);
        assert_eq!(coro.name(), Some("Test builder"));
        assert_eq!(coro.stack_size(), 64 * 1024);
    }
}
