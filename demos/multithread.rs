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

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use cosched::{this_coroutine, Scheduler};

static DONE: AtomicUsize = AtomicUsize::new(0);

fn main() {
    env_logger::init();

    const TASKS: usize = 40;

    let sched = Scheduler::instance();
    sched.begin(0, 0); // one worker per core

    for i in 0..TASKS {
        cosched::spawn(move || {
            println!(
                "task {} running as coroutine-{} on {:?}",
                i,
                this_coroutine::id(),
                thread::current().name()
            );
            DONE.fetch_add(1, Ordering::SeqCst);
        });
    }

    while DONE.load(Ordering::SeqCst) < TASKS {
        thread::sleep(Duration::from_millis(10));
    }
    sched.stop();
    println!("all {} tasks done", TASKS);
}
