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

use cosched::Coroutine;

fn main() {
    // Spawn a new coroutine
    let coro = Coroutine::spawn(move || {
        println!("1. Hello in coroutine!");

        // Yield back to whoever resumed us
        Coroutine::sched();

        println!("3. We are back!!");

        for i in 0..5 {
            println!("Counting {}", i);
        }

        println!("4. Good bye");
    });

    // Resume `coro`
    coro.resume().unwrap();

    println!("2. We are here!");

    // Resume the coroutine until it finishes
    coro.join().unwrap();

    println!("5. Back to main.");
}
