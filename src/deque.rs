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

//! A double-ended queue with an internal mutex.
//!
//! The executor queues and the dispatcher's transfer buffer are all
//! `SyncDeque`s. Every verb takes the lock for exactly one operation;
//! [`SyncDeque::lock`] hands out the guard for compound sequences (a batch
//! push, a find-and-remove) so they stay a single critical section.

use std::collections::VecDeque;

use parking_lot::{Mutex, MutexGuard};

pub struct SyncDeque<T> {
    inner: Mutex<VecDeque<T>>,
}

impl<T> SyncDeque<T> {
    pub fn new() -> SyncDeque<T> {
        SyncDeque {
            inner: Mutex::new(VecDeque::new()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn clear(&self) {
        self.inner.lock().clear()
    }

    pub fn push_back(&self, value: T) {
        self.inner.lock().push_back(value)
    }

    pub fn push_front(&self, value: T) {
        self.inner.lock().push_front(value)
    }

    pub fn pop_back(&self) -> Option<T> {
        self.inner.lock().pop_back()
    }

    pub fn pop_front(&self) -> Option<T> {
        self.inner.lock().pop_front()
    }

    /// Lock the deque for a compound sequence of operations.
    ///
    /// The guard dereferences to the underlying `VecDeque`; everything done
    /// through it happens in one critical section.
    pub fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.inner.lock()
    }

    /// Swap the whole content out, leaving the deque empty.
    ///
    /// The returned elements are dropped by the caller, outside the lock.
    pub fn take_all(&self) -> VecDeque<T> {
        std::mem::take(&mut *self.inner.lock())
    }

    /// Move up to `n` front elements into `out`, replacing its content.
    pub fn pop_front_replace(&self, n: usize, out: &mut VecDeque<T>) {
        let mut inner = self.inner.lock();
        let n = n.min(inner.len());
        out.clear();
        out.extend(inner.drain(..n));
    }

    /// Move up to `n` back elements into `out`, replacing its content.
    /// The elements keep their relative order.
    pub fn pop_back_replace(&self, n: usize, out: &mut VecDeque<T>) {
        let mut inner = self.inner.lock();
        let n = n.min(inner.len());
        let split = inner.len() - n;
        out.clear();
        out.extend(inner.split_off(split));
    }

    /// Move up to `n` front elements to the end of `out`.
    pub fn pop_front_append(&self, n: usize, out: &mut VecDeque<T>) {
        let mut inner = self.inner.lock();
        let n = n.min(inner.len());
        out.extend(inner.drain(..n));
    }

    /// Move up to `n` back elements to the end of `out`.
    /// The elements keep their relative order.
    pub fn pop_back_append(&self, n: usize, out: &mut VecDeque<T>) {
        let mut inner = self.inner.lock();
        let n = n.min(inner.len());
        let split = inner.len() - n;
        out.extend(inner.split_off(split));
    }
}

impl<T> Default for SyncDeque<T> {
    fn default() -> SyncDeque<T> {
        SyncDeque::new()
    }
}

impl<T> FromIterator<T> for SyncDeque<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> SyncDeque<T> {
        SyncDeque {
            inner: Mutex::new(iter.into_iter().collect()),
        }
    }
}

#[cfg(test)]
mod test {
    use std::collections::VecDeque;

    use super::SyncDeque;

    #[test]
    fn test_deque_basic() {
        let d: SyncDeque<i32> = SyncDeque::new();
        assert!(d.is_empty());

        d.push_back(1);
        d.push_back(2);
        d.push_back(3);
        d.push_front(0);
        assert_eq!(d.len(), 4);

        assert_eq!(d.pop_front(), Some(0));
        assert_eq!(d.pop_back(), Some(3));
        assert_eq!(d.len(), 2);

        d.clear();
        assert!(d.is_empty());
        assert_eq!(d.pop_front(), None);
    }

    #[test]
    fn test_deque_compound_under_one_lock() {
        let d: SyncDeque<i32> = (1..=5).collect();
        {
            let mut guard = d.lock();
            guard.push_back(6);
            guard.push_front(0);
        }
        assert_eq!(d.len(), 7);
    }

    #[test]
    fn test_deque_take_all() {
        let d: SyncDeque<i32> = (1..=4).collect();
        let all = d.take_all();
        assert_eq!(all, VecDeque::from(vec![1, 2, 3, 4]));
        assert!(d.is_empty());
    }

    #[test]
    fn test_deque_bulk_replace() {
        let d: SyncDeque<i32> = (1..=10).collect();

        let mut front = VecDeque::from(vec![99]);
        d.pop_front_replace(3, &mut front);
        assert_eq!(front, VecDeque::from(vec![1, 2, 3]));

        let mut back = VecDeque::new();
        d.pop_back_replace(3, &mut back);
        assert_eq!(back, VecDeque::from(vec![8, 9, 10]));

        assert_eq!(d.len(), 4);
    }

    #[test]
    fn test_deque_bulk_append_preserves_order() {
        let d: SyncDeque<i32> = (1..=10).collect();

        let mut out = VecDeque::new();
        d.pop_back_append(2, &mut out);
        d.pop_front_append(3, &mut out);
        assert_eq!(out, VecDeque::from(vec![9, 10, 1, 2, 3]));
        assert_eq!(d.len(), 5);

        // clamped to whatever is left
        d.pop_front_append(100, &mut out);
        assert_eq!(out, VecDeque::from(vec![9, 10, 1, 2, 3, 4, 5, 6, 7, 8]));
        assert!(d.is_empty());
    }
}
