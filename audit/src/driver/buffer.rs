// III-IV
// Copyright 2023 Julio Merino
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not
// use this file except in compliance with the License.  You may obtain a copy
// of the License at:
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS, WITHOUT
// WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.  See the
// License for the specific language governing permissions and limitations
// under the License.

//! Bounded in-memory ring of pending entries.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// A multi-producer ring buffer that overwrites its oldest entry when full.
pub struct CircularBuffer<T> {
    /// Maximum number of entries.
    capacity: usize,

    /// Pending entries, oldest first.
    items: Mutex<VecDeque<T>>,

    /// Number of entries lost to overwrites.
    dropped: AtomicU64,
}

impl<T> CircularBuffer<T> {
    /// Creates an empty buffer that holds at most `capacity` entries, which is at least 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            dropped: AtomicU64::new(0),
        }
    }

    /// Locks the entries, tolerating a panicked holder because entries are always consistent.
    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<T>> {
        self.items.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Appends `item` and returns the new number of entries.  Drops the oldest entry if the
    /// buffer is full.
    pub fn push(&self, item: T) -> usize {
        let mut items = self.lock();
        if items.len() == self.capacity {
            items.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        items.push_back(item);
        items.len()
    }

    /// Removes and returns up to `max` of the oldest entries.
    pub fn drain(&self, max: usize) -> Vec<T> {
        let mut items = self.lock();
        let n = max.min(items.len());
        items.drain(..n).collect()
    }

    /// Returns the number of pending entries.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true if there are no pending entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of entries lost to overwrites so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_fifo() {
        let buffer = CircularBuffer::new(10);
        assert!(buffer.is_empty());
        assert_eq!(1, buffer.push(1));
        assert_eq!(2, buffer.push(2));
        assert_eq!(3, buffer.push(3));
        assert_eq!(vec![1, 2], buffer.drain(2));
        assert_eq!(vec![3], buffer.drain(5));
        assert!(buffer.drain(5).is_empty());
    }

    #[test]
    fn test_overwrites_oldest() {
        let buffer = CircularBuffer::new(3);
        for i in 0..5 {
            buffer.push(i);
        }
        assert_eq!(3, buffer.len());
        assert_eq!(2, buffer.dropped());
        assert_eq!(vec![2, 3, 4], buffer.drain(10));
    }

    #[test]
    fn test_zero_capacity_holds_one() {
        let buffer = CircularBuffer::new(0);
        buffer.push("a");
        buffer.push("b");
        assert_eq!(vec!["b"], buffer.drain(10));
    }

    #[test]
    fn test_concurrent_producers() {
        let buffer = Arc::new(CircularBuffer::new(1000));
        let handles = (0..4)
            .map(|t| {
                let buffer = buffer.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        buffer.push(t * 100 + i);
                    }
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(400, buffer.len());
        assert_eq!(0, buffer.dropped());
    }
}
