//! Bounded FIFO of decoded push-model records.
//!
//! Listener tasks push from their own task; the collector's poll tick
//! drains. The drain swaps in an empty queue under the lock and hands the
//! snapshot back, so decoding and aggregation happen outside the lock.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tracing::warn;

pub struct PassiveBuffer<T> {
    name: &'static str,
    capacity: usize,
    inner: Mutex<VecDeque<T>>,
    dropped: AtomicU64,
}

impl<T> PassiveBuffer<T> {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        PassiveBuffer {
            name,
            capacity,
            inner: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            dropped: AtomicU64::new(0),
        }
    }

    /// Append one entry, evicting the oldest when full.
    pub fn push(&self, item: T) {
        let mut queue = self.inner.lock().expect("buffer lock poisoned");
        if queue.len() >= self.capacity {
            queue.pop_front();
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            // Warn on the first overflow and every 1000th after, so a
            // flood does not turn the log into its own flood.
            if dropped == 1 || dropped % 1000 == 0 {
                warn!(
                    buffer = self.name,
                    capacity = self.capacity,
                    dropped,
                    "passive buffer overflow, dropping oldest entries"
                );
            }
        }
        queue.push_back(item);
    }

    pub fn extend(&self, items: impl IntoIterator<Item = T>) {
        for item in items {
            self.push(item);
        }
    }

    /// Atomically take everything buffered so far.
    pub fn drain(&self) -> Vec<T> {
        let mut queue = self.inner.lock().expect("buffer lock poisoned");
        std::mem::take(&mut *queue).into()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("buffer lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total entries evicted since construction.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drains_in_fifo_order() {
        let buffer = PassiveBuffer::new("test", 10);
        buffer.extend([1, 2, 3]);
        assert_eq!(buffer.drain(), vec![1, 2, 3]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn drain_leaves_buffer_usable() {
        let buffer = PassiveBuffer::new("test", 10);
        buffer.push("a");
        assert_eq!(buffer.drain(), vec!["a"]);
        buffer.push("b");
        assert_eq!(buffer.drain(), vec!["b"]);
    }

    #[test]
    fn overflow_drops_oldest_first() {
        let buffer = PassiveBuffer::new("test", 3);
        buffer.extend([1, 2, 3, 4, 5]);
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.dropped(), 2);
        // The two oldest entries are gone.
        assert_eq!(buffer.drain(), vec![3, 4, 5]);
    }

    #[test]
    fn len_never_exceeds_capacity() {
        let buffer = PassiveBuffer::new("test", 8);
        for i in 0..1000 {
            buffer.push(i);
            assert!(buffer.len() <= 8);
        }
    }

    #[test]
    fn concurrent_pushes_respect_bound() {
        use std::sync::Arc;
        let buffer = Arc::new(PassiveBuffer::new("test", 100));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let buffer = Arc::clone(&buffer);
                std::thread::spawn(move || {
                    for i in 0..1000 {
                        buffer.push(i);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(buffer.len(), 100);
        assert_eq!(buffer.dropped(), 4 * 1000 - 100);
    }
}
