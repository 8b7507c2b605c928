use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

/// A bounded multi-producer/multi-consumer ring buffer with a monotonic
/// write index.
///
/// Concurrent `push` and `at`/`fast_snapshot_*` calls are permitted and never
/// block each other; `clear` and the `safe_snapshot_*` variants take the
/// exclusive guard and must not run concurrently with producers. The
/// published read head only ever advances forward, so a reader racing a
/// partial publication observes the previous value rather than a torn one.
///
/// Slots hold `Arc<T>` behind short-lived mutexes, the portable stand-in for
/// an atomic shared pointer; the slot locks are uncontended except when a
/// producer lands on the exact slot a reader is copying.
pub struct SimpleRingBuffer<T> {
    slots: Box<[Mutex<Arc<T>>]>,
    push_head: AtomicUsize,
    read_head: AtomicUsize,
    guard: RwLock<()>,
}

impl<T: Clone + Default> SimpleRingBuffer<T> {
    /// Constructor. `capacity` must be a power of two and at least 8.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity.is_power_of_two(), "capacity must be a power of two");
        assert!(capacity >= 8, "capacity must be at least 8");
        let slots = (0..capacity)
            .map(|_| Mutex::new(Arc::new(T::default())))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        SimpleRingBuffer {
            slots,
            push_head: AtomicUsize::new(0),
            read_head: AtomicUsize::new(0),
            guard: RwLock::new(()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// The monotonic index of the most recent published entry.
    pub fn head(&self) -> usize {
        self.read_head.load(Ordering::Acquire)
    }

    fn mask(&self) -> usize {
        self.slots.len() - 1
    }

    /// Publishes `value` at the next monotonic index.
    pub fn push(&self, value: T) {
        let _shared = self.guard.read().unwrap();
        let index = self.push_head.fetch_add(1, Ordering::AcqRel);
        *self.slots[index & self.mask()].lock().unwrap() = Arc::new(value);

        // advance the read head forward only; a stale CAS loser retries
        // until another producer has already published past us
        let mut expected = self.head();
        while expected < index {
            match self.read_head.compare_exchange_weak(
                expected,
                index,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(seen) => expected = seen,
            }
        }
    }

    fn at_head(&self, offset: usize, head: usize) -> T {
        let slot = (head + self.slots.len() - offset) & self.mask();
        self.slots[slot].lock().unwrap().as_ref().clone()
    }

    /// Reads the entry `offset` positions behind the most recent push
    /// (offset 0 is the newest). Non-blocking; may observe stale data.
    pub fn at(&self, offset: usize) -> T {
        self.at_head(offset, self.head())
    }

    fn snapshot(&self, descending: bool) -> Vec<T> {
        let head = self.head();
        let n = self.slots.len();
        (0..n)
            .map(|i| {
                let offset = if descending { i } else { n - 1 - i };
                self.at_head(offset, head)
            })
            .collect()
    }

    /// Non-blocking ordered copy, oldest entry first.
    pub fn fast_snapshot_asc(&self) -> Vec<T> {
        self.snapshot(false)
    }

    /// Non-blocking ordered copy, newest entry first.
    pub fn fast_snapshot_desc(&self) -> Vec<T> {
        self.snapshot(true)
    }

    /// Exclusive-locked ordered copy, oldest entry first.
    pub fn safe_snapshot_asc(&self) -> Vec<T> {
        let _exclusive = self.guard.write().unwrap();
        self.snapshot(false)
    }

    /// Exclusive-locked ordered copy, newest entry first.
    pub fn safe_snapshot_desc(&self) -> Vec<T> {
        let _exclusive = self.guard.write().unwrap();
        self.snapshot(true)
    }

    /// Exclusive-locked reset of every slot to the default value.
    pub fn clear(&self) {
        let _exclusive = self.guard.write().unwrap();
        for slot in self.slots.iter() {
            *slot.lock().unwrap() = Arc::new(T::default());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    #[should_panic]
    fn test_capacity_must_be_power_of_two() {
        let _ = SimpleRingBuffer::<u32>::new(12);
    }

    #[test]
    fn test_at_returns_most_recent() {
        let ring = SimpleRingBuffer::new(8);
        for value in 1..=20u32 {
            ring.push(value);
        }
        assert_eq!(ring.at(0), 20);
        assert_eq!(ring.at(1), 19);
    }

    #[test]
    fn test_snapshot_matches_at() {
        let ring = SimpleRingBuffer::new(8);
        for value in 1..=12u32 {
            ring.push(value);
        }
        let snapshot = ring.fast_snapshot_desc();
        for (offset, entry) in snapshot.iter().enumerate() {
            assert_eq!(*entry, ring.at(offset));
        }
        let ascending = ring.safe_snapshot_asc();
        assert_eq!(
            ascending,
            snapshot.iter().rev().cloned().collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_clear_resets_slots() {
        let ring = SimpleRingBuffer::new(8);
        ring.push(7u32);
        ring.clear();
        assert_eq!(ring.at(0), 0);
    }

    #[test]
    fn test_concurrent_push_keeps_latest_visible() {
        let ring = Arc::new(SimpleRingBuffer::new(64));
        let writers: Vec<_> = (0..4)
            .map(|t| {
                let ring = Arc::clone(&ring);
                thread::spawn(move || {
                    for i in 0..256u32 {
                        ring.push(t * 1000 + i);
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }
        // all 1024 pushes landed, the head saw every index
        assert_eq!(ring.head(), 1023);
    }
}
