//! Low latency, bounded, lock-free multi producer & multi consumer (MPMC) queue built on
//! per-slot turn sequencing. Producers and consumers claim logical positions with a single
//! atomic increment and then synchronize only on the claimed slot, so operations on different
//! positions proceed fully in parallel.
//!
//! ## Examples
//! Basic value handoff through a bounded queue.
//! ```
//! use turnq::MpmcQueue;
//!
//! let queue = MpmcQueue::new(2).unwrap();
//!
//! // publish two values
//! queue.push("hello");
//! queue.push("world");
//!
//! // queue is now full
//! assert!(queue.try_push("!").is_err());
//!
//! // values come back in claim order
//! assert_eq!("hello", queue.pop());
//! assert_eq!("world", queue.pop());
//! assert!(queue.try_pop().is_none());
//! ```
//! Any number of threads can share the queue by reference.
//! ```
//! use std::thread;
//! use turnq::MpmcQueue;
//!
//! let queue = MpmcQueue::new(8).unwrap();
//! thread::scope(|s| {
//!     s.spawn(|| queue.push(1u64));
//!     s.spawn(|| queue.push(2u64));
//!     assert_eq!(3, queue.pop() + queue.pop());
//! });
//! ```

pub mod error;

use crossbeam_utils::CachePadded;
use std::cell::UnsafeCell;
use std::fmt;
use std::hint;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU64, Ordering};

// re-export
pub use error::{Full, Result};

/// Storage cell for a single queued value, arbitrated by a turn counter.
///
/// The turn encodes both the round (`position / capacity`) and an occupancy phase:
/// `round * 2` means empty and writable for this round, `round * 2 + 1` means full and
/// readable. Producers and consumers observe the turn with acquire loads and publish
/// phase changes with release stores, which is the only synchronization the payload needs.
struct Slot<T> {
    turn: AtomicU64,
    value: UnsafeCell<MaybeUninit<T>>,
}

impl<T> Slot<T> {
    const fn empty() -> Self {
        Self {
            turn: AtomicU64::new(0),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    /// Move `value` into the slot.
    ///
    /// ## Safety
    /// The caller must be the producer that claimed this slot for the current round and
    /// the slot must be in the empty phase.
    #[inline]
    unsafe fn write(&self, value: T) {
        unsafe { (*self.value.get()).write(value) };
    }

    /// Move the resident value out of the slot. Does not touch the turn counter, the
    /// caller advances it separately once extraction is complete.
    ///
    /// ## Safety
    /// The caller must be the consumer that claimed this slot for the current round and
    /// the slot must be in the full phase.
    #[inline]
    unsafe fn read(&self) -> T {
        unsafe { (*self.value.get()).assume_init_read() }
    }
}

impl<T> Drop for Slot<T> {
    fn drop(&mut self) {
        // odd turn means a produced but never consumed value is resident
        if *self.turn.get_mut() & 1 == 1 {
            unsafe { self.value.get_mut().assume_init_drop() };
        }
    }
}

/// Bounded lock-free MPMC FIFO queue.
///
/// The queue owns a fixed ring of slots plus two monotonically increasing position
/// counters. A producer claims the next `head` position, spins until the target slot is
/// writable for its round, writes the value and publishes the slot as full. Consumers run
/// the symmetric protocol against `tail`. Handoff is positional: whoever claims logical
/// position `p` on the consumer side receives exactly the value written by the producer
/// that claimed `p`, giving a strict FIFO order over the claim sequence.
///
/// Contention is limited to one atomic increment (or compare-and-swap) per operation on a
/// shared counter. The counters and each slot sit on their own cache lines.
///
/// The blocking operations busy-wait with no upper bound and provide the queue's only
/// backpressure. There is no fairness, timeout or cancellation; callers that need bounded
/// waiting should use the non-blocking variants.
pub struct MpmcQueue<T> {
    buffer: Box<[CachePadded<Slot<T>>]>,
    capacity: usize,
    head: CachePadded<AtomicU64>,
    tail: CachePadded<AtomicU64>,
}

unsafe impl<T: Send> Send for MpmcQueue<T> {}
unsafe impl<T: Send> Sync for MpmcQueue<T> {}

impl<T> MpmcQueue<T> {
    /// Create a queue that can hold up to `capacity` values.
    ///
    /// A requested capacity of `usize::MAX` is reduced by one so the round computation
    /// cannot overflow.
    ///
    /// ## Errors
    /// Returns [`error::Error::InvalidCapacity`] when `capacity` is zero.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity < 1 {
            return Err(error::invalid_capacity(capacity));
        }
        let capacity = capacity.min(usize::MAX - 1);
        let buffer = (0..capacity)
            .map(|_| CachePadded::new(Slot::empty()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Ok(Self {
            buffer,
            capacity,
            head: CachePadded::new(AtomicU64::new(0)),
            tail: CachePadded::new(AtomicU64::new(0)),
        })
    }

    /// Round number of a logical position.
    #[inline]
    const fn turn(&self, position: u64) -> u64 {
        position / self.capacity as u64
    }

    /// Slot backing a logical position.
    #[inline]
    fn slot(&self, position: u64) -> &Slot<T> {
        &self.buffer[(position % self.capacity as u64) as usize]
    }

    /// Claim the next producer position and spin until its slot is writable.
    /// Returns the slot together with its current (empty phase) turn value.
    #[inline]
    fn claim_producer(&self) -> (&Slot<T>, u64) {
        // only uniqueness of the claimed position matters, not prior slot contents
        let head = self.head.fetch_add(1, Ordering::Relaxed);
        let slot = self.slot(head);
        let turn = self.turn(head) * 2;
        while slot.turn.load(Ordering::Acquire) != turn {
            hint::spin_loop();
        }
        (slot, turn)
    }

    /// Attempt to claim the next producer position without blocking.
    #[inline]
    fn try_claim_producer(&self) -> Option<(&Slot<T>, u64)> {
        let mut head = self.head.load(Ordering::Acquire);
        loop {
            let slot = self.slot(head);
            let turn = self.turn(head) * 2;
            if slot.turn.load(Ordering::Acquire) == turn {
                match self
                    .head
                    .compare_exchange(head, head.wrapping_add(1), Ordering::Relaxed, Ordering::Relaxed)
                {
                    Ok(_) => return Some((slot, turn)),
                    Err(current) => head = current,
                }
            } else {
                let prev = head;
                head = self.head.load(Ordering::Acquire);
                // no other producer or consumer made progress, the queue is full right now
                if head == prev {
                    return None;
                }
            }
        }
    }

    /// Claim the next consumer position and spin until its slot is readable.
    #[inline]
    fn claim_consumer(&self) -> (&Slot<T>, u64) {
        let tail = self.tail.fetch_add(1, Ordering::Relaxed);
        let slot = self.slot(tail);
        let turn = self.turn(tail) * 2 + 1;
        while slot.turn.load(Ordering::Acquire) != turn {
            hint::spin_loop();
        }
        (slot, turn)
    }

    /// Attempt to claim the next consumer position without blocking.
    #[inline]
    fn try_claim_consumer(&self) -> Option<(&Slot<T>, u64)> {
        let mut tail = self.tail.load(Ordering::Acquire);
        loop {
            let slot = self.slot(tail);
            let turn = self.turn(tail) * 2 + 1;
            if slot.turn.load(Ordering::Acquire) == turn {
                match self
                    .tail
                    .compare_exchange(tail, tail.wrapping_add(1), Ordering::Relaxed, Ordering::Relaxed)
                {
                    Ok(_) => return Some((slot, turn)),
                    Err(current) => tail = current,
                }
            } else {
                let prev = tail;
                tail = self.tail.load(Ordering::Acquire);
                if tail == prev {
                    return None;
                }
            }
        }
    }

    /// Add a value to the queue, spinning until a slot becomes available.
    #[inline]
    pub fn push(&self, value: T) {
        let (slot, turn) = self.claim_producer();
        unsafe { slot.write(value) };
        slot.turn.store(turn + 1, Ordering::Release);
    }

    /// Add a value produced by `make`, spinning until a slot becomes available. The value
    /// is constructed only once its slot has been claimed and is writable.
    ///
    /// `make` must not panic. A panic between claiming a slot and publishing its turn
    /// leaves the slot permanently desynchronized.
    #[inline]
    pub fn push_with<F: FnOnce() -> T>(&self, make: F) {
        let (slot, turn) = self.claim_producer();
        unsafe { slot.write(make()) };
        slot.turn.store(turn + 1, Ordering::Release);
    }

    /// Attempt to add a value without blocking. When every slot is occupied the value is
    /// handed back inside [`Full`].
    /// ## Examples
    /// ```
    /// use turnq::MpmcQueue;
    ///
    /// let queue = MpmcQueue::new(1).unwrap();
    /// assert!(queue.try_push(1).is_ok());
    /// assert_eq!(2, queue.try_push(2).unwrap_err().into_inner());
    /// ```
    #[inline]
    pub fn try_push(&self, value: T) -> std::result::Result<(), Full<T>> {
        match self.try_claim_producer() {
            Some((slot, turn)) => {
                unsafe { slot.write(value) };
                slot.turn.store(turn + 1, Ordering::Release);
                Ok(())
            }
            None => Err(Full(value)),
        }
    }

    /// Attempt to add a value produced by `make` without blocking. When the queue is full
    /// the closure is handed back uninvoked.
    ///
    /// `make` must not panic, see [`MpmcQueue::push_with`].
    #[inline]
    pub fn try_push_with<F: FnOnce() -> T>(&self, make: F) -> std::result::Result<(), F> {
        match self.try_claim_producer() {
            Some((slot, turn)) => {
                unsafe { slot.write(make()) };
                slot.turn.store(turn + 1, Ordering::Release);
                Ok(())
            }
            None => Err(make),
        }
    }

    /// Remove the value at the front of the queue, spinning until one becomes available.
    #[inline]
    pub fn pop(&self) -> T {
        let (slot, turn) = self.claim_consumer();
        let value = unsafe { slot.read() };
        // the slot is now empty for the next round
        slot.turn.store(turn + 1, Ordering::Release);
        value
    }

    /// Attempt to remove the value at the front of the queue without blocking.
    #[inline]
    pub fn try_pop(&self) -> Option<T> {
        let (slot, turn) = self.try_claim_consumer()?;
        let value = unsafe { slot.read() };
        slot.turn.store(turn + 1, Ordering::Release);
        Some(value)
    }

    /// Approximate number of values in the queue.
    ///
    /// `head` and `tail` are loaded independently, so under concurrent activity the result
    /// can be stale or momentarily inconsistent. It can also be negative while blocked
    /// consumers hold claims on positions that have not been produced yet. Wraparound of
    /// the underlying counters is corrected algebraically, in the steady state the result
    /// stays within `[0, capacity]`.
    #[inline]
    pub fn size(&self) -> i64 {
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Acquire);
        head.wrapping_sub(tail) as i64
    }

    /// True when [`MpmcQueue::size`] reports no queued values. Approximate, like `size`.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size() <= 0
    }

    /// Fixed capacity chosen at construction.
    #[inline]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T> fmt::Debug for MpmcQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MpmcQueue")
            .field("capacity", &self.capacity)
            .field("size", &self.size())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering::SeqCst};
    use std::thread;

    #[test]
    fn should_reject_zero_capacity() {
        assert_eq!(Error::InvalidCapacity(0), MpmcQueue::<u64>::new(0).unwrap_err());
        assert!(MpmcQueue::<u64>::new(1).is_ok());
    }

    #[test]
    fn should_saturate_single_slot() {
        let queue = MpmcQueue::new(1).unwrap();
        assert_eq!(1, queue.capacity());

        assert!(queue.try_push(1).is_ok());
        assert_eq!(1, queue.size());
        assert!(!queue.is_empty());

        assert!(queue.try_push(2).is_err());
        assert_eq!(1, queue.size());

        assert_eq!(Some(1), queue.try_pop());
        assert_eq!(0, queue.size());
        assert!(queue.is_empty());

        assert_eq!(None, queue.try_pop());
        assert_eq!(0, queue.size());
    }

    #[test]
    fn should_hand_back_value_when_full() {
        let queue = MpmcQueue::new(1).unwrap();
        queue.push("first".to_string());
        let rejected = queue.try_push("second".to_string()).unwrap_err();
        assert_eq!("second", rejected.into_inner());
        assert_eq!("first", queue.pop());
    }

    #[test]
    fn should_preserve_fifo_order() {
        let queue = MpmcQueue::new(4).unwrap();
        for i in 0..4 {
            assert!(queue.try_push(i).is_ok());
        }
        for i in 0..4 {
            assert_eq!(Some(i), queue.try_pop());
        }
        assert_eq!(None, queue.try_pop());
    }

    #[test]
    fn should_reuse_slots_across_rounds() {
        let queue = MpmcQueue::new(3).unwrap();
        // many full passes through a small ring
        for i in 0..99u64 {
            queue.push(i);
            assert_eq!(i, queue.pop());
        }
        for round in 0..33u64 {
            for i in 0..3 {
                queue.push(round * 3 + i);
            }
            for i in 0..3 {
                assert_eq!(Some(round * 3 + i), queue.try_pop());
            }
        }
    }

    #[test]
    fn should_preserve_fifo_order_across_threads() {
        const COUNT: u64 = 10_000;
        let queue = MpmcQueue::new(64).unwrap();
        thread::scope(|s| {
            s.spawn(|| {
                for i in 0..COUNT {
                    queue.push(i);
                }
            });
            s.spawn(|| {
                for expected in 0..COUNT {
                    assert_eq!(expected, queue.pop());
                }
            });
        });
        assert!(queue.is_empty());
    }

    #[test]
    fn should_deliver_every_value_exactly_once() {
        const NUM_OPS: u64 = 1000;
        const NUM_THREADS: u64 = 10;
        let queue = MpmcQueue::new(NUM_THREADS as usize).unwrap();
        let sum = AtomicU64::new(0);
        thread::scope(|s| {
            for i in 0..NUM_THREADS {
                let queue = &queue;
                s.spawn(move || {
                    for j in (i..NUM_OPS).step_by(NUM_THREADS as usize) {
                        queue.push(j);
                    }
                });
            }
            for _ in 0..NUM_THREADS {
                s.spawn(|| {
                    let mut thread_sum = 0;
                    for _ in (0..NUM_OPS).step_by(NUM_THREADS as usize) {
                        thread_sum += queue.pop();
                    }
                    sum.fetch_add(thread_sum, SeqCst);
                });
            }
        });
        assert_eq!(NUM_OPS * (NUM_OPS - 1) / 2, sum.load(SeqCst));
        assert!(queue.is_empty());
    }

    #[test]
    fn should_support_move_only_type() {
        let queue = MpmcQueue::new(16).unwrap();
        queue.push(Box::new(1u64));
        assert!(queue.try_push(Box::new(2u64)).is_ok());
        queue.push_with(|| Box::new(3u64));
        assert!(queue.try_push_with(|| Box::new(4u64)).is_ok());

        assert_eq!(1, *queue.pop());
        assert_eq!(2, *queue.try_pop().unwrap());
        assert_eq!(3, *queue.pop());
        assert_eq!(4, *queue.try_pop().unwrap());
        assert!(queue.try_pop().is_none());
    }

    #[test]
    fn should_support_clone_only_values() {
        #[derive(Clone, Debug, PartialEq)]
        struct Tag(String);

        let queue = MpmcQueue::new(16).unwrap();
        let value = Tag("tag".to_string());
        // lvalue call shapes clone at the call site
        queue.push(value.clone());
        assert!(queue.try_push(value.clone()).is_ok());
        // by-value call shapes move
        queue.push(Tag("moved".to_string()));
        assert!(queue.try_push(Tag("moved".to_string())).is_ok());

        assert_eq!(value, queue.pop());
        assert_eq!(value, queue.pop());
        assert_eq!(Tag("moved".to_string()), queue.pop());
        assert_eq!(Tag("moved".to_string()), queue.pop());
    }

    #[test]
    fn should_emplace_with_closure() {
        let queue = MpmcQueue::new(1).unwrap();
        queue.push_with(|| vec![1, 2, 3]);
        // full queue hands the closure back uninvoked
        assert!(queue.try_push_with(|| vec![4, 5, 6]).is_err());
        assert_eq!(Some(vec![1, 2, 3]), queue.try_pop());
    }

    #[test]
    fn should_drop_resident_values_exactly_once() {
        struct Counted(Arc<AtomicUsize>);
        impl Drop for Counted {
            fn drop(&mut self) {
                self.0.fetch_add(1, SeqCst);
            }
        }

        let drops = Arc::new(AtomicUsize::new(0));
        let queue = MpmcQueue::new(4).unwrap();
        for _ in 0..3 {
            queue.push(Counted(drops.clone()));
        }

        // consuming one value drops it, the other two stay resident
        drop(queue.pop());
        assert_eq!(1, drops.load(SeqCst));

        drop(queue);
        assert_eq!(3, drops.load(SeqCst));
    }

    #[test]
    fn should_not_drop_consumed_slots_on_teardown() {
        struct Counted(Arc<AtomicUsize>);
        impl Drop for Counted {
            fn drop(&mut self) {
                self.0.fetch_add(1, SeqCst);
            }
        }

        let drops = Arc::new(AtomicUsize::new(0));
        let queue = MpmcQueue::new(2).unwrap();
        queue.push(Counted(drops.clone()));
        queue.push(Counted(drops.clone()));
        drop(queue.pop());
        drop(queue.pop());
        assert_eq!(2, drops.load(SeqCst));

        drop(queue);
        assert_eq!(2, drops.load(SeqCst));
    }

    #[test]
    fn should_report_approximate_size() {
        let queue = MpmcQueue::new(4).unwrap();
        assert_eq!(0, queue.size());
        assert!(queue.is_empty());

        for i in 0..4 {
            queue.push(i);
            assert_eq!(i + 1, queue.size());
        }
        assert!(queue.try_push(99).is_err());

        assert_eq!(Some(0), queue.try_pop());
        assert_eq!(3, queue.size());
        assert!(queue.try_push(99).is_ok());
        assert_eq!(4, queue.size());
    }

    #[test]
    fn should_report_negative_size_for_waiting_consumer() {
        let queue = MpmcQueue::new(2).unwrap();
        thread::scope(|s| {
            let waiter = s.spawn(|| queue.pop());
            // give the consumer a chance to claim a position ahead of any producer
            thread::sleep(std::time::Duration::from_millis(50));
            assert!(queue.size() <= 0);
            assert!(queue.is_empty());
            queue.push(7u64);
            assert_eq!(7, waiter.join().unwrap());
        });
    }
}
