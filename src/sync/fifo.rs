use std::{
    cell::UnsafeCell,
    mem::MaybeUninit,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use crossbeam_utils::CachePadded;

// -------------------------------------------------------------------------------------------------

/// Create a new bounded single producer, single consumer FIFO with `N` slots.
///
/// `N` must be a power of two. One slot is always kept empty to distinguish a full from an
/// empty queue, so the FIFO holds at most `N - 1` items.
pub fn fifo<T: Send, const N: usize>() -> (FifoProducer<T, N>, FifoConsumer<T, N>) {
    let shared = Arc::new(LockFreeFifo::<T, N>::new());
    (
        FifoProducer {
            fifo: Arc::clone(&shared),
        },
        FifoConsumer { fifo: shared },
    )
}

// -------------------------------------------------------------------------------------------------

struct LockFreeFifo<T, const N: usize> {
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
    /// Next slot to read. Only modified by the consumer.
    head: CachePadded<AtomicUsize>,
    /// Next slot to write. Only modified by the producer.
    tail: CachePadded<AtomicUsize>,
}

// SAFETY: a slot is written by the producer only while it's outside of head..tail, and read by
// the consumer only while it's inside. Ownership moves with the release/acquire index stores.
unsafe impl<T: Send, const N: usize> Sync for LockFreeFifo<T, N> {}
unsafe impl<T: Send, const N: usize> Send for LockFreeFifo<T, N> {}

impl<T, const N: usize> LockFreeFifo<T, N> {
    const _VERIFY_N: () = assert!(
        N.is_power_of_two() && N >= 2,
        "FIFO size must be a pow2 value >= 2"
    );
    const MASK: usize = N - 1;

    fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let _ = Self::_VERIFY_N;
        let slots = (0..N)
            .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            slots,
            head: CachePadded::new(AtomicUsize::new(0)),
            tail: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    fn len(&self) -> usize {
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Acquire);
        tail.wrapping_sub(head) & Self::MASK
    }
}

impl<T, const N: usize> Drop for LockFreeFifo<T, N> {
    fn drop(&mut self) {
        let tail = *self.tail.get_mut();
        let mut head = *self.head.get_mut();
        while head != tail {
            // SAFETY: all slots in head..tail are initialized
            unsafe { self.slots[head].get_mut().assume_init_drop() };
            head = (head + 1) & Self::MASK;
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Producer side of a [`fifo`].
pub struct FifoProducer<T, const N: usize> {
    fifo: Arc<LockFreeFifo<T, N>>,
}

impl<T, const N: usize> FifoProducer<T, N> {
    /// Max number of items the FIFO can hold.
    pub const fn capacity(&self) -> usize {
        N - 1
    }

    /// Number of items which currently are queued.
    pub fn len(&self) -> usize {
        self.fifo.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Try pushing a new item. Never blocks: when the FIFO is full, the item is handed back.
    pub fn push(&mut self, item: T) -> Result<(), T> {
        let fifo = &*self.fifo;
        let tail = fifo.tail.load(Ordering::Relaxed);
        let next = (tail + 1) & LockFreeFifo::<T, N>::MASK;
        if next == fifo.head.load(Ordering::Acquire) {
            return Err(item);
        }
        // SAFETY: the slot at tail is outside of head..tail, so the consumer won't touch it
        unsafe { (*fifo.slots[tail].get()).write(item) };
        fifo.tail.store(next, Ordering::Release);
        Ok(())
    }
}

// -------------------------------------------------------------------------------------------------

/// Consumer side of a [`fifo`].
pub struct FifoConsumer<T, const N: usize> {
    fifo: Arc<LockFreeFifo<T, N>>,
}

impl<T, const N: usize> FifoConsumer<T, N> {
    /// Max number of items the FIFO can hold.
    pub const fn capacity(&self) -> usize {
        N - 1
    }

    /// Number of items which currently are queued.
    pub fn len(&self) -> usize {
        self.fifo.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Try popping the oldest item. Returns `None` when the FIFO is empty.
    pub fn pop(&mut self) -> Option<T> {
        let fifo = &*self.fifo;
        let head = fifo.head.load(Ordering::Relaxed);
        if head == fifo.tail.load(Ordering::Acquire) {
            return None;
        }
        // SAFETY: the slot at head got fully written before tail was released
        let item = unsafe { (*fifo.slots[head].get()).assume_init_read() };
        fifo.head
            .store((head + 1) & LockFreeFifo::<T, N>::MASK, Ordering::Release);
        Some(item)
    }
}

impl<T, const N: usize> Iterator for FifoConsumer<T, N> {
    type Item = T;

    fn next(&mut self) -> Option<Self::Item> {
        self.pop()
    }
}

// -------------------------------------------------------------------------------------------------
