//! Bounded concurrent FIFO queue with independent head/tail/size locks
//! (spec §2 C1), grounded directly on `AtomicQueue<T>` in
//! `examples/original_source/src/common/utils.h`.
//!
//! The original holds three separate mutexes — one each for the front
//! index, the back index, and the size counter — so that a pusher and a
//! popper acting on opposite ends of a non-full, non-empty queue never
//! contend with each other. Growth (doubling the backing buffer when
//! full) is the one operation that needs all three at once, taken in a
//! fixed order to avoid deadlock against a concurrent grow.

use parking_lot::Mutex;

const INITIAL_CAPACITY: usize = 16;

struct Front {
    index: usize,
}

struct Back {
    index: usize,
}

/// A bounded circular buffer safe for any number of concurrent producers
/// and consumers, doubling its backing storage on demand rather than
/// blocking a full push.
pub struct AtomicQueue<T> {
    buf: Mutex<Vec<Option<T>>>,
    front: Mutex<Front>,
    back: Mutex<Back>,
    size: Mutex<usize>,
}

impl<T> Default for AtomicQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> AtomicQueue<T> {
    /// Create an empty queue with a small initial capacity.
    pub fn new() -> Self {
        let mut buf = Vec::with_capacity(INITIAL_CAPACITY);
        buf.resize_with(INITIAL_CAPACITY, || None);
        AtomicQueue {
            buf: Mutex::new(buf),
            front: Mutex::new(Front { index: 0 }),
            back: Mutex::new(Back { index: 0 }),
            size: Mutex::new(0),
        }
    }

    /// Current number of queued elements.
    pub fn len(&self) -> usize {
        *self.size.lock()
    }

    /// True if the queue currently holds no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Push `item` onto the back of the queue, growing the backing
    /// buffer (doubling) if it is currently full.
    ///
    /// Pushers serialize against each other under `back`+`size` (as the
    /// original does by always taking `back_mutex_` for a push); the
    /// independence this buys is between a pusher and a popper, which
    /// only ever contend on `front`.
    pub fn push(&self, item: T) {
        let mut item = Some(item);
        loop {
            let mut back = self.back.lock();
            let mut size = self.size.lock();
            let cap = self.buf.lock().len();
            if *size >= cap {
                drop(size);
                drop(back);
                self.grow();
                continue;
            }
            let mut buf = self.buf.lock();
            let cap = buf.len();
            buf[back.index] = item.take();
            back.index = (back.index + 1) % cap;
            *size += 1;
            return;
        }
    }

    /// Pop the front element, if any.
    pub fn pop(&self) -> Option<T> {
        let mut front = self.front.lock();
        let mut size = self.size.lock();
        if *size == 0 {
            return None;
        }
        let mut buf = self.buf.lock();
        let cap = buf.len();
        let item = buf[front.index].take();
        front.index = (front.index + 1) % cap;
        *size -= 1;
        item
    }

    /// Peek the front element without removing it (spec §4.1 `front()`).
    pub fn front(&self) -> Option<T>
    where
        T: Clone,
    {
        let front = self.front.lock();
        let size = self.size.lock();
        if *size == 0 {
            return None;
        }
        self.buf.lock()[front.index].clone()
    }

    /// Double the backing buffer, re-linearizing elements so the front
    /// sits at index 0. Takes every lock in front-back-buf order; the
    /// caller must not already hold any of them.
    fn grow(&self) {
        let mut front = self.front.lock();
        let mut back = self.back.lock();
        let mut size = self.size.lock();
        let mut buf = self.buf.lock();

        let old_cap = buf.len();
        if *size < old_cap {
            // Another thread already grew this buffer for us.
            return;
        }

        let new_cap = old_cap * 2;
        let mut new_buf = Vec::with_capacity(new_cap);
        new_buf.resize_with(new_cap, || None);
        for i in 0..*size {
            let src = (front.index + i) % old_cap;
            new_buf[i] = buf[src].take();
        }
        *buf = new_buf;
        front.index = 0;
        back.index = *size;
    }
}
