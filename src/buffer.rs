use core::borrow::BorrowMut;

/// A fixed-capacity byte FIFO over a borrowed store.
///
/// `head` points at the next byte to read, `len` is the number of bytes stored. The write position
/// is implicit: `(head + len) % capacity`.
///
/// invariants: 0 <= len <= store.len(), head < store.len() (or 0 for an empty store)
pub struct RingBuffer<S: BorrowMut<[u8]>> {
    store: S,
    head: usize,
    len: usize,
}

impl<S: BorrowMut<[u8]>> RingBuffer<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            head: 0,
            len: 0,
        }
    }

    // Clears the buffer
    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }

    pub fn capacity(&self) -> usize {
        self.store.borrow().len()
    }

    // Amount of bytes available for reading
    pub fn len(&self) -> usize {
        self.len
    }

    // Amount of space in bytes available for writing
    pub fn available_write(&self) -> usize {
        self.capacity() - self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    /// Appends one byte. Returns `false` and drops the byte if the buffer is full.
    pub fn push(&mut self, byte: u8) -> bool {
        if self.is_full() {
            return false;
        }

        let cap = self.capacity();
        let wpos = (self.head + self.len) % cap;
        self.store.borrow_mut()[wpos] = byte;
        self.len += 1;
        true
    }

    /// Removes and returns the oldest byte.
    pub fn pop(&mut self) -> Option<u8> {
        if self.is_empty() {
            return None;
        }

        let byte = self.store.borrow()[self.head];
        self.head = (self.head + 1) % self.capacity();
        self.len -= 1;
        Some(byte)
    }

    /// Copies up to `out.len()` of the oldest bytes into `out` without consuming them and returns
    /// the number of bytes copied.
    pub fn peek_into(&self, out: &mut [u8]) -> usize {
        let count = core::cmp::min(out.len(), self.len);
        if count == 0 {
            return 0;
        }

        let data = self.store.borrow();
        let first = core::cmp::min(count, data.len() - self.head);
        out[..first].copy_from_slice(&data[self.head..self.head + first]);
        out[first..count].copy_from_slice(&data[..count - first]);
        count
    }

    /// Drops up to `count` of the oldest bytes.
    pub fn discard(&mut self, count: usize) {
        let count = core::cmp::min(count, self.len);
        if count == 0 {
            return;
        }

        self.head = (self.head + count) % self.capacity();
        self.len -= count;
    }

    /// Releases the backing store.
    pub fn into_store(self) -> S {
        self.store
    }
}
