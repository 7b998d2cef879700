//! Fixed-capacity circular byte storage.
//!
//! Writes copy as much as fits and reads remove up to what is stored, like
//! a kernel kfifo. The ring never grows and never blocks; callers do their
//! own waiting and locking.

pub struct ByteRing {
    buf: Box<[u8]>,
    head: usize,
    len: usize,
}

impl ByteRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0; capacity].into_boxed_slice(),
            head: 0,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Free space in bytes.
    pub fn avail(&self) -> usize {
        self.capacity() - self.len
    }

    /// Occupancy as a whole percentage of capacity, rounded down.
    pub fn percent_full(&self) -> usize {
        if self.capacity() == 0 {
            return 100;
        }
        self.len * 100 / self.capacity()
    }

    /// Copies in as many bytes of `data` as fit. Returns the count copied.
    pub fn push(&mut self, data: &[u8]) -> usize {
        let count = data.len().min(self.avail());
        let cap = self.capacity();
        let tail = (self.head + self.len) % cap.max(1);
        let first = count.min(cap - tail);
        self.buf[tail..tail + first].copy_from_slice(&data[..first]);
        self.buf[..count - first].copy_from_slice(&data[first..count]);
        self.len += count;
        count
    }

    /// Removes up to `max` bytes from the front.
    pub fn pop(&mut self, max: usize) -> Vec<u8> {
        let count = max.min(self.len);
        let mut out = Vec::with_capacity(count);
        let cap = self.capacity();
        let first = count.min(cap - self.head);
        out.extend_from_slice(&self.buf[self.head..self.head + first]);
        out.extend_from_slice(&self.buf[..count - first]);
        self.head = (self.head + count) % cap.max(1);
        self.len -= count;
        if self.len == 0 {
            self.head = 0;
        }
        out
    }

    pub fn take_all(&mut self) -> Vec<u8> {
        self.pop(self.len)
    }

    pub fn reset(&mut self) {
        self.head = 0;
        self.len = 0;
    }
}
