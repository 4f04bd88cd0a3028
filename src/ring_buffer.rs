/// Fixed-capacity circular byte store holding the most recent output.
///
/// Storage is allocated once at construction and never grows. Writing into a
/// full buffer overwrites the oldest byte. `front` is the oldest byte, `back`
/// is the next write position; both stay in `[0, capacity)`.
#[derive(Debug)]
pub struct RingBuffer {
    storage: Box<[u8]>,
    front: usize,
    back: usize,
    // front == back is ambiguous between empty and full.
    full: bool,
}

impl RingBuffer {
    /// Create an empty buffer. Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring buffer capacity must be non-zero");
        Self {
            storage: vec![0u8; capacity].into_boxed_slice(),
            front: 0,
            back: 0,
            full: false,
        }
    }

    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Number of bytes currently retained (`min(total_written, capacity)`).
    pub fn len(&self) -> usize {
        if self.full {
            self.capacity()
        } else {
            (self.back + self.capacity() - self.front) % self.capacity()
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.full && self.front == self.back
    }

    /// Append one byte, discarding the oldest one if the buffer is full.
    pub fn push(&mut self, byte: u8) {
        let capacity = self.capacity();
        self.storage[self.back] = byte;
        self.back = (self.back + 1) % capacity;
        if self.full {
            self.front = self.back;
        } else if self.back == self.front {
            self.full = true;
        }
    }

    /// The logical content as two segments, oldest first.
    ///
    /// The second segment is empty unless the content wraps past the end of
    /// the storage.
    pub fn as_slices(&self) -> (&[u8], &[u8]) {
        if self.is_empty() {
            (&[], &[])
        } else if self.front < self.back {
            (&self.storage[self.front..self.back], &[])
        } else {
            (&self.storage[self.front..], &self.storage[..self.back])
        }
    }

    /// Copy the logical content into one contiguous buffer of exactly
    /// `len()` bytes, in write order.
    ///
    /// The allocation is fallible so a report can be skipped instead of
    /// aborting the process when memory is exhausted.
    pub fn linearize(&self) -> Result<Vec<u8>, std::collections::TryReserveError> {
        let (head, tail) = self.as_slices();
        let mut out = Vec::new();
        out.try_reserve_exact(head.len() + tail.len())?;
        out.extend_from_slice(head);
        out.extend_from_slice(tail);
        Ok(out)
    }
}
