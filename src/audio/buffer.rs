//! Fixed-capacity ring buffer for PCM audio handoff between threads

use parking_lot::Mutex;

/// Snapshot of a ring buffer's fill statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferUsage {
    /// Capacity in bytes
    pub capacity: usize,
    /// Bytes currently buffered
    pub available: usize,
    /// Highest fill level seen since the last `init`
    pub high_water: usize,
    /// Writes rejected for lack of space since the last `init`
    pub rejected_writes: u64,
}

struct Inner {
    buffer: Box<[u8]>,
    read_pos: usize,
    len: usize,
    high_water: usize,
    rejected_writes: u64,
}

impl Inner {
    fn capacity(&self) -> usize {
        self.buffer.len()
    }
}

/// Circular byte queue with all-or-nothing reads and writes
///
/// Each instance has exactly one producer and one consumer at a time. The
/// capacity is fixed by `init` when the owning stream starts and is never
/// changed while the stream is active.
pub struct RingBuffer {
    inner: Mutex<Inner>,
}

impl RingBuffer {
    /// Create an uninitialized buffer (capacity 0, every write fails)
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Create a buffer with the given capacity in bytes
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                buffer: vec![0u8; capacity].into_boxed_slice(),
                read_pos: 0,
                len: 0,
                high_water: 0,
                rejected_writes: 0,
            }),
        }
    }

    /// Reallocate the storage with a new capacity, discarding all contents
    pub fn init(&self, capacity: usize) {
        let mut inner = self.inner.lock();
        if inner.capacity() != capacity {
            inner.buffer = vec![0u8; capacity].into_boxed_slice();
        }
        inner.read_pos = 0;
        inner.len = 0;
        inner.high_water = 0;
        inner.rejected_writes = 0;
    }

    /// Append `data` to the buffer
    ///
    /// Returns false without writing anything if there is not enough free space.
    pub fn write(&self, data: &[u8]) -> bool {
        let mut inner = self.inner.lock();
        let capacity = inner.capacity();
        if data.len() > capacity - inner.len {
            inner.rejected_writes += 1;
            return false;
        }
        if data.is_empty() {
            return true;
        }

        let write_pos = (inner.read_pos + inner.len) % capacity;
        let first = data.len().min(capacity - write_pos);
        inner.buffer[write_pos..write_pos + first].copy_from_slice(&data[..first]);
        inner.buffer[..data.len() - first].copy_from_slice(&data[first..]);

        inner.len += data.len();
        inner.high_water = inner.high_water.max(inner.len);
        true
    }

    /// Fill `out` completely from the front of the buffer
    ///
    /// Returns false without consuming anything if fewer than `out.len()`
    /// bytes are buffered.
    pub fn read(&self, out: &mut [u8]) -> bool {
        let mut inner = self.inner.lock();
        if out.len() > inner.len {
            return false;
        }
        if out.is_empty() {
            return true;
        }

        let capacity = inner.capacity();
        let read_pos = inner.read_pos;
        let first = out.len().min(capacity - read_pos);
        let rest = out.len() - first;
        out[..first].copy_from_slice(&inner.buffer[read_pos..read_pos + first]);
        out[first..].copy_from_slice(&inner.buffer[..rest]);

        inner.read_pos = (read_pos + out.len()) % capacity;
        inner.len -= out.len();
        true
    }

    /// Bytes available to read
    pub fn available(&self) -> usize {
        self.inner.lock().len
    }

    /// Bytes that can be written without failing
    pub fn free(&self) -> usize {
        let inner = self.inner.lock();
        inner.capacity() - inner.len
    }

    /// Capacity in bytes
    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity()
    }

    /// Drop all buffered data, keeping the capacity
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.read_pos = 0;
        inner.len = 0;
    }

    /// Current fill statistics
    pub fn usage(&self) -> BufferUsage {
        let inner = self.inner.lock();
        BufferUsage {
            capacity: inner.capacity(),
            available: inner.len,
            high_water: inner.high_water,
            rejected_writes: inner.rejected_writes,
        }
    }
}

impl Default for RingBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let usage = self.usage();
        f.debug_struct("RingBuffer")
            .field("capacity", &usage.capacity)
            .field("available", &usage.available)
            .finish()
    }
}
