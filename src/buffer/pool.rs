use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, PoisonError};

use super::OutputBuffer;

/// Free list of response buffers.
///
/// Buffers keep their capacity between uses; at most `max_pooled` are kept,
/// extra ones are dropped on release.
pub struct BufferPool {
    free: Mutex<Vec<Vec<u8>>>,
    capacity: usize,
    max_pooled: usize,
}

impl BufferPool {
    pub fn new(capacity: usize, max_pooled: usize) -> Arc<Self> {
        Arc::new(Self {
            free: Mutex::new(Vec::with_capacity(max_pooled)),
            capacity,
            max_pooled,
        })
    }

    pub fn acquire(self: &Arc<Self>) -> PooledBuffer {
        let buf = self
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(self.capacity));

        PooledBuffer {
            buffer: Some(OutputBuffer::from_vec(buf)),
            pool: self.clone(),
        }
    }

    pub fn num_free(&self) -> usize {
        self.free.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn release(&self, mut buf: Vec<u8>) {
        buf.clear();

        let mut free = self.free.lock().unwrap_or_else(PoisonError::into_inner);
        if free.len() < self.max_pooled {
            free.push(buf);
        }
    }
}

/// Buffer on loan from a [`BufferPool`]; returned when dropped.
pub struct PooledBuffer {
    buffer: Option<OutputBuffer>,
    pool: Arc<BufferPool>,
}

impl Deref for PooledBuffer {
    type Target = OutputBuffer;

    fn deref(&self) -> &OutputBuffer {
        // Only None inside drop
        self.buffer.as_ref().expect("pooled buffer already released")
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut OutputBuffer {
        self.buffer.as_mut().expect("pooled buffer already released")
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.pool.release(buffer.into_vec());
        }
    }
}
