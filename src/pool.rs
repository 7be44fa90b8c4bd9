//! Bounded, fairness-preserving buffer pools.
//!
//! A [`FixedBufferPool`] keeps buffers of one "poolable size" on a free
//! list for fast reuse and tracks the rest of its budget as unallocated
//! bytes. When the budget is exhausted, callers block on a FIFO waiter
//! queue: all freed memory goes to the longest-waiting caller until it is
//! satisfied, which keeps large requests from starving behind a stream of
//! small ones.
//!
//! [`BufferPoolAllocator`] stacks fixed pools into an ascending ladder of
//! size classes and routes each request to the smallest class that fits.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::trace;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("requested size {0} is not a valid allocation")]
    InvalidSize(usize),

    #[error("requested {requested} bytes but the pool budget is {total_memory}")]
    ExceedsCapacity { requested: usize, total_memory: usize },

    #[error("no size class can hold {0} bytes")]
    NoFittingClass(usize),

    #[error("failed to allocate {requested} bytes within {waited_ms} ms")]
    Timeout { requested: usize, waited_ms: u64 },
}

struct PoolInner {
    /// Recycled buffers of exactly `poolable_size` bytes.
    free: VecDeque<Box<[u8]>>,
    /// Budget bytes neither in `free` nor held by callers.
    non_pooled_available: usize,
    /// Blocked callers in arrival order; each owns its own condvar so
    /// only the queue head can be woken.
    waiters: VecDeque<Arc<Condvar>>,
}

/// A pool of buffers kept under a fixed memory budget.
///
/// Invariant: `total_memory == non_pooled_available
/// + free.len() * poolable_size + bytes held by callers`.
pub struct FixedBufferPool {
    poolable_size: usize,
    total_memory: usize,
    inner: Mutex<PoolInner>,
}

impl FixedBufferPool {
    pub fn new(total_memory: usize, poolable_size: usize) -> Self {
        Self {
            poolable_size,
            total_memory,
            inner: Mutex::new(PoolInner {
                free: VecDeque::new(),
                non_pooled_available: total_memory,
                waiters: VecDeque::new(),
            }),
        }
    }

    pub fn poolable_size(&self) -> usize {
        self.poolable_size
    }

    pub fn total_memory(&self) -> usize {
        self.total_memory
    }

    /// Free memory, both unallocated and on the free list.
    pub fn available_memory(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.non_pooled_available + inner.free.len() * self.poolable_size
    }

    /// Budget bytes not on the free list and not held by callers.
    pub fn unallocated_memory(&self) -> usize {
        self.inner.lock().unwrap().non_pooled_available
    }

    /// Callers currently blocked waiting for memory.
    pub fn queued(&self) -> usize {
        self.inner.lock().unwrap().waiters.len()
    }

    /// Allocate a buffer of exactly `size` bytes, blocking up to
    /// `max_block` if the pool is exhausted.
    ///
    /// A timeout is a hard failure: any partially reserved memory is
    /// returned to the pool before the error surfaces.
    pub fn allocate(&self, size: usize, max_block: Duration) -> Result<Box<[u8]>, PoolError> {
        if size == 0 {
            return Err(PoolError::InvalidSize(size));
        }
        if size > self.total_memory {
            return Err(PoolError::ExceedsCapacity {
                requested: size,
                total_memory: self.total_memory,
            });
        }

        let mut inner = self.inner.lock().unwrap();

        // Fast path: an exact-size recycled buffer.
        if size == self.poolable_size {
            if let Some(buf) = inner.free.pop_front() {
                Self::signal_next(&mut inner);
                return Ok(buf);
            }
        }

        let free_list_bytes = inner.free.len() * self.poolable_size;
        if inner.non_pooled_available + free_list_bytes >= size {
            // Enough free memory on hand; evict recycled buffers until the
            // unallocated counter alone covers the request.
            Self::free_up(&mut inner, size);
            inner.non_pooled_available -= size;
            Self::signal_next(&mut inner);
            return Ok(vec![0u8; size].into_boxed_slice());
        }

        // Out of memory: join the FIFO queue and accumulate freed bytes
        // across wake-ups until the request is covered or time runs out.
        let deadline = Instant::now() + max_block;
        let cond = Arc::new(Condvar::new());
        inner.waiters.push_back(Arc::clone(&cond));

        let mut accumulated: usize = 0;
        let mut buffer: Option<Box<[u8]>> = None;

        while buffer.is_none() && accumulated < size {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let (guard, timeout) = cond
                .wait_timeout(inner, deadline - now)
                .unwrap();
            inner = guard;
            trace!(size, accumulated, "pool waiter woke");

            if timeout.timed_out() {
                break;
            }

            if accumulated == 0 && size == self.poolable_size {
                if let Some(buf) = inner.free.pop_front() {
                    buffer = Some(buf);
                    continue;
                }
            }

            // Take whatever is available now; the rest comes on later
            // wake-ups.
            Self::free_up(&mut inner, size - accumulated);
            let got = (size - accumulated).min(inner.non_pooled_available);
            inner.non_pooled_available -= got;
            accumulated += got;
        }

        Self::remove_waiter(&mut inner, &cond);

        if buffer.is_none() && accumulated < size {
            // Timed out: roll back the partial reservation.
            inner.non_pooled_available += accumulated;
            Self::signal_next(&mut inner);
            return Err(PoolError::Timeout {
                requested: size,
                waited_ms: max_block.as_millis() as u64,
            });
        }

        Self::signal_next(&mut inner);
        drop(inner);

        Ok(buffer.unwrap_or_else(|| vec![0u8; size].into_boxed_slice()))
    }

    /// Return a buffer to the pool. Exact poolable-size buffers are
    /// cleared and recycled; any other size just credits the unallocated
    /// counter. One waiter is signalled either way.
    pub fn deallocate(&self, mut buffer: Box<[u8]>) {
        let mut inner = self.inner.lock().unwrap();
        if buffer.len() == self.poolable_size {
            buffer.fill(0);
            inner.free.push_back(buffer);
        } else {
            inner.non_pooled_available += buffer.len();
        }
        if let Some(head) = inner.waiters.front() {
            head.notify_one();
        }
    }

    /// Evict free-list buffers until the unallocated counter reaches
    /// `size` (or the free list runs dry). Newest recycled buffers go
    /// first, mirroring LIFO eviction.
    fn free_up(inner: &mut PoolInner, size: usize) {
        while inner.non_pooled_available < size {
            match inner.free.pop_back() {
                Some(buf) => inner.non_pooled_available += buf.len(),
                None => break,
            }
        }
    }

    /// Wake the queue head if any memory is left over for it.
    fn signal_next(inner: &mut PoolInner) {
        if inner.non_pooled_available == 0 && inner.free.is_empty() {
            return;
        }
        if let Some(head) = inner.waiters.front() {
            head.notify_one();
        }
    }

    fn remove_waiter(inner: &mut PoolInner, cond: &Arc<Condvar>) {
        if let Some(pos) = inner.waiters.iter().position(|w| Arc::ptr_eq(w, cond)) {
            inner.waiters.remove(pos);
        }
    }
}

/// One rung of the size-class ladder.
#[derive(Debug, Clone, Copy)]
pub struct SizeClass {
    pub poolable_size: usize,
    pub total_memory: usize,
}

const KB: usize = 1024;
const MB: usize = 1024 * 1024;

/// Fixed ascending ladder; budgets grow with the chunk size so a single
/// oversized request cannot drain the small-buffer classes.
pub const SIZE_CLASSES: [SizeClass; 11] = [
    SizeClass { poolable_size: 256, total_memory: 16 * MB },
    SizeClass { poolable_size: 512, total_memory: 16 * MB },
    SizeClass { poolable_size: KB, total_memory: 16 * MB },
    SizeClass { poolable_size: 2 * KB, total_memory: 16 * MB },
    SizeClass { poolable_size: 4 * KB, total_memory: 16 * MB },
    SizeClass { poolable_size: 8 * KB, total_memory: 16 * MB },
    SizeClass { poolable_size: 16 * KB, total_memory: 16 * MB },
    SizeClass { poolable_size: MB, total_memory: 16 * MB },
    SizeClass { poolable_size: 16 * MB, total_memory: 128 * MB },
    SizeClass { poolable_size: 32 * MB, total_memory: 128 * MB },
    SizeClass { poolable_size: 64 * MB, total_memory: 256 * MB },
];

/// Snapshot of one class, for status logging.
#[derive(Debug, Clone, Copy)]
pub struct PoolStatus {
    pub poolable_size: usize,
    pub total_memory: usize,
    pub available_memory: usize,
    pub unallocated_memory: usize,
    pub queued: usize,
}

/// Tiered allocator over the size-class ladder.
pub struct BufferPoolAllocator {
    pools: Vec<FixedBufferPool>,
}

impl BufferPoolAllocator {
    pub fn new() -> Self {
        Self::with_classes(&SIZE_CLASSES)
    }

    pub fn with_classes(classes: &[SizeClass]) -> Self {
        let pools = classes
            .iter()
            .map(|c| FixedBufferPool::new(c.total_memory, c.poolable_size))
            .collect();
        Self { pools }
    }

    /// Allocate from the smallest class whose poolable size covers
    /// `size`. A request no class can hold fails immediately.
    pub fn allocate(&self, size: usize, max_block: Duration) -> Result<Box<[u8]>, PoolError> {
        if size == 0 {
            return Err(PoolError::InvalidSize(size));
        }
        let pool = self
            .pool_for(size)
            .ok_or(PoolError::NoFittingClass(size))?;
        pool.allocate(size, max_block)
    }

    /// Return a buffer to the class it was allocated from.
    pub fn release(&self, buffer: Box<[u8]>) {
        if let Some(pool) = self.pool_for(buffer.len()) {
            pool.deallocate(buffer);
        }
    }

    pub fn status(&self) -> Vec<PoolStatus> {
        self.pools
            .iter()
            .map(|p| PoolStatus {
                poolable_size: p.poolable_size(),
                total_memory: p.total_memory(),
                available_memory: p.available_memory(),
                unallocated_memory: p.unallocated_memory(),
                queued: p.queued(),
            })
            .collect()
    }

    fn pool_for(&self, size: usize) -> Option<&FixedBufferPool> {
        self.pools.iter().find(|p| p.poolable_size() >= size)
    }
}

impl Default for BufferPoolAllocator {
    fn default() -> Self {
        Self::new()
    }
}
