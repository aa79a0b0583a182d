//! Object pools for heavyweight media buffers.
//!
//! Allocating native packets and frames is expensive; the runtime
//! recycles them instead. A pool hands out [`Pooled`] guards: the buffer
//! is yours until the guard drops, at which point it is unreferenced and
//! pushed back onto the free list.
//!
//! Pools are unbounded: they grow to the pipeline's working set and never
//! shrink during execution. During execution the accounting invariant
//! `allocated == live + free` holds; teardown (via the workflow
//! [`Closer`]) drains the free list so every recycled buffer is freed
//! exactly once.

use crate::closer::Closer;
use crate::error::Result;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// A buffer type that can be recycled through a [`BufferPool`].
pub trait PoolBuffer: Send + Sized + 'static {
    /// Allocate a fresh, unreferenced buffer.
    fn alloc() -> Result<Self>;

    /// Make this buffer a new reference to `src`'s payload, copying its
    /// properties.
    fn ref_from(&mut self, src: &Self) -> Result<()>;

    /// Release the payload reference and reset the properties.
    fn unref(&mut self);
}

/// Point-in-time pool accounting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Total buffers ever allocated by this pool.
    pub allocated: usize,
    /// Buffers currently out on loan.
    pub live: usize,
    /// Buffers waiting on the free list.
    pub free: usize,
}

struct PoolInner<B> {
    free: Mutex<Vec<B>>,
    allocated: AtomicUsize,
    live: AtomicUsize,
}

/// A recycling pool of media buffers.
///
/// Cloning the pool is cheap and shares the underlying free list. All
/// operations are safe under concurrent callers; the order in which
/// recycled buffers come back out is unspecified.
pub struct BufferPool<B: PoolBuffer> {
    inner: Arc<PoolInner<B>>,
}

impl<B: PoolBuffer> BufferPool<B> {
    /// Create a pool and register its teardown with `closer`.
    pub fn new(closer: &Closer) -> Self {
        let inner = Arc::new(PoolInner {
            free: Mutex::new(Vec::new()),
            allocated: AtomicUsize::new(0),
            live: AtomicUsize::new(0),
        });
        let weak: Weak<PoolInner<B>> = Arc::downgrade(&inner);
        closer.add(move || {
            if let Some(inner) = weak.upgrade() {
                inner.free.lock().unwrap().clear();
            }
            Ok(())
        });
        Self { inner }
    }

    /// Get a buffer: recycled if one is free, freshly allocated otherwise.
    ///
    /// Allocation failure propagates; the caller must not enqueue work
    /// for a buffer it did not get.
    pub fn get(&self) -> Result<Pooled<B>> {
        let recycled = self.inner.free.lock().unwrap().pop();
        let buf = match recycled {
            Some(buf) => buf,
            None => {
                let buf = B::alloc()?;
                self.inner.allocated.fetch_add(1, Ordering::Relaxed);
                buf
            }
        };
        self.inner.live.fetch_add(1, Ordering::Relaxed);
        Ok(Pooled {
            buf: Some(buf),
            pool: Arc::clone(&self.inner),
        })
    }

    /// Current accounting.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            allocated: self.inner.allocated.load(Ordering::Relaxed),
            live: self.inner.live.load(Ordering::Relaxed),
            free: self.inner.free.lock().unwrap().len(),
        }
    }
}

impl<B: PoolBuffer> Clone for BufferPool<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: PoolBuffer> std::fmt::Debug for BufferPool<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("BufferPool")
            .field("allocated", &stats.allocated)
            .field("live", &stats.live)
            .field("free", &stats.free)
            .finish()
    }
}

/// A buffer on loan from a [`BufferPool`].
///
/// Derefs to the buffer; on drop the buffer is unreferenced and returned
/// to the pool's free list.
pub struct Pooled<B: PoolBuffer> {
    buf: Option<B>,
    pool: Arc<PoolInner<B>>,
}

impl<B: PoolBuffer> Deref for Pooled<B> {
    type Target = B;

    fn deref(&self) -> &B {
        self.buf.as_ref().expect("pooled buffer already returned")
    }
}

impl<B: PoolBuffer> DerefMut for Pooled<B> {
    fn deref_mut(&mut self) -> &mut B {
        self.buf.as_mut().expect("pooled buffer already returned")
    }
}

impl<B: PoolBuffer> Drop for Pooled<B> {
    fn drop(&mut self) {
        if let Some(mut buf) = self.buf.take() {
            buf.unref();
            self.pool.live.fetch_sub(1, Ordering::Relaxed);
            self.pool.free.lock().unwrap().push(buf);
        }
    }
}

impl<B: PoolBuffer + std::fmt::Debug> std::fmt::Debug for Pooled<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.buf.fmt(f)
    }
}
