//! The driver-thread-to-pipeline-thread boundary: a bounded queue of
//! raw sample blocks with drop-oldest-on-full semantics.
//!
//! Device drivers run on their own callback thread; the pipeline is
//! one synchronous thread. This is the only place those two threads
//! touch, and it must never block the driver thread and never crash
//! the pipeline on overflow.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

struct Inner<T> {
    queue: Mutex<VecDeque<T>>,
    depth: usize,
    dropped: AtomicU64,
}

/// Producer handle, used by the driver thread. Cheap to clone.
#[derive(Clone)]
pub struct QueueProducer<T> {
    inner: Arc<Inner<T>>,
}

/// Consumer handle, owned by the pipeline thread.
pub struct QueueConsumer<T> {
    inner: Arc<Inner<T>>,
}

/// Create a bounded drop-oldest queue of the given depth.
///
/// Depth should be a small integer (2-16); it bounds how much the
/// pipeline can fall behind before old blocks start being discarded.
#[must_use]
pub fn bounded<T>(depth: usize) -> (QueueProducer<T>, QueueConsumer<T>) {
    let inner = Arc::new(Inner {
        queue: Mutex::new(VecDeque::new()),
        depth: depth.max(1),
        dropped: AtomicU64::new(0),
    });
    (
        QueueProducer {
            inner: inner.clone(),
        },
        QueueConsumer { inner },
    )
}

impl<T> QueueProducer<T> {
    /// Push a block. Never blocks: if the queue is full, the oldest
    /// queued block is discarded (incrementing the drop counter) and
    /// this one is pushed in its place.
    pub fn push(&self, val: T) {
        let mut q = self.inner.queue.lock().unwrap();
        while q.len() >= self.inner.depth {
            q.pop_front();
            self.inner.dropped.fetch_add(1, Ordering::Relaxed);
        }
        q.push_back(val);
    }

    /// Number of blocks dropped due to queue overflow.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }
}

impl<T> QueueConsumer<T> {
    /// Pop the oldest available block, without blocking.
    pub fn try_pop(&self) -> Option<T> {
        self.inner.queue.lock().unwrap().pop_front()
    }

    /// Number of blocks dropped due to queue overflow.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }
}
