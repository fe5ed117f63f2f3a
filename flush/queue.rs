// This file is part of Moonfire NVR, a security camera network video recorder.
// Copyright (C) 2025 The Moonfire NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! C1: a min-heap of pending flush operations with blocking dequeue,
//! key-based de-duplication, and a `close` that wakes every waiter.

use crate::op::FlushOp;
use base::FastHashSet;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

/// Wraps a [`FlushOp`] for placement in a max-heap that should return the
/// op with the *smallest* `from_time` first: greater than another iff its
/// priority is less than the other's. Mirrors the inverted-heap trick the
/// directory syncer uses for its planned-flush heap.
struct QueuedOp(FlushOp);

impl Ord for QueuedOp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.priority().cmp(&other.0.priority())
    }
}
impl PartialOrd for QueuedOp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl PartialEq for QueuedOp {
    fn eq(&self, other: &Self) -> bool {
        self.0.priority() == other.0.priority()
    }
}
impl Eq for QueuedOp {}

struct Inner {
    heap: BinaryHeap<QueuedOp>,
    /// Keys of ops currently in `heap`, so a re-enqueue of an equal-key op
    /// is a silent no-op (spec §4.1).
    keys: FastHashSet<String>,
    closed: bool,
    /// Ops a worker has dequeued but not yet finished handling. A worker
    /// that fails an immediate op re-enqueues it as part of "finishing", so
    /// this must reach zero (alongside an empty heap) before it's safe to
    /// close the queue out from under a shutdown retry; see
    /// [`FlushQueue::wait_idle`].
    in_flight: usize,
}

/// One of the `N` per-worker priority queues.
pub struct FlushQueue {
    inner: base::Mutex<Inner>,
    notify: tokio::sync::Notify,
    /// Separate from `notify`: only `op_done` and `wait_idle` touch this
    /// one, so an idle-waiter can never steal the wakeup a dequeuer is
    /// blocked on.
    idle_notify: tokio::sync::Notify,
}

impl FlushQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(FlushQueue {
            inner: base::Mutex::new(Inner {
                heap: BinaryHeap::new(),
                keys: FastHashSet::default(),
                closed: false,
                in_flight: 0,
            }),
            notify: tokio::sync::Notify::new(),
            idle_notify: tokio::sync::Notify::new(),
        })
    }

    /// Enqueues `op`, unless the queue is closed or an op with the same key
    /// is already pending, in which case this is a silent no-op.
    pub fn enqueue(&self, op: FlushOp) {
        let mut inner = self.inner.lock();
        if inner.closed {
            return;
        }
        let key = op.key();
        if !inner.keys.insert(key) {
            return;
        }
        inner.heap.push(QueuedOp(op));
        drop(inner);
        self.notify.notify_one();
    }

    /// Blocks until an op is available or the queue is closed, in which
    /// case this returns `None`. A successful dequeue counts as "in
    /// flight" until the caller reports completion via
    /// [`FlushQueue::op_done`].
    pub async fn dequeue(&self) -> Option<FlushOp> {
        loop {
            // Registered before the check so a concurrent `enqueue`/`close`
            // can't notify in the gap between the check and the await.
            let notified = self.notify.notified();
            {
                let mut inner = self.inner.lock();
                if let Some(QueuedOp(op)) = inner.heap.pop() {
                    inner.keys.remove(&op.key());
                    inner.in_flight += 1;
                    return Some(op);
                }
                if inner.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Reports that a previously dequeued op finished handling, including
    /// any retry re-enqueue. Must be called exactly once per `Some` from
    /// [`FlushQueue::dequeue`].
    pub fn op_done(&self) {
        let mut inner = self.inner.lock();
        inner.in_flight -= 1;
        let idle = inner.in_flight == 0 && inner.heap.is_empty();
        drop(inner);
        if idle {
            self.idle_notify.notify_waiters();
        }
    }

    /// Waits until the queue has nothing pending and no worker has an op
    /// in flight. Used by shutdown to let retries drain before `close`
    /// discards anything a worker is still about to re-enqueue.
    pub async fn wait_idle(&self) {
        loop {
            // Registered before the check so a concurrent `op_done` can't
            // notify in the gap between the check and the await.
            let notified = self.idle_notify.notified();
            {
                let inner = self.inner.lock();
                if inner.in_flight == 0 && inner.heap.is_empty() {
                    return;
                }
            }
            notified.await;
        }
    }

    /// Closes the queue: wakes all pending/future dequeuers with `None` and
    /// discards any remaining ops. Enqueue after close is a no-op. Callers
    /// that rely on shutdown retries draining first should call
    /// [`FlushQueue::wait_idle`] before this.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        inner.heap.clear();
        inner.keys.clear();
        drop(inner);
        self.notify.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::Fingerprint;
    use base::clock::SystemTime;

    fn op(user: &str, from: i64, immediate: bool) -> FlushOp {
        FlushOp::new(user.to_owned(), Fingerprint(1), SystemTime(from), immediate)
    }

    #[tokio::test]
    async fn dequeues_oldest_from_time_first() {
        let q = FlushQueue::new();
        q.enqueue(op("u", 10, false));
        q.enqueue(op("u2", 5, false));
        let first = q.dequeue().await.unwrap();
        assert_eq!(first.user_id, "u2");
    }

    #[tokio::test]
    async fn dedups_equal_keys() {
        let q = FlushQueue::new();
        q.enqueue(op("u", 1, false));
        q.enqueue(op("u", 2, false)); // same key (user, fp, immediate); no-op.
        assert_eq!(q.len(), 1);
        let got = q.dequeue().await.unwrap();
        assert_eq!(got.from_time, SystemTime(1));
    }

    #[tokio::test]
    async fn immediate_and_periodic_dont_collapse() {
        let q = FlushQueue::new();
        q.enqueue(op("u", 1, false));
        q.enqueue(op("u", 1, true));
        assert_eq!(q.len(), 2);
    }

    #[tokio::test]
    async fn close_wakes_dequeuers_with_none() {
        let q = FlushQueue::new();
        q.close();
        assert!(q.dequeue().await.is_none());
        // Enqueue after close is a no-op.
        q.enqueue(op("u", 1, false));
        assert_eq!(q.len(), 0);
    }

    #[tokio::test]
    async fn blocking_dequeue_wakes_on_enqueue() {
        let q = FlushQueue::new();
        let q2 = Arc::clone(&q);
        let handle = tokio::spawn(async move { q2.dequeue().await });
        tokio::task::yield_now().await;
        q.enqueue(op("u", 1, false));
        let got = handle.await.unwrap();
        assert!(got.is_some());
    }
}
