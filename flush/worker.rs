// This file is part of Moonfire NVR, a security camera network video recorder.
// Copyright (C) 2025 The Moonfire NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! C6: one of the `N` long-lived flush workers, each draining its own
//! queue.

use crate::metrics::Metrics;
use crate::op::FlushOp;
use crate::persist::{collect_chunks_to_flush, flush_chunks};
use crate::queue::FlushQueue;
use crate::registry::TenantRegistry;
use base::clock::{Clocks, Duration as ClockDuration};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tracing::{info, info_span, warn, Instrument as _};

pub struct FlushWorker<C: Clocks> {
    queue_idx: usize,
    clocks: Arc<C>,
    queue: Arc<FlushQueue>,
    registry: Arc<TenantRegistry>,
    store: Arc<dyn crate::store::ChunkStore>,
    metrics: Arc<Metrics>,
    max_chunk_idle: ClockDuration,
    max_chunk_age: ClockDuration,
    flush_op_timeout: StdDuration,
    target_chunk_size_bytes: u64,
    /// Shift applied to `from_time` on a failed shutdown-retry op (spec
    /// §4.5 step 6). Fixed rather than an exponential schedule with
    /// jitter; see DESIGN.md for the resolved open question.
    retry_backoff: ClockDuration,
}

impl<C: Clocks> FlushWorker<C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue_idx: usize,
        clocks: Arc<C>,
        queue: Arc<FlushQueue>,
        registry: Arc<TenantRegistry>,
        store: Arc<dyn crate::store::ChunkStore>,
        metrics: Arc<Metrics>,
        max_chunk_idle: ClockDuration,
        max_chunk_age: ClockDuration,
        flush_op_timeout: StdDuration,
        target_chunk_size_bytes: u64,
    ) -> Self {
        FlushWorker {
            queue_idx,
            clocks,
            queue,
            registry,
            store,
            metrics,
            max_chunk_idle,
            max_chunk_age,
            flush_op_timeout,
            target_chunk_size_bytes,
            retry_backoff: ClockDuration::from_secs(1),
        }
    }

    /// Spawns this worker as a tokio task, returning its join handle. The
    /// worker exits only when its queue is closed (spec §5).
    pub fn spawn(self) -> tokio::task::JoinHandle<()>
    where
        C: Send + Sync,
    {
        let span = info_span!("flush_worker", queue = self.queue_idx);
        tokio::task::spawn(
            async move {
                info!("starting");
                self.run().await;
                info!("ending");
            }
            .instrument(span),
        )
    }

    async fn run(&self) {
        while let Some(op) = self.queue.dequeue().await {
            self.handle_op(op).await;
            self.queue.op_done();
        }
    }

    async fn handle_op(&self, op: FlushOp) {
        // MissingTenant: op references a vanished tenant or stream.
        // Silently dropped (spec §7).
        let Some(instance) = self.registry.get_instance_by_id(&op.user_id) else {
            return;
        };
        let Some(stream) = instance.get_stream(op.fp) else {
            return;
        };

        let now = self.clocks.realtime();
        let ids = collect_chunks_to_flush(
            &stream,
            now,
            op.immediate,
            self.max_chunk_idle,
            self.max_chunk_age,
            &self.metrics,
        );
        if ids.is_empty() {
            return;
        }

        let result = flush_chunks(
            &*self.clocks,
            &op.user_id,
            &stream,
            &ids,
            &*self.store,
            &self.metrics,
            self.flush_op_timeout,
            self.target_chunk_size_bytes,
        )
        .await;

        if let Err(e) = result {
            if op.immediate {
                warn!(err = %e.chain(), fp = %op.fp, "shutdown flush failed, retrying via queue");
                self.queue.enqueue(op.backed_off(self.retry_backoff));
            } else {
                warn!(err = %e.chain(), fp = %op.fp, "periodic flush failed, dropping until next sweep");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::GzipChunkEncoder;
    use crate::labels::LabelSet;
    use crate::store::InMemoryChunkStore;
    use base::clock::{SimulatedClocks, SystemTime};

    fn worker(
        queue: Arc<FlushQueue>,
        registry: Arc<TenantRegistry>,
        store: Arc<dyn crate::store::ChunkStore>,
        clocks: Arc<SimulatedClocks>,
    ) -> FlushWorker<SimulatedClocks> {
        FlushWorker::new(
            0,
            clocks,
            queue,
            registry,
            store,
            Arc::new(Metrics::default()),
            ClockDuration::from_secs(60),
            ClockDuration::from_secs(3600),
            StdDuration::from_secs(5),
            1 << 20,
        )
    }

    #[tokio::test]
    async fn missing_tenant_is_silently_dropped() {
        let queue = FlushQueue::new();
        let registry = Arc::new(TenantRegistry::new());
        let store = Arc::new(InMemoryChunkStore::new());
        let clocks = Arc::new(SimulatedClocks::new(SystemTime::new(0, 0)));
        let w = worker(queue, registry, store, clocks);
        let op = FlushOp::new(
            "ghost".to_owned(),
            crate::labels::Fingerprint(1),
            SystemTime(0),
            true,
        );
        w.handle_op(op).await; // must not panic.
    }

    #[tokio::test]
    async fn immediate_failure_is_requeued_with_later_from() {
        let queue = FlushQueue::new();
        let registry = Arc::new(TenantRegistry::new());
        let instance = registry.get_or_create_instance("u");
        let labels = LabelSet::new(vec![("app".to_owned(), "a".to_owned())]);
        let stream = instance.get_or_create_stream(&labels);
        stream
            .append(
                SystemTime::new(0, 0),
                "x",
                || Box::new(GzipChunkEncoder::default()),
                &Metrics::default(),
            )
            .unwrap();
        let store = Arc::new(InMemoryChunkStore::new());
        store.fail_next_puts(1);
        let clocks = Arc::new(SimulatedClocks::new(SystemTime::new(0, 0)));
        let w = worker(Arc::clone(&queue), registry, store, clocks);
        let op = FlushOp::new("u".to_owned(), stream.fp, SystemTime(0), true);
        w.handle_op(op).await;
        assert_eq!(queue.len(), 1);
        let retried = queue.dequeue().await.unwrap();
        assert_eq!(retried.from_time, SystemTime(1));
    }
}
