// This file is part of Moonfire NVR, a security camera network video recorder.
// Copyright (C) 2025 The Moonfire NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! C5: the periodic scanner that decides which streams get a flush op.

use crate::metrics::Metrics;
use crate::op::FlushOp;
use crate::queue::FlushQueue;
use crate::reclaim::remove_flushed_chunks;
use crate::registry::TenantRegistry;
use crate::replay::ReplayController;
use base::clock::{Clocks, Duration, SystemTime};
use std::sync::Arc;
use tracing::trace;

pub struct Sweeper<C: Clocks> {
    clocks: Arc<C>,
    registry: Arc<TenantRegistry>,
    queues: Vec<Arc<FlushQueue>>,
    replay: ReplayController,
    metrics: Arc<Metrics>,
    max_chunk_idle: Duration,
    max_chunk_age: Duration,
    retain_period: Duration,
}

impl<C: Clocks> Sweeper<C> {
    pub fn new(
        clocks: Arc<C>,
        registry: Arc<TenantRegistry>,
        queues: Vec<Arc<FlushQueue>>,
        replay: ReplayController,
        metrics: Arc<Metrics>,
        max_chunk_idle: Duration,
        max_chunk_age: Duration,
        retain_period: Duration,
    ) -> Self {
        Sweeper {
            clocks,
            registry,
            queues,
            replay,
            metrics,
            max_chunk_idle,
            max_chunk_age,
            retain_period,
        }
    }

    /// Visits every stream of every tenant. `immediate` forces a flush op
    /// regardless of `should_flush`, and is set at shutdown and on the
    /// admin trigger; `may_remove_streams` additionally allows the
    /// reclaimer to unlink streams that end up empty, and is only set at
    /// shutdown.
    pub fn sweep_users(&self, immediate: bool, may_remove_streams: bool) {
        let now = self.clocks.realtime();
        for instance in self.registry.get_instances() {
            let mut streams = Vec::new();
            instance.for_each_stream(|s| streams.push(Arc::clone(s)));
            for stream in streams {
                self.sweep_stream(&instance, &stream, now, immediate, may_remove_streams);
            }
        }
    }

    fn sweep_stream(
        &self,
        instance: &crate::tenant::TenantInstance,
        stream: &Arc<crate::stream::Stream>,
        now: SystemTime,
        immediate: bool,
        may_remove_streams: bool,
    ) {
        let enqueue = {
            let chunks = stream.chunks.read();
            match chunks.last() {
                None => false,
                Some(last) => {
                    let sole_idle_chunk = chunks.len() == 1
                        && !immediate
                        && last
                            .should_flush(now, self.max_chunk_idle, self.max_chunk_age)
                            .is_none();
                    !sole_idle_chunk
                }
            }
        };
        if !enqueue {
            trace!(fp = %stream.fp, "sweep skipping stream");
            return;
        }

        if let Some(from) = stream.earliest_from() {
            let queue_idx = stream.fp.queue_index(self.queues.len());
            let op = FlushOp::new(instance.user_id.clone(), stream.fp, from, immediate);
            self.queues[queue_idx].enqueue(op);
        }

        remove_flushed_chunks(
            instance,
            stream,
            now,
            self.retain_period,
            may_remove_streams,
            &self.replay,
            &self.metrics,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::GzipChunkEncoder;
    use crate::labels::LabelSet;
    use base::clock::SimulatedClocks;

    fn sweeper(queues: Vec<Arc<FlushQueue>>) -> Sweeper<SimulatedClocks> {
        Sweeper::new(
            Arc::new(SimulatedClocks::new(SystemTime::new(0, 0))),
            Arc::new(TenantRegistry::new()),
            queues,
            ReplayController::new(),
            Arc::new(Metrics::default()),
            Duration::from_secs(60),
            Duration::from_secs(3600),
            Duration::from_secs(60),
        )
    }

    #[test]
    fn skips_sole_fresh_chunk_when_not_immediate() {
        let queues = vec![FlushQueue::new()];
        let sw = sweeper(queues);
        let instance = sw.registry.get_or_create_instance("u");
        let labels = LabelSet::new(vec![("app".to_owned(), "a".to_owned())]);
        let stream = instance.get_or_create_stream(&labels);
        stream
            .append(
                SystemTime::new(0, 0),
                "x",
                || Box::new(GzipChunkEncoder::default()),
                &sw.metrics,
            )
            .unwrap();
        sw.sweep_stream(&instance, &stream, SystemTime::new(0, 0), false, false);
        assert!(sw.queues[0].is_empty());
    }

    #[test]
    fn enqueues_when_immediate() {
        let queues = vec![FlushQueue::new()];
        let sw = sweeper(queues);
        let instance = sw.registry.get_or_create_instance("u");
        let labels = LabelSet::new(vec![("app".to_owned(), "a".to_owned())]);
        let stream = instance.get_or_create_stream(&labels);
        stream
            .append(
                SystemTime::new(0, 0),
                "x",
                || Box::new(GzipChunkEncoder::default()),
                &sw.metrics,
            )
            .unwrap();
        sw.sweep_stream(&instance, &stream, SystemTime::new(0, 0), true, true);
        assert_eq!(sw.queues[0].len(), 1);
    }
}
