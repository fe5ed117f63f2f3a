// This file is part of Moonfire NVR, a security camera network video recorder.
// Copyright (C) 2025 The Moonfire NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! C8: owns the queues, the worker pool's lifecycle, the periodic sweep,
//! and shutdown.

use crate::metrics::Metrics;
use crate::queue::FlushQueue;
use crate::registry::TenantRegistry;
use crate::replay::ReplayController;
use crate::store::ChunkStore;
use crate::sweeper::Sweeper;
use crate::worker::FlushWorker;
use base::clock::{Clocks, Duration as ClockDuration};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tracing::{info, info_span, Instrument as _};

/// Static configuration the controller needs, a subset of
/// [`base::config::Config`] narrowed to what the flush core consumes.
pub struct FlushControllerConfig {
    pub concurrent_flushes: usize,
    pub flush_check_period: ClockDuration,
    pub flush_op_timeout: StdDuration,
    pub max_chunk_idle: ClockDuration,
    pub max_chunk_age: ClockDuration,
    pub retain_period: ClockDuration,
    pub target_chunk_size_bytes: u64,
}

impl From<&base::config::Config> for FlushControllerConfig {
    fn from(c: &base::config::Config) -> Self {
        FlushControllerConfig {
            concurrent_flushes: c.concurrent_flushes,
            flush_check_period: c.flush_check_period(),
            flush_op_timeout: c.flush_op_timeout(),
            max_chunk_idle: c.max_chunk_idle(),
            max_chunk_age: c.max_chunk_age(),
            retain_period: c.retain_period(),
            target_chunk_size_bytes: c.target_chunk_size_bytes,
        }
    }
}

pub struct FlushController<C: Clocks> {
    clocks: Arc<C>,
    registry: Arc<TenantRegistry>,
    store: Arc<dyn ChunkStore>,
    metrics: Arc<Metrics>,
    replay: ReplayController,
    queues: Vec<Arc<FlushQueue>>,
    sweeper: Arc<Sweeper<C>>,
    cfg: FlushControllerConfig,
    /// `None` until [`FlushController::init_flush_queues`] has run once;
    /// idempotent thereafter (spec §4.8).
    worker_handles: base::Mutex<Option<Vec<tokio::task::JoinHandle<()>>>>,
}

impl<C: Clocks> FlushController<C> {
    pub fn new(
        clocks: Arc<C>,
        registry: Arc<TenantRegistry>,
        store: Arc<dyn ChunkStore>,
        metrics: Arc<Metrics>,
        replay: ReplayController,
        cfg: FlushControllerConfig,
    ) -> Self {
        let queues: Vec<Arc<FlushQueue>> =
            (0..cfg.concurrent_flushes).map(|_| FlushQueue::new()).collect();
        let sweeper = Arc::new(Sweeper::new(
            Arc::clone(&clocks),
            Arc::clone(&registry),
            queues.clone(),
            replay.clone(),
            Arc::clone(&metrics),
            cfg.max_chunk_idle,
            cfg.max_chunk_age,
            cfg.retain_period,
        ));
        FlushController {
            clocks,
            registry,
            store,
            metrics,
            replay,
            queues,
            sweeper,
            cfg,
            worker_handles: base::Mutex::new(None),
        }
    }

    pub fn replay_controller(&self) -> &ReplayController {
        &self.replay
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Spawns the `N` flush workers if they haven't been already. Safe to
    /// call multiple times (e.g. from WAL replay, which may invoke this
    /// zero or more times): later calls reuse the existing pool.
    pub fn init_flush_queues(&self)
    where
        C: Send + Sync,
    {
        let mut handles = self.worker_handles.lock();
        if handles.is_some() {
            return;
        }
        let spawned = self
            .queues
            .iter()
            .enumerate()
            .map(|(idx, q)| {
                FlushWorker::new(
                    idx,
                    Arc::clone(&self.clocks),
                    Arc::clone(q),
                    Arc::clone(&self.registry),
                    Arc::clone(&self.store),
                    Arc::clone(&self.metrics),
                    self.cfg.max_chunk_idle,
                    self.cfg.max_chunk_age,
                    self.cfg.flush_op_timeout,
                    self.cfg.target_chunk_size_bytes,
                )
                .spawn()
            })
            .collect();
        *handles = Some(spawned);
    }

    /// Admin-triggered sweep equivalent to [`FlushController::flush`]
    /// without closing the queues: forces every chunk to be offered for
    /// flushing but leaves the worker pool running and streams in place.
    pub fn flush_handler(&self) {
        self.sweeper.sweep_users(true, false);
    }

    /// Runs one ordinary, non-forced sweep cycle: the same evaluation
    /// `run_periodic_sweeps` performs once per `FlushCheckPeriod` tick.
    /// Exposed so callers (and tests) can trigger a sweep on demand
    /// without waiting out the timer.
    pub fn sweep_once(&self) {
        self.sweeper.sweep_users(false, false);
    }

    /// Forces a final sweep, closes every queue, and waits for all workers
    /// to drain and exit. After this returns, no in-memory chunk present
    /// at entry remains unflushed unless persistence permanently failed.
    /// Safe to call more than once; the second call returns immediately
    /// since the queues are already closed and the handles already taken.
    ///
    /// Each queue is drained to idle (via [`FlushQueue::wait_idle`]) before
    /// it's closed, so a shutdown-retry re-enqueue (spec §4.5 step 6) from
    /// a worker still handling the last op isn't lost to `close`'s discard.
    pub async fn flush(&self) {
        self.sweeper.sweep_users(true, true);
        for q in &self.queues {
            q.wait_idle().await;
            q.close();
        }
        let handles = self.worker_handles.lock().take();
        if let Some(handles) = handles {
            for h in handles {
                let _ = h.await;
            }
        }
    }

    /// Runs the periodic sweep loop until `shutdown_rx` fires, then
    /// returns without itself calling [`FlushController::flush`] — the
    /// caller is expected to do that as part of its own shutdown sequence.
    pub async fn run_periodic_sweeps(&self, shutdown_rx: base::shutdown::Receiver)
    where
        C: Send + Sync,
    {
        let span = info_span!("flush_controller_sweeps");
        async {
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.clone().into_future() => {
                        info!("stopping periodic sweeps");
                        return;
                    }
                    _ = self.clocks.sleep(self.cfg.flush_check_period) => {
                        self.sweep_once();
                    }
                }
            }
        }
        .instrument(span)
        .await
    }
}
