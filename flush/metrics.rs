// This file is part of Moonfire NVR, a security camera network video recorder.
// Copyright (C) 2025 The Moonfire NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Prometheus metrics for the flush subsystem (spec §6's metrics table).
//!
//! A registry is passed to [`crate::FlushController`] at construction
//! (design note: "replace global metrics singletons with a metrics
//! registry passed to the controller") rather than registered against a
//! process-wide default.

use crate::chunk::FlushReason;
use prometheus::{CounterVec, Gauge, Histogram, Opts, Registry};

pub struct Metrics {
    pub memory_chunks: Gauge,
    pub chunk_utilization: Histogram,
    pub chunk_entries: Histogram,
    pub chunk_size_bytes: Histogram,
    pub chunk_compression_ratio: Histogram,
    pub chunk_age_seconds: Histogram,
    pub chunk_encode_time_seconds: Histogram,
    pub chunk_bounds_hours: Histogram,
    pub chunks_stored_total: CounterVec,
    pub chunk_stored_bytes_total: CounterVec,
    pub chunks_flushed_total: CounterVec,
}

impl Metrics {
    pub fn new(registry: &Registry) -> Self {
        let memory_chunks = Gauge::new(
            "ingester_memory_chunks",
            "number of chunk descriptors currently held in memory",
        )
        .unwrap();
        let chunk_utilization = Histogram::with_opts(prometheus::HistogramOpts::new(
            "ingester_chunk_utilization",
            "fraction of the target chunk size a flushed chunk reached",
        ))
        .unwrap();
        let chunk_entries = Histogram::with_opts(prometheus::HistogramOpts::new(
            "ingester_chunk_entries",
            "entries per flushed chunk",
        ))
        .unwrap();
        let chunk_size_bytes = Histogram::with_opts(prometheus::HistogramOpts::new(
            "ingester_chunk_size_bytes",
            "encoded size of flushed chunks, in bytes",
        ))
        .unwrap();
        let chunk_compression_ratio = Histogram::with_opts(prometheus::HistogramOpts::new(
            "ingester_chunk_compression_ratio",
            "uncompressed size divided by encoded size",
        ))
        .unwrap();
        let chunk_age_seconds = Histogram::with_opts(prometheus::HistogramOpts::new(
            "ingester_chunk_age_seconds",
            "seconds between chunk open and flush",
        ))
        .unwrap();
        let chunk_encode_time_seconds = Histogram::with_opts(prometheus::HistogramOpts::new(
            "ingester_chunk_encode_time_seconds",
            "time spent encoding a chunk under lock",
        ))
        .unwrap();
        let chunk_bounds_hours = Histogram::with_opts(prometheus::HistogramOpts::new(
            "ingester_chunk_bounds_hours",
            "span (to - from) of a flushed chunk, in hours",
        ))
        .unwrap();
        let chunks_stored_total = CounterVec::new(
            Opts::new(
                "ingester_chunks_stored_total",
                "chunks successfully persisted",
            ),
            &["tenant"],
        )
        .unwrap();
        let chunk_stored_bytes_total = CounterVec::new(
            Opts::new(
                "ingester_chunk_stored_bytes_total",
                "encoded bytes successfully persisted",
            ),
            &["tenant"],
        )
        .unwrap();
        let chunks_flushed_total = CounterVec::new(
            Opts::new(
                "ingester_chunks_flushed_total",
                "chunks offered to a flush attempt, by reason",
            ),
            &["reason"],
        )
        .unwrap();

        for c in [
            Box::new(memory_chunks.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(chunk_utilization.clone()),
            Box::new(chunk_entries.clone()),
            Box::new(chunk_size_bytes.clone()),
            Box::new(chunk_compression_ratio.clone()),
            Box::new(chunk_age_seconds.clone()),
            Box::new(chunk_encode_time_seconds.clone()),
            Box::new(chunk_bounds_hours.clone()),
            Box::new(chunks_stored_total.clone()),
            Box::new(chunk_stored_bytes_total.clone()),
            Box::new(chunks_flushed_total.clone()),
        ] {
            // Registration only fails on a name collision, which would be a
            // programming error here.
            registry.register(c).expect("metric registration");
        }

        Metrics {
            memory_chunks,
            chunk_utilization,
            chunk_entries,
            chunk_size_bytes,
            chunk_compression_ratio,
            chunk_age_seconds,
            chunk_encode_time_seconds,
            chunk_bounds_hours,
            chunks_stored_total,
            chunk_stored_bytes_total,
            chunks_flushed_total,
        }
    }

    pub fn inc_flushed(&self, reason: FlushReason) {
        self.chunks_flushed_total
            .with_label_values(&[reason.as_str()])
            .inc();
    }

    pub fn observe_persisted(&self, tenant: &str, encoded_bytes: u64) {
        self.chunks_stored_total.with_label_values(&[tenant]).inc();
        self.chunk_stored_bytes_total
            .with_label_values(&[tenant])
            .inc_by(encoded_bytes as f64);
    }
}

/// Builds a [`Metrics`] against a fresh, private registry — handy for unit
/// tests and for embedding in a larger process-wide registry via
/// `Registry::register`'s sibling APIs.
impl Default for Metrics {
    fn default() -> Self {
        Metrics::new(&Registry::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flushed_counter_is_labeled_by_reason() {
        let m = Metrics::default();
        m.inc_flushed(FlushReason::Idle);
        m.inc_flushed(FlushReason::Idle);
        m.inc_flushed(FlushReason::Forced);
        assert_eq!(
            m.chunks_flushed_total
                .with_label_values(&["idle"])
                .get(),
            2.0
        );
        assert_eq!(
            m.chunks_flushed_total
                .with_label_values(&["forced"])
                .get(),
            1.0
        );
    }
}
