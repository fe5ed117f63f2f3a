// This file is part of Moonfire NVR, a security camera network video recorder.
// Copyright (C) 2025 The Moonfire NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! `collectChunksToFlush` and the three-phase `flushChunks` (spec §4.5,
//! §4.6): encode under lock, persist without lock, commit under lock.

use crate::chunk::FlushReason;
use crate::metrics::Metrics;
use crate::stream::Stream;
use crate::store::{ChunkStore, WireChunk};
use base::clock::{Clocks, SystemTime};
use base::{err, Error};
use std::time::Duration as StdDuration;

/// Scans `stream`'s chunks under its write lock, closing and selecting
/// every one that should flush. Returns the ids of chunks newly selected
/// this cycle (excluding any already flushed).
///
/// Per spec §4.5 step 3, the reason counter is incremented at selection
/// time, once per cycle a chunk is picked up — even if a prior cycle
/// already selected it and its `Put` subsequently failed. This can
/// double-count relative to successful persistences; see DESIGN.md for the
/// resolved open question.
pub fn collect_chunks_to_flush(
    stream: &Stream,
    now: SystemTime,
    immediate: bool,
    max_chunk_idle: base::clock::Duration,
    max_chunk_age: base::clock::Duration,
    metrics: &Metrics,
) -> Vec<u64> {
    let mut selected = Vec::new();
    let mut chunks = stream.chunks.write();
    for c in chunks.iter_mut() {
        let reason = if immediate {
            Some(FlushReason::Forced)
        } else {
            c.should_flush(now, max_chunk_idle, max_chunk_age)
        };
        let Some(reason) = reason else { continue };
        if !c.is_closed() {
            c.close(reason == FlushReason::Synced);
        }
        if !c.is_flushed() {
            selected.push(c.id());
            metrics.inc_flushed(reason);
        }
    }
    selected
}

/// Runs the three-phase persist for the chunks in `chunk_ids`, bounded by
/// `timeout`. Leaves chunks untouched (not marked flushed) on any error.
pub async fn flush_chunks<C: Clocks>(
    clocks: &C,
    user_id: &str,
    stream: &Stream,
    chunk_ids: &[u64],
    store: &dyn ChunkStore,
    metrics: &Metrics,
    timeout: StdDuration,
    target_chunk_size_bytes: u64,
) -> Result<(), Error> {
    if chunk_ids.is_empty() {
        return Ok(());
    }

    // Phase A: encode under lock.
    let labels = stream.labels.with_name_logs();
    let encode_start = clocks.monotonic();
    let wire_chunks: Vec<WireChunk> = {
        let mut chunks = stream.chunks.write();
        let mut out = Vec::with_capacity(chunk_ids.len());
        for &id in chunk_ids {
            let c = chunks
                .iter_mut()
                .find(|c| c.id() == id)
                .ok_or_else(|| err!(Internal, msg("selected chunk vanished before encode")))?;
            c.close(false); // idempotent; already closed by collect_chunks_to_flush.
            let (from, to) = c.bounds();
            let mut buf = Vec::with_capacity(c.encoder.bytes_size() as usize + 4096);
            c.encoder
                .encode_to(&mut buf)
                .map_err(|e| err!(Internal, msg("encode chunk"), source(e)))?;
            out.push(WireChunk::new(
                user_id.to_owned(),
                stream.fp,
                labels.clone(),
                from,
                to,
                buf,
            ));
        }
        out
    };
    metrics
        .chunk_encode_time_seconds
        .observe((clocks.monotonic() - encode_start).as_secs() as f64);

    // Phase B: persist without lock.
    tokio::time::timeout(timeout, store.put(&wire_chunks))
        .await
        .map_err(|_| err!(DeadlineExceeded, msg("store.put timed out")))??;

    // Phase C: commit under lock. Never fails.
    let now = clocks.realtime();
    let mut chunks = stream.chunks.write();
    for (wc, &id) in wire_chunks.iter().zip(chunk_ids) {
        let Some(c) = chunks.iter_mut().find(|c| c.id() == id) else {
            continue; // reclaimed concurrently; nothing left to commit.
        };
        let age = now - c.last_updated();
        let (from, to) = c.bounds();
        c.mark_flushed(now);

        metrics.chunk_entries.observe(c.encoder.size() as f64);
        metrics.chunk_size_bytes.observe(wc.encoded.len() as f64);
        let ratio = if wc.encoded.is_empty() {
            1.0
        } else {
            c.encoder.uncompressed_size() as f64 / wc.encoded.len() as f64
        };
        metrics.chunk_compression_ratio.observe(ratio);
        metrics
            .chunk_utilization
            .observe(c.encoder.utilization(target_chunk_size_bytes));
        metrics.chunk_age_seconds.observe(age.as_secs() as f64);
        metrics
            .chunk_bounds_hours
            .observe((to - from).as_secs() as f64 / 3600.0);
        metrics.observe_persisted(user_id, wc.encoded.len() as u64);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::GzipChunkEncoder;
    use crate::labels::LabelSet;
    use crate::store::InMemoryChunkStore;
    use base::clock::{Duration, SimulatedClocks};
    use std::sync::Arc;

    fn stream_with_one_entry(metrics: &Metrics) -> Arc<Stream> {
        let s = Arc::new(Stream::new(LabelSet::new(vec![(
            "app".to_owned(),
            "a".to_owned(),
        )])));
        s.append(
            SystemTime::new(0, 0),
            "hello",
            || Box::new(GzipChunkEncoder::default()),
            metrics,
        )
        .unwrap();
        s
    }

    #[test]
    fn collect_selects_immediate_regardless_of_should_flush() {
        let metrics = Metrics::default();
        let s = stream_with_one_entry(&metrics);
        let ids = collect_chunks_to_flush(
            &s,
            SystemTime::new(0, 0),
            true,
            Duration::from_secs(60),
            Duration::from_secs(3600),
            &metrics,
        );
        assert_eq!(ids.len(), 1);
        assert!(s.chunks.read()[0].is_closed());
    }

    #[test]
    fn collect_skips_fresh_open_chunk_when_not_immediate() {
        let metrics = Metrics::default();
        let s = stream_with_one_entry(&metrics);
        let ids = collect_chunks_to_flush(
            &s,
            SystemTime::new(0, 0),
            false,
            Duration::from_secs(60),
            Duration::from_secs(3600),
            &metrics,
        );
        assert!(ids.is_empty());
    }

    #[tokio::test]
    async fn flush_chunks_persists_and_marks_flushed() {
        let metrics = Metrics::default();
        let s = stream_with_one_entry(&metrics);
        let ids = collect_chunks_to_flush(
            &s,
            SystemTime::new(0, 0),
            true,
            Duration::from_secs(60),
            Duration::from_secs(3600),
            &metrics,
        );
        let store = InMemoryChunkStore::new();
        let clocks = SimulatedClocks::new(SystemTime::new(100, 0));
        flush_chunks(
            &clocks,
            "u",
            &s,
            &ids,
            &store,
            &metrics,
            StdDuration::from_secs(5),
            1 << 20,
        )
        .await
        .unwrap();
        assert!(s.chunks.read()[0].is_flushed());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn flush_chunks_leaves_unflushed_on_store_error() {
        let metrics = Metrics::default();
        let s = stream_with_one_entry(&metrics);
        let ids = collect_chunks_to_flush(
            &s,
            SystemTime::new(0, 0),
            true,
            Duration::from_secs(60),
            Duration::from_secs(3600),
            &metrics,
        );
        let store = InMemoryChunkStore::new();
        store.fail_next_puts(1);
        let clocks = SimulatedClocks::new(SystemTime::new(100, 0));
        let err = flush_chunks(
            &clocks,
            "u",
            &s,
            &ids,
            &store,
            &metrics,
            StdDuration::from_secs(5),
            1 << 20,
        )
        .await
        .unwrap_err();
        let _ = err;
        assert!(!s.chunks.read()[0].is_flushed());
    }
}
