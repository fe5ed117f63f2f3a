// This file is part of Moonfire NVR, a security camera network video recorder.
// Copyright (C) 2025 The Moonfire NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! C7: drops chunks once they've cleared retention, feeding the bytes
//! reclaimed back to the WAL replay controller.

use crate::metrics::Metrics;
use crate::replay::ReplayController;
use crate::tenant::TenantInstance;
use base::clock::{Duration, SystemTime};
use std::sync::Arc;

/// Pops every chunk at the head of `stream.chunks` that has been flushed
/// for at least `retain_period`, reports the uncompressed bytes freed to
/// `replay`, and — if `may_remove_stream` and the stream ends up empty —
/// unlinks the stream from `instance` via the lock-reversal protocol in
/// spec §4.7.
pub fn remove_flushed_chunks(
    instance: &TenantInstance,
    stream: &Arc<crate::stream::Stream>,
    now: SystemTime,
    retain_period: Duration,
    may_remove_stream: bool,
    replay: &ReplayController,
    metrics: &Metrics,
) {
    let now_empty = {
        let mut chunks = stream.chunks.write();
        let mut subtracted: u64 = 0;
        let mut popped = 0u32;
        while chunks
            .first()
            .is_some_and(|c| c.is_flushed() && now - c.flushed_at() >= retain_period)
        {
            let c = chunks.remove(0);
            subtracted += c.encoder.uncompressed_size();
            popped += 1;
        }
        if popped > 0 {
            metrics.memory_chunks.sub(popped as f64);
            replay.sub(subtracted);
        }
        chunks.is_empty()
    };

    if may_remove_stream && now_empty {
        // Lock-reversal with re-check: the stream map lock is normally
        // outer to chunk_mtx, so to take it here (inner to outer) we must
        // first drop chunk_mtx, then re-acquire both in the right order and
        // re-verify the stream is still empty before unlinking it. The
        // chunk_mtx write guard must stay held across the `retain` itself —
        // a momentary read lock would let a concurrent `append` slip in
        // between the re-check and the unlink.
        let mut streams = instance.streams.write();
        let guard = stream.chunks.write();
        if guard.is_empty() {
            streams.retain(|_, s| !Arc::ptr_eq(s, stream));
        }
    }
}
