// This file is part of Moonfire NVR, a security camera network video recorder.
// Copyright (C) 2025 The Moonfire NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! C3: one label-set's ordered sequence of chunks.

use crate::chunk::ChunkDescriptor;
use crate::encoder::ChunkEncoder;
use crate::labels::{Fingerprint, LabelSet};
use crate::metrics::Metrics;
use base::clock::SystemTime;

/// A stream: the series of entries sharing one label set. `chunk_mtx` is
/// the innermost lock in the locking hierarchy (spec §5) — writers take it
/// exclusively to append, the sweeper takes it as a reader, and the
/// collector/persister take it exclusively.
pub struct Stream {
    pub fp: Fingerprint,
    pub labels: LabelSet,
    /// Ordered by `Bounds().from` non-decreasing (invariant 2); only the
    /// tail may be open (invariant 1).
    pub chunks: base::RwLock<Vec<ChunkDescriptor>>,
}

impl Stream {
    pub fn new(labels: LabelSet) -> Self {
        Stream {
            fp: labels.fingerprint(),
            labels,
            chunks: base::RwLock::new(Vec::new()),
        }
    }

    /// Appends one entry, opening a new tail chunk via `new_encoder` if the
    /// current tail is missing or closed. `memory_chunks` is incremented
    /// whenever a new tail is opened, so it stays equal to the sum over all
    /// streams of `len(chunks)` (invariant 6); `reclaim::remove_flushed_chunks`
    /// is the corresponding decrement site.
    pub fn append(
        &self,
        now: SystemTime,
        line: &str,
        new_encoder: impl FnOnce() -> Box<dyn ChunkEncoder>,
        metrics: &Metrics,
    ) -> Result<(), base::Error> {
        let mut chunks = self.chunks.write();
        let needs_new_tail = match chunks.last() {
            Some(tail) => tail.is_closed(),
            None => true,
        };
        if needs_new_tail {
            chunks.push(ChunkDescriptor::new(new_encoder(), now));
            metrics.memory_chunks.inc();
        }
        chunks.last_mut().unwrap().append(now, line)
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.read().is_empty()
    }

    /// The earliest entry timestamp among all live chunks, used as the
    /// flush op's `from_time` (spec §4.4).
    pub fn earliest_from(&self) -> Option<SystemTime> {
        self.chunks.read().first().map(|c| c.bounds().0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::GzipChunkEncoder;

    fn labels() -> LabelSet {
        LabelSet::new(vec![("app".to_owned(), "a".to_owned())])
    }

    #[test]
    fn append_opens_tail_when_empty() {
        let s = Stream::new(labels());
        let metrics = Metrics::default();
        s.append(
            SystemTime::new(1, 0),
            "hello",
            || Box::new(GzipChunkEncoder::default()),
            &metrics,
        )
        .unwrap();
        assert_eq!(s.chunk_count(), 1);
        assert_eq!(metrics.memory_chunks.get(), 1.0);
    }

    #[test]
    fn append_reuses_open_tail() {
        let s = Stream::new(labels());
        let metrics = Metrics::default();
        let new_encoder = || Box::new(GzipChunkEncoder::default()) as Box<dyn ChunkEncoder>;
        s.append(SystemTime::new(1, 0), "a", new_encoder, &metrics)
            .unwrap();
        s.append(SystemTime::new(2, 0), "b", new_encoder, &metrics)
            .unwrap();
        assert_eq!(s.chunk_count(), 1);
        assert_eq!(metrics.memory_chunks.get(), 1.0);
    }

    #[test]
    fn append_after_close_opens_new_tail() {
        let s = Stream::new(labels());
        let metrics = Metrics::default();
        let new_encoder = || Box::new(GzipChunkEncoder::default()) as Box<dyn ChunkEncoder>;
        s.append(SystemTime::new(1, 0), "a", new_encoder, &metrics)
            .unwrap();
        s.chunks.write()[0].close(false);
        s.append(SystemTime::new(2, 0), "b", new_encoder, &metrics)
            .unwrap();
        assert_eq!(s.chunk_count(), 2);
        assert_eq!(metrics.memory_chunks.get(), 2.0);
    }
}
