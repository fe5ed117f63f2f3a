// This file is part of Moonfire NVR, a security camera network video recorder.
// Copyright (C) 2025 The Moonfire NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! C2: a single in-memory chunk and its lifecycle flags.

use crate::encoder::ChunkEncoder;
use base::clock::SystemTime;
use std::sync::atomic::{AtomicU64, Ordering};

fn next_chunk_id() -> u64 {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

/// Why a chunk was (or would be) flushed. Mirrors the `reason` label on
/// `ingester_chunks_flushed_total`.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum FlushReason {
    Idle,
    MaxAge,
    Forced,
    Full,
    Synced,
}

impl FlushReason {
    pub fn as_str(self) -> &'static str {
        match self {
            FlushReason::Idle => "idle",
            FlushReason::MaxAge => "max_age",
            FlushReason::Forced => "forced",
            FlushReason::Full => "full",
            FlushReason::Synced => "synced",
        }
    }
}

/// One chunk owned by exactly one stream. `closed` is monotonic
/// (false→true); `flushed` is set exactly once, after which the chunk is
/// immutable (invariant 3).
pub struct ChunkDescriptor {
    /// Process-unique, assigned at creation. Used to re-identify a
    /// descriptor by value after a lock has been released and
    /// re-acquired, since its index in the stream's chunk vector can shift
    /// if the reclaimer pops chunks from the head concurrently.
    id: u64,
    pub encoder: Box<dyn ChunkEncoder>,
    closed: bool,
    /// Set when closure was triggered by an external sync mark rather than
    /// fullness; affects flush reason only.
    synced: bool,
    last_updated: SystemTime,
    /// Zero means not yet flushed.
    flushed: SystemTime,
}

impl ChunkDescriptor {
    pub fn new(encoder: Box<dyn ChunkEncoder>, now: SystemTime) -> Self {
        ChunkDescriptor {
            id: next_chunk_id(),
            encoder,
            closed: false,
            synced: false,
            last_updated: now,
            flushed: SystemTime::default(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn is_flushed(&self) -> bool {
        !self.flushed.is_zero()
    }

    pub fn flushed_at(&self) -> SystemTime {
        self.flushed
    }

    pub fn last_updated(&self) -> SystemTime {
        self.last_updated
    }

    pub fn bounds(&self) -> (SystemTime, SystemTime) {
        self.encoder.bounds()
    }

    pub fn append(&mut self, now: SystemTime, line: &str) -> Result<(), base::Error> {
        self.encoder.append(now, line)?;
        self.last_updated = now;
        Ok(())
    }

    /// Closes the chunk for appends. Idempotent. `synced` marks this as an
    /// externally-triggered close rather than a fullness-triggered one.
    pub fn close(&mut self, synced: bool) {
        self.encoder.close();
        self.closed = true;
        if synced {
            self.synced = true;
        }
    }

    /// Marks this chunk flushed, exactly once.
    pub fn mark_flushed(&mut self, now: SystemTime) {
        debug_assert!(self.flushed.is_zero(), "flushed is set exactly once");
        self.flushed = now;
    }

    /// Decides whether this chunk should be flushed, per spec §4.3.
    pub fn should_flush(
        &self,
        now: SystemTime,
        max_chunk_idle: base::clock::Duration,
        max_chunk_age: base::clock::Duration,
    ) -> Option<FlushReason> {
        if self.closed && self.synced {
            return Some(FlushReason::Synced);
        }
        if self.closed {
            return Some(FlushReason::Full);
        }
        if now - self.last_updated > max_chunk_idle {
            return Some(FlushReason::Idle);
        }
        let (from, to) = self.bounds();
        if to - from > max_chunk_age {
            return Some(FlushReason::MaxAge);
        }
        None
    }
}
