// This file is part of Moonfire NVR, a security camera network video recorder.
// Copyright (C) 2025 The Moonfire NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! A single pending flush operation.

use crate::labels::Fingerprint;
use base::clock::SystemTime;

/// One request to flush (at least) the stream `(user_id, fp)`, queued with
/// priority `-from_time` so older data is offered to workers first.
///
/// `from_time` is the earliest entry timestamp among the chunks this op
/// covers (`Bounds(first).from`), not a scheduling instant; it only ever
/// participates in priority comparisons.
#[derive(Clone, Debug)]
pub struct FlushOp {
    pub user_id: String,
    pub fp: Fingerprint,
    pub from_time: SystemTime,
    pub immediate: bool,
}

impl FlushOp {
    pub fn new(user_id: String, fp: Fingerprint, from_time: SystemTime, immediate: bool) -> Self {
        FlushOp {
            user_id,
            fp,
            from_time,
            immediate,
        }
    }

    /// De-dup key: an `immediate` op never collapses into a pending
    /// periodic one, and vice versa.
    pub fn key(&self) -> String {
        format!("{}-{}-{}", self.user_id, self.fp, self.immediate)
    }

    /// Ordering priority: lower values dequeue first. Negating `from_time`
    /// turns "smallest `from_time` first" into the natural `BinaryHeap`
    /// max-heap ordering once wrapped by [`crate::queue::QueuedOp`].
    pub fn priority(&self) -> i64 {
        -self.from_time.0
    }

    /// Returns a copy of this op with `from_time` shifted later, used by the
    /// flush worker to re-enqueue a failed shutdown-retry op (spec §4.5 step
    /// 6) so it drains behind ops that are still succeeding.
    pub fn backed_off(&self, backoff: base::clock::Duration) -> FlushOp {
        FlushOp {
            from_time: self.from_time + backoff,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_distinguishes_immediate() {
        let fp = Fingerprint(1);
        let periodic = FlushOp::new("u".into(), fp, SystemTime(0), false);
        let forced = FlushOp::new("u".into(), fp, SystemTime(0), true);
        assert_ne!(periodic.key(), forced.key());
    }

    #[test]
    fn priority_favors_older_from_time() {
        let fp = Fingerprint(1);
        let older = FlushOp::new("u".into(), fp, SystemTime(1), false);
        let newer = FlushOp::new("u".into(), fp, SystemTime(2), false);
        assert!(older.priority() > newer.priority());
    }
}
