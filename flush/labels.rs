// This file is part of Moonfire NVR, a security camera network video recorder.
// Copyright (C) 2025 The Moonfire NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Stream identity: a canonical label set and its fingerprint.

use std::hash::{Hash, Hasher};

/// A stream's label set, sorted by key so that two streams with the same
/// labels always compare and hash identically regardless of append order.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LabelSet(Vec<(String, String)>);

impl LabelSet {
    /// Builds a canonical label set from arbitrary (key, value) pairs.
    pub fn new(mut pairs: Vec<(String, String)>) -> Self {
        pairs.sort_unstable();
        pairs.dedup_by(|a, b| a.0 == b.0);
        LabelSet(pairs)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns this label set with an extra `__name__=logs` pair, as Phase A
    /// of persistence (`flushChunks`) augments the wire chunk's labels.
    pub fn with_name_logs(&self) -> LabelSet {
        let mut pairs = self.0.clone();
        pairs.push(("__name__".to_owned(), "logs".to_owned()));
        LabelSet::new(pairs)
    }

    /// Computes this label set's fingerprint: a fixed-seed hash over the
    /// canonical (sorted) representation, so fingerprinting is
    /// order-independent but still deterministic across processes within a
    /// single run.
    pub fn fingerprint(&self) -> Fingerprint {
        let mut hasher = ahash::AHasher::default();
        for (k, v) in &self.0 {
            k.hash(&mut hasher);
            v.hash(&mut hasher);
        }
        Fingerprint(hasher.finish())
    }
}

/// A stream's stable 64-bit identity, derived from its label set.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash)]
pub struct Fingerprint(pub u64);

impl Fingerprint {
    /// Which of `n` flush-worker queues this stream is pinned to, for the
    /// program's lifetime (spec §5's sharding rule).
    pub fn queue_index(self, n: usize) -> usize {
        (self.0 as usize) % n
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(p: &[(&str, &str)]) -> Vec<(String, String)> {
        p.iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn order_independent_fingerprint() {
        let a = LabelSet::new(pairs(&[("app", "a"), ("env", "prod")]));
        let b = LabelSet::new(pairs(&[("env", "prod"), ("app", "a")]));
        assert_eq!(a, b);
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn queue_index_is_stable() {
        let fp = Fingerprint(18);
        assert_eq!(fp.queue_index(4), 2);
    }

    #[test]
    fn with_name_logs_appends_once() {
        let a = LabelSet::new(pairs(&[("app", "a")])).with_name_logs();
        assert_eq!(a.iter().count(), 2);
        assert!(a.iter().any(|(k, v)| k == "__name__" && v == "logs"));
    }
}
