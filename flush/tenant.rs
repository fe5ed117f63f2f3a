// This file is part of Moonfire NVR, a security camera network video recorder.
// Copyright (C) 2025 The Moonfire NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! C4: the keyed container of streams belonging to one tenant.

use crate::labels::{Fingerprint, LabelSet};
use crate::stream::Stream;
use base::FastHashMap;
use std::sync::Arc;

/// One tenant's streams, keyed by fingerprint. This map's lock is outer to
/// any individual stream's `chunk_mtx` (spec §5), except during the
/// lock-reversal protocol the reclaimer uses to remove an empty stream.
pub struct TenantInstance {
    pub user_id: String,
    pub(crate) streams: base::RwLock<FastHashMap<Fingerprint, Arc<Stream>>>,
}

impl TenantInstance {
    pub fn new(user_id: String) -> Self {
        TenantInstance {
            user_id,
            streams: base::RwLock::new(FastHashMap::default()),
        }
    }

    pub fn get_stream(&self, fp: Fingerprint) -> Option<Arc<Stream>> {
        self.streams.read().get(&fp).cloned()
    }

    /// Looks up the stream for `labels`, creating it if absent.
    pub fn get_or_create_stream(&self, labels: &LabelSet) -> Arc<Stream> {
        let fp = labels.fingerprint();
        if let Some(s) = self.get_stream(fp) {
            return s;
        }
        let mut streams = self.streams.write();
        streams
            .entry(fp)
            .or_insert_with(|| Arc::new(Stream::new(labels.clone())))
            .clone()
    }

    pub fn for_each_stream(&self, mut f: impl FnMut(&Arc<Stream>)) {
        for s in self.streams.read().values() {
            f(s);
        }
    }

    pub fn stream_count(&self) -> usize {
        self.streams.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels() -> LabelSet {
        LabelSet::new(vec![("app".to_owned(), "a".to_owned())])
    }

    #[test]
    fn get_or_create_is_idempotent() {
        let t = TenantInstance::new("u".to_owned());
        let a = t.get_or_create_stream(&labels());
        let b = t.get_or_create_stream(&labels());
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(t.stream_count(), 1);
    }
}
