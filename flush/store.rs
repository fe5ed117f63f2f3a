// This file is part of Moonfire NVR, a security camera network video recorder.
// Copyright (C) 2025 The Moonfire NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! The durable chunk store interface (spec §6) and two concrete
//! implementations: a file-backed one for production and an in-memory one
//! for tests, the latter supporting injected failures for the shutdown
//! retry scenarios.

use crate::labels::{Fingerprint, LabelSet};
use base::clock::SystemTime;
use base::{err, Error};
use std::sync::Arc;

/// A sealed, encoded chunk ready to persist. Phase A of `flushChunks` wraps
/// each flushed [`crate::ChunkDescriptor`] in one of these before handing
/// it to [`ChunkStore::put`].
#[derive(Clone)]
pub struct WireChunk {
    pub user_id: String,
    pub fp: Fingerprint,
    pub labels: LabelSet,
    pub from: SystemTime,
    pub to: SystemTime,
    pub encoded: Arc<[u8]>,
    /// Content hash of `encoded`, the idempotency key required of
    /// `store.Put` by spec §6 (`(userID, fp, from, to, encoding-hash)`).
    pub content_hash: [u8; 32],
}

impl WireChunk {
    pub fn new(
        user_id: String,
        fp: Fingerprint,
        labels: LabelSet,
        from: SystemTime,
        to: SystemTime,
        encoded: Vec<u8>,
    ) -> Self {
        let content_hash = *blake3::hash(&encoded).as_bytes();
        WireChunk {
            user_id,
            fp,
            labels,
            from,
            to,
            encoded: Arc::from(encoded),
            content_hash,
        }
    }

    /// The idempotency key `store.Put` must dedup by.
    pub fn idempotency_key(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            self.user_id,
            self.fp,
            base::strutil::hex(&self.content_hash[..8]),
            self.from.0,
        )
    }
}

/// Durable sink for sealed chunks. Required to be idempotent by
/// `(user_id, fp, from, to, encoding-hash)`, blocking, and to respect the
/// caller's timeout.
#[async_trait::async_trait]
pub trait ChunkStore: Send + Sync {
    async fn put(&self, chunks: &[WireChunk]) -> Result<(), Error>;
}

/// Writes each wire chunk to `<dir>/<tenant>/<fingerprint>/<hash>.chunk`.
/// Naturally idempotent: writing the same hash twice overwrites identical
/// bytes.
pub struct FileChunkStore {
    root: std::path::PathBuf,
}

impl FileChunkStore {
    pub fn new(root: impl Into<std::path::PathBuf>) -> Self {
        FileChunkStore { root: root.into() }
    }

    fn path_for(&self, c: &WireChunk) -> std::path::PathBuf {
        self.root
            .join(&c.user_id)
            .join(c.fp.to_string())
            .join(format!("{}.chunk", base::strutil::hex(&c.content_hash)))
    }
}

#[async_trait::async_trait]
impl ChunkStore for FileChunkStore {
    async fn put(&self, chunks: &[WireChunk]) -> Result<(), Error> {
        for c in chunks {
            let path = self.path_for(c);
            if let Some(dir) = path.parent() {
                tokio::fs::create_dir_all(dir)
                    .await
                    .map_err(|e| err!(Unavailable, msg("create chunk dir"), source(e)))?;
            }
            tokio::fs::write(&path, &c.encoded[..])
                .await
                .map_err(|e| err!(Unavailable, msg("write chunk file"), source(e)))?;
        }
        Ok(())
    }
}

/// In-memory store for tests, keyed by the same idempotency triple a real
/// store would use. `fail_next` lets a test force the next N `put` calls to
/// return a transient error, for exercising the shutdown retry path (S3).
#[derive(Default)]
pub struct InMemoryChunkStore {
    inner: base::Mutex<InMemoryInner>,
}

#[derive(Default)]
struct InMemoryInner {
    by_key: base::FastHashMap<String, WireChunk>,
    puts_received: u64,
    fail_next: u32,
}

impl InMemoryChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `n` calls to `put` fail with a transient error.
    pub fn fail_next_puts(&self, n: u32) {
        self.inner.lock().fail_next = n;
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.lock().by_key.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn puts_received(&self) -> u64 {
        self.inner.lock().puts_received
    }
}

#[async_trait::async_trait]
impl ChunkStore for InMemoryChunkStore {
    async fn put(&self, chunks: &[WireChunk]) -> Result<(), Error> {
        let mut inner = self.inner.lock();
        inner.puts_received += 1;
        if inner.fail_next > 0 {
            inner.fail_next -= 1;
            return Err(err!(Unavailable, msg("injected transient store failure")));
        }
        for c in chunks {
            inner.by_key.insert(c.idempotency_key(), c.clone());
        }
        Ok(())
    }
}
