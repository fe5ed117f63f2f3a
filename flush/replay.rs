// This file is part of Moonfire NVR, a security camera network video recorder.
// Copyright (C) 2025 The Moonfire NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! The replay controller: a counter shared with the WAL subsystem
//! representing in-memory payload pressure. Updated atomically; no lock
//! needed (spec §5).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct ReplayController(Arc<AtomicU64>);

impl ReplayController {
    pub fn new() -> Self {
        ReplayController(Arc::new(AtomicU64::new(0)))
    }

    /// Reports that `n` bytes of uncompressed in-memory payload have been
    /// reclaimed, relieving WAL replay backpressure.
    pub fn sub(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    /// Cumulative bytes reported reclaimed so far.
    pub fn reclaimed(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}
