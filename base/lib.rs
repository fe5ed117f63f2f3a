// This file is part of Moonfire NVR, a security camera network video recorder.
// Copyright (C) 2018 The Moonfire NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Ambient pieces shared by every crate in the workspace: error handling,
//! clocks, graceful shutdown, tracing setup, and configuration.

pub mod clock;
pub mod config;
pub mod error;
pub mod shutdown;
pub mod strutil;
pub mod tracing_setup;

pub use crate::error::{Error, ErrorKind, ResultExt};

/// Hasher-parameterized map using a fixed-seed `ahash` build, for in-memory
/// indexes that don't need DoS resistance but do want speed.
pub type FastHashMap<K, V> = std::collections::HashMap<K, V, ahash::RandomState>;
pub type FastHashSet<K> = std::collections::HashSet<K, ahash::RandomState>;

/// Re-exported so call sites don't need a direct `parking_lot` dependency
/// just to name the lock types returned by this crate's APIs.
pub use parking_lot::{Condvar, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
