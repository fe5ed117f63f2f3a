// This file is part of Moonfire NVR, a security camera network video recorder.
// Copyright (C) 2025 The Moonfire NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! The ingester flush subsystem: per-stream chunk lifecycle, the priority
//! queue of pending flush operations, the fixed pool of flush workers, the
//! periodic sweeper, and the controller that owns all of it.

pub mod chunk;
pub mod controller;
pub mod encoder;
pub mod labels;
pub mod metrics;
pub mod op;
pub mod persist;
pub mod queue;
pub mod reclaim;
pub mod registry;
pub mod replay;
pub mod store;
pub mod stream;
pub mod sweeper;
pub mod tenant;
pub mod worker;

pub use chunk::ChunkDescriptor;
pub use controller::{FlushController, FlushControllerConfig};
pub use encoder::{ChunkEncoder, GzipChunkEncoder};
pub use labels::{Fingerprint, LabelSet};
pub use op::FlushOp;
pub use registry::{TenantInstance, TenantRegistry};
pub use replay::ReplayController;
pub use store::{ChunkStore, InMemoryChunkStore, WireChunk};
pub use stream::Stream;
