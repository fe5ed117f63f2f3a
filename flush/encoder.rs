// This file is part of Moonfire NVR, a security camera network video recorder.
// Copyright (C) 2025 The Moonfire NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! The chunk encoder capability set (spec §6) and one concrete
//! implementation.
//!
//! The core treats the encoder polymorphically; concrete variants are
//! chosen by configuration (design note: "dynamic dispatch over chunk
//! encoders").

use base::clock::SystemTime;
use base::{err, Error};
use std::io::Write as _;

/// Capability set a chunk's in-memory encoder must provide. `close` is
/// idempotent; `append` after `close` fails.
pub trait ChunkEncoder: Send + Sync {
    fn append(&mut self, entry_time: SystemTime, line: &str) -> Result<(), Error>;

    /// Idempotent: a second call is a no-op.
    fn close(&mut self);

    fn is_closed(&self) -> bool;

    /// `(from, to)` entry timestamps seen so far. Zero/zero if no entries.
    fn bounds(&self) -> (SystemTime, SystemTime);

    /// Number of entries appended.
    fn size(&self) -> u64;

    /// Bytes of entry payload before compression.
    fn uncompressed_size(&self) -> u64;

    /// Bytes of the encoded representation. Valid after `close`.
    fn bytes_size(&self) -> u64;

    /// `bytes_size() / target_chunk_size`, a fraction used to decide
    /// whether a chunk is "full enough" upstream of this subsystem.
    fn utilization(&self, target_chunk_size: u64) -> f64;

    /// Writes the encoded bytes to `sink`. Only meaningful after `close`.
    fn encode_to(&self, sink: &mut dyn std::io::Write) -> Result<(), Error>;
}

/// A [`ChunkEncoder`] that gzip-compresses newline-delimited entries
/// incrementally as they're appended.
pub struct GzipChunkEncoder {
    gz: Option<flate2::write::GzEncoder<Vec<u8>>>,
    closed_bytes: Option<Vec<u8>>,
    entries: u64,
    uncompressed_size: u64,
    from: SystemTime,
    to: SystemTime,
}

impl Default for GzipChunkEncoder {
    fn default() -> Self {
        GzipChunkEncoder {
            gz: Some(flate2::write::GzEncoder::new(
                Vec::new(),
                flate2::Compression::default(),
            )),
            closed_bytes: None,
            entries: 0,
            uncompressed_size: 0,
            from: SystemTime::default(),
            to: SystemTime::default(),
        }
    }
}

impl ChunkEncoder for GzipChunkEncoder {
    fn append(&mut self, entry_time: SystemTime, line: &str) -> Result<(), Error> {
        let gz = self
            .gz
            .as_mut()
            .ok_or_else(|| err!(FailedPrecondition, msg("append after close")))?;
        gz.write_all(line.as_bytes())
            .and_then(|_| gz.write_all(b"\n"))
            .map_err(|e| err!(Internal, msg("gzip write failed"), source(e)))?;
        self.uncompressed_size += line.len() as u64 + 1;
        if self.entries == 0 {
            self.from = entry_time;
        }
        self.to = entry_time;
        self.entries += 1;
        Ok(())
    }

    fn close(&mut self) {
        if let Some(gz) = self.gz.take() {
            // finish() only fails on an underlying writer I/O error; a
            // Vec<u8> sink never fails.
            self.closed_bytes = Some(gz.finish().expect("in-memory gzip sink never fails"));
        }
    }

    fn is_closed(&self) -> bool {
        self.closed_bytes.is_some()
    }

    fn bounds(&self) -> (SystemTime, SystemTime) {
        (self.from, self.to)
    }

    fn size(&self) -> u64 {
        self.entries
    }

    fn uncompressed_size(&self) -> u64 {
        self.uncompressed_size
    }

    fn bytes_size(&self) -> u64 {
        self.closed_bytes.as_ref().map_or(0, |b| b.len() as u64)
    }

    fn utilization(&self, target_chunk_size: u64) -> f64 {
        if target_chunk_size == 0 {
            return 0.0;
        }
        self.bytes_size() as f64 / target_chunk_size as f64
    }

    fn encode_to(&self, sink: &mut dyn std::io::Write) -> Result<(), Error> {
        let bytes = self
            .closed_bytes
            .as_ref()
            .ok_or_else(|| err!(FailedPrecondition, msg("encode_to before close")))?;
        sink.write_all(bytes)
            .map_err(|e| err!(Internal, msg("encode_to write failed"), source(e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_is_idempotent_and_allows_encode() {
        let mut enc = GzipChunkEncoder::default();
        enc.append(SystemTime(1), "hello").unwrap();
        enc.close();
        enc.close(); // no-op, doesn't panic or re-wrap.
        let mut out = Vec::new();
        enc.encode_to(&mut out).unwrap();
        assert!(!out.is_empty());
    }

    #[test]
    fn append_after_close_fails() {
        let mut enc = GzipChunkEncoder::default();
        enc.close();
        assert!(enc.append(SystemTime(1), "x").is_err());
    }

    #[test]
    fn bounds_track_first_and_last_entry() {
        let mut enc = GzipChunkEncoder::default();
        enc.append(SystemTime(5), "a").unwrap();
        enc.append(SystemTime(9), "b").unwrap();
        assert_eq!(enc.bounds(), (SystemTime(5), SystemTime(9)));
    }
}
