// This file is part of Moonfire NVR, a security camera network video recorder.
// Copyright (C) 2021 The Moonfire NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Typed configuration for the ingester, loaded from a TOML file.

use crate::{bail, err, Error};
use serde::Deserialize;

fn default_concurrent_flushes() -> usize {
    4
}
fn default_flush_check_period_secs() -> u64 {
    60
}
fn default_flush_op_timeout_secs() -> u64 {
    30
}
fn default_max_chunk_idle_secs() -> u64 {
    30 * 60
}
fn default_max_chunk_age_secs() -> u64 {
    2 * 60 * 60
}
fn default_retain_period_secs() -> u64 {
    15 * 60
}
fn default_block_size_bytes() -> u64 {
    256 * 1024
}
fn default_target_chunk_size_bytes() -> u64 {
    1536 * 1024
}
fn default_admin_bind_addr() -> String {
    "127.0.0.1:3100".to_owned()
}
fn default_chunk_store_dir() -> String {
    "./chunks".to_owned()
}

/// Configuration recognized by the flush core, per the configuration table
/// in the specification. Every field has a default, so an empty TOML file
/// produces a runnable (if conservative) ingester.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct Config {
    /// Number of flush worker queues and worker tasks (`N` in the spec).
    #[serde(default = "default_concurrent_flushes")]
    pub concurrent_flushes: usize,

    /// Interval between full sweeps of every stream.
    #[serde(default = "default_flush_check_period_secs")]
    pub flush_check_period_secs: u64,

    /// Per-flush-operation persistence deadline.
    #[serde(default = "default_flush_op_timeout_secs")]
    pub flush_op_timeout_secs: u64,

    /// Flush a chunk that hasn't been appended to in this long.
    #[serde(default = "default_max_chunk_idle_secs")]
    pub max_chunk_idle_secs: u64,

    /// Flush a chunk whose span (`to - from`) exceeds this.
    #[serde(default = "default_max_chunk_age_secs")]
    pub max_chunk_age_secs: u64,

    /// Delay between flush success and memory reclaim.
    #[serde(default = "default_retain_period_secs")]
    pub retain_period_secs: u64,

    /// Passed through to the chunk encoder facade.
    #[serde(default = "default_block_size_bytes")]
    pub block_size_bytes: u64,

    /// Passed through to the chunk encoder facade.
    #[serde(default = "default_target_chunk_size_bytes")]
    pub target_chunk_size_bytes: u64,

    /// Bind address for the admin HTTP server (`POST /flush`, `GET /metrics`).
    #[serde(default = "default_admin_bind_addr")]
    pub admin_bind_addr: String,

    /// Textual format for log lines: `"text"` or `"json"`.
    #[serde(default)]
    pub log_format: String,

    /// Root directory flushed chunks are persisted under.
    #[serde(default = "default_chunk_store_dir")]
    pub chunk_store_dir: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            concurrent_flushes: default_concurrent_flushes(),
            flush_check_period_secs: default_flush_check_period_secs(),
            flush_op_timeout_secs: default_flush_op_timeout_secs(),
            max_chunk_idle_secs: default_max_chunk_idle_secs(),
            max_chunk_age_secs: default_max_chunk_age_secs(),
            retain_period_secs: default_retain_period_secs(),
            block_size_bytes: default_block_size_bytes(),
            target_chunk_size_bytes: default_target_chunk_size_bytes(),
            admin_bind_addr: default_admin_bind_addr(),
            log_format: String::new(),
            chunk_store_dir: default_chunk_store_dir(),
        }
    }
}

impl Config {
    /// Parses a TOML document, then validates it.
    ///
    /// `ConcurrentFlushes <= 0` is the one startup/configuration error the
    /// core treats as fatal (spec §7).
    pub fn parse(toml_src: &str) -> Result<Self, Error> {
        let cfg: Config = toml::from_str(toml_src).err_kind(crate::ErrorKind::InvalidArgument)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), Error> {
        if self.concurrent_flushes == 0 {
            bail!(InvalidArgument, msg("concurrent_flushes must be > 0"));
        }
        if self.flush_op_timeout_secs == 0 {
            bail!(InvalidArgument, msg("flush_op_timeout_secs must be > 0"));
        }
        Ok(())
    }

    pub fn flush_check_period(&self) -> crate::clock::Duration {
        crate::clock::Duration::from_secs(self.flush_check_period_secs)
    }
    pub fn flush_op_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.flush_op_timeout_secs)
    }
    pub fn max_chunk_idle(&self) -> crate::clock::Duration {
        crate::clock::Duration::from_secs(self.max_chunk_idle_secs)
    }
    pub fn max_chunk_age(&self) -> crate::clock::Duration {
        crate::clock::Duration::from_secs(self.max_chunk_age_secs)
    }
    pub fn retain_period(&self) -> crate::clock::Duration {
        crate::clock::Duration::from_secs(self.retain_period_secs)
    }
}

use crate::ResultExt;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_has_defaults() {
        let cfg = Config::parse("").unwrap();
        assert_eq!(cfg.concurrent_flushes, 4);
        assert_eq!(cfg.retain_period_secs, 15 * 60);
    }

    #[test]
    fn rejects_zero_concurrent_flushes() {
        let err = Config::parse("concurrent_flushes = 0").unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidArgument);
    }

    #[test]
    fn overrides_apply() {
        let cfg = Config::parse(
            r#"
            concurrent_flushes = 8
            max_chunk_idle_secs = 5
            "#,
        )
        .unwrap();
        assert_eq!(cfg.concurrent_flushes, 8);
        assert_eq!(cfg.max_chunk_idle_secs, 5);
    }
}
