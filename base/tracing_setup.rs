// This file is part of Moonfire NVR, a security camera network video recorder.
// Copyright (C) 2023 The Moonfire NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Logic for setting up a `tracing` subscriber according to our preferences.

use tracing::error;
use tracing_log::NormalizeEvent;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Layer;

/// Custom panic hook that logs instead of directly writing to stderr, so a
/// panic in a flush worker shows up with the same structure as any other
/// event.
fn panic_hook(p: &std::panic::PanicHookInfo) {
    let payload: Option<&str> = if let Some(s) = p.payload().downcast_ref::<&str>() {
        Some(*s)
    } else if let Some(s) = p.payload().downcast_ref::<String>() {
        Some(s)
    } else {
        None
    };
    error!(
        target: std::env!("CARGO_CRATE_NAME"),
        location = p.location().map(tracing::field::display),
        payload = payload.map(tracing::field::display),
        backtrace = %std::backtrace::Backtrace::force_capture(),
        "panic",
    );
}

/// Which textual format [`install`] should emit events in.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum LogFormat {
    /// Human-readable lines to stderr.
    #[default]
    Text,
    /// One JSON object per line, for shipping to a log collector.
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format {other:?}; expected text|json")),
        }
    }
}

fn filter() -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::builder()
        .with_default_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
        .with_env_var("INGESTER_LOG")
        .from_env_lossy()
}

/// Installs the process-wide tracing subscriber and panic hook.
///
/// Should be called exactly once, as early in `main` as possible, before any
/// other initialization that might log or panic.
pub fn install(format: LogFormat) {
    tracing_log::LogTracer::init().unwrap();
    match format {
        LogFormat::Json => {
            let sub = tracing_subscriber::registry().with(
                tracing_subscriber::fmt::Layer::new()
                    .with_writer(std::io::stderr)
                    .with_thread_names(true)
                    .json()
                    .with_filter(filter()),
            );
            tracing::subscriber::set_global_default(sub).unwrap();
        }
        LogFormat::Text => {
            let sub = tracing_subscriber::registry().with(
                tracing_subscriber::fmt::Layer::new()
                    .with_writer(std::io::stderr)
                    .with_thread_names(true)
                    .with_filter(filter()),
            );
            tracing::subscriber::set_global_default(sub).unwrap();
        }
    }

    let use_panic_hook = std::env::var("INGESTER_PANIC_HOOK")
        .map(|s| s != "false" && s != "0")
        .unwrap_or(true);
    if use_panic_hook {
        std::panic::set_hook(Box::new(&panic_hook));
    }
}

/// Installs a subscriber suitable for `cargo test`: writes go through the
/// test harness's captured-output mechanism instead of directly to stderr.
pub fn install_for_tests() {
    let sub = tracing_subscriber::registry().with(
        tracing_subscriber::fmt::Layer::new()
            .with_test_writer()
            .with_thread_names(true)
            .with_filter(filter()),
    );
    let _ = tracing::subscriber::set_global_default(sub);
}
