// This file is part of Moonfire NVR, a security camera network video recorder.
// Copyright (C) 2025 The Moonfire NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! The `run` subcommand: loads configuration, wires up the flush
//! controller and admin HTTP server, and serves until a shutdown signal
//! arrives.

use base::config::Config;
use base::tracing_setup::{self, LogFormat};
use base::{err, Error};
use bpaf::Bpaf;
use flush::controller::{FlushController, FlushControllerConfig};
use flush::metrics::Metrics;
use flush::registry::TenantRegistry;
use flush::replay::ReplayController;
use flush::store::{ChunkStore, FileChunkStore};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Bpaf)]
pub struct Args {
    /// Path to the TOML configuration file.
    #[bpaf(long, argument("PATH"))]
    config: PathBuf,
}

pub async fn run(args: Args) -> Result<(), Error> {
    let toml_src = std::fs::read_to_string(&args.config).map_err(|e| {
        err!(
            NotFound,
            msg("reading config file {}", args.config.display()),
            source(e)
        )
    })?;
    let cfg = Config::parse(&toml_src)?;

    let log_format = if cfg.log_format.is_empty() {
        LogFormat::default()
    } else {
        LogFormat::from_str(&cfg.log_format)
            .map_err(|e| err!(InvalidArgument, msg("{}", e)))?
    };
    tracing_setup::install(log_format);
    info!(config = %args.config.display(), "starting");

    let (shutdown_tx, shutdown_rx) = base::shutdown::channel();

    let clocks = Arc::new(base::clock::RealClocks::default());
    let registry = Arc::new(TenantRegistry::new());
    let prom_registry = prometheus::Registry::new();
    let metrics = Arc::new(Metrics::new(&prom_registry));
    let store: Arc<dyn ChunkStore> = Arc::new(FileChunkStore::new(cfg.chunk_store_dir.clone()));

    let controller = Arc::new(FlushController::new(
        Arc::clone(&clocks),
        Arc::clone(&registry),
        store,
        Arc::clone(&metrics),
        ReplayController::new(),
        FlushControllerConfig::from(&cfg),
    ));
    controller.init_flush_queues();

    let sweeps = tokio::task::spawn({
        let controller = Arc::clone(&controller);
        let shutdown_rx = shutdown_rx.clone();
        async move { controller.run_periodic_sweeps(shutdown_rx).await }
    });

    let admin_addr = cfg
        .admin_bind_addr
        .parse()
        .map_err(|e| err!(InvalidArgument, msg("invalid admin_bind_addr"), source(e)))?;
    let admin = tokio::task::spawn(crate::admin::serve(
        admin_addr,
        Arc::clone(&controller),
        prom_registry,
        shutdown_rx.clone(),
    ));

    wait_for_signal().await;
    info!("shutdown signal received, draining");
    drop(shutdown_tx);

    let _ = sweeps.await;
    let _ = admin.await;
    controller.flush().await;
    info!("shutdown complete");

    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigint = signal(SignalKind::interrupt()).expect("install SIGINT handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");
    tokio::select! {
        _ = sigint.recv() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
