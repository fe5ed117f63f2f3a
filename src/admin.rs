// This file is part of Moonfire NVR, a security camera network video recorder.
// Copyright (C) 2025 The Moonfire NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! The admin HTTP server: `POST /flush` triggers an immediate,
//! non-destructive sweep of every stream; `GET /metrics` serves the
//! process's Prometheus text exposition.

use base::clock::Clocks;
use bytes::Bytes;
use flush::controller::FlushController;
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use hyper_util::server::graceful::GracefulShutdown;
use prometheus::{Encoder, Registry, TextEncoder};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, info_span, warn, Instrument as _};

type BoxBody = http_body_util::combinators::BoxBody<Bytes, Infallible>;

fn empty() -> BoxBody {
    Empty::new().map_err(|never| match never {}).boxed()
}

fn full(body: Vec<u8>) -> BoxBody {
    Full::new(Bytes::from(body))
        .map_err(|never| match never {})
        .boxed()
}

async fn handle<C: Clocks + Send + Sync + 'static>(
    req: Request<Incoming>,
    controller: Arc<FlushController<C>>,
    registry: Arc<Registry>,
) -> Result<Response<BoxBody>, Infallible> {
    let resp = match (req.method(), req.uri().path()) {
        (&Method::POST, "/flush") => {
            controller.flush_handler();
            Response::builder()
                .status(StatusCode::NO_CONTENT)
                .body(empty())
                .unwrap()
        }
        (&Method::GET, "/metrics") => {
            let encoder = TextEncoder::new();
            let families = registry.gather();
            let mut buf = Vec::new();
            if let Err(e) = encoder.encode(&families, &mut buf) {
                error!(err = %e, "failed to encode metrics");
                return Ok(Response::builder()
                    .status(StatusCode::INTERNAL_SERVER_ERROR)
                    .body(empty())
                    .unwrap());
            }
            Response::builder()
                .status(StatusCode::OK)
                .header("content-type", encoder.format_type())
                .body(full(buf))
                .unwrap()
        }
        _ => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(empty())
            .unwrap(),
    };
    Ok(resp)
}

/// Serves the admin HTTP endpoint on `addr` until `shutdown_rx` fires,
/// completing any in-flight request before returning.
pub async fn serve<C: Clocks + Send + Sync + 'static>(
    addr: SocketAddr,
    controller: Arc<FlushController<C>>,
    registry: Registry,
    shutdown_rx: base::shutdown::Receiver,
) {
    let registry = Arc::new(registry);
    let listener = match TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(%addr, err = %e, "failed to bind admin HTTP listener");
            return;
        }
    };
    info!(%addr, "admin HTTP server listening");

    let graceful = GracefulShutdown::new();
    let span = info_span!("admin_http");
    async {
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.clone().into_future() => {
                    info!("stopping admin HTTP server");
                    break;
                }
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(a) => a,
                        Err(e) => {
                            warn!(err = %e, "admin HTTP accept failed");
                            continue;
                        }
                    };
                    let io = TokioIo::new(stream);
                    let controller = Arc::clone(&controller);
                    let registry = Arc::clone(&registry);
                    let service = service_fn(move |req| {
                        handle(req, Arc::clone(&controller), Arc::clone(&registry))
                    });
                    let conn = http1::Builder::new().serve_connection(io, service);
                    let conn = graceful.watch(conn);
                    tokio::task::spawn(async move {
                        if let Err(e) = conn.await {
                            warn!(%peer, err = %e, "admin HTTP connection error");
                        }
                    });
                }
            }
        }
        graceful.shutdown().await;
    }
    .instrument(span)
    .await;
}
