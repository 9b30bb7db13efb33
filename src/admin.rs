//! Health/readiness/metrics surface. Bound only when `--admin-listen` is
//! set; purely observational, never on the tunneled request path.

use crate::metrics::Metrics;
use anyhow::Result;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

fn full_body(data: impl Into<Bytes>) -> BoxBody {
    Full::new(data.into()).map_err(|never| match never {}).boxed()
}

/// `ready` reports whether the process is in a state worth routing traffic
/// to: for the server, whether a tunnel client is currently attached; for
/// the client, whether the tunnel session is currently connected.
#[derive(Clone)]
pub struct AdminState {
    pub metrics: Metrics,
    pub ready: Arc<dyn Fn() -> bool + Send + Sync>,
}

fn handle_admin(req: Request<Incoming>, state: AdminState) -> Result<Response<BoxBody>, hyper::Error> {
    match req.uri().path() {
        "/health" | "/healthz" => Ok(Response::builder()
            .status(200)
            .body(full_body(r#"{"status":"ok"}"#))
            .unwrap()),

        "/ready" | "/readyz" => {
            let ready = (state.ready)();
            Ok(Response::builder()
                .status(if ready { 200 } else { 503 })
                .body(full_body(format!(r#"{{"ready":{ready}}}"#)))
                .unwrap())
        }

        "/metrics" => Ok(Response::builder()
            .status(200)
            .header("content-type", "text/plain; version=0.0.4; charset=utf-8")
            .body(full_body(state.metrics.render()))
            .unwrap()),

        _ => Ok(Response::builder()
            .status(404)
            .body(full_body(r#"{"error":"not found"}"#))
            .unwrap()),
    }
}

pub async fn serve(listen: SocketAddr, state: AdminState) -> Result<()> {
    let listener = TcpListener::bind(listen).await?;
    info!("admin: listening, addr={}", listen);

    loop {
        let (stream, _) = listener.accept().await?;
        let state = state.clone();

        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let svc = service_fn(move |req: Request<Incoming>| {
                let state = state.clone();
                async move { handle_admin(req, state) }
            });

            if let Err(e) = auto::Builder::new(TokioExecutor::new())
                .http1()
                .keep_alive(true)
                .serve_connection_with_upgrades(io, svc)
                .await
            {
                if !e.to_string().contains("connection closed") {
                    error!("admin: connection error, error={}", e);
                }
            }
        });
    }
}
