pub mod ingress;
pub mod session;
pub mod state;

pub use state::ServerState;

use crate::admin::{self, AdminState};
use crate::config::ServerConfig;
use crate::metrics::Metrics;
use anyhow::Result;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

/// Runs the exit server: accepts public HTTP traffic and the single `/ws`
/// tunnel endpoint on the same listener, and (optionally) the admin surface
/// on a second one.
pub async fn run(config: ServerConfig, metrics: Metrics) -> Result<()> {
    let state = ServerState::new(config.gateway_timeout, config.max_frame_bytes, metrics.clone());

    if let Some(admin_addr) = config.admin_listen {
        let admin_state = AdminState {
            metrics,
            ready: {
                let state = state.clone();
                Arc::new(move || state.is_connected())
            },
        };
        tokio::spawn(async move {
            if let Err(e) = admin::serve(admin_addr, admin_state).await {
                error!("admin: server exited, error={}", e);
            }
        });
    }

    let listener = TcpListener::bind(config.listen).await?;
    info!("server: listening, addr={}", config.listen);

    loop {
        let (stream, peer_addr) = match listener.accept().await {
            Ok(v) => v,
            Err(e) => {
                error!("server: accept failed, error={}", e);
                continue;
            }
        };

        metrics::counter!("tunnelgate_connections_total").increment(1);
        let state = state.clone();

        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let svc = service_fn(move |req: Request<Incoming>| {
                let state = state.clone();
                async move { route(req, state, peer_addr).await }
            });

            if let Err(e) = auto::Builder::new(TokioExecutor::new())
                .http1()
                .keep_alive(true)
                .serve_connection_with_upgrades(io, svc)
                .await
            {
                if !e.to_string().contains("connection closed") {
                    error!("server: connection error, peer={}, error={}", peer_addr, e);
                }
            }
        });
    }
}

async fn route(
    mut req: Request<Incoming>,
    state: ServerState,
    peer: std::net::SocketAddr,
) -> Result<Response<BoxBody>, hyper::Error> {
    if req.uri().path() == "/ws" && hyper_tungstenite::is_upgrade_request(&req) {
        return upgrade_tunnel(req, state)
            .map(|resp| resp.map(|b| b.map_err(|never: std::convert::Infallible| match never {}).boxed()));
    }
    let _ = &mut req;
    ingress::handle(req, state, peer).await
}

fn upgrade_tunnel(
    mut req: Request<Incoming>,
    state: ServerState,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let (response, websocket) = match hyper_tungstenite::upgrade(&mut req, None) {
        Ok(pair) => pair,
        Err(e) => {
            error!("tunnel: websocket upgrade failed, error={}", e);
            let mut resp = Response::new(Full::new(Bytes::new()));
            *resp.status_mut() = hyper::StatusCode::BAD_REQUEST;
            return Ok(resp);
        }
    };

    tokio::spawn(async move {
        match websocket.await {
            Ok(ws) => session::run(ws, state).await,
            Err(e) => error!("tunnel: websocket handshake failed, error={}", e),
        }
    });

    Ok(response)
}
