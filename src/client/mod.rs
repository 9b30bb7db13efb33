pub mod session;

use crate::admin::{self, AdminState};
use crate::config::ClientConfig;
use crate::metrics::Metrics;
use anyhow::Result;
use bytes::Bytes;
use http_body_util::Full;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_tungstenite::connect_async;
use tracing::{error, info, warn};

pub type HttpClient = Client<HttpConnector, Full<Bytes>>;

/// Redial loop (§10.3): owns the client-side tunnel session and reconnects
/// with exponential backoff + jitter on every session exit.
pub async fn run(config: ClientConfig, metrics: Metrics) -> Result<()> {
    let connected = Arc::new(AtomicBool::new(false));

    if let Some(admin_addr) = config.admin_listen {
        let admin_state = AdminState {
            metrics: metrics.clone(),
            ready: {
                let connected = connected.clone();
                Arc::new(move || connected.load(Ordering::Relaxed))
            },
        };
        tokio::spawn(async move {
            if let Err(e) = admin::serve(admin_addr, admin_state).await {
                error!("admin: server exited, error={}", e);
            }
        });
    }

    let http_client: HttpClient = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
    let router = Arc::new(config.router);
    let url = format!("ws://{}/ws", config.remote);
    let mut backoff = config.backoff.initial;

    loop {
        metrics::counter!("tunnelgate_reconnect_attempts_total").increment(1);
        match connect_async(&url).await {
            Ok((ws, _response)) => {
                info!("tunnel: connected, remote={}", config.remote);
                connected.store(true, Ordering::Relaxed);
                backoff = config.backoff.initial;

                let exit = session::run(
                    ws,
                    router.clone(),
                    http_client.clone(),
                    config.max_frame_bytes,
                )
                .await;
                connected.store(false, Ordering::Relaxed);
                warn!("tunnel: session ended, reason={:?}", exit);
            }
            Err(e) => {
                warn!(
                    "tunnel: dial failed, remote={}, error={}, retry_in={:?}",
                    config.remote, e, backoff
                );
            }
        }

        let jitter = 1.0 + rand::thread_rng().gen_range(0.0..0.25);
        tokio::time::sleep(backoff.mul_f64(jitter)).await;
        backoff = std::cmp::min(backoff.mul_f64(config.backoff.multiplier), config.backoff.max);
    }
}
