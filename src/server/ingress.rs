//! Public ingress handler (§4.3): turns one inbound public HTTP request into
//! a framed request on the tunnel, waits for the correlated response (or the
//! gateway timeout), and writes the result back to the public caller.

use crate::deadline;
use crate::error::TunnelError;
use crate::frame::{Framed, FramedRequest, FramedResponse};
use crate::id;
use crate::server::state::ServerState;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Request, Response};
use std::net::SocketAddr;
use std::time::Instant;

type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

fn full_body(data: impl Into<Bytes>) -> BoxBody {
    Full::new(data.into()).map_err(|never| match never {}).boxed()
}

pub async fn handle(
    req: Request<Incoming>,
    state: ServerState,
    _peer: SocketAddr,
) -> Result<Response<BoxBody>, hyper::Error> {
    let started = Instant::now();
    let id = id::mint();

    let method = req.method().to_string();
    let target = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    let mut headers: Vec<(String, String)> = req
        .headers()
        .iter()
        .map(|(n, v)| (n.as_str().to_string(), String::from_utf8_lossy(v.as_bytes()).into_owned()))
        .collect();

    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            return Ok(status_response(
                hyper::StatusCode::BAD_REQUEST,
                format!("failed to read request body: {e}"),
            ))
        }
    };

    let mut framed = FramedRequest {
        method,
        target,
        headers: std::mem::take(&mut headers),
        body,
    };
    framed.set_header(id::HEADER_NAME, id.clone());

    let outcome = dispatch(framed, &state, &id).await;

    let label = match &outcome {
        Ok(_) => "ok",
        Err(TunnelError::Timeout) => "timeout",
        Err(_) => "bad_gateway",
    };
    metrics::counter!("tunnelgate_requests_total", "outcome" => label).increment(1);
    metrics::histogram!("tunnelgate_request_duration_seconds")
        .record(started.elapsed().as_secs_f64());

    let response = match outcome {
        Ok(framed_response) => into_hyper_response(framed_response),
        Err(e) => status_response(e.status(), e.to_string()),
    };
    Ok(response)
}

async fn dispatch(
    framed: FramedRequest,
    state: &ServerState,
    id: &str,
) -> Result<FramedResponse, TunnelError> {
    let handle = state
        .current_outbound()
        .ok_or(TunnelError::NoTunnel)?;

    let (tx, rx) = tokio::sync::oneshot::channel();
    state
        .registry
        .register(id.to_string(), tx)
        .map_err(|_| TunnelError::UpstreamIo("duplicate request id".into()))?;

    if handle.outbound.send(framed).is_err() {
        state.registry.cancel(id);
        return Err(TunnelError::NoTunnel);
    }

    metrics::gauge!("tunnelgate_pending_requests").increment(1.0);
    let result = deadline::await_response(rx, state.gateway_timeout, id, &state.registry).await;
    metrics::gauge!("tunnelgate_pending_requests").decrement(1.0);
    result
}

fn into_hyper_response(framed: FramedResponse) -> Response<BoxBody> {
    let mut builder = Response::builder().status(framed.status);
    for (name, value) in &framed.headers {
        builder = builder.header(name, value);
    }
    builder
        .body(full_body(framed.body))
        .unwrap_or_else(|e| status_response(hyper::StatusCode::BAD_GATEWAY, e.to_string()))
}

fn status_response(status: hyper::StatusCode, body: String) -> Response<BoxBody> {
    Response::builder()
        .status(status)
        .body(full_body(body))
        .unwrap_or_else(|_| {
            let mut r = Response::new(full_body(Bytes::new()));
            *r.status_mut() = hyper::StatusCode::INTERNAL_SERVER_ERROR;
            r
        })
}
