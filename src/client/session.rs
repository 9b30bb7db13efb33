//! Tunnel session, client side (§4.5). Reads framed requests off the
//! websocket, dispatches each to its resolved upstream in a fresh task (so a
//! slow upstream never stalls other in-flight requests), and writes framed
//! responses back through a single outbound writer task.

use crate::client::HttpClient;
use crate::frame::{self, Framed, FramedRequest, FramedResponse};
use crate::id;
use crate::router::{self, UpstreamRouter};
use crate::ws::{ExitReason, WsStream};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use http_body_util::{BodyExt, Full};
use hyper::Request;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};

pub async fn run<S: WsStream + 'static>(
    ws: S,
    router: Arc<UpstreamRouter>,
    http_client: HttpClient,
    max_frame_bytes: usize,
) -> ExitReason {
    let (mut sink, mut stream) = ws.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Bytes>();

    let writer_task = tokio::spawn(async move {
        while let Some(bytes) = out_rx.recv().await {
            if let Err(e) = sink.send(Message::Binary(bytes.to_vec())).await {
                warn!("tunnel: outbound write failed, error={}", e);
                break;
            }
        }
        let _ = sink.close().await;
    });

    let exit = loop {
        match stream.next().await {
            Some(Ok(Message::Binary(data))) if data.len() > max_frame_bytes => {
                break ExitReason::Error(format!(
                    "frame of {} bytes exceeds max_frame_bytes ({})",
                    data.len(),
                    max_frame_bytes
                ));
            }
            Some(Ok(Message::Binary(data))) => match frame::decode_request(&data) {
                Ok(req) => {
                    let router = router.clone();
                    let client = http_client.clone();
                    let out_tx = out_tx.clone();
                    tokio::spawn(async move {
                        let bytes = dispatch_to_upstream(req, &router, &client).await;
                        let _ = out_tx.send(bytes);
                    });
                }
                Err(e) => break ExitReason::Error(e.to_string()),
            },
            Some(Ok(Message::Text(text))) => {
                info!("tunnel: text frame ignored, len={}", text.len());
            }
            Some(Ok(Message::Close(_))) => break ExitReason::Closed,
            Some(Ok(_)) => {}
            Some(Err(e)) => break ExitReason::Error(e.to_string()),
            None => break ExitReason::Closed,
        }
    };

    drop(out_tx);
    writer_task.abort();
    exit
}

async fn dispatch_to_upstream(
    req: FramedRequest,
    router: &UpstreamRouter,
    client: &HttpClient,
) -> Bytes {
    let correlation_id = req.header(id::HEADER_NAME).unwrap_or("").to_string();
    let host = req.header("host").unwrap_or("").to_string();
    let base = router.resolve(&host);

    let mut response = if base.is_empty() {
        synthesize_bad_gateway(&format!("no upstream mapped for host: {host}"))
    } else {
        let uri = router::forwarded_uri(base, &req.target);
        match send_upstream(client, &req, &uri).await {
            Ok(resp) => resp,
            Err(e) => synthesize_bad_gateway(&e),
        }
    };
    response.set_header(id::HEADER_NAME, correlation_id);
    frame::encode_response(&response)
}

async fn send_upstream(
    client: &HttpClient,
    req: &FramedRequest,
    uri: &str,
) -> Result<FramedResponse, String> {
    let method =
        hyper::Method::from_bytes(req.method.as_bytes()).map_err(|e| format!("invalid method: {e}"))?;

    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in &req.headers {
        if name.eq_ignore_ascii_case(id::HEADER_NAME) {
            continue;
        }
        builder = builder.header(name, value);
    }
    let hyper_req = builder
        .body(Full::new(req.body.clone()))
        .map_err(|e| format!("failed to build upstream request: {e}"))?;

    let resp = client
        .request(hyper_req)
        .await
        .map_err(|e| format!("upstream request failed: {e}"))?;

    let status = resp.status().as_u16();
    let reason = resp
        .status()
        .canonical_reason()
        .unwrap_or("")
        .to_string();
    let headers = resp
        .headers()
        .iter()
        .map(|(n, v)| (n.as_str().to_string(), String::from_utf8_lossy(v.as_bytes()).into_owned()))
        .collect();
    let body = resp
        .into_body()
        .collect()
        .await
        .map_err(|e| format!("failed to read upstream body: {e}"))?
        .to_bytes();

    Ok(FramedResponse {
        status,
        reason,
        headers,
        body,
    })
}

fn synthesize_bad_gateway(message: &str) -> FramedResponse {
    FramedResponse {
        status: 502,
        reason: "Bad Gateway".into(),
        headers: vec![("content-type".into(), "text/plain".into())],
        body: Bytes::copy_from_slice(message.as_bytes()),
    }
}
