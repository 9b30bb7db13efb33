//! Tunnel session, server side (§4.4). Owns one websocket: an outbound pump
//! draining the server's outbound queue, and an inbound demultiplexer that
//! correlates response frames back to their ingress handler.

use crate::frame;
use crate::id;
use crate::server::state::{ServerState, TunnelHandle};
use crate::ws::{ExitReason, WsStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};

/// Runs the session to completion, then returns. Exits either because this
/// session was replaced by a newer one (nothing left to do here) or because
/// the websocket itself closed or errored (in which case this function owns
/// failing every pending request and detaching itself from `state`).
pub async fn run<S: WsStream + 'static>(ws: S, state: ServerState) {
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    let shutdown = Arc::new(Notify::new());
    let handle = Arc::new(TunnelHandle {
        outbound: outbound_tx,
        shutdown: shutdown.clone(),
    });

    if let Some(prev) = state.tunnel.swap(Some(handle.clone())) {
        warn!("tunnel: replacing previously attached client");
        prev.shutdown.notify_one();
        state.registry.fail_all();
    }
    metrics::gauge!("tunnelgate_tunnel_connected").set(1.0);
    info!("tunnel: client attached");

    let (mut sink, mut stream) = ws.split();

    let outbound_task = tokio::spawn(async move {
        while let Some(req) = outbound_rx.recv().await {
            let bytes = frame::encode_request(&req);
            if let Err(e) = sink.send(Message::Binary(bytes.to_vec())).await {
                warn!("tunnel: outbound write failed, error={}", e);
                break;
            }
        }
        let _ = sink.close().await;
    });

    let registry = state.registry.clone();
    let max_frame_bytes = state.max_frame_bytes;
    let exit = tokio::select! {
        _ = shutdown.notified() => ExitReason::Replaced,
        reason = inbound_demux(&mut stream, &registry, max_frame_bytes) => reason,
    };

    outbound_task.abort();

    match exit {
        ExitReason::Replaced => {
            info!("tunnel: session superseded by a newer client");
        }
        ExitReason::Closed | ExitReason::Error(_) => {
            if let ExitReason::Error(ref e) = exit {
                warn!("tunnel: session ended with error, error={}", e);
            } else {
                info!("tunnel: session closed by client");
            }
            let still_current = matches!(
                &*state.tunnel.load(),
                Some(current) if Arc::ptr_eq(current, &handle)
            );
            if still_current {
                state.tunnel.store(None);
                metrics::gauge!("tunnelgate_tunnel_connected").set(0.0);
            }
            state.registry.fail_all();
        }
    }
}

async fn inbound_demux<S>(
    stream: &mut S,
    registry: &crate::registry::Registry,
    max_frame_bytes: usize,
) -> ExitReason
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        match stream.next().await {
            Some(Ok(Message::Binary(data))) if data.len() > max_frame_bytes => {
                return ExitReason::Error(format!(
                    "frame of {} bytes exceeds max_frame_bytes ({})",
                    data.len(),
                    max_frame_bytes
                ));
            }
            Some(Ok(Message::Binary(data))) => match frame::decode_response(&data) {
                Ok(response) => {
                    let id = response
                        .headers
                        .iter()
                        .find(|(n, _)| n.eq_ignore_ascii_case(id::HEADER_NAME))
                        .map(|(_, v)| v.clone());
                    match id {
                        Some(id) => {
                            if !registry.complete(&id, response) {
                                warn!("tunnel: dropping response for unknown id, id={}", id);
                            }
                        }
                        None => warn!("tunnel: response frame missing correlation id"),
                    }
                }
                Err(e) => return ExitReason::Error(e.to_string()),
            },
            Some(Ok(Message::Text(text))) => {
                info!("tunnel: text frame ignored, len={}", text.len());
            }
            Some(Ok(Message::Close(_))) => return ExitReason::Closed,
            Some(Ok(_)) => {
                // Ping/Pong/Frame variants are handled by the websocket library.
            }
            Some(Err(e)) => return ExitReason::Error(e.to_string()),
            None => return ExitReason::Closed,
        }
    }
}
