//! End-to-end scenarios driven over real loopback sockets: a tunnelgate
//! server, a tunnelgate client, and one or more stub upstream listeners,
//! all running in-process. Mirrors the teacher's style of spinning up a
//! real network stack for integration coverage rather than mocking it.

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use tunnelgate::config::{BackoffConfig, ClientConfig, ServerConfig};
use tunnelgate::frame::{decode_response, Framed, FramedResponse};
use tunnelgate::metrics::Metrics;
use tunnelgate::router::UpstreamRouter;

const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

fn shared_metrics() -> Metrics {
    static METRICS: std::sync::OnceLock<Metrics> = std::sync::OnceLock::new();
    METRICS.get_or_init(Metrics::install).clone()
}

/// Binds an ephemeral port and immediately releases it so a real component
/// can bind the same address a moment later.
fn free_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

async fn spawn_stub_upstream<F, Fut>(addr: SocketAddr, handler: F)
where
    F: Fn(Request<Incoming>) -> Fut + Clone + Send + 'static,
    Fut: std::future::Future<Output = Response<Full<Bytes>>> + Send + 'static,
{
    let listener = TcpListener::bind(addr).await.expect("bind stub upstream");
    tokio::spawn(async move {
        loop {
            let (stream, _) = match listener.accept().await {
                Ok(v) => v,
                Err(_) => continue,
            };
            let handler = handler.clone();
            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let svc = service_fn(move |req: Request<Incoming>| {
                    let handler = handler.clone();
                    async move { Ok::<_, std::convert::Infallible>(handler(req).await) }
                });
                let _ = auto::Builder::new(TokioExecutor::new())
                    .http1()
                    .serve_connection_with_upgrades(io, svc)
                    .await;
            });
        }
    });
}

fn text_response(status: u16, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let body = body.into();
    Response::builder()
        .status(status)
        .header("content-length", body.len().to_string())
        .body(Full::new(body))
        .unwrap()
}

fn spawn_server(gateway_timeout: Duration) -> SocketAddr {
    spawn_server_with_frame_limit(gateway_timeout, MAX_FRAME_BYTES)
}

fn spawn_server_with_frame_limit(gateway_timeout: Duration, max_frame_bytes: usize) -> SocketAddr {
    let listen = free_addr();
    let config = ServerConfig {
        listen,
        admin_listen: None,
        gateway_timeout,
        max_frame_bytes,
        token: None,
    };
    let metrics = shared_metrics();
    tokio::spawn(async move {
        let _ = tunnelgate::server::run(config, metrics).await;
    });
    listen
}

fn spawn_client(remote: SocketAddr, upstream_spec: &str) {
    let config = ClientConfig {
        remote: remote.to_string(),
        router: UpstreamRouter::parse(upstream_spec),
        admin_listen: None,
        max_frame_bytes: MAX_FRAME_BYTES,
        backoff: BackoffConfig::default(),
        token: None,
    };
    let metrics = shared_metrics();
    tokio::spawn(async move {
        let _ = tunnelgate::client::run(config, metrics).await;
    });
}

/// Sends a raw HTTP/1.1 request over a fresh connection and decodes the
/// response through the crate's own frame codec.
async fn send_request(
    addr: SocketAddr,
    method: &str,
    target: &str,
    host: &str,
) -> FramedResponse {
    let mut stream = {
        // The server's listener may not be bound yet the instant it is
        // spawned (current-thread test runtime hasn't polled that task),
        // so retry briefly rather than failing on the startup race.
        let mut last_err = None;
        let mut connected = None;
        for _ in 0..40 {
            match TcpStream::connect(addr).await {
                Ok(s) => {
                    connected = Some(s);
                    break;
                }
                Err(e) => {
                    last_err = Some(e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
        connected.unwrap_or_else(|| panic!("connect to server: {:?}", last_err.unwrap()))
    };
    let request = format!(
        "{method} {target} HTTP/1.1\r\nHost: {host}\r\nConnection: close\r\ncontent-length: 0\r\n\r\n"
    );
    stream
        .write_all(request.as_bytes())
        .await
        .expect("write request");

    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = stream.read(&mut chunk).await.expect("read response");
        if n == 0 {
            panic!("connection closed before a full response was received");
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Ok(resp) = decode_response(&buf) {
            return resp;
        }
    }
}

/// The first request after a client dials may race the websocket handshake;
/// retry briefly until the tunnel is attached.
async fn send_request_retrying(addr: SocketAddr, method: &str, target: &str, host: &str) -> FramedResponse {
    for attempt in 0..40 {
        let resp = send_request(addr, method, target, host).await;
        if resp.status != 502 || attempt == 39 {
            return resp;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    unreachable!()
}

#[tokio::test]
async fn hello() {
    let upstream = free_addr();
    spawn_stub_upstream(upstream, |_req| async { text_response(200, "hi") }).await;

    let server = spawn_server(Duration::from_secs(5));
    spawn_client(server, &format!("http://{upstream}"));

    let resp = send_request_retrying(server, "GET", "/", "example.com").await;
    assert_eq!(resp.status, 200);
    assert_eq!(resp.body, Bytes::from_static(b"hi"));
}

#[tokio::test]
async fn query_and_path_are_forwarded_verbatim() {
    let upstream = free_addr();
    spawn_stub_upstream(upstream, |req| async move {
        let path = req.uri().path().to_string();
        let query = req.uri().query().unwrap_or("").to_string();
        text_response(200, format!("{path}|{query}"))
    })
    .await;

    let server = spawn_server(Duration::from_secs(5));
    spawn_client(server, &format!("http://{upstream}"));

    let resp = send_request_retrying(server, "GET", "/a/b?x=1&y=2", "example.com").await;
    assert_eq!(resp.status, 200);
    assert_eq!(resp.body, Bytes::from_static(b"/a/b|x=1&y=2"));
}

#[tokio::test]
async fn multi_host_routes_to_distinct_upstreams() {
    let u1 = free_addr();
    let u2 = free_addr();
    spawn_stub_upstream(u1, |_req| async { text_response(200, "from-u1") }).await;
    spawn_stub_upstream(u2, |_req| async { text_response(200, "from-u2") }).await;

    let server = spawn_server(Duration::from_secs(5));
    spawn_client(
        server,
        &format!("a.example=http://{u1}, b.example=http://{u2}"),
    );

    let resp_a = send_request_retrying(server, "GET", "/", "a.example").await;
    assert_eq!(resp_a.body, Bytes::from_static(b"from-u1"));

    let resp_b = send_request(server, "GET", "/", "b.example").await;
    assert_eq!(resp_b.body, Bytes::from_static(b"from-u2"));
}

#[tokio::test]
async fn slow_upstream_times_out_with_504() {
    let upstream = free_addr();
    spawn_stub_upstream(upstream, |_req| async {
        tokio::time::sleep(Duration::from_secs(10)).await;
        text_response(200, "too late")
    })
    .await;

    let server = spawn_server(Duration::from_millis(300));
    spawn_client(server, &format!("http://{upstream}"));

    let started = std::time::Instant::now();
    let resp = send_request_retrying(server, "GET", "/", "example.com").await;
    assert_eq!(resp.status, 504);
    assert!(
        started.elapsed() < Duration::from_secs(2),
        "timeout should fire close to the configured deadline, took {:?}",
        started.elapsed()
    );
}

#[tokio::test]
async fn fifty_concurrent_requests_receive_their_own_response() {
    let upstream = free_addr();
    spawn_stub_upstream(upstream, |req| async move {
        let n = req.uri().path().trim_start_matches('/').to_string();
        text_response(200, n)
    })
    .await;

    let server = spawn_server(Duration::from_secs(5));
    spawn_client(server, &format!("http://{upstream}"));

    // Prime the tunnel so the concurrent batch below doesn't race the handshake.
    send_request_retrying(server, "GET", "/warmup", "example.com").await;

    let mut tasks = Vec::new();
    for i in 0..50 {
        tasks.push(tokio::spawn(async move {
            let resp = send_request(server, "GET", &format!("/{i}"), "example.com").await;
            (i, resp)
        }));
    }
    for task in tasks {
        let (i, resp) = task.await.expect("task panicked");
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, Bytes::from(i.to_string()));
    }
}

#[tokio::test]
async fn unreachable_upstream_yields_502() {
    // An address nothing is listening on: bind-then-drop leaves the port free
    // but nothing accepts connections to it.
    let dead_upstream = free_addr();

    let server = spawn_server(Duration::from_secs(5));
    spawn_client(server, &format!("http://{dead_upstream}"));

    let resp = send_request_retrying(server, "GET", "/", "example.com").await;
    assert_eq!(resp.status, 502);
    assert!(!resp.body.is_empty());
}

#[tokio::test]
async fn no_tunnel_attached_yields_502_immediately() {
    let server = spawn_server(Duration::from_secs(5));
    // No client is dialed — the registry never sees this request.
    let resp = send_request(server, "GET", "/", "example.com").await;
    assert_eq!(resp.status, 502);
    assert_eq!(resp.header("x-inlets-id"), None);
}

#[tokio::test]
async fn oversized_response_frame_ends_the_tunnel_session() {
    const SMALL_FRAME_LIMIT: usize = 1024;
    let upstream = free_addr();
    // Well over the server's configured bound, forcing its inbound
    // demultiplexer to reject the frame before decoding it.
    let oversized_body = "x".repeat(SMALL_FRAME_LIMIT * 4);
    spawn_stub_upstream(upstream, move |_req| {
        let oversized_body = oversized_body.clone();
        async move { text_response(200, oversized_body) }
    })
    .await;

    let server = spawn_server_with_frame_limit(Duration::from_secs(5), SMALL_FRAME_LIMIT);
    spawn_client(server, &format!("http://{upstream}"));

    // The request itself still gets a 502 once the tunnel session tears
    // down and fails every pending request.
    let resp = send_request_retrying(server, "GET", "/", "example.com").await;
    assert_eq!(resp.status, 502);
}
