use std::fmt;

/// Per-request and tunnel-wide failure kinds.
///
/// Per-request kinds (`UpstreamIo`, `Timeout`, `UnknownCorrelation`, `RoutingMiss`)
/// are always converted to a status code for the public caller and never tear
/// down the session. `FrameDecode` and `TunnelIo` are fatal for the owning
/// tunnel session: the session closes and every pending record is failed.
#[derive(Debug)]
pub enum TunnelError {
    FrameDecode(String),
    TunnelIo(String),
    UpstreamIo(String),
    Timeout,
    UnknownCorrelation(String),
    RoutingMiss(String),
    NoTunnel,
}

impl TunnelError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, TunnelError::FrameDecode(_) | TunnelError::TunnelIo(_))
    }

    /// Status code delivered to the public caller for per-request errors.
    pub fn status(&self) -> http::StatusCode {
        match self {
            TunnelError::Timeout => http::StatusCode::GATEWAY_TIMEOUT,
            _ => http::StatusCode::BAD_GATEWAY,
        }
    }
}

impl fmt::Display for TunnelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TunnelError::FrameDecode(msg) => write!(f, "frame decode error: {msg}"),
            TunnelError::TunnelIo(msg) => write!(f, "tunnel io error: {msg}"),
            TunnelError::UpstreamIo(msg) => write!(f, "upstream io error: {msg}"),
            TunnelError::Timeout => write!(f, "gateway timeout"),
            TunnelError::UnknownCorrelation(id) => write!(f, "unknown correlation id: {id}"),
            TunnelError::RoutingMiss(host) => write!(f, "no upstream mapped for host: {host}"),
            TunnelError::NoTunnel => write!(f, "no tunnel client attached"),
        }
    }
}

impl std::error::Error for TunnelError {}
