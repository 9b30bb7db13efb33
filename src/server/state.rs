use crate::frame::FramedRequest;
use crate::metrics::Metrics;
use crate::registry::Registry;
use arc_swap::ArcSwapOption;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

pub type OutboundSender = mpsc::UnboundedSender<FramedRequest>;
pub type OutboundReceiver = mpsc::UnboundedReceiver<FramedRequest>;

/// Handle to the currently attached tunnel client. Dropping the last `Arc`
/// to a handle closes its outbound channel, which is what lets a replaced
/// session's outbound pump notice it has nothing left to serve and exit.
pub struct TunnelHandle {
    pub outbound: OutboundSender,
    pub shutdown: Arc<Notify>,
}

/// Shared server state: cheaply cloneable, handed to every ingress task and
/// to the tunnel session task.
#[derive(Clone)]
pub struct ServerState {
    pub registry: Arc<Registry>,
    pub tunnel: Arc<ArcSwapOption<TunnelHandle>>,
    pub gateway_timeout: Duration,
    /// Upper bound on a single framed message (§10.2). A binary frame
    /// larger than this is treated as a `FrameDecode`-class transport error
    /// rather than decoded.
    pub max_frame_bytes: usize,
    pub metrics: Metrics,
}

impl ServerState {
    pub fn new(gateway_timeout: Duration, max_frame_bytes: usize, metrics: Metrics) -> Self {
        Self {
            registry: Arc::new(Registry::new()),
            tunnel: Arc::new(ArcSwapOption::from(None)),
            gateway_timeout,
            max_frame_bytes,
            metrics,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.tunnel.load().is_some()
    }

    pub fn current_outbound(&self) -> Option<Arc<TunnelHandle>> {
        self.tunnel.load_full()
    }
}
