//! Trait alias bridging the server side (`hyper_tungstenite`) and the
//! client side (`tokio_tungstenite`) of the same websocket protocol: both
//! ultimately hand back a `tungstenite::Message` stream/sink, so the
//! session logic in [`crate::server::session`] and [`crate::client::session`]
//! is written once against this shared shape.

use futures_util::{Sink, Stream};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

pub trait WsStream:
    Stream<Item = Result<Message, WsError>> + Sink<Message, Error = WsError> + Unpin + Send
{
}

impl<T> WsStream for T where
    T: Stream<Item = Result<Message, WsError>> + Sink<Message, Error = WsError> + Unpin + Send
{
}

/// Why a tunnel session's read loop stopped.
#[derive(Debug)]
pub enum ExitReason {
    /// A newer tunnel session took over; this session's own teardown
    /// (registry fail-over) was already performed by the replacement.
    Replaced,
    Closed,
    Error(String),
}
