//! Correlation registry (server side): maps an in-flight request id to the
//! response sink of the ingress handler waiting on it.
//!
//! Backed by `DashMap` for lock-free concurrent access from many ingress
//! handlers and the single inbound demultiplexer task.

use crate::frame::FramedResponse;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::oneshot;

pub type ResponseSink = oneshot::Sender<FramedResponse>;

#[derive(Default)]
pub struct Registry {
    pending: DashMap<String, ResponseSink>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            pending: DashMap::new(),
        }
    }

    /// Registers a fresh pending record. Fails if `id` is already present —
    /// this must not happen under unique ids, but a duplicate is a bug in
    /// the caller, not a transport condition.
    pub fn register(&self, id: String, sink: ResponseSink) -> Result<(), ResponseSink> {
        match self.pending.entry(id) {
            Entry::Occupied(_) => Err(sink),
            Entry::Vacant(v) => {
                v.insert(sink);
                Ok(())
            }
        }
    }

    /// Delivers a response to its waiting handler and removes the record.
    /// Returns `false` if `id` is unknown (late arrival or duplicate).
    pub fn complete(&self, id: &str, response: FramedResponse) -> bool {
        match self.pending.remove(id) {
            Some((_, sink)) => sink.send(response).is_ok(),
            None => false,
        }
    }

    /// Removes a pending record without delivery (gateway timeout). Dropping
    /// the sink is enough to notify anything still observing it, though the
    /// timed-out handler has by then already stopped waiting on its own.
    pub fn cancel(&self, id: &str) {
        self.pending.remove(id);
    }

    /// On tunnel teardown: removes every entry, dropping each sink so any
    /// still-waiting handler sees its receiver close and fails over.
    pub fn fail_all(&self) {
        self.pending.clear();
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn response(body: &str) -> FramedResponse {
        FramedResponse {
            status: 200,
            reason: "OK".into(),
            headers: vec![],
            body: Bytes::copy_from_slice(body.as_bytes()),
        }
    }

    #[tokio::test]
    async fn complete_delivers_to_the_registered_sink() {
        let registry = Registry::new();
        let (tx, rx) = tokio::sync::oneshot::channel();
        registry.register("id1".into(), tx).unwrap();
        assert!(registry.complete("id1", response("hi")));
        let got = rx.await.unwrap();
        assert_eq!(got.body, Bytes::from_static(b"hi"));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn complete_on_unknown_id_returns_false() {
        let registry = Registry::new();
        assert!(!registry.complete("ghost", response("x")));
    }

    #[tokio::test]
    async fn double_register_fails() {
        let registry = Registry::new();
        let (tx1, _rx1) = tokio::sync::oneshot::channel();
        let (tx2, _rx2) = tokio::sync::oneshot::channel();
        registry.register("dup".into(), tx1).unwrap();
        assert!(registry.register("dup".into(), tx2).is_err());
    }

    #[tokio::test]
    async fn cancel_removes_without_delivery() {
        let registry = Registry::new();
        let (tx, rx) = tokio::sync::oneshot::channel();
        registry.register("id1".into(), tx).unwrap();
        registry.cancel("id1");
        assert!(registry.is_empty());
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn fail_all_drops_every_sink() {
        let registry = Registry::new();
        let (tx1, rx1) = tokio::sync::oneshot::channel();
        let (tx2, rx2) = tokio::sync::oneshot::channel();
        registry.register("a".into(), tx1).unwrap();
        registry.register("b".into(), tx2).unwrap();
        registry.fail_all();
        assert!(registry.is_empty());
        assert!(rx1.await.is_err());
        assert!(rx2.await.is_err());
    }

    #[tokio::test]
    async fn no_cross_talk_under_concurrency() {
        let registry = std::sync::Arc::new(Registry::new());
        let mut receivers = Vec::new();
        for i in 0..50 {
            let (tx, rx) = tokio::sync::oneshot::channel();
            registry.register(format!("id{i}"), tx).unwrap();
            receivers.push((i, rx));
        }
        // Complete in reverse order to simulate reordered responses.
        for i in (0..50).rev() {
            assert!(registry.complete(&format!("id{i}"), response(&i.to_string())));
        }
        for (i, rx) in receivers {
            let got = rx.await.unwrap();
            assert_eq!(got.body, Bytes::copy_from_slice(i.to_string().as_bytes()));
        }
    }
}
