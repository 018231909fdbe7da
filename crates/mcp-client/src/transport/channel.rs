//! In-process transport pair.
//!
//! [`ChannelTransport`] is the client end; [`ChannelPeer`] is handed to
//! whatever plays the server (an embedded implementation or a scripted
//! test double).

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex, Notify};

use super::{McpTransport, TransportError};
use crate::codec::{self, CodecError};
use crate::protocol::Envelope;

type Inbound = Result<Vec<u8>, String>;

/// Client end of an in-process transport.
pub struct ChannelTransport {
    outbound: parking_lot::Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    inbound: Mutex<mpsc::UnboundedReceiver<Inbound>>,
    closed: Notify,
    alive: AtomicBool,
}

impl ChannelTransport {
    /// Create a connected transport/peer pair.
    pub fn pair() -> (Self, ChannelPeer) {
        let (to_peer, from_client) = mpsc::unbounded_channel();
        let (to_client, from_peer) = mpsc::unbounded_channel();
        let transport = Self {
            outbound: parking_lot::Mutex::new(Some(to_peer)),
            inbound: Mutex::new(from_peer),
            closed: Notify::new(),
            alive: AtomicBool::new(true),
        };
        let peer = ChannelPeer {
            tx: to_client,
            rx: from_client,
        };
        (transport, peer)
    }
}

#[async_trait]
impl McpTransport for ChannelTransport {
    async fn send(&self, frame: &[u8]) -> Result<(), TransportError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let outbound = self.outbound.lock();
        let tx = outbound.as_ref().ok_or(TransportError::Closed)?;
        tx.send(frame.to_vec())
            .map_err(|_| TransportError::Disconnected("peer dropped".into()))
    }

    async fn recv(&self) -> Option<Result<Vec<u8>, TransportError>> {
        if !self.alive.load(Ordering::SeqCst) {
            return None;
        }
        let mut inbound = self.inbound.lock().await;
        tokio::select! {
            _ = self.closed.notified() => None,
            msg = inbound.recv() => match msg {
                Some(Ok(frame)) => Some(Ok(frame)),
                Some(Err(reason)) => {
                    self.alive.store(false, Ordering::SeqCst);
                    Some(Err(TransportError::Disconnected(reason)))
                }
                None => {
                    self.alive.store(false, Ordering::SeqCst);
                    None
                }
            },
        }
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn shutdown(&self) {
        self.alive.store(false, Ordering::SeqCst);
        self.outbound.lock().take();
        self.closed.notify_one();
    }
}

/// Server end of an in-process transport.
pub struct ChannelPeer {
    tx: mpsc::UnboundedSender<Inbound>,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl ChannelPeer {
    /// Next frame the client sent. `None` once the client shut down.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }

    /// Next frame the client sent, decoded.
    pub async fn recv_envelope(&mut self) -> Option<Result<Envelope, CodecError>> {
        let frame = self.rx.recv().await?;
        Some(codec::decode(&frame))
    }

    /// Deliver a raw frame to the client.
    pub fn send(&self, frame: Vec<u8>) -> Result<(), TransportError> {
        self.tx.send(Ok(frame)).map_err(|_| TransportError::Closed)
    }

    /// Deliver an envelope to the client.
    pub fn send_envelope(&self, envelope: &Envelope) -> Result<(), TransportError> {
        self.send(codec::encode(envelope))
    }

    /// Make the client's next `recv` fail with a transport error.
    pub fn fail(self, reason: impl Into<String>) {
        let _ = self.tx.send(Err(reason.into()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn frames_flow_both_ways() {
        let (transport, mut peer) = ChannelTransport::pair();
        transport.send(b"ping").await.unwrap();
        assert_eq!(peer.recv().await.unwrap(), b"ping".to_vec());

        peer.send_envelope(&Envelope::response(1_i64.into(), json!({}))).unwrap();
        let frame = transport.recv().await.unwrap().unwrap();
        assert!(matches!(codec::decode(&frame).unwrap(), Envelope::Response { .. }));
    }

    #[tokio::test]
    async fn dropping_peer_ends_the_sequence() {
        let (transport, peer) = ChannelTransport::pair();
        drop(peer);
        assert!(transport.recv().await.is_none());
        assert!(!transport.is_alive());
    }

    #[tokio::test]
    async fn peer_failure_surfaces_as_transport_error() {
        let (transport, peer) = ChannelTransport::pair();
        peer.fail("reset by peer");
        let err = transport.recv().await.unwrap().unwrap_err();
        assert!(matches!(err, TransportError::Disconnected(ref r) if r == "reset by peer"));
        assert!(transport.recv().await.is_none());
    }

    #[tokio::test]
    async fn shutdown_wakes_pending_recv_and_closes_peer() {
        let (transport, mut peer) = ChannelTransport::pair();
        let transport = std::sync::Arc::new(transport);

        let reader = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.recv().await.is_none() })
        };
        tokio::task::yield_now().await;

        transport.shutdown().await;
        assert!(reader.await.unwrap());
        assert!(peer.recv().await.is_none());
        assert!(matches!(transport.send(b"x").await, Err(TransportError::Closed)));
    }
}
