//! In-memory transport
//!
//! A channel-backed transport hub for tests and in-process simulation.
//! Endpoints that join a common topic are connected to each other, which
//! mirrors the rendezvous behavior of a real discovery substrate, and
//! severed links surface as close events on both sides.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use hearth_core::{MemNetwork, Transport, JoinOpts, Topic};
//!
//! let net = MemNetwork::new();
//! let a = net.endpoint(peer_a);
//! let b = net.endpoint(peer_b);
//!
//! a.join(topic, JoinOpts::default()).await?;
//! b.join(topic, JoinOpts::default()).await?;
//! // both now receive TransportEvent::PeerConnected
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{RwLock, mpsc};

use crate::error::TransportError;
use crate::identity::PeerId;
use crate::transport::{JoinOpts, Topic, Transport, TransportEvent};

const EVENT_BUFFER: usize = 1024;

struct EndpointState {
    tx: mpsc::Sender<TransportEvent>,
    links: HashSet<PeerId>,
    topics: HashMap<Topic, JoinOpts>,
}

struct NetInner {
    endpoints: Mutex<HashMap<PeerId, EndpointState>>,
}

/// In-process transport hub
///
/// Creates [`MemTransport`] endpoints and routes events between them.
#[derive(Clone)]
pub struct MemNetwork {
    inner: Arc<NetInner>,
}

impl Default for MemNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl MemNetwork {
    /// Create an empty hub
    pub fn new() -> Self {
        Self {
            inner: Arc::new(NetInner {
                endpoints: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Create and register an endpoint for a peer
    pub fn endpoint(&self, peer: PeerId) -> MemTransport {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let state = EndpointState {
            tx,
            links: HashSet::new(),
            topics: HashMap::new(),
        };
        self.inner
            .endpoints
            .lock()
            .expect("endpoint map lock poisoned")
            .insert(peer, state);

        MemTransport {
            local: peer,
            net: self.inner.clone(),
            inbox: RwLock::new(rx),
        }
    }

    /// Sever the link between two peers
    ///
    /// Both sides observe a close event; their topic memberships remain,
    /// so a later re-join reconnects them.
    pub async fn disconnect(&self, a: &PeerId, b: &PeerId) {
        let mut notify = Vec::new();
        {
            let mut endpoints = self.inner.endpoints.lock().expect("endpoint map lock poisoned");
            let severed_a = endpoints
                .get_mut(a)
                .map(|s| s.links.remove(b))
                .unwrap_or(false);
            let severed_b = endpoints
                .get_mut(b)
                .map(|s| s.links.remove(a))
                .unwrap_or(false);

            if severed_a && let Some(state) = endpoints.get(a) {
                notify.push((state.tx.clone(), TransportEvent::PeerClosed { peer: *b }));
            }
            if severed_b && let Some(state) = endpoints.get(b) {
                notify.push((state.tx.clone(), TransportEvent::PeerClosed { peer: *a }));
            }
        }

        for (tx, event) in notify {
            let _ = tx.send(event).await;
        }
    }

    /// Remove a peer entirely, closing every link it holds
    pub async fn drop_peer(&self, peer: &PeerId) {
        let mut notify = Vec::new();
        {
            let mut endpoints = self.inner.endpoints.lock().expect("endpoint map lock poisoned");
            let Some(state) = endpoints.remove(peer) else {
                return;
            };
            for linked in state.links {
                if let Some(other) = endpoints.get_mut(&linked) {
                    other.links.remove(peer);
                    notify.push((other.tx.clone(), TransportEvent::PeerClosed { peer: *peer }));
                }
            }
        }

        for (tx, event) in notify {
            let _ = tx.send(event).await;
        }
    }

    /// Inject a connection error on one side of a link
    ///
    /// The link is severed; `at` observes an error event and the other
    /// side a close event.
    pub async fn fail_link(&self, at: &PeerId, other: &PeerId, reason: impl Into<String>) {
        let reason = reason.into();
        let mut notify = Vec::new();
        {
            let mut endpoints = self.inner.endpoints.lock().expect("endpoint map lock poisoned");
            if let Some(state) = endpoints.get_mut(at)
                && state.links.remove(other)
            {
                notify.push((
                    state.tx.clone(),
                    TransportEvent::PeerError {
                        peer: *other,
                        reason: reason.clone(),
                    },
                ));
            }
            if let Some(state) = endpoints.get_mut(other)
                && state.links.remove(at)
            {
                notify.push((state.tx.clone(), TransportEvent::PeerClosed { peer: *at }));
            }
        }

        for (tx, event) in notify {
            let _ = tx.send(event).await;
        }
    }
}

/// One endpoint on a [`MemNetwork`]
pub struct MemTransport {
    local: PeerId,
    net: Arc<NetInner>,
    inbox: RwLock<mpsc::Receiver<TransportEvent>>,
}

impl MemTransport {
    fn wants_connection(a: &JoinOpts, b: &JoinOpts) -> bool {
        (a.client && b.server) || (a.server && b.client)
    }
}

#[async_trait]
impl Transport for MemTransport {
    fn local_id(&self) -> PeerId {
        self.local
    }

    async fn join(&self, topic: Topic, opts: JoinOpts) -> Result<(), TransportError> {
        let mut notify = Vec::new();
        {
            let mut endpoints = self.net.endpoints.lock().expect("endpoint map lock poisoned");
            if !endpoints.contains_key(&self.local) {
                return Err(TransportError::ConnectionClosed);
            }

            // Collect members of the topic we should connect to
            let candidates: Vec<(PeerId, JoinOpts)> = endpoints
                .iter()
                .filter(|(id, _)| **id != self.local)
                .filter_map(|(id, state)| state.topics.get(&topic).map(|o| (*id, *o)))
                .collect();

            endpoints
                .get_mut(&self.local)
                .ok_or(TransportError::ConnectionClosed)?
                .topics
                .insert(topic, opts);

            for (peer, peer_opts) in candidates {
                let linked = endpoints
                    .get(&self.local)
                    .map(|s| s.links.contains(&peer))
                    .unwrap_or(true);
                if linked || !Self::wants_connection(&opts, &peer_opts) {
                    continue;
                }

                if let Some(local) = endpoints.get_mut(&self.local) {
                    local.links.insert(peer);
                    notify.push((local.tx.clone(), TransportEvent::PeerConnected { peer }));
                }
                if let Some(remote) = endpoints.get_mut(&peer) {
                    remote.links.insert(self.local);
                    notify.push((
                        remote.tx.clone(),
                        TransportEvent::PeerConnected { peer: self.local },
                    ));
                }
            }
        }

        for (tx, event) in notify {
            let _ = tx.send(event).await;
        }
        Ok(())
    }

    async fn leave(&self, topic: Topic) -> Result<(), TransportError> {
        let mut endpoints = self.net.endpoints.lock().expect("endpoint map lock poisoned");
        if let Some(state) = endpoints.get_mut(&self.local) {
            state.topics.remove(&topic);
        }
        Ok(())
    }

    async fn send(&self, peer: &PeerId, data: Bytes) -> Result<(), TransportError> {
        let tx = {
            let endpoints = self.net.endpoints.lock().expect("endpoint map lock poisoned");
            let local = endpoints
                .get(&self.local)
                .ok_or(TransportError::ConnectionClosed)?;
            if !local.links.contains(peer) {
                return Err(TransportError::PeerNotConnected(peer.short()));
            }
            endpoints
                .get(peer)
                .map(|s| s.tx.clone())
                .ok_or_else(|| TransportError::PeerNotConnected(peer.short()))?
        };

        tx.send(TransportEvent::Data {
            peer: self.local,
            payload: data,
        })
        .await
        .map_err(|_| TransportError::SendFailed("endpoint gone".into()))
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        let mut inbox = self.inbox.write().await;
        inbox.recv().await
    }

    fn is_connected(&self, peer: &PeerId) -> bool {
        let endpoints = self.net.endpoints.lock().expect("endpoint map lock poisoned");
        endpoints
            .get(&self.local)
            .map(|s| s.links.contains(peer))
            .unwrap_or(false)
    }

    fn connected_peers(&self) -> Vec<PeerId> {
        let endpoints = self.net.endpoints.lock().expect("endpoint map lock poisoned");
        endpoints
            .get(&self.local)
            .map(|s| s.links.iter().copied().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topic() -> Topic {
        Topic::new([0x11; 32])
    }

    #[tokio::test]
    async fn test_join_connects_topic_members() {
        let net = MemNetwork::new();
        let id_a = PeerId::generate();
        let id_b = PeerId::generate();
        let a = net.endpoint(id_a);
        let b = net.endpoint(id_b);

        a.join(topic(), JoinOpts::default()).await.unwrap();
        b.join(topic(), JoinOpts::default()).await.unwrap();

        match a.next_event().await.unwrap() {
            TransportEvent::PeerConnected { peer } => assert_eq!(peer, id_b),
            other => panic!("unexpected event: {:?}", other),
        }
        match b.next_event().await.unwrap() {
            TransportEvent::PeerConnected { peer } => assert_eq!(peer, id_a),
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(a.is_connected(&id_b));
        assert!(b.is_connected(&id_a));
    }

    #[tokio::test]
    async fn test_rejoin_does_not_duplicate_connections() {
        let net = MemNetwork::new();
        let id_a = PeerId::generate();
        let id_b = PeerId::generate();
        let a = net.endpoint(id_a);
        let b = net.endpoint(id_b);

        a.join(topic(), JoinOpts::default()).await.unwrap();
        b.join(topic(), JoinOpts::default()).await.unwrap();
        b.join(topic(), JoinOpts::default()).await.unwrap();

        let _ = a.next_event().await.unwrap();
        // No second connect event should be pending for a
        let pending =
            tokio::time::timeout(std::time::Duration::from_millis(20), a.next_event()).await;
        assert!(pending.is_err());
    }

    #[tokio::test]
    async fn test_send_and_receive() {
        let net = MemNetwork::new();
        let id_a = PeerId::generate();
        let id_b = PeerId::generate();
        let a = net.endpoint(id_a);
        let b = net.endpoint(id_b);

        a.join(topic(), JoinOpts::default()).await.unwrap();
        b.join(topic(), JoinOpts::default()).await.unwrap();
        let _ = a.next_event().await;
        let _ = b.next_event().await;

        a.send(&id_b, Bytes::from_static(b"hello")).await.unwrap();
        match b.next_event().await.unwrap() {
            TransportEvent::Data { peer, payload } => {
                assert_eq!(peer, id_a);
                assert_eq!(&payload[..], b"hello");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_send_to_unlinked_peer_fails() {
        let net = MemNetwork::new();
        let id_a = PeerId::generate();
        let id_b = PeerId::generate();
        let a = net.endpoint(id_a);
        let _b = net.endpoint(id_b);

        let err = a.send(&id_b, Bytes::from_static(b"x")).await.unwrap_err();
        assert!(matches!(err, TransportError::PeerNotConnected(_)));
    }

    #[tokio::test]
    async fn test_disconnect_notifies_both_sides() {
        let net = MemNetwork::new();
        let id_a = PeerId::generate();
        let id_b = PeerId::generate();
        let a = net.endpoint(id_a);
        let b = net.endpoint(id_b);

        a.join(topic(), JoinOpts::default()).await.unwrap();
        b.join(topic(), JoinOpts::default()).await.unwrap();
        let _ = a.next_event().await;
        let _ = b.next_event().await;

        net.disconnect(&id_a, &id_b).await;

        assert!(matches!(
            a.next_event().await.unwrap(),
            TransportEvent::PeerClosed { peer } if peer == id_b
        ));
        assert!(matches!(
            b.next_event().await.unwrap(),
            TransportEvent::PeerClosed { peer } if peer == id_a
        ));
        assert!(!a.is_connected(&id_b));
    }

    #[tokio::test]
    async fn test_rejoin_after_disconnect_reconnects() {
        let net = MemNetwork::new();
        let id_a = PeerId::generate();
        let id_b = PeerId::generate();
        let a = net.endpoint(id_a);
        let b = net.endpoint(id_b);

        a.join(topic(), JoinOpts::default()).await.unwrap();
        b.join(topic(), JoinOpts::default()).await.unwrap();
        let _ = a.next_event().await;
        let _ = b.next_event().await;

        net.disconnect(&id_a, &id_b).await;
        let _ = a.next_event().await;
        let _ = b.next_event().await;

        // Topic membership survives the disconnect
        a.join(topic(), JoinOpts::default()).await.unwrap();
        assert!(matches!(
            b.next_event().await.unwrap(),
            TransportEvent::PeerConnected { peer } if peer == id_a
        ));
    }

    #[tokio::test]
    async fn test_fail_link_surfaces_error() {
        let net = MemNetwork::new();
        let id_a = PeerId::generate();
        let id_b = PeerId::generate();
        let a = net.endpoint(id_a);
        let b = net.endpoint(id_b);

        a.join(topic(), JoinOpts::default()).await.unwrap();
        b.join(topic(), JoinOpts::default()).await.unwrap();
        let _ = a.next_event().await;
        let _ = b.next_event().await;

        net.fail_link(&id_a, &id_b, "reset by peer").await;
        match a.next_event().await.unwrap() {
            TransportEvent::PeerError { peer, reason } => {
                assert_eq!(peer, id_b);
                assert_eq!(reason, "reset by peer");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
