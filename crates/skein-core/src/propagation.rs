//! Best-effort block delivery to thread peers.
//!
//! Each peer gets its own FIFO queue drained by a dedicated task, so blocks
//! reach a given peer in commit order and a slow or dead peer never holds up
//! the others. A failed or timed-out delivery is logged and dropped; peers
//! recover missing history through ancestor fetching. Workers exit once
//! their queue has been idle for a while.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use skein_shared::types::PeerId;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Peer unreachable: {0}")]
    Unreachable(String),

    #[error("Peer rejected delivery: {0}")]
    Rejected(String),
}

/// Point-to-point delivery of serialized wire messages.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn send(&self, peer: &PeerId, data: Vec<u8>) -> Result<(), TransportError>;
}

type Queues = Arc<Mutex<HashMap<PeerId, mpsc::UnboundedSender<Vec<u8>>>>>;

pub struct Propagator {
    transport: Arc<dyn PeerTransport>,
    timeout: Duration,
    /// A worker with nothing to send for this long exits.
    idle: Duration,
    queues: Queues,
}

impl Propagator {
    pub fn new(transport: Arc<dyn PeerTransport>, timeout: Duration, idle: Duration) -> Self {
        Self {
            transport,
            timeout,
            idle,
            queues: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Queue `data` for `peer`. Never blocks on the network.
    pub fn enqueue(&self, peer: PeerId, data: Vec<u8>) {
        let Ok(mut queues) = self.queues.lock() else {
            warn!(peer = %peer.short(), "Delivery queues poisoned, dropping message");
            return;
        };

        let data = match queues.get(&peer) {
            Some(tx) => match tx.send(data) {
                Ok(()) => return,
                // Worker exited; start a fresh one below.
                Err(mpsc::error::SendError(data)) => data,
            },
            None => data,
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(data);
        let worker = Worker {
            peer,
            own: tx.clone(),
            transport: Arc::clone(&self.transport),
            timeout: self.timeout,
            idle: self.idle,
            queues: Arc::clone(&self.queues),
        };
        queues.insert(peer, tx);
        tokio::spawn(worker.run(rx));
    }

    /// Peers with a live delivery worker.
    pub fn active_peers(&self) -> usize {
        self.queues.lock().map(|q| q.len()).unwrap_or(0)
    }
}

struct Worker {
    peer: PeerId,
    own: mpsc::UnboundedSender<Vec<u8>>,
    transport: Arc<dyn PeerTransport>,
    timeout: Duration,
    idle: Duration,
    queues: Queues,
}

impl Worker {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<Vec<u8>>) {
        loop {
            let data = match tokio::time::timeout(self.idle, rx.recv()).await {
                Ok(Some(data)) => data,
                Ok(None) => return,
                Err(_) => match self.retire(&mut rx) {
                    Some(data) => data,
                    None => return,
                },
            };
            self.deliver(data).await;
        }
    }

    /// Drop our queue entry unless something slipped in. Enqueueing holds
    /// the same lock, so nothing is sent to a retired queue.
    fn retire(&self, rx: &mut mpsc::UnboundedReceiver<Vec<u8>>) -> Option<Vec<u8>> {
        let Ok(mut queues) = self.queues.lock() else {
            return None;
        };
        if let Ok(data) = rx.try_recv() {
            return Some(data);
        }
        if queues.get(&self.peer).is_some_and(|tx| tx.same_channel(&self.own)) {
            queues.remove(&self.peer);
        }
        debug!(peer = %self.peer.short(), "Delivery worker retired");
        None
    }

    async fn deliver(&self, data: Vec<u8>) {
        let peer = &self.peer;
        let size = data.len();
        match tokio::time::timeout(self.timeout, self.transport.send(peer, data)).await {
            Ok(Ok(())) => debug!(peer = %peer.short(), size, "Delivered"),
            Ok(Err(e)) => warn!(peer = %peer.short(), "Delivery failed: {}", e),
            Err(_) => warn!(peer = %peer.short(), timeout = ?self.timeout, "Delivery timed out"),
        }
    }
}

// ---------------------------------------------------------------------------
// In-process network
// ---------------------------------------------------------------------------

/// A delivered message: sender and raw wire bytes.
pub type Envelope = (PeerId, Vec<u8>);

/// Routes messages between nodes living in the same process.
#[derive(Default)]
pub struct MemoryNetwork {
    inboxes: RwLock<HashMap<PeerId, mpsc::UnboundedSender<Envelope>>>,
}

impl MemoryNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Attach `peer` and return its inbox. Re-registering replaces the old
    /// inbox.
    pub fn register(&self, peer: PeerId) -> mpsc::UnboundedReceiver<Envelope> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut inboxes) = self.inboxes.write() {
            inboxes.insert(peer, tx);
        }
        rx
    }

    pub fn disconnect(&self, peer: &PeerId) {
        if let Ok(mut inboxes) = self.inboxes.write() {
            inboxes.remove(peer);
        }
    }

    /// A transport that sends as `from`.
    pub fn transport(self: &Arc<Self>, from: PeerId) -> Arc<dyn PeerTransport> {
        Arc::new(MemoryTransport {
            from,
            network: Arc::clone(self),
        })
    }
}

struct MemoryTransport {
    from: PeerId,
    network: Arc<MemoryNetwork>,
}

#[async_trait]
impl PeerTransport for MemoryTransport {
    async fn send(&self, peer: &PeerId, data: Vec<u8>) -> Result<(), TransportError> {
        let inboxes = self
            .network
            .inboxes
            .read()
            .map_err(|_| TransportError::Unreachable("network poisoned".to_string()))?;
        let inbox = inboxes
            .get(peer)
            .ok_or_else(|| TransportError::Unreachable(peer.short()))?;
        inbox
            .send((self.from, data))
            .map_err(|_| TransportError::Unreachable(peer.short()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    const IDLE: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_per_peer_fifo() {
        let network = MemoryNetwork::new();
        let a = PeerId([1u8; 32]);
        let b = PeerId([2u8; 32]);
        let mut inbox = network.register(b);

        let propagator = Propagator::new(network.transport(a), Duration::from_secs(1), IDLE);
        for i in 0..20u8 {
            propagator.enqueue(b, vec![i]);
        }

        for i in 0..20u8 {
            let (from, data) = inbox.recv().await.unwrap();
            assert_eq!(from, a);
            assert_eq!(data, vec![i]);
        }
    }

    struct Stalled;

    #[async_trait]
    impl PeerTransport for Stalled {
        async fn send(&self, _peer: &PeerId, _data: Vec<u8>) -> Result<(), TransportError> {
            std::future::pending().await
        }
    }

    struct Counting {
        slow: PeerId,
        delivered: AtomicUsize,
    }

    #[async_trait]
    impl PeerTransport for Counting {
        async fn send(&self, peer: &PeerId, _data: Vec<u8>) -> Result<(), TransportError> {
            if *peer == self.slow {
                return Stalled.send(peer, Vec::new()).await;
            }
            self.delivered.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_stalled_peer_does_not_block_others() {
        let slow = PeerId([1u8; 32]);
        let fast = PeerId([2u8; 32]);
        let transport = Arc::new(Counting {
            slow,
            delivered: AtomicUsize::new(0),
        });
        let propagator = Propagator::new(transport.clone(), Duration::from_millis(50), IDLE);

        propagator.enqueue(slow, vec![1]);
        propagator.enqueue(slow, vec![2]);
        propagator.enqueue(fast, vec![1]);
        propagator.enqueue(fast, vec![2]);

        tokio::time::timeout(Duration::from_secs(2), async {
            while transport.delivered.load(Ordering::SeqCst) < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("fast peer should receive both messages");
    }

    #[tokio::test]
    async fn test_idle_workers_retire() {
        let network = MemoryNetwork::new();
        let a = PeerId([1u8; 32]);
        let mut inboxes = Vec::new();
        let propagator = Propagator::new(
            network.transport(a),
            Duration::from_secs(1),
            Duration::from_millis(30),
        );
        for i in 2..12u8 {
            let peer = PeerId([i; 32]);
            inboxes.push(network.register(peer));
            propagator.enqueue(peer, vec![i]);
        }
        assert_eq!(propagator.active_peers(), 10);

        tokio::time::timeout(Duration::from_secs(2), async {
            while propagator.active_peers() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("idle workers should exit");

        // A retired peer gets a fresh worker.
        propagator.enqueue(PeerId([2u8; 32]), vec![42]);
        assert_eq!(inboxes[0].recv().await.unwrap().1, vec![2]);
        assert_eq!(inboxes[0].recv().await.unwrap().1, vec![42]);
    }

    #[tokio::test]
    async fn test_unreachable_peer_is_dropped() {
        let network = MemoryNetwork::new();
        let transport = network.transport(PeerId([1u8; 32]));
        assert!(transport.send(&PeerId([2u8; 32]), vec![1]).await.is_err());
    }
}
