//! # skein-core
//!
//! Thread replication engine. Each thread is an append-only, encrypted,
//! signed block graph with a single head per peer. Local writes go through
//! the commit pipeline in [`thread`]; remote blocks are verified, causally
//! ordered and reconciled against the local head, merging when histories
//! diverge.

pub mod error;
pub mod handlers;
pub mod index;
pub mod node;
pub mod propagation;
pub mod store;
pub mod thread;
pub mod updates;

pub use error::{Result, ThreadError};
pub use index::Index;
pub use node::{NewThread, Node, NodeConfig, Received};
pub use propagation::{MemoryNetwork, PeerTransport, Propagator, TransportError};
pub use store::{BlockStore, FsBlockStore, MemoryBlockStore};
pub use thread::{Applied, Thread};
pub use updates::{ThreadUpdate, UpdateStream};

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::sync::mpsc;

    use skein_shared::identity::Identity;
    use skein_shared::types::{ThreadId, ThreadType};

    use crate::propagation::Envelope;
    use crate::{BlockStore, Index, MemoryNetwork, NewThread, Node, NodeConfig, Received};

    /// A node wired to an in-process network, with its inbox left for the
    /// test to drain.
    pub struct TestPeer {
        pub node: Arc<Node>,
        pub inbox: mpsc::UnboundedReceiver<Envelope>,
    }

    impl TestPeer {
        pub fn new(network: &Arc<MemoryNetwork>, store: Arc<dyn BlockStore>) -> Self {
            Self::with_config(network, store, NodeConfig::default())
        }

        pub fn with_config(
            network: &Arc<MemoryNetwork>,
            store: Arc<dyn BlockStore>,
            config: NodeConfig,
        ) -> Self {
            let identity = Identity::generate();
            let peer = identity.peer_id();
            let inbox = network.register(peer);
            let node = Node::new(
                identity,
                store,
                Index::in_memory().unwrap(),
                network.transport(peer),
                config,
            )
            .unwrap();
            Self {
                node: Arc::new(node),
                inbox,
            }
        }

        /// Next raw message from the inbox.
        pub async fn next(&mut self) -> Envelope {
            tokio::time::timeout(Duration::from_secs(2), self.inbox.recv())
                .await
                .expect("timed out waiting for a message")
                .expect("inbox closed")
        }

        /// Receive the next message, which must apply cleanly.
        pub async fn deliver(&mut self) -> Received {
            let (from, data) = self.next().await;
            self.node.receive(from, &data).await.unwrap()
        }
    }

    pub fn new_thread(name: &str, thread_type: ThreadType) -> NewThread {
        NewThread {
            name: name.to_string(),
            key: None,
            thread_type,
            schema: None,
        }
    }

    /// Alice owns a thread Bob has joined; both heads are in sync.
    pub async fn pair(thread_type: ThreadType) -> (TestPeer, TestPeer, ThreadId) {
        let store: Arc<dyn BlockStore> = Arc::new(crate::MemoryBlockStore::default());
        pair_on(thread_type, Arc::clone(&store), store).await
    }

    /// Like [`pair`], with each side writing through its own store.
    pub async fn pair_on(
        thread_type: ThreadType,
        alice_store: Arc<dyn BlockStore>,
        bob_store: Arc<dyn BlockStore>,
    ) -> (TestPeer, TestPeer, ThreadId) {
        let network = MemoryNetwork::new();
        let mut alice = TestPeer::new(&network, alice_store);
        let mut bob = TestPeer::new(&network, bob_store);

        let id = alice
            .node
            .add_thread(new_thread("holiday", thread_type))
            .await
            .unwrap()
            .id;
        alice
            .node
            .add_invite(&id, bob.node.peer_id())
            .await
            .unwrap();

        let Received::Invite(invite) = bob.deliver().await else {
            panic!("expected an invite");
        };
        bob.node.accept_invite(&invite).await.unwrap();
        alice.deliver().await;

        let a = alice.node.thread(&id).unwrap().head().await;
        let b = bob.node.thread(&id).unwrap().head().await;
        assert_eq!(a, b);
        (alice, bob, id)
    }
}
