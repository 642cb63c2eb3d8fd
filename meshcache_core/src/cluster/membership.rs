//! Cluster membership management
//!
//! The hash ring and the peer registry are kept behind a single lock so a
//! lookup can never observe a ring member without its peer handle (or the
//! other way round). Every admission updates both in one write section.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::cluster::ring::HashRing;
use crate::cluster::Peer;
use crate::error::{CacheError, CacheResult};
use crate::metrics;

/// Where a key should be served from.
pub enum Owner<V> {
    Local,
    Remote(Arc<dyn Peer<V>>),
}

impl<V> std::fmt::Debug for Owner<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Owner::Local => write!(f, "Local"),
            Owner::Remote(peer) => write!(f, "Remote({})", peer.addr()),
        }
    }
}

struct MembershipState<V> {
    self_addr: Option<String>,
    ring: HashRing,
    peers: HashMap<String, Arc<dyn Peer<V>>>,
}

/// Ring plus peer registry, guarded together.
pub struct Membership<V> {
    state: RwLock<MembershipState<V>>,
}

impl<V> Membership<V> {
    pub fn new(replicas: usize) -> Self {
        Self::with_ring(HashRing::new(replicas))
    }

    /// Start from a preconfigured (typically empty) ring, e.g. one with a
    /// custom hash function.
    pub fn with_ring(ring: HashRing) -> Self {
        Self {
            state: RwLock::new(MembershipState {
                self_addr: None,
                ring,
                peers: HashMap::new(),
            }),
        }
    }

    /// Record this node's own address and make it a ring member.
    pub async fn register_self(&self, peer: Arc<dyn Peer<V>>) -> CacheResult<()> {
        let mut state = self.state.write().await;
        if state.self_addr.is_some() {
            return Err(CacheError::AlreadyListening);
        }
        let addr = peer.addr().to_string();
        state.self_addr = Some(addr.clone());
        state.ring.add(&[addr.as_str()]);
        state.peers.insert(addr, peer);
        metrics::record_membership_change(state.peers.len());
        Ok(())
    }

    pub async fn self_addr(&self) -> Option<String> {
        self.state.read().await.self_addr.clone()
    }

    /// Register a newly learned peer.
    ///
    /// Returns `false` when the address was already known, in which case
    /// nothing changes.
    pub async fn admit(&self, peer: Arc<dyn Peer<V>>) -> bool {
        let mut state = self.state.write().await;
        let addr = peer.addr().to_string();
        if state.peers.contains_key(&addr) {
            return false;
        }
        state.ring.add(&[addr.as_str()]);
        state.peers.insert(addr, peer);
        metrics::record_membership_change(state.peers.len());
        true
    }

    pub async fn is_known(&self, addr: &str) -> bool {
        self.state.read().await.peers.contains_key(addr)
    }

    pub async fn get_peer(&self, addr: &str) -> CacheResult<Arc<dyn Peer<V>>> {
        let state = self.state.read().await;
        state
            .peers
            .get(addr)
            .cloned()
            .ok_or_else(|| CacheError::PeerNotFound(addr.to_string()))
    }

    /// Resolve the owner of `key` and its peer handle under one read lock.
    pub async fn owner_of(&self, key: &str) -> CacheResult<Owner<V>> {
        let state = self.state.read().await;
        let addr = state.ring.get(key)?;
        if state.self_addr.as_deref() == Some(addr) {
            return Ok(Owner::Local);
        }
        state
            .peers
            .get(addr)
            .cloned()
            .map(Owner::Remote)
            .ok_or_else(|| CacheError::PeerNotFound(addr.to_string()))
    }

    pub async fn owner_address(&self, key: &str) -> CacheResult<String> {
        let state = self.state.read().await;
        state.ring.get(key).map(str::to_string)
    }

    /// Snapshot of every registered peer handle, self included.
    pub async fn peers(&self) -> Vec<Arc<dyn Peer<V>>> {
        let state = self.state.read().await;
        state.peers.values().cloned().collect()
    }

    /// Known addresses, sorted.
    pub async fn addresses(&self) -> Vec<String> {
        let state = self.state.read().await;
        let mut addresses: Vec<String> = state.peers.keys().cloned().collect();
        addresses.sort();
        addresses
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.peers.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Number of virtual points currently on the ring.
    pub async fn ring_points(&self) -> usize {
        self.state.read().await.ring.len()
    }
}
