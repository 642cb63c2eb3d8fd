//! Cluster module for distributed key-value cache functionality
//!
//! This module holds the pieces that turn a set of independent nodes into
//! one cache: the consistent hash ring, the peer contract, the membership
//! aggregate that keeps ring and peer registry consistent, and the HTTP
//! transport that runs the join protocol.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::CacheResult;

pub mod broadcast;
pub mod http;
pub mod membership;
pub mod ring;

// Re-export main types for easier access
pub use broadcast::Broadcaster;
pub use http::{HttpPeer, HttpTransport, TransportStats};
pub use membership::{Membership, Owner};
pub use ring::{HashFn, HashRing, DEFAULT_REPLICAS};

/// A remote node, seen through the same get/set contract as a local store.
#[async_trait]
pub trait Peer<V>: Send + Sync {
    /// Read `key` from the peer.
    async fn get(&self, key: &str) -> CacheResult<V>;

    /// Write `key` on the peer.
    async fn set(&self, key: &str, value: &V) -> CacheResult<()>;

    /// Announce to the peer that `address` is joining the cluster.
    async fn connect(&self, address: &str) -> CacheResult<()>;

    fn addr(&self) -> &str;
}

/// Coordination layer: listening endpoint, peer registry and join protocol.
#[async_trait]
pub trait Transport<V>: Send + Sync {
    /// Start serving on `addr` and return the advertised self address.
    async fn listen(&self, addr: &str) -> CacheResult<String>;

    /// Join the cluster through the node at `addr`.
    async fn connect(&self, addr: &str) -> CacheResult<()>;

    async fn get_peer(&self, addr: &str) -> CacheResult<Arc<dyn Peer<V>>>;

    async fn close(&self) -> CacheResult<()>;
}

/// How an inbound request should be served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Consult the ring and forward when another node owns the key.
    Owner,
    /// Serve from the local store; the sender already picked this node.
    Local,
}

/// Capability used by the transport to answer reads.
#[async_trait]
pub trait KeyResolver<V>: Send + Sync {
    async fn resolve(&self, key: &str, route: Route) -> CacheResult<V>;
}

/// Capability used by the transport to apply writes.
#[async_trait]
pub trait KeyWriter<V>: Send + Sync {
    async fn write(&self, key: &str, value: V, route: Route) -> CacheResult<()>;
}
