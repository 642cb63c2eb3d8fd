//! A cache node: local store, membership and transport wired together
//!
//! `NodeRouter` decides where a key is served. Requests that arrive from a
//! client (or from the node's own API) consult the ring and are forwarded to
//! the owner when it is another node; requests that a peer already forwarded
//! are served from the local store.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use crate::cluster::{
    HttpTransport, KeyResolver, KeyWriter, Membership, Owner, Route, Transport,
};
use crate::config::CacheConfig;
use crate::error::{CacheError, CacheResult};
use crate::log::log_cache_operation;
use crate::metrics;
use crate::payload::CacheValue;
use crate::store::Store;

/// Serves reads and writes from the local store or the owning peer
pub struct NodeRouter<V> {
    store: Store<V>,
    membership: Arc<Membership<V>>,
}

impl<V: CacheValue> NodeRouter<V> {
    pub fn new(store: Store<V>, membership: Arc<Membership<V>>) -> Self {
        Self { store, membership }
    }

    async fn target(&self, key: &str, route: Route) -> CacheResult<Owner<V>> {
        if key.is_empty() {
            return Err(CacheError::MalformedRequest("key is required".to_string()));
        }
        match route {
            Route::Local => Ok(Owner::Local),
            Route::Owner => self.membership.owner_of(key).await,
        }
    }
}

fn record(operation: &'static str, key: &str, served_by: &str, outcome: Result<(), &CacheError>, start: Instant) {
    let duration = start.elapsed();
    log_cache_operation(operation, key, outcome.is_ok(), duration, served_by);
    metrics::record_cache_operation(operation, &outcome, duration);
}

#[async_trait]
impl<V: CacheValue> KeyResolver<V> for NodeRouter<V> {
    async fn resolve(&self, key: &str, route: Route) -> CacheResult<V> {
        let start_time = Instant::now();
        let (result, served_by) = match self.target(key, route).await {
            Ok(Owner::Local) => (self.store.get(key).await, "local"),
            Ok(Owner::Remote(peer)) => (peer.get(key).await, "forwarded"),
            Err(e) => (Err(e), "unrouted"),
        };
        record("get", key, served_by, result.as_ref().map(|_| ()), start_time);
        result
    }
}

#[async_trait]
impl<V: CacheValue> KeyWriter<V> for NodeRouter<V> {
    async fn write(&self, key: &str, value: V, route: Route) -> CacheResult<()> {
        let start_time = Instant::now();
        let (result, served_by) = match self.target(key, route).await {
            Ok(Owner::Local) => (self.store.set(key.to_string(), value).await, "local"),
            Ok(Owner::Remote(peer)) => (peer.set(key, &value).await, "forwarded"),
            Err(e) => (Err(e), "unrouted"),
        };
        record("set", key, served_by, result.as_ref().map(|_| ()), start_time);
        result
    }
}

/// One member of the cache cluster
pub struct CacheNode<V> {
    config: CacheConfig,
    store: Store<V>,
    membership: Arc<Membership<V>>,
    router: Arc<NodeRouter<V>>,
    transport: Arc<HttpTransport<V>>,
}

impl<V: CacheValue> CacheNode<V> {
    pub fn new(config: CacheConfig) -> Self {
        let store = Store::new();
        let membership = Arc::new(Membership::new(config.ring.replicas));
        Self::with_membership(config, store, membership)
    }

    /// Build a node around an existing store and membership, e.g. one whose
    /// ring uses a custom hash function.
    pub fn with_membership(config: CacheConfig, store: Store<V>, membership: Arc<Membership<V>>) -> Self {
        let router = Arc::new(NodeRouter::new(store.clone(), Arc::clone(&membership)));
        let transport = Arc::new(
            HttpTransport::new(
                &config.transport,
                Arc::clone(&membership),
                router.clone(),
                router.clone(),
            )
            .with_advertise_addr(config.node.advertise_addr.clone()),
        );

        Self {
            config,
            store,
            membership,
            router,
            transport,
        }
    }

    /// Listen on the configured address and join every configured seed.
    ///
    /// A seed that cannot be reached is logged and skipped; the node still
    /// serves on its own and can be joined later.
    pub async fn start(&self) -> CacheResult<String> {
        let addr = self.transport.listen(&self.config.node.listen_addr).await?;

        for seed in &self.config.node.seeds {
            match self.transport.connect(seed).await {
                Ok(()) => tracing::info!("Joined cluster through seed {}", seed),
                Err(e) => tracing::warn!("Failed to join seed {}: {}", seed, e),
            }
        }
        Ok(addr)
    }

    /// Read `key` from whichever node owns it.
    pub async fn get(&self, key: &str) -> CacheResult<V> {
        self.router.resolve(key, Route::Owner).await
    }

    /// Write `key` on whichever node owns it.
    pub async fn set(&self, key: &str, value: V) -> CacheResult<()> {
        self.router.write(key, value, Route::Owner).await
    }

    /// Join the cluster through the node at `addr`.
    pub async fn connect(&self, addr: &str) -> CacheResult<()> {
        self.transport.connect(addr).await
    }

    /// Advertised address, once listening.
    pub async fn addr(&self) -> Option<String> {
        self.membership.self_addr().await
    }

    /// Known node addresses, this node included, sorted.
    pub async fn peers(&self) -> Vec<String> {
        self.membership.addresses().await
    }

    pub fn membership(&self) -> &Arc<Membership<V>> {
        &self.membership
    }

    pub fn store(&self) -> &Store<V> {
        &self.store
    }

    pub fn transport(&self) -> &Arc<HttpTransport<V>> {
        &self.transport
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub async fn close(&self) -> CacheResult<()> {
        self.transport.close().await
    }
}
