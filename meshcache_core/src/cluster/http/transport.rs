//! Server side of the node-to-node HTTP protocol and the join protocol

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::{
    body::Bytes,
    extract::{Path, State},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use http::{HeaderMap, StatusCode};
use hyper::Client;
use serde::Serialize;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;

use super::{HttpPeer, PeerClient, FORWARDED_HEADER};
use crate::cluster::broadcast::Broadcaster;
use crate::cluster::membership::Membership;
use crate::cluster::{KeyResolver, KeyWriter, Peer, Route, Transport};
use crate::config::TransportConfig;
use crate::error::{CacheError, CacheResult};
use crate::log::log_cluster_operation;
use crate::payload::{CacheValue, Entry, ErrorBody, SetRequest};

/// Join protocol counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TransportStats {
    /// Join requests that introduced a new address
    pub joins_accepted: u64,
    /// Join requests for addresses that were already known
    pub joins_known: u64,
    pub announcements_sent: u64,
    pub announcements_failed: u64,
}

/// State handed to every request handler
struct Shared<V> {
    membership: Arc<Membership<V>>,
    resolver: Arc<dyn KeyResolver<V>>,
    writer: Arc<dyn KeyWriter<V>>,
    broadcaster: Broadcaster,
    client: PeerClient,
    rpc_timeout: Option<Duration>,
    joins_accepted: AtomicU64,
    joins_known: AtomicU64,
}

impl<V: CacheValue> Shared<V> {
    fn peer(&self, addr: &str) -> Arc<dyn Peer<V>> {
        Arc::new(HttpPeer::<V>::with_client(addr, self.client.clone(), self.rpc_timeout))
    }

    /// Admit `peer` and, when it is new, spread the news both ways: every
    /// other known node hears about the newcomer and the newcomer hears about
    /// every known node, this one included.
    ///
    /// Returns `false` when the address was already known.
    async fn admit_and_propagate(&self, peer: Arc<dyn Peer<V>>) -> bool {
        let newcomer = peer.addr().to_string();
        if !self.membership.admit(Arc::clone(&peer)).await {
            return false;
        }

        let self_addr = self.membership.self_addr().await;
        let known = self.membership.peers().await;
        tracing::info!(
            peer = %newcomer,
            known_peers = known.len(),
            "Admitted new peer, propagating"
        );

        for existing in known {
            if existing.addr() == newcomer {
                continue;
            }
            if Some(existing.addr()) != self_addr.as_deref() {
                self.broadcaster.announce(Arc::clone(&existing), newcomer.clone());
            }
            self.broadcaster.announce(Arc::clone(&peer), existing.addr().to_string());
        }
        true
    }

    fn stats(&self) -> TransportStats {
        let broadcast = self.broadcaster.stats();
        TransportStats {
            joins_accepted: self.joins_accepted.load(Ordering::Relaxed),
            joins_known: self.joins_known.load(Ordering::Relaxed),
            announcements_sent: broadcast.sent.load(Ordering::Relaxed),
            announcements_failed: broadcast.failed.load(Ordering::Relaxed),
        }
    }
}

enum ListenState {
    Idle,
    Listening {
        shutdown: oneshot::Sender<()>,
        server: JoinHandle<()>,
    },
    Closed,
}

/// HTTP transport: serves the cache routes and runs the join protocol
pub struct HttpTransport<V> {
    shared: Arc<Shared<V>>,
    advertise_addr: Option<String>,
    shutdown_drain: Duration,
    state: Mutex<ListenState>,
}

impl<V: CacheValue> HttpTransport<V> {
    pub fn new(
        config: &TransportConfig,
        membership: Arc<Membership<V>>,
        resolver: Arc<dyn KeyResolver<V>>,
        writer: Arc<dyn KeyWriter<V>>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                membership,
                resolver,
                writer,
                broadcaster: Broadcaster::new(config.max_concurrent_broadcasts),
                client: Client::new(),
                rpc_timeout: config.rpc_timeout(),
                joins_accepted: AtomicU64::new(0),
                joins_known: AtomicU64::new(0),
            }),
            advertise_addr: None,
            shutdown_drain: config.shutdown_drain(),
            state: Mutex::new(ListenState::Idle),
        }
    }

    /// Address to register and announce instead of the bound socket address.
    pub fn with_advertise_addr(mut self, addr: Option<String>) -> Self {
        self.advertise_addr = addr;
        self
    }

    /// Create the router with all endpoints
    pub fn create_router(&self) -> Router {
        Router::new()
            .route("/cache/get/", get(missing_key_handler).post(missing_key_handler))
            .route("/cache/get/:key", get(get_handler::<V>).post(get_handler::<V>))
            .route("/cache/set", post(set_handler::<V>))
            .route("/cache/connect/", post(missing_address_handler))
            .route("/cache/connect/:addr", post(connect_handler::<V>))
            .route("/cluster/status", get(status_handler::<V>))
            .route("/health", get(health_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(Arc::clone(&self.shared))
    }

    /// Peer handle sharing this transport's connection pool
    pub fn peer(&self, addr: &str) -> Arc<dyn Peer<V>> {
        self.shared.peer(addr)
    }

    pub fn membership(&self) -> &Arc<Membership<V>> {
        &self.shared.membership
    }

    pub fn stats(&self) -> TransportStats {
        self.shared.stats()
    }

    /// Wait for announcements spawned so far to finish.
    pub async fn quiesce(&self) {
        self.shared.broadcaster.quiesce().await;
    }

    async fn ensure_listening(&self) -> CacheResult<String> {
        match *self.state.lock().await {
            ListenState::Listening { .. } => {}
            ListenState::Idle => return Err(CacheError::NotListening),
            ListenState::Closed => return Err(CacheError::Closed),
        }
        self.shared
            .membership
            .self_addr()
            .await
            .ok_or(CacheError::NotListening)
    }
}

#[async_trait]
impl<V: CacheValue> Transport<V> for HttpTransport<V> {
    async fn listen(&self, addr: &str) -> CacheResult<String> {
        let mut state = self.state.lock().await;
        match *state {
            ListenState::Idle => {}
            ListenState::Listening { .. } => return Err(CacheError::AlreadyListening),
            ListenState::Closed => return Err(CacheError::Closed),
        }

        let bind_error = |source: std::io::Error| CacheError::Bind {
            addr: addr.to_string(),
            source,
        };
        let listener = tokio::net::TcpListener::bind(addr).await.map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;
        let listener = listener.into_std().map_err(bind_error)?;
        let builder = axum::Server::from_tcp(listener).map_err(|e| {
            bind_error(std::io::Error::new(std::io::ErrorKind::Other, e))
        })?;

        if self.advertise_addr.is_none() && local_addr.ip().is_unspecified() {
            tracing::warn!(
                "Listening on wildcard address {} without an advertise address; peers cannot reach it",
                local_addr
            );
        }
        let self_addr = self
            .advertise_addr
            .clone()
            .unwrap_or_else(|| local_addr.to_string());
        self.shared
            .membership
            .register_self(self.shared.peer(&self_addr))
            .await?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let server = builder
            .serve(self.create_router().into_make_service())
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
        let handle = tokio::spawn(async move {
            if let Err(e) = server.await {
                tracing::error!("HTTP server error: {}", e);
            }
        });

        *state = ListenState::Listening {
            shutdown: shutdown_tx,
            server: handle,
        };
        tracing::info!("Transport listening on {} (advertised as {})", local_addr, self_addr);
        Ok(self_addr)
    }

    async fn connect(&self, addr: &str) -> CacheResult<()> {
        let self_addr = self.ensure_listening().await?;
        if addr == self_addr {
            return Ok(());
        }

        let peer = self.shared.peer(addr);
        let start_time = Instant::now();
        let result = peer.connect(&self_addr).await;
        let detail = result.as_ref().err().map(|e| e.to_string());
        log_cluster_operation(
            "join",
            addr,
            result.is_ok(),
            start_time.elapsed(),
            detail.as_deref(),
        );
        result?;

        self.shared.admit_and_propagate(peer).await;
        Ok(())
    }

    async fn get_peer(&self, addr: &str) -> CacheResult<Arc<dyn Peer<V>>> {
        self.shared.membership.get_peer(addr).await
    }

    async fn close(&self) -> CacheResult<()> {
        let previous = {
            let mut state = self.state.lock().await;
            std::mem::replace(&mut *state, ListenState::Closed)
        };

        if let ListenState::Listening {
            shutdown,
            mut server,
        } = previous
        {
            let _ = shutdown.send(());
            if tokio::time::timeout(self.shutdown_drain, &mut server).await.is_err() {
                tracing::warn!("HTTP server did not stop in time, aborting");
                server.abort();
            }
        }

        self.shared.broadcaster.shutdown(self.shutdown_drain).await;
        tracing::info!("Transport closed");
        Ok(())
    }
}

impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = match &self {
            CacheError::NotFound(_) | CacheError::PeerNotFound(_) => StatusCode::NOT_FOUND,
            CacheError::AlreadyExists(_) => StatusCode::CONFLICT,
            CacheError::MalformedRequest(_) => StatusCode::BAD_REQUEST,
            CacheError::EmptyRing => StatusCode::SERVICE_UNAVAILABLE,
            CacheError::Remote { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(ErrorBody::from_error(&self))).into_response()
    }
}

fn route_of(headers: &HeaderMap) -> Route {
    if headers.contains_key(FORWARDED_HEADER) {
        Route::Local
    } else {
        Route::Owner
    }
}

#[derive(Serialize)]
struct ClusterStatusResponse {
    self_addr: Option<String>,
    peers: Vec<String>,
    ring_points: usize,
    stats: TransportStats,
    timestamp: String,
}

// Handler functions
async fn get_handler<V: CacheValue>(
    State(shared): State<Arc<Shared<V>>>,
    Path(key): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Entry<V>>, CacheError> {
    let value = shared.resolver.resolve(&key, route_of(&headers)).await?;
    Ok(Json(Entry::new(key, value)))
}

async fn set_handler<V: CacheValue>(
    State(shared): State<Arc<Shared<V>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, CacheError> {
    let entry = SetRequest::<V>::decode(&body)?;
    shared
        .writer
        .write(&entry.key, entry.value, route_of(&headers))
        .await?;
    Ok(StatusCode::OK)
}

async fn connect_handler<V: CacheValue>(
    State(shared): State<Arc<Shared<V>>>,
    Path(addr): Path<String>,
) -> Result<String, CacheError> {
    if addr.trim().is_empty() {
        return Err(CacheError::MalformedRequest("address is required".to_string()));
    }
    let self_addr = shared.membership.self_addr().await.unwrap_or_default();

    let peer = shared.peer(&addr);
    if shared.admit_and_propagate(peer).await {
        shared.joins_accepted.fetch_add(1, Ordering::Relaxed);
        Ok(format!("welcome {}, joined via {}", addr, self_addr))
    } else {
        shared.joins_known.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(peer = %addr, "Join from known peer ignored");
        Ok(format!("hello from {}, already connected to {}", self_addr, addr))
    }
}

async fn missing_key_handler() -> CacheError {
    CacheError::MalformedRequest("key is required".to_string())
}

async fn missing_address_handler() -> CacheError {
    CacheError::MalformedRequest("address is required".to_string())
}

async fn status_handler<V: CacheValue>(
    State(shared): State<Arc<Shared<V>>>,
) -> Json<ClusterStatusResponse> {
    Json(ClusterStatusResponse {
        self_addr: shared.membership.self_addr().await,
        peers: shared.membership.addresses().await,
        ring_points: shared.membership.ring_points().await,
        stats: shared.stats(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}
