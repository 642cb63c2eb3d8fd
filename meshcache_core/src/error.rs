//! Error taxonomy for cache, ring and cluster operations

/// Errors surfaced by the store, the hash ring, peers and the transport.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The key is absent from the owning store.
    #[error("key not found: {0}")]
    NotFound(String),

    /// A write targeted a key that already holds a value.
    #[error("key already exists: {0}")]
    AlreadyExists(String),

    /// The address was never learned by this node.
    #[error("peer not found: {0}")]
    PeerNotFound(String),

    /// A lookup ran against a ring with no members.
    #[error("hash ring is empty")]
    EmptyRing,

    /// Talking to a remote peer failed.
    #[error("remote error from {addr}: {message}")]
    Remote { addr: String, message: String },

    /// An inbound request was missing required fields.
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    /// The listening socket could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("transport is already listening")]
    AlreadyListening,

    #[error("transport is not listening")]
    NotListening,

    #[error("transport is closed")]
    Closed,
}

pub type CacheResult<T> = Result<T, CacheError>;

impl CacheError {
    pub fn remote(addr: impl Into<String>, message: impl ToString) -> Self {
        CacheError::Remote {
            addr: addr.into(),
            message: message.to_string(),
        }
    }

    /// Stable tag carried in error bodies on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            CacheError::NotFound(_) => "not_found",
            CacheError::AlreadyExists(_) => "already_exists",
            CacheError::PeerNotFound(_) => "peer_not_found",
            CacheError::EmptyRing => "empty_ring",
            CacheError::Remote { .. } => "remote",
            CacheError::MalformedRequest(_) => "malformed_request",
            CacheError::Bind { .. } => "bind",
            CacheError::AlreadyListening => "already_listening",
            CacheError::NotListening => "not_listening",
            CacheError::Closed => "closed",
        }
    }
}
