//! HTTP flavour of the peer contract and the transport
//!
//! Routes served by every node:
//!
//! - `GET|POST /cache/get/:key`: read a key, forwarding to its owner
//! - `POST /cache/set`: write a `{"key", "value"}` body, forwarding to its owner
//! - `POST /cache/connect/:addr`: join request from `addr`
//! - `GET /cluster/status`: self address, known peers and transport counters
//! - `GET /health`: liveness

mod peer;
mod transport;

pub use peer::{HttpPeer, PeerClient};
pub use transport::{HttpTransport, TransportStats};

/// Marks a request a node sent to the key owner it picked; the receiver
/// serves it from its own store without consulting the ring again.
pub const FORWARDED_HEADER: &str = "x-meshcache-forwarded";
