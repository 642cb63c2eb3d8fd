pub mod cluster;
pub mod config;
pub mod error;
pub mod log;
pub mod metrics;
pub mod node;
pub mod payload;
pub mod store;

pub use cluster::{HashRing, HttpPeer, HttpTransport, Membership, Peer, Route, Transport};
pub use config::{CacheConfig, ConfigError};
pub use error::{CacheError, CacheResult};
pub use node::{CacheNode, NodeRouter};
pub use payload::{CacheValue, Entry};
pub use store::{Key, Store};
