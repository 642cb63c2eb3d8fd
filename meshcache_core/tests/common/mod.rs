use std::time::{Duration, Instant};

use meshcache_core::{CacheConfig, CacheNode, CacheValue};

/// Config for a node on an ephemeral loopback port
pub fn local_config() -> CacheConfig {
    let mut config = CacheConfig::default();
    config.node.listen_addr = "127.0.0.1:0".to_string();
    config.transport.rpc_timeout_ms = Some(2_000);
    config.transport.shutdown_drain_ms = 200;
    config
}

pub async fn start_node<V: CacheValue>(config: CacheConfig) -> (CacheNode<V>, String) {
    let node = CacheNode::new(config);
    let addr = node.start().await.unwrap();
    (node, addr)
}

/// Poll until every node knows `expected` addresses, or fail after 5s.
pub async fn wait_for_peers<V: CacheValue>(nodes: &[&CacheNode<V>], expected: usize) {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let mut converged = true;
        for node in nodes {
            if node.peers().await.len() != expected {
                converged = false;
            }
        }
        if converged {
            return;
        }

        if Instant::now() > deadline {
            let mut views = Vec::new();
            for node in nodes {
                views.push(node.peers().await);
            }
            panic!("membership did not converge: {:?}", views);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
