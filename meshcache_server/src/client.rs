//! Command-line client for a running node

use std::error::Error;

use hyper::body::Bytes;
use hyper::client::HttpConnector;
use hyper::{Body, Client, Method, Request, StatusCode};
use meshcache_core::payload::{Entry, ErrorBody};
use serde_json::Value;

type ClientResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

/// Talks to one node as an external client; requests are routed to the key
/// owner by the node itself.
pub struct NodeClient {
    addr: String,
    client: Client<HttpConnector, Body>,
}

impl NodeClient {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            client: Client::new(),
        }
    }

    pub async fn get(&self, key: &str) -> ClientResult<Value> {
        let path = format!("/cache/get/{}", urlencoding::encode(key));
        let body = self.call(Method::GET, &path, Body::empty()).await?;
        let entry: Entry<Value> = serde_json::from_slice(&body)?;
        Ok(entry.value)
    }

    pub async fn set(&self, key: &str, value: Value) -> ClientResult<()> {
        let payload = serde_json::to_vec(&Entry::new(key, value))?;
        self.call(Method::POST, "/cache/set", Body::from(payload)).await?;
        Ok(())
    }

    /// Ask the node to admit `addr`; returns the node's acknowledgement.
    pub async fn join(&self, addr: &str) -> ClientResult<String> {
        let path = format!("/cache/connect/{}", urlencoding::encode(addr));
        let body = self.call(Method::POST, &path, Body::empty()).await?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    pub async fn status(&self) -> ClientResult<Value> {
        let body = self.call(Method::GET, "/cluster/status", Body::empty()).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn call(&self, method: Method, path: &str, body: Body) -> ClientResult<Bytes> {
        let request = Request::builder()
            .method(method)
            .uri(format!("http://{}{}", self.addr, path))
            .header(hyper::header::CONTENT_TYPE, "application/json")
            .body(body)?;
        let response = self.client.request(request).await?;
        let status = response.status();
        let body = hyper::body::to_bytes(response.into_body()).await?;

        if status == StatusCode::OK {
            return Ok(body);
        }
        match serde_json::from_slice::<ErrorBody>(&body) {
            Ok(error) => Err(format!("{} ({}): {}", status, error.kind, error.message).into()),
            Err(_) => Err(format!("{}: {}", status, String::from_utf8_lossy(&body)).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshcache_core::{CacheConfig, CacheNode};
    use serde_json::json;

    async fn running_node() -> (CacheNode<Value>, String) {
        let mut config = CacheConfig::default();
        config.node.listen_addr = "127.0.0.1:0".to_string();
        config.transport.shutdown_drain_ms = 100;
        let node = CacheNode::new(config);
        let addr = node.start().await.unwrap();
        (node, addr)
    }

    #[tokio::test]
    async fn test_client_set_get_status() {
        let (node, addr) = running_node().await;
        let client = NodeClient::new(addr.clone());

        client.set("greeting", json!("hello")).await.unwrap();
        assert_eq!(client.get("greeting").await.unwrap(), json!("hello"));

        client.set("docs/read me.txt", json!(1)).await.unwrap();
        assert_eq!(client.get("docs/read me.txt").await.unwrap(), json!(1));

        let err = client.get("missing").await.unwrap_err();
        assert!(err.to_string().contains("not_found"));

        let status = client.status().await.unwrap();
        assert_eq!(status["self_addr"], json!(addr));

        let ack = client.join(&addr).await.unwrap();
        assert!(ack.contains("already connected"));

        node.close().await.unwrap();
    }
}
