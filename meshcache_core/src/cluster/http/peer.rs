//! Client side of the node-to-node HTTP protocol

use std::marker::PhantomData;
use std::time::Duration;

use async_trait::async_trait;
use hyper::body::Bytes;
use hyper::client::HttpConnector;
use hyper::{Body, Client, Method, Request, StatusCode};

use super::FORWARDED_HEADER;
use crate::cluster::Peer;
use crate::error::{CacheError, CacheResult};
use crate::payload::{CacheValue, Entry, ErrorBody};

/// Connection pool shared by every peer handle of one node
pub type PeerClient = Client<HttpConnector, Body>;

/// A remote node reached over HTTP
pub struct HttpPeer<V> {
    addr: String,
    client: PeerClient,
    timeout: Option<Duration>,
    _value: PhantomData<fn() -> V>,
}

impl<V> HttpPeer<V> {
    pub fn new(addr: impl Into<String>) -> Self {
        Self::with_client(addr, Client::new(), None)
    }

    pub fn with_client(addr: impl Into<String>, client: PeerClient, timeout: Option<Duration>) -> Self {
        Self {
            addr: addr.into(),
            client,
            timeout,
            _value: PhantomData,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    fn request(&self, method: Method, url: String, body: Body) -> CacheResult<Request<Body>> {
        Request::builder()
            .method(method)
            .uri(url)
            .header(FORWARDED_HEADER, "1")
            .header(hyper::header::CONTENT_TYPE, "application/json")
            .body(body)
            .map_err(|e| CacheError::remote(&self.addr, e))
    }

    /// Send a request and collect the status and full body.
    async fn send(&self, request: Request<Body>) -> CacheResult<(StatusCode, Bytes)> {
        let call = async {
            let response = self
                .client
                .request(request)
                .await
                .map_err(|e| CacheError::remote(&self.addr, e))?;
            let status = response.status();
            let body = hyper::body::to_bytes(response.into_body())
                .await
                .map_err(|e| CacheError::remote(&self.addr, e))?;
            Ok((status, body))
        };

        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, call).await.map_err(|_| {
                CacheError::remote(&self.addr, format!("request timed out after {:?}", limit))
            })?,
            None => call.await,
        }
    }

    /// Turn a non-success response into the error the remote node reported.
    fn failure(&self, status: StatusCode, body: &[u8], key: &str) -> CacheError {
        match serde_json::from_slice::<ErrorBody>(body) {
            Ok(error) => error.into_error(&self.addr, key),
            Err(_) => CacheError::remote(
                &self.addr,
                format!("{}: {}", status, String::from_utf8_lossy(body)),
            ),
        }
    }
}

impl<V> Clone for HttpPeer<V> {
    fn clone(&self) -> Self {
        Self::with_client(self.addr.clone(), self.client.clone(), self.timeout)
    }
}

impl<V> std::fmt::Debug for HttpPeer<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpPeer")
            .field("addr", &self.addr)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[async_trait]
impl<V: CacheValue> Peer<V> for HttpPeer<V> {
    async fn get(&self, key: &str) -> CacheResult<V> {
        let url = self.url(&format!("/cache/get/{}", urlencoding::encode(key)));
        let request = self.request(Method::GET, url, Body::empty())?;
        let (status, body) = self.send(request).await?;
        if !status.is_success() {
            return Err(self.failure(status, &body, key));
        }

        let entry: Entry<V> = serde_json::from_slice(&body)
            .map_err(|e| CacheError::remote(&self.addr, format!("invalid response body: {}", e)))?;
        Ok(entry.value)
    }

    async fn set(&self, key: &str, value: &V) -> CacheResult<()> {
        let payload = serde_json::to_vec(&Entry::new(key, value))
            .map_err(|e| CacheError::MalformedRequest(e.to_string()))?;
        let request = self.request(Method::POST, self.url("/cache/set"), Body::from(payload))?;
        let (status, body) = self.send(request).await?;
        if !status.is_success() {
            return Err(self.failure(status, &body, key));
        }
        Ok(())
    }

    async fn connect(&self, address: &str) -> CacheResult<()> {
        let url = self.url(&format!("/cache/connect/{}", urlencoding::encode(address)));
        let request = self.request(Method::POST, url, Body::empty())?;
        let (status, body) = self.send(request).await?;
        if !status.is_success() {
            return Err(self.failure(status, &body, address));
        }
        tracing::debug!(peer = %self.addr, reply = %String::from_utf8_lossy(&body), "Join acknowledged");
        Ok(())
    }

    fn addr(&self) -> &str {
        &self.addr
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::Path, response::Json, routing::get, Router};

    /// Serve `app` on an ephemeral loopback port and return its address.
    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = axum::Server::from_tcp(listener.into_std().unwrap())
            .unwrap()
            .serve(app.into_make_service());
        tokio::spawn(server);
        addr
    }

    #[tokio::test]
    async fn test_keys_are_encoded_as_one_path_segment() {
        let app = Router::new().route(
            "/cache/get/:key",
            get(|Path(key): Path<String>| async move { Json(Entry::new(key.clone(), key)) }),
        );
        let peer: HttpPeer<String> = HttpPeer::new(serve(app).await);

        for key in ["plain", "dir/a b", "10.0.0.1:7070", "ключ?x=1#frag"] {
            assert_eq!(peer.get(key).await.unwrap(), key);
        }
    }

    #[tokio::test]
    async fn test_malformed_response_is_a_remote_error() {
        let app = Router::new()
            .route("/cache/get/:key", get(|| async { "this is not json" }))
            .route(
                "/cache/connect/:addr",
                axum::routing::post(|| async {
                    (StatusCode::INTERNAL_SERVER_ERROR, "boom")
                }),
            );
        let addr = serve(app).await;
        let peer: HttpPeer<String> = HttpPeer::new(addr.clone());

        match peer.get("k").await {
            Err(CacheError::Remote { addr: from, message }) => {
                assert_eq!(from, addr);
                assert!(message.contains("invalid response body"));
            }
            other => panic!("unexpected result: {:?}", other),
        }

        match peer.connect("127.0.0.1:7070").await {
            Err(CacheError::Remote { message, .. }) => assert!(message.contains("boom")),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unreachable_peer_is_a_remote_error() {
        // Port 9 (discard) is closed on test machines
        let peer: HttpPeer<String> =
            HttpPeer::with_client("127.0.0.1:9", Client::new(), Some(Duration::from_secs(2)));
        match peer.get("k").await {
            Err(CacheError::Remote { addr, .. }) => assert_eq!(addr, "127.0.0.1:9"),
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
