//! HTTP client for the public key directory
//!
//! The directory is the relay server's `/get_public_key/{user}` endpoint.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use url::Url;

use crate::api::PublicKeyDirectory;
use crate::crypto::errors::{CryptoError, CryptoResult};
use crate::error::AppResult;

/// Response body of `/get_public_key/{user}`
#[derive(Debug, serde::Deserialize)]
struct PublicKeyResponse {
    public_key: Option<String>,
}

/// Directory client backed by the relay server
#[derive(Debug, Clone)]
pub struct DirectoryClient {
    client: Client,
    base_url: Url,
}

impl DirectoryClient {
    /// Create a new directory client
    pub fn new(base_url: Url, timeout: Duration) -> AppResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self { client, base_url })
    }

    /// Build URL for a user's key
    fn key_url(&self, user_id: &str) -> CryptoResult<Url> {
        let endpoint = format!("get_public_key/{}", urlencoding::encode(user_id));
        self.base_url
            .join(&endpoint)
            .map_err(|e| CryptoError::Directory(format!("Bad directory URL: {}", e)))
    }
}

#[async_trait]
impl PublicKeyDirectory for DirectoryClient {
    async fn public_key(&self, user_id: &str) -> CryptoResult<Option<String>> {
        let url = self.key_url(user_id)?;
        tracing::debug!("GET {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| CryptoError::Directory(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(CryptoError::Directory(format!(
                "API error ({}): {}",
                status, error_text
            )));
        }

        let body: PublicKeyResponse = response
            .json()
            .await
            .map_err(|e| CryptoError::Directory(e.to_string()))?;

        Ok(body.public_key.filter(|key| !key.is_empty()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use crate::crypto::{KeyStore, RoomKeyExchange};

    fn client(base: &str) -> DirectoryClient {
        DirectoryClient::new(Url::parse(base).unwrap(), Duration::from_secs(30)).unwrap()
    }

    /// Serve canned directory responses on a local port
    ///
    /// `broken` answers 500, `blank` answers an empty key, anyone else is 404.
    async fn serve_directory() -> Url {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut request = Vec::new();
                    let mut buf = [0u8; 1024];
                    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                        match socket.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => request.extend_from_slice(&buf[..n]),
                        }
                    }

                    let request = String::from_utf8_lossy(&request);
                    let (status, body) = match request.split_whitespace().nth(1) {
                        Some("/get_public_key/broken") => ("500 Internal Server Error", "boom"),
                        Some("/get_public_key/blank") => ("200 OK", r#"{"public_key":""}"#),
                        _ => ("404 Not Found", ""),
                    };
                    let response = format!(
                        "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        status,
                        body.len(),
                        body
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        Url::parse(&format!("http://{}/", addr)).unwrap()
    }

    #[test]
    fn test_key_url_encodes_user() {
        let c = client("https://relay.example.com/");
        assert_eq!(
            c.key_url("alice smith").unwrap().as_str(),
            "https://relay.example.com/get_public_key/alice%20smith"
        );
    }

    #[test]
    fn test_key_url_keeps_slash_inside_segment() {
        let c = client("https://relay.example.com/");
        assert_eq!(
            c.key_url("a/b").unwrap().as_str(),
            "https://relay.example.com/get_public_key/a%2Fb"
        );
    }

    #[test]
    fn test_key_url_under_base_path() {
        let c = client("https://relay.example.com/chat/");
        assert_eq!(
            c.key_url("bob").unwrap().as_str(),
            "https://relay.example.com/chat/get_public_key/bob"
        );
    }

    #[test]
    fn test_empty_key_body_parses() {
        let body: PublicKeyResponse = serde_json::from_str(r#"{"public_key":null}"#).unwrap();
        assert!(body.public_key.is_none());
    }

    #[tokio::test]
    async fn test_directory_status_mapping() {
        let c = client(serve_directory().await.as_str());

        assert!(c.public_key("missing").await.unwrap().is_none());
        assert!(c.public_key("blank").await.unwrap().is_none());
        match c.public_key("broken").await {
            Err(CryptoError::Directory(message)) => assert!(message.contains("500")),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_directory_failures_make_peer_unavailable() {
        let directory = Arc::new(client(serve_directory().await.as_str()));
        let store = KeyStore::open_in_memory().await.unwrap();
        let exchange = RoomKeyExchange::new(store, directory);

        for peer in ["missing", "broken", "blank"] {
            assert!(matches!(
                exchange.fetch_peer_key(peer).await,
                Err(CryptoError::PeerKeyUnavailable(ref p)) if p == peer
            ));
        }
    }
}
