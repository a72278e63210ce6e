//! Transport between the sync client and a remote sync server.

use async_trait::async_trait;
use reqwest::{header, Client};
use std::time::Duration;
use tracing::debug;
use url::Url;

use vaultsync_common::{Error, Result};

use crate::protocol::{FileChange, SyncRequest, SyncResponse};

/// Manifest exchange endpoint, relative to the server URL.
pub const SYNC_ENDPOINT: &str = "api/v1/sync";
/// Single-file upload endpoint, relative to the server URL.
pub const UPLOAD_ENDPOINT: &str = "api/v1/sync/upload";

/// Wire operations the sync client needs from a remote.
///
/// Implementations map connection failures and timeouts to
/// [`Error::Network`] and non-success answers to [`Error::Http`].
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Send the local manifest and receive the remote's delta and payloads.
    async fn exchange(&self, server: &Url, request: &SyncRequest) -> Result<SyncResponse>;

    /// Upload one file change with its content attached.
    async fn upload(&self, server: &Url, change: &FileChange) -> Result<()>;
}

/// Append an endpoint to a server URL, keeping any path prefix.
pub fn endpoint(server: &Url, path: &str) -> Result<Url> {
    let joined = format!("{}/{}", server.as_str().trim_end_matches('/'), path);
    Url::parse(&joined).map_err(|e| Error::InvalidInput(format!("Invalid endpoint {}: {}", joined, e)))
}

/// JSON-over-HTTP transport.
pub struct HttpTransport {
    http: Client,
    exchange_timeout: Duration,
    upload_timeout: Duration,
}

impl HttpTransport {
    pub fn new(exchange_timeout: Duration, upload_timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("vaultsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            exchange_timeout,
            upload_timeout,
        })
    }

    async fn post_json<B: serde::Serialize + ?Sized>(
        &self,
        url: Url,
        body: &B,
        timeout: Duration,
    ) -> Result<reqwest::Response> {
        let response = self
            .http
            .post(url)
            .header(header::CONTENT_TYPE, "application/json")
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(map_request_error)?;

        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            Err(Error::Http {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("Unknown").to_string(),
            })
        }
    }
}

#[async_trait]
impl SyncTransport for HttpTransport {
    async fn exchange(&self, server: &Url, request: &SyncRequest) -> Result<SyncResponse> {
        let url = endpoint(server, SYNC_ENDPOINT)?;
        debug!("Exchanging manifest with {}", url);

        let response = self.post_json(url, request, self.exchange_timeout).await?;
        response
            .json()
            .await
            .map_err(|e| Error::Serialization(format!("Failed to parse sync response: {}", e)))
    }

    async fn upload(&self, server: &Url, change: &FileChange) -> Result<()> {
        let url = endpoint(server, UPLOAD_ENDPOINT)?;
        self.post_json(url, change, self.upload_timeout).await?;
        Ok(())
    }
}

fn map_request_error(err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::Network(format!("Request timed out: {}", err))
    } else if let Some(status) = err.status() {
        Error::Http {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or("Unknown").to_string(),
        }
    } else {
        Error::Network(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_keeps_prefix() {
        let server = Url::parse("http://sync.local:8000/vault/").unwrap();
        assert_eq!(
            endpoint(&server, SYNC_ENDPOINT).unwrap().as_str(),
            "http://sync.local:8000/vault/api/v1/sync"
        );

        let bare = Url::parse("http://sync.local:8000").unwrap();
        assert_eq!(
            endpoint(&bare, UPLOAD_ENDPOINT).unwrap().as_str(),
            "http://sync.local:8000/api/v1/sync/upload"
        );
    }
}
