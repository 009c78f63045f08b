//! RouterOS REST Client
//!
//! Thin async client for the WireGuard peer table of a MikroTik
//! router (`/rest/interface/wireguard/peers`) plus the device
//! identity endpoint. Uses hyper with rustls for HTTPS and basic
//! auth; every operation runs under the configured retry policy.

use crate::config::RouterConfig;
use crate::retry::{RemoteClientError, RetryPolicy};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::header::{AUTHORIZATION, CONTENT_TYPE};
use hyper::{Method, Request, StatusCode};
use rustls::ClientConfig;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

const PEERS_PATH: &str = "/rest/interface/wireguard/peers";
const IDENTITY_PATH: &str = "/rest/system/identity";

/// One peer record as the router reports it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemotePeer {
    /// Router-assigned internal id (e.g. `*1A`)
    #[serde(rename = ".id")]
    pub id: String,
    #[serde(default)]
    pub interface: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "public-key", default)]
    pub public_key: String,
    #[serde(rename = "allowed-address", default)]
    pub allowed_address: String,
    #[serde(rename = "preshared-key", default)]
    pub preshared_key: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
}

/// Fields for creating a peer
#[derive(Debug, Clone, Serialize)]
pub struct NewPeer {
    pub interface: String,
    pub name: String,
    #[serde(rename = "public-key")]
    pub public_key: String,
    #[serde(rename = "allowed-address")]
    pub allowed_address: String,
    #[serde(rename = "preshared-key", skip_serializing_if = "Option::is_none")]
    pub preshared_key: Option<String>,
    pub comment: String,
}

/// Partial update for an existing peer
#[derive(Debug, Clone, Default, Serialize)]
pub struct PeerPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "public-key", skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    #[serde(rename = "allowed-address", skip_serializing_if = "Option::is_none")]
    pub allowed_address: Option<String>,
    #[serde(rename = "preshared-key", skip_serializing_if = "Option::is_none")]
    pub preshared_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Identity {
    name: String,
}

/// Per-attempt client errors (wrapped by the retry executor)
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("TLS error: {0}")]
    TlsError(String),

    #[error("HTTP error: {0}")]
    HttpError(String),

    #[error("Router returned {status}: {body}")]
    Rejected { status: StatusCode, body: String },

    #[error("Invalid response body: {0}")]
    BadBody(String),
}

/// Router API surface consumed by the reconciler.
///
/// Seam for test doubles; [`RouterOsClient`] is the production
/// implementation.
#[allow(async_fn_in_trait)]
pub trait RouterApi {
    /// Peers currently configured on `interface`
    async fn list_peers(&self, interface: &str) -> Result<Vec<RemotePeer>, RemoteClientError>;

    /// Create a peer
    async fn add_peer(&self, peer: &NewPeer) -> Result<(), RemoteClientError>;

    /// Update a peer by router-assigned id
    async fn update_peer(&self, id: &str, patch: &PeerPatch) -> Result<(), RemoteClientError>;

    /// Remove a peer by router-assigned id
    async fn remove_peer(&self, id: &str) -> Result<(), RemoteClientError>;

    /// Device identity, for health checks
    async fn identity(&self) -> Result<String, RemoteClientError>;
}

/// REST client for a single router
pub struct RouterOsClient {
    config: RouterConfig,
    retry: RetryPolicy,
    auth_header: String,
}

impl RouterOsClient {
    /// Create a client from connection settings
    pub fn new(config: RouterConfig) -> Self {
        let credentials = format!("{}:{}", config.username, config.password);
        let auth_header = format!("Basic {}", BASE64.encode(credentials));
        let retry = config.retry_policy();

        Self {
            config,
            retry,
            auth_header,
        }
    }

    /// Single request, no retries
    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<Vec<u8>, ClientError> {
        let url = format!("{}{}", self.config.base_url(), path);
        let uri: hyper::Uri = url
            .parse()
            .map_err(|e: hyper::http::uri::InvalidUri| ClientError::InvalidUrl(e.to_string()))?;

        let request = Request::builder()
            .method(method.clone())
            .uri(uri)
            .header(AUTHORIZATION, &self.auth_header)
            .header(CONTENT_TYPE, "application/json")
            .header("Host", self.config.host.as_str())
            .body(Full::new(Bytes::from(body.unwrap_or_default())))
            .map_err(|e| ClientError::HttpError(e.to_string()))?;

        let addr = format!("{}:{}", self.config.host, self.config.port);
        let stream = tokio::net::TcpStream::connect(&addr)
            .await
            .map_err(|e| ClientError::ConnectionFailed(e.to_string()))?;

        let response = if self.config.use_tls {
            let mut root_store = rustls::RootCertStore::empty();
            root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

            let tls_config = ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth();

            let connector = TlsConnector::from(Arc::new(tls_config));
            let server_name = rustls::pki_types::ServerName::try_from(self.config.host.clone())
                .map_err(|_| ClientError::TlsError("Invalid server name".to_string()))?;

            let tls_stream = connector
                .connect(server_name, stream)
                .await
                .map_err(|e| ClientError::TlsError(e.to_string()))?;

            let io = hyper_util::rt::TokioIo::new(tls_stream);
            let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
                .await
                .map_err(|e| ClientError::HttpError(e.to_string()))?;

            tokio::spawn(async move {
                if let Err(e) = conn.await {
                    warn!("Router connection error: {}", e);
                }
            });

            sender
                .send_request(request)
                .await
                .map_err(|e| ClientError::HttpError(e.to_string()))?
        } else {
            let io = hyper_util::rt::TokioIo::new(stream);
            let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
                .await
                .map_err(|e| ClientError::HttpError(e.to_string()))?;

            tokio::spawn(async move {
                if let Err(e) = conn.await {
                    warn!("Router connection error: {}", e);
                }
            });

            sender
                .send_request(request)
                .await
                .map_err(|e| ClientError::HttpError(e.to_string()))?
        };

        let status = response.status();
        let collected = response
            .into_body()
            .collect()
            .await
            .map_err(|e| ClientError::BadBody(e.to_string()))?;
        let bytes = collected.to_bytes().to_vec();

        debug!(%method, path, %status, bytes = bytes.len(), "Router request");

        if !status.is_success() {
            return Err(ClientError::Rejected {
                status,
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }

        Ok(bytes)
    }

    fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, ClientError> {
        serde_json::from_slice(bytes).map_err(|e| ClientError::BadBody(e.to_string()))
    }
}

impl RouterApi for RouterOsClient {
    async fn list_peers(&self, interface: &str) -> Result<Vec<RemotePeer>, RemoteClientError> {
        let path = format!("{PEERS_PATH}?interface={interface}");
        let mut peers: Vec<RemotePeer> = self
            .retry
            .run("list peers", || async {
                let bytes = self.send(Method::GET, &path, None).await?;
                Self::decode(&bytes)
            })
            .await?;

        // The query filter is advisory on some RouterOS builds
        peers.retain(|p| p.interface == interface);
        Ok(peers)
    }

    async fn add_peer(&self, peer: &NewPeer) -> Result<(), RemoteClientError> {
        let body = serde_json::to_vec(peer).unwrap_or_default();
        self.retry
            .run("add peer", || {
                self.send(Method::PUT, PEERS_PATH, Some(body.clone()))
            })
            .await?;
        Ok(())
    }

    async fn update_peer(&self, id: &str, patch: &PeerPatch) -> Result<(), RemoteClientError> {
        let path = format!("{PEERS_PATH}/{id}");
        let body = serde_json::to_vec(patch).unwrap_or_default();
        self.retry
            .run("update peer", || {
                self.send(Method::PATCH, &path, Some(body.clone()))
            })
            .await?;
        Ok(())
    }

    async fn remove_peer(&self, id: &str) -> Result<(), RemoteClientError> {
        let path = format!("{PEERS_PATH}/{id}");
        self.retry
            .run("remove peer", || self.send(Method::DELETE, &path, None))
            .await?;
        Ok(())
    }

    async fn identity(&self) -> Result<String, RemoteClientError> {
        let identity: Identity = self
            .retry
            .run("read identity", || async {
                let bytes = self.send(Method::GET, IDENTITY_PATH, None).await?;
                Self::decode(&bytes)
            })
            .await?;
        Ok(identity.name)
    }
}
