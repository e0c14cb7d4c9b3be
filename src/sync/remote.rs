//! Remote file store seen by the sync engine.

use std::error::Error as StdError;
use std::io::ErrorKind;
use std::sync::Arc;

use async_trait::async_trait;

use super::config::ResolvedConfig;
use super::webdav::{ResourceInfo, WebDAVClient, WebDAVError};

/// Hierarchical file store addressed by absolute URLs
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn exists(&self, url: &str) -> Result<bool, WebDAVError>;
    async fn read(&self, url: &str) -> Result<Vec<u8>, WebDAVError>;
    async fn write(&self, url: &str, data: &[u8]) -> Result<(), WebDAVError>;
    /// Create the directory if it is missing
    async fn ensure_directory(&self, url: &str) -> Result<(), WebDAVError>;
    async fn list(&self, url: &str) -> Result<Vec<ResourceInfo>, WebDAVError>;
}

#[async_trait]
impl RemoteStore for WebDAVClient {
    async fn exists(&self, url: &str) -> Result<bool, WebDAVError> {
        self.head(url).await
    }

    async fn read(&self, url: &str) -> Result<Vec<u8>, WebDAVError> {
        self.get(url).await
    }

    async fn write(&self, url: &str, data: &[u8]) -> Result<(), WebDAVError> {
        self.put(url, data).await
    }

    async fn ensure_directory(&self, url: &str) -> Result<(), WebDAVError> {
        if !self.head(url).await? {
            self.mkcol(url).await?;
            log::debug!("WebDAV: created directory {}", url);
        }
        Ok(())
    }

    async fn list(&self, url: &str) -> Result<Vec<ResourceInfo>, WebDAVError> {
        self.propfind(url, 1).await
    }
}

/// Builds a remote store for a resolved configuration
pub trait RemoteConnector: Send + Sync {
    fn connect(&self, config: &ResolvedConfig) -> Result<Arc<dyn RemoteStore>, WebDAVError>;
}

/// Connects to real WebDAV servers
#[derive(Debug, Default, Clone, Copy)]
pub struct WebDAVConnector;

impl RemoteConnector for WebDAVConnector {
    fn connect(&self, config: &ResolvedConfig) -> Result<Arc<dyn RemoteStore>, WebDAVError> {
        let base_url = config
            .directory_url()
            .ok_or_else(|| WebDAVError::InvalidUrl("no base URL configured".to_string()))?;
        let client = WebDAVClient::new(base_url, config.credentials.clone())?;
        Ok(Arc::new(client))
    }
}

/// Why a connection self-test failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionFailure {
    Unauthorized,
    Forbidden,
    NotFound,
    Tls,
    Timeout,
    Unreachable,
    Other(String),
}

impl ConnectionFailure {
    pub fn classify(error: &WebDAVError) -> Self {
        match error {
            WebDAVError::AuthFailed => Self::Unauthorized,
            WebDAVError::Forbidden(_) => Self::Forbidden,
            WebDAVError::NotFound(_) => Self::NotFound,
            WebDAVError::Server { status: 401, .. } => Self::Unauthorized,
            WebDAVError::Server { status: 403, .. } => Self::Forbidden,
            WebDAVError::Server { status: 404, .. } => Self::NotFound,
            WebDAVError::Http(e) => {
                if mentions_tls(e) {
                    Self::Tls
                } else if e.is_timeout() {
                    Self::Timeout
                } else if e.is_connect() {
                    Self::Unreachable
                } else {
                    Self::Other(error.to_string())
                }
            }
            WebDAVError::Io(e) => match e.kind() {
                ErrorKind::TimedOut => Self::Timeout,
                ErrorKind::ConnectionRefused
                | ErrorKind::ConnectionReset
                | ErrorKind::ConnectionAborted
                | ErrorKind::NotConnected
                | ErrorKind::AddrNotAvailable => Self::Unreachable,
                _ => Self::Other(error.to_string()),
            },
            _ => Self::Other(error.to_string()),
        }
    }

    /// User-facing explanation
    pub fn message(&self) -> String {
        match self {
            Self::Unauthorized => "Authentication failed: check the username and password. \
                Some providers require an app-specific password instead of the login password."
                .to_string(),
            Self::Forbidden => "Access denied: the account may not have WebDAV permission.".to_string(),
            Self::NotFound => "URL not found: check the WebDAV server address.".to_string(),
            Self::Tls => "TLS certificate error: check that the server certificate is valid.".to_string(),
            Self::Timeout => "Connection timed out: check the network and the server address.".to_string(),
            Self::Unreachable => "Cannot reach the server: check the network and the server address.".to_string(),
            Self::Other(detail) => format!("Connection failed: {}", detail),
        }
    }
}

fn mentions_tls(error: &reqwest::Error) -> bool {
    let mut source: Option<&(dyn StdError + 'static)> = Some(error);
    while let Some(err) = source {
        let text = err.to_string().to_lowercase();
        if text.contains("certificate") || text.contains("tls") || text.contains("ssl") {
            return true;
        }
        source = err.source();
    }
    false
}
