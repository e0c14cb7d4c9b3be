use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sync::config::SyncCredentials;

/// WebDAV client for sync operations
pub struct WebDAVClient {
    client: Client,
    base_url: String,
    credentials: Option<SyncCredentials>,
}

#[derive(Error, Debug)]
pub enum WebDAVError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Authentication failed")]
    AuthFailed,
    #[error("Access forbidden: {0}")]
    Forbidden(String),
    #[error("Resource not found: {0}")]
    NotFound(String),
    #[error("Server error: {status} - {message}")]
    Server { status: u16, message: String },
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("Invalid method: {0}")]
    InvalidMethod(&'static str),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// File/directory info from PROPFIND
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceInfo {
    pub path: String,
    pub is_collection: bool,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub content_length: Option<u64>,
}

impl WebDAVClient {
    /// Create a new WebDAV client. Without credentials requests are sent anonymously.
    pub fn new(base_url: String, credentials: Option<SyncCredentials>) -> Result<Self, WebDAVError> {
        // Normalize URL - ensure no trailing slash
        let base_url = base_url.trim_end_matches('/').to_string();

        // Validate URL
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(WebDAVError::InvalidUrl("URL must start with http:// or https://".to_string()));
        }

        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .connect_timeout(std::time::Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url,
            credentials,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let request = self.client.request(method, url);
        match &self.credentials {
            Some(creds) => request.basic_auth(&creds.username, Some(&creds.password)),
            None => request,
        }
    }

    /// Map a non-success response onto the error taxonomy
    async fn failure(response: Response, url: &str) -> WebDAVError {
        match response.status() {
            StatusCode::UNAUTHORIZED => WebDAVError::AuthFailed,
            StatusCode::FORBIDDEN => WebDAVError::Forbidden(url.to_string()),
            StatusCode::NOT_FOUND => WebDAVError::NotFound(url.to_string()),
            status => WebDAVError::Server {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            },
        }
    }

    /// PROPFIND - List directory or get resource properties
    pub async fn propfind(&self, url: &str, depth: u32) -> Result<Vec<ResourceInfo>, WebDAVError> {
        let method = Method::from_bytes(b"PROPFIND").map_err(|_| WebDAVError::InvalidMethod("PROPFIND"))?;
        let response = self
            .request(method, url)
            .header("Depth", depth.to_string())
            .header("Content-Type", "application/xml")
            .body(PROPFIND_BODY)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() && status != StatusCode::MULTI_STATUS {
            return Err(Self::failure(response, url).await);
        }

        let xml = response.text().await?;
        Ok(parse_propfind_response(&xml, &self.base_url))
    }

    /// GET - Download file contents
    pub async fn get(&self, url: &str) -> Result<Vec<u8>, WebDAVError> {
        let response = self.request(Method::GET, url).send().await?;
        if !response.status().is_success() {
            return Err(Self::failure(response, url).await);
        }
        Ok(response.bytes().await?.to_vec())
    }

    /// HEAD - Check resource existence without downloading content
    pub async fn head(&self, url: &str) -> Result<bool, WebDAVError> {
        let response = self.request(Method::HEAD, url).send().await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            _ => Err(Self::failure(response, url).await),
        }
    }

    /// PUT - Upload file, replacing any existing content
    pub async fn put(&self, url: &str, data: &[u8]) -> Result<(), WebDAVError> {
        let response = self
            .request(Method::PUT, url)
            .body(data.to_vec())
            .send()
            .await?;

        match response.status() {
            StatusCode::CREATED | StatusCode::NO_CONTENT | StatusCode::OK => Ok(()),
            _ => Err(Self::failure(response, url).await),
        }
    }

    /// MKCOL - Create a directory
    pub async fn mkcol(&self, url: &str) -> Result<(), WebDAVError> {
        let method = Method::from_bytes(b"MKCOL").map_err(|_| WebDAVError::InvalidMethod("MKCOL"))?;
        let response = self.request(method, url).send().await?;

        match response.status() {
            StatusCode::CREATED | StatusCode::OK => Ok(()),
            StatusCode::METHOD_NOT_ALLOWED => {
                // Directory might already exist, that's OK
                Ok(())
            }
            _ => Err(Self::failure(response, url).await),
        }
    }
}

const PROPFIND_BODY: &str = r#"<?xml version="1.0" encoding="utf-8" ?>
<D:propfind xmlns:D="DAV:">
  <D:prop>
    <D:getlastmodified/>
    <D:getetag/>
    <D:getcontentlength/>
    <D:resourcetype/>
  </D:prop>
</D:propfind>"#;

/// Text between `<D:tag>` and `</D:tag>` (either prefix case) on one line
fn element<'a>(line: &'a str, tag: &str) -> Option<&'a str> {
    for prefix in ["D", "d"] {
        let open = format!("<{}:{}>", prefix, tag);
        let close = format!("</{}:{}>", prefix, tag);
        if let Some(start) = line.find(&open) {
            let start = start + open.len();
            if let Some(end) = line[start..].find(&close) {
                return Some(&line[start..start + end]);
            }
        }
    }
    None
}

/// Parse PROPFIND XML response
fn parse_propfind_response(xml: &str, base_url: &str) -> Vec<ResourceInfo> {
    let mut resources = Vec::new();

    // Some servers send the whole multistatus on one line
    let xml = xml.replace("><", ">\n<");
    log::debug!("parse_propfind: xml length={}, base_url={}", xml.len(), base_url);

    // Path component of the base URL (e.g., "/remote.php/dav/files/user")
    let base_path = base_url
        .find("://")
        .map(|i| &base_url[i + 3..])
        .and_then(|rest| rest.find('/').map(|i| &rest[i..]))
        .unwrap_or("")
        .trim_end_matches('/');

    let mut current: Option<ResourceInfo> = None;

    for line in xml.lines() {
        let line = line.trim();

        if line.contains("<D:response>") || line.contains("<d:response>") {
            current = Some(ResourceInfo {
                path: String::new(),
                is_collection: false,
                etag: None,
                last_modified: None,
                content_length: None,
            });
        }

        if let Some(resource) = current.as_mut() {
            if let Some(href) = element(line, "href") {
                // Servers return either full URLs or absolute paths
                let path = href
                    .strip_prefix(base_url)
                    .or_else(|| href.strip_prefix(base_path))
                    .unwrap_or(href)
                    .trim_start_matches('/');
                resource.path = urlencoding::decode(path)
                    .map(|p| p.into_owned())
                    .unwrap_or_else(|_| path.to_string());
            }
            if let Some(etag) = element(line, "getetag") {
                resource.etag = Some(etag.trim_matches('"').to_string());
            }
            if let Some(length) = element(line, "getcontentlength") {
                resource.content_length = length.parse().ok();
            }
            if let Some(modified) = element(line, "getlastmodified") {
                resource.last_modified = Some(modified.to_string());
            }
            if line.contains("<D:collection") || line.contains("<d:collection") {
                resource.is_collection = true;
            }
        }

        if line.contains("</D:response>") || line.contains("</d:response>") {
            if let Some(resource) = current.take() {
                resources.push(resource);
            }
        }
    }

    log::debug!("parse_propfind: parsed {} resources from response", resources.len());
    resources
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::{Arc, Mutex};

    use axum::body::Bytes;
    use axum::extract::State;
    use axum::http::{header, HeaderMap, Method as AxumMethod, StatusCode as AxumStatus, Uri};
    use axum::response::{IntoResponse, Response as AxumResponse};
    use axum::Router;

    const MULTISTATUS: &str = r#"<?xml version="1.0"?><d:multistatus xmlns:d="DAV:"><d:response><d:href>/dav/sync/</d:href><d:propstat><d:prop><d:resourcetype><d:collection/></d:resourcetype></d:prop></d:propstat></d:response><d:response><d:href>/dav/sync/history%20copy.json</d:href><d:propstat><d:prop><d:getetag>"abc"</d:getetag><d:getcontentlength>42</d:getcontentlength><d:resourcetype/></d:prop></d:propstat></d:response></d:multistatus>"#;

    #[test]
    fn test_parse_single_line_multistatus() {
        let resources = parse_propfind_response(MULTISTATUS, "https://dav.example/dav");
        assert_eq!(resources.len(), 2);
        assert_eq!(resources[0].path, "sync/");
        assert!(resources[0].is_collection);
        assert_eq!(resources[1].path, "sync/history copy.json");
        assert_eq!(resources[1].etag.as_deref(), Some("abc"));
        assert_eq!(resources[1].content_length, Some(42));
        assert!(!resources[1].is_collection);
    }

    #[test]
    fn test_parse_full_url_hrefs() {
        let xml = "<D:multistatus xmlns:D=\"DAV:\">\n<D:response>\n<D:href>https://dav.example/dav/a.json</D:href>\n</D:response>\n</D:multistatus>";
        let resources = parse_propfind_response(xml, "https://dav.example/dav");
        assert_eq!(resources.len(), 1);
        assert_eq!(resources[0].path, "a.json");
    }

    #[test]
    fn test_rejects_non_http_url() {
        let result = WebDAVClient::new("ftp://dav.example".to_string(), None);
        assert!(matches!(result, Err(WebDAVError::InvalidUrl(_))));
    }

    /// Minimal in-process WebDAV server
    #[derive(Clone, Default)]
    struct FakeDav {
        files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
        dirs: Arc<Mutex<HashSet<String>>>,
        authorization: Option<String>,
    }

    async fn serve_dav(
        State(dav): State<FakeDav>,
        method: AxumMethod,
        uri: Uri,
        headers: HeaderMap,
        body: Bytes,
    ) -> AxumResponse {
        if let Some(expected) = &dav.authorization {
            let sent = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok());
            if sent != Some(expected.as_str()) {
                return AxumStatus::UNAUTHORIZED.into_response();
            }
        }

        let path = uri.path().to_string();
        if path.starts_with("/locked") {
            return AxumStatus::FORBIDDEN.into_response();
        }

        match method.as_str() {
            "GET" => match dav.files.lock().unwrap().get(&path) {
                Some(data) => (AxumStatus::OK, data.clone()).into_response(),
                None => AxumStatus::NOT_FOUND.into_response(),
            },
            "HEAD" => {
                let found = dav.files.lock().unwrap().contains_key(&path)
                    || dav.dirs.lock().unwrap().contains(&path);
                if found {
                    AxumStatus::OK.into_response()
                } else {
                    AxumStatus::NOT_FOUND.into_response()
                }
            }
            "PUT" => {
                dav.files.lock().unwrap().insert(path, body.to_vec());
                AxumStatus::CREATED.into_response()
            }
            "MKCOL" => {
                if dav.dirs.lock().unwrap().insert(path) {
                    AxumStatus::CREATED.into_response()
                } else {
                    AxumStatus::METHOD_NOT_ALLOWED.into_response()
                }
            }
            "PROPFIND" => {
                if !dav.dirs.lock().unwrap().contains(&path) {
                    return AxumStatus::NOT_FOUND.into_response();
                }
                let mut xml = String::from("<d:multistatus xmlns:d=\"DAV:\">");
                xml.push_str(&format!(
                    "<d:response><d:href>{}</d:href><d:resourcetype><d:collection/></d:resourcetype></d:response>",
                    path
                ));
                for (name, data) in dav.files.lock().unwrap().iter() {
                    if name.starts_with(&path) {
                        xml.push_str(&format!(
                            "<d:response><d:href>{}</d:href><d:getcontentlength>{}</d:getcontentlength></d:response>",
                            name,
                            data.len()
                        ));
                    }
                }
                xml.push_str("</d:multistatus>");
                (AxumStatus::MULTI_STATUS, xml).into_response()
            }
            _ => AxumStatus::METHOD_NOT_ALLOWED.into_response(),
        }
    }

    async fn start_server(dav: FakeDav) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().fallback(serve_dav).with_state(dav);
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn alice() -> Option<SyncCredentials> {
        Some(SyncCredentials {
            username: "alice".to_string(),
            password: "secret".to_string(),
        })
    }

    #[tokio::test]
    async fn test_round_trip_against_server() {
        let dav = FakeDav {
            authorization: Some("Basic YWxpY2U6c2VjcmV0".to_string()),
            ..Default::default()
        };
        let base = start_server(dav.clone()).await;
        let client = WebDAVClient::new(format!("{}/sync/", base), alice()).unwrap();
        assert_eq!(client.base_url(), format!("{}/sync", base));

        let dir = format!("{}/sync/", base);
        let file = format!("{}/sync/history.json", base);

        assert!(!client.head(&dir).await.unwrap());
        client.mkcol(&dir).await.unwrap();
        // Second MKCOL answers 405, which counts as success
        client.mkcol(&dir).await.unwrap();
        assert!(client.head(&dir).await.unwrap());

        client.put(&file, b"[]").await.unwrap();
        assert!(client.head(&file).await.unwrap());
        assert_eq!(client.get(&file).await.unwrap(), b"[]");

        let listing = client.propfind(&dir, 1).await.unwrap();
        assert!(listing.iter().any(|r| r.path == "history.json" && r.content_length == Some(2)));
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let dav = FakeDav {
            authorization: Some("Basic YWxpY2U6c2VjcmV0".to_string()),
            ..Default::default()
        };
        let base = start_server(dav).await;

        let anonymous = WebDAVClient::new(base.clone(), None).unwrap();
        assert!(matches!(
            anonymous.get(&format!("{}/x.json", base)).await,
            Err(WebDAVError::AuthFailed)
        ));

        let client = WebDAVClient::new(base.clone(), alice()).unwrap();
        assert!(matches!(
            client.get(&format!("{}/missing.json", base)).await,
            Err(WebDAVError::NotFound(_))
        ));
        assert!(matches!(
            client.put(&format!("{}/locked/a.json", base), b"{}").await,
            Err(WebDAVError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn test_anonymous_client_sends_no_credentials() {
        let dav = FakeDav::default();
        let base = start_server(dav.clone()).await;
        let client = WebDAVClient::new(base.clone(), None).unwrap();

        client.put(&format!("{}/CODE1234/settings.json", base), b"{}").await.unwrap();
        assert!(dav.files.lock().unwrap().contains_key("/CODE1234/settings.json"));
    }
}
