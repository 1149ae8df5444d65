//! Resource fetching and self-contained encoding.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose;
use base64::Engine as _;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {status} for {url}")]
    Status { url: String, status: u16 },
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("unsupported URL scheme: {0}")]
    UnsupportedScheme(String),
    #[error("not found: {0}")]
    NotFound(String),
}

/// Bytes of a fetched resource plus its declared content type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedResource {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

impl FetchedResource {
    pub fn new(bytes: impl Into<Vec<u8>>, content_type: Option<&str>) -> Self {
        Self {
            bytes: bytes.into(),
            content_type: content_type.map(str::to_string),
        }
    }

    /// Encode as a `data:` URL. The mime type is the essence of the declared
    /// content type, else a guess from the URL path.
    pub fn to_data_url(&self, url: &Url) -> String {
        let mime = self
            .content_type
            .as_deref()
            .and_then(content_type_essence)
            .unwrap_or_else(|| {
                mime_guess::from_path(url.path())
                    .first_or_octet_stream()
                    .essence_str()
                    .to_string()
            });
        format!(
            "data:{};base64,{}",
            mime,
            general_purpose::STANDARD.encode(&self.bytes)
        )
    }

    /// Body as text, replacing invalid UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

fn content_type_essence(content_type: &str) -> Option<String> {
    let essence = content_type.split(';').next()?.trim().to_ascii_lowercase();
    (!essence.is_empty() && essence.contains('/')).then_some(essence)
}

/// Network seam used by asset resolution and stylesheet inlining.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<FetchedResource, FetchError>;
}

/// Fetches `http(s)` resources with reqwest and `file` resources from disk.
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<FetchedResource, FetchError> {
        match url.scheme() {
            "http" | "https" => {
                let response = self.client.get(url.clone()).send().await?;
                let status = response.status();
                if !status.is_success() {
                    return Err(FetchError::Status {
                        url: url.to_string(),
                        status: status.as_u16(),
                    });
                }
                let content_type = response
                    .headers()
                    .get(reqwest::header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                let bytes = response.bytes().await?;
                Ok(FetchedResource {
                    bytes: bytes.to_vec(),
                    content_type,
                })
            }
            "file" => {
                let path = url
                    .to_file_path()
                    .map_err(|_| FetchError::UnsupportedScheme(url.to_string()))?;
                let bytes = tokio::fs::read(&path).await.map_err(|source| FetchError::Io {
                    path: path.display().to_string(),
                    source,
                })?;
                Ok(FetchedResource {
                    bytes,
                    content_type: None,
                })
            }
            other => Err(FetchError::UnsupportedScheme(other.to_string())),
        }
    }
}
