//! Sink abstraction and HTTP client for the content-addressed store.
//!
//! The store exposes three write operations: upload file content (addressed
//! by its bytes, so duplicate uploads are no-ops), create a permanode, and
//! attach a claim to a permanode. Permanode and claim creation are NOT
//! idempotent; re-running after a crash can create a duplicate node for a
//! photo whose attempt was never recorded.

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tokio_util::io::ReaderStream;

/// Reference to a blob in the sink, either content-derived or a permanode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobRef(pub String);

impl std::fmt::Display for BlobRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether a claim sets a single-valued attribute or adds one value of a
/// multi-valued attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOp {
    Set,
    Add,
}

impl ClaimOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Set => "set-attribute",
            Self::Add => "add-attribute",
        }
    }
}

/// A statement attaching one named attribute value to a permanode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    pub node: BlobRef,
    pub op: ClaimOp,
    pub attr: String,
    pub value: String,
}

impl Claim {
    pub fn set(node: &BlobRef, attr: &str, value: impl Into<String>) -> Self {
        Self {
            node: node.clone(),
            op: ClaimOp::Set,
            attr: attr.to_string(),
            value: value.into(),
        }
    }

    pub fn add(node: &BlobRef, attr: &str, value: impl Into<String>) -> Self {
        Self {
            node: node.clone(),
            op: ClaimOp::Add,
            attr: attr.to_string(),
            value: value.into(),
        }
    }
}

/// Errors from sink operations. Always per-photo: the pipeline records the
/// failure and moves on.
#[derive(Error, Debug)]
pub enum SinkError {
    /// The request could not be sent or the response body not read.
    #[error("Request to {url} failed: {source}")]
    Http { url: String, source: reqwest::Error },

    /// The server answered with a non-success status.
    #[error("Server returned {status} for {url}")]
    Status { status: u16, url: String },

    /// The server answered 2xx but the body was not understood.
    #[error("Malformed response from {url}: {reason}")]
    Response { url: String, reason: String },
}

/// Write interface to the content-addressed store.
///
/// Implementations must be safe for concurrent use by all upload workers.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Upload file content, returning its content-derived reference.
    async fn store_file(&self, filename: &str, file: tokio::fs::File)
        -> Result<BlobRef, SinkError>;

    /// Create a new permanode.
    async fn create_permanode(&self) -> Result<BlobRef, SinkError>;

    /// Attach one claim to a permanode.
    async fn upload_claim(&self, claim: &Claim) -> Result<(), SinkError>;

    /// Check that the server is reachable.
    async fn ping(&self) -> Result<(), SinkError>;
}

#[derive(Deserialize)]
struct BlobRefResponse {
    #[serde(rename = "blobRef")]
    blob_ref: String,
}

/// HTTP implementation of `Sink`.
#[derive(Debug, Clone)]
pub struct HttpSink {
    base_url: String,
    client: reqwest::Client,
}

impl HttpSink {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn parse_blob_ref(url: &str, response: reqwest::Response) -> Result<BlobRef, SinkError> {
        let status = response.status();
        if !status.is_success() {
            return Err(SinkError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        let body: BlobRefResponse = response.json().await.map_err(|e| SinkError::Response {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        Ok(BlobRef(body.blob_ref))
    }
}

#[async_trait]
impl Sink for HttpSink {
    async fn store_file(
        &self,
        filename: &str,
        file: tokio::fs::File,
    ) -> Result<BlobRef, SinkError> {
        let url = self.endpoint("files");
        let response = self
            .client
            .post(&url)
            .query(&[("filename", filename)])
            .body(reqwest::Body::wrap_stream(ReaderStream::new(file)))
            .send()
            .await
            .map_err(|source| SinkError::Http {
                url: url.clone(),
                source,
            })?;
        Self::parse_blob_ref(&url, response).await
    }

    async fn create_permanode(&self) -> Result<BlobRef, SinkError> {
        let url = self.endpoint("permanodes");
        let response = self
            .client
            .post(&url)
            .send()
            .await
            .map_err(|source| SinkError::Http {
                url: url.clone(),
                source,
            })?;
        Self::parse_blob_ref(&url, response).await
    }

    async fn upload_claim(&self, claim: &Claim) -> Result<(), SinkError> {
        let url = self.endpoint("claims");
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "permanode": claim.node.0,
                "op": claim.op.as_str(),
                "attr": claim.attr,
                "value": claim.value,
            }))
            .send()
            .await
            .map_err(|source| SinkError::Http {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SinkError::Status {
                status: status.as_u16(),
                url,
            });
        }
        Ok(())
    }

    async fn ping(&self) -> Result<(), SinkError> {
        let url = self.endpoint("status");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|source| SinkError::Http {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SinkError::Status {
                status: status.as_u16(),
                url,
            });
        }
        Ok(())
    }
}
