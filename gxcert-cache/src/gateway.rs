//! HTTP gateway blob fetcher.
//!
//! Reads content from an IPFS-style gateway and hands it back as a `data:`
//! URL, which is usable without any further network access.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use gxcert_core::{ContentError, ContentId, GatewayConfig, GxCertResult};
use reqwest::header::CONTENT_TYPE;

use crate::source::BlobFetcher;

#[derive(Clone)]
pub struct GatewayBlobFetcher {
    client: reqwest::Client,
    base_url: String,
    max_content_bytes: u64,
    fallback_media_type: String,
}

impl GatewayBlobFetcher {
    pub fn new(config: &GatewayConfig) -> GxCertResult<Self> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ContentError::Gateway {
                reason: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim().trim_end_matches('/').to_string(),
            max_content_bytes: config.max_content_bytes,
            fallback_media_type: config.fallback_media_type.clone(),
        })
    }

    fn unavailable(content_id: &ContentId, reason: impl Into<String>) -> ContentError {
        ContentError::Unavailable {
            content_id: content_id.clone(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl BlobFetcher for GatewayBlobFetcher {
    async fn resolve(&self, content_id: &ContentId) -> Result<String, ContentError> {
        if content_id.is_empty() {
            return Err(Self::unavailable(content_id, "empty content id"));
        }

        let url = content_url(&self.base_url, content_id);
        let mut response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Self::unavailable(content_id, format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Self::unavailable(content_id, format!("gateway returned {}", status)));
        }
        if let Some(length) = response.content_length() {
            if length > self.max_content_bytes {
                return Err(Self::unavailable(
                    content_id,
                    format!("{} bytes exceeds limit of {}", length, self.max_content_bytes),
                ));
            }
        }

        let media_type = media_type_of(
            response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|value| value.to_str().ok()),
            &self.fallback_media_type,
        );
        // Chunked responses carry no length, so the limit is enforced per chunk.
        let mut body = BoundedBody::new(self.max_content_bytes);
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| Self::unavailable(content_id, format!("Failed to read body: {}", e)))?
        {
            body.push(&chunk).map_err(|read| {
                Self::unavailable(
                    content_id,
                    format!("{} bytes exceeds limit of {}", read, self.max_content_bytes),
                )
            })?;
        }

        let body = body.into_inner();
        if body.is_empty() {
            return Err(Self::unavailable(content_id, "empty body"));
        }

        tracing::debug!(content_id = %content_id, bytes = body.len(), "Content resolved");
        Ok(data_url(&media_type, &body))
    }
}

impl std::fmt::Debug for GatewayBlobFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayBlobFetcher")
            .field("base_url", &self.base_url)
            .field("max_content_bytes", &self.max_content_bytes)
            .finish()
    }
}

/// Response body buffer that refuses to grow past a byte limit.
struct BoundedBody {
    bytes: Vec<u8>,
    limit: u64,
}

impl BoundedBody {
    fn new(limit: u64) -> Self {
        Self {
            bytes: Vec::new(),
            limit,
        }
    }

    /// Append a chunk, or return the byte count it would have reached.
    fn push(&mut self, chunk: &[u8]) -> Result<(), u64> {
        let total = self.bytes.len() as u64 + chunk.len() as u64;
        if total > self.limit {
            return Err(total);
        }
        self.bytes.extend_from_slice(chunk);
        Ok(())
    }

    fn into_inner(self) -> Vec<u8> {
        self.bytes
    }
}

fn content_url(base_url: &str, content_id: &ContentId) -> String {
    format!("{}/ipfs/{}", base_url, content_id)
}

/// Media type of a `Content-Type` header value, without parameters.
fn media_type_of(header: Option<&str>, fallback: &str) -> String {
    header
        .and_then(|value| value.split(';').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(fallback)
        .to_string()
}

pub fn data_url(media_type: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", media_type, STANDARD.encode(bytes))
}
