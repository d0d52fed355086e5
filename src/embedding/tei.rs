//! Client for a text-embeddings-inference `/embed` endpoint

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use super::{EmbeddingBackend, EmbeddingError};

#[derive(Serialize)]
struct EmbedRequest<'a> {
    inputs: &'a [String],
}

/// HTTP embedding backend
pub struct TeiClient {
    base_url: String,
    client: reqwest::Client,
}

impl TeiClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, EmbeddingError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl EmbeddingBackend for TeiClient {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(format!("{}/embed", self.base_url))
            .json(&EmbedRequest { inputs: texts })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let vectors: Vec<Vec<f32>> = response
            .json()
            .await
            .map_err(|e| EmbeddingError::Decode(e.to_string()))?;

        if vectors.len() != texts.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: texts.len(),
                got: vectors.len(),
            });
        }
        Ok(vectors)
    }

    fn name(&self) -> &str {
        "tei"
    }
}
