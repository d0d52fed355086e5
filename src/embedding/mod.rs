//! Optional embedding stage for extracted entities
//!
//! Embedding runs after extraction and never fails an indexing run: a batch
//! that cannot be embedded leaves its entities without vectors and is
//! reported through [`PartialEmbeddingFailure`].

pub mod tei;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

pub use crate::core::error::EmbeddingError;
pub use tei::TeiClient;

use crate::storage::models::CodeEntity;

/// A service that turns texts into fixed-length vectors
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// One vector per input, in input order
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    fn name(&self) -> &str;
}

/// Some batches could not be embedded
#[derive(Debug, Error)]
#[error("{failed_batches} of {total_batches} embedding batches failed")]
pub struct PartialEmbeddingFailure {
    /// Entities that did receive a vector
    pub embedded: usize,
    pub total_batches: usize,
    pub failed_batches: usize,
    pub failures: Vec<String>,
}

/// Text sent to the backend for an entity
pub fn embedding_text(entity: &CodeEntity) -> String {
    match entity.docstring.as_deref() {
        Some(doc) if !doc.is_empty() => format!("{} {} {}", entity.signature, doc, entity.name),
        _ => format!("{} {}", entity.signature, entity.name),
    }
}

/// Attach vectors to `entities` in consecutive batches of `batch_size`.
///
/// Returns the number of embedded entities when every batch succeeds.
pub async fn embed_entities(
    backend: &dyn EmbeddingBackend,
    entities: &mut [CodeEntity],
    batch_size: usize,
) -> Result<usize, PartialEmbeddingFailure> {
    let batch_size = batch_size.max(1);
    let mut embedded = 0;
    let mut total_batches = 0;
    let mut failures = Vec::new();

    for (index, batch) in entities.chunks_mut(batch_size).enumerate() {
        total_batches += 1;
        let texts: Vec<String> = batch.iter().map(embedding_text).collect();

        let outcome = backend.embed(&texts).await.and_then(|vectors| {
            if vectors.len() == texts.len() {
                Ok(vectors)
            } else {
                Err(EmbeddingError::CountMismatch {
                    expected: texts.len(),
                    got: vectors.len(),
                })
            }
        });

        match outcome {
            Ok(vectors) => {
                for (entity, vector) in batch.iter_mut().zip(vectors) {
                    entity.embedding = Some(vector);
                }
                embedded += batch.len();
                debug!(batch = index, size = batch.len(), "embedded batch via {}", backend.name());
            }
            Err(e) => {
                warn!(batch = index, "embedding batch failed: {}", e);
                failures.push(format!("batch {}: {}", index, e));
            }
        }
    }

    if failures.is_empty() {
        Ok(embedded)
    } else {
        Err(PartialEmbeddingFailure {
            embedded,
            total_batches,
            failed_batches: failures.len(),
            failures,
        })
    }
}

/// Cosine similarity of two vectors; 0.0 for mismatched or zero vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        0.0
    } else {
        dot / denom
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Deterministic backend: vector is `[text length, 1.0]`, optionally
    /// failing one batch by index.
    pub struct FakeBackend {
        pub fail_batch: Option<usize>,
        pub calls: AtomicUsize,
    }

    impl FakeBackend {
        pub fn new() -> Self {
            Self {
                fail_batch: None,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn failing(batch: usize) -> Self {
            Self {
                fail_batch: Some(batch),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl EmbeddingBackend for FakeBackend {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_batch == Some(call) {
                return Err(EmbeddingError::Status {
                    status: 503,
                    body: "overloaded".to_string(),
                });
            }
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
        }

        fn name(&self) -> &str {
            "fake"
        }
    }
}
