//! Vector knowledge-store contract shared by the answer path (search) and the
//! ingestion path (id listing, embedding, upsert).

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_EMBED_BATCH_SIZE: usize = 10;
pub const DEFAULT_UPSERT_BATCH_SIZE: usize = 200;
pub const DEFAULT_SEARCH_TOP_K: usize = 5;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub values: Vec<f32>,
    pub text: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub score: f32,
    pub text: String,
}

#[derive(Debug, Error)]
pub enum KnowledgeStoreError {
    #[error("knowledge store transport failure: {0}")]
    Transport(String),
    #[error("knowledge store returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("knowledge store response decode failure: {0}")]
    Decode(String),
    #[error("embedding count mismatch: sent {expected} inputs, got {actual} vectors")]
    EmbeddingMismatch { expected: usize, actual: usize },
}

#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    async fn embed_passages(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, KnowledgeStoreError>;

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, KnowledgeStoreError>;

    /// Writes vectors into `namespace`, returning how many were accepted.
    async fn upsert(
        &self,
        namespace: &str,
        vectors: Vec<VectorRecord>,
    ) -> Result<usize, KnowledgeStoreError>;

    async fn search(
        &self,
        namespace: &str,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<SearchHit>, KnowledgeStoreError>;

    async fn list_ids(&self, namespace: &str, prefix: &str)
        -> Result<Vec<String>, KnowledgeStoreError>;

    async fn namespaces(&self) -> Result<Vec<String>, KnowledgeStoreError>;
}

const IN_MEMORY_DIMENSION: usize = 64;

/// Process-local store with a bag-of-words hash embedding. Good enough for
/// development runs and tests; nothing survives a restart.
#[derive(Clone, Default)]
pub struct InMemoryKnowledgeStore {
    namespaces: Arc<Mutex<BTreeMap<String, BTreeMap<String, VectorRecord>>>>,
}

impl InMemoryKnowledgeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn embed_text(text: &str) -> Vec<f32> {
        let mut values = vec![0.0_f32; IN_MEMORY_DIMENSION];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|token| !token.is_empty())
            .map(str::to_lowercase)
        {
            let bucket = (fnv1a(token.as_bytes()) % IN_MEMORY_DIMENSION as u64) as usize;
            values[bucket] += 1.0;
        }
        let norm = values.iter().map(|value| value * value).sum::<f32>().sqrt();
        if norm > 0.0 {
            values.iter_mut().for_each(|value| *value /= norm);
        }
        values
    }

    pub fn record_count(&self, namespace: &str) -> usize {
        self.with_namespaces(|namespaces| namespaces.get(namespace).map_or(0, BTreeMap::len))
    }

    fn with_namespaces<T>(
        &self,
        f: impl FnOnce(&mut BTreeMap<String, BTreeMap<String, VectorRecord>>) -> T,
    ) -> T {
        match self.namespaces.lock() {
            Ok(mut guard) => f(&mut guard),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }
}

#[async_trait]
impl KnowledgeStore for InMemoryKnowledgeStore {
    async fn embed_passages(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, KnowledgeStoreError> {
        Ok(texts.iter().map(|text| Self::embed_text(text)).collect())
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, KnowledgeStoreError> {
        Ok(Self::embed_text(text))
    }

    async fn upsert(
        &self,
        namespace: &str,
        vectors: Vec<VectorRecord>,
    ) -> Result<usize, KnowledgeStoreError> {
        let count = vectors.len();
        self.with_namespaces(|namespaces| {
            let entries = namespaces.entry(namespace.to_owned()).or_default();
            for vector in vectors {
                entries.insert(vector.id.clone(), vector);
            }
        });
        Ok(count)
    }

    async fn search(
        &self,
        namespace: &str,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<SearchHit>, KnowledgeStoreError> {
        let mut hits = self.with_namespaces(|namespaces| {
            namespaces
                .get(namespace)
                .map(|entries| {
                    entries
                        .values()
                        .map(|record| SearchHit {
                            id: record.id.clone(),
                            score: cosine(embedding, &record.values),
                            text: record.text.clone(),
                        })
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default()
        });
        hits.sort_by(|left, right| {
            right.score.partial_cmp(&left.score).unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn list_ids(
        &self,
        namespace: &str,
        prefix: &str,
    ) -> Result<Vec<String>, KnowledgeStoreError> {
        Ok(self.with_namespaces(|namespaces| {
            namespaces
                .get(namespace)
                .map(|entries| {
                    entries.keys().filter(|id| id.starts_with(prefix)).cloned().collect()
                })
                .unwrap_or_default()
        }))
    }

    async fn namespaces(&self) -> Result<Vec<String>, KnowledgeStoreError> {
        Ok(self.with_namespaces(|namespaces| namespaces.keys().cloned().collect()))
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf2_9ce4_8422_2325_u64, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(0x0100_0000_01b3)
    })
}

fn cosine(left: &[f32], right: &[f32]) -> f32 {
    if left.len() != right.len() {
        return 0.0;
    }
    let dot: f32 = left.iter().zip(right).map(|(a, b)| a * b).sum();
    let left_norm = left.iter().map(|v| v * v).sum::<f32>().sqrt();
    let right_norm = right.iter().map(|v| v * v).sum::<f32>().sqrt();
    if left_norm == 0.0 || right_norm == 0.0 {
        return 0.0;
    }
    dot / (left_norm * right_norm)
}
