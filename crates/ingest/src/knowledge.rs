use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use docgenie_core::config::{KnowledgeProvider, KnowledgeStoreConfig};
use docgenie_core::knowledge::{
    InMemoryKnowledgeStore, KnowledgeStore, KnowledgeStoreError, SearchHit, VectorRecord,
};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

const API_VERSION: &str = "2025-01";
const LIST_PAGE_LIMIT: usize = 100;

/// Client for a hosted vector index with a separate inference endpoint for
/// embeddings. Texts are stored under the `text` metadata key.
pub struct HttpKnowledgeStore {
    client: reqwest::Client,
    api_key: SecretString,
    embed_url: String,
    index_host: String,
    model: String,
}

#[derive(Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedData>,
}

#[derive(Deserialize)]
struct EmbedData {
    values: Vec<f32>,
}

#[derive(Deserialize)]
struct UpsertResponse {
    #[serde(rename = "upsertedCount", default)]
    upserted_count: usize,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<QueryMatch>,
}

#[derive(Deserialize)]
struct QueryMatch {
    id: String,
    #[serde(default)]
    score: f32,
    #[serde(default)]
    metadata: Option<Value>,
}

#[derive(Deserialize)]
struct ListResponse {
    #[serde(default)]
    vectors: Vec<ListedVector>,
    #[serde(default)]
    pagination: Option<Pagination>,
}

#[derive(Deserialize)]
struct ListedVector {
    id: String,
}

#[derive(Deserialize)]
struct Pagination {
    next: Option<String>,
}

#[derive(Deserialize)]
struct IndexStats {
    #[serde(default)]
    namespaces: serde_json::Map<String, Value>,
}

impl HttpKnowledgeStore {
    pub fn from_config(config: &KnowledgeStoreConfig) -> Result<Self, KnowledgeStoreError> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            KnowledgeStoreError::Transport("knowledge_store.api_key is not configured".into())
        })?;
        let index_host = config.index_host.clone().ok_or_else(|| {
            KnowledgeStoreError::Transport("knowledge_store.index_host is not configured".into())
        })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|error| KnowledgeStoreError::Transport(error.to_string()))?;

        Ok(Self {
            client,
            api_key,
            embed_url: config.embed_url.clone(),
            index_host: index_host.trim_end_matches('/').to_owned(),
            model: config.embedding_model.clone(),
        })
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .header("Api-Key", self.api_key.expose_secret())
            .header("X-Pinecone-API-Version", API_VERSION)
    }

    async fn send<T: for<'de> Deserialize<'de>>(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<T, KnowledgeStoreError> {
        let response = builder
            .send()
            .await
            .map_err(|error| KnowledgeStoreError::Transport(error.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(KnowledgeStoreError::Status { status: status.as_u16(), body });
        }
        response.json().await.map_err(|error| KnowledgeStoreError::Decode(error.to_string()))
    }

    async fn embed(
        &self,
        input_type: &str,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>, KnowledgeStoreError> {
        let inputs: Vec<Value> = texts.iter().map(|text| json!({ "text": text })).collect();
        let parameters = match input_type {
            "passage" => json!({"input_type": "passage", "truncate": "END"}),
            _ => json!({"input_type": input_type}),
        };
        let response: EmbedResponse = self
            .send(self.request(reqwest::Method::POST, &self.embed_url).json(&json!({
                "model": self.model,
                "parameters": parameters,
                "inputs": inputs,
            })))
            .await?;

        if response.data.len() != texts.len() {
            return Err(KnowledgeStoreError::EmbeddingMismatch {
                expected: texts.len(),
                actual: response.data.len(),
            });
        }
        Ok(response.data.into_iter().map(|data| data.values).collect())
    }
}

#[async_trait]
impl KnowledgeStore for HttpKnowledgeStore {
    async fn embed_passages(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, KnowledgeStoreError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.embed("passage", texts).await
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, KnowledgeStoreError> {
        let mut embeddings = self.embed("query", &[text.to_owned()]).await?;
        embeddings.pop().ok_or(KnowledgeStoreError::EmbeddingMismatch { expected: 1, actual: 0 })
    }

    async fn upsert(
        &self,
        namespace: &str,
        vectors: Vec<VectorRecord>,
    ) -> Result<usize, KnowledgeStoreError> {
        let vectors: Vec<Value> = vectors
            .into_iter()
            .map(|vector| {
                json!({
                    "id": vector.id,
                    "values": vector.values,
                    "metadata": {"text": vector.text},
                })
            })
            .collect();
        let url = format!("{}/vectors/upsert", self.index_host);
        let response: UpsertResponse = self
            .send(
                self.request(reqwest::Method::POST, &url)
                    .json(&json!({"namespace": namespace, "vectors": vectors})),
            )
            .await?;
        debug!(
            event_name = "knowledge.upserted",
            namespace,
            upserted = response.upserted_count,
            "vectors upserted"
        );
        Ok(response.upserted_count)
    }

    async fn search(
        &self,
        namespace: &str,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<SearchHit>, KnowledgeStoreError> {
        let url = format!("{}/query", self.index_host);
        let response: QueryResponse = self
            .send(self.request(reqwest::Method::POST, &url).json(&json!({
                "namespace": namespace,
                "vector": embedding,
                "topK": top_k,
                "includeValues": false,
                "includeMetadata": true,
            })))
            .await?;

        Ok(response
            .matches
            .into_iter()
            .map(|hit| SearchHit {
                text: hit
                    .metadata
                    .as_ref()
                    .and_then(|metadata| metadata.get("text"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned(),
                id: hit.id,
                score: hit.score,
            })
            .collect())
    }

    /// Follows pagination until the service stops returning a next token.
    async fn list_ids(
        &self,
        namespace: &str,
        prefix: &str,
    ) -> Result<Vec<String>, KnowledgeStoreError> {
        let url = format!("{}/vectors/list", self.index_host);
        let mut ids = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let mut query = vec![
                ("namespace", namespace.to_owned()),
                ("prefix", prefix.to_owned()),
                ("limit", LIST_PAGE_LIMIT.to_string()),
            ];
            if let Some(token) = &token {
                query.push(("paginationToken", token.clone()));
            }
            let page: ListResponse =
                self.send(self.request(reqwest::Method::GET, &url).query(&query)).await?;
            ids.extend(page.vectors.into_iter().map(|vector| vector.id));

            token = page.pagination.and_then(|pagination| pagination.next);
            if token.is_none() {
                return Ok(ids);
            }
        }
    }

    async fn namespaces(&self) -> Result<Vec<String>, KnowledgeStoreError> {
        let url = format!("{}/describe_index_stats", self.index_host);
        let stats: IndexStats =
            self.send(self.request(reqwest::Method::POST, &url).json(&json!({}))).await?;
        Ok(stats.namespaces.keys().cloned().collect())
    }
}

pub fn build_knowledge_store(
    config: &KnowledgeStoreConfig,
) -> Result<Arc<dyn KnowledgeStore>, KnowledgeStoreError> {
    Ok(match config.provider {
        KnowledgeProvider::Memory => Arc::new(InMemoryKnowledgeStore::new()),
        KnowledgeProvider::Pinecone => Arc::new(HttpKnowledgeStore::from_config(config)?),
    })
}
