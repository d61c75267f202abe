use async_trait::async_trait;
use docgenie_core::domain::message::{ConversationState, OriginTag};
use docgenie_core::domain::record::IngestionRecord;
use docgenie_core::knowledge::{KnowledgeStoreError, VectorRecord};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{expect_last, IngestionStage, PipelineError, StageContext};

const STAGE: &str = "upsert";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistSummary {
    pub namespace: String,
    pub upserted: usize,
}

/// Embeds the latest `format` records in fixed-size batches and upserts them
/// into the connector's namespace, chunked by the upsert batch size.
pub struct PersistStage;

#[async_trait]
impl IngestionStage for PersistStage {
    fn origin(&self) -> OriginTag {
        OriginTag::Upsert
    }

    async fn run(
        &self,
        context: &StageContext<'_>,
        conversation: &ConversationState,
    ) -> Result<String, PipelineError> {
        let message = expect_last(conversation, STAGE, OriginTag::Format)?;
        let records: Vec<IngestionRecord> = serde_json::from_str(&message.content)
            .map_err(|error| PipelineError::Payload { stage: STAGE, reason: error.to_string() })?;

        let mut vectors = Vec::with_capacity(records.len());
        for chunk in records.chunks(context.settings.embed_batch_size.max(1)) {
            let texts: Vec<String> = chunk.iter().map(|record| record.text.clone()).collect();
            let embeddings =
                context.store.embed_passages(&texts).await.map_err(PipelineError::store(STAGE))?;
            if embeddings.len() != chunk.len() {
                return Err(PipelineError::Store {
                    stage: STAGE,
                    error: KnowledgeStoreError::EmbeddingMismatch {
                        expected: chunk.len(),
                        actual: embeddings.len(),
                    },
                });
            }
            vectors.extend(chunk.iter().zip(embeddings).map(|(record, values)| VectorRecord {
                id: record.id.clone(),
                values,
                text: record.text.clone(),
            }));
        }

        let namespace = context.namespace();
        let batch_size = context.settings.upsert_batch_size.max(1);
        let mut upserted = 0;
        while !vectors.is_empty() {
            let rest = vectors.split_off(batch_size.min(vectors.len()));
            let batch = std::mem::replace(&mut vectors, rest);
            upserted +=
                context.store.upsert(namespace, batch).await.map_err(PipelineError::store(STAGE))?;
            debug!(
                event_name = "ingestion.upsert_batch",
                correlation_id = %context.run_id,
                namespace,
                upserted,
                "upsert batch written"
            );
        }

        let summary = PersistSummary { namespace: namespace.to_owned(), upserted };
        serde_json::to_string(&summary)
            .map_err(|error| PipelineError::Payload { stage: STAGE, reason: error.to_string() })
    }
}
