use async_trait::async_trait;
use docgenie_core::domain::message::{ConversationState, OriginTag};

use super::{IngestionStage, PipelineError, StageContext};

/// Pulls raw content through the connector. The emitted `query` message is the
/// serialized [`Extracted`](crate::connectors::Extracted): content grouped by
/// the endpoint or table it came from.
pub struct ExtractStage;

#[async_trait]
impl IngestionStage for ExtractStage {
    fn origin(&self) -> OriginTag {
        OriginTag::Query
    }

    async fn run(
        &self,
        context: &StageContext<'_>,
        _conversation: &ConversationState,
    ) -> Result<String, PipelineError> {
        let extracted = context.connector.extract(context.source).await?;
        serde_json::to_string(&extracted)
            .map_err(|error| PipelineError::Payload { stage: "query", reason: error.to_string() })
    }
}
