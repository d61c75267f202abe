use std::sync::Arc;

use anyhow::{anyhow, Result};
use docgenie_core::audit::{
    AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink, NoopAuditSink,
};
use docgenie_core::domain::message::{ConversationState, Message, OriginTag};
use docgenie_core::routing::{
    Capability, DispatchEvent, DispatchState, RouteDecision, RoutingState, RoutingSupervisor,
    MAX_DECISIONS,
};
use tracing::{info, warn};
use uuid::Uuid;

use crate::capability::AnswerCapability;
use crate::classifier::RouteClassifier;
use crate::guardrails::{AccessDecision, AccessPolicy, PermissionScope};

/// Drives one conversation per `answer` call. Holds no per-conversation
/// state, so a single instance can be shared across concurrent requests.
pub struct ConversationOrchestrator {
    supervisor: RoutingSupervisor,
    access: AccessPolicy,
    classifier: Arc<dyn RouteClassifier>,
    context: Arc<dyn AnswerCapability>,
    gen: Arc<dyn AnswerCapability>,
    audit: Arc<dyn AuditSink>,
}

impl ConversationOrchestrator {
    pub fn new(
        classifier: Arc<dyn RouteClassifier>,
        context: Arc<dyn AnswerCapability>,
        gen: Arc<dyn AnswerCapability>,
    ) -> Self {
        Self {
            supervisor: RoutingSupervisor::new(),
            access: AccessPolicy,
            classifier,
            context,
            gen,
            audit: Arc::new(NoopAuditSink),
        }
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    /// Returns the last `context`/`gen` output, or `None` when access is
    /// denied or no capability produced anything.
    pub async fn answer(
        &self,
        query: &str,
        permissions: &PermissionScope,
    ) -> Result<Option<String>> {
        let conversation_id = Uuid::new_v4().to_string();
        let audit = AuditContext::new(
            Some(conversation_id.clone()),
            conversation_id.clone(),
            "conversation-orchestrator",
        );

        if let AccessDecision::Deny { reason_code, .. } = self.access.evaluate(permissions) {
            info!(
                event_name = "conversation.access_denied",
                correlation_id = %conversation_id,
                reason_code,
                "conversation refused before routing"
            );
            self.emit(&audit, "conversation.access_denied", AuditOutcome::Rejected, reason_code);
            return Ok(None);
        }

        info!(
            event_name = "conversation.started",
            correlation_id = %conversation_id,
            permissions = permissions.len(),
            "conversation started"
        );

        let mut conversation = ConversationState::seeded([
            Message::user(query),
            Message::user(permissions.to_message()),
        ]);
        let mut routing = RoutingState::new();
        let mut node = self.supervisor.initial_state();
        let mut decisions = 0usize;

        while node != DispatchState::Terminate {
            if decisions >= MAX_DECISIONS {
                return Err(anyhow!("routing exceeded {MAX_DECISIONS} decisions"));
            }
            decisions += 1;

            let proposal = self.classifier.classify(&conversation).await?;
            let decision = self.supervisor.decide_with_audit(
                &mut routing,
                proposal,
                self.audit.as_ref(),
                &audit,
            );
            node = self.supervisor.transition(node, DispatchEvent::Decided(decision))?;

            if let RouteDecision::Dispatch(capability) = decision {
                let content =
                    self.capability(capability).answer(&conversation, permissions).await?;
                conversation.push(Message::tagged(OriginTag::from(capability), content));
                node = self.supervisor.transition(node, DispatchEvent::CapabilityCompleted)?;
            }
        }

        let answer = conversation
            .last_from(&[OriginTag::Context, OriginTag::Gen])
            .map(|message| message.content.clone());

        if answer.is_none() {
            warn!(
                event_name = "conversation.no_answer",
                correlation_id = %conversation_id,
                "conversation terminated without capability output"
            );
        }
        info!(
            event_name = "conversation.completed",
            correlation_id = %conversation_id,
            decisions,
            context_count = routing.context_count(),
            gen_count = routing.gen_count(),
            "conversation completed"
        );
        self.emit(&audit, "conversation.completed", AuditOutcome::Success, "terminated");

        Ok(answer)
    }

    fn capability(&self, capability: Capability) -> &dyn AnswerCapability {
        match capability {
            Capability::Context => self.context.as_ref(),
            Capability::Gen => self.gen.as_ref(),
        }
    }

    fn emit(&self, audit: &AuditContext, event_type: &str, outcome: AuditOutcome, detail: &str) {
        self.audit.emit(
            AuditEvent::new(
                audit.subject.clone(),
                audit.correlation_id.clone(),
                event_type,
                AuditCategory::Conversation,
                audit.actor.clone(),
                outcome,
            )
            .with_metadata("detail", detail),
        );
    }
}
