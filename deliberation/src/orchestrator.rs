//! Turn orchestration: the single entry point that wires clarification
//! gating, the three council stages, title generation, and persistence
//! into one deliberation turn.
//!
//! A turn reports progress as an ordered [`DeliberationEvent`] list
//! that always terminates with `complete` or `error`. The conversation
//! record is only appended to once all three stages have settled.

use std::sync::Arc;

use tracing::{error, info};

use crate::clarification::{AnalystOutcome, ClarificationEngine, ClarificationQuestion, ClarificationState};
use crate::config::CouncilConfig;
use crate::council;
use crate::error::{DeliberationError, DeliberationResult};
use crate::events::{DeliberationEvent, Stage2Metadata};
use crate::gateway::{ChatMessage, ModelBackend};
use crate::storage::{Conversation, ConversationStore};
use crate::title;

pub struct TurnOrchestrator {
    backend: Arc<dyn ModelBackend>,
    conversations: ConversationStore,
    config: CouncilConfig,
}

impl TurnOrchestrator {
    pub fn new(
        backend: Arc<dyn ModelBackend>,
        conversations: ConversationStore,
        config: CouncilConfig,
    ) -> Self {
        Self {
            backend,
            conversations,
            config,
        }
    }

    pub fn conversations(&self) -> &ConversationStore {
        &self.conversations
    }

    /// Run one full turn for `content`. Returns the ordered event
    /// sequence; pipeline failures after the turn has started surface
    /// as a terminal `error` event rather than an `Err`, so the caller
    /// can always forward the stream as-is.
    pub async fn run_turn(
        &self,
        conversation_id: &str,
        content: &str,
    ) -> DeliberationResult<Vec<DeliberationEvent>> {
        let conversation = self.conversations.get(conversation_id)?;
        let is_first = conversation.first_user_message().is_none();
        let history = conversation.chat_history();

        let conversation = self.conversations.add_user_message(conversation_id, content)?;

        let mut events = Vec::new();

        // Clarification-first gating. The first message of a
        // conversation auto-starts the dialogue; the council does not
        // run until the briefing is confirmed.
        if self.config.clarification_first_enabled
            && is_first
            && conversation.clarification_state.is_none()
        {
            events.push(DeliberationEvent::ClarificationAutoStart);
            let engine = self.engine();
            match engine
                .start(
                    content,
                    conversation.context_content(),
                    conversation.role_description(),
                )
                .await
            {
                Ok(question) => {
                    self.conversations
                        .set_clarification_state(conversation_id, ClarificationState::asking(question.clone()))?;
                    events.push(DeliberationEvent::ClarificationQuestion { data: question });
                    events.push(DeliberationEvent::Complete);
                }
                Err(e) => {
                    error!(error = %e, "failed to start clarification");
                    events.push(DeliberationEvent::Error {
                        message: "Failed to start clarification".to_string(),
                    });
                }
            }
            return Ok(events);
        }

        if clarification_active(&conversation) {
            events.push(DeliberationEvent::Error {
                message: DeliberationError::ClarificationInProgress.to_string(),
            });
            return Ok(events);
        }

        let context = effective_context(&conversation);
        let deliberation = self
            .deliberate(
                &conversation,
                content,
                &history,
                context.as_deref(),
                is_first,
                &mut events,
            )
            .await;
        if let Err(e) = deliberation {
            error!(error = %e, conversation = conversation_id, "deliberation failed");
            events.push(DeliberationEvent::Error {
                message: e.to_string(),
            });
        }
        Ok(events)
    }

    /// Start clarification explicitly for a conversation that already
    /// holds its first user message.
    pub async fn start_clarification(
        &self,
        conversation_id: &str,
    ) -> DeliberationResult<ClarificationQuestion> {
        if !self.config.clarification_first_enabled {
            return Err(DeliberationError::ClarificationDisabled);
        }
        let conversation = self.conversations.get(conversation_id)?;
        let user_query = conversation
            .first_user_message()
            .ok_or(DeliberationError::ClarificationNotActive)?
            .to_string();

        let engine = self.engine();
        let question = engine
            .start(
                &user_query,
                conversation.context_content(),
                conversation.role_description(),
            )
            .await?;

        if conversation.clarification_state.is_none() {
            self.conversations
                .set_clarification_state(conversation_id, ClarificationState::asking(question.clone()))?;
        }
        Ok(question)
    }

    /// Submit one answer to the active clarification dialogue. Returns
    /// the next question or the briefing; the round ceiling is enforced
    /// by the engine.
    pub async fn submit_answer(
        &self,
        conversation_id: &str,
        answer: &str,
    ) -> DeliberationResult<AnalystOutcome> {
        let conversation = self.conversations.get(conversation_id)?;
        let mut state = conversation
            .clarification_state
            .clone()
            .filter(|s| s.active)
            .ok_or(DeliberationError::ClarificationNotActive)?;
        let user_query = conversation
            .first_user_message()
            .ok_or(DeliberationError::ClarificationNotActive)?
            .to_string();

        let engine = self.engine();
        let outcome = engine
            .advance(
                &user_query,
                &state.history,
                answer,
                conversation.context_content(),
                conversation.role_description(),
            )
            .await?;

        state.record_round(answer.to_string(), &outcome);
        self.conversations
            .set_clarification_state(conversation_id, state)?;
        Ok(outcome)
    }

    /// Confirm the briefing and run the council over the enriched
    /// context. The original query is re-asked; the briefing rides in
    /// as context, not as history.
    pub async fn confirm_briefing(
        &self,
        conversation_id: &str,
    ) -> DeliberationResult<Vec<DeliberationEvent>> {
        let conversation = self.conversations.get(conversation_id)?;
        let mut state = conversation
            .clarification_state
            .clone()
            .ok_or(DeliberationError::ClarificationNotActive)?;
        state.confirm()?;
        self.conversations
            .set_clarification_state(conversation_id, state)?;

        let conversation = self.conversations.get(conversation_id)?;
        let user_query = conversation
            .first_user_message()
            .ok_or(DeliberationError::ClarificationNotActive)?
            .to_string();
        let context = effective_context(&conversation);

        let mut events = Vec::new();
        let deliberation = self
            .deliberate(
                &conversation,
                &user_query,
                &[],
                context.as_deref(),
                true,
                &mut events,
            )
            .await;
        if let Err(e) = deliberation {
            error!(error = %e, conversation = conversation_id, "deliberation failed");
            events.push(DeliberationEvent::Error {
                message: e.to_string(),
            });
        }
        Ok(events)
    }

    /// The three stages plus title generation and the single durable
    /// write at the end.
    async fn deliberate(
        &self,
        conversation: &Conversation,
        user_query: &str,
        history: &[ChatMessage],
        context: Option<&str>,
        is_first: bool,
        events: &mut Vec<DeliberationEvent>,
    ) -> DeliberationResult<()> {
        let role = conversation.role_description();
        let participants = self.participants(conversation);
        info!(
            conversation = %conversation.id,
            participants = participants.len(),
            "deliberation starting"
        );

        events.push(DeliberationEvent::Stage1Start);
        let stage1 = council::stage1_collect(
            self.backend.as_ref(),
            &participants,
            user_query,
            history,
            context,
            role,
        )
        .await;
        events.push(DeliberationEvent::Stage1Complete {
            data: stage1.clone(),
        });

        events.push(DeliberationEvent::Stage2Start);
        let (rankings, label_map) =
            council::stage2_rank(self.backend.as_ref(), user_query, &stage1).await;
        let aggregate = council::aggregate_rankings(&rankings, &label_map, &stage1);
        events.push(DeliberationEvent::Stage2Complete {
            data: rankings.clone(),
            metadata: Stage2Metadata {
                label_to_model: label_map,
                aggregate_rankings: aggregate.clone(),
            },
        });

        events.push(DeliberationEvent::Stage3Start);
        let stage3 = council::stage3_synthesize(
            self.backend.as_ref(),
            &self.config.chairman_model,
            user_query,
            &stage1,
            &rankings,
            &aggregate,
            context,
            role,
        )
        .await?;
        events.push(DeliberationEvent::Stage3Complete {
            data: stage3.clone(),
        });

        if is_first {
            if let Some(title) = title::generate_title(
                self.backend.as_ref(),
                &self.config.chairman_model,
                user_query,
            )
            .await
            {
                self.conversations.update_title(&conversation.id, &title)?;
                events.push(DeliberationEvent::TitleComplete { title });
            }
        }

        self.conversations
            .add_assistant_message(&conversation.id, stage1, rankings, stage3)?;
        events.push(DeliberationEvent::Complete);
        Ok(())
    }

    fn participants(&self, conversation: &Conversation) -> Vec<String> {
        conversation
            .model_selection
            .as_ref()
            .filter(|s| !s.models.is_empty())
            .map(|s| s.models.clone())
            .unwrap_or_else(|| self.config.council_models.clone())
    }

    fn engine(&self) -> ClarificationEngine<'_> {
        ClarificationEngine::new(
            self.backend.as_ref(),
            &self.config.analyst_model,
            self.config.max_clarification_rounds,
        )
    }
}

fn clarification_active(conversation: &Conversation) -> bool {
    conversation
        .clarification_state
        .as_ref()
        .is_some_and(|s| s.active)
}

/// Context seen by the council: the confirmed briefing, when present,
/// is prepended to the conversation's pinned context.
fn effective_context(conversation: &Conversation) -> Option<String> {
    let context = conversation.context_content();
    let briefing = conversation
        .clarification_state
        .as_ref()
        .filter(|s| s.confirmed)
        .and_then(|s| s.briefing.as_ref());

    match (briefing, context) {
        (Some(briefing), Some(context)) => Some(format!(
            "[CLARIFICATION BRIEFING]\n\n{}\n\n[ORIGINAL CONTEXT]\n\n{}",
            briefing.briefing, context
        )),
        (Some(briefing), None) => {
            Some(format!("[CLARIFICATION BRIEFING]\n\n{}\n\n", briefing.briefing))
        }
        (None, context) => context.map(str::to_string),
    }
}
