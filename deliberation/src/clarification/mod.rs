//! Clarification engine — the turn-based dialogue that precedes a
//! deliberation.
//!
//! An analyst backend asks the user one focused question per round and
//! converges to a structured briefing. The round ceiling is a hard
//! guarantee enforced here, from a value passed per call: once the
//! answer history reaches `max_rounds` the analyst is instructed to
//! brief, and even a question-shaped reply at the ceiling is coerced
//! into a briefing.
//!
//! State machine: `not_started → asking → briefing_ready → confirmed`.
//! The deliberation pipeline must never run while the state is
//! `asking`; callers gate on [`ClarificationState::active`].

pub mod parse;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{DeliberationError, DeliberationResult};
use crate::gateway::{ChatMessage, ModelBackend};
use crate::prompts;

use parse::{
    optional_string_field, parse_analyst_reply, string_field_or, string_list_field, AnalystReply,
};

/// One clarifying question posed to the user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClarificationQuestion {
    pub question: String,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    pub question_number: u32,
}

/// The structured briefing produced at the end of clarification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Briefing {
    pub briefing: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub objective: Option<String>,
    #[serde(default)]
    pub key_facts: Vec<String>,
    #[serde(default)]
    pub constraints: Vec<String>,
    #[serde(default)]
    pub unknowns: Vec<String>,
    #[serde(default)]
    pub assumptions: Vec<String>,
}

/// What the analyst produced for one round.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnalystOutcome {
    Question(ClarificationQuestion),
    Briefing(Briefing),
}

/// Clarification state owned by the conversation record; mutated only
/// through this module and the turn orchestrator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClarificationState {
    pub active: bool,
    #[serde(default)]
    pub history: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_question: Option<ClarificationQuestion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub briefing: Option<Briefing>,
    #[serde(default)]
    pub confirmed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmed_at: Option<DateTime<Utc>>,
}

impl ClarificationState {
    /// Fresh state entering the `asking` phase with its first question.
    pub fn asking(question: ClarificationQuestion) -> Self {
        Self {
            active: true,
            current_question: Some(question),
            ..Self::default()
        }
    }

    /// Record an answer plus the analyst's follow-up, transitioning to
    /// `briefing_ready` when a briefing arrived.
    pub fn record_round(&mut self, answer: String, outcome: &AnalystOutcome) {
        self.history.push(answer);
        match outcome {
            AnalystOutcome::Question(question) => {
                self.current_question = Some(question.clone());
            }
            AnalystOutcome::Briefing(briefing) => {
                self.active = false;
                self.current_question = None;
                self.briefing = Some(briefing.clone());
                self.completed_at = Some(Utc::now());
            }
        }
    }

    /// Explicit user confirmation; gates entry into the council.
    pub fn confirm(&mut self) -> DeliberationResult<()> {
        if self.active {
            return Err(DeliberationError::ClarificationInProgress);
        }
        if self.briefing.is_none() {
            return Err(DeliberationError::NoBriefing);
        }
        self.confirmed = true;
        self.confirmed_at = Some(Utc::now());
        Ok(())
    }
}

/// Drives the analyst dialogue for one conversation.
pub struct ClarificationEngine<'a> {
    backend: &'a dyn ModelBackend,
    analyst_model: &'a str,
    max_rounds: usize,
}

impl<'a> ClarificationEngine<'a> {
    pub fn new(backend: &'a dyn ModelBackend, analyst_model: &'a str, max_rounds: usize) -> Self {
        Self {
            backend,
            analyst_model,
            max_rounds,
        }
    }

    /// Generate the first clarifying question for a fresh query.
    pub async fn start(
        &self,
        user_query: &str,
        context: Option<&str>,
        role: Option<&str>,
    ) -> DeliberationResult<ClarificationQuestion> {
        let prompt = prompts::clarification_prompt(
            user_query,
            context,
            role,
            &[],
            prompts::ClarificationTask::FirstQuestion,
        );
        let text = self.call_analyst(&prompt).await?;

        let question = match parse_analyst_reply(&text) {
            AnalystReply::Structured(value) => ClarificationQuestion {
                question: string_field_or(&value, "question", &text),
                required: value
                    .get("required")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(true),
                rationale: optional_string_field(&value, "rationale"),
                question_number: 1,
            },
            AnalystReply::Raw(raw) => ClarificationQuestion {
                question: raw,
                required: true,
                rationale: None,
                question_number: 1,
            },
        };

        info!(question_number = question.question_number, "clarification started");
        Ok(question)
    }

    /// Process one user answer: either pose the next question or emit a
    /// briefing. Reaching `max_rounds` answers forces the briefing —
    /// a hard ceiling, not a suggestion.
    pub async fn advance(
        &self,
        user_query: &str,
        history: &[String],
        new_answer: &str,
        context: Option<&str>,
        role: Option<&str>,
    ) -> DeliberationResult<AnalystOutcome> {
        let mut updated: Vec<String> = history.to_vec();
        updated.push(new_answer.to_string());
        let must_brief = updated.len() >= self.max_rounds;

        let task = if must_brief {
            prompts::ClarificationTask::ForcedBriefing
        } else {
            prompts::ClarificationTask::NextRound {
                max_rounds: self.max_rounds,
            }
        };
        let prompt = prompts::clarification_prompt(user_query, context, role, &updated, task);
        let text = self.call_analyst(&prompt).await?;

        let outcome = match parse_analyst_reply(&text) {
            AnalystReply::Structured(value) => {
                let is_briefing = value.get("type").and_then(|v| v.as_str()) == Some("briefing");
                if is_briefing || must_brief {
                    AnalystOutcome::Briefing(briefing_from_value(&value, &text))
                } else {
                    AnalystOutcome::Question(ClarificationQuestion {
                        question: string_field_or(&value, "question", &text),
                        required: value
                            .get("required")
                            .and_then(|v| v.as_bool())
                            .unwrap_or(false),
                        rationale: optional_string_field(&value, "rationale"),
                        question_number: updated.len() as u32 + 1,
                    })
                }
            }
            AnalystReply::Raw(raw) => {
                if must_brief {
                    AnalystOutcome::Briefing(Briefing {
                        briefing: raw,
                        objective: None,
                        key_facts: vec![],
                        constraints: vec![],
                        unknowns: vec![],
                        assumptions: vec![],
                    })
                } else {
                    AnalystOutcome::Question(ClarificationQuestion {
                        question: raw,
                        required: false,
                        rationale: None,
                        question_number: updated.len() as u32 + 1,
                    })
                }
            }
        };

        debug!(
            rounds = updated.len(),
            max_rounds = self.max_rounds,
            briefing = matches!(outcome, AnalystOutcome::Briefing(_)),
            "clarification round processed"
        );
        Ok(outcome)
    }

    async fn call_analyst(&self, prompt: &str) -> DeliberationResult<String> {
        let messages = [ChatMessage::user(prompt)];
        let response = self.backend.send(self.analyst_model, &messages).await;
        if !response.succeeded() {
            return Err(DeliberationError::AnalystFailed {
                model: self.analyst_model.to_string(),
            });
        }
        Ok(response.content.unwrap_or_default())
    }
}

fn briefing_from_value(value: &serde_json::Value, raw_text: &str) -> Briefing {
    Briefing {
        briefing: string_field_or(value, "briefing", raw_text),
        objective: optional_string_field(value, "objective"),
        key_facts: string_list_field(value, "key_facts"),
        constraints: string_list_field(value, "constraints"),
        unknowns: string_list_field(value, "unknowns"),
        assumptions: string_list_field(value, "assumptions"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use crate::gateway::ModelResponse;

    /// Backend that replays a fixed script of analyst replies.
    struct ScriptedAnalyst {
        replies: Mutex<VecDeque<String>>,
    }

    impl ScriptedAnalyst {
        fn new(replies: &[&str]) -> Self {
            Self {
                replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            }
        }
    }

    #[async_trait]
    impl ModelBackend for ScriptedAnalyst {
        async fn send(&self, model: &str, _messages: &[ChatMessage]) -> ModelResponse {
            match self.replies.lock().unwrap().pop_front() {
                Some(content) => ModelResponse {
                    model_id: model.to_string(),
                    content: Some(content),
                    reasoning: None,
                    failed: false,
                },
                None => ModelResponse::failed(model),
            }
        }
    }

    #[tokio::test]
    async fn first_question_defaults_to_required() {
        let backend = ScriptedAnalyst::new(&[r#"{"question": "What format?"}"#]);
        let engine = ClarificationEngine::new(&backend, "analyst/model", 5);
        let q = engine.start("Write a doc", None, None).await.unwrap();
        assert_eq!(q.question, "What format?");
        assert!(q.required);
        assert_eq!(q.question_number, 1);
    }

    #[tokio::test]
    async fn prose_reply_becomes_the_question_verbatim() {
        let backend = ScriptedAnalyst::new(&["Who is the audience?"]);
        let engine = ClarificationEngine::new(&backend, "analyst/model", 5);
        let q = engine.start("Write a doc", None, None).await.unwrap();
        assert_eq!(q.question, "Who is the audience?");
    }

    #[tokio::test]
    async fn ceiling_forces_briefing_even_when_analyst_asks_again() {
        // max_rounds=2: round 1 answered already, round 2 answer hits the
        // ceiling. The analyst's reply still requests a question; it is
        // coerced into a briefing.
        let backend = ScriptedAnalyst::new(&[
            r#"{"type": "question", "question": "A third question?", "briefing": "Summary of goals"}"#,
        ]);
        let engine = ClarificationEngine::new(&backend, "analyst/model", 2);
        let history = vec!["markdown".to_string()];
        let outcome = engine
            .advance("Write a doc", &history, "developers", None, None)
            .await
            .unwrap();
        match outcome {
            AnalystOutcome::Briefing(b) => assert_eq!(b.briefing, "Summary of goals"),
            AnalystOutcome::Question(_) => panic!("round ceiling must force a briefing"),
        }
    }

    #[tokio::test]
    async fn voluntary_briefing_ends_the_dialogue() {
        let backend = ScriptedAnalyst::new(&[
            r#"```json
{"type": "briefing", "briefing": "All clear", "key_facts": ["markdown output"], "constraints": [], "unknowns": ["deadline"], "assumptions": []}
```"#,
        ]);
        let engine = ClarificationEngine::new(&backend, "analyst/model", 5);
        let outcome = engine
            .advance("Write a doc", &[], "markdown", None, None)
            .await
            .unwrap();
        match outcome {
            AnalystOutcome::Briefing(b) => {
                assert_eq!(b.briefing, "All clear");
                assert_eq!(b.key_facts, vec!["markdown output"]);
                assert_eq!(b.unknowns, vec!["deadline"]);
            }
            AnalystOutcome::Question(_) => panic!("analyst signalled a briefing"),
        }
    }

    #[tokio::test]
    async fn raw_text_at_ceiling_becomes_briefing_body() {
        let backend = ScriptedAnalyst::new(&["Here is everything we know so far."]);
        let engine = ClarificationEngine::new(&backend, "analyst/model", 1);
        let outcome = engine
            .advance("Write a doc", &[], "markdown", None, None)
            .await
            .unwrap();
        match outcome {
            AnalystOutcome::Briefing(b) => {
                assert_eq!(b.briefing, "Here is everything we know so far.");
                assert!(b.key_facts.is_empty());
            }
            AnalystOutcome::Question(_) => panic!("ceiling of 1 forces a briefing"),
        }
    }

    #[tokio::test]
    async fn analyst_call_failure_is_terminal() {
        let backend = ScriptedAnalyst::new(&[]);
        let engine = ClarificationEngine::new(&backend, "analyst/model", 5);
        let err = engine.start("Write a doc", None, None).await.unwrap_err();
        assert!(matches!(err, DeliberationError::AnalystFailed { .. }));
    }

    #[test]
    fn state_machine_transitions() {
        let question = ClarificationQuestion {
            question: "What format?".into(),
            required: true,
            rationale: None,
            question_number: 1,
        };
        let mut state = ClarificationState::asking(question);
        assert!(state.active);
        assert!(state.confirm().is_err());

        let briefing = Briefing {
            briefing: "done".into(),
            objective: None,
            key_facts: vec![],
            constraints: vec![],
            unknowns: vec![],
            assumptions: vec![],
        };
        state.record_round("markdown".into(), &AnalystOutcome::Briefing(briefing));
        assert!(!state.active);
        assert!(state.current_question.is_none());
        assert_eq!(state.history, vec!["markdown"]);

        state.confirm().unwrap();
        assert!(state.confirmed);
        assert!(state.confirmed_at.is_some());
    }

    #[test]
    fn confirm_without_briefing_is_rejected() {
        let mut state = ClarificationState {
            active: false,
            ..Default::default()
        };
        let err = state.confirm().unwrap_err();
        assert!(matches!(err, DeliberationError::NoBriefing));
    }

    #[test]
    fn outcome_serializes_with_type_tag() {
        let outcome = AnalystOutcome::Question(ClarificationQuestion {
            question: "q".into(),
            required: false,
            rationale: None,
            question_number: 2,
        });
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["type"], "question");
        assert_eq!(json["question_number"], 2);
    }
}
