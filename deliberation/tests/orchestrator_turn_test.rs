//! Turn orchestration integration tests — event ordering, persistence,
//! and clarification-first gating over a scripted backend and a
//! temporary conversation archive.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use deliberation::clarification::AnalystOutcome;
use deliberation::gateway::{ChatMessage, ModelBackend, ModelResponse};
use deliberation::storage::{ConversationStore, Message};
use deliberation::{
    CouncilConfig, DeliberationEvent, ModelSelection, SelectionStrategy, TurnOrchestrator,
};

const M1: &str = "openai/gpt-4o";
const M2: &str = "anthropic/claude-3.5-sonnet";
const M3: &str = "google/gemini-1.5-pro";
const CHAIRMAN: &str = "chair/model";
const ANALYST: &str = "analyst/model";

/// Scripted backend that also records every call for prompt assertions.
struct ScriptedBackend {
    replies: Mutex<HashMap<String, VecDeque<Option<String>>>>,
    calls: Mutex<Vec<(String, Vec<ChatMessage>)>>,
}

impl ScriptedBackend {
    fn new() -> Self {
        Self {
            replies: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn script(&self, model: &str, replies: &[Option<&str>]) {
        self.replies.lock().unwrap().insert(
            model.to_string(),
            replies.iter().map(|r| r.map(str::to_string)).collect(),
        );
    }

    fn calls_for(&self, model: &str) -> Vec<Vec<ChatMessage>> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, _)| m == model)
            .map(|(_, messages)| messages.clone())
            .collect()
    }
}

#[async_trait]
impl ModelBackend for ScriptedBackend {
    async fn send(&self, model: &str, messages: &[ChatMessage]) -> ModelResponse {
        self.calls
            .lock()
            .unwrap()
            .push((model.to_string(), messages.to_vec()));
        let reply = self
            .replies
            .lock()
            .unwrap()
            .get_mut(model)
            .and_then(|queue| queue.pop_front())
            .flatten();
        match reply {
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

fn config(clarification_enabled: bool, max_rounds: usize) -> CouncilConfig {
    CouncilConfig {
        api_key: "test-key".into(),
        council_models: vec![M1.into(), M2.into(), M3.into()],
        chairman_model: CHAIRMAN.into(),
        analyst_model: ANALYST.into(),
        clarification_first_enabled: clarification_enabled,
        max_clarification_rounds: max_rounds,
    }
}

fn harness(
    clarification_enabled: bool,
    max_rounds: usize,
) -> (TempDir, Arc<ScriptedBackend>, TurnOrchestrator) {
    let dir = TempDir::new().unwrap();
    let backend = Arc::new(ScriptedBackend::new());
    let store = ConversationStore::new(dir.path());
    let orchestrator = TurnOrchestrator::new(
        backend.clone(),
        store,
        config(clarification_enabled, max_rounds),
    );
    (dir, backend, orchestrator)
}

fn script_full_council(backend: &ScriptedBackend) {
    backend.script(M1, &[Some("alpha"), Some(r#"{"ranking": ["Response B", "Response A", "Response C"]}"#)]);
    backend.script(M2, &[Some("beta"), Some(r#"{"ranking": ["Response A", "Response B", "Response C"]}"#)]);
    backend.script(M3, &[Some("gamma"), Some(r#"{"ranking": ["Response B", "Response C", "Response A"]}"#)]);
    backend.script(CHAIRMAN, &[Some("the final verdict"), Some("Council Verdict")]);
}

#[tokio::test]
async fn first_turn_emits_the_full_event_sequence() {
    let (_dir, backend, orchestrator) = harness(false, 5);
    script_full_council(&backend);

    let conversation = orchestrator.conversations().create(None, None).unwrap();
    let events = orchestrator
        .run_turn(&conversation.id, "What city should we pick?")
        .await
        .unwrap();

    assert_eq!(events.len(), 8);
    assert!(matches!(events[0], DeliberationEvent::Stage1Start));
    assert!(matches!(events[1], DeliberationEvent::Stage1Complete { .. }));
    assert!(matches!(events[2], DeliberationEvent::Stage2Start));
    assert!(matches!(events[3], DeliberationEvent::Stage2Complete { .. }));
    assert!(matches!(events[4], DeliberationEvent::Stage3Start));
    assert!(matches!(events[5], DeliberationEvent::Stage3Complete { .. }));
    assert!(matches!(events[6], DeliberationEvent::TitleComplete { .. }));
    assert!(matches!(events[7], DeliberationEvent::Complete));

    let DeliberationEvent::Stage3Complete { data } = &events[5] else {
        panic!("expected stage3 completion");
    };
    assert_eq!(data.response, "the final verdict");
    assert_eq!(data.model_id, CHAIRMAN);
}

#[tokio::test]
async fn completed_turn_is_persisted_with_its_title() {
    let (_dir, backend, orchestrator) = harness(false, 5);
    script_full_council(&backend);

    let conversation = orchestrator.conversations().create(None, None).unwrap();
    orchestrator
        .run_turn(&conversation.id, "What city should we pick?")
        .await
        .unwrap();

    let stored = orchestrator.conversations().get(&conversation.id).unwrap();
    assert_eq!(stored.title, "Council Verdict");
    assert_eq!(stored.messages.len(), 2);
    match &stored.messages[1] {
        Message::Assistant { stage1, stage2, stage3 } => {
            assert_eq!(stage1.len(), 3);
            assert_eq!(stage2.len(), 3);
            assert_eq!(stage3.response, "the final verdict");
        }
        Message::User { .. } => panic!("expected assistant turn"),
    }
}

#[tokio::test]
async fn persisted_model_selection_overrides_the_configured_council() {
    let (_dir, backend, orchestrator) = harness(false, 5);
    let picked = [
        "mistralai/mistral-large",
        "deepseek/deepseek-chat",
        "qwen/qwen-max",
    ];
    for model in picked {
        backend.script(
            model,
            &[
                Some("an answer"),
                Some(r#"{"ranking": ["Response A", "Response B", "Response C"]}"#),
            ],
        );
    }
    backend.script(CHAIRMAN, &[Some("verdict"), Some("Title")]);

    let conversation = orchestrator.conversations().create(None, None).unwrap();
    orchestrator
        .conversations()
        .set_model_selection(
            &conversation.id,
            ModelSelection {
                strategy: SelectionStrategy::Cheapest,
                models: picked.iter().map(|m| m.to_string()).collect(),
                rationales: BTreeMap::new(),
            },
        )
        .unwrap();

    let events = orchestrator
        .run_turn(&conversation.id, "question")
        .await
        .unwrap();
    assert!(matches!(events.last(), Some(DeliberationEvent::Complete)));

    let DeliberationEvent::Stage1Complete { data } = &events[1] else {
        panic!("expected stage1 completion");
    };
    let ids: Vec<&str> = data.iter().map(|r| r.model_id.as_str()).collect();
    assert_eq!(ids, picked);

    // The configured council members were never called.
    assert!(backend.calls_for(M1).is_empty());
    assert!(backend.calls_for(M2).is_empty());
    assert!(backend.calls_for(M3).is_empty());
}

#[tokio::test]
async fn chairman_failure_surfaces_as_a_terminal_error_event() {
    let (_dir, backend, orchestrator) = harness(false, 5);
    backend.script(M1, &[Some("alpha"), Some(r#"{"ranking": ["Response A"]}"#)]);
    // Chairman unscripted: stage 3 fails.

    let conversation = orchestrator.conversations().create(None, None).unwrap();
    let events = orchestrator
        .run_turn(&conversation.id, "question")
        .await
        .unwrap();

    let last = events.last().unwrap();
    assert!(matches!(last, DeliberationEvent::Error { .. }));
    assert!(last.is_terminal());

    // Nothing durable was written for the failed deliberation.
    let stored = orchestrator.conversations().get(&conversation.id).unwrap();
    assert_eq!(stored.messages.len(), 1);
}

#[tokio::test]
async fn clarification_auto_starts_on_the_first_message() {
    let (_dir, backend, orchestrator) = harness(true, 5);
    backend.script(
        ANALYST,
        &[Some(r#"{"type": "question", "question": "Which city?", "required": true, "rationale": "scope"}"#)],
    );

    let conversation = orchestrator.conversations().create(None, None).unwrap();
    let events = orchestrator
        .run_turn(&conversation.id, "help me relocate")
        .await
        .unwrap();

    assert_eq!(events.len(), 3);
    assert!(matches!(events[0], DeliberationEvent::ClarificationAutoStart));
    let DeliberationEvent::ClarificationQuestion { data } = &events[1] else {
        panic!("expected a clarification question");
    };
    assert_eq!(data.question, "Which city?");
    assert_eq!(data.question_number, 1);
    assert!(matches!(events[2], DeliberationEvent::Complete));

    let stored = orchestrator.conversations().get(&conversation.id).unwrap();
    let state = stored.clarification_state.unwrap();
    assert!(state.active);
    assert!(state.history.is_empty());
}

#[tokio::test]
async fn turns_are_rejected_while_clarification_is_active() {
    let (_dir, backend, orchestrator) = harness(true, 5);
    backend.script(
        ANALYST,
        &[Some(r#"{"type": "question", "question": "Which city?"}"#)],
    );

    let conversation = orchestrator.conversations().create(None, None).unwrap();
    orchestrator
        .run_turn(&conversation.id, "help me relocate")
        .await
        .unwrap();

    let events = orchestrator
        .run_turn(&conversation.id, "another message")
        .await
        .unwrap();
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], DeliberationEvent::Error { .. }));
}

#[tokio::test]
async fn round_ceiling_forces_a_briefing() {
    let (_dir, backend, orchestrator) = harness(true, 2);
    backend.script(
        ANALYST,
        &[
            Some(r#"{"type": "question", "question": "Which city?"}"#),
            Some(r#"{"type": "question", "question": "When?"}"#),
            Some(r#"{"type": "briefing", "briefing": "Move to Lisbon in June", "objective": "relocate", "key_facts": ["June"], "constraints": [], "unknowns": [], "assumptions": []}"#),
        ],
    );

    let conversation = orchestrator.conversations().create(None, None).unwrap();
    orchestrator
        .run_turn(&conversation.id, "help me relocate")
        .await
        .unwrap();

    let first = orchestrator
        .submit_answer(&conversation.id, "Lisbon")
        .await
        .unwrap();
    assert!(matches!(first, AnalystOutcome::Question(_)));

    let second = orchestrator
        .submit_answer(&conversation.id, "June")
        .await
        .unwrap();
    let AnalystOutcome::Briefing(briefing) = second else {
        panic!("round ceiling must end in a briefing");
    };
    assert_eq!(briefing.briefing, "Move to Lisbon in June");

    let stored = orchestrator.conversations().get(&conversation.id).unwrap();
    let state = stored.clarification_state.unwrap();
    assert!(!state.active);
    assert_eq!(state.history, vec!["Lisbon", "June"]);
    assert!(state.briefing.is_some());
    assert!(state.completed_at.is_some());
}

#[tokio::test]
async fn confirmed_briefing_rides_into_the_council_as_context() {
    let (_dir, backend, orchestrator) = harness(true, 2);
    backend.script(
        ANALYST,
        &[
            Some(r#"{"type": "question", "question": "Which city?"}"#),
            Some(r#"{"type": "briefing", "briefing": "Move to Lisbon in June", "objective": "relocate", "key_facts": [], "constraints": [], "unknowns": [], "assumptions": []}"#),
        ],
    );
    script_full_council(&backend);

    let conversation = orchestrator.conversations().create(None, None).unwrap();
    orchestrator
        .run_turn(&conversation.id, "help me relocate")
        .await
        .unwrap();
    // The analyst may brief before the ceiling; here it briefs on the
    // first answer.
    let outcome = orchestrator
        .submit_answer(&conversation.id, "Lisbon")
        .await
        .unwrap();
    assert!(matches!(outcome, AnalystOutcome::Briefing(_)));

    let events = orchestrator.confirm_briefing(&conversation.id).await.unwrap();
    assert!(matches!(events.last(), Some(DeliberationEvent::Complete)));
    assert!(events
        .iter()
        .any(|e| matches!(e, DeliberationEvent::Stage3Complete { .. })));

    // Every council member saw the briefing as system context.
    let stage1_calls = backend.calls_for(M1);
    let first_call = &stage1_calls[0];
    assert_eq!(first_call[0].role, "system");
    assert!(first_call[0]
        .content
        .contains("[CLARIFICATION BRIEFING]\n\nMove to Lisbon in June"));

    // The deliberation was persisted against the original query.
    let stored = orchestrator.conversations().get(&conversation.id).unwrap();
    assert_eq!(stored.messages.len(), 2);
    let state = stored.clarification_state.unwrap();
    assert!(state.confirmed);
    assert!(state.confirmed_at.is_some());
}

#[tokio::test]
async fn second_turn_replays_history_without_a_title_event() {
    let (_dir, backend, orchestrator) = harness(false, 5);
    script_full_council(&backend);

    let conversation = orchestrator.conversations().create(None, None).unwrap();
    orchestrator
        .run_turn(&conversation.id, "first question")
        .await
        .unwrap();

    // Rescript for the second turn; chairman gets no title call.
    script_full_council(&backend);
    backend.script(CHAIRMAN, &[Some("second verdict")]);
    let events = orchestrator
        .run_turn(&conversation.id, "follow-up question")
        .await
        .unwrap();

    assert!(!events
        .iter()
        .any(|e| matches!(e, DeliberationEvent::TitleComplete { .. })));
    assert!(matches!(events.last(), Some(DeliberationEvent::Complete)));

    // Stage-1 calls for the second turn carry the prior exchange.
    // M1's call log: turn-1 generation, turn-1 judging, turn-2
    // generation, turn-2 judging.
    let calls = backend.calls_for(M1);
    let second_turn_messages = &calls[2];
    let roles: Vec<&str> = second_turn_messages.iter().map(|m| m.role.as_str()).collect();
    assert_eq!(roles, vec!["user", "assistant", "user"]);
    assert_eq!(second_turn_messages[1].content, "the final verdict");
    assert_eq!(second_turn_messages[2].content, "follow-up question");
}

#[tokio::test]
async fn explicit_clarification_start_requires_the_feature_flag() {
    let (_dir, _backend, orchestrator) = harness(false, 5);
    let conversation = orchestrator.conversations().create(None, None).unwrap();
    orchestrator
        .conversations()
        .add_user_message(&conversation.id, "question")
        .unwrap();

    let err = orchestrator
        .start_clarification(&conversation.id)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        deliberation::DeliberationError::ClarificationDisabled
    ));
}
