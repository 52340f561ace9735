//! Durable conversation records.
//!
//! The conversation is the sole durable owner of deliberation output:
//! an assistant turn is written only once all three stages exist, so
//! the archive never holds a partially recorded deliberation.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::clarification::ClarificationState;
use crate::council::{Ranking, SynthesisResult};
use crate::error::{DeliberationError, DeliberationResult};
use crate::gateway::{ChatMessage, ModelResponse};
use crate::selector::ModelSelection;

use super::{read_json, write_json};

const PLACEHOLDER_TITLE: &str = "New conversation";

/// Context captured at conversation creation time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContextSnapshot {
    pub id: String,
    pub name: String,
    pub content: String,
}

/// Role captured at conversation creation time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoleSnapshot {
    pub id: String,
    pub name: String,
    pub description: String,
}

/// One turn in a conversation. Assistant turns carry all three stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    User {
        content: String,
    },
    Assistant {
        stage1: Vec<ModelResponse>,
        stage2: Vec<Ranking>,
        stage3: SynthesisResult,
    },
}

/// A full conversation record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub title: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_snapshot: Option<ContextSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_snapshot: Option<RoleSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_selection: Option<ModelSelection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clarification_state: Option<ClarificationState>,
}

impl Conversation {
    /// First user message, if any — the query clarification refines.
    pub fn first_user_message(&self) -> Option<&str> {
        self.messages.iter().find_map(|m| match m {
            Message::User { content } => Some(content.as_str()),
            Message::Assistant { .. } => None,
        })
    }

    /// Chat history for the next turn. Assistant turns contribute the
    /// chairman's synthesized answer only, to keep context manageable.
    pub fn chat_history(&self) -> Vec<ChatMessage> {
        self.messages
            .iter()
            .map(|m| match m {
                Message::User { content } => ChatMessage::user(content.clone()),
                Message::Assistant { stage3, .. } => ChatMessage::assistant(stage3.response.clone()),
            })
            .collect()
    }

    pub fn context_content(&self) -> Option<&str> {
        self.context_snapshot.as_ref().map(|c| c.content.as_str())
    }

    pub fn role_description(&self) -> Option<&str> {
        self.role_snapshot.as_ref().map(|r| r.description.as_str())
    }
}

/// Listing entry: metadata only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub title: String,
    pub message_count: usize,
}

/// Flat-JSON conversation archive, one file per conversation.
pub struct ConversationStore {
    dir: PathBuf,
}

impl ConversationStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    pub fn create(
        &self,
        context_snapshot: Option<ContextSnapshot>,
        role_snapshot: Option<RoleSnapshot>,
    ) -> DeliberationResult<Conversation> {
        let conversation = Conversation {
            id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            title: PLACEHOLDER_TITLE.to_string(),
            messages: Vec::new(),
            context_snapshot,
            role_snapshot,
            model_selection: None,
            clarification_state: None,
        };
        self.save(&conversation)?;
        debug!(id = %conversation.id, "conversation created");
        Ok(conversation)
    }

    pub fn get(&self, id: &str) -> DeliberationResult<Conversation> {
        read_json(&self.path_for(id))?
            .ok_or_else(|| DeliberationError::ConversationNotFound(id.to_string()))
    }

    pub fn save(&self, conversation: &Conversation) -> DeliberationResult<()> {
        write_json(&self.path_for(&conversation.id), conversation)
    }

    pub fn delete(&self, id: &str) -> DeliberationResult<bool> {
        let path = self.path_for(id);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(path)?;
        Ok(true)
    }

    /// List all conversations, most recently updated first. Records
    /// still carrying the placeholder title get a fallback derived from
    /// their first user line — a presentation concern that lives here,
    /// outside the pipeline contract.
    pub fn list(&self) -> DeliberationResult<Vec<ConversationSummary>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut summaries = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(conversation) = read_json::<Conversation>(&path)? else {
                continue;
            };
            summaries.push(ConversationSummary {
                updated_at: modified_at(&path).unwrap_or(conversation.created_at),
                title: display_title(&conversation),
                message_count: conversation.messages.len(),
                id: conversation.id,
                created_at: conversation.created_at,
            });
        }

        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }

    pub fn add_user_message(&self, id: &str, content: &str) -> DeliberationResult<Conversation> {
        let mut conversation = self.get(id)?;
        conversation.messages.push(Message::User {
            content: content.to_string(),
        });
        self.save(&conversation)?;
        Ok(conversation)
    }

    /// Record a completed deliberation. All three stages or nothing.
    pub fn add_assistant_message(
        &self,
        id: &str,
        stage1: Vec<ModelResponse>,
        stage2: Vec<Ranking>,
        stage3: SynthesisResult,
    ) -> DeliberationResult<()> {
        let mut conversation = self.get(id)?;
        conversation.messages.push(Message::Assistant {
            stage1,
            stage2,
            stage3,
        });
        self.save(&conversation)
    }

    pub fn update_title(&self, id: &str, title: &str) -> DeliberationResult<()> {
        let mut conversation = self.get(id)?;
        conversation.title = title.to_string();
        self.save(&conversation)
    }

    pub fn set_model_selection(
        &self,
        id: &str,
        selection: ModelSelection,
    ) -> DeliberationResult<()> {
        let mut conversation = self.get(id)?;
        conversation.model_selection = Some(selection);
        self.save(&conversation)
    }

    pub fn set_clarification_state(
        &self,
        id: &str,
        state: ClarificationState,
    ) -> DeliberationResult<()> {
        let mut conversation = self.get(id)?;
        conversation.clarification_state = Some(state);
        self.save(&conversation)
    }
}

fn modified_at(path: &Path) -> Option<DateTime<Utc>> {
    let modified = fs::metadata(path).ok()?.modified().ok()?;
    Some(DateTime::<Utc>::from(modified))
}

fn display_title(conversation: &Conversation) -> String {
    let title = conversation.title.trim();
    if !title.is_empty() && title != PLACEHOLDER_TITLE {
        return title.to_string();
    }
    conversation
        .first_user_message()
        .and_then(derive_fallback_title)
        .unwrap_or_else(|| "Untitled conversation".to_string())
}

/// Derive a stable fallback title from the first user prompt: first
/// non-empty line, common conversational prefixes stripped, capped at
/// 60 characters.
fn derive_fallback_title(first_user: &str) -> Option<String> {
    let line = first_user.lines().find_map(|l| {
        let trimmed = l.trim();
        (!trimmed.is_empty()).then_some(trimmed)
    })?;

    let mut title = line.to_string();
    for prefix in ["help me", "i want", "please", "can you", "could you", "i need"] {
        // Case-insensitive ASCII prefix match on the line itself;
        // matched bytes are ASCII, so the offset is a char boundary.
        let head = &line.as_bytes()[..line.len().min(prefix.len())];
        if head.eq_ignore_ascii_case(prefix.as_bytes()) {
            title = line[prefix.len()..]
                .trim_start_matches([' ', ':', ',', '-'])
                .to_string();
            break;
        }
    }

    if title.is_empty() {
        return None;
    }
    if title.chars().count() > 60 {
        title = title.chars().take(60).collect::<String>().trim_end().to_string() + "…";
    }
    Some(title)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, ConversationStore) {
        let dir = TempDir::new().unwrap();
        let store = ConversationStore::new(dir.path());
        (dir, store)
    }

    fn synthesis(text: &str) -> SynthesisResult {
        SynthesisResult {
            model_id: "anthropic/claude-3.5-sonnet".into(),
            response: text.into(),
        }
    }

    #[test]
    fn create_get_round_trip() {
        let (_dir, store) = store();
        let created = store.create(None, None).unwrap();
        let loaded = store.get(&created.id).unwrap();
        assert_eq!(loaded.id, created.id);
        assert_eq!(loaded.title, PLACEHOLDER_TITLE);
        assert!(loaded.messages.is_empty());
    }

    #[test]
    fn missing_conversation_is_an_error() {
        let (_dir, store) = store();
        let err = store.get("nope").unwrap_err();
        assert!(matches!(err, DeliberationError::ConversationNotFound(id) if id == "nope"));
    }

    #[test]
    fn assistant_turn_stores_all_three_stages() {
        let (_dir, store) = store();
        let conv = store.create(None, None).unwrap();
        store.add_user_message(&conv.id, "question").unwrap();
        store
            .add_assistant_message(&conv.id, vec![], vec![], synthesis("verdict"))
            .unwrap();

        let loaded = store.get(&conv.id).unwrap();
        assert_eq!(loaded.messages.len(), 2);
        match &loaded.messages[1] {
            Message::Assistant { stage3, .. } => assert_eq!(stage3.response, "verdict"),
            Message::User { .. } => panic!("expected assistant turn"),
        }
    }

    #[test]
    fn chat_history_uses_synthesized_answers() {
        let (_dir, store) = store();
        let conv = store.create(None, None).unwrap();
        store.add_user_message(&conv.id, "question").unwrap();
        store
            .add_assistant_message(&conv.id, vec![], vec![], synthesis("verdict"))
            .unwrap();

        let history = store.get(&conv.id).unwrap().chat_history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, "user");
        assert_eq!(history[1].role, "assistant");
        assert_eq!(history[1].content, "verdict");
    }

    #[test]
    fn listing_derives_fallback_titles() {
        let (_dir, store) = store();
        let conv = store.create(None, None).unwrap();
        store
            .add_user_message(&conv.id, "help me plan a move to Lisbon")
            .unwrap();

        let summaries = store.list().unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].title, "plan a move to Lisbon");
        assert_eq!(summaries[0].message_count, 1);
    }

    #[test]
    fn fallback_title_strips_prefixes_case_insensitively() {
        assert_eq!(
            derive_fallback_title("Help me plan a move").unwrap(),
            "plan a move"
        );
        assert_eq!(
            derive_fallback_title("CAN YOU review this contract").unwrap(),
            "review this contract"
        );
    }

    #[test]
    fn fallback_title_handles_multibyte_lines() {
        assert_eq!(
            derive_fallback_title("¿Cómo organizo una mudanza?").unwrap(),
            "¿Cómo organizo una mudanza?"
        );
        assert_eq!(derive_fallback_title("hélp").unwrap(), "hélp");
    }

    #[test]
    fn fallback_title_caps_length() {
        let long = "x".repeat(100);
        let title = derive_fallback_title(&long).unwrap();
        assert!(title.chars().count() <= 61);
        assert!(title.ends_with('…'));
    }

    #[test]
    fn explicit_title_wins_over_fallback() {
        let (_dir, store) = store();
        let conv = store.create(None, None).unwrap();
        store.add_user_message(&conv.id, "help me with taxes").unwrap();
        store.update_title(&conv.id, "Tax planning").unwrap();

        let summaries = store.list().unwrap();
        assert_eq!(summaries[0].title, "Tax planning");
    }

    #[test]
    fn delete_reports_existence() {
        let (_dir, store) = store();
        let conv = store.create(None, None).unwrap();
        assert!(store.delete(&conv.id).unwrap());
        assert!(!store.delete(&conv.id).unwrap());
    }

    #[test]
    fn message_serializes_with_role_tag() {
        let message = Message::User {
            content: "hi".into(),
        };
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(json["content"], "hi");
    }
}
