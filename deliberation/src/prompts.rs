//! Prompt builders for the analyst, the council stages, and the title
//! call. All prompts are plain strings assembled deterministically —
//! anonymized material never includes model identifiers.

use std::fmt::Write as _;

use crate::council::{AggregateRanking, Label, Ranking};
use crate::gateway::{ChatMessage, ModelResponse};

/// Which clarification task the analyst is being asked to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClarificationTask {
    /// Generate the very first clarifying question.
    FirstQuestion,
    /// Decide between one more question and a briefing.
    NextRound { max_rounds: usize },
    /// The round ceiling is reached: a briefing is mandatory.
    ForcedBriefing,
}

/// Build the analyst prompt for one clarification round.
pub fn clarification_prompt(
    user_query: &str,
    context: Option<&str>,
    role: Option<&str>,
    history: &[String],
    task: ClarificationTask,
) -> String {
    let mut prompt = String::from(
        "You are the Analyst in a clarification-first system. Your job is to \
         clarify the user's request before any analysis begins.\n\n",
    );

    if let Some(role) = role {
        let _ = write!(prompt, "ROLE TO ADOPT:\n{role}\n\n");
    }
    if let Some(context) = context {
        let _ = write!(prompt, "BACKGROUND CONTEXT:\n{context}\n\n");
    }
    let _ = write!(prompt, "USER'S ORIGINAL REQUEST:\n{user_query}\n\n");

    if !history.is_empty() {
        prompt.push_str("CLARIFICATION HISTORY:\n");
        for (i, answer) in history.iter().enumerate() {
            let _ = writeln!(prompt, "Q{} Answer: {answer}", i + 1);
        }
        prompt.push('\n');
    }

    match task {
        ClarificationTask::FirstQuestion => {
            prompt.push_str(
                "YOUR TASK:\n\
                 Generate ONE focused clarifying question that will materially affect the outcome.\n\n\
                 RULES:\n\
                 - Ask only about information that significantly impacts the solution\n\
                 - Do NOT propose solutions or strategies\n\
                 - Do NOT ask generic or obvious questions\n\
                 - Keep the question clear and concise\n\
                 - Indicate if the question is required or optional\n\n\
                 RESPONSE FORMAT (JSON):\n\
                 {\n  \"question\": \"Your clarifying question here\",\n  \"required\": true,\n  \"rationale\": \"Brief explanation of why this matters (optional)\"\n}\n",
            );
        }
        ClarificationTask::ForcedBriefing => {
            prompt.push_str(
                "YOUR TASK:\n\
                 You have reached the maximum number of clarification rounds. \
                 Generate a comprehensive BRIEFING SUMMARY.\n\n\
                 The briefing must include:\n\
                 1. The objective or goal\n\
                 2. Key facts provided by the user\n\
                 3. Constraints and boundaries\n\
                 4. Open unknowns\n\
                 5. Assumptions being made (if any)\n\n",
            );
            prompt.push_str(BRIEFING_FORMAT);
        }
        ClarificationTask::NextRound { max_rounds } => {
            let _ = write!(
                prompt,
                "YOUR TASK:\n\
                 Based on the clarification history, decide:\n\
                 1. If you need ONE more clarifying question, OR\n\
                 2. If you have enough information to create a briefing summary\n\n\
                 You have asked {} question(s) so far. Maximum is {max_rounds}.\n\n\
                 RESPONSE FORMAT (JSON):\n\
                 If asking another question:\n\
                 {{\n  \"type\": \"question\",\n  \"question\": \"Your next clarifying question\",\n  \"required\": false,\n  \"rationale\": \"Why this matters (optional)\"\n}}\n\n\
                 If ready for briefing:\n",
                history.len()
            );
            prompt.push_str(BRIEFING_FORMAT);
        }
    }

    prompt
}

const BRIEFING_FORMAT: &str = "RESPONSE FORMAT (JSON):\n\
{\n  \"type\": \"briefing\",\n  \"briefing\": \"Complete briefing summary as formatted text\",\n  \"objective\": \"Clear statement of the goal\",\n  \"key_facts\": [\"fact 1\", \"fact 2\"],\n  \"constraints\": [\"constraint 1\"],\n  \"unknowns\": [\"unknown 1\"],\n  \"assumptions\": [\"assumption 1\"]\n}\n";

/// Build the shared Stage-1 message list: optional system framing from
/// role and context, the conversation so far, then the current query.
pub fn stage1_messages(
    user_query: &str,
    history: &[ChatMessage],
    context: Option<&str>,
    role: Option<&str>,
) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);

    let mut system = String::new();
    if let Some(role) = role {
        let _ = write!(system, "ROLE TO ADOPT:\n{role}");
    }
    if let Some(context) = context {
        if !system.is_empty() {
            system.push_str("\n\n");
        }
        let _ = write!(system, "BACKGROUND CONTEXT:\n{context}");
    }
    if !system.is_empty() {
        messages.push(ChatMessage::system(system));
    }

    messages.extend(history.iter().cloned());
    messages.push(ChatMessage::user(user_query));
    messages
}

/// Build the anonymized Stage-2 judging prompt. Each response appears
/// under its label only; model identities are withheld.
pub fn ranking_prompt(user_query: &str, labeled: &[(Label, &str)]) -> String {
    let mut prompt = format!(
        "You are an impartial judge evaluating candidate answers to a question. \
         The answers are anonymized; do not speculate about their authors and do \
         not identify yourself.\n\n\
         QUESTION:\n{user_query}\n\n"
    );

    for (label, content) in labeled {
        let _ = write!(prompt, "=== {label} ===\n{content}\n\n");
    }

    let labels: Vec<&str> = labeled.iter().map(|(label, _)| label.as_str()).collect();
    let _ = write!(
        prompt,
        "YOUR TASK:\n\
         Rank ALL of the responses from best to worst on accuracy, depth, and \
         usefulness. Every label must appear exactly once.\n\n\
         RESPONSE FORMAT (JSON):\n\
         {{\"ranking\": [{}]}}\n",
        labels
            .iter()
            .map(|l| format!("\"{l}\""))
            .collect::<Vec<_>>()
            .join(", ")
    );
    prompt
}

/// Build the chairman's Stage-3 synthesis prompt. Authorship is
/// revealed here — ranking is already complete.
pub fn synthesis_prompt(
    user_query: &str,
    stage1: &[ModelResponse],
    rankings: &[Ranking],
    aggregate: &[AggregateRanking],
    context: Option<&str>,
    role: Option<&str>,
) -> String {
    let mut prompt = String::from(
        "You are the Chairman of a council of AI models. Council members answered \
         the user's question independently and then ranked each other's anonymized \
         answers. Synthesize ONE final answer of record from this material. Respond \
         with the final answer only — no meta-commentary about the process.\n\n",
    );

    if let Some(role) = role {
        let _ = write!(prompt, "ROLE TO ADOPT:\n{role}\n\n");
    }
    if let Some(context) = context {
        let _ = write!(prompt, "BACKGROUND CONTEXT:\n{context}\n\n");
    }
    let _ = write!(prompt, "USER'S QUESTION:\n{user_query}\n\n");

    prompt.push_str("COUNCIL RESPONSES:\n");
    for response in stage1 {
        match response.content.as_deref() {
            Some(content) if response.succeeded() => {
                let _ = write!(prompt, "--- {} ---\n{content}\n\n", response.model_id);
            }
            _ => {
                let _ = writeln!(prompt, "--- {} --- (no response)\n", response.model_id);
            }
        }
    }

    if !rankings.is_empty() {
        prompt.push_str("PEER RANKINGS (best to worst, as judged blind):\n");
        for ranking in rankings {
            let _ = writeln!(
                prompt,
                "{}: {}",
                ranking.judge_model_id,
                ranking.ordered_labels.join(" > ")
            );
        }
        prompt.push('\n');
    }

    if !aggregate.is_empty() {
        prompt.push_str("AGGREGATE RANKING:\n");
        for entry in aggregate {
            let _ = writeln!(
                prompt,
                "{}. {} (score {})",
                entry.rank, entry.model_id, entry.score
            );
        }
        prompt.push('\n');
    }

    prompt
}

/// Prompt for the auxiliary title call.
pub fn title_prompt(first_message: &str) -> String {
    format!(
        "Generate a short title (at most 6 words) for a conversation that starts \
         with the message below. Reply with the title only — no quotes, no \
         punctuation at the end.\n\nMESSAGE:\n{first_message}\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clarification_prompt_includes_history_and_ceiling() {
        let history = vec!["markdown".to_string(), "developers".to_string()];
        let prompt = clarification_prompt(
            "Write a doc",
            Some("internal tooling"),
            None,
            &history,
            ClarificationTask::NextRound { max_rounds: 5 },
        );
        assert!(prompt.contains("Q1 Answer: markdown"));
        assert!(prompt.contains("Q2 Answer: developers"));
        assert!(prompt.contains("asked 2 question(s)"));
        assert!(prompt.contains("Maximum is 5"));
        assert!(prompt.contains("BACKGROUND CONTEXT:\ninternal tooling"));
    }

    #[test]
    fn forced_briefing_prompt_demands_a_briefing() {
        let prompt = clarification_prompt(
            "Write a doc",
            None,
            None,
            &["markdown".to_string()],
            ClarificationTask::ForcedBriefing,
        );
        assert!(prompt.contains("maximum number of clarification rounds"));
        assert!(prompt.contains("\"type\": \"briefing\""));
        assert!(!prompt.contains("If asking another question"));
    }

    #[test]
    fn stage1_messages_end_with_the_query() {
        let history = vec![
            ChatMessage::user("earlier question"),
            ChatMessage::assistant("earlier answer"),
        ];
        let messages = stage1_messages("current question", &history, Some("ctx"), Some("role"));
        assert_eq!(messages.first().map(|m| m.role.as_str()), Some("system"));
        assert_eq!(messages.last().unwrap().content, "current question");
        assert_eq!(messages.len(), 4);
    }

    #[test]
    fn ranking_prompt_withholds_model_identity() {
        let labeled = vec![
            ("Response A".to_string(), "first answer"),
            ("Response B".to_string(), "second answer"),
        ];
        let prompt = ranking_prompt("the question", &labeled);
        assert!(prompt.contains("=== Response A ==="));
        assert!(prompt.contains("{\"ranking\": [\"Response A\", \"Response B\"]}"));
        assert!(!prompt.contains("openai"));
    }
}
