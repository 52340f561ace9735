//! Auxiliary conversation-title generation.
//!
//! Titles are cosmetic. A failed call yields `None` and the caller
//! keeps whatever title it already had; a deliberation never fails
//! because of its title.

use tracing::debug;

use crate::gateway::{ChatMessage, ModelBackend};
use crate::prompts;

/// Ask `model` for a short title summarizing the first message.
/// Returns `None` on any failure.
pub async fn generate_title(
    backend: &dyn ModelBackend,
    model: &str,
    first_message: &str,
) -> Option<String> {
    let prompt = prompts::title_prompt(first_message);
    let messages = [ChatMessage::user(prompt)];
    let response = backend.send(model, &messages).await;

    if !response.succeeded() {
        debug!(model, "title generation failed");
        return None;
    }

    let title = clean_title(response.content.as_deref()?);
    (!title.is_empty()).then_some(title)
}

/// Strip quoting and trailing punctuation models tend to add despite
/// instructions.
fn clean_title(raw: &str) -> String {
    raw.trim()
        .trim_matches(['"', '\'', '`'])
        .trim_end_matches(['.', '!'])
        .trim()
        .to_string()
}
