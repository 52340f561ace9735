//! Flat-JSON persistence collaborators.
//!
//! One record per file under a data directory; pretty-printed JSON so
//! the archive stays inspectable by hand. The stores own the
//! read-modify-write cycle for their records; the deliberation core
//! holds no state between invocations.

pub mod contexts;
pub mod conversations;
pub mod roles;
pub mod settings;

use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::DeliberationResult;

pub use contexts::{Context, ContextStore};
pub use conversations::{
    Conversation, ConversationStore, ConversationSummary, ContextSnapshot, Message, RoleSnapshot,
};
pub use roles::{Role, RoleStore};
pub use settings::{Settings, SettingsStore, UpdateSettings};

pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> DeliberationResult<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&raw)?))
}

pub(crate) fn write_json<T: Serialize>(path: &Path, value: &T) -> DeliberationResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let raw = serde_json::to_string_pretty(value)?;
    fs::write(path, raw)?;
    Ok(())
}
