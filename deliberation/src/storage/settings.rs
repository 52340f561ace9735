//! Application settings with on-disk persistence and seeded defaults.
//!
//! Unknown or missing fields fall back to the defaults, so a settings
//! file written by an older build loads cleanly.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::DeliberationResult;

use super::{read_json, write_json};

const MASKED_KEY_PREFIX: &str = "********";

fn default_council_models() -> Vec<String> {
    vec![
        "openai/gpt-5.1".to_string(),
        "google/gemini-3-pro-preview".to_string(),
        "anthropic/claude-sonnet-4.5".to_string(),
        "x-ai/grok-4".to_string(),
    ]
}

fn default_chairman_model() -> String {
    "anthropic/claude-sonnet-4.5".to_string()
}

fn default_analyst_model() -> String {
    "anthropic/claude-sonnet-4.5".to_string()
}

fn default_max_clarification_rounds() -> usize {
    5
}

/// Persisted configuration for the council.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Settings {
    #[serde(default = "default_council_models")]
    pub council_models: Vec<String>,
    #[serde(default = "default_chairman_model")]
    pub chairman_model: String,
    #[serde(default = "default_analyst_model")]
    pub analyst_model: String,
    #[serde(default)]
    pub clarification_first_enabled: bool,
    #[serde(default = "default_max_clarification_rounds")]
    pub max_clarification_rounds: usize,
    #[serde(default)]
    pub openrouter_api_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            council_models: default_council_models(),
            chairman_model: default_chairman_model(),
            analyst_model: default_analyst_model(),
            clarification_first_enabled: false,
            max_clarification_rounds: default_max_clarification_rounds(),
            openrouter_api_key: String::new(),
            updated_at: None,
        }
    }
}

impl Settings {
    /// Copy safe to return to callers: the stored API key is replaced
    /// with a mask that keeps only the last four characters.
    pub fn masked(&self) -> Settings {
        let mut masked = self.clone();
        masked.openrouter_api_key = mask_api_key(&self.openrouter_api_key);
        masked
    }
}

/// Partial update applied over the stored settings. `None` leaves the
/// current value untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateSettings {
    pub council_models: Option<Vec<String>>,
    pub chairman_model: Option<String>,
    pub analyst_model: Option<String>,
    pub clarification_first_enabled: Option<bool>,
    pub max_clarification_rounds: Option<usize>,
    pub openrouter_api_key: Option<String>,
}

pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load settings, seeding the file with defaults on first use. A
    /// corrupt file is logged and replaced by defaults rather than
    /// taking the whole service down.
    pub fn load(&self) -> DeliberationResult<Settings> {
        match read_json::<Settings>(&self.path) {
            Ok(Some(settings)) => Ok(settings),
            Ok(None) => {
                let defaults = Settings::default();
                write_json(&self.path, &defaults)?;
                Ok(defaults)
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "settings unreadable, using defaults");
                Ok(Settings::default())
            }
        }
    }

    pub fn update(&self, update: UpdateSettings) -> DeliberationResult<Settings> {
        let mut settings = self.load()?;
        if let Some(council_models) = update.council_models {
            settings.council_models = council_models;
        }
        if let Some(chairman_model) = update.chairman_model {
            settings.chairman_model = chairman_model;
        }
        if let Some(analyst_model) = update.analyst_model {
            settings.analyst_model = analyst_model;
        }
        if let Some(enabled) = update.clarification_first_enabled {
            settings.clarification_first_enabled = enabled;
        }
        if let Some(rounds) = update.max_clarification_rounds {
            settings.max_clarification_rounds = rounds;
        }
        if let Some(key) = update.openrouter_api_key {
            settings.openrouter_api_key = key;
        }
        settings.updated_at = Some(Utc::now());
        write_json(&self.path, &settings)?;
        Ok(settings)
    }

    /// API key for outbound calls: the stored key if set, otherwise
    /// the `OPENROUTER_API_KEY` environment variable.
    pub fn effective_api_key(&self) -> DeliberationResult<String> {
        let settings = self.load()?;
        if !settings.openrouter_api_key.is_empty() {
            return Ok(settings.openrouter_api_key);
        }
        Ok(std::env::var("OPENROUTER_API_KEY").unwrap_or_default())
    }
}

fn mask_api_key(key: &str) -> String {
    if key.is_empty() {
        return String::new();
    }
    let tail: String = key
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("{MASKED_KEY_PREFIX}{tail}")
}
