//! Runtime council configuration, assembled from stored settings.

use std::path::PathBuf;

use crate::error::DeliberationResult;
use crate::storage::{Settings, SettingsStore};

/// Resolved configuration for one deliberation run.
#[derive(Debug, Clone)]
pub struct CouncilConfig {
    pub api_key: String,
    pub council_models: Vec<String>,
    pub chairman_model: String,
    pub analyst_model: String,
    pub clarification_first_enabled: bool,
    pub max_clarification_rounds: usize,
}

impl CouncilConfig {
    /// Resolve a config from the settings store. The API key prefers
    /// the stored value, then the `OPENROUTER_API_KEY` environment
    /// variable.
    pub fn from_store(store: &SettingsStore) -> DeliberationResult<Self> {
        let api_key = store.effective_api_key()?;
        let settings = store.load()?;
        Ok(Self::from_settings(settings, api_key))
    }

    pub fn from_settings(settings: Settings, api_key: String) -> Self {
        Self {
            api_key,
            council_models: settings.council_models,
            chairman_model: settings.chairman_model,
            analyst_model: settings.analyst_model,
            clarification_first_enabled: settings.clarification_first_enabled,
            max_clarification_rounds: settings.max_clarification_rounds,
        }
    }
}

/// Root data directory layout shared by all stores.
#[derive(Debug, Clone)]
pub struct DataLayout {
    pub root: PathBuf,
}

impl DataLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn conversations_dir(&self) -> PathBuf {
        self.root.join("conversations")
    }

    pub fn contexts_dir(&self) -> PathBuf {
        self.root.join("contexts")
    }

    pub fn roles_dir(&self) -> PathBuf {
        self.root.join("roles")
    }

    pub fn settings_file(&self) -> PathBuf {
        self.root.join("settings.json")
    }
}

impl Default for DataLayout {
    fn default() -> Self {
        Self::new("data")
    }
}
