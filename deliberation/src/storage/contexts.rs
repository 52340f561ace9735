//! Reusable background contexts, one JSON file per record.

use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DeliberationError, DeliberationResult};

use super::{read_json, write_json};

/// Named block of background information a conversation can pin.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Context {
    pub id: String,
    pub name: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub struct ContextStore {
    dir: PathBuf,
}

impl ContextStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    pub fn create(&self, name: &str, content: &str) -> DeliberationResult<Context> {
        let now = Utc::now();
        let context = Context {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            content: content.to_string(),
            created_at: now,
            updated_at: now,
        };
        write_json(&self.path_for(&context.id), &context)?;
        Ok(context)
    }

    pub fn get(&self, id: &str) -> DeliberationResult<Context> {
        read_json(&self.path_for(id))?
            .ok_or_else(|| DeliberationError::RecordNotFound(id.to_string()))
    }

    pub fn update(
        &self,
        id: &str,
        name: Option<&str>,
        content: Option<&str>,
    ) -> DeliberationResult<Context> {
        let mut context = self.get(id)?;
        if let Some(name) = name {
            context.name = name.to_string();
        }
        if let Some(content) = content {
            context.content = content.to_string();
        }
        context.updated_at = Utc::now();
        write_json(&self.path_for(id), &context)?;
        Ok(context)
    }

    pub fn delete(&self, id: &str) -> DeliberationResult<bool> {
        let path = self.path_for(id);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(path)?;
        Ok(true)
    }

    /// All contexts, newest first.
    pub fn list(&self) -> DeliberationResult<Vec<Context>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut contexts = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(context) = read_json::<Context>(&path)? {
                contexts.push(context);
            }
        }
        contexts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(contexts)
    }
}
