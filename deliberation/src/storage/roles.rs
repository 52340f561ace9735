//! Persona definitions the council can adopt, one JSON file per record.

use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DeliberationError, DeliberationResult};

use super::{read_json, write_json};

/// A persona every council member adopts for the conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Role {
    pub id: String,
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub struct RoleStore {
    dir: PathBuf,
}

impl RoleStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    pub fn create(&self, name: &str, description: &str) -> DeliberationResult<Role> {
        let now = Utc::now();
        let role = Role {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            description: description.to_string(),
            created_at: now,
            updated_at: now,
        };
        write_json(&self.path_for(&role.id), &role)?;
        Ok(role)
    }

    pub fn get(&self, id: &str) -> DeliberationResult<Role> {
        read_json(&self.path_for(id))?
            .ok_or_else(|| DeliberationError::RecordNotFound(id.to_string()))
    }

    pub fn update(
        &self,
        id: &str,
        name: Option<&str>,
        description: Option<&str>,
    ) -> DeliberationResult<Role> {
        let mut role = self.get(id)?;
        if let Some(name) = name {
            role.name = name.to_string();
        }
        if let Some(description) = description {
            role.description = description.to_string();
        }
        role.updated_at = Utc::now();
        write_json(&self.path_for(id), &role)?;
        Ok(role)
    }

    pub fn delete(&self, id: &str) -> DeliberationResult<bool> {
        let path = self.path_for(id);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(path)?;
        Ok(true)
    }

    /// All roles, newest first.
    pub fn list(&self) -> DeliberationResult<Vec<Role>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut roles = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(role) = read_json::<Role>(&path)? {
                roles.push(role);
            }
        }
        roles.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(roles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn crud_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = RoleStore::new(dir.path());

        let created = store
            .create("Skeptic", "Challenge every assumption before agreeing.")
            .unwrap();
        assert_eq!(store.get(&created.id).unwrap(), created);

        let updated = store.update(&created.id, Some("Devil's advocate"), None).unwrap();
        assert_eq!(updated.name, "Devil's advocate");
        assert_eq!(updated.description, created.description);

        assert!(store.delete(&created.id).unwrap());
        assert!(matches!(
            store.get(&created.id),
            Err(DeliberationError::RecordNotFound(_))
        ));
    }
}
