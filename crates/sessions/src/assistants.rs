//! Assistant records.
//!
//! All records are held in memory and written through to
//! `assistants.json` on every mutation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use va_domain::assistant::{Assistant, AssistantDraft};
use va_domain::error::{Error, Result};
use va_domain::history::now_timestamp;

const FILE_NAME: &str = "assistants.json";

pub struct AssistantStore {
    path: PathBuf,
    assistants: RwLock<HashMap<String, Assistant>>,
}

impl AssistantStore {
    /// Load or create the store at `state_path/assistants.json`.
    pub fn new(state_path: &Path) -> Result<Self> {
        std::fs::create_dir_all(state_path)?;

        let path = state_path.join(FILE_NAME);
        let assistants: HashMap<String, Assistant> = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            serde_json::from_str(&raw).map_err(|e| {
                Error::Storage(format!("parsing {}: {e}", path.display()))
            })?
        } else {
            HashMap::new()
        };

        tracing::info!(
            assistants = assistants.len(),
            path = %path.display(),
            "assistant store loaded"
        );

        Ok(Self {
            path,
            assistants: RwLock::new(assistants),
        })
    }

    pub fn exists(&self, id: &str) -> bool {
        self.assistants.read().contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<Assistant> {
        self.assistants.read().get(id).cloned()
    }

    pub fn get_prompt(&self, id: &str) -> Result<String> {
        self.assistants
            .read()
            .get(id)
            .map(|a| a.prompt.clone())
            .ok_or_else(|| Error::AssistantNotFound(id.to_owned()))
    }

    pub fn get_name(&self, id: &str) -> Result<String> {
        self.assistants
            .read()
            .get(id)
            .map(|a| a.name.clone())
            .ok_or_else(|| Error::AssistantNotFound(id.to_owned()))
    }

    /// Most recently active first.
    pub fn list(&self) -> Vec<Assistant> {
        let mut all: Vec<Assistant> = self.assistants.read().values().cloned().collect();
        // The timestamp layout sorts lexicographically; id breaks ties so the
        // order is stable.
        all.sort_by(|a, b| {
            b.time_stamp
                .cmp(&a.time_stamp)
                .then_with(|| a.id.cmp(&b.id))
        });
        all
    }

    pub fn create(&self, draft: AssistantDraft) -> Result<Assistant> {
        let name = draft.name.trim();
        let prompt = draft.prompt.trim();
        if name.is_empty() {
            return Err(Error::Validation("name must not be empty".into()));
        }
        if prompt.is_empty() {
            return Err(Error::Validation("prompt must not be empty".into()));
        }

        let now = now_timestamp();
        let assistant = Assistant {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_owned(),
            description: draft.description.trim().to_owned(),
            prompt: prompt.to_owned(),
            gmt_create: now.clone(),
            gmt_modified: now.clone(),
            time_stamp: now,
        };

        self.mutate(|map| {
            map.insert(assistant.id.clone(), assistant.clone());
            Ok(())
        })?;
        Ok(assistant)
    }

    /// Blank draft fields keep their current value.
    pub fn update(&self, id: &str, draft: AssistantDraft) -> Result<Assistant> {
        self.mutate(|map| {
            let entry = map
                .get_mut(id)
                .ok_or_else(|| Error::AssistantNotFound(id.to_owned()))?;

            if !draft.name.trim().is_empty() {
                entry.name = draft.name.trim().to_owned();
            }
            if !draft.description.trim().is_empty() {
                entry.description = draft.description.trim().to_owned();
            }
            if !draft.prompt.trim().is_empty() {
                entry.prompt = draft.prompt.trim().to_owned();
            }
            let now = now_timestamp();
            entry.gmt_modified = now.clone();
            entry.time_stamp = now;
            Ok(entry.clone())
        })
    }

    pub fn delete(&self, id: &str) -> Result<Assistant> {
        self.mutate(|map| {
            map.remove(id)
                .ok_or_else(|| Error::AssistantNotFound(id.to_owned()))
        })
    }

    /// Record activity on an assistant.
    pub fn touch(&self, id: &str, timestamp: &str) -> Result<()> {
        self.mutate(|map| {
            let entry = map
                .get_mut(id)
                .ok_or_else(|| Error::AssistantNotFound(id.to_owned()))?;
            entry.time_stamp = timestamp.to_owned();
            Ok(())
        })
    }

    /// Persist the current state to disk.
    pub fn flush(&self) -> Result<()> {
        let assistants = self.assistants.read();
        self.write_file(&assistants)
    }

    // ── Private helpers ───────────────────────────────────────────────

    /// Apply `f` under the write lock and persist if it succeeded. The
    /// lock is held across the write so the file never lags a later
    /// mutation.
    fn mutate<T>(&self, f: impl FnOnce(&mut HashMap<String, Assistant>) -> Result<T>) -> Result<T> {
        let mut assistants = self.assistants.write();
        let out = f(&mut assistants)?;
        self.write_file(&assistants)?;
        Ok(out)
    }

    fn write_file(&self, assistants: &HashMap<String, Assistant>) -> Result<()> {
        let json = serde_json::to_string_pretty(assistants)
            .map_err(|e| Error::Storage(format!("serializing assistants: {e}")))?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
