use serde::{Deserialize, Serialize};
#[cfg(test)]
use std::cell::RefCell;
#[cfg(test)]
use std::collections::HashMap;
#[cfg(test)]
use std::rc::Rc;

use crate::admin::AdminBook;
use crate::model::{ActivityEntry, ClassRecord, LessonRecord, Settings};

pub const STATE_KEY: &str = "lessonbook.state";
pub const ADMIN_KEY: &str = "lessonbook.admin";
pub const LEGACY_API_KEY: &str = "lessonbook.apiKey";
pub const LEGACY_MODEL_KEY: &str = "lessonbook.model";
pub const LEGACY_DARK_MODE_KEY: &str = "lessonbook.darkMode";

/// String-keyed durable storage. Reads and writes may fail (quota, I/O);
/// callers decide how much that matters.
pub trait KeyValueStore {
    fn get_item(&self, key: &str) -> anyhow::Result<Option<String>>;
    fn set_item(&mut self, key: &str, value: &str) -> anyhow::Result<()>;
}

/// In-process store. Clones share the same items, so a test can reopen a
/// store over the data a previous one wrote.
#[cfg(test)]
#[derive(Clone, Default)]
pub struct MemoryStore {
    items: Rc<RefCell<HashMap<String, String>>>,
    quota_bytes: Option<usize>,
}

#[cfg(test)]
impl MemoryStore {
    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            items: Rc::default(),
            quota_bytes: Some(quota_bytes),
        }
    }

    pub fn raw(&self, key: &str) -> Option<String> {
        self.items.borrow().get(key).cloned()
    }

    pub fn put_raw(&self, key: &str, value: &str) {
        self.items
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
    }
}

#[cfg(test)]
impl KeyValueStore for MemoryStore {
    fn get_item(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.raw(key))
    }

    fn set_item(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        if let Some(quota) = self.quota_bytes {
            if value.len() > quota {
                anyhow::bail!("quota exceeded: {} bytes > {} bytes", value.len(), quota);
            }
        }
        self.put_raw(key, value);
        Ok(())
    }
}

/// The persisted aggregate. Every field is optional on read so that whatever
/// is missing keeps its default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dark_mode: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classes: Option<Vec<ClassRecord>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lessons: Option<Vec<LessonRecord>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recent_activity: Option<Vec<ActivityEntry>>,
}

pub struct Persistence {
    kv: Box<dyn KeyValueStore>,
    last_error: Option<String>,
}

impl Persistence {
    pub fn new(kv: Box<dyn KeyValueStore>) -> Self {
        Self {
            kv,
            last_error: None,
        }
    }

    /// Most recent write failure, if any write has failed this session.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn load(&self) -> Option<PersistedDocument> {
        let aggregate = self.read(STATE_KEY).and_then(|raw| {
            serde_json::from_str::<PersistedDocument>(&raw)
                .map_err(|e| tracing::warn!(key = STATE_KEY, error = %e, "discarding unreadable state"))
                .ok()
        });

        let legacy_api_key = self.read(LEGACY_API_KEY);
        let legacy_model = self.read(LEGACY_MODEL_KEY);
        let legacy_dark_mode = self
            .read(LEGACY_DARK_MODE_KEY)
            .and_then(|v| v.trim().parse::<bool>().ok());

        if aggregate.is_none()
            && legacy_api_key.is_none()
            && legacy_model.is_none()
            && legacy_dark_mode.is_none()
        {
            tracing::debug!("no persisted state found");
            return None;
        }

        let mut doc = aggregate.unwrap_or_default();
        if doc.api_key.is_none() {
            doc.api_key = legacy_api_key;
        }
        if doc.model.is_none() {
            doc.model = legacy_model;
        }
        if doc.dark_mode.is_none() {
            doc.dark_mode = legacy_dark_mode;
        }
        Some(doc)
    }

    /// Writes the aggregate. Never fails.
    pub fn save(&mut self, doc: &PersistedDocument) {
        match serde_json::to_string(doc) {
            Ok(raw) => {
                self.write(STATE_KEY, &raw);
            }
            Err(e) => self.fail(STATE_KEY, e.to_string()),
        }
    }

    /// Writes the per-setting keys older readers look for. Only settings
    /// changes call this.
    pub fn save_settings(&mut self, settings: &Settings) {
        self.write(LEGACY_API_KEY, &settings.api_key);
        self.write(LEGACY_MODEL_KEY, settings.model.as_str());
        self.write(
            LEGACY_DARK_MODE_KEY,
            if settings.dark_mode { "true" } else { "false" },
        );
    }

    pub fn load_admin(&self) -> Option<AdminBook> {
        self.read(ADMIN_KEY).and_then(|raw| {
            serde_json::from_str::<AdminBook>(&raw)
                .map_err(|e| tracing::warn!(key = ADMIN_KEY, error = %e, "discarding unreadable admin records"))
                .ok()
        })
    }

    pub fn save_admin(&mut self, book: &AdminBook) {
        match serde_json::to_string(book) {
            Ok(raw) => {
                self.write(ADMIN_KEY, &raw);
            }
            Err(e) => self.fail(ADMIN_KEY, e.to_string()),
        }
    }

    fn read(&self, key: &str) -> Option<String> {
        match self.kv.get_item(key) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(key, error = %e, "storage read failed");
                None
            }
        }
    }

    fn write(&mut self, key: &str, value: &str) -> bool {
        match self.kv.set_item(key, value) {
            Ok(()) => true,
            Err(e) => {
                self.fail(key, format!("{e:#}"));
                false
            }
        }
    }

    fn fail(&mut self, key: &str, message: String) {
        tracing::warn!(key, error = %message, "storage write failed; keeping in-memory state");
        self.last_error = Some(message);
    }
}
