use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use crate::ids::new_id;

pub const DEFAULT_CLASS_NAME: &str = "Untitled Class";
pub const DEFAULT_STUDENT_NAME: &str = "Student";

pub const SCORE_MIN: i64 = 0;
pub const SCORE_MAX: i64 = 100;
pub const DEFAULT_SCORE: u8 = 50;

/// Most recent competency snapshots kept per student.
pub const HISTORY_LIMIT: usize = 20;

pub fn clamp_score(v: i64) -> u8 {
    v.clamp(SCORE_MIN, SCORE_MAX) as u8
}

fn default_score() -> u8 {
    DEFAULT_SCORE
}

// Stored documents may carry floats, nulls or out-of-range values; all of them
// land inside [0,100].
fn de_score<'de, D>(d: D) -> Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Option::<f64>::deserialize(d)?;
    Ok(v.map(|f| clamp_score(f.round() as i64))
        .unwrap_or(DEFAULT_SCORE))
}

fn default_class_name() -> String {
    DEFAULT_CLASS_NAME.to_string()
}

fn default_student_name() -> String {
    DEFAULT_STUDENT_NAME.to_string()
}

fn non_blank(v: Option<&str>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

//
// Settings
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ModelId {
    #[default]
    #[serde(rename = "gpt-4o-mini")]
    Gpt4oMini,
    #[serde(rename = "gpt-4o")]
    Gpt4o,
    #[serde(rename = "gpt-4.1-mini")]
    Gpt41Mini,
    #[serde(rename = "gpt-4.1")]
    Gpt41,
}

impl ModelId {
    pub const ALL: [ModelId; 4] = [
        ModelId::Gpt4oMini,
        ModelId::Gpt4o,
        ModelId::Gpt41Mini,
        ModelId::Gpt41,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelId::Gpt4oMini => "gpt-4o-mini",
            ModelId::Gpt4o => "gpt-4o",
            ModelId::Gpt41Mini => "gpt-4.1-mini",
            ModelId::Gpt41 => "gpt-4.1",
        }
    }
}

impl FromStr for ModelId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ModelId::ALL
            .iter()
            .copied()
            .find(|m| m.as_str() == s.trim())
            .ok_or_else(|| format!("unknown model: {}", s))
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const SETTING_API_KEY: &str = "apiKey";
pub const SETTING_MODEL: &str = "model";
pub const SETTING_DARK_MODE: &str = "darkMode";

#[derive(Clone, PartialEq, Default)]
pub struct Settings {
    pub api_key: String,
    pub model: ModelId,
    pub dark_mode: bool,
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("api_key", &if self.api_key.is_empty() { "" } else { "<redacted>" })
            .field("model", &self.model)
            .field("dark_mode", &self.dark_mode)
            .finish()
    }
}

//
// Competency scores
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct E21cc {
    #[serde(default = "default_score", deserialize_with = "de_score")]
    pub cait: u8,
    #[serde(default = "default_score", deserialize_with = "de_score")]
    pub cci: u8,
    #[serde(default = "default_score", deserialize_with = "de_score")]
    pub cgc: u8,
}

impl Default for E21cc {
    fn default() -> Self {
        Self {
            cait: DEFAULT_SCORE,
            cci: DEFAULT_SCORE,
            cgc: DEFAULT_SCORE,
        }
    }
}

impl E21cc {
    /// Replaces the axes present in `patch`, clamping each.
    pub fn merged(&self, patch: &ScorePatch) -> E21cc {
        E21cc {
            cait: patch.cait.map(clamp_score).unwrap_or(self.cait),
            cci: patch.cci.map(clamp_score).unwrap_or(self.cci),
            cgc: patch.cgc.map(clamp_score).unwrap_or(self.cgc),
        }
    }

    pub fn adjusted(&self, deltas: &ScoreDeltas) -> E21cc {
        E21cc {
            cait: clamp_score((self.cait as i64).saturating_add(deltas.delta_cait)),
            cci: clamp_score((self.cci as i64).saturating_add(deltas.delta_cci)),
            cgc: clamp_score((self.cgc as i64).saturating_add(deltas.delta_cgc)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ScorePatch {
    pub cait: Option<i64>,
    pub cci: Option<i64>,
    pub cgc: Option<i64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ScoreDeltas {
    pub delta_cait: i64,
    pub delta_cci: i64,
    pub delta_cgc: i64,
}

impl ScoreDeltas {
    pub fn is_zero(&self) -> bool {
        self.delta_cait == 0 && self.delta_cci == 0 && self.delta_cgc == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub ts: DateTime<Utc>,
    #[serde(default = "default_score", deserialize_with = "de_score")]
    pub cait: u8,
    #[serde(default = "default_score", deserialize_with = "de_score")]
    pub cci: u8,
    #[serde(default = "default_score", deserialize_with = "de_score")]
    pub cgc: u8,
}

impl HistoryEntry {
    pub fn snapshot(ts: DateTime<Utc>, scores: &E21cc) -> Self {
        Self {
            ts,
            cait: scores.cait,
            cci: scores.cci,
            cgc: scores.cgc,
        }
    }
}

//
// Classes, students, notes
//

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRecord {
    pub id: String,
    #[serde(default = "default_student_name")]
    pub name: String,
    #[serde(default)]
    pub e21cc: E21cc,
    #[serde(default)]
    pub e21cc_history: Vec<HistoryEntry>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl StudentRecord {
    pub fn new(input: &NewStudent, now: DateTime<Utc>) -> Self {
        let e21cc = input
            .e21cc
            .as_ref()
            .map(|p| E21cc::default().merged(p))
            .unwrap_or_default();
        Self {
            id: new_id(),
            name: non_blank(input.name.as_deref()).unwrap_or_else(default_student_name),
            e21cc,
            e21cc_history: Vec::new(),
            created_at: now,
        }
    }

    /// Appends a snapshot of the current scores, evicting the oldest past the limit.
    pub fn push_snapshot(&mut self, ts: DateTime<Utc>) {
        self.e21cc_history.push(HistoryEntry::snapshot(ts, &self.e21cc));
        self.cap_history();
    }

    /// Keeps only the newest `HISTORY_LIMIT` snapshots.
    pub fn cap_history(&mut self) {
        if self.e21cc_history.len() > HISTORY_LIMIT {
            let excess = self.e21cc_history.len() - HISTORY_LIMIT;
            self.e21cc_history.drain(..excess);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteRecord {
    pub id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl NoteRecord {
    pub fn new(text: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: new_id(),
            text: text.trim().to_string(),
            summary: None,
            created_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassRecord {
    pub id: String,
    #[serde(default = "default_class_name")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default)]
    pub students: Vec<StudentRecord>,
    #[serde(default)]
    pub notes: Vec<NoteRecord>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl ClassRecord {
    pub fn new(input: &NewClass, now: DateTime<Utc>) -> Self {
        Self {
            id: new_id(),
            name: non_blank(input.name.as_deref()).unwrap_or_else(default_class_name),
            level: non_blank(input.level.as_deref()),
            subject: non_blank(input.subject.as_deref()),
            students: Vec::new(),
            notes: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn apply(&mut self, patch: &ClassPatch) {
        if let Some(name) = patch.name.as_deref() {
            self.name = non_blank(Some(name)).unwrap_or_else(default_class_name);
        }
        if let Some(level) = patch.level.as_deref() {
            self.level = non_blank(Some(level));
        }
        if let Some(subject) = patch.subject.as_deref() {
            self.subject = non_blank(Some(subject));
        }
    }

    pub fn student_mut(&mut self, student_id: &str) -> Option<&mut StudentRecord> {
        self.students.iter_mut().find(|s| s.id == student_id)
    }

    pub fn note_mut(&mut self, note_id: &str) -> Option<&mut NoteRecord> {
        self.notes.iter_mut().find(|n| n.id == note_id)
    }

    /// Caps every student's history and drops students and notes whose id
    /// is blank or already seen. Returns how many records were dropped.
    pub fn normalize(&mut self) -> usize {
        for student in self.students.iter_mut() {
            student.cap_history();
        }
        let before = self.students.len() + self.notes.len();
        retain_unique(&mut self.students, |s| &s.id);
        retain_unique(&mut self.notes, |n| &n.id);
        before - self.students.len() - self.notes.len()
    }
}

/// Normalizes loaded classes in place, dropping repeated class ids first.
/// Returns how many records were dropped in total.
pub fn normalize_classes(classes: &mut Vec<ClassRecord>) -> usize {
    let before = classes.len();
    retain_unique(classes, |c| &c.id);
    let mut dropped = before - classes.len();
    for class in classes.iter_mut() {
        dropped += class.normalize();
    }
    dropped
}

fn retain_unique<T>(items: &mut Vec<T>, id: impl Fn(&T) -> &String) {
    let mut seen = HashSet::new();
    items.retain(|item| {
        let key = id(item);
        !key.trim().is_empty() && seen.insert(key.clone())
    });
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NewClass {
    pub name: Option<String>,
    pub level: Option<String>,
    pub subject: Option<String>,
}

/// Fields left as `None` are untouched. An empty `level`/`subject` clears it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ClassPatch {
    pub name: Option<String>,
    pub level: Option<String>,
    pub subject: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NewStudent {
    pub name: Option<String>,
    pub e21cc: Option<ScorePatch>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StudentPatch {
    pub name: Option<String>,
    pub e21cc: Option<ScorePatch>,
}

/// `summary: Some("")` clears the summary; blank `text` is ignored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NotePatch {
    pub text: Option<String>,
    pub summary: Option<String>,
}

//
// Lessons
//

/// Lesson plans are opaque to the store beyond their id and owning class;
/// every other field is carried through untouched.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonRecord {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub fields: Map<String, JsonValue>,
}

//
// Activity
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    ClassCreated,
    ClassDeleted,
    StudentAdded,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ActivityType,
    pub description: String,
    pub timestamp: DateTime<Utc>,
}

//
// Chat transcript
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}
