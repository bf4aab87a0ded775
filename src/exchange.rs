use anyhow::{anyhow, bail, Context};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::model::{ActivityEntry, ClassRecord, LessonRecord};

pub const EXPORT_VERSION: u32 = 1;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExportDocument<'a> {
    version: u32,
    exported_at: DateTime<Utc>,
    classes: &'a [ClassRecord],
    lessons: &'a [LessonRecord],
    recent_activity: &'a [ActivityEntry],
}

pub fn encode(
    classes: &[ClassRecord],
    lessons: &[LessonRecord],
    recent_activity: &[ActivityEntry],
    exported_at: DateTime<Utc>,
) -> anyhow::Result<String> {
    let doc = ExportDocument {
        version: EXPORT_VERSION,
        exported_at,
        classes,
        lessons,
        recent_activity,
    };
    serde_json::to_string_pretty(&doc).context("failed to serialize export document")
}

/// Collections found in an import. `None` means the document did not carry
/// that collection and the current one should be kept.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportDocument {
    #[serde(default)]
    pub version: Option<u32>,
    #[serde(default)]
    pub classes: Option<Vec<ClassRecord>>,
    #[serde(default)]
    pub lessons: Option<Vec<LessonRecord>>,
    #[serde(default)]
    pub recent_activity: Option<Vec<ActivityEntry>>,
}

pub fn decode(text: &str) -> anyhow::Result<ImportDocument> {
    let value: serde_json::Value = serde_json::from_str(text).context("import is not valid JSON")?;
    if !value.is_object() {
        bail!("import must be a JSON object");
    }
    let mut doc: ImportDocument =
        serde_json::from_value(value).context("import does not match the export format")?;

    if let Some(v) = doc.version {
        if v > EXPORT_VERSION {
            bail!("unsupported export version: {}", v);
        }
    }

    if let Some(classes) = doc.classes.as_mut() {
        check_unique(classes.iter().map(|c| c.id.as_str()), "class")?;
        for class in classes.iter_mut() {
            check_unique(class.students.iter().map(|s| s.id.as_str()), "student")?;
            check_unique(class.notes.iter().map(|n| n.id.as_str()), "note")?;
            class.normalize();
        }
    }

    Ok(doc)
}

fn check_unique<'a>(ids: impl Iterator<Item = &'a str>, what: &str) -> anyhow::Result<()> {
    let mut seen = HashSet::new();
    for id in ids {
        if id.trim().is_empty() {
            return Err(anyhow!("{} with empty id", what));
        }
        if !seen.insert(id) {
            return Err(anyhow!("duplicate {} id: {}", what, id));
        }
    }
    Ok(())
}
