use chrono::{DateTime, Utc};

use crate::ids::new_id;
use crate::model::{ActivityEntry, ActivityType};

pub const ACTIVITY_LIMIT: usize = 20;

/// Newest-first audit trail, bounded to the last [`ACTIVITY_LIMIT`] entries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActivityLog {
    entries: Vec<ActivityEntry>,
}

impl ActivityLog {
    /// Restores a log from stored entries, trusting their order but not their length.
    pub fn from_entries(mut entries: Vec<ActivityEntry>) -> Self {
        entries.truncate(ACTIVITY_LIMIT);
        Self { entries }
    }

    pub fn record(&mut self, kind: ActivityType, description: impl Into<String>, at: DateTime<Utc>) {
        self.entries.insert(
            0,
            ActivityEntry {
                id: new_id(),
                kind,
                description: description.into(),
                timestamp: at,
            },
        );
        self.entries.truncate(ACTIVITY_LIMIT);
    }

    pub fn entries(&self) -> &[ActivityEntry] {
        &self.entries
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
