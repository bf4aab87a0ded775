use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::ids::new_id;

pub struct TaskTemplate {
    pub key: &'static str,
    pub label: &'static str,
    pub fields: &'static [&'static str],
}

/// Every event carries exactly one task per template, in this order.
pub const TASK_TEMPLATES: &[TaskTemplate] = &[
    TaskTemplate {
        key: "proposal",
        label: "Event proposal",
        fields: &["objective", "venue", "participants"],
    },
    TaskTemplate {
        key: "risk_assessment",
        label: "Risk assessment",
        fields: &["hazards", "mitigations", "approvedBy"],
    },
    TaskTemplate {
        key: "parent_consent",
        label: "Parent consent",
        fields: &["dueDate", "collected", "outstanding"],
    },
    TaskTemplate {
        key: "transport",
        label: "Transport booking",
        fields: &["provider", "pickupTime", "cost"],
    },
    TaskTemplate {
        key: "staffing",
        label: "Staffing",
        fields: &["teacherInCharge", "supervisors", "ratio"],
    },
    TaskTemplate {
        key: "budget",
        label: "Budget approval",
        fields: &["amount", "costCentre", "aorRef"],
    },
    TaskTemplate {
        key: "review",
        label: "Post-event review",
        fields: &["outcomes", "improvements"],
    },
];

pub fn template(key: &str) -> Option<&'static TaskTemplate> {
    TASK_TEMPLATES.iter().find(|t| t.key == key)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    #[default]
    Excursion,
    Camp,
    Incursion,
    SportsCarnival,
    Performance,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    #[default]
    Planning,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Completed,
}

fn enabled_by_default() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventTask {
    pub key: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl EventTask {
    fn from_template(t: &TaskTemplate) -> Self {
        Self {
            key: t.key.to_string(),
            enabled: true,
            status: TaskStatus::Pending,
            data: BTreeMap::new(),
        }
    }

    fn has_saved_field(&self) -> bool {
        self.data.values().any(|v| !v.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminEvent {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default)]
    pub event_type: EventType,
    #[serde(default)]
    pub status: EventStatus,
    #[serde(default)]
    pub tasks: Vec<EventTask>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl AdminEvent {
    /// `name` must already be validated as non-blank.
    pub fn new(name: &str, input: &NewEvent, now: DateTime<Utc>) -> Self {
        let mut event = Self {
            id: new_id(),
            name: name.to_string(),
            date: input
                .date
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            event_type: input.event_type.unwrap_or_default(),
            status: EventStatus::Planning,
            tasks: TASK_TEMPLATES.iter().map(EventTask::from_template).collect(),
            created_at: now,
            updated_at: now,
        };
        event.refresh_status();
        event
    }

    /// Rebuilds `tasks` as one entry per template, keeping the state of known
    /// keys and dropping anything else.
    pub fn normalize_tasks(&mut self) {
        let mut existing: BTreeMap<String, EventTask> = self
            .tasks
            .drain(..)
            .map(|t| (t.key.clone(), t))
            .collect();
        self.tasks = TASK_TEMPLATES
            .iter()
            .map(|t| {
                existing
                    .remove(t.key)
                    .unwrap_or_else(|| EventTask::from_template(t))
            })
            .collect();
        self.refresh_status();
    }

    pub fn refresh_status(&mut self) {
        self.status = derive_status(&self.tasks);
    }

    pub fn task_mut(&mut self, key: &str) -> Option<&mut EventTask> {
        self.tasks.iter_mut().find(|t| t.key == key)
    }
}

/// An event with no enabled tasks counts as completed.
pub fn derive_status(tasks: &[EventTask]) -> EventStatus {
    let enabled = || tasks.iter().filter(|t| t.enabled);
    if enabled().all(|t| t.status == TaskStatus::Completed) {
        return EventStatus::Completed;
    }
    if enabled().any(|t| t.status == TaskStatus::Completed || t.has_saved_field()) {
        return EventStatus::InProgress;
    }
    EventStatus::Planning
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NewEvent {
    pub name: String,
    pub date: Option<String>,
    pub event_type: Option<EventType>,
}

/// `date: Some("")` clears the date.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EventPatch {
    pub name: Option<String>,
    pub date: Option<String>,
    pub event_type: Option<EventType>,
}

pub const AOR_PENDING: &str = "pending";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminAor {
    pub id: String,
    #[serde(default)]
    pub desc: String,
    #[serde(default)]
    pub cost: String,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub approver: String,
    #[serde(default)]
    pub justification: String,
    pub status: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NewAor {
    pub desc: String,
    pub cost: String,
    pub code: String,
    pub source: String,
    pub approver: String,
    pub justification: String,
}

impl AdminAor {
    pub fn new(input: &NewAor, now: DateTime<Utc>) -> Self {
        Self {
            id: new_id(),
            desc: input.desc.trim().to_string(),
            cost: input.cost.trim().to_string(),
            code: input.code.trim().to_string(),
            source: input.source.trim().to_string(),
            approver: input.approver.trim().to_string(),
            justification: input.justification.trim().to_string(),
            status: AOR_PENDING.to_string(),
            created_at: now,
        }
    }
}

/// Admin records, persisted apart from the class data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdminBook {
    #[serde(default)]
    pub events: Vec<AdminEvent>,
    #[serde(default)]
    pub aors: Vec<AdminAor>,
}

impl AdminBook {
    pub fn event_mut(&mut self, id: &str) -> Option<&mut AdminEvent> {
        self.events.iter_mut().find(|e| e.id == id)
    }

    pub fn normalize(&mut self) {
        for event in self.events.iter_mut() {
            event.normalize_tasks();
        }
    }
}
