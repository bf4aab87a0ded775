use chrono::{DateTime, Utc};
use serde_json::{json, Value as JsonValue};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

use crate::activity::ActivityLog;
use crate::admin::{self, AdminAor, AdminBook, AdminEvent, EventPatch, NewAor, NewEvent, TaskStatus};
use crate::error::StoreError;
use crate::exchange;
use crate::history::{self, ClassTrend};
use crate::ids::new_id;
use crate::model::{
    ActivityEntry, ActivityType, ChatMessage, ClassPatch, ClassRecord, LessonRecord, ModelId,
    normalize_classes, NewClass, NewStudent, NotePatch, NoteRecord, ScoreDeltas, Settings, StudentPatch,
    StudentRecord, SETTING_API_KEY, SETTING_DARK_MODE, SETTING_MODEL,
};
use crate::persist::{KeyValueStore, PersistedDocument, Persistence};

/// Everything the store owns. Listeners receive a clone of this.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateSnapshot {
    pub settings: Settings,
    pub classes: Vec<ClassRecord>,
    pub lessons: Vec<LessonRecord>,
    pub recent_activity: ActivityLog,
    pub chat_history: Vec<ChatMessage>,
    pub admin: AdminBook,
}

type Listener = dyn Fn(&StateSnapshot);

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: Vec<(u64, Rc<Listener>)>,
}

/// Handle returned by [`Store::subscribe`]. Dropping it keeps the listener
/// registered; call [`Subscription::unsubscribe`] to remove it.
pub struct Subscription {
    id: u64,
    listeners: Weak<RefCell<Listeners>>,
}

impl Subscription {
    pub fn unsubscribe(&self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.borrow_mut().entries.retain(|(id, _)| *id != self.id);
        }
    }
}

pub struct Store {
    state: StateSnapshot,
    persistence: Persistence,
    listeners: Rc<RefCell<Listeners>>,
    clock: Box<dyn Fn() -> DateTime<Utc>>,
}

impl Store {
    /// Builds the store from defaults overlaid with whatever `kv` holds.
    pub fn open(kv: Box<dyn KeyValueStore>) -> Self {
        let persistence = Persistence::new(kv);
        let mut state = StateSnapshot::default();

        if let Some(doc) = persistence.load() {
            if let Some(api_key) = doc.api_key {
                state.settings.api_key = api_key;
            }
            if let Some(model) = doc.model {
                state.settings.model = model.parse().unwrap_or_else(|e: String| {
                    tracing::warn!(error = %e, "falling back to default model");
                    ModelId::default()
                });
            }
            if let Some(dark_mode) = doc.dark_mode {
                state.settings.dark_mode = dark_mode;
            }
            if let Some(mut classes) = doc.classes {
                let dropped = normalize_classes(&mut classes);
                if dropped > 0 {
                    tracing::warn!(dropped, "dropped stored records with repeated ids");
                }
                state.classes = classes;
            }
            if let Some(lessons) = doc.lessons {
                state.lessons = lessons;
            }
            if let Some(entries) = doc.recent_activity {
                state.recent_activity = ActivityLog::from_entries(entries);
            }
        }
        if let Some(mut book) = persistence.load_admin() {
            book.normalize();
            state.admin = book;
        }

        tracing::info!(
            classes = state.classes.len(),
            lessons = state.lessons.len(),
            events = state.admin.events.len(),
            "store opened"
        );

        Self {
            state,
            persistence,
            listeners: Rc::default(),
            clock: Box::new(Utc::now),
        }
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    #[cfg(test)]
    pub fn snapshot(&self) -> StateSnapshot {
        self.state.clone()
    }

    pub fn last_persist_error(&self) -> Option<&str> {
        self.persistence.last_error()
    }

    //
    // Change propagation
    //

    pub fn subscribe(&self, listener: impl Fn(&StateSnapshot) + 'static) -> Subscription {
        let mut listeners = self.listeners.borrow_mut();
        listeners.next_id += 1;
        let id = listeners.next_id;
        listeners.entries.push((id, Rc::new(listener)));
        Subscription {
            id,
            listeners: Rc::downgrade(&self.listeners),
        }
    }

    fn notify(&self) {
        // Clone the handles out so a listener may unsubscribe while being called.
        let current: Vec<Rc<Listener>> = self
            .listeners
            .borrow()
            .entries
            .iter()
            .map(|(_, l)| Rc::clone(l))
            .collect();
        if current.is_empty() {
            return;
        }
        let snapshot = self.state.clone();
        for listener in current {
            listener(&snapshot);
        }
    }

    fn document(&self) -> PersistedDocument {
        PersistedDocument {
            api_key: Some(self.state.settings.api_key.clone()),
            model: Some(self.state.settings.model.as_str().to_string()),
            dark_mode: Some(self.state.settings.dark_mode),
            classes: Some(self.state.classes.clone()),
            lessons: Some(self.state.lessons.clone()),
            recent_activity: Some(self.state.recent_activity.entries().to_vec()),
        }
    }

    fn commit(&mut self) {
        let doc = self.document();
        self.persistence.save(&doc);
        self.notify();
    }

    fn commit_admin(&mut self) {
        self.persistence.save_admin(&self.state.admin);
        self.notify();
    }

    //
    // Settings
    //

    pub fn settings(&self) -> Settings {
        self.state.settings.clone()
    }

    pub fn get(&self, key: &str) -> Option<JsonValue> {
        match key {
            SETTING_API_KEY => Some(json!(self.state.settings.api_key)),
            SETTING_MODEL => Some(json!(self.state.settings.model.as_str())),
            SETTING_DARK_MODE => Some(json!(self.state.settings.dark_mode)),
            _ => None,
        }
    }

    pub fn set(&mut self, key: &str, value: JsonValue) -> Result<(), StoreError> {
        let invalid = |reason: &str| StoreError::InvalidSetting {
            key: key.to_string(),
            reason: reason.to_string(),
        };
        match key {
            SETTING_API_KEY => {
                let v = value.as_str().ok_or_else(|| invalid("must be a string"))?;
                self.state.settings.api_key = v.trim().to_string();
            }
            SETTING_MODEL => {
                let v = value.as_str().ok_or_else(|| invalid("must be a string"))?;
                self.state.settings.model = v.parse().map_err(|e: String| invalid(&e))?;
            }
            SETTING_DARK_MODE => {
                self.state.settings.dark_mode =
                    value.as_bool().ok_or_else(|| invalid("must be a boolean"))?;
            }
            other => return Err(StoreError::UnknownSetting(other.to_string())),
        }
        tracing::info!(setting = key, "setting updated");
        self.persistence.save_settings(&self.state.settings);
        self.commit();
        Ok(())
    }

    //
    // Classes
    //

    pub fn classes(&self) -> Vec<ClassRecord> {
        self.state.classes.clone()
    }

    pub fn class(&self, id: &str) -> Option<ClassRecord> {
        self.state.classes.iter().find(|c| c.id == id).cloned()
    }

    pub fn add_class(&mut self, input: &NewClass) -> ClassRecord {
        let now = self.now();
        let class = ClassRecord::new(input, now);
        self.state.classes.push(class.clone());
        self.state.recent_activity.record(
            ActivityType::ClassCreated,
            format!("Created class {}", class.name),
            now,
        );
        tracing::info!(class_id = %class.id, "class created");
        self.commit();
        class
    }

    /// Runs `f` on the class; when it yields `Some`, stamps `updated_at` and commits.
    fn modify_class<R>(
        &mut self,
        class_id: &str,
        f: impl FnOnce(&mut ClassRecord, DateTime<Utc>) -> Option<R>,
    ) -> Option<R> {
        let now = self.now();
        let class = self.state.classes.iter_mut().find(|c| c.id == class_id)?;
        let out = f(&mut *class, now)?;
        class.updated_at = now;
        self.commit();
        Some(out)
    }

    pub fn update_class(&mut self, id: &str, patch: &ClassPatch) -> bool {
        self.modify_class(id, |class, _| {
            class.apply(patch);
            Some(())
        })
        .is_some()
    }

    /// Removes the class with its students and notes. Lessons pointing at it stay.
    pub fn delete_class(&mut self, id: &str) -> bool {
        let Some(pos) = self.state.classes.iter().position(|c| c.id == id) else {
            return false;
        };
        let now = self.now();
        let removed = self.state.classes.remove(pos);
        self.state.recent_activity.record(
            ActivityType::ClassDeleted,
            format!("Deleted class {}", removed.name),
            now,
        );
        tracing::info!(class_id = %removed.id, "class deleted");
        self.commit();
        true
    }

    //
    // Students
    //

    pub fn add_student(&mut self, class_id: &str, input: &NewStudent) -> Option<StudentRecord> {
        let now = self.now();
        let class = self.state.classes.iter_mut().find(|c| c.id == class_id)?;
        let student = StudentRecord::new(input, now);
        class.students.push(student.clone());
        class.updated_at = now;
        let description = format!("Added {} to {}", student.name, class.name);
        self.state
            .recent_activity
            .record(ActivityType::StudentAdded, description, now);
        tracing::info!(class_id, student_id = %student.id, "student added");
        self.commit();
        Some(student)
    }

    /// Score edits never touch `e21cc_history`.
    pub fn update_student(&mut self, class_id: &str, student_id: &str, patch: &StudentPatch) -> bool {
        self.modify_class(class_id, |class, _| {
            let student = class.student_mut(student_id)?;
            if let Some(name) = patch.name.as_deref() {
                let name = name.trim();
                if !name.is_empty() {
                    student.name = name.to_string();
                }
            }
            if let Some(scores) = patch.e21cc.as_ref() {
                student.e21cc = student.e21cc.merged(scores);
            }
            Some(())
        })
        .is_some()
    }

    pub fn remove_student(&mut self, class_id: &str, student_id: &str) -> bool {
        self.modify_class(class_id, |class, _| {
            let pos = class.students.iter().position(|s| s.id == student_id)?;
            class.students.remove(pos);
            Some(())
        })
        .is_some()
    }

    /// Shifts every student's scores by `deltas` and snapshots them with one
    /// shared timestamp. A missing class adjusts nobody.
    pub fn batch_adjust(&mut self, class_id: &str, deltas: &ScoreDeltas) -> Result<usize, StoreError> {
        if deltas.is_zero() {
            return Err(StoreError::NoChanges);
        }
        let applied = self
            .modify_class(class_id, |class, now| {
                Some(history::adjust_class(class, deltas, now))
            })
            .unwrap_or(0);
        tracing::info!(class_id, applied, "batch competency adjustment");
        Ok(applied)
    }

    pub fn class_trend(&self, class_id: &str) -> Option<ClassTrend> {
        self.state
            .classes
            .iter()
            .find(|c| c.id == class_id)
            .map(history::trend_for)
    }

    //
    // Notes
    //

    pub fn add_note(&mut self, class_id: &str, text: &str) -> Result<Option<NoteRecord>, StoreError> {
        if text.trim().is_empty() {
            return Err(StoreError::EmptyField("text"));
        }
        Ok(self.modify_class(class_id, |class, now| {
            let note = NoteRecord::new(text, now);
            class.notes.insert(0, note.clone());
            Some(note)
        }))
    }

    pub fn update_note(&mut self, class_id: &str, note_id: &str, patch: &NotePatch) -> bool {
        self.modify_class(class_id, |class, _| {
            let note = class.note_mut(note_id)?;
            if let Some(text) = patch.text.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
                note.text = text.to_string();
            }
            if let Some(summary) = patch.summary.as_deref() {
                let summary = summary.trim();
                note.summary = (!summary.is_empty()).then(|| summary.to_string());
            }
            Some(())
        })
        .is_some()
    }

    pub fn delete_note(&mut self, class_id: &str, note_id: &str) -> bool {
        self.modify_class(class_id, |class, _| {
            let pos = class.notes.iter().position(|n| n.id == note_id)?;
            class.notes.remove(pos);
            Some(())
        })
        .is_some()
    }

    //
    // Lessons
    //

    pub fn lessons(&self) -> Vec<LessonRecord> {
        self.state.lessons.clone()
    }

    pub fn lessons_for_class(&self, class_id: &str) -> Vec<LessonRecord> {
        self.state
            .lessons
            .iter()
            .filter(|l| l.class_id.as_deref() == Some(class_id))
            .cloned()
            .collect()
    }

    /// Inserts or replaces by id; a blank id gets a fresh one.
    pub fn save_lesson(&mut self, mut lesson: LessonRecord) -> LessonRecord {
        let now = self.now();
        if lesson.id.trim().is_empty() {
            lesson.id = new_id();
        }
        lesson.updated_at = Some(now);
        match self.state.lessons.iter_mut().find(|l| l.id == lesson.id) {
            Some(existing) => {
                lesson.created_at = existing.created_at.or(lesson.created_at).or(Some(now));
                *existing = lesson.clone();
            }
            None => {
                lesson.created_at = lesson.created_at.or(Some(now));
                self.state.lessons.push(lesson.clone());
            }
        }
        self.commit();
        lesson
    }

    pub fn delete_lesson(&mut self, id: &str) -> bool {
        let Some(pos) = self.state.lessons.iter().position(|l| l.id == id) else {
            return false;
        };
        self.state.lessons.remove(pos);
        self.commit();
        true
    }

    //
    // Activity, import/export, reset
    //

    pub fn recent_activity(&self) -> Vec<ActivityEntry> {
        self.state.recent_activity.entries().to_vec()
    }

    pub fn export_data(&self) -> anyhow::Result<String> {
        exchange::encode(
            &self.state.classes,
            &self.state.lessons,
            self.state.recent_activity.entries(),
            self.now(),
        )
    }

    /// Replaces each collection the document carries; leaves the rest alone.
    /// Returns `false` without touching state when the text is unusable.
    pub fn import_data(&mut self, text: &str) -> bool {
        let doc = match exchange::decode(text) {
            Ok(doc) => doc,
            Err(e) => {
                tracing::warn!(error = %format!("{e:#}"), "import rejected");
                return false;
            }
        };
        if let Some(classes) = doc.classes {
            self.state.classes = classes;
        }
        if let Some(lessons) = doc.lessons {
            self.state.lessons = lessons;
        }
        if let Some(entries) = doc.recent_activity {
            self.state.recent_activity = ActivityLog::from_entries(entries);
        }
        tracing::info!(classes = self.state.classes.len(), "data imported");
        self.commit();
        true
    }

    /// Drops classes, lessons, activity and the chat transcript. Settings and
    /// admin records survive.
    pub fn clear_all_data(&mut self) {
        self.state.classes.clear();
        self.state.lessons.clear();
        self.state.recent_activity.clear();
        self.state.chat_history.clear();
        tracing::info!("all class data cleared");
        self.commit();
    }

    //
    // Chat transcript (in memory only)
    //

    pub fn chat_history(&self) -> Vec<ChatMessage> {
        self.state.chat_history.clone()
    }

    /// Records a prompt and its reply as one change. The transcript is not
    /// persisted, so only listeners hear about it.
    pub fn push_chat_exchange(&mut self, user: ChatMessage, reply: ChatMessage) {
        self.state.chat_history.push(user);
        self.state.chat_history.push(reply);
        self.notify();
    }

    //
    // Admin events and AORs
    //

    pub fn events(&self) -> Vec<AdminEvent> {
        self.state.admin.events.clone()
    }

    pub fn event(&self, id: &str) -> Option<AdminEvent> {
        self.state.admin.events.iter().find(|e| e.id == id).cloned()
    }

    pub fn create_event(&mut self, input: &NewEvent) -> Result<AdminEvent, StoreError> {
        let name = input.name.trim();
        if name.is_empty() {
            return Err(StoreError::EmptyField("name"));
        }
        let event = AdminEvent::new(name, input, self.now());
        self.state.admin.events.push(event.clone());
        tracing::info!(event_id = %event.id, "admin event created");
        self.commit_admin();
        Ok(event)
    }

    fn modify_event<R>(
        &mut self,
        event_id: &str,
        f: impl FnOnce(&mut AdminEvent) -> Option<R>,
    ) -> Option<R> {
        let now = self.now();
        let event = self.state.admin.event_mut(event_id)?;
        let out = f(&mut *event)?;
        event.refresh_status();
        event.updated_at = now;
        self.commit_admin();
        Some(out)
    }

    pub fn update_event(&mut self, id: &str, patch: &EventPatch) -> Result<bool, StoreError> {
        let name = match patch.name.as_deref().map(str::trim) {
            Some("") => return Err(StoreError::EmptyField("name")),
            other => other,
        };
        Ok(self
            .modify_event(id, |event| {
                if let Some(name) = name {
                    event.name = name.to_string();
                }
                if let Some(date) = patch.date.as_deref() {
                    let date = date.trim();
                    event.date = (!date.is_empty()).then(|| date.to_string());
                }
                if let Some(kind) = patch.event_type {
                    event.event_type = kind;
                }
                Some(())
            })
            .is_some())
    }

    pub fn delete_event(&mut self, id: &str) -> bool {
        let before = self.state.admin.events.len();
        self.state.admin.events.retain(|e| e.id != id);
        if self.state.admin.events.len() == before {
            return false;
        }
        self.commit_admin();
        true
    }

    pub fn set_task_enabled(&mut self, event_id: &str, task_key: &str, enabled: bool) -> bool {
        self.modify_event(event_id, |event| {
            event.task_mut(task_key)?.enabled = enabled;
            Some(())
        })
        .is_some()
    }

    pub fn set_task_status(&mut self, event_id: &str, task_key: &str, status: TaskStatus) -> bool {
        self.modify_event(event_id, |event| {
            event.task_mut(task_key)?.status = status;
            Some(())
        })
        .is_some()
    }

    /// Merges `data` into the task's saved fields. Blank values remove a
    /// field; ids the task template does not define are ignored.
    pub fn save_task_data(
        &mut self,
        event_id: &str,
        task_key: &str,
        data: &BTreeMap<String, String>,
    ) -> bool {
        let Some(template) = admin::template(task_key) else {
            return false;
        };
        self.modify_event(event_id, |event| {
            let task = event.task_mut(task_key)?;
            for (field, value) in data {
                if !template.fields.contains(&field.as_str()) {
                    tracing::debug!(task = task_key, field = %field, "ignoring unknown task field");
                    continue;
                }
                let value = value.trim();
                if value.is_empty() {
                    task.data.remove(field);
                } else {
                    task.data.insert(field.clone(), value.to_string());
                }
            }
            Some(())
        })
        .is_some()
    }

    pub fn aors(&self) -> Vec<AdminAor> {
        self.state.admin.aors.clone()
    }

    pub fn add_aor(&mut self, input: &NewAor) -> AdminAor {
        let aor = AdminAor::new(input, self.now());
        self.state.admin.aors.push(aor.clone());
        tracing::info!(aor_id = %aor.id, "AOR recorded");
        self.commit_admin();
        aor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::ACTIVITY_LIMIT;
    use crate::admin::EventStatus;
    use crate::model::{ChatRole, ScorePatch, DEFAULT_CLASS_NAME, HISTORY_LIMIT};
    use crate::persist::{MemoryStore, ADMIN_KEY, LEGACY_API_KEY, LEGACY_MODEL_KEY, STATE_KEY};
    use chrono::Duration;
    use std::cell::Cell;

    fn store() -> Store {
        Store::open(Box::new(MemoryStore::default()))
    }

    /// A store whose clock advances one second per reading.
    fn ticking_store(kv: MemoryStore) -> Store {
        let start = Utc::now();
        let ticks = Cell::new(0i64);
        Store::open(Box::new(kv)).with_clock(move || {
            ticks.set(ticks.get() + 1);
            start + Duration::seconds(ticks.get())
        })
    }

    fn class_with_students(store: &mut Store, n: usize) -> String {
        let class = store.add_class(&NewClass {
            name: Some("3A".into()),
            ..NewClass::default()
        });
        for i in 0..n {
            store.add_student(
                &class.id,
                &NewStudent {
                    name: Some(format!("Student {}", i)),
                    e21cc: None,
                },
            );
        }
        class.id
    }

    #[test]
    fn add_then_get_class() {
        let mut s = store();
        let before = s.classes().len();
        let created = s.add_class(&NewClass::default());
        assert_eq!(s.classes().len(), before + 1);
        let fetched = s.class(&created.id).expect("class exists");
        assert_eq!(fetched, created);
        assert_eq!(fetched.name, DEFAULT_CLASS_NAME);
        assert!(fetched.students.is_empty() && fetched.notes.is_empty());
    }

    #[test]
    fn class_ids_are_unique() {
        let mut s = store();
        for _ in 0..50 {
            s.add_class(&NewClass::default());
        }
        let mut ids: Vec<String> = s.classes().into_iter().map(|c| c.id).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 50);
    }

    #[test]
    fn delete_class_removes_it_and_logs() {
        let mut s = store();
        let c = s.add_class(&NewClass::default());
        assert!(s.delete_class(&c.id));
        assert!(s.class(&c.id).is_none());
        assert!(s.classes().iter().all(|x| x.id != c.id));
        assert_eq!(s.recent_activity()[0].kind, ActivityType::ClassDeleted);
        assert!(!s.delete_class(&c.id));
    }

    #[test]
    fn delete_class_keeps_lessons() {
        let mut s = store();
        let c = s.add_class(&NewClass::default());
        s.save_lesson(LessonRecord {
            class_id: Some(c.id.clone()),
            ..LessonRecord::default()
        });
        s.delete_class(&c.id);
        assert_eq!(s.lessons_for_class(&c.id).len(), 1);
    }

    #[test]
    fn update_class_refreshes_updated_at() {
        let mut s = ticking_store(MemoryStore::default());
        let c = s.add_class(&NewClass::default());
        assert!(s.update_class(
            &c.id,
            &ClassPatch {
                subject: Some("Science".into()),
                ..ClassPatch::default()
            }
        ));
        let after = s.class(&c.id).unwrap();
        assert_eq!(after.subject.as_deref(), Some("Science"));
        assert_eq!(after.created_at, c.created_at);
        assert!(after.updated_at > c.updated_at);
        assert!(!s.update_class("missing", &ClassPatch::default()));
    }

    #[test]
    fn returned_records_are_copies() {
        let mut s = store();
        let c = s.add_class(&NewClass::default());
        let mut held = s.class(&c.id).unwrap();
        held.name = "changed locally".into();
        assert_eq!(s.class(&c.id).unwrap().name, DEFAULT_CLASS_NAME);
    }

    #[test]
    fn add_student_to_missing_class_is_soft_failure() {
        let mut s = store();
        let c = s.add_class(&NewClass::default());
        let before = s.snapshot();
        assert!(s.add_student("nope", &NewStudent::default()).is_none());
        assert_eq!(s.snapshot(), before);
        assert!(s.class(&c.id).unwrap().students.is_empty());
    }

    #[test]
    fn update_student_scores_keep_history() {
        let mut s = store();
        let class_id = class_with_students(&mut s, 1);
        let sid = s.class(&class_id).unwrap().students[0].id.clone();
        s.batch_adjust(&class_id, &ScoreDeltas { delta_cait: 5, ..ScoreDeltas::default() })
            .unwrap();

        assert!(s.update_student(
            &class_id,
            &sid,
            &StudentPatch {
                name: None,
                e21cc: Some(ScorePatch {
                    cci: Some(400),
                    ..ScorePatch::default()
                }),
            }
        ));
        let student = &s.class(&class_id).unwrap().students[0];
        assert_eq!(student.e21cc.cci, 100);
        assert_eq!(student.e21cc.cait, 55);
        assert_eq!(student.e21cc_history.len(), 1);
        assert_eq!(student.name, "Student 0");

        assert!(!s.update_student("missing", &sid, &StudentPatch::default()));
        assert!(!s.update_student(&class_id, "missing", &StudentPatch::default()));
    }

    #[test]
    fn remove_student_is_unaudited() {
        let mut s = store();
        let class_id = class_with_students(&mut s, 2);
        let sid = s.class(&class_id).unwrap().students[0].id.clone();
        let activity_before = s.recent_activity();
        assert!(s.remove_student(&class_id, &sid));
        assert_eq!(s.class(&class_id).unwrap().students.len(), 1);
        assert_eq!(s.recent_activity(), activity_before);
        assert!(!s.remove_student(&class_id, &sid));
    }

    #[test]
    fn batch_adjust_clamps() {
        let mut s = store();
        let c = s.add_class(&NewClass::default());
        s.add_student(
            &c.id,
            &NewStudent {
                name: None,
                e21cc: Some(ScorePatch {
                    cait: Some(95),
                    cci: Some(10),
                    cgc: Some(50),
                }),
            },
        );
        let applied = s
            .batch_adjust(
                &c.id,
                &ScoreDeltas {
                    delta_cait: 20,
                    delta_cci: -30,
                    delta_cgc: 1000,
                },
            )
            .unwrap();
        assert_eq!(applied, 1);
        let student = &s.class(&c.id).unwrap().students[0];
        assert_eq!((student.e21cc.cait, student.e21cc.cci, student.e21cc.cgc), (100, 0, 100));
        let snap = student.e21cc_history[0];
        assert_eq!((snap.cait, snap.cci, snap.cgc), (100, 0, 100));
    }

    #[test]
    fn zero_delta_batch_is_rejected_without_mutation() {
        let mut s = store();
        let class_id = class_with_students(&mut s, 3);
        let calls = Rc::new(Cell::new(0));
        let seen = Rc::clone(&calls);
        let _sub = s.subscribe(move |_| seen.set(seen.get() + 1));
        let before = s.snapshot();

        let err = s.batch_adjust(&class_id, &ScoreDeltas::default()).unwrap_err();
        assert_eq!(err, StoreError::NoChanges);
        assert_eq!(s.snapshot(), before);
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn twenty_five_batches_keep_latest_twenty() {
        let mut s = ticking_store(MemoryStore::default());
        let class_id = class_with_students(&mut s, 2);
        let mut stamps = Vec::new();
        for _ in 0..25 {
            s.batch_adjust(&class_id, &ScoreDeltas { delta_cci: 1, ..ScoreDeltas::default() })
                .unwrap();
            stamps.push(s.class(&class_id).unwrap().students[0].e21cc_history.last().unwrap().ts);
        }
        let class = s.class(&class_id).unwrap();
        for student in &class.students {
            assert_eq!(student.e21cc_history.len(), HISTORY_LIMIT);
            let ts: Vec<_> = student.e21cc_history.iter().map(|h| h.ts).collect();
            assert_eq!(ts, stamps[5..].to_vec());
        }
        assert_eq!(class.students[0].e21cc_history, class.students[1].e21cc_history);
    }

    #[test]
    fn batch_on_missing_class_adjusts_nobody() {
        let mut s = store();
        assert_eq!(
            s.batch_adjust("missing", &ScoreDeltas { delta_cgc: 3, ..ScoreDeltas::default() }),
            Ok(0)
        );
    }

    #[test]
    fn class_trend_requires_two_snapshots() {
        let mut s = ticking_store(MemoryStore::default());
        let class_id = class_with_students(&mut s, 2);
        let deltas = ScoreDeltas { delta_cait: 10, ..ScoreDeltas::default() };
        s.batch_adjust(&class_id, &deltas).unwrap();
        let trend = s.class_trend(&class_id).unwrap();
        assert!(trend.students.is_empty());
        assert!(trend.class_average.is_empty());

        s.batch_adjust(&class_id, &deltas).unwrap();
        let trend = s.class_trend(&class_id).unwrap();
        assert_eq!(trend.students.len(), 2);
        assert_eq!(trend.class_average.len(), 2);
        assert_eq!(trend.class_average[1].cait, 70.0);
        assert!(s.class_trend("missing").is_none());
    }

    #[test]
    fn notes_are_most_recent_first() {
        let mut s = store();
        let c = s.add_class(&NewClass::default());
        let first = s.add_note(&c.id, "first").unwrap().unwrap();
        let second = s.add_note(&c.id, "  second  ").unwrap().unwrap();
        let notes = s.class(&c.id).unwrap().notes;
        assert_eq!(notes[0].id, second.id);
        assert_eq!(notes[0].text, "second");
        assert_eq!(notes[1].id, first.id);
    }

    #[test]
    fn add_note_rejects_blank_and_missing_class() {
        let mut s = store();
        let c = s.add_class(&NewClass::default());
        s.add_note(&c.id, "keep me").unwrap();
        assert_eq!(s.add_note(&c.id, "   "), Err(StoreError::EmptyField("text")));
        assert_eq!(s.add_note("nope", "hello"), Ok(None));
        let notes = s.class(&c.id).unwrap().notes;
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].text, "keep me");
    }

    #[test]
    fn note_summary_set_and_clear() {
        let mut s = store();
        let c = s.add_class(&NewClass::default());
        let note = s.add_note(&c.id, "long observation").unwrap().unwrap();
        assert!(s.update_note(
            &c.id,
            &note.id,
            &NotePatch {
                text: None,
                summary: Some("short".into()),
            }
        ));
        assert_eq!(s.class(&c.id).unwrap().notes[0].summary.as_deref(), Some("short"));
        s.update_note(
            &c.id,
            &note.id,
            &NotePatch {
                text: Some(" ".into()),
                summary: Some(String::new()),
            },
        );
        let stored = &s.class(&c.id).unwrap().notes[0];
        assert_eq!(stored.summary, None);
        assert_eq!(stored.text, "long observation");
        assert!(s.delete_note(&c.id, &note.id));
        assert!(!s.delete_note(&c.id, &note.id));
        assert!(!s.update_note("missing", &note.id, &NotePatch::default()));
    }

    #[test]
    fn note_and_lesson_mutations_are_unaudited() {
        let mut s = store();
        let c = s.add_class(&NewClass::default());
        let before = s.recent_activity();
        let note = s.add_note(&c.id, "x").unwrap().unwrap();
        s.delete_note(&c.id, &note.id);
        let lesson = s.save_lesson(LessonRecord::default());
        s.delete_lesson(&lesson.id);
        assert_eq!(s.recent_activity(), before);
    }

    #[test]
    fn twenty_five_classes_leave_twenty_entries() {
        let mut s = ticking_store(MemoryStore::default());
        for i in 0..25 {
            s.add_class(&NewClass {
                name: Some(format!("Class {}", i)),
                ..NewClass::default()
            });
        }
        let activity = s.recent_activity();
        assert_eq!(activity.len(), ACTIVITY_LIMIT);
        assert_eq!(activity[0].description, "Created class Class 24");
        assert_eq!(activity[19].description, "Created class Class 5");
        assert!(activity.windows(2).all(|w| w[0].timestamp > w[1].timestamp));
    }

    #[test]
    fn save_lesson_upserts() {
        let mut s = ticking_store(MemoryStore::default());
        let mut fields = serde_json::Map::new();
        fields.insert("title".into(), json!("Fractions"));
        let created = s.save_lesson(LessonRecord {
            class_id: Some("c1".into()),
            fields,
            ..LessonRecord::default()
        });
        assert!(!created.id.is_empty());

        let mut edited = created.clone();
        edited.fields.insert("title".into(), json!("Decimals"));
        edited.created_at = None;
        let saved = s.save_lesson(edited);
        assert_eq!(saved.created_at, created.created_at);
        assert!(saved.updated_at > created.updated_at);

        assert_eq!(s.lessons().len(), 1);
        assert_eq!(s.lessons_for_class("c1")[0].fields["title"], json!("Decimals"));
        assert!(s.lessons_for_class("c2").is_empty());
    }

    #[test]
    fn export_import_round_trip() {
        let mut s = store();
        let class_id = class_with_students(&mut s, 3);
        s.add_note(&class_id, "observed group work").unwrap();
        s.batch_adjust(&class_id, &ScoreDeltas { delta_cait: -7, ..ScoreDeltas::default() })
            .unwrap();
        s.save_lesson(LessonRecord {
            class_id: Some(class_id.clone()),
            ..LessonRecord::default()
        });

        let classes = s.classes();
        let lessons = s.lessons();
        let activity = s.recent_activity();
        let text = s.export_data().unwrap();

        s.clear_all_data();
        assert!(s.classes().is_empty());
        assert!(s.import_data(&text));
        assert_eq!(s.classes(), classes);
        assert_eq!(s.lessons(), lessons);
        assert_eq!(s.recent_activity(), activity);
    }

    #[test]
    fn import_garbage_leaves_state() {
        let mut s = store();
        s.add_class(&NewClass::default());
        let before = s.snapshot();
        assert!(!s.import_data("not json"));
        assert!(!s.import_data(r#"{"classes": {"id": "x"}}"#));
        assert_eq!(s.snapshot(), before);
    }

    #[test]
    fn import_keeps_absent_collections() {
        let mut s = store();
        let c = s.add_class(&NewClass::default());
        assert!(s.import_data(r#"{"version": 1, "lessons": [{"id": "l1"}]}"#));
        assert_eq!(s.classes().len(), 1);
        assert_eq!(s.classes()[0].id, c.id);
        assert_eq!(s.lessons().len(), 1);
    }

    #[test]
    fn clear_keeps_settings_and_admin() {
        let mut s = store();
        s.set(SETTING_DARK_MODE, json!(true)).unwrap();
        s.set(SETTING_API_KEY, json!("sk-test-0123456789abcdef")).unwrap();
        s.add_class(&NewClass::default());
        s.push_chat_exchange(
            ChatMessage::new(ChatRole::User, "hi"),
            ChatMessage::new(ChatRole::Assistant, "hello"),
        );
        s.create_event(&NewEvent {
            name: "Camp".into(),
            ..NewEvent::default()
        })
        .unwrap();

        s.clear_all_data();
        let snap = s.snapshot();
        assert!(snap.classes.is_empty());
        assert!(snap.lessons.is_empty());
        assert!(snap.recent_activity.entries().is_empty());
        assert!(snap.chat_history.is_empty());
        assert!(snap.settings.dark_mode);
        assert_eq!(snap.settings.api_key, "sk-test-0123456789abcdef");
        assert_eq!(snap.admin.events.len(), 1);
    }

    #[test]
    fn settings_validate_before_mutation() {
        let mut s = store();
        assert_eq!(s.get(SETTING_MODEL), Some(json!("gpt-4o-mini")));
        s.set(SETTING_MODEL, json!("gpt-4.1")).unwrap();
        assert_eq!(s.settings().model, ModelId::Gpt41);
        assert!(matches!(
            s.set(SETTING_MODEL, json!("gpt-2")),
            Err(StoreError::InvalidSetting { .. })
        ));
        assert!(matches!(
            s.set(SETTING_DARK_MODE, json!("yes")),
            Err(StoreError::InvalidSetting { .. })
        ));
        assert_eq!(
            s.set("fontSize", json!(12)),
            Err(StoreError::UnknownSetting("fontSize".into()))
        );
        assert_eq!(s.get("fontSize"), None);
        assert_eq!(s.settings().model, ModelId::Gpt41);
    }

    #[test]
    fn subscriber_sees_each_mutation_once() {
        let mut s = store();
        let calls = Rc::new(Cell::new(0));
        let seen = Rc::clone(&calls);
        let sub = s.subscribe(move |_| seen.set(seen.get() + 1));

        let c = s.add_class(&NewClass::default());
        s.add_student(&c.id, &NewStudent::default());
        s.add_note(&c.id, "n").unwrap();
        s.set(SETTING_DARK_MODE, json!(true)).unwrap();
        assert_eq!(calls.get(), 4);

        // Soft-absence no-ops and rejections do not notify.
        s.delete_class("missing");
        s.add_note(&c.id, "").unwrap_err();
        assert_eq!(calls.get(), 4);

        sub.unsubscribe();
        sub.unsubscribe();
        s.add_class(&NewClass::default());
        assert_eq!(calls.get(), 4);
    }

    #[test]
    fn subscribers_run_in_registration_order_with_fresh_state() {
        let mut s = store();
        let order = Rc::new(RefCell::new(Vec::new()));
        let a = Rc::clone(&order);
        let b = Rc::clone(&order);
        let _first = s.subscribe(move |state| a.borrow_mut().push(("a", state.classes.len())));
        let _second = s.subscribe(move |state| b.borrow_mut().push(("b", state.classes.len())));
        s.add_class(&NewClass::default());
        assert_eq!(*order.borrow(), vec![("a", 1), ("b", 1)]);
    }

    #[test]
    fn reopen_restores_persisted_state() {
        let kv = MemoryStore::default();
        let mut s = Store::open(Box::new(kv.clone()));
        s.set(SETTING_MODEL, json!("gpt-4o")).unwrap();
        let class_id = class_with_students(&mut s, 2);
        s.push_chat_exchange(
            ChatMessage::new(ChatRole::User, "transient"),
            ChatMessage::new(ChatRole::Assistant, "gone on reload"),
        );
        let event = s
            .create_event(&NewEvent {
                name: "Sports day".into(),
                ..NewEvent::default()
            })
            .unwrap();
        let classes = s.classes();
        let activity = s.recent_activity();

        let reopened = Store::open(Box::new(kv.clone()));
        assert_eq!(reopened.classes(), classes);
        assert_eq!(reopened.recent_activity(), activity);
        assert_eq!(reopened.settings().model, ModelId::Gpt4o);
        assert!(reopened.chat_history().is_empty());
        assert_eq!(reopened.event(&event.id), Some(event));
        assert!(reopened.class(&class_id).is_some());
        assert_eq!(kv.raw(LEGACY_MODEL_KEY).as_deref(), Some("gpt-4o"));
        assert!(kv.raw(ADMIN_KEY).is_some());
    }

    #[test]
    fn unknown_persisted_model_falls_back() {
        let kv = MemoryStore::default();
        kv.put_raw(STATE_KEY, r#"{"model": "gpt-9", "darkMode": true}"#);
        let s = Store::open(Box::new(kv));
        assert_eq!(s.settings().model, ModelId::default());
        assert!(s.settings().dark_mode);
        assert!(s.classes().is_empty());
    }

    #[test]
    fn persistence_failure_keeps_memory_state() {
        let mut s = Store::open(Box::new(MemoryStore::with_quota(64)));
        let c = s.add_class(&NewClass {
            name: Some("A class whose record will not fit in sixty-four bytes".into()),
            ..NewClass::default()
        });
        assert!(s.last_persist_error().is_some());
        assert!(s.class(&c.id).is_some());
    }

    #[test]
    fn reopen_normalizes_stored_classes() {
        let history: Vec<JsonValue> = (0..25)
            .map(|i| {
                json!({
                    "ts": (Utc::now() + Duration::seconds(i)).to_rfc3339(),
                    "cait": i, "cci": 50, "cgc": 50
                })
            })
            .collect();
        let student = json!({"id": "s1", "name": "Ana", "e21ccHistory": history});
        let class = json!({"id": "c1", "name": "3A", "students": [student.clone(), student]});
        let kv = MemoryStore::default();
        kv.put_raw(
            STATE_KEY,
            &json!({"classes": [class.clone(), class]}).to_string(),
        );

        let s = Store::open(Box::new(kv));
        let classes = s.classes();
        assert_eq!(classes.len(), 1);
        assert_eq!(classes[0].students.len(), 1);
        let kept = &classes[0].students[0].e21cc_history;
        assert_eq!(kept.len(), HISTORY_LIMIT);
        assert_eq!(kept[0].cait, 5);
        assert_eq!(kept[HISTORY_LIMIT - 1].cait, 24);
    }

    #[test]
    fn chat_exchange_notifies_once_without_writing() {
        let kv = MemoryStore::default();
        let mut s = Store::open(Box::new(kv.clone()));
        let calls = Rc::new(Cell::new(0));
        let seen = Rc::clone(&calls);
        let _sub = s.subscribe(move |state| {
            seen.set(seen.get() + 1);
            assert_eq!(state.chat_history.len(), 2);
        });

        s.push_chat_exchange(
            ChatMessage::new(ChatRole::User, "plan a lesson"),
            ChatMessage::new(ChatRole::Assistant, "here is one"),
        );
        assert_eq!(calls.get(), 1);
        assert_eq!(s.chat_history().len(), 2);
        assert_eq!(kv.raw(STATE_KEY), None);
    }

    #[test]
    fn mirror_keys_follow_settings_changes_only() {
        let kv = MemoryStore::default();
        let mut s = Store::open(Box::new(kv.clone()));
        s.add_class(&NewClass::default());
        assert!(kv.raw(STATE_KEY).is_some());
        assert_eq!(kv.raw(LEGACY_MODEL_KEY), None);
        assert_eq!(kv.raw(LEGACY_API_KEY), None);

        s.set(SETTING_MODEL, json!("gpt-4.1")).unwrap();
        assert_eq!(kv.raw(LEGACY_MODEL_KEY).as_deref(), Some("gpt-4.1"));
    }

    #[test]
    fn admin_event_lifecycle() {
        let mut s = store();
        assert_eq!(
            s.create_event(&NewEvent::default()),
            Err(StoreError::EmptyField("name"))
        );
        let e = s
            .create_event(&NewEvent {
                name: " Museum visit ".into(),
                date: Some("2026-11-02".into()),
                event_type: None,
            })
            .unwrap();
        assert_eq!(e.name, "Museum visit");
        assert_eq!(e.status, EventStatus::Planning);

        let mut data = BTreeMap::new();
        data.insert("provider".to_string(), "City Buses".to_string());
        data.insert("colour".to_string(), "yellow".to_string());
        assert!(s.save_task_data(&e.id, "transport", &data));
        let stored = s.event(&e.id).unwrap();
        assert_eq!(stored.status, EventStatus::InProgress);
        let transport = stored.tasks.iter().find(|t| t.key == "transport").unwrap();
        assert_eq!(transport.data.len(), 1);

        for key in ["proposal", "risk_assessment", "parent_consent", "transport", "staffing"] {
            assert!(s.set_task_status(&e.id, key, TaskStatus::Completed));
        }
        assert!(s.set_task_enabled(&e.id, "budget", false));
        assert_eq!(s.event(&e.id).unwrap().status, EventStatus::InProgress);
        assert!(s.set_task_status(&e.id, "review", TaskStatus::Completed));
        assert_eq!(s.event(&e.id).unwrap().status, EventStatus::Completed);

        assert!(!s.set_task_status(&e.id, "catering", TaskStatus::Completed));
        assert!(!s.save_task_data(&e.id, "catering", &data));
        assert!(!s.set_task_enabled("missing", "budget", true));

        assert_eq!(
            s.update_event(&e.id, &EventPatch { name: Some("  ".into()), ..EventPatch::default() }),
            Err(StoreError::EmptyField("name"))
        );
        assert_eq!(
            s.update_event(&e.id, &EventPatch { date: Some(String::new()), ..EventPatch::default() }),
            Ok(true)
        );
        assert_eq!(s.event(&e.id).unwrap().date, None);
        assert!(s.delete_event(&e.id));
        assert!(s.event(&e.id).is_none());
        assert!(!s.delete_event(&e.id));
    }

    #[test]
    fn aors_start_pending() {
        let mut s = store();
        let aor = s.add_aor(&NewAor {
            desc: "Bus hire".into(),
            cost: "450".into(),
            ..NewAor::default()
        });
        assert_eq!(aor.status, admin::AOR_PENDING);
        assert_eq!(s.aors(), vec![aor]);
    }
}
