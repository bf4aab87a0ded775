use std::cell::Cell;
use std::path::PathBuf;
use std::rc::Rc;

use serde::Deserialize;

use crate::assistant::ChatService;
use crate::config::Config;
use crate::db::{self, SqliteKv};
use crate::store::{Store, Subscription};

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub config: Config,
    pub workspace: Option<PathBuf>,
    pub store: Option<Store>,
    pub chat: Box<dyn ChatService>,
    /// Bumped by a store listener on every committed change.
    pub revision: Rc<Cell<u64>>,
    subscription: Option<Subscription>,
}

impl AppState {
    pub fn new(config: Config, chat: Box<dyn ChatService>) -> Self {
        Self {
            config,
            workspace: None,
            store: None,
            chat,
            revision: Rc::default(),
            subscription: None,
        }
    }

    /// Opens the workspace database and replaces the current store with one
    /// loaded from it. The previous store stays in place if opening fails.
    pub fn select_workspace(&mut self, path: PathBuf) -> anyhow::Result<()> {
        let conn = db::open_db(&path)?;
        let store = Store::open(Box::new(SqliteKv::new(
            conn,
            self.config.storage_quota_bytes,
        )));

        if let Some(old) = self.subscription.take() {
            old.unsubscribe();
        }
        let revision = Rc::clone(&self.revision);
        self.subscription = Some(store.subscribe(move |_| revision.set(revision.get() + 1)));

        tracing::info!(workspace = %path.to_string_lossy(), "workspace selected");
        self.workspace = Some(path);
        self.store = Some(store);
        Ok(())
    }
}
