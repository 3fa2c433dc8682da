use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use crate::lists::ListStore;
use crate::session::{AuthState, SessionContext, SessionWatch, StorageKey};
use crate::storage::KeyValueStore;
use crate::task::{Priority, Task};
use crate::todos::TaskStore;
use crate::view::{FilterMode, ViewQuery};
use crate::writer::WriteQueue;

/// Task and list stores bound to one session.
///
/// The workspace follows the session through its `SessionWatch`: while a
/// session change is resolving the stores are suspended, and when the
/// storage key changes both stores are reloaded under the new key.
#[derive(Debug)]
pub struct Workspace {
    kv: Arc<dyn KeyValueStore>,
    writer: WriteQueue,
    watch: SessionWatch,
    key: Option<StorageKey>,
    suspended: bool,
    tasks: TaskStore,
    lists: ListStore,
}

impl Workspace {
    pub fn attach(
        session: &mut SessionContext,
        kv: Arc<dyn KeyValueStore>,
        writer: WriteQueue,
        now: DateTime<Utc>,
    ) -> Self {
        let mut ws = Self {
            watch: session.subscribe(),
            tasks: TaskStore::new(writer.clone()),
            lists: ListStore::new(writer.clone()),
            kv,
            writer,
            key: None,
            suspended: false,
        };
        ws.sync(now);
        ws
    }

    /// Applies every session transition delivered since the last call.
    pub fn sync(&mut self, now: DateTime<Utc>) {
        for state in self.watch.pending() {
            self.apply(state, now);
        }
    }

    #[instrument(skip(self, state, now), fields(loading = state.loading))]
    fn apply(&mut self, state: AuthState, now: DateTime<Utc>) {
        if state.loading {
            debug!("session resolving; suspending stores");
            self.suspended = true;
            return;
        }
        self.suspended = false;

        let next = state.storage_key();
        if next == self.key {
            return;
        }

        self.tasks.unload();
        self.lists.unload();
        // Writes queued under the previous key land before we read again.
        self.writer.flush();

        if let Some(key) = &next {
            self.tasks.load(key.clone(), self.kv.as_ref(), now);
            self.lists.load(key.clone(), self.kv.as_ref());
            info!(user = %key.user_id(), "workspace bound");
        } else {
            info!("workspace unbound");
        }
        self.key = next;
    }

    pub fn is_ready(&self) -> bool {
        !self.suspended && self.tasks.is_bound() && self.lists.is_bound()
    }

    pub fn key(&self) -> Option<&StorageKey> {
        self.key.as_ref()
    }

    pub fn tasks(&self) -> &TaskStore {
        &self.tasks
    }

    pub fn lists(&self) -> &ListStore {
        &self.lists
    }

    /// `None` while signed out or while the session is resolving.
    pub fn tasks_mut(&mut self) -> Option<&mut TaskStore> {
        if !self.is_ready() {
            return None;
        }
        Some(&mut self.tasks)
    }

    pub fn lists_mut(&mut self) -> Option<&mut ListStore> {
        if !self.is_ready() {
            return None;
        }
        Some(&mut self.lists)
    }

    /// Adds a task to `list_id`, or the selected list when `None`. The
    /// target list has to exist.
    pub fn add_task(
        &mut self,
        text: &str,
        priority: Priority,
        list_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Option<Task> {
        if !self.is_ready() {
            return None;
        }
        let target = list_id.unwrap_or(self.lists.selected()).to_string();
        if !self.lists.contains(&target) {
            warn!(list = %target, "refusing to add task to unknown list");
            return None;
        }
        self.tasks.create(text, priority, &target, now).cloned()
    }

    /// View of the selected list.
    pub fn view(&self, mode: FilterMode, query: &str) -> Vec<&Task> {
        if !self.is_ready() {
            return vec![];
        }
        self.tasks
            .view(&ViewQuery::new(mode, query, self.lists.selected()))
    }

    pub fn flush(&self) {
        self.writer.flush();
    }
}
