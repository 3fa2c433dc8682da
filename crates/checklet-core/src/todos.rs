use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use crate::session::StorageKey;
use crate::storage::KeyValueStore;
use crate::task::{Priority, Task, decode_tasks};
use crate::view::{ViewQuery, project};
use crate::writer::WriteQueue;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    pub pending: usize,
    pub done: usize,
}

/// Ordered task collection for the signed-in user, newest first.
///
/// Every operation is a no-op until `load` binds the store to a
/// `StorageKey`. Each successful mutation writes the whole collection
/// through the `WriteQueue`, unless the stored collection could not be read,
/// in which case the store works in memory only until the next `load`.
#[derive(Debug)]
pub struct TaskStore {
    key: Option<StorageKey>,
    items: Vec<Task>,
    durable: bool,
    writer: WriteQueue,
}

impl TaskStore {
    pub fn new(writer: WriteQueue) -> Self {
        Self {
            key: None,
            items: vec![],
            durable: false,
            writer,
        }
    }

    #[instrument(skip(self, kv, now), fields(user = %key.user_id()))]
    pub fn load(&mut self, key: StorageKey, kv: &dyn KeyValueStore, now: DateTime<Utc>) {
        let loaded = match kv.get(&key.todos()) {
            Ok(Some(raw)) => decode_tasks(&raw, now),
            Ok(None) => Ok(vec![]),
            Err(err) => Err(err),
        };
        match loaded {
            Ok(items) => {
                self.items = items;
                self.durable = true;
            }
            Err(err) => {
                warn!(error = %err, "stored tasks unavailable; working in memory only");
                self.items = vec![];
                self.durable = false;
            }
        }
        info!(count = self.items.len(), durable = self.durable, "loaded tasks");
        self.key = Some(key);
    }

    /// Drops the in-memory collection. Persisted data stays under the old key.
    pub fn unload(&mut self) {
        self.key = None;
        self.items.clear();
        self.durable = false;
    }

    pub fn is_bound(&self) -> bool {
        self.key.is_some()
    }

    pub fn tasks(&self) -> &[Task] {
        &self.items
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.items.iter().find(|t| t.id == id)
    }

    #[instrument(skip(self, text, now))]
    pub fn create(
        &mut self,
        text: &str,
        priority: Priority,
        list_id: &str,
        now: DateTime<Utc>,
    ) -> Option<&Task> {
        self.key.as_ref()?;
        let text = text.trim();
        if text.is_empty() {
            debug!("ignoring blank task text");
            return None;
        }

        let task = Task::new(text.to_string(), priority, list_id.to_string(), now);
        debug!(id = %task.id, "created task");
        self.items.insert(0, task);
        self.persist();
        self.items.first()
    }

    #[instrument(skip(self))]
    pub fn toggle(&mut self, id: &str) -> bool {
        if self.key.is_none() {
            return false;
        }
        let Some(task) = self.items.iter_mut().find(|t| t.id == id) else {
            return false;
        };
        task.done = !task.done;
        self.persist();
        true
    }

    #[instrument(skip(self, text))]
    pub fn update(&mut self, id: &str, text: &str) -> bool {
        if self.key.is_none() {
            return false;
        }
        let text = text.trim();
        if text.is_empty() {
            debug!("ignoring blank edit");
            return false;
        }
        let Some(task) = self.items.iter_mut().find(|t| t.id == id) else {
            return false;
        };
        task.text = text.to_string();
        self.persist();
        true
    }

    #[instrument(skip(self))]
    pub fn delete(&mut self, id: &str) -> bool {
        if self.key.is_none() {
            return false;
        }
        let before = self.items.len();
        self.items.retain(|t| t.id != id);
        if self.items.len() == before {
            return false;
        }
        self.persist();
        true
    }

    /// Removes done tasks from every list, not only the one on screen.
    #[instrument(skip(self))]
    pub fn clear_completed(&mut self) -> usize {
        if self.key.is_none() {
            return 0;
        }
        let before = self.items.len();
        self.items.retain(|t| !t.done);
        let removed = before - self.items.len();
        info!(removed, "cleared completed tasks");
        self.persist();
        removed
    }

    pub fn view(&self, query: &ViewQuery) -> Vec<&Task> {
        project(&self.items, query)
    }

    pub fn counts(&self) -> Counts {
        let done = self.items.iter().filter(|t| t.done).count();
        Counts {
            pending: self.items.len() - done,
            done,
        }
    }

    fn persist(&self) {
        let Some(key) = &self.key else {
            return;
        };
        if !self.durable {
            debug!("store not durable; skipping write");
            return;
        }
        match serde_json::to_string(&self.items) {
            Ok(payload) => self.writer.schedule(&key.todos(), payload),
            Err(err) => warn!(error = %err, "failed to serialize tasks"),
        }
    }
}
