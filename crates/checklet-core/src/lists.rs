use tracing::{debug, info, instrument, warn};

use crate::session::StorageKey;
use crate::storage::KeyValueStore;
use crate::task::{DEFAULT_LIST_COLOR, DEFAULT_LIST_ID, TodoList, decode_lists, is_hex_color};
use crate::writer::WriteQueue;

/// Named, coloured groupings plus the currently selected one.
///
/// Once loaded the collection is never empty. When the stored lists
/// cannot be read the default inbox is used in memory and nothing is
/// written back until the next `load`.
#[derive(Debug)]
pub struct ListStore {
    key: Option<StorageKey>,
    lists: Vec<TodoList>,
    selected: String,
    durable: bool,
    writer: WriteQueue,
}

impl ListStore {
    pub fn new(writer: WriteQueue) -> Self {
        Self {
            key: None,
            lists: vec![],
            selected: DEFAULT_LIST_ID.to_string(),
            durable: false,
            writer,
        }
    }

    #[instrument(skip(self, kv), fields(user = %key.user_id()))]
    pub fn load(&mut self, key: StorageKey, kv: &dyn KeyValueStore) {
        match kv.get(&key.selected_list()) {
            Ok(Some(raw)) if !raw.trim().is_empty() => self.selected = raw.trim().to_string(),
            Ok(_) => {}
            Err(err) => warn!(error = %err, "failed reading selected list"),
        }

        let stored = match kv.get(&key.lists()) {
            Ok(Some(raw)) => decode_lists(&raw),
            Ok(None) => Ok(vec![]),
            Err(err) => Err(err),
        };
        self.key = Some(key);

        match stored {
            Ok(lists) if !lists.is_empty() => {
                self.durable = true;
                self.lists = lists;
                if !self.contains(&self.selected) {
                    self.selected = self.lists[0].id.clone();
                    debug!(selected = %self.selected, "selection fell back to first list");
                }
            }
            Ok(_) => {
                self.durable = true;
                self.reset_to_default();
                self.persist();
                self.persist_selection();
            }
            Err(err) => {
                warn!(error = %err, "stored lists unavailable; using default in memory");
                self.durable = false;
                self.reset_to_default();
            }
        }
        info!(count = self.lists.len(), selected = %self.selected, durable = self.durable, "loaded lists");
    }

    pub fn unload(&mut self) {
        self.key = None;
        self.lists.clear();
        self.selected = DEFAULT_LIST_ID.to_string();
        self.durable = false;
    }

    pub fn is_bound(&self) -> bool {
        self.key.is_some()
    }

    pub fn lists(&self) -> &[TodoList] {
        &self.lists
    }

    pub fn get(&self, id: &str) -> Option<&TodoList> {
        self.lists.iter().find(|l| l.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn selected(&self) -> &str {
        &self.selected
    }

    /// Any id is accepted; an unknown one simply selects an empty view.
    #[instrument(skip(self))]
    pub fn select(&mut self, list_id: &str) {
        if self.key.is_none() {
            return;
        }
        self.selected = list_id.to_string();
        self.persist_selection();
    }

    /// Invalid colors fall back to the default tint.
    #[instrument(skip(self))]
    pub fn create(&mut self, name: &str, color: Option<&str>) -> Option<&TodoList> {
        self.key.as_ref()?;
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        let color = color
            .map(str::trim)
            .filter(|c| is_hex_color(c))
            .unwrap_or(DEFAULT_LIST_COLOR);

        self.lists.push(TodoList::new(name.to_string(), color.to_string()));
        self.persist();
        self.lists.last()
    }

    #[instrument(skip(self))]
    pub fn rename(&mut self, id: &str, name: &str) -> bool {
        if self.key.is_none() {
            return false;
        }
        let name = name.trim();
        if name.is_empty() {
            return false;
        }
        let Some(list) = self.lists.iter_mut().find(|l| l.id == id) else {
            return false;
        };
        list.name = name.to_string();
        self.persist();
        true
    }

    /// Tasks in the removed list are left as they are.
    #[instrument(skip(self))]
    pub fn remove(&mut self, id: &str) -> bool {
        if self.key.is_none() || self.lists.len() <= 1 {
            return false;
        }
        let before = self.lists.len();
        self.lists.retain(|l| l.id != id);
        if self.lists.len() == before {
            return false;
        }
        self.persist();
        if self.selected == id {
            self.selected = self.lists[0].id.clone();
            self.persist_selection();
        }
        true
    }

    fn reset_to_default(&mut self) {
        self.lists = vec![TodoList::inbox()];
        self.selected = DEFAULT_LIST_ID.to_string();
    }

    fn persist(&self) {
        let Some(key) = &self.key else {
            return;
        };
        if !self.durable {
            return;
        }
        match serde_json::to_string(&self.lists) {
            Ok(payload) => self.writer.schedule(&key.lists(), payload),
            Err(err) => warn!(error = %err, "failed to serialize lists"),
        }
    }

    fn persist_selection(&self) {
        if let Some(key) = &self.key
            && self.durable
        {
            self.writer
                .schedule(&key.selected_list(), self.selected.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::session::User;
    use crate::storage::MemoryStore;

    fn key() -> StorageKey {
        StorageKey::for_user(Some(&User {
            id: "u1".to_string(),
            email: "u1@example.com".to_string(),
            name: None,
            photo_url: None,
        }))
        .expect("key")
    }

    fn setup() -> (ListStore, Arc<MemoryStore>, WriteQueue) {
        let kv = Arc::new(MemoryStore::new());
        let writer = WriteQueue::spawn(kv.clone()).expect("writer");
        (ListStore::new(writer.clone()), kv, writer)
    }

    #[test]
    fn empty_storage_yields_persisted_inbox() {
        let (mut store, kv, writer) = setup();
        store.load(key(), kv.as_ref());
        writer.flush();

        assert_eq!(store.lists(), [TodoList::inbox()]);
        assert_eq!(store.selected(), "inbox");
        let raw = kv.get("lists:u1").expect("get").expect("persisted");
        assert_eq!(decode_lists(&raw).expect("decode"), vec![TodoList::inbox()]);
    }

    #[test]
    fn stale_selection_falls_back_to_first_list() {
        let (mut store, kv, _) = setup();
        kv.set(
            "lists:u1",
            r##"[{"id":"work","name":"Work","color":"#ff0000"},{"id":"home","name":"Home","color":"#00ff00"}]"##,
        )
        .expect("seed");
        kv.set("selected:u1", "gone").expect("seed");
        store.load(key(), kv.as_ref());
        assert_eq!(store.selected(), "work");

        kv.set("selected:u1", "home").expect("seed");
        store.load(key(), kv.as_ref());
        assert_eq!(store.selected(), "home");
    }

    #[test]
    fn unreadable_lists_are_not_overwritten() {
        let (mut store, kv, writer) = setup();
        kv.set("lists:u1", "{{not json").expect("seed");
        store.load(key(), kv.as_ref());
        writer.flush();

        assert_eq!(store.lists(), [TodoList::inbox()]);
        assert_eq!(
            kv.get("lists:u1").expect("get").as_deref(),
            Some("{{not json")
        );
    }

    #[test]
    fn select_accepts_unknown_ids() {
        let (mut store, kv, _) = setup();
        store.load(key(), kv.as_ref());
        store.select("nowhere");
        assert_eq!(store.selected(), "nowhere");
    }

    #[test]
    fn create_rename_remove() {
        let (mut store, kv, _) = setup();
        store.load(key(), kv.as_ref());

        let id = store
            .create("Work", Some("bogus"))
            .map(|l| {
                assert_eq!(l.color, DEFAULT_LIST_COLOR);
                l.id.clone()
            })
            .expect("created");
        assert!(store.create("   ", None).is_none());
        assert!(store.rename(&id, "Office"));
        assert_eq!(store.get(&id).map(|l| l.name.as_str()), Some("Office"));

        store.select(&id);
        assert!(store.remove(&id));
        assert_eq!(store.selected(), "inbox");
        assert!(!store.remove("inbox"), "last list must stay");
        assert_eq!(store.lists().len(), 1);
    }

    #[test]
    fn lists_without_usable_records_are_not_overwritten() {
        let (mut store, kv, writer) = setup();
        let seeded = r#"[{"name":"Work"},{"name":"Home"}]"#;
        kv.set("lists:u1", seeded).expect("seed");
        store.load(key(), kv.as_ref());
        writer.flush();

        assert_eq!(store.lists(), [TodoList::inbox()]);
        assert_eq!(kv.get("lists:u1").expect("get").as_deref(), Some(seeded));

        assert!(store.create("Errands", None).is_some());
        store.select("inbox");
        writer.flush();
        assert_eq!(kv.get("lists:u1").expect("get").as_deref(), Some(seeded));
        assert_eq!(kv.get("selected:u1").expect("get"), None);
    }

    #[test]
    fn empty_array_is_replaced_by_inbox() {
        let (mut store, kv, writer) = setup();
        kv.set("lists:u1", "[]").expect("seed");
        store.load(key(), kv.as_ref());
        writer.flush();
        let raw = kv.get("lists:u1").expect("get").expect("persisted");
        assert_eq!(decode_lists(&raw).expect("decode"), vec![TodoList::inbox()]);
    }

    #[test]
    fn select_before_load_is_ignored() {
        let (mut store, kv, writer) = setup();
        store.select("work");
        writer.flush();
        assert_eq!(store.selected(), "inbox");
        assert_eq!(kv.get("selected:u1").expect("get"), None);
    }
}
