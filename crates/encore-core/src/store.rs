use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument};

use crate::datastore::{
    COLLECTION_KEY, DISPLAY_SETTINGS_KEY, ITEM_SORT_KEY, KeyValueStore, PARENT_SORT_KEY,
    PersistError, SETTINGS_KEY, load_or_default, save_json,
};
use crate::images::ImageStore;
use crate::lifecycle::auto_advance_all;
use crate::model::Parent;
use crate::schema::{CollectionDocument, decode_collection, normalize};
use crate::sort::{ItemSortMode, ParentSortMode};
use crate::transfer::ImportBatch;

const DEFAULT_TRACKING_INTERVAL_DAYS: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub auto_tracking: bool,
    pub tracking_interval_days: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            auto_tracking: true,
            tracking_interval_days: DEFAULT_TRACKING_INTERVAL_DAYS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct DisplaySettings {
    pub show_attended: bool,
    pub show_skipped: bool,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            show_attended: true,
            show_skipped: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct State {
    parents: Vec<Parent>,
    settings: Settings,
    display: DisplaySettings,
    parent_sort: ParentSortMode,
    item_sort: ItemSortMode,
}

/// Single owner of the in-memory collection. Every mutation, from the user
/// or the tracker, goes through `replace_collection`, which runs the
/// reducer against the latest state and then flushes it.
pub struct AppStore {
    kv: Arc<dyn KeyValueStore>,
    images: ImageStore,
    state: Mutex<State>,
}

impl AppStore {
    #[instrument(skip_all)]
    pub fn init(kv: Arc<dyn KeyValueStore>) -> Self {
        let images = ImageStore::open(kv.clone());

        let (parents, needs_rewrite) = match kv
            .get(COLLECTION_KEY)
            .and_then(|raw| decode_collection(&raw))
        {
            Some(decoded) => (
                normalize(decoded.parents, Some(&images)),
                decoded.needs_rewrite,
            ),
            None => (Vec::new(), false),
        };

        let state = State {
            parents,
            settings: load_or_default(kv.as_ref(), SETTINGS_KEY),
            display: load_or_default(kv.as_ref(), DISPLAY_SETTINGS_KEY),
            parent_sort: load_or_default(kv.as_ref(), PARENT_SORT_KEY),
            item_sort: load_or_default(kv.as_ref(), ITEM_SORT_KEY),
        };

        info!(
            parents = state.parents.len(),
            auto_tracking = state.settings.auto_tracking,
            "store initialised"
        );

        let store = Self {
            kv,
            images,
            state: Mutex::new(state),
        };
        if needs_rewrite {
            let state = store.state.lock();
            // Failure is logged by the flush; the next mutation retries.
            if store.flush_collection(&state.parents).is_ok() {
                info!("migrated collection written back");
            }
        }
        store
    }

    pub fn images(&self) -> &ImageStore {
        &self.images
    }

    pub fn snapshot(&self) -> Vec<Parent> {
        self.state.lock().parents.clone()
    }

    /// Replaces the collection with `reducer(latest)`. The new collection
    /// is kept in memory even when the flush fails; the error is returned
    /// so the caller can tell the user.
    pub fn replace_collection<F>(&self, reducer: F) -> Result<(), PersistError>
    where
        F: FnOnce(&[Parent]) -> Vec<Parent>,
    {
        let mut state = self.state.lock();
        let next = reducer(&state.parents);
        state.parents = next;
        self.flush_collection(&state.parents)
    }

    /// In-place variant of `replace_collection` returning whatever the
    /// closure computes.
    pub fn mutate<F, R>(&self, f: F) -> Result<R, PersistError>
    where
        F: FnOnce(&mut Vec<Parent>) -> R,
    {
        let mut state = self.state.lock();
        let out = f(&mut state.parents);
        self.flush_collection(&state.parents).map(|()| out)
    }

    /// Swaps in an imported collection. Image ids only the replaced
    /// collection referenced are released once the new one is on disk.
    #[instrument(skip_all, fields(parents = batch.len()))]
    pub fn import_collection(&self, batch: ImportBatch) -> Result<usize, PersistError> {
        let mut state = self.state.lock();
        let next = batch.into_parents(Some(&self.images));
        let kept: HashSet<&str> = image_ids(&next).collect();
        let orphaned: Vec<String> = image_ids(&state.parents)
            .filter(|id| !kept.contains(id))
            .map(str::to_string)
            .collect();
        let count = next.len();
        state.parents = next;
        self.flush_collection(&state.parents)?;
        if !orphaned.is_empty() {
            debug!(released = orphaned.len(), "releasing images of replaced collection");
            self.images.delete_many(&orphaned)?;
        }
        Ok(count)
    }

    fn flush_collection(&self, parents: &[Parent]) -> Result<(), PersistError> {
        let result = save_json(
            self.kv.as_ref(),
            COLLECTION_KEY,
            &CollectionDocument::current(parents),
        );
        if let Err(err) = &result {
            error!(error = %err, "failed to persist collection; keeping in-memory state");
        }
        result
    }

    /// Applies time-driven transitions. Commits only when something moved.
    #[instrument(skip(self))]
    pub fn sweep_auto_advance(&self, now: DateTime<Utc>) -> Result<usize, PersistError> {
        let mut state = self.state.lock();
        let (swept, advanced) = auto_advance_all(&state.parents, now);
        if advanced == 0 {
            return Ok(0);
        }
        debug!(advanced, "committing auto-advanced items");
        state.parents = swept;
        self.flush_collection(&state.parents)?;
        Ok(advanced)
    }

    pub fn settings(&self) -> Settings {
        self.state.lock().settings.clone()
    }

    pub fn update_settings(&self, settings: Settings) -> Result<(), PersistError> {
        let mut state = self.state.lock();
        state.settings = settings;
        save_json(self.kv.as_ref(), SETTINGS_KEY, &state.settings)
    }

    pub fn display_settings(&self) -> DisplaySettings {
        self.state.lock().display.clone()
    }

    pub fn update_display_settings(&self, display: DisplaySettings) -> Result<(), PersistError> {
        let mut state = self.state.lock();
        state.display = display;
        save_json(self.kv.as_ref(), DISPLAY_SETTINGS_KEY, &state.display)
    }

    pub fn parent_sort(&self) -> ParentSortMode {
        self.state.lock().parent_sort
    }

    pub fn set_parent_sort(&self, mode: ParentSortMode) -> Result<(), PersistError> {
        let mut state = self.state.lock();
        state.parent_sort = mode;
        save_json(self.kv.as_ref(), PARENT_SORT_KEY, &mode)
    }

    pub fn item_sort(&self) -> ItemSortMode {
        self.state.lock().item_sort
    }

    pub fn set_item_sort(&self, mode: ItemSortMode) -> Result<(), PersistError> {
        let mut state = self.state.lock();
        state.item_sort = mode;
        save_json(self.kv.as_ref(), ITEM_SORT_KEY, &mode)
    }

    /// Flushes every key. Called once on shutdown.
    #[instrument(skip(self))]
    pub fn teardown(&self) -> Result<(), PersistError> {
        let state = self.state.lock();
        save_json(
            self.kv.as_ref(),
            COLLECTION_KEY,
            &CollectionDocument::current(&state.parents),
        )?;
        save_json(self.kv.as_ref(), SETTINGS_KEY, &state.settings)?;
        save_json(self.kv.as_ref(), DISPLAY_SETTINGS_KEY, &state.display)?;
        save_json(self.kv.as_ref(), PARENT_SORT_KEY, &state.parent_sort)?;
        save_json(self.kv.as_ref(), ITEM_SORT_KEY, &state.item_sort)?;
        debug!("store flushed on teardown");
        Ok(())
    }
}

fn image_ids(parents: &[Parent]) -> impl Iterator<Item = &str> {
    parents
        .iter()
        .flat_map(Parent::items)
        .flat_map(|item| item.image_ids.iter().map(String::as_str))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};

    use super::{AppStore, Settings};
    use crate::datastore::{COLLECTION_KEY, IMAGES_KEY, KeyValueStore, MemoryStore};
    use crate::lifecycle::Status;
    use crate::model::{Group, Item, Parent};
    use crate::sort::ParentSortMode;
    use crate::transfer::parse_import;

    fn seeded() -> (Arc<MemoryStore>, AppStore) {
        let kv = Arc::new(MemoryStore::new());
        let store = AppStore::init(kv.clone());
        (kv, store)
    }

    #[test]
    fn fresh_store_uses_documented_defaults() {
        let (_, store) = seeded();
        assert!(store.snapshot().is_empty());
        assert_eq!(store.settings(), Settings::default());
        assert_eq!(store.parent_sort(), ParentSortMode::Priority);
    }

    #[test]
    fn mutations_persist_and_reload() {
        let (kv, store) = seeded();
        store
            .mutate(|parents| parents.push(Parent::new("Band", 0)))
            .expect("persist");
        store
            .set_parent_sort(ParentSortMode::Manual)
            .expect("persist sort");

        let reloaded = AppStore::init(kv.clone());
        assert_eq!(reloaded.snapshot(), store.snapshot());
        assert_eq!(reloaded.parent_sort(), ParentSortMode::Manual);
        assert!(kv.get(COLLECTION_KEY).is_some_and(|raw| raw.contains("\"version\":2")));
    }

    #[test]
    fn legacy_images_migrate_exactly_once() {
        let kv = Arc::new(MemoryStore::new());
        kv.set(
            COLLECTION_KEY,
            r#"[{"name":"Band","tours":[{"name":"Tour","concerts":[
                {"date":"2026-07-01","images":["https://img.example/a.jpg"]}
            ]}]}]"#,
        )
        .expect("seed legacy");

        let first = AppStore::init(kv.clone()).snapshot();
        let ids = first[0].groups[0].items[0].image_ids.clone();
        assert_eq!(ids.len(), 1);
        assert!(kv.get(COLLECTION_KEY).is_some_and(|raw| !raw.contains("\"images\"")));

        for _ in 0..2 {
            let again = AppStore::init(kv.clone());
            assert_eq!(again.snapshot()[0].groups[0].items[0].image_ids, ids);
            assert_eq!(again.images().bulk_get(&ids).len(), 1);
        }
        let entries: std::collections::BTreeMap<String, String> =
            serde_json::from_str(&kv.get(IMAGES_KEY).expect("image map")).expect("decode");
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn import_releases_images_of_replaced_collection() {
        let (kv, store) = seeded();
        let old_id = store.images().put("https://img.example/old.jpg").expect("put");
        let mut item = Item::new_pre_sale("TBD");
        item.image_ids.push(old_id.clone());
        let mut group = Group::new("Tour");
        group.items.push(item);
        let mut parent = Parent::new("Band", 0);
        parent.groups.push(group);
        store.mutate(|parents| parents.push(parent)).expect("seed");

        let batch = parse_import(
            r#"[{"name":"Other","tours":[{"name":"T","concerts":[
                {"date":"TBD","images":["https://img.example/new.jpg"]}]}]}]"#,
        )
        .expect("parse");
        assert_eq!(store.import_collection(batch).expect("import"), 1);

        let new_ids = store.snapshot()[0].groups[0].items[0].image_ids.clone();
        assert_eq!(new_ids.len(), 1);
        assert_eq!(store.images().get(&old_id), None);
        assert_eq!(
            store.images().get(&new_ids[0]).as_deref(),
            Some("https://img.example/new.jpg")
        );
        assert!(kv.get(IMAGES_KEY).is_some_and(|raw| !raw.contains("old.jpg")));
    }

    #[test]
    fn failed_flush_keeps_memory_state() {
        let kv = Arc::new(MemoryStore::with_quota(8));
        let store = AppStore::init(kv);
        let err = store
            .mutate(|parents| parents.push(Parent::new("A very long artist name", 0)))
            .expect_err("quota");
        assert!(err.is_storage_full());
        assert_eq!(store.snapshot().len(), 1);
    }

    #[test]
    fn sweep_commits_only_when_something_moved() {
        let (_, store) = seeded();
        let mut item = Item::new_pre_sale("2024-06-01");
        item.status = Status::Confirmed;
        item.concert_at = Some("2024-06-01".to_string());
        let mut group = Group::new("Tour");
        group.items.push(item);
        let mut parent = Parent::new("Band", 0);
        parent.groups.push(group);
        store.mutate(|parents| parents.push(parent)).expect("seed");

        let now = Utc
            .with_ymd_and_hms(2024, 6, 3, 0, 0, 0)
            .single()
            .expect("valid now");
        assert_eq!(store.sweep_auto_advance(now).expect("sweep"), 1);
        assert_eq!(store.sweep_auto_advance(now).expect("sweep"), 0);
        assert_eq!(
            store.snapshot()[0].groups[0].items[0].status,
            Status::Attended
        );
    }
}
