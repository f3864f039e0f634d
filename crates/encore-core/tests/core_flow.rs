use std::fs;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use encore_core::calendar::{CalendarEventKind, events_in_month, project_calendar};
use encore_core::datastore::{COLLECTION_KEY, DataStore, KeyValueStore};
use encore_core::lifecycle::{
    Decision, DecisionPayload, DueAction, Status, apply_decision, due_action, due_items,
};
use encore_core::model::{Group, Item, Parent};
use encore_core::sort::{ItemSortMode, flatten_items, sort_items};
use encore_core::store::AppStore;
use encore_core::transfer::{export_to_file, read_import};
use tempfile::tempdir;

fn at(month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, month, day, 6, 0, 0)
        .single()
        .expect("valid instant")
}

fn seed(store: &AppStore) -> String {
    let mut item = Item::new_pre_sale("2026-08-20");
    item.venue = "Zepp Haneda".to_string();
    item.sale_at = Some("2026-05-01".to_string());
    let item_id = item.id.clone();
    let mut group = Group::new("Summer Tour");
    group.items.push(item);
    let mut parent = Parent::new("Band", 0);
    parent.groups.push(group);
    store
        .mutate(|parents| parents.push(parent))
        .expect("seed collection");
    item_id
}

fn decide(store: &AppStore, item_id: &str, decision: Decision, payload: DecisionPayload) {
    store
        .mutate(|parents| {
            for item in parents
                .iter_mut()
                .flat_map(|p| p.groups.iter_mut())
                .flat_map(|g| g.items.iter_mut())
                .filter(|item| item.id == item_id)
            {
                *item = apply_decision(item, decision, &payload);
            }
        })
        .expect("persist decision");
}

fn only_item(store: &AppStore) -> Item {
    store.snapshot()[0].groups[0].items[0].clone()
}

#[test]
fn lottery_lifecycle_survives_reopen() {
    let temp = tempdir().expect("tempdir");
    let kv = Arc::new(DataStore::open(temp.path(), None).expect("open datastore"));
    let store = AppStore::init(kv.clone());
    let item_id = seed(&store);

    assert_eq!(due_action(&only_item(&store), at(4, 20)), None);
    assert_eq!(
        due_action(&only_item(&store), at(5, 2)),
        Some(DueAction::AskBuyAtSale)
    );

    decide(
        &store,
        &item_id,
        Decision::Buy,
        DecisionPayload {
            lottery_name: Some("FC advance".to_string()),
            result_at: Some("2026-05-20T18:00".to_string()),
            concert_at: None,
        },
    );
    let item = only_item(&store);
    assert_eq!(item.status, Status::Lottery);
    assert_eq!(item.result_at.as_deref(), Some("2026-05-20 18:00"));
    assert_eq!(due_action(&item, at(5, 10)), None);
    assert_eq!(due_action(&item, at(5, 21)), Some(DueAction::AskResult));

    decide(&store, &item_id, Decision::Won, DecisionPayload::default());
    let item = only_item(&store);
    assert_eq!(item.status, Status::Confirmed);
    assert_eq!(item.concert_at.as_deref(), Some("2026-08-20"));

    drop(store);
    let reopened = AppStore::init(kv.clone());
    assert_eq!(only_item(&reopened).status, Status::Confirmed);
    assert!(
        kv.get(COLLECTION_KEY)
            .is_some_and(|raw| raw.contains("\"version\""))
    );

    assert_eq!(reopened.sweep_auto_advance(at(8, 30)).expect("sweep"), 1);
    assert_eq!(only_item(&reopened).status, Status::Attended);
    assert!(due_items(&reopened.snapshot(), at(8, 30)).is_empty());
}

#[test]
fn legacy_file_is_migrated_on_load() {
    let temp = tempdir().expect("tempdir");
    fs::write(
        temp.path().join(format!("{COLLECTION_KEY}.json")),
        r#"[{"name":"Band","tours":[{"name":"Tour","concerts":[
            {"date":"2026-07-01","status":"抽選中","images":["https://img.example/a.jpg","data:image/png;base64,AAAA"]}
        ]}]}]"#,
    )
    .expect("write legacy collection");

    let kv = Arc::new(DataStore::open(temp.path(), None).expect("open datastore"));
    let store = AppStore::init(kv);
    let item = only_item(&store);
    assert_eq!(item.status, Status::Lottery);
    assert_eq!(item.display_date, "2026-07-01");
    assert_eq!(item.image_ids.len(), 1);
    assert_eq!(
        store.images().get(&item.image_ids[0]).as_deref(),
        Some("https://img.example/a.jpg")
    );
}

#[test]
fn views_agree_on_one_collection() {
    let temp = tempdir().expect("tempdir");
    let kv = Arc::new(DataStore::open(temp.path(), None).expect("open datastore"));
    let store = AppStore::init(kv);
    seed(&store);
    store
        .mutate(|parents| {
            let mut attended = Item::new_pre_sale("2026-03-01");
            attended.status = Status::Attended;
            let mut undetermined = Item::new_pre_sale("TBD");
            undetermined.status = Status::Considering;
            parents[0].groups[0].items.push(attended);
            parents[0].groups[0].items.push(undetermined);
        })
        .expect("add items");

    let parents = store.snapshot();
    let mut rows = flatten_items(&parents);
    sort_items(&mut rows, ItemSortMode::Status);
    let order: Vec<_> = rows.iter().map(|row| row.item.status).collect();
    assert_eq!(order, vec![Status::PreSale, Status::Attended, Status::Considering]);

    let events = project_calendar(&parents);
    let may = events_in_month(&events, 2026, 5);
    assert_eq!(may.len(), 1);
    assert_eq!(may[0].kind, CalendarEventKind::Sale);
    assert_eq!(may[0].title, "Band / Summer Tour @ Zepp Haneda");
}

#[test]
fn export_then_import_restores_collection() {
    let temp = tempdir().expect("tempdir");
    let kv = Arc::new(DataStore::open(&temp.path().join("data"), None).expect("open datastore"));
    let store = AppStore::init(kv);
    seed(&store);

    let export_path = temp.path().join("backup.json");
    export_to_file(&store.snapshot(), &export_path).expect("export");

    let other = tempdir().expect("tempdir");
    let fresh = AppStore::init(Arc::new(
        DataStore::open(other.path(), None).expect("open datastore"),
    ));
    let batch = read_import(&export_path).expect("import");
    assert_eq!(fresh.import_collection(batch).expect("commit import"), 1);
    assert_eq!(fresh.snapshot(), store.snapshot());

    let bogus = temp.path().join("bogus.json");
    fs::write(&bogus, "{\"not\": \"an array\"}").expect("write bogus");
    assert!(read_import(&bogus).is_err());
    assert_eq!(fresh.snapshot().len(), 1);
}

#[test]
fn quota_overflow_is_reported_as_storage_full() {
    let temp = tempdir().expect("tempdir");
    let kv = Arc::new(DataStore::open(temp.path(), Some(64)).expect("open datastore"));
    let store = AppStore::init(kv);
    let err = store
        .mutate(|parents| {
            let mut parent = Parent::new("Band with a rather long name", 0);
            parent.groups.push(Group::new("Tour with an equally long name"));
            parents.push(parent);
        })
        .expect_err("quota exceeded");
    assert!(err.is_storage_full());
    assert_eq!(store.snapshot().len(), 1);
}
