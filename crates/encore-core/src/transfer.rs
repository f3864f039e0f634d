use std::fs;
use std::path::Path;

use anyhow::Context;
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::images::ImageStore;
use crate::model::Parent;
use crate::schema::{RawParent, decode_parent_array, normalize};

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("import file is not valid JSON: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("import file must contain a JSON array of artists, found {found}")]
    NotAnArray { found: &'static str },

    #[error("import array has an entry that is not an artist: {0}")]
    BadEntry(#[source] serde_json::Error),
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

/// Serialises the collection the way `import` expects it back.
pub fn export_json(parents: &[Parent]) -> anyhow::Result<String> {
    serde_json::to_string_pretty(parents).context("failed to serialise collection for export")
}

#[instrument(skip(parents), fields(parents = parents.len()))]
pub fn export_to_file(parents: &[Parent], path: &Path) -> anyhow::Result<()> {
    let body = export_json(parents)?;
    fs::write(path, body + "\n")
        .with_context(|| format!("failed to write export to {}", path.display()))?;
    info!(file = %path.display(), "collection exported");
    Ok(())
}

/// A validated import payload that has not touched storage yet. Inline
/// image URLs from older exports are only moved into the image store by
/// `into_parents`, so a cancelled import leaves nothing behind.
#[derive(Debug)]
pub struct ImportBatch {
    raw: Vec<RawParent>,
}

impl ImportBatch {
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    pub fn into_parents(self, images: Option<&ImageStore>) -> Vec<Parent> {
        normalize(self.raw, images)
    }
}

pub fn parse_import(raw: &str) -> Result<ImportBatch, ImportError> {
    let value: serde_json::Value = serde_json::from_str(raw).map_err(ImportError::Malformed)?;
    if !value.is_array() {
        return Err(ImportError::NotAnArray {
            found: json_kind(&value),
        });
    }
    let raw_parents = decode_parent_array(raw).map_err(ImportError::BadEntry)?;
    debug!(count = raw_parents.len(), "import payload decoded");
    Ok(ImportBatch { raw: raw_parents })
}

pub fn read_import(path: &Path) -> anyhow::Result<ImportBatch> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read import file {}", path.display()))?;
    parse_import(&raw).with_context(|| format!("rejected import from {}", path.display()))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{ImportError, export_json, parse_import};
    use crate::datastore::{IMAGES_KEY, KeyValueStore, MemoryStore};
    use crate::images::ImageStore;
    use crate::lifecycle::Status;
    use crate::model::{Group, Item, Parent};

    #[test]
    fn non_arrays_are_rejected() {
        assert!(matches!(
            parse_import("{\"parents\": []}"),
            Err(ImportError::NotAnArray { found: "an object" })
        ));
        assert!(matches!(
            parse_import("not json"),
            Err(ImportError::Malformed(_))
        ));
        assert!(matches!(
            parse_import("[1, 2]"),
            Err(ImportError::BadEntry(_))
        ));
    }

    #[test]
    fn export_reimports_to_the_same_collection() {
        let mut item = Item::new_pre_sale("2026-08-01");
        item.status = Status::Lottery;
        item.result_at = Some("2026-07-01 18:00".to_string());
        let mut group = Group::new("Summer Tour");
        group.items.push(item);
        let mut parent = Parent::new("Band", 0);
        parent.groups.push(group);
        let parents = vec![parent];

        let raw = export_json(&parents).expect("export");
        assert_eq!(
            parse_import(&raw).expect("import").into_parents(None),
            parents
        );
    }

    #[test]
    fn imported_entries_are_normalised() {
        let raw = r#"[{"name": " Band ", "tours": [{"name": "Tour", "concerts": [
            {"date": "2026-01-01", "status": "mystery"}
        ]}]}]"#;
        let parents = parse_import(raw).expect("import").into_parents(None);
        assert_eq!(parents[0].name, "Band");
        let item = &parents[0].groups[0].items[0];
        assert_eq!(item.status, Status::PreSale);
        assert!(!item.id.is_empty());
    }

    #[test]
    fn inline_images_wait_for_commit() {
        let kv = Arc::new(MemoryStore::new());
        let images = ImageStore::open(kv.clone());
        let raw = r#"[{"name": "Band", "tours": [{"name": "Tour", "concerts": [
            {"date": "2026-01-01", "images": ["https://img.example/a.jpg"]}
        ]}]}]"#;

        let batch = parse_import(raw).expect("import");
        assert_eq!(batch.len(), 1);
        assert!(kv.get(IMAGES_KEY).is_none());

        let parents = batch.into_parents(Some(&images));
        let ids = &parents[0].groups[0].items[0].image_ids;
        assert_eq!(ids.len(), 1);
        assert_eq!(images.get(&ids[0]).as_deref(), Some("https://img.example/a.jpg"));
    }
}
