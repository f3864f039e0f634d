use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{
  debug,
  warn
};

use crate::datastore::{
  IMAGES_KEY,
  KeyValueStore,
  PersistError,
  load_or_default,
  save_json
};
use crate::model::{
  Item,
  new_id
};

const REJECTED_SCHEMES: [&str; 2] =
  ["data:", "blob:"];

#[derive(Debug, Error)]
pub enum ImageError {
  #[error(
    "image URL scheme is not allowed: \
     {0}"
  )]
  RejectedScheme(String),

  #[error(transparent)]
  Persist(#[from] PersistError)
}

/// Embedded-data and transient blob URLs
/// cannot outlive the session that made
/// them.
pub fn is_allowed_image_url(
  url: &str
) -> bool {
  let lower =
    url.trim().to_ascii_lowercase();
  !lower.is_empty()
    && !REJECTED_SCHEMES
      .iter()
      .any(|scheme| {
        lower.starts_with(scheme)
      })
}

/// Maps opaque image ids to URLs. Items
/// only hold ordered id lists; this
/// store owns the references.
pub struct ImageStore {
  kv:      Arc<dyn KeyValueStore>,
  entries: Mutex<BTreeMap<String, String>>
}

impl ImageStore {
  pub fn open(
    kv: Arc<dyn KeyValueStore>
  ) -> Self {
    let entries: BTreeMap<
      String,
      String
    > = load_or_default(
      kv.as_ref(),
      IMAGES_KEY
    );
    debug!(
      count = entries.len(),
      "loaded image references"
    );
    Self {
      kv,
      entries: Mutex::new(entries)
    }
  }

  fn flush(
    &self,
    entries: &BTreeMap<String, String>
  ) -> Result<(), PersistError> {
    save_json(
      self.kv.as_ref(),
      IMAGES_KEY,
      entries
    )
  }

  pub fn put(
    &self,
    url: &str
  ) -> Result<String, ImageError> {
    if !is_allowed_image_url(url) {
      return Err(
        ImageError::RejectedScheme(
          url.trim().to_string()
        )
      );
    }
    let id = new_id();
    let mut entries = self.entries.lock();
    entries.insert(
      id.clone(),
      url.trim().to_string()
    );
    self.flush(&entries)?;
    Ok(id)
  }

  pub fn set(
    &self,
    id: &str,
    url: &str
  ) -> Result<(), ImageError> {
    if !is_allowed_image_url(url) {
      return Err(
        ImageError::RejectedScheme(
          url.trim().to_string()
        )
      );
    }
    let mut entries = self.entries.lock();
    entries.insert(
      id.to_string(),
      url.trim().to_string()
    );
    self.flush(&entries)?;
    Ok(())
  }

  pub fn get(
    &self,
    id: &str
  ) -> Option<String> {
    self.entries.lock().get(id).cloned()
  }

  pub fn delete(
    &self,
    id: &str
  ) -> Result<(), PersistError> {
    let mut entries = self.entries.lock();
    if entries.remove(id).is_some() {
      self.flush(&entries)?;
    }
    Ok(())
  }

  pub fn delete_many(
    &self,
    ids: &[String]
  ) -> Result<(), PersistError> {
    let mut entries = self.entries.lock();
    let before = entries.len();
    for id in ids {
      entries.remove(id);
    }
    if entries.len() != before {
      self.flush(&entries)?;
    }
    Ok(())
  }

  /// Known ids only; unknown ids are
  /// omitted.
  pub fn bulk_get(
    &self,
    ids: &[String]
  ) -> BTreeMap<String, String> {
    let entries = self.entries.lock();
    ids
      .iter()
      .filter_map(|id| {
        entries
          .get(id)
          .map(|url| {
            (id.clone(), url.clone())
          })
      })
      .collect()
  }

  /// Stores every allowed URL and returns
  /// their ids in input order. Rejected
  /// URLs are skipped, so the result may
  /// be shorter than the input.
  pub fn bulk_put(
    &self,
    urls: &[String]
  ) -> Result<Vec<String>, PersistError>
  {
    let mut entries = self.entries.lock();
    let mut ids =
      Vec::with_capacity(urls.len());
    for url in urls {
      if !is_allowed_image_url(url) {
        warn!(
          "skipping image with \
           disallowed scheme"
        );
        continue;
      }
      let id = new_id();
      entries.insert(
        id.clone(),
        url.trim().to_string()
      );
      ids.push(id);
    }
    if !ids.is_empty() {
      self.flush(&entries)?;
    }
    Ok(ids)
  }
}

/// Moves one image within the album.
/// Storage is untouched; only the id
/// order changes. Out-of-range indices
/// leave the album as is.
pub fn move_image(
  item: &mut Item,
  from: usize,
  to: usize
) -> bool {
  let len = item.image_ids.len();
  if from >= len || to >= len {
    return false;
  }
  let id = item.image_ids.remove(from);
  item.image_ids.insert(to, id);
  true
}

pub fn detach_image(
  item: &mut Item,
  index: usize
) -> Option<String> {
  (index < item.image_ids.len())
    .then(|| item.image_ids.remove(index))
}
