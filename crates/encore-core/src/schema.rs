//! Persisted collection format and the load-time normalisation pass.
//!
//! Version 1 was a bare JSON array of artists whose records grew fields
//! over time. Version 2 wraps the array as `{ "version": 2, "parents": [...] }`.
//! Both decode into the same loose `Raw*` shapes, and `normalize` turns them
//! into fully populated typed records once, so business logic never has to
//! default anything.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::images::ImageStore;
use crate::lifecycle::Status;
use crate::model::{
    Group, Item, Link, LotteryResult, Parent, TrackCapability, TrackError, TrackingStatus,
    canonical_milestone, new_id,
};

pub const SCHEMA_VERSION: u32 = 2;

#[derive(Debug, Serialize)]
pub struct CollectionDocument<'a> {
    pub version: u32,
    pub parents: &'a [Parent],
}

impl<'a> CollectionDocument<'a> {
    pub fn current(parents: &'a [Parent]) -> Self {
        Self {
            version: SCHEMA_VERSION,
            parents,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StoredCollection {
    Versioned {
        version: u32,
        parents: Vec<RawParent>,
    },
    Legacy(Vec<RawParent>),
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawParent {
    id: Option<String>,
    #[serde(default)]
    name: String,
    order: Option<i64>,
    #[serde(default, alias = "tours")]
    groups: Vec<RawGroup>,
    #[serde(default)]
    links: Vec<RawLink>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawGroup {
    id: Option<String>,
    #[serde(default)]
    name: String,
    #[serde(default, alias = "concerts")]
    items: Vec<RawItem>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawItem {
    id: Option<String>,
    display_date: Option<String>,
    /// Older records kept the free-text date here.
    date: Option<String>,
    venue: Option<String>,
    price: Option<String>,
    sale_link: Option<String>,
    status: Option<Value>,
    sale_at: Option<String>,
    deadline_at: Option<String>,
    result_at: Option<String>,
    concert_at: Option<String>,
    lottery_name: Option<String>,
    lottery_result: Option<Value>,
    #[serde(default)]
    image_ids: Vec<String>,
    /// Older records embedded image URLs directly.
    #[serde(default)]
    images: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLink {
    id: Option<String>,
    #[serde(default)]
    name: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    auto_track: bool,
    #[serde(default)]
    keywords: Vec<String>,
    last_checked_at: Option<String>,
    last_success_at: Option<String>,
    tracking_status: Option<Value>,
    error_message: Option<Value>,
    track_capability: Option<Value>,
    #[serde(default)]
    matched_keywords: Vec<String>,
    last_hit_at: Option<String>,
    acknowledged_at: Option<String>,
}

/// A decoded collection plus whether its stored form is stale. Stale text
/// is either an older schema or still carries inline image URLs; either
/// way the store writes the normalised form back once.
#[derive(Debug)]
pub struct DecodedCollection {
    pub parents: Vec<RawParent>,
    pub needs_rewrite: bool,
}

/// Decodes stored text in either schema version. Returns `None` when the
/// text is not a collection at all.
pub fn decode_collection(raw: &str) -> Option<DecodedCollection> {
    match serde_json::from_str::<StoredCollection>(raw) {
        Ok(StoredCollection::Versioned { version, parents }) => {
            if version > SCHEMA_VERSION {
                warn!(version, "collection written by a newer schema; reading best effort");
            }
            let needs_rewrite = version < SCHEMA_VERSION || has_inline_images(&parents);
            Some(DecodedCollection {
                parents,
                needs_rewrite,
            })
        }
        Ok(StoredCollection::Legacy(parents)) => {
            debug!(count = parents.len(), "migrating legacy collection");
            Some(DecodedCollection {
                parents,
                needs_rewrite: true,
            })
        }
        Err(err) => {
            warn!(error = %err, "stored collection does not decode");
            None
        }
    }
}

fn has_inline_images(parents: &[RawParent]) -> bool {
    parents
        .iter()
        .flat_map(|parent| &parent.groups)
        .flat_map(|group| &group.items)
        .any(|item| !item.images.is_empty())
}

/// Decodes a bare array, as written by export.
pub fn decode_parent_array(raw: &str) -> Result<Vec<RawParent>, serde_json::Error> {
    serde_json::from_str(raw)
}

pub fn normalize(raw: Vec<RawParent>, images: Option<&ImageStore>) -> Vec<Parent> {
    raw.into_iter()
        .enumerate()
        .map(|(idx, parent)| normalize_parent(parent, idx as i64, images))
        .collect()
}

fn normalize_parent(raw: RawParent, idx: i64, images: Option<&ImageStore>) -> Parent {
    Parent {
        id: non_empty_id(raw.id),
        name: raw.name.trim().to_string(),
        order: raw.order.unwrap_or(idx),
        groups: raw
            .groups
            .into_iter()
            .map(|group| Group {
                id: non_empty_id(group.id),
                name: group.name.trim().to_string(),
                items: group
                    .items
                    .into_iter()
                    .map(|item| normalize_item(item, images))
                    .collect(),
            })
            .collect(),
        links: raw.links.into_iter().map(normalize_link).collect(),
    }
}

fn normalize_item(raw: RawItem, images: Option<&ImageStore>) -> Item {
    let status = raw
        .status
        .as_ref()
        .and_then(Value::as_str)
        .and_then(Status::parse)
        .unwrap_or_else(|| {
            if raw.status.is_some() {
                warn!(status = ?raw.status, "unknown status; resetting to PRE_SALE");
            }
            Status::PreSale
        });

    let lottery_result = raw
        .lottery_result
        .as_ref()
        .and_then(Value::as_str)
        .and_then(|value| match value.trim().to_ascii_uppercase().as_str() {
            "WON" => Some(LotteryResult::Won),
            "LOST" => Some(LotteryResult::Lost),
            _ => None,
        });
    let lottery_result = match (lottery_result, status) {
        (Some(LotteryResult::Won), Status::Confirmed | Status::Attended) => {
            Some(LotteryResult::Won)
        }
        (Some(LotteryResult::Lost), Status::Skipped) => Some(LotteryResult::Lost),
        (Some(result), _) => {
            debug!(?result, %status, "dropping lottery result inconsistent with status");
            None
        }
        (None, _) => None,
    };

    let mut image_ids = raw.image_ids;
    if !raw.images.is_empty() {
        match images {
            Some(store) => match store.bulk_put(&raw.images) {
                Ok(ids) => image_ids.extend(ids),
                Err(err) => warn!(error = %err, "failed moving legacy images into store"),
            },
            None => warn!(
                count = raw.images.len(),
                "legacy inline images dropped; no image store"
            ),
        }
    }

    Item {
        id: non_empty_id(raw.id),
        display_date: raw
            .display_date
            .or(raw.date)
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| crate::datetime::UNDETERMINED.to_string()),
        venue: raw.venue.unwrap_or_default(),
        price: raw.price.unwrap_or_default(),
        sale_link: raw.sale_link.unwrap_or_default(),
        status,
        sale_at: canonical_milestone(raw.sale_at),
        deadline_at: canonical_milestone(raw.deadline_at),
        result_at: canonical_milestone(raw.result_at),
        concert_at: canonical_milestone(raw.concert_at),
        lottery_name: raw.lottery_name.filter(|name| !name.trim().is_empty()),
        lottery_result,
        image_ids,
    }
}

fn normalize_link(raw: RawLink) -> Link {
    let tracking_status = raw
        .tracking_status
        .as_ref()
        .and_then(Value::as_str)
        .and_then(|value| match value {
            "success" => Some(TrackingStatus::Success),
            "failed" => Some(TrackingStatus::Failed),
            "hit" => Some(TrackingStatus::Hit),
            _ => None,
        });
    let error_message = raw
        .error_message
        .as_ref()
        .and_then(Value::as_str)
        .map(|value| match value {
            "UNREACHABLE" => TrackError::Unreachable,
            "CONTENT_CHANGED" => TrackError::ContentChanged,
            "ACCESS_RESTRICTED" => TrackError::AccessRestricted,
            _ => TrackError::Unknown,
        })
        .filter(|_| tracking_status == Some(TrackingStatus::Failed));
    let track_capability = raw
        .track_capability
        .as_ref()
        .and_then(Value::as_str)
        .map(|value| match value {
            "supported" => TrackCapability::Supported,
            "unsupported" => TrackCapability::Unsupported,
            _ => TrackCapability::Unjudged,
        })
        .unwrap_or_default();

    Link {
        id: non_empty_id(raw.id),
        name: raw.name.trim().to_string(),
        url: raw.url.trim().to_string(),
        auto_track: raw.auto_track,
        keywords: raw
            .keywords
            .into_iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect(),
        last_checked_at: parse_instant(raw.last_checked_at),
        last_success_at: parse_instant(raw.last_success_at),
        tracking_status,
        error_message,
        track_capability,
        matched_keywords: raw.matched_keywords,
        last_hit_at: parse_instant(raw.last_hit_at),
        acknowledged_at: parse_instant(raw.acknowledged_at),
    }
}

fn non_empty_id(id: Option<String>) -> String {
    id.filter(|id| !id.trim().is_empty()).unwrap_or_else(new_id)
}

fn parse_instant(raw: Option<String>) -> Option<DateTime<Utc>> {
    let raw = raw?;
    match DateTime::parse_from_rfc3339(raw.trim()) {
        Ok(dt) => Some(dt.with_timezone(&Utc)),
        Err(err) => {
            debug!(value = %raw, error = %err, "dropping unreadable timestamp");
            None
        }
    }
}
