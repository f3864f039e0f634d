use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use serde::{
  Deserialize,
  Serialize
};

use crate::lifecycle::Status;
use crate::model::{
  Item,
  Parent
};

#[derive(
  Debug,
  Clone,
  Copy,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
  Default,
)]
#[serde(rename_all = "lowercase")]
pub enum ParentSortMode {
  #[default]
  Priority,
  Manual
}

#[derive(
  Debug,
  Clone,
  Copy,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
  Default,
)]
#[serde(rename_all = "lowercase")]
pub enum ItemSortMode {
  #[default]
  Status,
  Milestone
}

impl FromStr for ParentSortMode {
  type Err = anyhow::Error;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    match s
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "priority" => {
        Ok(ParentSortMode::Priority)
      }
      | "manual" => {
        Ok(ParentSortMode::Manual)
      }
      | other => Err(anyhow!(
        "unknown artist sort mode: \
         {other}"
      ))
    }
  }
}

impl FromStr for ItemSortMode {
  type Err = anyhow::Error;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    match s
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "status" => {
        Ok(ItemSortMode::Status)
      }
      | "milestone" => {
        Ok(ItemSortMode::Milestone)
      }
      | other => Err(anyhow!(
        "unknown concert sort mode: \
         {other}"
      ))
    }
  }
}

impl fmt::Display for ParentSortMode {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    f.write_str(match self {
      | ParentSortMode::Priority => {
        "priority"
      }
      | ParentSortMode::Manual => {
        "manual"
      }
    })
  }
}

impl fmt::Display for ItemSortMode {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    f.write_str(match self {
      | ItemSortMode::Status => "status",
      | ItemSortMode::Milestone => {
        "milestone"
      }
    })
  }
}

/// A concert flattened out of the tree
/// for the all-concerts list.
#[derive(Debug, Clone)]
pub struct ItemRow {
  pub parent_id:   String,
  pub parent_name: String,
  pub group_id:    String,
  pub group_name:  String,
  pub item:        Item
}

pub fn flatten_items(
  parents: &[Parent]
) -> Vec<ItemRow> {
  parents
    .iter()
    .flat_map(|parent| {
      parent.groups.iter().flat_map(
        move |group| {
          group.items.iter().map(
            move |item| ItemRow {
              parent_id:   parent
                .id
                .clone(),
              parent_name: parent
                .name
                .clone(),
              group_id:    group
                .id
                .clone(),
              group_name:  group
                .name
                .clone(),
              item:        item.clone()
            }
          )
        }
      )
    })
    .collect()
}

fn parent_bucket(
  parent: &Parent
) -> (u8, u8) {
  let min_active_rank = parent
    .items()
    .filter(|item| {
      item.status.is_active()
    })
    .map(|item| item.status.rank())
    .min();

  match min_active_rank {
    | Some(rank) => (1, rank),
    | None
      if parent
        .has_tracking_enabled() =>
    {
      (2, 0)
    }
    | None => (3, 0)
  }
}

fn compare_parents(
  a: &Parent,
  b: &Parent,
  mode: ParentSortMode
) -> Ordering {
  match mode {
    | ParentSortMode::Manual => a
      .order
      .cmp(&b.order)
      .then_with(|| a.name.cmp(&b.name)),
    | ParentSortMode::Priority => {
      parent_bucket(a)
        .cmp(&parent_bucket(b))
        .then_with(|| {
          a.name.cmp(&b.name)
        })
    }
  }
}

pub fn sort_parents(
  parents: &mut [Parent],
  mode: ParentSortMode
) {
  parents.sort_by(|a, b| {
    compare_parents(a, b, mode)
  });
}

fn item_bucket(status: Status) -> u8 {
  match status {
    | Status::PreSale
    | Status::Considering
    | Status::Lottery => 1,
    | Status::Confirmed => 2,
    | Status::Attended => 3,
    | Status::Skipped => 4
  }
}

/// The date that matters next for the
/// item's stage, falling back to the
/// show date.
pub fn next_milestone(
  item: &Item
) -> Option<&str> {
  let milestone = match item.status {
    | Status::Lottery => {
      item.result_at.as_deref()
    }
    | Status::Considering => {
      item.deadline_at.as_deref()
    }
    | Status::PreSale => {
      item.sale_at.as_deref()
    }
    | _ => None
  };
  milestone.or_else(|| item.event_date())
}

fn compare_optional_dates(
  a: Option<&str>,
  b: Option<&str>
) -> Ordering {
  match (a, b) {
    | (Some(a), Some(b)) => a.cmp(b),
    | (Some(_), None) => Ordering::Less,
    | (None, Some(_)) => {
      Ordering::Greater
    }
    | (None, None) => Ordering::Equal
  }
}

fn compare_items(
  a: &Item,
  b: &Item,
  mode: ItemSortMode
) -> Ordering {
  let bucket = || {
    item_bucket(a.status)
      .cmp(&item_bucket(b.status))
  };
  match mode {
    | ItemSortMode::Status => {
      let (da, db) =
        (a.event_date(), b.event_date());
      da.is_none()
        .cmp(&db.is_none())
        .then_with(bucket)
        .then_with(|| {
          compare_optional_dates(da, db)
        })
    }
    | ItemSortMode::Milestone => {
      compare_optional_dates(
        next_milestone(a),
        next_milestone(b)
      )
      .then_with(bucket)
    }
  }
}

/// Stable sort; dates compare as plain
/// strings, which orders canonical
/// stamps chronologically.
pub fn sort_items(
  rows: &mut [ItemRow],
  mode: ItemSortMode
) {
  rows.sort_by(|a, b| {
    compare_items(&a.item, &b.item, mode)
  });
}
