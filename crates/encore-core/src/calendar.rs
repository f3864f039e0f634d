use std::cmp::Ordering;

use serde::Serialize;

use crate::datetime::{
  date_key,
  time_label
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
  PartialEq,
  Eq,
)]
#[serde(rename_all = "lowercase")]
pub enum CalendarEventKind {
  Concert,
  Result,
  Deadline,
  Sale
}

impl CalendarEventKind {
  /// Same-day ordering: the show first,
  /// the sale last.
  pub fn priority(self) -> u8 {
    match self {
      | CalendarEventKind::Concert => 1,
      | CalendarEventKind::Result => 2,
      | CalendarEventKind::Deadline => 3,
      | CalendarEventKind::Sale => 4
    }
  }

  pub fn label(self) -> &'static str {
    match self {
      | CalendarEventKind::Concert => {
        "concert"
      }
      | CalendarEventKind::Result => {
        "result"
      }
      | CalendarEventKind::Deadline => {
        "deadline"
      }
      | CalendarEventKind::Sale => "sale"
    }
  }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEvent {
  pub date_key:   String,
  pub time_label: Option<String>,
  #[serde(rename = "type")]
  pub kind:       CalendarEventKind,
  pub parent_id:  String,
  pub group_id:   String,
  pub item_id:    String,
  pub title:      String,
  pub status:     Status
}

fn item_dates(
  item: &Item
) -> [(CalendarEventKind, Option<&str>); 4]
{
  [
    (
      CalendarEventKind::Concert,
      item.event_date()
    ),
    (
      CalendarEventKind::Result,
      item.result_at.as_deref()
    ),
    (
      CalendarEventKind::Deadline,
      item.deadline_at.as_deref()
    ),
    (
      CalendarEventKind::Sale,
      item.sale_at.as_deref()
    )
  ]
}

/// Expands every dated milestone of
/// every concert into a calendar entry.
/// Free-text dates that are not real
/// dates are left off the grid.
pub fn project_calendar(
  parents: &[Parent]
) -> Vec<CalendarEvent> {
  let mut events = Vec::new();
  for parent in parents {
    for group in &parent.groups {
      for item in &group.items {
        let title = if item
          .venue
          .trim()
          .is_empty()
        {
          format!(
            "{} / {}",
            parent.name, group.name
          )
        } else {
          format!(
            "{} / {} @ {}",
            parent.name,
            group.name,
            item.venue.trim()
          )
        };

        for (kind, raw) in
          item_dates(item)
        {
          let Some(raw) = raw else {
            continue;
          };
          let Some(key) = date_key(raw)
          else {
            continue;
          };
          events.push(CalendarEvent {
            date_key: key,
            time_label: time_label(raw),
            kind,
            parent_id: parent.id.clone(),
            group_id: group.id.clone(),
            item_id: item.id.clone(),
            title: title.clone(),
            status: item.status
          });
        }
      }
    }
  }

  events.sort_by(compare_events);
  events
}

fn compare_events(
  a: &CalendarEvent,
  b: &CalendarEvent
) -> Ordering {
  a.date_key
    .cmp(&b.date_key)
    .then_with(|| {
      a.kind
        .priority()
        .cmp(&b.kind.priority())
    })
    .then_with(|| {
      a.time_label.cmp(&b.time_label)
    })
    .then_with(|| a.title.cmp(&b.title))
}

/// Entries that fall in one month of
/// the grid.
pub fn events_in_month(
  events: &[CalendarEvent],
  year: i32,
  month: u32
) -> Vec<&CalendarEvent> {
  let prefix =
    format!("{year:04}-{month:02}-");
  events
    .iter()
    .filter(|event| {
      event.date_key.starts_with(&prefix)
    })
    .collect()
}
