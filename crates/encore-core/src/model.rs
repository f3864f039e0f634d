use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::datetime::UNDETERMINED;
use crate::lifecycle::Status;

pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum LotteryResult {
    Won,
    Lost,
}

/// One performance of a tour.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: String,

    /// Free-text date shown when `concert_at` is unset. May hold `TBD`.
    pub display_date: String,

    #[serde(default)]
    pub venue: String,

    #[serde(default)]
    pub price: String,

    #[serde(default)]
    pub sale_link: String,

    pub status: Status,

    #[serde(default)]
    pub sale_at: Option<String>,

    #[serde(default)]
    pub deadline_at: Option<String>,

    #[serde(default)]
    pub result_at: Option<String>,

    #[serde(default)]
    pub concert_at: Option<String>,

    #[serde(default)]
    pub lottery_name: Option<String>,

    #[serde(default)]
    pub lottery_result: Option<LotteryResult>,

    #[serde(default)]
    pub image_ids: Vec<String>,
}

impl Item {
    pub fn new_pre_sale(display_date: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            display_date: display_date.into(),
            venue: String::new(),
            price: String::new(),
            sale_link: String::new(),
            status: Status::PreSale,
            sale_at: None,
            deadline_at: None,
            result_at: None,
            concert_at: None,
            lottery_name: None,
            lottery_result: None,
            image_ids: vec![],
        }
    }

    /// The date string used for ordering and the calendar: `concert_at`
    /// when scheduled, otherwise the free-text display date unless it is
    /// the undetermined marker.
    pub fn event_date(&self) -> Option<&str> {
        if let Some(at) = self.concert_at.as_deref() {
            return Some(at);
        }
        let display = self.display_date.trim();
        if display.is_empty() || display.eq_ignore_ascii_case(UNDETERMINED) {
            None
        } else {
            Some(display)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub items: Vec<Item>,
}

impl Group {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            name: name.into(),
            items: vec![],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Parent {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub order: i64,
    #[serde(default)]
    pub groups: Vec<Group>,
    #[serde(default)]
    pub links: Vec<Link>,
}

impl Parent {
    pub fn new(name: impl Into<String>, order: i64) -> Self {
        Self {
            id: new_id(),
            name: name.into(),
            order,
            groups: vec![],
            links: vec![],
        }
    }

    pub fn has_tracking_enabled(&self) -> bool {
        self.links.iter().any(|link| link.auto_track)
    }

    pub fn items(&self) -> impl Iterator<Item = &Item> {
        self.groups.iter().flat_map(|group| group.items.iter())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TrackingStatus {
    Success,
    Failed,
    Hit,
}

/// User-facing reasons a probe failed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrackError {
    Unreachable,
    ContentChanged,
    AccessRestricted,
    Unknown,
}

impl TrackError {
    pub fn as_str(self) -> &'static str {
        match self {
            TrackError::Unreachable => "UNREACHABLE",
            TrackError::ContentChanged => "CONTENT_CHANGED",
            TrackError::AccessRestricted => "ACCESS_RESTRICTED",
            TrackError::Unknown => "UNKNOWN",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TrackCapability {
    Supported,
    Unsupported,
    #[default]
    Unjudged,
}

/// External site watched for an artist.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Link {
    pub id: String,
    pub name: String,
    pub url: String,

    #[serde(default)]
    pub auto_track: bool,

    #[serde(default)]
    pub keywords: Vec<String>,

    #[serde(default)]
    pub last_checked_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub last_success_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub tracking_status: Option<TrackingStatus>,

    #[serde(default)]
    pub error_message: Option<TrackError>,

    #[serde(default)]
    pub track_capability: TrackCapability,

    #[serde(default)]
    pub matched_keywords: Vec<String>,

    #[serde(default)]
    pub last_hit_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub acknowledged_at: Option<DateTime<Utc>>,
}

impl Link {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            name: name.into(),
            url: url.into(),
            auto_track: false,
            keywords: vec![],
            last_checked_at: None,
            last_success_at: None,
            tracking_status: None,
            error_message: None,
            track_capability: TrackCapability::Unjudged,
            matched_keywords: vec![],
            last_hit_at: None,
            acknowledged_at: None,
        }
    }

    pub fn has_pending_notice(&self) -> bool {
        match (self.last_hit_at, self.acknowledged_at) {
            (Some(hit), Some(ack)) => hit > ack,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    pub fn acknowledge(&mut self, now: DateTime<Utc>) {
        self.acknowledged_at = Some(now);
    }
}

/// Links across the collection with an unread keyword hit.
pub fn pending_notices(parents: &[Parent]) -> Vec<(&Parent, &Link)> {
    parents
        .iter()
        .flat_map(|parent| {
            parent
                .links
                .iter()
                .filter(|link| link.has_pending_notice())
                .map(move |link| (parent, link))
        })
        .collect()
}

/// Field edits from the editing surface. `Some(None)` clears an optional
/// field; `None` leaves it alone.
#[derive(Debug, Clone, Default)]
pub struct ItemPatch {
    pub display_date: Option<String>,
    pub venue: Option<String>,
    pub price: Option<String>,
    pub sale_link: Option<String>,
    pub sale_at: Option<Option<String>>,
    pub deadline_at: Option<Option<String>>,
    pub result_at: Option<Option<String>>,
    pub concert_at: Option<Option<String>>,
    pub lottery_name: Option<Option<String>>,
}

impl ItemPatch {
    pub fn is_empty(&self) -> bool {
        self.display_date.is_none()
            && self.venue.is_none()
            && self.price.is_none()
            && self.sale_link.is_none()
            && self.sale_at.is_none()
            && self.deadline_at.is_none()
            && self.result_at.is_none()
            && self.concert_at.is_none()
            && self.lottery_name.is_none()
    }

    /// Applies the patch. Milestones are stored in canonical form; text
    /// that is not a date clears the milestone.
    pub fn apply(self, item: &mut Item) {
        if let Some(display_date) = self.display_date {
            item.display_date = display_date;
        }
        if let Some(venue) = self.venue {
            item.venue = venue;
        }
        if let Some(price) = self.price {
            item.price = price;
        }
        if let Some(sale_link) = self.sale_link {
            item.sale_link = sale_link;
        }
        if let Some(sale_at) = self.sale_at {
            item.sale_at = canonical_milestone(sale_at);
        }
        if let Some(deadline_at) = self.deadline_at {
            item.deadline_at = canonical_milestone(deadline_at);
        }
        if let Some(result_at) = self.result_at {
            item.result_at = canonical_milestone(result_at);
        }
        if let Some(concert_at) = self.concert_at {
            item.concert_at = canonical_milestone(concert_at);
        }
        if let Some(lottery_name) = self.lottery_name {
            item.lottery_name = lottery_name.filter(|name| !name.trim().is_empty());
        }
    }
}

pub(crate) fn canonical_milestone(raw: Option<String>) -> Option<String> {
    raw.as_deref().and_then(crate::datetime::normalize_stamp)
}
