//! Attendance lifecycle of a concert.
//!
//! ```text
//! PRE_SALE -> CONSIDERING -> LOTTERY -> CONFIRMED -> ATTENDED
//!      \___________\____________\___________\-> SKIPPED
//! ```
//!
//! Everything here is a pure function of the item and `now`; nothing
//! fails. Bad dates read as unscheduled.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::datetime::{DateKind, normalize_stamp, parse_date};
use crate::model::{Group, Item, LotteryResult, Parent, canonical_milestone};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    #[serde(alias = "発売前")]
    PreSale,
    #[serde(alias = "検討中")]
    Considering,
    #[serde(alias = "抽選中")]
    Lottery,
    #[serde(alias = "参戦予定")]
    Confirmed,
    #[serde(alias = "参戦済み")]
    Attended,
    #[serde(alias = "見送")]
    Skipped,
}

impl Status {
    pub const ALL: [Status; 6] = [
        Status::PreSale,
        Status::Considering,
        Status::Lottery,
        Status::Confirmed,
        Status::Attended,
        Status::Skipped,
    ];

    /// Position in the canonical lifecycle; lower is more urgent.
    pub fn rank(self) -> u8 {
        match self {
            Status::PreSale => 0,
            Status::Considering => 1,
            Status::Lottery => 2,
            Status::Confirmed => 3,
            Status::Attended => 4,
            Status::Skipped => 5,
        }
    }

    pub fn is_active(self) -> bool {
        !matches!(self, Status::Attended | Status::Skipped)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::PreSale => "PRE_SALE",
            Status::Considering => "CONSIDERING",
            Status::Lottery => "LOTTERY",
            Status::Confirmed => "CONFIRMED",
            Status::Attended => "ATTENDED",
            Status::Skipped => "SKIPPED",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Status::PreSale => "発売前",
            Status::Considering => "検討中",
            Status::Lottery => "抽選中",
            Status::Confirmed => "参戦予定",
            Status::Attended => "参戦済み",
            Status::Skipped => "見送",
        }
    }

    /// Accepts the wire name, case-insensitively, or the display label.
    pub fn parse(raw: &str) -> Option<Status> {
        let trimmed = raw.trim();
        Status::ALL.into_iter().find(|status| {
            status.as_str().eq_ignore_ascii_case(trimmed) || status.label() == trimmed
        })
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Buy,
    Consider,
    Skip,
    Won,
    Lost,
}

impl Decision {
    pub fn parse(raw: &str) -> Option<Decision> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "BUY" => Some(Decision::Buy),
            "CONSIDER" => Some(Decision::Consider),
            "SKIP" => Some(Decision::Skip),
            "WON" => Some(Decision::Won),
            "LOST" => Some(Decision::Lost),
            _ => None,
        }
    }
}

impl FromStr for Decision {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Decision::parse(s).ok_or_else(|| anyhow::anyhow!("unknown decision: {s}"))
    }
}

#[derive(Debug, Clone, Default)]
pub struct DecisionPayload {
    pub lottery_name: Option<String>,
    pub result_at: Option<String>,
    pub concert_at: Option<String>,
}

/// Applies an explicit user decision. Preconditions on the current status
/// are the caller's business; the transition is applied regardless.
pub fn apply_decision(item: &Item, decision: Decision, payload: &DecisionPayload) -> Item {
    let mut next = item.clone();
    match decision {
        Decision::Buy => {
            next.status = Status::Lottery;
            next.lottery_result = None;
            if let Some(name) = payload
                .lottery_name
                .as_deref()
                .filter(|name| !name.trim().is_empty())
            {
                next.lottery_name = Some(name.trim().to_string());
            }
            if let Some(result_at) = canonical_milestone(payload.result_at.clone()) {
                next.result_at = Some(result_at);
            }
        }
        Decision::Consider => {
            next.status = Status::Considering;
            next.lottery_result = None;
        }
        Decision::Skip => {
            next.status = Status::Skipped;
            next.lottery_result = None;
        }
        Decision::Won => {
            next.status = Status::Confirmed;
            next.lottery_result = Some(LotteryResult::Won);
            next.concert_at = canonical_milestone(payload.concert_at.clone())
                .or_else(|| item.concert_at.clone())
                .or_else(|| normalize_stamp(&item.display_date));
        }
        Decision::Lost => {
            next.status = Status::Skipped;
            next.lottery_result = Some(LotteryResult::Lost);
        }
    }
    debug!(
        item = %item.id,
        from = %item.status,
        to = %next.status,
        ?decision,
        "applied decision"
    );
    next
}

/// Decision by name; an unrecognised name leaves the item untouched.
pub fn apply_named_decision(item: &Item, name: &str, payload: &DecisionPayload) -> Item {
    match Decision::parse(name) {
        Some(decision) => apply_decision(item, decision, payload),
        None => {
            debug!(item = %item.id, decision = name, "ignoring unknown decision");
            item.clone()
        }
    }
}

/// Something the user has to answer or fill in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DueAction {
    AskBuyAtSale,
    AskBuyAtDeadline,
    NeedSetDeadlineAt,
    AskResult,
    NeedSetResultAt,
    NeedSetConcertAt,
}

impl DueAction {
    pub fn as_str(self) -> &'static str {
        match self {
            DueAction::AskBuyAtSale => "ASK_BUY_AT_SALE",
            DueAction::AskBuyAtDeadline => "ASK_BUY_AT_DEADLINE",
            DueAction::NeedSetDeadlineAt => "NEED_SET_DEADLINE_AT",
            DueAction::AskResult => "ASK_RESULT",
            DueAction::NeedSetResultAt => "NEED_SET_RESULT_AT",
            DueAction::NeedSetConcertAt => "NEED_SET_CONCERT_AT",
        }
    }

    pub fn prompt(self) -> &'static str {
        match self {
            DueAction::AskBuyAtSale => "sale has opened: buy, consider or skip?",
            DueAction::AskBuyAtDeadline => "deadline reached: buy or skip?",
            DueAction::NeedSetDeadlineAt => "set the application deadline",
            DueAction::AskResult => "lottery result is out: won or lost?",
            DueAction::NeedSetResultAt => "set the result announcement date",
            DueAction::NeedSetConcertAt => "set the show date",
        }
    }
}

impl fmt::Display for DueAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn milestone_passed(raw: Option<&str>, now: DateTime<Utc>) -> bool {
    parse_date(raw, DateKind::Milestone).is_some_and(|at| now >= at)
}

/// The single action the user owes for `item`, consulting only the
/// milestone that belongs to its current status.
pub fn due_action(item: &Item, now: DateTime<Utc>) -> Option<DueAction> {
    match item.status {
        Status::PreSale => {
            milestone_passed(item.sale_at.as_deref(), now).then_some(DueAction::AskBuyAtSale)
        }
        Status::Considering => match item.deadline_at.as_deref() {
            None => Some(DueAction::NeedSetDeadlineAt),
            Some(raw) => {
                milestone_passed(Some(raw), now).then_some(DueAction::AskBuyAtDeadline)
            }
        },
        Status::Lottery => match item.result_at.as_deref() {
            None => Some(DueAction::NeedSetResultAt),
            Some(raw) => milestone_passed(Some(raw), now).then_some(DueAction::AskResult),
        },
        Status::Confirmed => item
            .concert_at
            .is_none()
            .then_some(DueAction::NeedSetConcertAt),
        Status::Attended | Status::Skipped => None,
    }
}

/// Badge state: does anything in the collection need attention?
pub fn has_pending_alert(parents: &[Parent], now: DateTime<Utc>) -> bool {
    parents
        .iter()
        .flat_map(Parent::items)
        .any(|item| due_action(item, now).is_some())
}

#[derive(Debug, Clone)]
pub struct DueRow<'a> {
    pub parent: &'a Parent,
    pub group: &'a Group,
    pub item: &'a Item,
    pub action: DueAction,
}

pub fn due_items(parents: &[Parent], now: DateTime<Utc>) -> Vec<DueRow<'_>> {
    let mut rows = Vec::new();
    for parent in parents {
        for group in &parent.groups {
            for item in &group.items {
                if let Some(action) = due_action(item, now) {
                    rows.push(DueRow {
                        parent,
                        group,
                        item,
                        action,
                    });
                }
            }
        }
    }
    rows
}

/// Time-driven transitions. The only one: a confirmed show whose date has
/// passed becomes attended.
pub fn auto_advance(item: &Item, now: DateTime<Utc>) -> Item {
    if item.status != Status::Confirmed {
        return item.clone();
    }
    match parse_date(item.concert_at.as_deref(), DateKind::Event) {
        Some(at) if now >= at => {
            let mut next = item.clone();
            next.status = Status::Attended;
            next
        }
        _ => item.clone(),
    }
}

/// Sweeps the whole tree. Returns the new collection and how many items
/// changed status.
pub fn auto_advance_all(parents: &[Parent], now: DateTime<Utc>) -> (Vec<Parent>, usize) {
    let mut advanced = 0_usize;
    let swept = parents
        .iter()
        .map(|parent| {
            let mut parent = parent.clone();
            for group in &mut parent.groups {
                for item in &mut group.items {
                    let next = auto_advance(item, now);
                    if next.status != item.status {
                        debug!(item = %item.id, "auto-advanced to ATTENDED");
                        advanced += 1;
                        *item = next;
                    }
                }
            }
            parent
        })
        .collect();
    (swept, advanced)
}
