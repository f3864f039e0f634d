use std::collections::BTreeMap;
use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use chrono::{Datelike, NaiveDate};
use unicode_width::UnicodeWidthStr;

use crate::calendar::CalendarEvent;
use crate::config::Config;
use crate::datetime::format_project_stamp;
use crate::lifecycle::{DueRow, Status, due_action};
use crate::model::{Group, Item, Link, Parent, TrackingStatus};
use crate::sort::{ItemRow, ItemSortMode, ParentSortMode, next_milestone};
use crate::store::{DisplaySettings, Settings};
use crate::tracking::CycleReport;

const SHORT_ID_LEN: usize = 8;

pub fn short_id(id: &str) -> &str {
    id.get(..SHORT_ID_LEN).unwrap_or(id)
}

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color = cfg.get_switch("color")?.unwrap_or(true);
        Ok(Self { color })
    }

    #[tracing::instrument(skip(self, parents, now))]
    pub fn print_artist_table(
        &mut self,
        parents: &[Parent],
        now: chrono::DateTime<chrono::Utc>,
    ) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();

        let headers = vec![
            "ID".to_string(),
            "Artist".to_string(),
            "Tours".to_string(),
            "Active".to_string(),
            "Due".to_string(),
            "Tracked".to_string(),
            "Notice".to_string(),
        ];

        let mut rows = Vec::with_capacity(parents.len());
        for parent in parents {
            let active = parent
                .items()
                .filter(|item| item.status.is_active())
                .count();
            let due = parent
                .items()
                .filter(|item| due_action(item, now).is_some())
                .count();
            let tracked = parent.links.iter().filter(|link| link.auto_track).count();
            let notice = if parent.links.iter().any(Link::has_pending_notice) {
                self.paint("new", "35")
            } else {
                String::new()
            };
            let due = if due > 0 {
                self.paint(&due.to_string(), "31")
            } else {
                String::new()
            };

            rows.push(vec![
                self.paint(short_id(&parent.id), "33"),
                parent.name.clone(),
                parent.groups.len().to_string(),
                active.to_string(),
                due,
                tracked.to_string(),
                notice,
            ]);
        }

        write_table(&mut out, headers, rows)?;
        Ok(())
    }

    #[tracing::instrument(skip(self, rows, now))]
    pub fn print_concert_table(
        &mut self,
        rows: &[ItemRow],
        now: chrono::DateTime<chrono::Utc>,
    ) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();

        let headers = vec![
            "ID".to_string(),
            "Artist".to_string(),
            "Tour".to_string(),
            "Date".to_string(),
            "Venue".to_string(),
            "Status".to_string(),
            "Next".to_string(),
            "Action".to_string(),
        ];

        let mut table = Vec::with_capacity(rows.len());
        for row in rows {
            let item = &row.item;
            let action = due_action(item, now)
                .map(|action| self.paint(action.prompt(), "31"))
                .unwrap_or_default();
            table.push(vec![
                self.paint(short_id(&item.id), "33"),
                row.parent_name.clone(),
                row.group_name.clone(),
                item.event_date().unwrap_or(&item.display_date).to_string(),
                item.venue.clone(),
                self.paint_status(item.status),
                next_milestone(item).unwrap_or_default().to_string(),
                action,
            ]);
        }

        write_table(&mut out, headers, table)?;
        Ok(())
    }

    #[tracing::instrument(skip_all)]
    pub fn print_concert_info(
        &mut self,
        parent: &Parent,
        group: &Group,
        item: &Item,
        images: &BTreeMap<String, String>,
        now: chrono::DateTime<chrono::Utc>,
    ) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();

        writeln!(out, "id        {}", item.id)?;
        writeln!(out, "artist    {}", parent.name)?;
        writeln!(out, "tour      {}", group.name)?;
        writeln!(out, "date      {}", item.display_date)?;
        writeln!(out, "status    {}", self.paint_status(item.status))?;
        if !item.venue.is_empty() {
            writeln!(out, "venue     {}", item.venue)?;
        }
        if !item.price.is_empty() {
            writeln!(out, "price     {}", item.price)?;
        }
        if !item.sale_link.is_empty() {
            writeln!(out, "sale link {}", item.sale_link)?;
        }
        if let Some(sale_at) = &item.sale_at {
            writeln!(out, "sale      {sale_at}")?;
        }
        if let Some(deadline_at) = &item.deadline_at {
            writeln!(out, "deadline  {deadline_at}")?;
        }
        if let Some(result_at) = &item.result_at {
            writeln!(out, "result    {result_at}")?;
        }
        if let Some(concert_at) = &item.concert_at {
            writeln!(out, "show      {concert_at}")?;
        }
        if let Some(lottery_name) = &item.lottery_name {
            writeln!(out, "lottery   {lottery_name}")?;
        }
        if let Some(result) = item.lottery_result {
            writeln!(out, "outcome   {result:?}")?;
        }
        if let Some(action) = due_action(item, now) {
            writeln!(out, "action    {}", self.paint(action.prompt(), "31"))?;
        }
        for (idx, id) in item.image_ids.iter().enumerate() {
            let url = images.get(id).map(String::as_str).unwrap_or("(missing)");
            writeln!(out, "image {idx:<3} {url}")?;
        }

        Ok(())
    }

    #[tracing::instrument(skip_all)]
    pub fn print_due_table(&mut self, rows: &[DueRow<'_>]) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();

        if rows.is_empty() {
            writeln!(out, "Nothing needs an answer.")?;
            return Ok(());
        }

        let headers = vec![
            "ID".to_string(),
            "Artist".to_string(),
            "Tour".to_string(),
            "Date".to_string(),
            "Status".to_string(),
            "Action".to_string(),
        ];

        let table = rows
            .iter()
            .map(|row| {
                vec![
                    self.paint(short_id(&row.item.id), "33"),
                    row.parent.name.clone(),
                    row.group.name.clone(),
                    row.item.display_date.clone(),
                    self.paint_status(row.item.status),
                    self.paint(row.action.prompt(), "31"),
                ]
            })
            .collect();

        write_table(&mut out, headers, table)?;
        Ok(())
    }

    #[tracing::instrument(skip(self, events))]
    pub fn print_calendar(
        &mut self,
        events: &[&CalendarEvent],
        year: i32,
        month: u32,
    ) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        let first = NaiveDate::from_ymd_opt(year, month, 1)
            .ok_or_else(|| anyhow!("invalid month: {year:04}-{month:02}"))?;

        writeln!(out, "{}", first.format("%B %Y"))?;
        writeln!(out, "Mo Tu We Th Fr Sa Su")?;

        let offset = first.weekday().num_days_from_monday() as usize;
        let mut line = "   ".repeat(offset);
        let mut day = first;
        while day.month() == month {
            let key = day.format("%Y-%m-%d").to_string();
            let label = format!("{:>2}", day.day());
            if events.iter().any(|event| event.date_key == key) {
                line.push_str(&self.paint(&label, "1;36"));
            } else {
                line.push_str(&label);
            }
            if day.weekday() == chrono::Weekday::Sun {
                writeln!(out, "{}", line.trim_end())?;
                line.clear();
            } else {
                line.push(' ');
            }
            let Some(next) = day.succ_opt() else {
                break;
            };
            day = next;
        }
        if !line.trim().is_empty() {
            writeln!(out, "{}", line.trim_end())?;
        }
        writeln!(out)?;

        if events.is_empty() {
            writeln!(out, "No events this month.")?;
            return Ok(());
        }

        let headers = vec![
            "Date".to_string(),
            "Time".to_string(),
            "Event".to_string(),
            "Concert".to_string(),
            "Status".to_string(),
        ];
        let rows = events
            .iter()
            .map(|event| {
                vec![
                    event.date_key.clone(),
                    event.time_label.clone().unwrap_or_default(),
                    event.kind.label().to_string(),
                    event.title.clone(),
                    self.paint_status(event.status),
                ]
            })
            .collect();

        write_table(&mut out, headers, rows)?;
        Ok(())
    }

    #[tracing::instrument(skip_all)]
    pub fn print_link_table(&mut self, links: &[(&Parent, &Link)]) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();

        let headers = vec![
            "ID".to_string(),
            "Artist".to_string(),
            "Name".to_string(),
            "URL".to_string(),
            "Track".to_string(),
            "Checked".to_string(),
            "State".to_string(),
        ];

        let rows = links
            .iter()
            .map(|(parent, link)| {
                let state = match link.tracking_status {
                    Some(TrackingStatus::Failed) => self.paint(
                        link.error_message
                            .map(|error| error.as_str())
                            .unwrap_or("FAILED"),
                        "31",
                    ),
                    Some(TrackingStatus::Hit) if link.has_pending_notice() => self.paint(
                        &format!("hit: {}", link.matched_keywords.join(", ")),
                        "35",
                    ),
                    Some(TrackingStatus::Hit) | Some(TrackingStatus::Success) => "ok".to_string(),
                    None => String::new(),
                };
                vec![
                    self.paint(short_id(&link.id), "33"),
                    parent.name.clone(),
                    link.name.clone(),
                    link.url.clone(),
                    if link.auto_track { "yes" } else { "no" }.to_string(),
                    link.last_checked_at
                        .map(format_project_stamp)
                        .unwrap_or_default(),
                    state,
                ]
            })
            .collect();

        write_table(&mut out, headers, rows)?;
        Ok(())
    }

    pub fn print_cycle_report(&mut self, report: &CycleReport) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        writeln!(
            out,
            "Tracked {} link(s): {} ok, {} failed, {} skipped, {} new hit(s).",
            report.probed + report.silently_skipped,
            report.succeeded,
            report.failed,
            report.silently_skipped,
            report.hits
        )?;
        if let Some(message) = &report.persist_error {
            writeln!(out, "{}", self.paint(message, "31"))?;
        }
        Ok(())
    }

    pub fn print_settings(
        &mut self,
        settings: &Settings,
        display: &DisplaySettings,
        parent_sort: ParentSortMode,
        item_sort: ItemSortMode,
    ) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        writeln!(out, "auto-tracking   {}", on_off(settings.auto_tracking))?;
        writeln!(out, "interval-days   {}", settings.tracking_interval_days)?;
        writeln!(out, "show-attended   {}", on_off(display.show_attended))?;
        writeln!(out, "show-skipped    {}", on_off(display.show_skipped))?;
        writeln!(out, "artist sort     {parent_sort}")?;
        writeln!(out, "concert sort    {item_sort}")?;
        Ok(())
    }

    fn paint_status(&self, status: Status) -> String {
        let code = match status {
            Status::PreSale => "37",
            Status::Considering => "33",
            Status::Lottery => "36",
            Status::Confirmed => "32",
            Status::Attended => "34",
            Status::Skipped => "90",
        };
        self.paint(status.label(), code)
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color || !io::stdout().is_terminal() {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn on_off(value: bool) -> &'static str {
    if value { "on" } else { "off" }
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(header.as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate().take(column_count) {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for idx in 0..column_count {
        write!(writer, "{:width$} ", headers[idx], width = widths[idx])?;
    }
    writeln!(writer)?;

    for width in &widths {
        write!(writer, "{:-<width$} ", "", width = *width)?;
    }
    writeln!(writer)?;

    for row in rows {
        for (idx, cell) in row.iter().enumerate().take(column_count) {
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = widths[idx].saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}
