use std::future::Future;
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, anyhow};
use chrono::{DateTime, Datelike, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::calendar::{events_in_month, project_calendar};
use crate::cli::{
    ArtistCommand, Command, ConcertCommand, ConcertFields, ImageCommand, LinkCommand,
    SettingsArgs, SortCommand, TourCommand,
};
use crate::config::Config;
use crate::datastore::PersistError;
use crate::datetime::{Clock, project_timezone};
use crate::images::{ImageError, detach_image, move_image};
use crate::lifecycle::{
    Decision, DecisionPayload, Status, apply_decision, due_items, has_pending_alert,
};
use crate::model::{Group, Item, ItemPatch, Link, Parent, TrackCapability, pending_notices};
use crate::render::{Renderer, short_id};
use crate::sort::{ItemSortMode, ParentSortMode, flatten_items, sort_items, sort_parents};
use crate::store::AppStore;
use crate::tracking::probe::{HttpProbe, judge_capability};
use crate::tracking::{CycleOutcome, Tracker, TrackerConfig, Trigger, normalize_url};
use crate::transfer::{export_json, export_to_file, read_import};

/// Everything a handler needs; built once per invocation.
pub struct Session<'a> {
    pub store: Arc<AppStore>,
    pub cfg: &'a Config,
    pub renderer: &'a mut Renderer,
    pub clock: Arc<dyn Clock>,
}

#[instrument(skip(session, command))]
pub fn dispatch(session: &mut Session<'_>, command: Command) -> anyhow::Result<()> {
    debug!(?command, "dispatching command");

    match command {
        Command::Artist(cmd) => cmd_artist(session, cmd),
        Command::Tour(cmd) => cmd_tour(session, cmd),
        Command::Concert(cmd) => cmd_concert(session, cmd),
        Command::Decide {
            concert,
            decision,
            lottery_name,
            result_at,
            concert_at,
        } => cmd_decide(
            session,
            &concert,
            decision,
            DecisionPayload {
                lottery_name,
                result_at,
                concert_at,
            },
        ),
        Command::List { sort } => cmd_list(session, sort),
        Command::Due => cmd_due(session),
        Command::Calendar { month } => cmd_calendar(session, month.as_deref()),
        Command::Link(cmd) => cmd_link(session, cmd),
        Command::Track { auto } => {
            cmd_track(session, if auto { Trigger::Auto } else { Trigger::Manual })
        }
        Command::Refresh => cmd_refresh(session),
        Command::Watch => cmd_watch(session),
        Command::Image(cmd) => cmd_image(session, cmd),
        Command::Sort(cmd) => cmd_sort(session, cmd),
        Command::Settings(args) => cmd_settings(session, args),
        Command::Export { path } => cmd_export(session, path.as_deref()),
        Command::Import { path, yes } => cmd_import(session, &path, yes),
    }
}

/// Surfaces a failed flush as the blocking message the user sees.
fn persisted<R>(result: Result<R, PersistError>) -> anyhow::Result<R> {
    result.map_err(|err| {
        error!(error = %err, storage_full = err.is_storage_full(), "persist failed");
        let message = err.user_message();
        anyhow::Error::new(err).context(message)
    })
}

/// Time-driven transitions run before anything is shown.
fn sweep(session: &Session<'_>) -> anyhow::Result<()> {
    let advanced = persisted(session.store.sweep_auto_advance(session.clock.now()))?;
    if advanced > 0 {
        info!(advanced, "auto-advanced concerts");
    }
    Ok(())
}

fn block_on<F: Future>(future: F) -> anyhow::Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    Ok(runtime.block_on(future))
}

fn tracker(session: &Session<'_>) -> anyhow::Result<Arc<Tracker>> {
    let probe = HttpProbe::new()?;
    Ok(Arc::new(Tracker::new(
        session.store.clone(),
        Arc::new(probe),
        session.clock.clone(),
        TrackerConfig::from_config(session.cfg),
    )))
}

// Entity lookup: exact id, then exact name, then unique id prefix.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupRef {
    pub parent_id: String,
    pub group_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemRef {
    pub parent_id: String,
    pub group_id: String,
    pub item_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkRef {
    pub parent_id: String,
    pub link_id: String,
}

fn pick<K: Clone>(what: &str, needle: &str, candidates: &[(K, &str, Option<&str>)]) -> anyhow::Result<K> {
    let needle = needle.trim();
    if needle.is_empty() {
        return Err(anyhow!("empty {what} reference"));
    }

    if let Some((key, _, _)) = candidates.iter().find(|(_, id, _)| *id == needle) {
        return Ok(key.clone());
    }

    let by_name: Vec<_> = candidates
        .iter()
        .filter(|(_, _, name)| *name == Some(needle))
        .collect();
    match by_name.as_slice() {
        [(key, _, _)] => return Ok(key.clone()),
        [] => {}
        many => {
            return Err(anyhow!(
                "{what} name {needle:?} is ambiguous ({} matches); use an id",
                many.len()
            ));
        }
    }

    let by_prefix: Vec<_> = candidates
        .iter()
        .filter(|(_, id, _)| id.starts_with(needle))
        .collect();
    match by_prefix.as_slice() {
        [(key, _, _)] => Ok(key.clone()),
        [] => Err(anyhow!("no {what} matches {needle:?}")),
        many => Err(anyhow!(
            "{what} id prefix {needle:?} is ambiguous ({} matches)",
            many.len()
        )),
    }
}

pub fn resolve_parent(parents: &[Parent], needle: &str) -> anyhow::Result<String> {
    let candidates: Vec<_> = parents
        .iter()
        .map(|parent| (parent.id.clone(), parent.id.as_str(), Some(parent.name.as_str())))
        .collect();
    pick("artist", needle, &candidates)
}

pub fn resolve_group(parents: &[Parent], needle: &str) -> anyhow::Result<GroupRef> {
    let candidates: Vec<_> = parents
        .iter()
        .flat_map(|parent| {
            parent.groups.iter().map(move |group| {
                (
                    GroupRef {
                        parent_id: parent.id.clone(),
                        group_id: group.id.clone(),
                    },
                    group.id.as_str(),
                    Some(group.name.as_str()),
                )
            })
        })
        .collect();
    pick("tour", needle, &candidates)
}

pub fn resolve_item(parents: &[Parent], needle: &str) -> anyhow::Result<ItemRef> {
    let candidates: Vec<_> = parents
        .iter()
        .flat_map(|parent| {
            parent.groups.iter().flat_map(move |group| {
                group.items.iter().map(move |item| {
                    (
                        ItemRef {
                            parent_id: parent.id.clone(),
                            group_id: group.id.clone(),
                            item_id: item.id.clone(),
                        },
                        item.id.as_str(),
                        None,
                    )
                })
            })
        })
        .collect();
    pick("concert", needle, &candidates)
}

pub fn resolve_link(parents: &[Parent], needle: &str) -> anyhow::Result<LinkRef> {
    let candidates: Vec<_> = parents
        .iter()
        .flat_map(|parent| {
            parent.links.iter().map(move |link| {
                (
                    LinkRef {
                        parent_id: parent.id.clone(),
                        link_id: link.id.clone(),
                    },
                    link.id.as_str(),
                    Some(link.name.as_str()),
                )
            })
        })
        .collect();
    pick("link", needle, &candidates)
}

fn parent_mut<'a>(parents: &'a mut [Parent], id: &str) -> Option<&'a mut Parent> {
    parents.iter_mut().find(|parent| parent.id == id)
}

fn group_mut<'a>(parents: &'a mut [Parent], target: &GroupRef) -> Option<&'a mut Group> {
    parent_mut(parents, &target.parent_id)?
        .groups
        .iter_mut()
        .find(|group| group.id == target.group_id)
}

fn item_mut<'a>(parents: &'a mut [Parent], target: &ItemRef) -> Option<&'a mut Item> {
    parent_mut(parents, &target.parent_id)?
        .groups
        .iter_mut()
        .find(|group| group.id == target.group_id)?
        .items
        .iter_mut()
        .find(|item| item.id == target.item_id)
}

fn find_item<'a>(parents: &'a [Parent], target: &ItemRef) -> Option<(&'a Parent, &'a Group, &'a Item)> {
    let parent = parents.iter().find(|parent| parent.id == target.parent_id)?;
    let group = parent.groups.iter().find(|group| group.id == target.group_id)?;
    let item = group.items.iter().find(|item| item.id == target.item_id)?;
    Some((parent, group, item))
}

fn gone(what: &str) -> anyhow::Error {
    anyhow!("{what} disappeared while editing")
}

fn item_image_ids(parents: &[Parent]) -> Vec<String> {
    parents
        .iter()
        .flat_map(Parent::items)
        .flat_map(|item| item.image_ids.iter().cloned())
        .collect()
}

fn forget_images(session: &Session<'_>, ids: &[String]) -> anyhow::Result<()> {
    if ids.is_empty() {
        return Ok(());
    }
    persisted(session.store.images().delete_many(ids))
}

fn non_empty(raw: &str, what: &str) -> anyhow::Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("{what} cannot be empty"));
    }
    Ok(trimmed.to_string())
}

// Artists

#[instrument(skip(session))]
fn cmd_artist(session: &mut Session<'_>, cmd: ArtistCommand) -> anyhow::Result<()> {
    match cmd {
        ArtistCommand::Add { name } => {
            info!("command artist add");
            let name = non_empty(&name, "artist name")?;
            let parent = persisted(session.store.mutate(|parents| {
                let order = parents.iter().map(|p| p.order + 1).max().unwrap_or(0);
                let parent = Parent::new(name, order);
                parents.push(parent.clone());
                parent
            }))?;
            println!("Added artist {} ({}).", parent.name, short_id(&parent.id));
            Ok(())
        }
        ArtistCommand::Rm { artist } => {
            info!("command artist rm");
            let id = resolve_parent(&session.store.snapshot(), &artist)?;
            let removed = persisted(session.store.mutate(|parents| {
                let idx = parents.iter().position(|parent| parent.id == id)?;
                Some(parents.remove(idx))
            }))?
            .ok_or_else(|| gone("artist"))?;
            forget_images(session, &item_image_ids(std::slice::from_ref(&removed)))?;
            println!("Deleted artist {}.", removed.name);
            Ok(())
        }
        ArtistCommand::List => {
            info!("command artist list");
            sweep(session)?;
            let mut parents = session.store.snapshot();
            sort_parents(&mut parents, session.store.parent_sort());
            let now = session.clock.now();
            session.renderer.print_artist_table(&parents, now)
        }
        ArtistCommand::Order { artist, position } => {
            info!("command artist order");
            let id = resolve_parent(&session.store.snapshot(), &artist)?;
            persisted(session.store.mutate(|parents| reorder_parent(parents, &id, position)))?;
            if session.store.parent_sort() != ParentSortMode::Manual {
                println!("Saved manual order; switch with `encore sort artists manual` to use it.");
            } else {
                println!("Moved artist to position {position}.");
            }
            Ok(())
        }
    }
}

/// Moves `id` to `position` in manual order and renumbers every artist.
pub fn reorder_parent(parents: &mut [Parent], id: &str, position: usize) {
    let mut ordered: Vec<(i64, String, String)> = parents
        .iter()
        .map(|parent| (parent.order, parent.name.clone(), parent.id.clone()))
        .collect();
    ordered.sort();
    let Some(current) = ordered.iter().position(|(_, _, pid)| pid == id) else {
        return;
    };
    let entry = ordered.remove(current);
    let position = position.min(ordered.len());
    ordered.insert(position, entry);
    for (rank, (_, _, pid)) in ordered.iter().enumerate() {
        if let Some(parent) = parents.iter_mut().find(|parent| parent.id == *pid) {
            parent.order = rank as i64;
        }
    }
}

// Tours

#[instrument(skip(session))]
fn cmd_tour(session: &mut Session<'_>, cmd: TourCommand) -> anyhow::Result<()> {
    match cmd {
        TourCommand::Add { artist, name } => {
            info!("command tour add");
            let name = non_empty(&name, "tour name")?;
            let parent_id = resolve_parent(&session.store.snapshot(), &artist)?;
            let group = persisted(session.store.mutate(|parents| {
                let parent = parent_mut(parents, &parent_id)?;
                let group = Group::new(name);
                parent.groups.push(group.clone());
                Some(group)
            }))?
            .ok_or_else(|| gone("artist"))?;
            println!("Added tour {} ({}).", group.name, short_id(&group.id));
            Ok(())
        }
        TourCommand::Rm { tour } => {
            info!("command tour rm");
            let target = resolve_group(&session.store.snapshot(), &tour)?;
            let removed = persisted(session.store.mutate(|parents| {
                let parent = parent_mut(parents, &target.parent_id)?;
                let idx = parent.groups.iter().position(|g| g.id == target.group_id)?;
                Some(parent.groups.remove(idx))
            }))?
            .ok_or_else(|| gone("tour"))?;
            let image_ids: Vec<String> = removed
                .items
                .iter()
                .flat_map(|item| item.image_ids.iter().cloned())
                .collect();
            forget_images(session, &image_ids)?;
            println!("Deleted tour {}.", removed.name);
            Ok(())
        }
    }
}

// Concerts

fn milestone(raw: Option<String>) -> Option<Option<String>> {
    raw.map(|value| Some(value).filter(|v| !v.trim().is_empty()))
}

pub fn patch_from_fields(date: Option<String>, fields: ConcertFields) -> ItemPatch {
    ItemPatch {
        display_date: date,
        venue: fields.venue,
        price: fields.price,
        sale_link: fields.sale_link,
        sale_at: milestone(fields.sale_at),
        deadline_at: milestone(fields.deadline_at),
        result_at: milestone(fields.result_at),
        concert_at: milestone(fields.concert_at),
        lottery_name: milestone(fields.lottery_name),
    }
}

#[instrument(skip(session))]
fn cmd_concert(session: &mut Session<'_>, cmd: ConcertCommand) -> anyhow::Result<()> {
    match cmd {
        ConcertCommand::Add { tour, date, fields } => {
            info!("command concert add");
            let target = resolve_group(&session.store.snapshot(), &tour)?;
            let patch = patch_from_fields(None, fields);
            let item = persisted(session.store.mutate(|parents| {
                let group = group_mut(parents, &target)?;
                let mut item = Item::new_pre_sale(date.trim());
                patch.apply(&mut item);
                group.items.push(item.clone());
                Some(item)
            }))?
            .ok_or_else(|| gone("tour"))?;
            println!("Added concert {} on {}.", short_id(&item.id), item.display_date);
            Ok(())
        }
        ConcertCommand::Set {
            concert,
            date,
            fields,
        } => {
            info!("command concert set");
            let target = resolve_item(&session.store.snapshot(), &concert)?;
            let patch = patch_from_fields(date, fields);
            if patch.is_empty() {
                return Err(anyhow!("nothing to change; pass at least one field flag"));
            }
            persisted(session.store.mutate(|parents| {
                let item = item_mut(parents, &target)?;
                patch.apply(item);
                Some(())
            }))?
            .ok_or_else(|| gone("concert"))?;
            println!("Updated concert {}.", short_id(&target.item_id));
            Ok(())
        }
        ConcertCommand::Rm { concert } => {
            info!("command concert rm");
            let target = resolve_item(&session.store.snapshot(), &concert)?;
            let removed = persisted(session.store.mutate(|parents| {
                let group = group_mut(
                    parents,
                    &GroupRef {
                        parent_id: target.parent_id.clone(),
                        group_id: target.group_id.clone(),
                    },
                )?;
                let idx = group.items.iter().position(|i| i.id == target.item_id)?;
                Some(group.items.remove(idx))
            }))?
            .ok_or_else(|| gone("concert"))?;
            forget_images(session, &removed.image_ids)?;
            println!("Deleted concert {}.", short_id(&removed.id));
            Ok(())
        }
        ConcertCommand::Show { concert } => {
            info!("command concert show");
            sweep(session)?;
            let parents = session.store.snapshot();
            let target = resolve_item(&parents, &concert)?;
            let (parent, group, item) = find_item(&parents, &target).ok_or_else(|| gone("concert"))?;
            let images = session.store.images().bulk_get(&item.image_ids);
            let now = session.clock.now();
            session
                .renderer
                .print_concert_info(parent, group, item, &images, now)
        }
    }
}

#[instrument(skip(session, payload))]
fn cmd_decide(
    session: &mut Session<'_>,
    concert: &str,
    decision: Decision,
    payload: DecisionPayload,
) -> anyhow::Result<()> {
    info!("command decide");
    let target = resolve_item(&session.store.snapshot(), concert)?;
    let status = persisted(session.store.mutate(|parents| {
        let item = item_mut(parents, &target)?;
        *item = apply_decision(item, decision, &payload);
        Some(item.status)
    }))?
    .ok_or_else(|| gone("concert"))?;
    println!("Concert {} is now {}.", short_id(&target.item_id), status.label());
    Ok(())
}

// Views

#[instrument(skip(session))]
fn cmd_list(session: &mut Session<'_>, sort: Option<ItemSortMode>) -> anyhow::Result<()> {
    info!("command list");
    sweep(session)?;
    let parents = session.store.snapshot();
    let display = session.store.display_settings();
    let mode = sort.unwrap_or_else(|| session.store.item_sort());

    let mut rows: Vec<_> = flatten_items(&parents)
        .into_iter()
        .filter(|row| match row.item.status {
            Status::Attended => display.show_attended,
            Status::Skipped => display.show_skipped,
            _ => true,
        })
        .collect();
    sort_items(&mut rows, mode);

    let now = session.clock.now();
    session.renderer.print_concert_table(&rows, now)?;

    for line in list_badges(&parents, now) {
        println!("{line}");
    }
    Ok(())
}

/// One-line reminders printed under the concert table.
fn list_badges(parents: &[Parent], now: DateTime<Utc>) -> Vec<String> {
    let mut lines = Vec::new();
    if has_pending_alert(parents, now) {
        lines.push("Some concerts need a decision; see `encore due`.".to_string());
    }
    let notices = pending_notices(parents).len();
    if notices > 0 {
        lines.push(format!(
            "{notices} link(s) have new keyword hits; see `encore link list`."
        ));
    }
    lines
}

#[instrument(skip(session))]
fn cmd_due(session: &mut Session<'_>) -> anyhow::Result<()> {
    info!("command due");
    sweep(session)?;
    let parents = session.store.snapshot();
    let rows = due_items(&parents, session.clock.now());
    session.renderer.print_due_table(&rows)
}

/// Parses `YYYY-MM`.
pub fn parse_month(raw: &str) -> anyhow::Result<(i32, u32)> {
    let (year, month) = raw
        .trim()
        .split_once('-')
        .ok_or_else(|| anyhow!("expected YYYY-MM, got {raw:?}"))?;
    let year: i32 = year
        .parse()
        .with_context(|| format!("invalid year in {raw:?}"))?;
    let month: u32 = month
        .parse()
        .with_context(|| format!("invalid month in {raw:?}"))?;
    if !(1..=12).contains(&month) {
        return Err(anyhow!("month out of range in {raw:?}"));
    }
    Ok((year, month))
}

#[instrument(skip(session))]
fn cmd_calendar(session: &mut Session<'_>, month: Option<&str>) -> anyhow::Result<()> {
    info!("command calendar");
    sweep(session)?;
    let (year, month) = match month {
        Some(raw) => parse_month(raw)?,
        None => {
            let today = session.clock.now().with_timezone(project_timezone());
            (today.year(), today.month())
        }
    };
    let parents = session.store.snapshot();
    let events = project_calendar(&parents);
    let visible = events_in_month(&events, year, month);
    session.renderer.print_calendar(&visible, year, month)
}

// Links and tracking

#[instrument(skip(session))]
fn cmd_link(session: &mut Session<'_>, cmd: LinkCommand) -> anyhow::Result<()> {
    match cmd {
        LinkCommand::Add {
            artist,
            name,
            url,
            track,
            keywords,
        } => {
            info!("command link add");
            let url = normalize_url(&url).ok_or_else(|| anyhow!("link URL cannot be empty"))?;
            let parent_id = resolve_parent(&session.store.snapshot(), &artist)?;
            let mut link = Link::new(name.trim(), url);
            link.auto_track = track;
            link.track_capability = judge_capability(&link.url);
            link.keywords = keywords
                .iter()
                .map(|keyword| keyword.trim().to_string())
                .filter(|keyword| !keyword.is_empty())
                .collect();

            let added = persisted(session.store.mutate(|parents| {
                let parent = parent_mut(parents, &parent_id)?;
                parent.links.push(link.clone());
                Some(())
            }))?;
            added.ok_or_else(|| gone("artist"))?;

            println!("Added link {} ({}).", link.name, short_id(&link.id));
            if track && link.track_capability == TrackCapability::Unsupported {
                println!("This site cannot be checked automatically; it will be marked checked without being contacted.");
            }
            Ok(())
        }
        LinkCommand::Rm { link } => {
            info!("command link rm");
            let target = resolve_link(&session.store.snapshot(), &link)?;
            persisted(session.store.mutate(|parents| {
                let parent = parent_mut(parents, &target.parent_id)?;
                let idx = parent.links.iter().position(|l| l.id == target.link_id)?;
                Some(parent.links.remove(idx))
            }))?
            .ok_or_else(|| gone("link"))?;
            println!("Deleted link {}.", short_id(&target.link_id));
            Ok(())
        }
        LinkCommand::List { artist } => {
            info!("command link list");
            let parents = session.store.snapshot();
            let only = artist
                .as_deref()
                .map(|needle| resolve_parent(&parents, needle))
                .transpose()?;
            let links: Vec<_> = parents
                .iter()
                .filter(|parent| only.as_ref().is_none_or(|id| parent.id == *id))
                .flat_map(|parent| parent.links.iter().map(move |link| (parent, link)))
                .collect();
            session.renderer.print_link_table(&links)
        }
        LinkCommand::Ack { link } => {
            info!("command link ack");
            let now = session.clock.now();
            let target = link
                .as_deref()
                .map(|needle| resolve_link(&session.store.snapshot(), needle))
                .transpose()?;
            let acknowledged = persisted(session.store.mutate(|parents| {
                let mut count = 0_usize;
                for parent in parents.iter_mut() {
                    for link in &mut parent.links {
                        let selected = match &target {
                            Some(t) => t.parent_id == parent.id && t.link_id == link.id,
                            None => link.has_pending_notice(),
                        };
                        if selected {
                            link.acknowledge(now);
                            count += 1;
                        }
                    }
                }
                count
            }))?;
            println!("Acknowledged {acknowledged} link(s).");
            Ok(())
        }
    }
}

fn run_tracking(session: &mut Session<'_>, trigger: Trigger) -> anyhow::Result<()> {
    if trigger == Trigger::Auto && !session.store.settings().auto_tracking {
        println!("Auto tracking is off; run `encore track` for a manual check.");
        return Ok(());
    }
    let tracker = tracker(session)?;
    match block_on(async move { tracker.run_cycle(trigger).await })? {
        CycleOutcome::Completed(report) => {
            session.renderer.print_cycle_report(&report)?;
            if let Some(message) = report.persist_error {
                return Err(anyhow!(message));
            }
            Ok(())
        }
        CycleOutcome::Dropped => {
            println!("A tracking cycle is already running.");
            Ok(())
        }
    }
}

#[instrument(skip(session))]
fn cmd_track(session: &mut Session<'_>, trigger: Trigger) -> anyhow::Result<()> {
    info!("command track");
    run_tracking(session, trigger)
}

#[instrument(skip(session))]
fn cmd_refresh(session: &mut Session<'_>) -> anyhow::Result<()> {
    info!("command refresh");
    sweep(session)?;
    run_tracking(session, Trigger::Manual)
}

#[instrument(skip(session))]
fn cmd_watch(session: &mut Session<'_>) -> anyhow::Result<()> {
    info!("command watch");
    let tracker = tracker(session)?;
    let cancel = CancellationToken::new();

    block_on(async {
        let auto_loop = tokio::spawn(tracker.clone().run_auto_loop(cancel.clone()));
        println!("Watching links; press Ctrl-C to stop.");
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for Ctrl-C; stopping");
        }
        cancel.cancel();
        if let Err(err) = auto_loop.await {
            warn!(error = %err, "auto tracking loop ended abnormally");
        }
        tracker.wait_idle().await;
    })?;

    persisted(session.store.teardown())?;
    println!("Stopped.");
    Ok(())
}

// Images

fn image_error(err: ImageError) -> anyhow::Error {
    match err {
        ImageError::Persist(err) => {
            let message = err.user_message();
            anyhow::Error::new(err).context(message)
        }
        other => anyhow::Error::new(other),
    }
}

#[instrument(skip(session))]
fn cmd_image(session: &mut Session<'_>, cmd: ImageCommand) -> anyhow::Result<()> {
    match cmd {
        ImageCommand::Add { concert, url } => {
            info!("command image add");
            let target = resolve_item(&session.store.snapshot(), &concert)?;
            let id = session.store.images().put(url.trim()).map_err(image_error)?;
            let attached = persisted(session.store.mutate(|parents| {
                let item = item_mut(parents, &target)?;
                item.image_ids.push(id.clone());
                Some(item.image_ids.len() - 1)
            }))?;
            match attached {
                Some(index) => {
                    println!("Attached image {index} to concert {}.", short_id(&target.item_id));
                    Ok(())
                }
                None => {
                    forget_images(session, std::slice::from_ref(&id))?;
                    Err(gone("concert"))
                }
            }
        }
        ImageCommand::Mv { concert, from, to } => {
            info!("command image mv");
            let target = resolve_item(&session.store.snapshot(), &concert)?;
            let moved = persisted(session.store.mutate(|parents| {
                item_mut(parents, &target).map(|item| move_image(item, from, to))
            }))?
            .ok_or_else(|| gone("concert"))?;
            if !moved {
                return Err(anyhow!("no image at position {from} or {to}"));
            }
            println!("Moved image {from} to {to}.");
            Ok(())
        }
        ImageCommand::Rm { concert, index } => {
            info!("command image rm");
            let target = resolve_item(&session.store.snapshot(), &concert)?;
            let detached = persisted(session.store.mutate(|parents| {
                item_mut(parents, &target).map(|item| detach_image(item, index))
            }))?
            .ok_or_else(|| gone("concert"))?
            .ok_or_else(|| anyhow!("no image at position {index}"))?;
            persisted(session.store.images().delete(&detached))?;
            println!("Removed image {index}.");
            Ok(())
        }
        ImageCommand::List { concert } => {
            info!("command image list");
            let parents = session.store.snapshot();
            let target = resolve_item(&parents, &concert)?;
            let (_, _, item) = find_item(&parents, &target).ok_or_else(|| gone("concert"))?;
            let urls = session.store.images().bulk_get(&item.image_ids);
            if item.image_ids.is_empty() {
                println!("No images.");
            }
            for (idx, id) in item.image_ids.iter().enumerate() {
                match urls.get(id) {
                    Some(url) => println!("{idx:<3} {url}"),
                    None => println!("{idx:<3} (missing {})", short_id(id)),
                }
            }
            Ok(())
        }
    }
}

// Preferences

#[instrument(skip(session))]
fn cmd_sort(session: &mut Session<'_>, cmd: SortCommand) -> anyhow::Result<()> {
    info!("command sort");
    match cmd {
        SortCommand::Artists { mode } => {
            persisted(session.store.set_parent_sort(mode))?;
            println!("Artists sorted by {mode}.");
        }
        SortCommand::Concerts { mode } => {
            persisted(session.store.set_item_sort(mode))?;
            println!("Concerts sorted by {mode}.");
        }
    }
    Ok(())
}

#[instrument(skip(session))]
fn cmd_settings(session: &mut Session<'_>, args: SettingsArgs) -> anyhow::Result<()> {
    info!("command settings");
    if !args.is_empty() {
        let mut settings = session.store.settings();
        if let Some(auto_tracking) = args.auto_tracking {
            settings.auto_tracking = auto_tracking;
        }
        if let Some(days) = args.interval_days {
            settings.tracking_interval_days = days;
        }
        persisted(session.store.update_settings(settings))?;

        let mut display = session.store.display_settings();
        if let Some(show) = args.show_attended {
            display.show_attended = show;
        }
        if let Some(show) = args.show_skipped {
            display.show_skipped = show;
        }
        persisted(session.store.update_display_settings(display))?;
    }

    let settings = session.store.settings();
    let display = session.store.display_settings();
    let parent_sort = session.store.parent_sort();
    let item_sort = session.store.item_sort();
    session
        .renderer
        .print_settings(&settings, &display, parent_sort, item_sort)
}

// Import and export

#[instrument(skip(session))]
fn cmd_export(session: &mut Session<'_>, path: Option<&Path>) -> anyhow::Result<()> {
    info!("command export");
    let parents = session.store.snapshot();
    match path {
        Some(path) => {
            export_to_file(&parents, path)?;
            println!("Exported {} artist(s) to {}.", parents.len(), path.display());
        }
        None => println!("{}", export_json(&parents)?),
    }
    Ok(())
}

fn confirm(prompt: &str) -> anyhow::Result<bool> {
    let mut out = io::stdout().lock();
    write!(out, "{prompt} [y/N] ")?;
    out.flush()?;
    let mut answer = String::new();
    io::stdin()
        .lock()
        .read_line(&mut answer)
        .context("failed reading confirmation")?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

#[instrument(skip(session))]
fn cmd_import(session: &mut Session<'_>, path: &Path, yes: bool) -> anyhow::Result<()> {
    info!("command import");
    let batch = read_import(path)?;
    let current = session.store.snapshot().len();

    if !yes
        && !confirm(&format!(
            "Replace {current} artist(s) with {} from {}?",
            batch.len(),
            path.display()
        ))?
    {
        println!("Import cancelled.");
        return Ok(());
    }

    let count = persisted(session.store.import_collection(batch))?;
    println!("Imported {count} artist(s).");
    Ok(())
}
