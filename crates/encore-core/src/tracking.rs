//! Link tracking scheduler.
//!
//! A cycle snapshots the collection, plans which links to probe, runs the
//! probes one at a time through [`queue::ProbeQueue`] and commits the
//! results through [`AppStore::replace_collection`], patching only the
//! links it touched. Only one cycle runs at a time; a trigger that arrives
//! while a cycle is in flight is dropped.

pub mod probe;
pub mod queue;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::Config;
use crate::datetime::Clock;
use crate::model::{Parent, TrackCapability, TrackError, TrackingStatus};
use crate::store::AppStore;
use probe::Probe;
use queue::{ProbeJob, ProbeQueue};

const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 12;
const DEFAULT_TICK_SECS: u64 = 600;

/// Stable address of a link. Results are matched by id, never by position,
/// so edits made while a cycle runs cannot misroute them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkKey {
    pub parent_id: String,
    pub link_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Timer firing; links are gated on the configured interval.
    Auto,
    /// Explicit request; every tracked link is probed.
    Manual,
}

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub probe_timeout: Duration,
    pub tick: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_secs(DEFAULT_PROBE_TIMEOUT_SECS),
            tick: Duration::from_secs(DEFAULT_TICK_SECS),
        }
    }
}

impl TrackerConfig {
    pub fn from_config(cfg: &Config) -> Self {
        let defaults = Self::default();
        Self {
            probe_timeout: cfg
                .get_u64("tracking.probe_timeout_secs")
                .map(Duration::from_secs)
                .unwrap_or(defaults.probe_timeout),
            tick: cfg
                .get_u64("tracking.tick_secs")
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.tick),
        }
    }
}

fn has_scheme(url: &str) -> bool {
    static SCHEME: OnceLock<Option<Regex>> = OnceLock::new();
    SCHEME
        .get_or_init(|| Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]*:").ok())
        .as_ref()
        .is_some_and(|re| re.is_match(url))
}

/// Trims and adds `https://` to bare hosts. Empty input yields `None`.
pub fn normalize_url(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Some(rest) = trimmed.strip_prefix("//") {
        return Some(format!("https://{rest}"));
    }
    if has_scheme(trimmed) && !is_host_port(trimmed) {
        return Some(trimmed.to_string());
    }
    Some(format!("https://{trimmed}"))
}

/// `host:port[/path]` also matches the scheme pattern; a run of digits
/// after the first colon marks a port.
fn is_host_port(url: &str) -> bool {
    url.split_once(':').is_some_and(|(_, rest)| {
        let port = rest.split(['/', '?', '#']).next().unwrap_or_default();
        !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit())
    })
}

/// Whether enough days have passed since the last check. Never-checked
/// links are always due.
pub fn is_due(last_checked_at: Option<DateTime<Utc>>, now: DateTime<Utc>, interval_days: u32) -> bool {
    match last_checked_at {
        None => true,
        Some(last) => now - last >= chrono::Duration::days(i64::from(interval_days)),
    }
}

#[derive(Debug, Default)]
pub struct CyclePlan {
    pub jobs: Vec<ProbeJob>,
    pub silent_skip: Vec<LinkKey>,
    keywords: HashMap<LinkKey, Vec<String>>,
}

/// Builds the probe list from a snapshot. Links the system cannot judge go
/// to the silent-skip set and are never contacted.
pub fn plan_cycle(
    parents: &[Parent],
    trigger: Trigger,
    now: DateTime<Utc>,
    interval_days: u32,
) -> CyclePlan {
    let mut plan = CyclePlan::default();
    for parent in parents {
        for link in &parent.links {
            if !link.auto_track {
                continue;
            }
            if trigger == Trigger::Auto && !is_due(link.last_checked_at, now, interval_days) {
                continue;
            }
            let Some(url) = normalize_url(&link.url) else {
                continue;
            };
            let key = LinkKey {
                parent_id: parent.id.clone(),
                link_id: link.id.clone(),
            };
            if link.track_capability == TrackCapability::Unsupported {
                plan.silent_skip.push(key);
                continue;
            }
            if !link.keywords.is_empty() {
                plan.keywords.insert(key.clone(), link.keywords.clone());
            }
            plan.jobs.push(ProbeJob { key, url });
        }
    }
    plan
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkOutcome {
    /// `matched` is `None` when the page text could not be read.
    Reachable { matched: Option<Vec<String>> },
    Failed(TrackError),
    SilentlySkipped,
}

/// Patches the probed links of `latest` and leaves everything else as it
/// is. Links deleted while the cycle ran are ignored.
pub fn merge_results(
    latest: &[Parent],
    outcomes: &HashMap<LinkKey, LinkOutcome>,
    cycle_at: DateTime<Utc>,
) -> Vec<Parent> {
    let mut next = latest.to_vec();
    for parent in &mut next {
        for link in &mut parent.links {
            let key = LinkKey {
                parent_id: parent.id.clone(),
                link_id: link.id.clone(),
            };
            let Some(outcome) = outcomes.get(&key) else {
                continue;
            };
            link.last_checked_at = Some(cycle_at);
            match outcome {
                LinkOutcome::Reachable { matched } => {
                    link.error_message = None;
                    link.last_success_at = Some(cycle_at);
                    // Unreadable text says nothing about the keywords.
                    let fresh_hit = matched.as_ref().is_some_and(|matched| {
                        !matched.is_empty() && *matched != link.matched_keywords
                    });
                    if let Some(matched) = matched {
                        link.matched_keywords = matched.clone();
                    }
                    if fresh_hit {
                        link.tracking_status = Some(TrackingStatus::Hit);
                        link.last_hit_at = Some(cycle_at);
                    } else {
                        link.tracking_status = Some(TrackingStatus::Success);
                    }
                }
                LinkOutcome::SilentlySkipped => {
                    link.tracking_status = Some(TrackingStatus::Success);
                    link.error_message = None;
                    link.last_success_at = Some(cycle_at);
                }
                LinkOutcome::Failed(error) => {
                    link.tracking_status = Some(TrackingStatus::Failed);
                    link.error_message = Some(*error);
                }
            }
        }
    }
    next
}

fn matched_keywords(keywords: &[String], body: Option<&str>) -> Option<Vec<String>> {
    let haystack = body?.to_lowercase();
    Some(
        keywords
            .iter()
            .filter(|keyword| haystack.contains(&keyword.to_lowercase()))
            .cloned()
            .collect(),
    )
}

#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub probed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub hits: usize,
    pub silently_skipped: usize,
    /// Set when the commit could not be flushed; the results are still
    /// applied in memory.
    pub persist_error: Option<String>,
}

#[derive(Debug, Clone)]
pub enum CycleOutcome {
    Completed(CycleReport),
    /// Another cycle was already running.
    Dropped,
}

pub struct Tracker {
    store: Arc<AppStore>,
    probe: Arc<dyn Probe>,
    clock: Arc<dyn Clock>,
    config: TrackerConfig,
    latch: tokio::sync::Mutex<()>,
    plans_built: AtomicUsize,
}

impl Tracker {
    pub fn new(
        store: Arc<AppStore>,
        probe: Arc<dyn Probe>,
        clock: Arc<dyn Clock>,
        config: TrackerConfig,
    ) -> Self {
        Self {
            store,
            probe,
            clock,
            config,
            latch: tokio::sync::Mutex::new(()),
            plans_built: AtomicUsize::new(0),
        }
    }

    /// Number of probe lists built so far; one per cycle that got the latch.
    pub fn plans_built(&self) -> usize {
        self.plans_built.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.latch.try_lock().is_err()
    }

    /// Resolves once no cycle holds the latch.
    pub async fn wait_idle(&self) {
        let _idle = self.latch.lock().await;
    }

    /// Runs one cycle. Never fails: probe faults become per-link failures
    /// and a failed flush is reported in the returned report.
    #[instrument(skip(self))]
    pub async fn run_cycle(&self, trigger: Trigger) -> CycleOutcome {
        let Ok(_guard) = self.latch.try_lock() else {
            debug!(?trigger, "tracking cycle already running; dropping trigger");
            return CycleOutcome::Dropped;
        };

        let cycle_at = self.clock.now();
        let settings = self.store.settings();
        let plan = {
            let snapshot = self.store.snapshot();
            plan_cycle(&snapshot, trigger, cycle_at, settings.tracking_interval_days)
        };
        self.plans_built.fetch_add(1, Ordering::SeqCst);

        info!(
            ?trigger,
            probes = plan.jobs.len(),
            silent_skip = plan.silent_skip.len(),
            "tracking cycle started"
        );

        let mut report = CycleReport {
            probed: plan.jobs.len(),
            silently_skipped: plan.silent_skip.len(),
            ..CycleReport::default()
        };
        if plan.jobs.is_empty() && plan.silent_skip.is_empty() {
            debug!("nothing to track");
            return CycleOutcome::Completed(report);
        }

        let results = ProbeQueue::new(self.probe.clone(), self.config.probe_timeout)
            .run(plan.jobs)
            .await;

        let mut outcomes = HashMap::with_capacity(results.len() + plan.silent_skip.len());
        for result in results {
            let outcome = match result.outcome {
                Ok(response) => {
                    let keywords = plan
                        .keywords
                        .get(&result.key)
                        .map(Vec::as_slice)
                        .unwrap_or_default();
                    let matched = matched_keywords(keywords, response.body.as_deref());
                    report.succeeded += 1;
                    LinkOutcome::Reachable { matched }
                }
                Err(err) => {
                    let classified = err.classify();
                    warn!(
                        url = %result.url,
                        error = %err,
                        classified = classified.as_str(),
                        "link probe failed"
                    );
                    report.failed += 1;
                    LinkOutcome::Failed(classified)
                }
            };
            outcomes.insert(result.key, outcome);
        }
        for key in plan.silent_skip {
            outcomes.insert(key, LinkOutcome::SilentlySkipped);
        }

        let mut hits = 0_usize;
        let committed = self.store.replace_collection(|latest| {
            let merged = merge_results(latest, &outcomes, cycle_at);
            hits = merged
                .iter()
                .flat_map(|parent| parent.links.iter())
                .filter(|link| link.last_hit_at == Some(cycle_at))
                .count();
            merged
        });
        report.hits = hits;
        if let Err(err) = committed {
            report.persist_error = Some(err.user_message());
        }

        info!(
            succeeded = report.succeeded,
            failed = report.failed,
            hits = report.hits,
            "tracking cycle finished"
        );
        CycleOutcome::Completed(report)
    }

    /// Fires an auto cycle on every tick until `cancel` triggers. Ticks
    /// that land while a cycle is running are dropped by the latch.
    pub async fn run_auto_loop(self: Arc<Self>, cancel: CancellationToken) {
        info!(
            tick_secs = self.config.tick.as_secs(),
            "auto tracking loop started"
        );
        let mut interval = tokio::time::interval(self.config.tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("auto tracking loop stopping");
                    break;
                }
                _ = interval.tick() => {
                    if !self.store.settings().auto_tracking {
                        debug!("auto tracking disabled; skipping tick");
                        continue;
                    }
                    let tracker = self.clone();
                    // detached so a long cycle cannot hold up cancellation
                    tokio::spawn(async move {
                        tracker.run_cycle(Trigger::Auto).await;
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration as StdDuration;

    use async_trait::async_trait;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use parking_lot::Mutex;
    use tokio::sync::Notify;

    use super::probe::{Probe, ProbeError, ProbeResponse};
    use super::{
        CycleOutcome, LinkKey, LinkOutcome, Tracker, TrackerConfig, Trigger, is_due, merge_results,
        normalize_url,
    };
    use crate::datastore::MemoryStore;
    use crate::datetime::FixedClock;
    use crate::model::{Link, Parent, TrackCapability, TrackError, TrackingStatus};
    use crate::store::AppStore;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, day, 12, 0, 0)
            .single()
            .expect("valid instant")
    }

    #[derive(Default)]
    struct ScriptedProbe {
        urls: Mutex<Vec<String>>,
        body: Option<String>,
        status: Option<u16>,
    }

    #[async_trait]
    impl Probe for ScriptedProbe {
        async fn probe(&self, url: &str, _timeout: StdDuration) -> Result<ProbeResponse, ProbeError> {
            self.urls.lock().push(url.to_string());
            match self.status {
                Some(code) => Err(ProbeError::Status(code)),
                None => Ok(ProbeResponse {
                    body: self.body.clone(),
                }),
            }
        }
    }

    #[derive(Default)]
    struct GatedProbe {
        started: Notify,
        release: Notify,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Probe for GatedProbe {
        async fn probe(&self, _url: &str, _timeout: StdDuration) -> Result<ProbeResponse, ProbeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.started.notify_one();
            self.release.notified().await;
            Ok(ProbeResponse::default())
        }
    }

    fn tracked(url: &str) -> Link {
        let mut link = Link::new("Official", url);
        link.auto_track = true;
        link.track_capability = TrackCapability::Supported;
        link
    }

    fn store_with(links: Vec<Link>) -> (Arc<AppStore>, String) {
        let store = Arc::new(AppStore::init(Arc::new(MemoryStore::new())));
        let mut parent = Parent::new("Band", 0);
        parent.links = links;
        let parent_id = parent.id.clone();
        store.mutate(|parents| parents.push(parent)).expect("seed");
        (store, parent_id)
    }

    fn tracker(store: Arc<AppStore>, probe: Arc<dyn Probe>, now: DateTime<Utc>) -> Arc<Tracker> {
        Arc::new(Tracker::new(
            store,
            probe,
            Arc::new(FixedClock(now)),
            TrackerConfig::default(),
        ))
    }

    fn completed(outcome: CycleOutcome) -> super::CycleReport {
        match outcome {
            CycleOutcome::Completed(report) => report,
            CycleOutcome::Dropped => panic!("cycle was dropped"),
        }
    }

    #[test]
    fn urls_get_a_scheme_when_missing() {
        assert_eq!(normalize_url("   "), None);
        assert_eq!(
            normalize_url(" example.com/tour ").as_deref(),
            Some("https://example.com/tour")
        );
        assert_eq!(
            normalize_url("//cdn.example.com/x").as_deref(),
            Some("https://cdn.example.com/x")
        );
        assert_eq!(
            normalize_url("http://example.com").as_deref(),
            Some("http://example.com")
        );
        assert_eq!(
            normalize_url("example.com:8080/news").as_deref(),
            Some("https://example.com:8080/news")
        );
        assert_eq!(
            normalize_url("localhost:3000/x").as_deref(),
            Some("https://localhost:3000/x")
        );
        assert_eq!(
            normalize_url("localhost:3000").as_deref(),
            Some("https://localhost:3000")
        );
        assert_eq!(
            normalize_url("mailto:tickets@band.example").as_deref(),
            Some("mailto:tickets@band.example")
        );
    }

    #[test]
    fn unreadable_page_keeps_the_matched_set() {
        let mut link = tracked("https://band.example/news");
        link.keywords = vec!["lottery".to_string()];
        link.matched_keywords = vec!["lottery".to_string()];
        link.last_hit_at = Some(at(9));
        let mut parent = Parent::new("Band", 0);
        let key = LinkKey {
            parent_id: parent.id.clone(),
            link_id: link.id.clone(),
        };
        parent.links.push(link);

        let blind = HashMap::from([(key.clone(), LinkOutcome::Reachable { matched: None })]);
        let merged = merge_results(&[parent], &blind, at(10));
        let link = &merged[0].links[0];
        assert_eq!(link.matched_keywords, vec!["lottery".to_string()]);
        assert_eq!(link.tracking_status, Some(TrackingStatus::Success));

        let seen = HashMap::from([(
            key,
            LinkOutcome::Reachable {
                matched: Some(vec!["lottery".to_string()]),
            },
        )]);
        let merged = merge_results(&merged, &seen, at(11));
        assert_eq!(merged[0].links[0].tracking_status, Some(TrackingStatus::Success));
        assert_eq!(merged[0].links[0].last_hit_at, Some(at(9)));
    }

    #[test]
    fn interval_gate_counts_whole_days() {
        let now = at(10);
        assert!(is_due(None, now, 3));
        assert!(!is_due(Some(now - Duration::days(2)), now, 3));
        assert!(is_due(Some(now - Duration::days(3)), now, 3));
        assert!(is_due(Some(now), now, 0));
    }

    #[tokio::test]
    async fn second_trigger_is_dropped_while_a_cycle_runs() {
        let (store, _) = store_with(vec![tracked("https://band.example/news")]);
        let probe = Arc::new(GatedProbe::default());
        let tracker = tracker(store, probe.clone(), at(10));

        let first = {
            let tracker = tracker.clone();
            tokio::spawn(async move { tracker.run_cycle(Trigger::Auto).await })
        };
        probe.started.notified().await;

        assert!(tracker.is_running());
        assert!(matches!(
            tracker.run_cycle(Trigger::Manual).await,
            CycleOutcome::Dropped
        ));
        assert_eq!(tracker.plans_built(), 1);

        probe.release.notify_one();
        let report = completed(first.await.expect("cycle task"));
        assert_eq!(report.succeeded, 1);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
        assert!(!tracker.is_running());
    }

    #[tokio::test]
    async fn unsupported_links_are_never_contacted_but_marked_checked() {
        let mut link = tracked("https://x.com/band");
        link.track_capability = TrackCapability::Unsupported;
        link.tracking_status = Some(TrackingStatus::Failed);
        link.error_message = Some(TrackError::Unreachable);
        let (store, _) = store_with(vec![link]);
        let probe = Arc::new(ScriptedProbe::default());
        let now = at(10);

        let report = completed(tracker(store.clone(), probe.clone(), now).run_cycle(Trigger::Manual).await);

        assert!(probe.urls.lock().is_empty());
        assert_eq!(report.silently_skipped, 1);
        let link = &store.snapshot()[0].links[0];
        assert_eq!(link.tracking_status, Some(TrackingStatus::Success));
        assert_eq!(link.error_message, None);
        assert_eq!(link.last_checked_at, Some(now));
        assert_eq!(link.last_success_at, Some(now));
    }

    #[tokio::test]
    async fn failures_are_classified_and_keep_last_success() {
        let mut link = tracked("band.example/gone");
        link.last_success_at = Some(at(1));
        let (store, _) = store_with(vec![link]);
        let probe = Arc::new(ScriptedProbe {
            status: Some(404),
            ..ScriptedProbe::default()
        });

        let report = completed(tracker(store.clone(), probe.clone(), at(10)).run_cycle(Trigger::Manual).await);

        assert_eq!(report.failed, 1);
        assert_eq!(probe.urls.lock().as_slice(), ["https://band.example/gone"]);
        let link = &store.snapshot()[0].links[0];
        assert_eq!(link.tracking_status, Some(TrackingStatus::Failed));
        assert_eq!(link.error_message, Some(TrackError::ContentChanged));
        assert_eq!(link.last_checked_at, Some(at(10)));
        assert_eq!(link.last_success_at, Some(at(1)));
    }

    #[tokio::test]
    async fn edits_made_during_a_cycle_survive_the_commit() {
        let (store, parent_id) = store_with(vec![tracked("https://band.example/news")]);
        let probe = Arc::new(GatedProbe::default());
        let tracker = tracker(store.clone(), probe.clone(), at(10));

        let cycle = {
            let tracker = tracker.clone();
            tokio::spawn(async move { tracker.run_cycle(Trigger::Manual).await })
        };
        probe.started.notified().await;

        store
            .mutate(|parents| {
                parents[0].name = "Renamed Band".to_string();
                parents[0].links.insert(0, Link::new("Fanclub", "fc.example"));
                parents.push(Parent::new("Another Band", 1));
            })
            .expect("user edit");

        probe.release.notify_one();
        completed(cycle.await.expect("cycle task"));

        let parents = store.snapshot();
        assert_eq!(parents.len(), 2);
        assert_eq!(parents[0].id, parent_id);
        assert_eq!(parents[0].name, "Renamed Band");
        assert_eq!(parents[0].links[0].last_checked_at, None);
        assert_eq!(parents[0].links[1].last_checked_at, Some(at(10)));
        assert_eq!(
            parents[0].links[1].tracking_status,
            Some(TrackingStatus::Success)
        );
    }

    #[tokio::test]
    async fn keyword_hits_raise_a_notice_once() {
        let mut link = tracked("https://band.example/news");
        link.keywords = vec!["Lottery".to_string(), "sold out".to_string()];
        let (store, _) = store_with(vec![link]);
        let probe: Arc<dyn Probe> = Arc::new(ScriptedProbe {
            body: Some("<p>2nd LOTTERY opens today</p>".to_string()),
            ..ScriptedProbe::default()
        });

        let report = completed(tracker(store.clone(), probe.clone(), at(10)).run_cycle(Trigger::Manual).await);
        assert_eq!(report.hits, 1);
        let link = store.snapshot()[0].links[0].clone();
        assert_eq!(link.tracking_status, Some(TrackingStatus::Hit));
        assert_eq!(link.matched_keywords, vec!["Lottery".to_string()]);
        assert!(link.has_pending_notice());

        let report = completed(tracker(store.clone(), probe, at(11)).run_cycle(Trigger::Manual).await);
        assert_eq!(report.hits, 0);
        let link = &store.snapshot()[0].links[0];
        assert_eq!(link.tracking_status, Some(TrackingStatus::Success));
        assert_eq!(link.last_hit_at, Some(at(10)));
    }

    #[tokio::test]
    async fn auto_trigger_respects_the_interval_but_manual_does_not() {
        let mut recent = tracked("https://band.example/recent");
        recent.last_checked_at = Some(at(10) - Duration::hours(2));
        let untracked = Link::new("Shop", "https://shop.example");
        let (store, _) = store_with(vec![recent, untracked]);
        let probe = Arc::new(ScriptedProbe::default());

        let report = completed(tracker(store.clone(), probe.clone(), at(10)).run_cycle(Trigger::Auto).await);
        assert_eq!(report.probed, 0);
        assert!(probe.urls.lock().is_empty());

        let report = completed(tracker(store, probe.clone(), at(10)).run_cycle(Trigger::Manual).await);
        assert_eq!(report.probed, 1);
        assert_eq!(probe.urls.lock().as_slice(), ["https://band.example/recent"]);
    }

    #[tokio::test]
    async fn failed_flush_is_reported_not_raised() {
        let kv = Arc::new(MemoryStore::new());
        let store = Arc::new(AppStore::init(kv.clone()));
        let mut parent = Parent::new("Band", 0);
        parent.links.push(tracked("https://band.example"));
        store.mutate(|parents| parents.push(parent)).expect("seed");
        kv.set_quota(Some(16));

        let probe = Arc::new(ScriptedProbe::default());
        let report = completed(tracker(store.clone(), probe, at(10)).run_cycle(Trigger::Manual).await);

        assert!(report.persist_error.is_some());
        assert_eq!(store.snapshot()[0].links[0].last_checked_at, Some(at(10)));
    }
}
