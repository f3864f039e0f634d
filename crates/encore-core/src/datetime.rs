use std::fs;
use std::path::PathBuf;
use std::sync::OnceLock;

use chrono::{
  DateTime,
  Duration,
  LocalResult,
  NaiveDate,
  NaiveDateTime,
  NaiveTime,
  TimeZone,
  Utc
};
use chrono_tz::Tz;
use serde::Deserialize;

const TIMEZONE_CONFIG_FILE: &str =
  "encore-time.toml";
const TIMEZONE_ENV_VAR: &str =
  "ENCORE_TIMEZONE";
const TIMEZONE_CONFIG_ENV_VAR: &str =
  "ENCORE_TIME_CONFIG";
const DEFAULT_PROJECT_TIMEZONE: &str =
  "Asia/Tokyo";

/// Marker for a date the organiser has
/// not announced yet.
pub const UNDETERMINED: &str = "TBD";

const EVENT_DEFAULT_HOUR: u32 = 21;
const GAP_STEP_MINUTES: i64 = 30;
const GAP_STEPS: i64 = 6;
const MILESTONE_DEFAULT_HOUR: u32 = 12;

/// Which default time-of-day applies
/// when a stored value carries only a
/// date.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq,
)]
pub enum DateKind {
  /// The show itself; evening start.
  Event,
  /// Sale, deadline and result dates;
  /// compared at noon.
  Milestone
}

impl DateKind {
  fn default_time(self) -> NaiveTime {
    let hour = match self {
      | DateKind::Event => {
        EVENT_DEFAULT_HOUR
      }
      | DateKind::Milestone => {
        MILESTONE_DEFAULT_HOUR
      }
    };
    NaiveTime::from_hms_opt(hour, 0, 0)
      .unwrap_or(NaiveTime::MIN)
  }
}

pub trait Clock: Send + Sync {
  fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Utc> {
    Utc::now()
  }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedClock(
  pub DateTime<Utc>
);

impl Clock for FixedClock {
  fn now(&self) -> DateTime<Utc> {
    self.0
  }
}

#[derive(Debug, Deserialize)]
struct TimezoneConfig {
  timezone: Option<String>,
  time:     Option<TimezoneSection>
}

#[derive(Debug, Deserialize)]
struct TimezoneSection {
  timezone: Option<String>
}

pub fn project_timezone() -> &'static Tz
{
  static PROJECT_TZ: OnceLock<Tz> =
    OnceLock::new();
  PROJECT_TZ.get_or_init(
    resolve_project_timezone
  )
}

/// Parses a stored date in the project
/// timezone.
#[must_use]
pub fn parse_date(
  raw: Option<&str>,
  kind: DateKind
) -> Option<DateTime<Utc>> {
  parse_date_in(
    raw,
    kind,
    project_timezone()
  )
}

/// Parses `YYYY-MM-DD` or
/// `YYYY-MM-DD HH:mm` as local time in
/// `tz`. Empty input, the `TBD` marker
/// and malformed text all yield `None`.
#[must_use]
pub fn parse_date_in(
  raw: Option<&str>,
  kind: DateKind,
  tz: &Tz
) -> Option<DateTime<Utc>> {
  let naive = parse_naive(raw?, kind)?;
  to_utc_from_local(naive, tz)
}

/// Canonical fixed-width form of a date
/// or date-time: `YYYY-MM-DD` or
/// `YYYY-MM-DD HH:mm`. Stored values use
/// this form so that plain string
/// comparison orders them in time.
#[must_use]
pub fn normalize_stamp(
  raw: &str
) -> Option<String> {
  let trimmed = raw.trim();
  if is_undetermined(trimmed) {
    return None;
  }

  if let Some(dt) =
    parse_naive_datetime(trimmed)
  {
    return Some(
      dt.format("%Y-%m-%d %H:%M")
        .to_string()
    );
  }

  parse_naive_day(trimmed).map(|day| {
    day.format("%Y-%m-%d").to_string()
  })
}

/// `YYYY-MM-DD` prefix of a canonical
/// stamp.
#[must_use]
pub fn date_key(
  stamp: &str
) -> Option<String> {
  let normalized =
    normalize_stamp(stamp)?;
  Some(normalized[..10].to_string())
}

/// `HH:mm` suffix of a canonical stamp,
/// if it carries a time.
#[must_use]
pub fn time_label(
  stamp: &str
) -> Option<String> {
  let normalized =
    normalize_stamp(stamp)?;
  normalized
    .get(11..16)
    .map(ToString::to_string)
}

#[must_use]
pub fn is_undetermined(
  raw: &str
) -> bool {
  let trimmed = raw.trim();
  trimmed.is_empty()
    || trimmed
      .eq_ignore_ascii_case(UNDETERMINED)
}

#[must_use]
pub fn format_project_stamp(
  dt: DateTime<Utc>
) -> String {
  dt.with_timezone(project_timezone())
    .format("%Y-%m-%d %H:%M")
    .to_string()
}

fn parse_naive(
  raw: &str,
  kind: DateKind
) -> Option<NaiveDateTime> {
  let trimmed = raw.trim();
  if is_undetermined(trimmed) {
    return None;
  }

  if let Some(dt) =
    parse_naive_datetime(trimmed)
  {
    return Some(dt);
  }

  parse_naive_day(trimmed).map(|day| {
    day.and_time(kind.default_time())
  })
}

fn parse_naive_datetime(
  raw: &str
) -> Option<NaiveDateTime> {
  const FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S"
  ];

  FORMATS.iter().find_map(|fmt| {
    NaiveDateTime::parse_from_str(
      raw, fmt
    )
    .ok()
  })
}

fn parse_naive_day(
  raw: &str
) -> Option<NaiveDate> {
  NaiveDate::parse_from_str(
    raw, "%Y-%m-%d"
  )
  .ok()
}

fn to_utc_from_local(
  naive: NaiveDateTime,
  tz: &Tz
) -> Option<DateTime<Utc>> {
  match tz.from_local_datetime(&naive) {
    | LocalResult::Single(dt) => {
      Some(dt.with_timezone(&Utc))
    }
    | LocalResult::Ambiguous(
      earliest,
      _
    ) => {
      Some(earliest.with_timezone(&Utc))
    }
    | LocalResult::None => {
      // Walk forward past the skipped
      // span, as wall clocks do.
      let shifted = (1..=GAP_STEPS)
        .find_map(|step| {
          tz.from_local_datetime(
            &(naive
              + Duration::minutes(
                GAP_STEP_MINUTES * step
              ))
          )
          .earliest()
        });
      tracing::debug!(
        %naive,
        resolved = shifted.is_some(),
        "local time falls in a gap; \
         moving forward"
      );
      shifted.map(|dt| {
        dt.with_timezone(&Utc)
      })
    }
  }
}

fn resolve_project_timezone() -> Tz {
  if let Ok(raw) =
    std::env::var(TIMEZONE_ENV_VAR)
    && let Some(tz) =
      parse_timezone(&raw, TIMEZONE_ENV_VAR)
  {
    return tz;
  }

  if let Some(path) =
    timezone_config_path()
    && let Some(tz) =
      load_timezone_from_file(&path)
  {
    return tz;
  }

  parse_timezone(
    DEFAULT_PROJECT_TIMEZONE,
    "DEFAULT_PROJECT_TIMEZONE"
  )
  .unwrap_or_else(|| {
    tracing::error!(
      "failed to parse fallback \
       timezone; using UTC"
    );
    chrono_tz::UTC
  })
}

fn timezone_config_path()
-> Option<PathBuf> {
  if let Ok(raw) = std::env::var(
    TIMEZONE_CONFIG_ENV_VAR
  ) {
    let trimmed = raw.trim();
    if !trimmed.is_empty() {
      return Some(PathBuf::from(
        trimmed
      ));
    }
  }

  std::env::current_dir().ok().map(
    |dir| {
      dir.join(TIMEZONE_CONFIG_FILE)
    }
  )
}

fn load_timezone_from_file(
  path: &PathBuf
) -> Option<Tz> {
  if !path.exists() {
    tracing::debug!(
      file = %path.display(),
      "timezone config file not found"
    );
    return None;
  }

  let raw = match fs::read_to_string(
    path
  ) {
    | Ok(raw) => raw,
    | Err(err) => {
      tracing::error!(
        file = %path.display(),
        error = %err,
        "failed reading timezone config file"
      );
      return None;
    }
  };

  let parsed = match toml::from_str::<
    TimezoneConfig
  >(&raw)
  {
    | Ok(parsed) => parsed,
    | Err(err) => {
      tracing::error!(
        file = %path.display(),
        error = %err,
        "failed parsing timezone config file"
      );
      return None;
    }
  };

  let timezone =
    parsed.timezone.or_else(|| {
      parsed.time.and_then(|section| {
        section.timezone
      })
    });
  let Some(timezone) = timezone else {
    tracing::warn!(
      file = %path.display(),
      "timezone config had no timezone field"
    );
    return None;
  };

  parse_timezone(
    timezone.as_str(),
    &format!("file:{}", path.display())
  )
}

fn parse_timezone(
  raw: &str,
  source: &str
) -> Option<Tz> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    tracing::warn!(
      source,
      "timezone source was empty"
    );
    return None;
  }

  match trimmed.parse::<Tz>() {
    | Ok(tz) => {
      tracing::info!(
        source,
        timezone = %trimmed,
        "resolved project timezone"
      );
      Some(tz)
    }
    | Err(err) => {
      tracing::warn!(
        source,
        timezone = %trimmed,
        error = %err,
        "invalid timezone; ignoring"
      );
      None
    }
  }
}

#[cfg(test)]
mod tests {
  use chrono::{
    TimeZone,
    Timelike,
    Utc
  };
  use chrono_tz::America::New_York;
  use chrono_tz::Asia::Tokyo;

  use super::{
    DateKind,
    date_key,
    normalize_stamp,
    parse_date,
    parse_date_in,
    project_timezone,
    time_label
  };

  #[test]
  fn date_only_event_defaults_to_evening()
   {
    let parsed = parse_date(
      Some("2024-05-01"),
      DateKind::Event
    )
    .expect("parse event date");
    let local = parsed
      .with_timezone(project_timezone());
    assert_eq!(local.hour(), 21);
    assert_eq!(local.minute(), 0);
    assert_eq!(
      local
        .format("%Y-%m-%d")
        .to_string(),
      "2024-05-01"
    );
  }

  #[test]
  fn date_only_milestone_defaults_to_noon()
   {
    let parsed = parse_date(
      Some("2024-05-01"),
      DateKind::Milestone
    )
    .expect("parse milestone date");
    let local = parsed
      .with_timezone(project_timezone());
    assert_eq!(local.hour(), 12);
    assert_eq!(local.minute(), 0);
  }

  #[test]
  fn empty_missing_and_undetermined_are_unscheduled()
   {
    for kind in
      [DateKind::Event, DateKind::Milestone]
    {
      assert_eq!(
        parse_date(Some(""), kind),
        None
      );
      assert_eq!(
        parse_date(None, kind),
        None
      );
      assert_eq!(
        parse_date(Some("TBD"), kind),
        None
      );
      assert_eq!(
        parse_date(
          Some("next friday"),
          kind
        ),
        None
      );
      assert_eq!(
        parse_date(
          Some("2024-02-30"),
          kind
        ),
        None
      );
    }
  }

  #[test]
  fn explicit_time_wins_over_default() {
    let parsed = parse_date_in(
      Some("2024-06-01 19:00"),
      DateKind::Event,
      &Tokyo
    )
    .expect("parse datetime");
    assert_eq!(
      parsed,
      Utc
        .with_ymd_and_hms(
          2024, 6, 1, 10, 0, 0
        )
        .single()
        .expect("valid utc")
    );

    let with_t = parse_date_in(
      Some("2024-06-01T19:00"),
      DateKind::Milestone,
      &Tokyo
    );
    assert_eq!(with_t, Some(parsed));
  }

  #[test]
  fn stamps_normalize_to_fixed_width() {
    assert_eq!(
      normalize_stamp(" 2024-06-01T09:05 ")
        .as_deref(),
      Some("2024-06-01 09:05")
    );
    assert_eq!(
      normalize_stamp("2024-06-01")
        .as_deref(),
      Some("2024-06-01")
    );
    assert_eq!(
      normalize_stamp("June 1st"),
      None
    );
    assert_eq!(
      date_key("2024-06-01 09:05")
        .as_deref(),
      Some("2024-06-01")
    );
    assert_eq!(
      time_label("2024-06-01 09:05")
        .as_deref(),
      Some("09:05")
    );
    assert_eq!(
      time_label("2024-06-01"),
      None
    );
  }

  #[test]
  fn skipped_local_time_moves_forward() {
    let parsed = parse_date_in(
      Some("2026-03-08 02:30"),
      DateKind::Event,
      &New_York
    )
    .expect("gap time still schedules");
    assert_eq!(
      parsed,
      Utc
        .with_ymd_and_hms(
          2026, 3, 8, 7, 0, 0
        )
        .single()
        .expect("valid instant")
    );
  }
}
