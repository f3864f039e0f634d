use std::collections::HashMap;
use std::fs;
use std::path::{
  Path,
  PathBuf
};

use thiserror::Error;
use tracing::{
  debug,
  info,
  trace,
  warn
};

const RC_ENV_VAR: &str = "ENCORERC";
const RC_FILE_NAME: &str = ".encorerc";
const DATA_DIR_NAME: &str = ".encore";
const DISABLED_RC: &str = "/dev/null";

const DEFAULTS: [(&str, &str); 5] = [
  ("data.location", "~/.encore"),
  ("default.command", "list"),
  ("color", "on"),
  ("tracking.tick_secs", "600"),
  ("tracking.probe_timeout_secs", "12")
];

/// Keys read somewhere but without a
/// default value.
const OPTIONAL_KEYS: [&str; 1] =
  ["storage.quota_bytes"];

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error(
    "failed to read {path}: {source}"
  )]
  Read {
    path:   PathBuf,
    #[source]
    source: std::io::Error
  },

  #[error(
    "{path}:{line}: expected `key = \
     value` or `include <file>`, got \
     `{text}`"
  )]
  Syntax {
    path: PathBuf,
    line: usize,
    text: String
  },

  #[error(
    "{path}:{line}: include needs a \
     file name"
  )]
  EmptyInclude {
    path: PathBuf,
    line: usize
  },

  #[error(
    "{0} includes itself, directly or \
     through another file"
  )]
  IncludeCycle(PathBuf),

  #[error(
    "`{key}` must be on or off, got \
     `{value}`"
  )]
  NotASwitch {
    key:   String,
    value: String
  },

  #[error(
    "cannot determine home directory"
  )]
  NoHome,

  #[error(
    "failed to create data directory \
     {path}: {source}"
  )]
  DataDir {
    path:   PathBuf,
    #[source]
    source: std::io::Error
  }
}

/// One meaningful line of an rc file.
#[derive(Debug, PartialEq, Eq)]
enum RcLine<'a> {
  Include(&'a str),
  Set {
    key:   &'a str,
    value: &'a str
  }
}

/// `None` for blank and comment-only
/// lines; `Err(())` for anything else
/// that is not a setting.
fn parse_rc_line(
  raw: &str
) -> Option<Result<RcLine<'_>, ()>> {
  let line = raw
    .split_once('#')
    .map_or(raw, |(before, _)| before)
    .trim();
  if line.is_empty() {
    return None;
  }
  if let Some(rest) =
    line.strip_prefix("include")
    && (rest.is_empty()
      || rest.starts_with(
        char::is_whitespace
      ))
  {
    return Some(Ok(RcLine::Include(
      rest.trim()
    )));
  }
  Some(
    line
      .split_once('=')
      .map(|(key, value)| RcLine::Set {
        key:   key.trim(),
        value: value.trim()
      })
      .filter(|set| {
        !matches!(set, RcLine::Set { key, .. } if key.is_empty())
      })
      .ok_or(())
  )
}

#[derive(Debug, Clone)]
pub struct Config {
  values:           HashMap<String, String>,
  pub loaded_files: Vec<PathBuf>
}

impl Config {
  /// Defaults, then the rc file (if
  /// any) with its includes in reading
  /// order.
  #[tracing::instrument(skip(
    rc_override
  ))]
  pub fn load(
    rc_override: Option<&Path>
  ) -> Result<Self, ConfigError> {
    let mut cfg = Self {
      values:       DEFAULTS
        .iter()
        .map(|(k, v)| {
          (k.to_string(), v.to_string())
        })
        .collect(),
      loaded_files: vec![]
    };

    match locate_rc(rc_override)? {
      | Some(path) => {
        info!(rc = %path.display(), "loading encorerc");
        cfg.read_rc(&path, &mut vec![])?;
      }
      | None => {
        debug!("no encorerc; defaults only")
      }
    }
    Ok(cfg)
  }

  /// `rc.` prefixes from the command
  /// line are optional.
  pub fn apply_overrides<I>(
    &mut self,
    overrides: I
  ) where
    I: IntoIterator<
      Item = (String, String)
    >
  {
    for (key, value) in overrides {
      let key = key
        .strip_prefix("rc.")
        .map(str::to_string)
        .unwrap_or(key);
      debug!(%key, %value, "command-line override");
      self.set(key, value);
    }
  }

  pub fn get(
    &self,
    key: &str
  ) -> Option<String> {
    self.values.get(key).cloned()
  }

  /// Strict on/off reading; anything
  /// else is an error rather than a
  /// silent `false`.
  pub fn get_switch(
    &self,
    key: &str
  ) -> Result<Option<bool>, ConfigError>
  {
    let Some(raw) = self.values.get(key)
    else {
      return Ok(None);
    };
    match raw
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "on" | "yes" | "true" | "1" => {
        Ok(Some(true))
      }
      | "off" | "no" | "false" | "0" => {
        Ok(Some(false))
      }
      | _ => Err(ConfigError::NotASwitch {
        key:   key.to_string(),
        value: raw.clone()
      })
    }
  }

  /// Unsigned value; a malformed entry
  /// is logged and treated as unset.
  pub fn get_u64(
    &self,
    key: &str
  ) -> Option<u64> {
    let raw = self.values.get(key)?;
    match raw.trim().parse::<u64>() {
      | Ok(value) => Some(value),
      | Err(err) => {
        warn!(key, value = %raw, error = %err, "ignoring non-numeric config value");
        None
      }
    }
  }

  fn set(
    &mut self,
    key: String,
    value: String
  ) {
    if !is_known_key(&key) {
      warn!(%key, "unknown config key; kept but unused");
    }
    self.values.insert(key, value);
  }

  /// `chain` holds the files currently
  /// being read, outermost first.
  fn read_rc(
    &mut self,
    path: &Path,
    chain: &mut Vec<PathBuf>
  ) -> Result<(), ConfigError> {
    let path = home_relative(path)?;
    let identity = fs::canonicalize(&path)
      .unwrap_or_else(|_| path.clone());
    if chain.contains(&identity) {
      return Err(
        ConfigError::IncludeCycle(path)
      );
    }

    let text = fs::read_to_string(&path)
      .map_err(|source| {
        ConfigError::Read {
          path: path.clone(),
          source
        }
      })?;
    self.loaded_files.push(path.clone());
    chain.push(identity);

    let here = path
      .parent()
      .map(Path::to_path_buf)
      .unwrap_or_default();
    for (idx, raw) in
      text.lines().enumerate()
    {
      let line = idx + 1;
      match parse_rc_line(raw) {
        | None => {}
        | Some(Ok(RcLine::Set {
          key,
          value
        })) => {
          trace!(key, value, line, "rc setting");
          self.set(
            key.to_string(),
            value.to_string()
          );
        }
        | Some(Ok(RcLine::Include(
          ""
        ))) => {
          return Err(
            ConfigError::EmptyInclude {
              path: path.clone(),
              line
            }
          );
        }
        | Some(Ok(RcLine::Include(
          target
        ))) => {
          let target = here.join(
            home_relative(Path::new(
              target
            ))?
          );
          if target.exists() {
            self.read_rc(&target, chain)?;
          } else {
            warn!(include = %target.display(), line, "included rc file missing; skipped");
          }
        }
        | Some(Err(())) => {
          return Err(ConfigError::Syntax {
            path: path.clone(),
            line,
            text: raw.trim().to_string()
          });
        }
      }
    }

    chain.pop();
    Ok(())
  }
}

fn is_known_key(key: &str) -> bool {
  DEFAULTS
    .iter()
    .map(|(k, _)| *k)
    .chain(OPTIONAL_KEYS)
    .any(|known| known == key)
}

/// Precedence: explicit `--encorerc`,
/// then `$ENCORERC`, then
/// `~/.encorerc` when present.
/// `/dev/null` disables the rc file.
fn locate_rc(
  explicit: Option<&Path>
) -> Result<Option<PathBuf>, ConfigError> {
  let chosen = explicit
    .map(Path::to_path_buf)
    .or_else(|| {
      std::env::var_os(RC_ENV_VAR)
        .map(PathBuf::from)
    });
  if let Some(path) = chosen {
    return Ok(
      (path != Path::new(DISABLED_RC))
        .then_some(path)
    );
  }
  let fallback =
    home()?.join(RC_FILE_NAME);
  Ok(fallback.exists().then_some(fallback))
}

/// Data directory for the key-value
/// files, created on first use.
#[tracing::instrument(skip(cfg))]
pub fn resolve_data_dir(
  cfg: &Config,
  explicit: Option<&Path>
) -> Result<PathBuf, ConfigError> {
  let dir = match (
    explicit,
    cfg.get("data.location")
  ) {
    | (Some(path), _) => {
      path.to_path_buf()
    }
    | (None, Some(location)) => {
      home_relative(Path::new(&location))?
    }
    | (None, None) => {
      home()?.join(DATA_DIR_NAME)
    }
  };

  if !dir.is_dir() {
    info!(dir = %dir.display(), "creating data directory");
    fs::create_dir_all(&dir).map_err(
      |source| ConfigError::DataDir {
        path: dir.clone(),
        source
      }
    )?;
  }
  Ok(dir)
}

fn home() -> Result<PathBuf, ConfigError> {
  dirs::home_dir()
    .ok_or(ConfigError::NoHome)
}

/// Expands a leading `~/`; only that
/// case needs a home directory.
fn home_relative(
  path: &Path
) -> Result<PathBuf, ConfigError> {
  match path.strip_prefix("~") {
    | Ok(rest) => Ok(home()?.join(rest)),
    | Err(_) => Ok(path.to_path_buf())
  }
}

#[cfg(test)]
mod tests {
  use std::fs;
  use std::path::Path;

  use super::{
    Config,
    ConfigError,
    RcLine,
    parse_rc_line
  };

  #[test]
  fn rc_lines_are_classified() {
    assert_eq!(parse_rc_line("  "), None);
    assert_eq!(
      parse_rc_line("# note"),
      None
    );
    assert_eq!(
      parse_rc_line(
        "color = off # quiet"
      ),
      Some(Ok(RcLine::Set {
        key:   "color",
        value: "off"
      }))
    );
    assert_eq!(
      parse_rc_line("include extra.rc"),
      Some(Ok(RcLine::Include(
        "extra.rc"
      )))
    );
    assert_eq!(
      parse_rc_line(
        "included.thing = 1"
      ),
      Some(Ok(RcLine::Set {
        key:   "included.thing",
        value: "1"
      }))
    );
    assert_eq!(
      parse_rc_line("just words"),
      Some(Err(()))
    );
    assert_eq!(
      parse_rc_line("= orphan"),
      Some(Err(()))
    );
  }

  #[test]
  fn rc_file_layers_over_defaults() {
    let dir = tempfile::tempdir()
      .expect("tempdir");
    fs::write(
      dir.path().join("extra.rc"),
      "tracking.tick_secs = 60\n"
    )
    .expect("write include");
    let rc = dir.path().join("encorerc");
    fs::write(
      &rc,
      "# encore settings\n\
       color = off\n\
       include extra.rc\n\
       include missing.rc\n\
       storage.quota_bytes = lots # typo\n"
    )
    .expect("write rc");

    let cfg = Config::load(Some(&rc))
      .expect("load");
    assert_eq!(
      cfg.get_switch("color").expect("switch"),
      Some(false)
    );
    assert_eq!(
      cfg.get_u64("tracking.tick_secs"),
      Some(60)
    );
    assert_eq!(
      cfg.get_u64(
        "tracking.probe_timeout_secs"
      ),
      Some(12)
    );
    assert_eq!(
      cfg.get_u64("storage.quota_bytes"),
      None
    );
    assert_eq!(cfg.loaded_files.len(), 2);
  }

  #[test]
  fn include_cycles_are_rejected() {
    let dir = tempfile::tempdir()
      .expect("tempdir");
    fs::write(
      dir.path().join("a.rc"),
      "include b.rc\n"
    )
    .expect("write a");
    fs::write(
      dir.path().join("b.rc"),
      "color = off\ninclude a.rc\n"
    )
    .expect("write b");

    let err = Config::load(Some(
      &dir.path().join("a.rc")
    ))
    .expect_err("cycle");
    assert!(matches!(
      err,
      ConfigError::IncludeCycle(_)
    ));
  }

  #[test]
  fn bad_lines_name_file_and_line() {
    let dir = tempfile::tempdir()
      .expect("tempdir");
    let rc = dir.path().join("encorerc");
    fs::write(
      &rc,
      "color = on\nnonsense\n"
    )
    .expect("write rc");
    match Config::load(Some(&rc)) {
      | Err(ConfigError::Syntax {
        line,
        text,
        ..
      }) => {
        assert_eq!(line, 2);
        assert_eq!(text, "nonsense");
      }
      | other => {
        panic!("unexpected: {other:?}")
      }
    }
  }

  #[test]
  fn overrides_strip_the_rc_prefix() {
    let mut cfg = Config::load(Some(
      Path::new("/dev/null")
    ))
    .expect("load");
    assert!(cfg.loaded_files.is_empty());
    cfg.apply_overrides([
      (
        "rc.default.command".to_string(),
        "due".to_string()
      ),
      (
        "color".to_string(),
        "sometimes".to_string()
      )
    ]);
    assert_eq!(
      cfg.get("default.command").as_deref(),
      Some("due")
    );
    assert!(matches!(
      cfg.get_switch("color"),
      Err(ConfigError::NotASwitch { .. })
    ));
  }
}
