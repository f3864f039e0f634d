use std::ffi::OsString;
use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use crate::lifecycle::Decision;
use crate::sort::{ItemSortMode, ParentSortMode};

#[derive(Debug, Clone)]
pub struct PreprocessedArgs {
    pub cleaned_args: Vec<OsString>,
    pub rc_overrides: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct KeyVal {
    pub key: String,
    pub value: String,
}

impl std::str::FromStr for KeyVal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (k, v) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("expected KEY=VALUE, got: {s}"))?;
        Ok(Self {
            key: k.trim().to_string(),
            value: v.trim().to_string(),
        })
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "encore",
    version,
    about = "Encore: concert and ticket lottery tracker",
    disable_help_subcommand = true,
    arg_required_else_help = false
)]
pub struct GlobalCli {
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[arg(short = 'q', long = "quiet", action = ArgAction::Count, global = true)]
    pub quiet: u8,

    #[arg(
        long = "rc",
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<KeyVal>()),
        action = ArgAction::Append,
        global = true
    )]
    pub rc_overrides: Vec<KeyVal>,

    #[arg(long = "encorerc", global = true)]
    pub encorerc: Option<PathBuf>,

    #[arg(long = "data", global = true)]
    pub data: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Manage artists
    #[command(subcommand)]
    Artist(ArtistCommand),

    /// Manage tours of an artist
    #[command(subcommand)]
    Tour(TourCommand),

    /// Manage concerts of a tour
    #[command(subcommand)]
    Concert(ConcertCommand),

    /// Record a ticket decision for a concert
    Decide {
        concert: String,
        /// BUY, CONSIDER, SKIP, WON or LOST
        decision: Decision,
        #[arg(long = "lottery-name")]
        lottery_name: Option<String>,
        #[arg(long = "result-at")]
        result_at: Option<String>,
        #[arg(long = "concert-at")]
        concert_at: Option<String>,
    },

    /// List concerts across all artists
    List {
        #[arg(long = "sort")]
        sort: Option<ItemSortMode>,
    },

    /// Concerts that need an answer now
    Due,

    /// Month view of concerts and milestones
    Calendar {
        /// YYYY-MM; defaults to the current month
        #[arg(long = "month")]
        month: Option<String>,
    },

    /// Manage watched links
    #[command(subcommand)]
    Link(LinkCommand),

    /// Run one tracking cycle now
    Track {
        /// Honour the tracking interval like the background timer
        #[arg(long = "auto")]
        auto: bool,
    },

    /// Apply time-driven transitions, then track every link
    Refresh,

    /// Keep tracking on a timer until interrupted
    Watch,

    /// Manage concert images
    #[command(subcommand)]
    Image(ImageCommand),

    /// Change sort modes
    #[command(subcommand)]
    Sort(SortCommand),

    /// Show or update settings
    Settings(SettingsArgs),

    /// Write the collection as JSON
    Export {
        /// Output file; stdout when omitted
        path: Option<PathBuf>,
    },

    /// Replace the collection with a JSON export
    Import {
        path: PathBuf,
        /// Skip the overwrite confirmation
        #[arg(long = "yes", short = 'y')]
        yes: bool,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum ArtistCommand {
    Add {
        name: String,
    },
    Rm {
        artist: String,
    },
    List,
    /// Move an artist to a position in manual order
    Order {
        artist: String,
        position: usize,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum TourCommand {
    Add { artist: String, name: String },
    Rm { tour: String },
}

#[derive(Args, Debug, Clone, Default)]
pub struct ConcertFields {
    #[arg(long = "venue")]
    pub venue: Option<String>,
    #[arg(long = "price")]
    pub price: Option<String>,
    #[arg(long = "sale-link")]
    pub sale_link: Option<String>,
    /// Empty string clears the milestone
    #[arg(long = "sale-at")]
    pub sale_at: Option<String>,
    #[arg(long = "deadline-at")]
    pub deadline_at: Option<String>,
    #[arg(long = "result-at")]
    pub result_at: Option<String>,
    #[arg(long = "concert-at")]
    pub concert_at: Option<String>,
    #[arg(long = "lottery-name")]
    pub lottery_name: Option<String>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConcertCommand {
    Add {
        tour: String,
        /// Free-text date label; TBD when unknown
        #[arg(default_value = "TBD")]
        date: String,
        #[command(flatten)]
        fields: ConcertFields,
    },
    Set {
        concert: String,
        #[arg(long = "date")]
        date: Option<String>,
        #[command(flatten)]
        fields: ConcertFields,
    },
    Rm {
        concert: String,
    },
    Show {
        concert: String,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum LinkCommand {
    Add {
        artist: String,
        name: String,
        url: String,
        /// Include in tracking cycles
        #[arg(long = "track")]
        track: bool,
        #[arg(long = "keyword", short = 'k', action = ArgAction::Append)]
        keywords: Vec<String>,
    },
    Rm {
        link: String,
    },
    List {
        artist: Option<String>,
    },
    /// Mark keyword notices as read; all of them when no link is given
    Ack {
        link: Option<String>,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum ImageCommand {
    Add { concert: String, url: String },
    /// Move an image from one position to another
    Mv { concert: String, from: usize, to: usize },
    Rm { concert: String, index: usize },
    List { concert: String },
}

#[derive(Subcommand, Debug, Clone)]
pub enum SortCommand {
    Artists { mode: ParentSortMode },
    Concerts { mode: ItemSortMode },
}

#[derive(Args, Debug, Clone, Default)]
pub struct SettingsArgs {
    #[arg(long = "auto-tracking")]
    pub auto_tracking: Option<bool>,
    #[arg(long = "interval-days")]
    pub interval_days: Option<u32>,
    #[arg(long = "show-attended")]
    pub show_attended: Option<bool>,
    #[arg(long = "show-skipped")]
    pub show_skipped: Option<bool>,
}

impl SettingsArgs {
    pub fn is_empty(&self) -> bool {
        self.auto_tracking.is_none()
            && self.interval_days.is_none()
            && self.show_attended.is_none()
            && self.show_skipped.is_none()
    }
}

impl Command {
    /// Maps `default.command` onto an argument-free command.
    pub fn from_default_name(name: &str) -> Command {
        match name.trim().to_ascii_lowercase().as_str() {
            "list" => Command::List { sort: None },
            "due" => Command::Due,
            "calendar" => Command::Calendar { month: None },
            "refresh" => Command::Refresh,
            "track" => Command::Track { auto: false },
            "settings" => Command::Settings(SettingsArgs::default()),
            other => {
                warn!(command = %other, "unsupported default.command; using list");
                Command::List { sort: None }
            }
        }
    }
}

pub fn init_tracing(verbose: u8, quiet: u8) -> anyhow::Result<()> {
    let default_level = if quiet >= 2 {
        "error"
    } else if quiet == 1 {
        "warn"
    } else if verbose >= 3 {
        "trace"
    } else if verbose == 2 {
        "debug"
    } else if verbose == 1 {
        "info"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| anyhow!("invalid RUST_LOG / log filter: {e}"))?;

    let init_result = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(true)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();

    if let Err(err) = init_result {
        debug!(error = %err, "tracing subscriber already set, continuing");
    }

    Ok(())
}

#[tracing::instrument(skip_all)]
pub fn preprocess_args(raw: &[OsString]) -> anyhow::Result<PreprocessedArgs> {
    let mut cleaned = Vec::with_capacity(raw.len());
    let mut overrides: Vec<(String, String)> = Vec::new();

    let mut iter = raw.iter().cloned();
    if let Some(bin) = iter.next() {
        cleaned.push(bin);
    }

    for arg in iter {
        let s = arg.to_string_lossy();
        if let Some(rest) = s.strip_prefix("rc.") {
            let parsed = if let Some((k, v)) = rest.split_once('=') {
                Some((format!("rc.{k}"), v.to_string()))
            } else if let Some((k, v)) = rest.split_once(':') {
                Some((format!("rc.{k}"), v.to_string()))
            } else {
                None
            };

            if let Some((k, v)) = parsed {
                debug!(key = %k, value = %v, "captured positional rc override");
                overrides.push((k, v));
                continue;
            }
        }

        cleaned.push(arg);
    }

    Ok(PreprocessedArgs {
        cleaned_args: cleaned,
        rc_overrides: overrides,
    })
}
