use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{
  debug,
  warn
};

use crate::model::{
  TrackCapability,
  TrackError
};

const USER_AGENT: &str = concat!(
  "encore/",
  env!("CARGO_PKG_VERSION"),
  " (+link tracker)"
);

/// Hosts whose public pages render
/// behind a login wall or a script, so a
/// fetch says nothing about the content.
const UNJUDGEABLE_HOSTS: [&str; 7] = [
  "x.com",
  "twitter.com",
  "instagram.com",
  "facebook.com",
  "tiktok.com",
  "threads.net",
  "line.me"
];

#[derive(Debug, Clone, Default)]
pub struct ProbeResponse {
  /// Page text, when the probe could
  /// read it.
  pub body: Option<String>
}

#[derive(Debug, Error)]
pub enum ProbeError {
  #[error("probe timed out")]
  Timeout,

  #[error("connection failed: {0}")]
  Connect(String),

  #[error("server answered HTTP {0}")]
  Status(u16),

  #[error("{0}")]
  Other(String)
}

impl ProbeError {
  /// Collapses a fault into the closed
  /// set of messages shown on a link.
  pub fn classify(&self) -> TrackError {
    match self {
      | ProbeError::Timeout
      | ProbeError::Connect(_) => {
        TrackError::Unreachable
      }
      | ProbeError::Status(code) => {
        match code {
          | 401 | 403 | 429 | 451 => {
            TrackError::AccessRestricted
          }
          | 404 | 410 => {
            TrackError::ContentChanged
          }
          | 500..=599 => {
            TrackError::Unreachable
          }
          | _ => TrackError::Unknown
        }
      }
      | ProbeError::Other(_) => {
        TrackError::Unknown
      }
    }
  }
}

/// Reachability check for one URL. Must
/// resolve within `timeout` plus a small
/// overhead.
#[async_trait]
pub trait Probe: Send + Sync {
  async fn probe(
    &self,
    url: &str,
    timeout: Duration
  ) -> Result<ProbeResponse, ProbeError>;
}

/// GET over reqwest with rustls.
#[derive(Debug, Clone)]
pub struct HttpProbe {
  client: reqwest::Client
}

impl HttpProbe {
  pub fn new() -> anyhow::Result<Self> {
    use anyhow::Context;

    let client =
      reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .build()
        .context(
          "failed building HTTP client \
           for link tracking"
        )?;
    Ok(Self { client })
  }
}

#[async_trait]
impl Probe for HttpProbe {
  async fn probe(
    &self,
    url: &str,
    timeout: Duration
  ) -> Result<ProbeResponse, ProbeError>
  {
    let response = self
      .client
      .get(url)
      .timeout(timeout)
      .header(
        reqwest::header::CACHE_CONTROL,
        "no-cache"
      )
      .send()
      .await
      .map_err(map_reqwest_error)?;

    let status = response.status();
    if status.is_client_error()
      || status.is_server_error()
    {
      debug!(
        url,
        status = %status,
        "link answered with error status"
      );
      return Err(ProbeError::Status(
        status.as_u16()
      ));
    }

    let body = match response.text().await
    {
      | Ok(body) => Some(body),
      | Err(error) => {
        warn!(
          url,
          error = %error,
          "reachable but body unreadable"
        );
        None
      }
    };

    Ok(ProbeResponse { body })
  }
}

fn map_reqwest_error(
  error: reqwest::Error
) -> ProbeError {
  if error.is_timeout() {
    ProbeError::Timeout
  } else if error.is_connect()
    || error.is_request()
  {
    ProbeError::Connect(error.to_string())
  } else {
    ProbeError::Other(error.to_string())
  }
}

/// Host part of a normalised URL,
/// without `www.` and port.
fn host_of(url: &str) -> Option<String> {
  let rest =
    url.split_once("://")?.1;
  let authority = rest
    .split(['/', '?', '#'])
    .next()?
    .rsplit('@')
    .next()?;
  let host = authority
    .split(':')
    .next()?
    .trim()
    .to_ascii_lowercase();
  if host.is_empty() {
    return None;
  }
  Some(
    host
      .strip_prefix("www.")
      .unwrap_or(&host)
      .to_string()
  )
}

/// Initial capability for a newly added
/// link.
pub fn judge_capability(
  normalized_url: &str
) -> TrackCapability {
  let lower =
    normalized_url.to_ascii_lowercase();
  if !(lower.starts_with("http://")
    || lower.starts_with("https://"))
  {
    return TrackCapability::Unjudged;
  }
  match host_of(&lower) {
    | Some(host)
      if UNJUDGEABLE_HOSTS.iter().any(
        |blocked| {
          host == *blocked
            || host.ends_with(&format!(
              ".{blocked}"
            ))
        }
      ) =>
    {
      TrackCapability::Unsupported
    }
    | Some(_) => {
      TrackCapability::Supported
    }
    | None => TrackCapability::Unjudged
  }
}
