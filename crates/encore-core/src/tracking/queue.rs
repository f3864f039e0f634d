use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{
  debug,
  warn
};

use super::LinkKey;
use super::probe::{
  Probe,
  ProbeError,
  ProbeResponse
};

#[derive(Debug, Clone)]
pub struct ProbeJob {
  pub key: LinkKey,
  pub url: String
}

#[derive(Debug)]
pub struct ProbeResult {
  pub key:     LinkKey,
  pub url:     String,
  pub outcome:
    Result<ProbeResponse, ProbeError>
}

/// A queue drained by exactly one
/// worker, so at most one probe is in
/// flight and results come back in
/// submission order.
pub struct ProbeQueue {
  probe:   Arc<dyn Probe>,
  timeout: Duration
}

impl ProbeQueue {
  pub fn new(
    probe: Arc<dyn Probe>,
    timeout: Duration
  ) -> Self {
    Self { probe, timeout }
  }

  pub async fn run(
    &self,
    jobs: Vec<ProbeJob>
  ) -> Vec<ProbeResult> {
    if jobs.is_empty() {
      return vec![];
    }

    let total = jobs.len();
    let submitted = jobs.clone();
    let (tx, mut rx) =
      mpsc::channel::<ProbeJob>(total);
    for job in jobs {
      // capacity covers every job
      if tx.send(job).await.is_err() {
        warn!(
          "probe queue closed early"
        );
        break;
      }
    }
    drop(tx);

    let probe = self.probe.clone();
    let timeout = self.timeout;
    let worker = tokio::spawn(async move {
      let mut results =
        Vec::with_capacity(total);
      while let Some(job) = rx.recv().await
      {
        let outcome = run_one(
          probe.as_ref(),
          &job.url,
          timeout
        )
        .await;
        debug!(
          url = %job.url,
          ok = outcome.is_ok(),
          "probe finished"
        );
        results.push(ProbeResult {
          key: job.key,
          url: job.url,
          outcome
        });
      }
      results
    });

    match worker.await {
      | Ok(results) => results,
      | Err(err) => {
        warn!(
          error = %err,
          "probe worker aborted; \
           failing the whole batch"
        );
        submitted
          .into_iter()
          .map(|job| ProbeResult {
            key:     job.key,
            url:     job.url,
            outcome: Err(ProbeError::Other(
              "probe worker aborted"
                .to_string()
            ))
          })
          .collect()
      }
    }
  }
}

/// The probe gets its own deadline; the
/// outer one guarantees cancellation
/// even if an implementation ignores it.
async fn run_one(
  probe: &dyn Probe,
  url: &str,
  timeout: Duration
) -> Result<ProbeResponse, ProbeError> {
  match tokio::time::timeout(
    timeout,
    probe.probe(url, timeout)
  )
  .await
  {
    | Ok(outcome) => outcome,
    | Err(_) => Err(ProbeError::Timeout)
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;
  use std::sync::atomic::{
    AtomicUsize,
    Ordering
  };
  use std::time::Duration;

  use async_trait::async_trait;
  use parking_lot::Mutex;

  use super::{
    ProbeJob,
    ProbeQueue
  };
  use crate::model::TrackError;
  use crate::tracking::LinkKey;
  use crate::tracking::probe::{
    Probe,
    ProbeError,
    ProbeResponse
  };

  /// Never answers for `hang`; answers
  /// everything else after a short
  /// yield.
  #[derive(Default)]
  struct CountingProbe {
    in_flight:     AtomicUsize,
    max_in_flight: AtomicUsize,
    started:       Mutex<Vec<String>>
  }

  #[async_trait]
  impl Probe for CountingProbe {
    async fn probe(
      &self,
      url: &str,
      _timeout: Duration
    ) -> Result<ProbeResponse, ProbeError>
    {
      self
        .started
        .lock()
        .push(url.to_string());
      let _guard =
        InFlight::enter(&self.in_flight);
      self.max_in_flight.fetch_max(
        self.in_flight.load(Ordering::SeqCst),
        Ordering::SeqCst
      );

      if url == "hang" {
        std::future::pending::<()>().await;
      }
      tokio::time::sleep(
        Duration::from_millis(5)
      )
      .await;

      Ok(ProbeResponse {
        body: Some(url.to_string())
      })
    }
  }

  /// Leaves the count on drop, so a
  /// probe cut off by the deadline is
  /// no longer counted.
  struct InFlight<'a>(&'a AtomicUsize);

  impl<'a> InFlight<'a> {
    fn enter(
      count: &'a AtomicUsize
    ) -> Self {
      count.fetch_add(1, Ordering::SeqCst);
      Self(count)
    }
  }

  impl Drop for InFlight<'_> {
    fn drop(&mut self) {
      self.0.fetch_sub(1, Ordering::SeqCst);
    }
  }

  fn job(url: &str) -> ProbeJob {
    ProbeJob {
      key: LinkKey {
        parent_id: "p".to_string(),
        link_id:   url.to_string()
      },
      url: url.to_string()
    }
  }

  #[tokio::test]
  async fn jobs_run_one_at_a_time_in_order()
   {
    let probe =
      Arc::new(CountingProbe::default());
    let queue = ProbeQueue::new(
      probe.clone(),
      Duration::from_millis(50)
    );

    let results = queue
      .run(vec![
        job("a"),
        job("hang"),
        job("c")
      ])
      .await;

    let order: Vec<&str> = results
      .iter()
      .map(|r| r.url.as_str())
      .collect();
    assert_eq!(order, ["a", "hang", "c"]);
    assert_eq!(
      *probe.started.lock(),
      ["a", "hang", "c"]
    );
    assert_eq!(
      probe
        .max_in_flight
        .load(Ordering::SeqCst),
      1
    );

    assert!(results[0].outcome.is_ok());
    let err = results[1]
      .outcome
      .as_ref()
      .expect_err("hung request is cut off");
    assert!(matches!(
      err,
      ProbeError::Timeout
    ));
    assert_eq!(
      err.classify(),
      TrackError::Unreachable
    );
    assert_eq!(
      results[2]
        .outcome
        .as_ref()
        .ok()
        .and_then(|r| r.body.as_deref()),
      Some("c")
    );
  }

  #[tokio::test]
  async fn empty_batch_spawns_nothing() {
    let probe =
      Arc::new(CountingProbe::default());
    let queue = ProbeQueue::new(
      probe.clone(),
      Duration::from_millis(50)
    );
    assert!(queue.run(vec![]).await.is_empty());
    assert!(probe.started.lock().is_empty());
  }
}
