pub mod calendar;
pub mod cli;
pub mod commands;
pub mod config;
pub mod datastore;
pub mod datetime;
pub mod images;
pub mod lifecycle;
pub mod model;
pub mod render;
pub mod schema;
pub mod sort;
pub mod store;
pub mod tracking;
pub mod transfer;

use std::ffi::OsString;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{
  debug,
  info
};

#[tracing::instrument(skip_all)]
pub fn run(
  raw_args: Vec<OsString>
) -> anyhow::Result<()> {
  let pre =
    cli::preprocess_args(&raw_args)?;
  let cli = cli::GlobalCli::parse_from(
    pre.cleaned_args
  );

  cli::init_tracing(
    cli.verbose,
    cli.quiet
  )?;

  info!(
    verbose = cli.verbose,
    quiet = cli.quiet,
    "starting encore CLI"
  );
  debug!(?pre.rc_overrides, "preprocessed rc overrides");

  let mut cfg = config::Config::load(
    cli.encorerc.as_deref()
  )?;
  cfg.apply_overrides(
    pre.rc_overrides.into_iter().chain(
      cli
        .rc_overrides
        .into_iter()
        .map(|kv| (kv.key, kv.value))
    )
  );

  let data_dir =
    config::resolve_data_dir(
      &cfg,
      cli.data.as_deref()
    )
    .context(
      "failed to resolve data \
       directory"
    )?;

  let kv = datastore::DataStore::open(
    &data_dir,
    cfg.get_u64("storage.quota_bytes")
  )
  .with_context(|| {
    format!(
      "failed to open datastore at {}",
      data_dir.display()
    )
  })?;
  let store = Arc::new(
    store::AppStore::init(Arc::new(kv))
  );

  let mut renderer =
    render::Renderer::new(&cfg)?;
  let command =
    cli.command.unwrap_or_else(|| {
      cli::Command::from_default_name(
        &cfg
          .get("default.command")
          .unwrap_or_default()
      )
    });

  let mut session = commands::Session {
    store,
    cfg: &cfg,
    renderer: &mut renderer,
    clock: Arc::new(datetime::SystemClock)
  };
  commands::dispatch(
    &mut session,
    command
  )?;

  info!("done");
  Ok(())
}
