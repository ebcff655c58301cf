pub mod accounts;
pub mod cli;
pub mod commands;
pub mod config;
pub mod controller;
pub mod datetime;
pub mod filter;
pub mod kvstore;
pub mod render;
pub mod stats;
pub mod task;
pub mod transfer;

use std::ffi::OsString;

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
  let (args, positional_rc) =
    cli::split_rc_overrides(raw_args);
  let cli = cli::GlobalCli::parse_from(
    args
  );

  cli::init_tracing(
    cli.verbose,
    cli.quiet
  )?;

  info!(
    verbose = cli.verbose,
    quiet = cli.quiet,
    "starting taskflow CLI"
  );
  debug!(
    ?positional_rc,
    "positional rc overrides"
  );

  let mut cfg = config::Config::load(
    cli.config.as_deref()
  )?;
  cfg.apply_overrides(
    positional_rc
      .into_iter()
      .chain(cli.rc_overrides)
      .map(|one| (one.key, one.value))
  )?;

  let data_dir =
    config::resolve_data_dir(
      &cfg,
      cli.data.as_deref()
    )
    .context(
      "failed to resolve data \
       directory"
    )?;

  let store =
    kvstore::FileStore::open(&data_dir)
      .with_context(|| {
        format!(
          "failed to open store at {}",
          data_dir.display()
        )
      })?;

  let mut controller =
    controller::TaskController::new(
      store
    )
    .with_view(cfg.default_view);

  let mut renderer =
    render::Renderer::new(&cfg);
  let inv =
    cli::Invocation::parse(cli.rest)?;
  let mut confirm =
    commands::PromptConfirm {
      assume_yes: cli.yes
        || !cfg.confirmation
    };

  commands::dispatch(
    &mut controller,
    &cfg,
    &mut renderer,
    inv,
    &mut confirm
  )?;

  info!("done");
  Ok(())
}
