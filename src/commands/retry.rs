//! Retry command handler: re-fetch failed ledger rows.

use std::path::Path;

use anyhow::{Context, Result};
use citefetch_core::Harvester;

use crate::cli::RetryArgs;
use crate::commands::{apply_fetch_args, require_api_key, resolve_config};
use crate::progress;

pub async fn run_retry_command(
    args: &RetryArgs,
    config_path: Option<&Path>,
    show_progress: bool,
) -> Result<()> {
    let mut config = resolve_config(config_path, &args.api)?;
    apply_fetch_args(&mut config, &args.fetch);
    if let Some(concurrency) = args.concurrency {
        config.retry_concurrency = Some(usize::from(concurrency));
    }
    require_api_key(&config)?;

    let harvester = Harvester::new(config)?;
    run_retry_pass(&harvester, show_progress).await
}

/// Runs one retry pass with a progress bar sized to the retryable rows.
pub(crate) async fn run_retry_pass(harvester: &Harvester, show_progress: bool) -> Result<()> {
    let ledger = harvester.ledger();
    let pending = ledger
        .load()
        .with_context(|| format!("loading ledger {}", ledger.path().display()))?
        .failed_rows()
        .filter(|row| row.citing_paper_doi.is_some())
        .count();

    let (bar, hook) = progress::fetch_progress(show_progress && pending > 0, pending, "retry");
    let summary = harvester.retry_failed(hook).await;
    bar.finish_and_clear();
    let summary = summary?;

    if summary.attempted == 0 {
        println!("No failed rows to retry in {}", ledger.path().display());
    } else {
        println!(
            "Retried {} failed rows: {} recovered, {} still failed",
            summary.attempted,
            summary.recovered,
            summary.attempted - summary.recovered
        );
        print!("{}", summary.histogram);
    }
    if summary.skipped_without_doi > 0 {
        println!(
            "Skipped {} failed rows without a DOI",
            summary.skipped_without_doi
        );
    }
    Ok(())
}
