//! Status command handler: summarize the ledger without touching the network.

use std::path::Path;

use anyhow::{Context, Result};
use citefetch_core::ResultLedger;

use crate::cli::{ApiArgs, StatusArgs};
use crate::commands::resolve_config;

pub fn run_status_command(args: &StatusArgs, config_path: Option<&Path>) -> Result<()> {
    let mut config = resolve_config(config_path, &ApiArgs::default())?;
    if let Some(path) = &args.ledger {
        config.ledger_path.clone_from(path);
    }

    let store = ResultLedger::new(&config.ledger_path);
    let ledger = store
        .load()
        .with_context(|| format!("loading ledger {}", store.path().display()))?;

    if ledger.is_empty() {
        println!("Ledger {} is empty", store.path().display());
        return Ok(());
    }

    let failed = ledger.failed_rows().count();
    let succeeded = ledger.successful_rows().count();
    println!(
        "Ledger {}: {} rows, {succeeded} succeeded, {failed} failed",
        store.path().display(),
        ledger.len()
    );
    print!("{}", ledger.histogram());

    let missing = ledger.missing_artifacts();
    if !missing.is_empty() {
        println!(
            "{} successful rows point at missing fulltext files",
            missing.len()
        );
    }
    Ok(())
}
