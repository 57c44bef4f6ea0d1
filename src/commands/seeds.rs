//! Seeds command handler: discover seed data papers and write the seed table.

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use citefetch_core::Harvester;

use crate::cli::SeedsArgs;
use crate::commands::{require_api_key, resolve_config};
use crate::progress;

pub async fn run_seeds_command(
    args: &SeedsArgs,
    config_path: Option<&Path>,
    show_progress: bool,
) -> Result<()> {
    let mut config = resolve_config(config_path, &args.api)?;
    if let Some(query) = &args.query {
        config.seed_query.clone_from(query);
    }
    if let Some(path) = &args.seeds {
        config.seeds_path.clone_from(path);
    }
    if let Some(ms) = args.page_delay {
        config.page_delay = Duration::from_millis(ms);
    }
    require_api_key(&config)?;

    let harvester = Harvester::new(config)?;
    let spinner = progress::spinner(
        show_progress,
        format!("Discovering seeds for {}...", harvester.config().seed_query),
    );
    let seeds = harvester.discover_seeds().await;
    spinner.finish_and_clear();
    let seeds = seeds?;

    let min_citations = harvester.config().min_citations;
    let eligible = seeds
        .iter()
        .filter(|seed| seed.citedby_count >= min_citations)
        .count();
    println!(
        "Wrote {} seed papers to {} ({eligible} with at least {min_citations} citations)",
        seeds.len(),
        harvester.config().seeds_path.display()
    );
    Ok(())
}
