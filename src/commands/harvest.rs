//! Harvest command handler: crawl citing works, fetch fulltext, update the ledger.

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use citefetch_core::Harvester;
use tracing::info;

use crate::cli::HarvestArgs;
use crate::commands::retry::run_retry_pass;
use crate::commands::{apply_fetch_args, require_api_key, resolve_config};
use crate::progress;

pub async fn run_harvest_command(
    args: &HarvestArgs,
    config_path: Option<&Path>,
    show_progress: bool,
) -> Result<()> {
    let mut config = resolve_config(config_path, &args.api)?;
    apply_fetch_args(&mut config, &args.fetch);
    if let Some(path) = &args.seeds {
        config.seeds_path.clone_from(path);
    }
    if let Some(min) = args.min_citations {
        config.min_citations = min;
    }
    if let Some(concurrency) = args.concurrency {
        config.concurrency = usize::from(concurrency);
    }
    if let Some(ms) = args.page_delay {
        config.page_delay = Duration::from_millis(ms);
    }
    require_api_key(&config)?;

    let harvester = Harvester::new(config)?;
    harvest_new_citers(&harvester, show_progress).await?;

    if args.no_retry {
        return Ok(());
    }
    run_retry_pass(&harvester, show_progress).await
}

/// Crawl, fetch and record citing works of the seeds above the threshold.
async fn harvest_new_citers(harvester: &Harvester, show_progress: bool) -> Result<()> {
    let (loaded, seeds) = harvester.load_seeds()?;
    if seeds.is_empty() {
        println!(
            "No seed papers with at least {} citations among {loaded} in {}",
            harvester.config().min_citations,
            harvester.config().seeds_path.display()
        );
        return Ok(());
    }

    let spinner = progress::spinner(
        show_progress,
        format!("Crawling citing works for {} seed papers...", seeds.len()),
    );
    let tasks = harvester.crawl(&seeds).await;
    spinner.finish_and_clear();
    info!(seeds = seeds.len(), tasks = tasks.len(), "crawl finished");

    let (bar, hook) = progress::fetch_progress(show_progress, tasks.len(), "fetch");
    let report = harvester.fetch(tasks, hook).await;
    bar.finish_and_clear();
    let report = report?;
    let ledger = harvester.record(&report)?;

    println!(
        "Fetched {} citing works: {} downloaded, {} cached, {} failed",
        report.outcomes.len(),
        report.stats.downloaded(),
        report.stats.cached(),
        report.stats.failed()
    );
    print!("{}", report.histogram());
    println!(
        "Ledger {} now has {} rows",
        harvester.config().ledger_path.display(),
        ledger.len()
    );
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use clap::Parser;
    use tempfile::TempDir;

    use super::*;
    use crate::cli::{Cli, Command};

    #[tokio::test]
    async fn test_harvest_with_empty_seed_table_makes_no_requests() {
        let dir = TempDir::new().unwrap();
        let seeds = dir.path().join("seeds.csv");
        std::fs::write(
            &seeds,
            "eid,doi,title,publication_year,citedby_count\nE1,,Quiet paper,2020,2\n",
        )
        .unwrap();
        let config = dir.path().join("config.toml");
        std::fs::write(&config, "").unwrap();
        let ledger = dir.path().join("ledger.csv");

        let cli = Cli::try_parse_from([
            "citefetch",
            "harvest",
            "--api-key",
            "k",
            "--search-url",
            "http://127.0.0.1:9/search",
            "--seeds",
            seeds.to_str().unwrap(),
            "--ledger",
            ledger.to_str().unwrap(),
        ])
        .unwrap();
        let Command::Harvest(args) = cli.command else {
            panic!("expected harvest");
        };

        run_harvest_command(&args, Some(&config), false).await.unwrap();
        assert!(!ledger.exists());
    }

    #[tokio::test]
    async fn test_harvest_also_retries_failures_from_earlier_runs() {
        use citefetch_core::{DownloadStatus, ResultLedger};
        use serde_json::json;
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        if std::net::TcpListener::bind("127.0.0.1:0").is_err() {
            eprintln!("cannot bind a localhost socket; skipping");
            return;
        }
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "search-results": {
                    "opensearch:totalResults": "1",
                    "entry": [{"eid": "C2", "dc:title": "New", "prism:doi": "10.1/new"}],
                }
            })))
            .mount(&server)
            .await;
        for doi in ["10.1/old", "10.1/new"] {
            Mock::given(method("GET"))
                .and(path(format!("/doi/{doi}")))
                .respond_with(ResponseTemplate::new(200).set_body_string("<doc/>"))
                .expect(1)
                .mount(&server)
                .await;
        }

        let dir = TempDir::new().unwrap();
        let seeds = dir.path().join("seeds.csv");
        std::fs::write(
            &seeds,
            "eid,doi,title,publication_year,citedby_count\nE1,,Data paper,2020,30\n",
        )
        .unwrap();
        let ledger = dir.path().join("ledger.csv");
        std::fs::write(
            &ledger,
            "citing_paper_eid,citing_paper_doi,citing_paper_title,citing_paper_year,cited_data_paper_title,fulltext_xml_path,download_status\nC1,10.1/old,Old,2019,Data paper,,failed (retries exhausted)\n",
        )
        .unwrap();
        let config = dir.path().join("config.toml");
        std::fs::write(&config, "").unwrap();
        let search_url = format!("{}/search", server.uri());
        let fulltext_url = format!("{}/doi", server.uri());

        let cli = Cli::try_parse_from([
            "citefetch",
            "harvest",
            "--api-key",
            "k",
            "--search-url",
            search_url.as_str(),
            "--fulltext-url",
            fulltext_url.as_str(),
            "--page-delay",
            "0",
            "--cache-dir",
            dir.path().join("cache").to_str().unwrap(),
            "--seeds",
            seeds.to_str().unwrap(),
            "--ledger",
            ledger.to_str().unwrap(),
        ])
        .unwrap();
        let Command::Harvest(args) = cli.command else {
            panic!("expected harvest");
        };

        run_harvest_command(&args, Some(&config), false).await.unwrap();

        let rows = ResultLedger::new(&ledger).load().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(
            rows.get("10.1/old").unwrap().download_status,
            DownloadStatus::Downloaded { attempt: 1 }
        );
        assert!(rows.get("10.1/new").unwrap().is_success());
    }
}
