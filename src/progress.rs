//! Progress UI for crawl and fetch stages.

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use citefetch_core::FetchOutcome;
use citefetch_core::download::ProgressHook;
use indicatif::{ProgressBar, ProgressStyle};

/// Spinner with a fixed message; hidden when `enabled` is false.
pub(crate) fn spinner(enabled: bool, message: impl Into<Cow<'static, str>>) -> ProgressBar {
    if !enabled {
        return ProgressBar::hidden();
    }
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message(message);
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

/// Bar sized to `total` plus an engine hook that advances it once per finished task.
pub(crate) fn fetch_progress(
    enabled: bool,
    total: usize,
    prefix: &'static str,
) -> (ProgressBar, Option<ProgressHook>) {
    if !enabled {
        return (ProgressBar::hidden(), None);
    }
    let bar = ProgressBar::new(u64::try_from(total).unwrap_or(u64::MAX));
    bar.set_style(
        ProgressStyle::with_template("{prefix} [{bar:30}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    bar.set_prefix(prefix);
    bar.enable_steady_tick(Duration::from_millis(100));

    let handle = bar.clone();
    let hook: ProgressHook = Arc::new(move |outcome: &FetchOutcome| {
        handle.inc(1);
        handle.set_message(outcome.status.to_string());
    });
    (bar, Some(hook))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use citefetch_core::{CitingTask, DownloadStatus};

    use super::*;

    #[test]
    fn test_disabled_progress_is_hidden_without_hook() {
        let (bar, hook) = fetch_progress(false, 5, "fetch");
        assert!(bar.is_hidden());
        assert!(hook.is_none());
        assert!(spinner(false, "crawl").is_hidden());
    }

    #[test]
    fn test_hook_advances_bar() {
        let (bar, hook) = fetch_progress(true, 2, "fetch");
        let hook = hook.unwrap();
        let outcome = FetchOutcome {
            task: CitingTask::from_doi("10.1/a"),
            fulltext_path: None,
            status: DownloadStatus::RetriesExhausted,
        };
        hook(&outcome);
        assert_eq!(bar.position(), 1);
        assert_eq!(bar.length(), Some(2));
        bar.finish_and_clear();
    }
}
