//! The collect command: fetch activity for a window into the store.

use super::common::{CommonArgs, OwnerArgs, WindowArgs};
use crate::collect::{CollectOutcome, Orchestrator, ProgressFn};
use crate::model::{BatchStatus, OwnerKind};
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use ohno::app_err;
use owo_colors::OwoColorize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const LOG_TARGET: &str = "collect";

const PROGRESS_TEMPLATE: &str = "{prefix:>12.bold.cyan} [{bar:25}] {pos}/{len} {msg}";

#[derive(Args, Debug)]
pub struct CollectArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    #[command(flatten)]
    pub owner: OwnerArgs,

    #[command(flatten)]
    pub window: WindowArgs,

    /// Maximum repositories fetched concurrently
    #[arg(long, value_name = "N", default_value_t = 5)]
    pub concurrency: usize,
}

/// Run a collection batch to quiescence and report the outcome.
pub async fn process_collect(args: &CollectArgs) -> crate::Result<()> {
    args.common.init_logging();

    let owner = args.owner.owner()?;
    let window = args.window.resolve()?;
    let store = args.common.open_store()?;
    let fetcher = args.common.fetcher()?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        drop(tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        }));
    }

    eprintln!("Collecting activity for {} ({}) over {window}", owner.to_string().bold(), owner.kind);

    let repos = fetcher.list_repositories(&owner, &cancel).await?;
    store.upsert_repositories(&owner.name, &repos)?;
    log::debug!(target: LOG_TARGET, "{owner}: {} repositories", repos.len());

    // The member roster is advisory; a failure here should not stop the run.
    match owner.kind {
        OwnerKind::Organization => match fetcher.list_members(&owner.name, &cancel).await {
            Ok(members) => store.upsert_members(&owner.name, &members)?,
            Err(e) => eprintln!("{} unable to list members: {e:#}", "warning:".yellow().bold()),
        },
        OwnerKind::User => store.upsert_members(&owner.name, &[owner.name.clone()])?,
    }

    let bar = ProgressBar::new(repos.len() as u64);
    bar.set_style(
        ProgressStyle::default_bar()
            .template(PROGRESS_TEMPLATE)
            .map_err(|e| app_err!("could not create progress bar style: {e}"))?
            .progress_chars("=> "),
    );
    bar.set_prefix("Collecting");

    let progress: ProgressFn = {
        let bar = bar.clone();
        Arc::new(move |repo: &str, done, total| {
            bar.set_length(total as u64);
            bar.set_position(done as u64);
            bar.set_message(repo.to_string());
        })
    };

    let orchestrator = Orchestrator::new(fetcher).with_max_concurrent(args.concurrency);
    let outcome = orchestrator.collect(&store, &owner, window, repos, &cancel, Some(progress)).await;

    bar.finish_and_clear();

    // On a storage error the batch stays in_progress; the next run resumes it.
    let outcome = outcome?;

    let status = if cancel.is_cancelled() || !outcome.failures.is_empty() {
        BatchStatus::Failed
    } else {
        BatchStatus::Completed
    };
    store.update_batch_status(&outcome.batch.id, status)?;

    report(&outcome);

    if cancel.is_cancelled() {
        return Err(app_err!("collection cancelled; rerun to resume batch {}", outcome.batch.id));
    }

    Ok(())
}

fn report(outcome: &CollectOutcome) {
    for failure in &outcome.failures {
        eprintln!("{} {}: {}", "warning:".yellow().bold(), failure.repo, failure.error);
    }

    let mut summary = format!(
        "Stored {} events from {} repositories",
        outcome.events.to_string().bold(),
        outcome.completed.to_string().bold()
    );
    if outcome.skipped > 0 {
        summary.push_str(&format!(" ({} already complete)", outcome.skipped));
    }
    if !outcome.failures.is_empty() {
        summary.push_str(&format!(", {} failed", outcome.failures.len().to_string().red()));
    }
    println!("{summary}");
}
