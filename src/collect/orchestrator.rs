use super::fetch::Fetcher;
use crate::model::{CollectionBatch, Owner, RepoStatus, Window};
use crate::store::Store;
use futures_util::future::join_all;
use ohno::app_err;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

const LOG_TARGET: &str = "orchestrator";

/// Bounded number of repositories fetched concurrently.
const DEFAULT_MAX_CONCURRENT: usize = 5;

/// Called after each repository reaches a terminal state, with the repository
/// name, the count of repositories finished so far (including previously
/// completed ones), and the total. Calls are serialized, so observed counts
/// never decrease; no temporal ordering across repositories is implied.
pub type ProgressFn = Arc<dyn Fn(&str, usize, usize) + Send + Sync>;

/// One repository that could not be collected in this run.
#[derive(Debug, Clone)]
pub struct RepoFailure {
    pub repo: String,
    pub error: String,
}

/// Result of driving a batch to quiescence.
#[derive(Debug)]
pub struct CollectOutcome {
    pub batch: CollectionBatch,
    /// Events written to the store in this run.
    pub events: usize,
    /// Repositories collected to completion in this run.
    pub completed: usize,
    /// Repositories already completed by an earlier run and not re-fetched.
    pub skipped: usize,
    pub failures: Vec<RepoFailure>,
}

struct RepoResult {
    repo: String,
    events: usize,
    error: Option<String>,
}

/// Drives a bounded pool of per-repository workers against the store.
///
/// Collection is resumable: repositories already completed for the same batch
/// are skipped, and a repository failure is recorded without aborting its
/// siblings. Storage errors abort the run; losing the sink means nothing
/// further can make progress.
pub struct Orchestrator {
    fetcher: Fetcher,
    max_concurrent: usize,
}

impl Orchestrator {
    #[must_use]
    pub fn new(fetcher: Fetcher) -> Self {
        Self {
            fetcher,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
        }
    }

    #[must_use]
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    /// Collect `repos` for the owner and window into `store`.
    ///
    /// Creates or resumes the batch identified by (owner kind, owner, window).
    /// Every repository not yet completed is recorded as `pending` before the
    /// workers start. The returned batch is left `in_progress`; the caller
    /// decides its terminal status after inspecting the outcome.
    pub async fn collect(
        &self,
        store: &Arc<Store>,
        owner: &Owner,
        window: Window,
        repos: Vec<String>,
        cancel: &CancellationToken,
        progress: Option<ProgressFn>,
    ) -> crate::Result<CollectOutcome> {
        let batch = store.create_or_get_batch(owner, window)?;
        let already_done: HashSet<String> = store.completed_repositories(&batch.id)?.into_iter().collect();

        let total = repos.len();
        let pending: Vec<String> = repos.into_iter().filter(|r| !already_done.contains(r)).collect();
        let skipped = total - pending.len();

        if skipped > 0 {
            log::debug!(target: LOG_TARGET, "batch {}: resuming, {skipped} of {total} repositories already complete", batch.id);
        }

        for repo in &pending {
            store.update_repository_status(&batch.id, owner, repo, RepoStatus::Pending, 0, None)?;
        }

        // The increment and the callback happen under one lock so the counts
        // a caller observes never decrease.
        let done_count = Arc::new(Mutex::new(skipped));

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let tasks: Vec<_> = pending
            .into_iter()
            .map(|repo| {
                let fetcher = self.fetcher.clone();
                let store = Arc::clone(store);
                let semaphore = Arc::clone(&semaphore);
                let done_count = Arc::clone(&done_count);
                let progress = progress.clone();
                let cancel = cancel.clone();
                let owner = owner.clone();
                let batch_id = batch.id.clone();

                tokio::spawn(async move {
                    let _permit = semaphore.acquire_owned().await.map_err(|_| app_err!("worker pool closed"))?;

                    let result = collect_one(&fetcher, &store, &batch_id, &owner, &repo, window, &cancel).await;

                    if result.is_ok() {
                        let mut done = done_count.lock().expect("lock not poisoned");
                        *done += 1;
                        if let Some(progress) = &progress {
                            progress(&repo, *done, total);
                        }
                    }

                    result
                })
            })
            .collect();

        let mut events = 0;
        let mut completed = 0;
        let mut failures = Vec::new();

        for joined in join_all(tasks).await {
            let result = joined.map_err(|e| app_err!("collection worker panicked: {e}"))??;
            match result.error {
                None => {
                    events += result.events;
                    completed += 1;
                }
                Some(error) => failures.push(RepoFailure { repo: result.repo, error }),
            }
        }

        Ok(CollectOutcome {
            batch,
            events,
            completed,
            skipped,
            failures,
        })
    }
}

/// Collect one repository and record its terminal status.
///
/// Fetch failures are captured in the result; only storage errors surface as
/// `Err`.
async fn collect_one(
    fetcher: &Fetcher,
    store: &Store,
    batch_id: &str,
    owner: &Owner,
    repo: &str,
    window: Window,
    cancel: &CancellationToken,
) -> crate::Result<RepoResult> {
    store.update_repository_status(batch_id, owner, repo, RepoStatus::Processing, 0, None)?;

    match fetcher.fetch_repository(owner, repo, window, cancel).await {
        Ok(fetched) => {
            store.upsert_events(&fetched.events)?;
            store.update_repository_status(batch_id, owner, repo, RepoStatus::Completed, fetched.events.len() as i64, None)?;
            Ok(RepoResult {
                repo: repo.to_string(),
                events: fetched.events.len(),
                error: None,
            })
        }
        Err(e) => {
            let message = e.to_string();
            if cancel.is_cancelled() {
                // Interrupted rather than broken. The row stays at
                // `processing` and the next run for this window retries it.
                log::debug!(target: LOG_TARGET, "{owner}/{repo}: collection interrupted: {message}");
            } else {
                log::warn!(target: LOG_TARGET, "{owner}/{repo}: collection failed: {message}");
                store.update_repository_status(batch_id, owner, repo, RepoStatus::Failed, 0, Some(&message))?;
            }
            Ok(RepoResult {
                repo: repo.to_string(),
                events: 0,
                error: Some(message),
            })
        }
    }
}
