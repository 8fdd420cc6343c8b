//! End-to-end tests for the collection pipeline against a mock API server.

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use core::time::Duration;
use gh_metrics::aggregate::Aggregator;
use gh_metrics::collect::{Client, Fetcher, Orchestrator, RateLimiter};
use gh_metrics::model::{BatchStatus, Granularity, Owner, RepoStatus, Scope, Window};
use gh_metrics::store::Store;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn window() -> Window {
    Window::new(
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2024, 3, 31, 23, 59, 59).unwrap(),
    )
}

fn day(d: u32, h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, d, h, 0, 0).unwrap()
}

const QUOTA_REMAINING: &str = "4321";
const QUOTA_RESET: &str = "4102444799";

fn with_quota(template: ResponseTemplate) -> ResponseTemplate {
    template
        .insert_header("x-ratelimit-remaining", QUOTA_REMAINING)
        .insert_header("x-ratelimit-reset", QUOTA_RESET)
}

fn ok_json(body: Value) -> ResponseTemplate {
    with_quota(ResponseTemplate::new(200).set_body_json(body))
}

/// A fetcher with a rate limiter loose enough not to slow the tests down.
fn fetcher_for(server: &MockServer) -> Fetcher {
    let client = Client::new("test-token", server.uri()).unwrap();
    let limiter = RateLimiter::with_limits(1_000_000, ChronoDuration::hours(1), 0, Duration::ZERO);
    Fetcher::new(client, Arc::new(limiter))
}

fn commit_item(sha: &str, actor: &str, at: DateTime<Utc>) -> Value {
    json!({
        "sha": sha,
        "commit": {"message": "a change", "author": {"name": actor, "date": at.to_rfc3339()}},
        "author": {"login": actor}
    })
}

async fn mount_commit_detail(server: &MockServer, repo: &str, sha: &str, additions: i64, deletions: i64) {
    Mock::given(method("GET"))
        .and(path(format!("/repos/acme/{repo}/commits/{sha}")))
        .respond_with(ok_json(json!({
            "stats": {"additions": additions, "deletions": deletions},
            "files": [{}, {}]
        })))
        .mount(server)
        .await;
}

/// Mount a repository whose March activity is three commits and two
/// deployments on the 5th plus one pull request on the 10th.
async fn mount_busy_repo(server: &MockServer, repo: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/repos/acme/{repo}/commits")))
        .respond_with(ok_json(json!([
            commit_item("a1", "alice", day(5, 9)),
            commit_item("a2", "alice", day(5, 10)),
            commit_item("a3", "bob", day(5, 11)),
        ])))
        .mount(server)
        .await;

    for sha in ["a1", "a2", "a3"] {
        mount_commit_detail(server, repo, sha, 10, 5).await;
    }

    // Newest first; the January PR falls outside the window and also marks
    // the page where pagination can stop.
    Mock::given(method("GET"))
        .and(path(format!("/repos/acme/{repo}/pulls")))
        .respond_with(ok_json(json!([
            {
                "number": 7, "state": "open", "title": "a change",
                "user": {"login": "bob"},
                "created_at": day(10, 9).to_rfc3339(), "merged_at": null
            },
            {
                "number": 3, "state": "closed", "title": "old",
                "user": {"login": "alice"},
                "created_at": "2024-01-15T09:00:00Z", "merged_at": "2024-01-16T09:00:00Z"
            }
        ])))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("/repos/acme/{repo}/deployments")))
        .respond_with(ok_json(json!([
            {"id": 90, "environment": "production", "created_at": day(5, 12).to_rfc3339(), "creator": {"login": "bob"}},
            {"id": 91, "environment": "production", "created_at": day(5, 13).to_rfc3339(), "creator": {"login": "bob"}}
        ])))
        .mount(server)
        .await;

    for id in [90, 91] {
        Mock::given(method("GET"))
            .and(path(format!("/repos/acme/{repo}/deployments/{id}/statuses")))
            .respond_with(ok_json(json!([{"state": "success"}])))
            .mount(server)
            .await;
    }
}

/// Mount a repository with no activity: empty commit log (409), no pulls,
/// deployments disabled (404).
async fn mount_quiet_repo(server: &MockServer, repo: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/repos/acme/{repo}/commits")))
        .respond_with(with_quota(ResponseTemplate::new(409)))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("/repos/acme/{repo}/pulls")))
        .respond_with(ok_json(json!([])))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("/repos/acme/{repo}/deployments")))
        .respond_with(with_quota(ResponseTemplate::new(404)))
        .mount(server)
        .await;
}

#[tokio::test]
async fn collects_and_aggregates_a_full_window() {
    let server = MockServer::start().await;
    mount_busy_repo(&server, "widgets").await;
    mount_quiet_repo(&server, "gears").await;

    let store = Arc::new(Store::open_in_memory().unwrap());
    let fetcher = fetcher_for(&server);
    let cancel = CancellationToken::new();

    let outcome = Orchestrator::new(fetcher)
        .collect(&store, &Owner::org("acme"), window(), vec!["widgets".into(), "gears".into()], &cancel, None)
        .await
        .unwrap();

    assert_eq!(outcome.completed, 2);
    assert_eq!(outcome.skipped, 0);
    assert!(outcome.failures.is_empty());
    assert_eq!(outcome.events, 6);

    let agg = Aggregator::new(&store);
    let metrics = agg.owner_metrics(&Owner::org("acme"), window()).unwrap();
    assert_eq!(metrics.totals.commits, 3);
    assert_eq!(metrics.totals.pull_requests, 1);
    assert_eq!(metrics.totals.merged_pull_requests, 0);
    assert_eq!(metrics.totals.deploys, 2);
    assert_eq!(metrics.totals.additions, 30);
    assert_eq!(metrics.totals.deletions, 15);
    assert_eq!(metrics.active_repos, 1);

    // Gap-filled daily series across the whole month.
    let scope = Scope::Owner { owner: "acme".to_string() };
    let series = agg.time_series(&scope, window(), Granularity::Day).unwrap();
    assert_eq!(series.points.len(), 31);
    assert_eq!(series.points[4].commits, 3);
    assert_eq!(series.points[4].deploys, 2);
    assert_eq!(series.points[9].pull_requests, 1);
    assert_eq!(series.points[0].commits, 0);
    assert_eq!(series.points[30].commits, 0);
}

#[tokio::test]
async fn out_of_window_pull_requests_are_excluded() {
    let server = MockServer::start().await;
    mount_busy_repo(&server, "widgets").await;

    let store = Arc::new(Store::open_in_memory().unwrap());
    let cancel = CancellationToken::new();

    let _ = Orchestrator::new(fetcher_for(&server))
        .collect(&store, &Owner::org("acme"), window(), vec!["widgets".into()], &cancel, None)
        .await
        .unwrap();

    // PR #3 from January must not appear even though the API returned it.
    let scope = Scope::Owner { owner: "acme".to_string() };
    let totals = store.totals(&scope, window()).unwrap();
    assert_eq!(totals.pull_requests, 1);

    let wide = Window::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(), window().end);
    let totals = store.totals(&scope, wide).unwrap();
    assert_eq!(totals.pull_requests, 1);
}

#[tokio::test]
async fn failed_repository_does_not_abort_its_siblings() {
    let server = MockServer::start().await;
    mount_busy_repo(&server, "widgets").await;
    mount_quiet_repo(&server, "gears").await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/broken/commits"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let store = Arc::new(Store::open_in_memory().unwrap());
    let cancel = CancellationToken::new();
    let owner = Owner::org("acme");
    let repos: Vec<String> = vec!["widgets".into(), "gears".into(), "broken".into()];

    let outcome = Orchestrator::new(fetcher_for(&server))
        .collect(&store, &owner, window(), repos, &cancel, None)
        .await
        .unwrap();

    assert_eq!(outcome.completed, 2);
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].repo, "broken");
    assert_eq!(outcome.events, 6);

    let rows = store.batch_repositories(&outcome.batch.id).unwrap();
    let broken = rows.iter().find(|r| r.repo == "broken").unwrap();
    assert_eq!(broken.status, RepoStatus::Failed);
    assert!(broken.error.is_some());
}

#[tokio::test]
async fn resumed_batch_skips_completed_repositories_and_stays_stable() {
    let server = MockServer::start().await;
    mount_busy_repo(&server, "widgets").await;
    mount_quiet_repo(&server, "gears").await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/flaky/commits"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(Store::open(&dir.path().join("metrics.db")).unwrap());
    let cancel = CancellationToken::new();
    let owner = Owner::org("acme");
    let repos: Vec<String> = vec!["widgets".into(), "gears".into(), "flaky".into()];

    let first = Orchestrator::new(fetcher_for(&server))
        .collect(&store, &owner, window(), repos.clone(), &cancel, None)
        .await
        .unwrap();
    assert_eq!(first.completed, 2);
    assert_eq!(first.failures.len(), 1);
    store.update_batch_status(&first.batch.id, BatchStatus::Failed).unwrap();

    // Second run against a healed upstream. Only the failed repository may be
    // re-fetched.
    server.reset().await;
    mount_busy_repo(&server, "flaky").await;

    let second = Orchestrator::new(fetcher_for(&server))
        .collect(&store, &owner, window(), repos, &cancel, None)
        .await
        .unwrap();

    assert_eq!(second.batch.id, first.batch.id);
    assert_eq!(second.skipped, 2);
    assert_eq!(second.completed, 1);
    assert!(second.failures.is_empty());

    let requests = server.received_requests().await.unwrap();
    assert!(requests.iter().all(|r| r.url.path().contains("/repos/acme/flaky/")));

    // Deterministic ids keep the event set stable across runs.
    let scope = Scope::Owner { owner: "acme".to_string() };
    let totals = store.totals(&scope, window()).unwrap();
    assert_eq!(totals.commits, 6);
    assert_eq!(totals.pull_requests, 2);
    assert_eq!(totals.deploys, 4);
}

#[tokio::test]
async fn quiet_repository_completes_with_zero_events() {
    let server = MockServer::start().await;
    mount_quiet_repo(&server, "gears").await;

    let store = Arc::new(Store::open_in_memory().unwrap());
    let cancel = CancellationToken::new();

    let outcome = Orchestrator::new(fetcher_for(&server))
        .collect(&store, &Owner::org("acme"), window(), vec!["gears".into()], &cancel, None)
        .await
        .unwrap();

    assert_eq!(outcome.completed, 1);
    assert_eq!(outcome.events, 0);
    assert!(outcome.failures.is_empty());

    let rows = store.batch_repositories(&outcome.batch.id).unwrap();
    assert_eq!(rows[0].status, RepoStatus::Completed);
    assert_eq!(rows[0].events_count, 0);
}

#[tokio::test]
async fn quota_headers_feed_the_limiter() {
    let server = MockServer::start().await;
    mount_quiet_repo(&server, "gears").await;

    let fetcher = fetcher_for(&server);
    let cancel = CancellationToken::new();

    let _ = fetcher.fetch_repository(&Owner::org("acme"), "gears", window(), &cancel).await.unwrap();

    let snapshot = fetcher.limiter().snapshot().await;
    assert_eq!(snapshot.remaining, 4321);
    assert_eq!(snapshot.reset_at.timestamp(), 4_102_444_799);
}

#[tokio::test]
async fn progress_reports_are_monotonic_and_complete() {
    let server = MockServer::start().await;
    let repos: Vec<String> = (0..12).map(|i| format!("repo-{i:02}")).collect();
    for repo in &repos {
        mount_quiet_repo(&server, repo).await;
    }

    let store = Arc::new(Store::open_in_memory().unwrap());
    let cancel = CancellationToken::new();
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));

    let progress = {
        let seen = Arc::clone(&seen);
        Arc::new(move |repo: &str, done: usize, total: usize| {
            seen.lock().unwrap().push((repo.to_string(), done, total));
        }) as gh_metrics::collect::ProgressFn
    };

    let _ = Orchestrator::new(fetcher_for(&server))
        .collect(&store, &Owner::org("acme"), window(), repos.clone(), &cancel, Some(progress))
        .await
        .unwrap();

    // With concurrent workers racing to report, the observed counts must
    // still be exactly 1..=total in order.
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), repos.len());
    assert!(seen.iter().all(|(_, _, total)| *total == repos.len()));
    let counts: Vec<usize> = seen.iter().map(|(_, done, _)| *done).collect();
    assert_eq!(counts, (1..=repos.len()).collect::<Vec<_>>());

    let mut reported: Vec<&str> = seen.iter().map(|(repo, _, _)| repo.as_str()).collect();
    reported.sort_unstable();
    let expected: Vec<&str> = repos.iter().map(String::as_str).collect();
    assert_eq!(reported, expected);
}

#[tokio::test]
async fn cancelled_run_leaves_repositories_resumable() {
    let server = MockServer::start().await;
    mount_quiet_repo(&server, "gears").await;

    let store = Arc::new(Store::open_in_memory().unwrap());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome = Orchestrator::new(fetcher_for(&server))
        .collect(&store, &Owner::org("acme"), window(), vec!["gears".into()], &cancel, None)
        .await
        .unwrap();

    assert_eq!(outcome.completed, 0);
    assert_eq!(outcome.failures.len(), 1);

    // Interrupted, not failed: the row stays at processing so the next run
    // for the same window retries it.
    let rows = store.batch_repositories(&outcome.batch.id).unwrap();
    assert_eq!(rows[0].status, RepoStatus::Processing);
    assert!(rows[0].error.is_none());
    assert!(rows[0].completed_at.is_none());
}
