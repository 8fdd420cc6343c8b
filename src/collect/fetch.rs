use super::client::{ApiResult, Client};
use super::rate_limit::RateLimiter;
use crate::model::{EventKind, EventPayload, Owner, OwnerKind, RawEvent, Window, event_id};
use chrono::{DateTime, SecondsFormat, Utc};
use ohno::app_err;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const LOG_TARGET: &str = "fetch";

const PER_PAGE: u32 = 100;

#[derive(Debug, Deserialize)]
struct RepoSummary {
    name: String,
}

#[derive(Debug, Deserialize)]
struct Account {
    login: String,
}

#[derive(Debug, Deserialize)]
struct CommitListItem {
    sha: String,
    commit: CommitInfo,
    author: Option<Account>,
}

#[derive(Debug, Deserialize)]
struct CommitInfo {
    message: String,
    author: Option<CommitAuthor>,
}

#[derive(Debug, Deserialize)]
struct CommitAuthor {
    name: Option<String>,
    date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct CommitDetail {
    stats: Option<CommitStats>,
    #[serde(default)]
    files: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct CommitStats {
    additions: i64,
    deletions: i64,
}

#[derive(Debug, Deserialize)]
struct PullRequestItem {
    number: i64,
    state: String,
    title: String,
    user: Option<Account>,
    created_at: DateTime<Utc>,
    merged_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct DeploymentItem {
    id: i64,
    environment: String,
    created_at: DateTime<Utc>,
    creator: Option<Account>,
}

#[derive(Debug, Deserialize)]
struct DeploymentStatus {
    state: String,
}

/// One page of results plus the URL of the page after it, if any.
enum Page<T> {
    Data(Vec<T>, Option<String>),
    NotFound,
    Conflict,
}

/// Events collected for one repository, with per-kind counts for reporting.
#[derive(Debug, Default)]
pub struct RepoEvents {
    pub events: Vec<RawEvent>,
    pub commits: usize,
    pub pull_requests: usize,
    pub deploys: usize,
}

/// Turns upstream API pages into domain events.
///
/// Every call goes through the shared [`RateLimiter`] first, and every
/// response's quota headers are folded back into it.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
    limiter: Arc<RateLimiter>,
}

impl Fetcher {
    #[must_use]
    pub fn new(client: Client, limiter: Arc<RateLimiter>) -> Self {
        Self { client, limiter }
    }

    #[must_use]
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// One paced, classified API call. Parks and retries when the upstream
    /// reports quota exhaustion.
    async fn get_page<T: DeserializeOwned>(&self, url: &str, cancel: &CancellationToken) -> crate::Result<Page<T>> {
        loop {
            self.limiter.acquire(cancel).await?;

            match self.client.get(url).await {
                ApiResult::Success(resp, rate_limit) => {
                    if let Some(info) = rate_limit {
                        self.limiter.observe(info.remaining, info.reset_at).await;
                    }

                    let next = super::client::next_page_url(resp.headers());
                    let items: Vec<T> = resp.json().await?;
                    return Ok(Page::Data(items, next));
                }
                ApiResult::RateLimited(info) => {
                    log::debug!(
                        target: LOG_TARGET,
                        "quota exhausted upstream, retrying after {}",
                        info.reset_at
                    );
                    self.limiter.observe(0, info.reset_at).await;
                }
                ApiResult::NotFound(rate_limit) => {
                    if let Some(info) = rate_limit {
                        self.limiter.observe(info.remaining, info.reset_at).await;
                    }
                    return Ok(Page::NotFound);
                }
                ApiResult::Conflict(rate_limit) => {
                    if let Some(info) = rate_limit {
                        self.limiter.observe(info.remaining, info.reset_at).await;
                    }
                    return Ok(Page::Conflict);
                }
                ApiResult::Failed(e, rate_limit) => {
                    if let Some(info) = rate_limit {
                        self.limiter.observe(info.remaining, info.reset_at).await;
                    }
                    return Err(e);
                }
            }
        }
    }

    /// Collect every page of a listing endpoint.
    async fn get_all_pages<T: DeserializeOwned>(
        &self,
        first_url: String,
        cancel: &CancellationToken,
    ) -> crate::Result<Page<T>> {
        let mut all = Vec::new();
        let mut url = first_url;

        loop {
            match self.get_page::<T>(&url, cancel).await? {
                Page::Data(mut items, next) => {
                    all.append(&mut items);
                    match next {
                        Some(n) => url = n,
                        None => return Ok(Page::Data(all, None)),
                    }
                }
                Page::NotFound if all.is_empty() => return Ok(Page::NotFound),
                Page::Conflict if all.is_empty() => return Ok(Page::Conflict),
                Page::NotFound | Page::Conflict => return Ok(Page::Data(all, None)),
            }
        }
    }

    /// List the names of all repositories belonging to the owner.
    pub async fn list_repositories(&self, owner: &Owner, cancel: &CancellationToken) -> crate::Result<Vec<String>> {
        let path = match owner.kind {
            OwnerKind::Organization => format!("/orgs/{owner}/repos?type=all&per_page={PER_PAGE}"),
            OwnerKind::User => format!("/users/{owner}/repos?per_page={PER_PAGE}"),
        };

        match self.get_all_pages::<RepoSummary>(self.client.url(&path), cancel).await? {
            Page::Data(repos, _) => Ok(repos.into_iter().map(|r| r.name).collect()),
            Page::NotFound => Err(app_err!("{} '{owner}' not found", owner.kind)),
            Page::Conflict => Err(app_err!("unexpected conflict listing repositories for '{owner}'")),
        }
    }

    /// List the member logins of an organization.
    pub async fn list_members(&self, org: &str, cancel: &CancellationToken) -> crate::Result<Vec<String>> {
        let path = format!("/orgs/{org}/members?per_page={PER_PAGE}");

        match self.get_all_pages::<Account>(self.client.url(&path), cancel).await? {
            Page::Data(members, _) => Ok(members.into_iter().map(|m| m.login).collect()),
            Page::NotFound => Err(app_err!("organization '{org}' not found")),
            Page::Conflict => Err(app_err!("unexpected conflict listing members for '{org}'")),
        }
    }

    /// Collect commit events for one repository within the window.
    ///
    /// Each listed commit gets a follow-up detail call for line counts. A
    /// failed detail call degrades that commit to zero line stats rather than
    /// failing the repository. An empty repository (409 from the commit log)
    /// yields zero events.
    pub async fn fetch_commits(
        &self,
        owner: &Owner,
        repo: &str,
        window: Window,
        cancel: &CancellationToken,
    ) -> crate::Result<Vec<RawEvent>> {
        let since = window.start.to_rfc3339_opts(SecondsFormat::Secs, true);
        let until = window.end.to_rfc3339_opts(SecondsFormat::Secs, true);
        let path = format!("/repos/{owner}/{repo}/commits?since={since}&until={until}&per_page={PER_PAGE}");

        let items = match self.get_all_pages::<CommitListItem>(self.client.url(&path), cancel).await? {
            Page::Data(items, _) => items,
            Page::Conflict => {
                log::debug!(target: LOG_TARGET, "{owner}/{repo}: empty repository, no commits");
                return Ok(Vec::new());
            }
            Page::NotFound => return Err(app_err!("repository '{owner}/{repo}' not found")),
        };

        let mut events = Vec::with_capacity(items.len());
        for item in items {
            let occurred_at = item.commit.author.as_ref().and_then(|a| a.date).unwrap_or(window.start);

            let (additions, deletions, files_changed) = match self.fetch_commit_detail(owner, repo, &item.sha, cancel).await {
                Ok(detail) => detail,
                Err(e) => {
                    log::warn!(target: LOG_TARGET, "{owner}/{repo}: commit {} detail unavailable: {e}", item.sha);
                    (0, 0, 0)
                }
            };

            let actor = item
                .author
                .map(|a| a.login)
                .or_else(|| item.commit.author.and_then(|a| a.name))
                .unwrap_or_else(|| "unknown".to_string());

            events.push(RawEvent {
                id: event_id(&owner.name, repo, EventKind::Commit, &item.sha),
                kind: EventKind::Commit,
                owner: owner.name.clone(),
                owner_kind: owner.kind,
                repo: repo.to_string(),
                actor,
                occurred_at,
                payload: EventPayload::Commit {
                    sha: item.sha,
                    message: item.commit.message,
                    additions,
                    deletions,
                    files_changed,
                },
                recorded_at: Utc::now(),
            });
        }

        Ok(events)
    }

    async fn fetch_commit_detail(
        &self,
        owner: &Owner,
        repo: &str,
        sha: &str,
        cancel: &CancellationToken,
    ) -> crate::Result<(i64, i64, i64)> {
        let url = self.client.url(&format!("/repos/{owner}/{repo}/commits/{sha}"));

        self.limiter.acquire(cancel).await?;
        match self.client.get(&url).await {
            ApiResult::Success(resp, rate_limit) => {
                if let Some(info) = rate_limit {
                    self.limiter.observe(info.remaining, info.reset_at).await;
                }
                let detail: CommitDetail = resp.json().await?;
                let stats = detail.stats.unwrap_or(CommitStats {
                    additions: 0,
                    deletions: 0,
                });
                Ok((stats.additions, stats.deletions, detail.files.len() as i64))
            }
            ApiResult::RateLimited(info) => {
                self.limiter.observe(0, info.reset_at).await;
                Err(app_err!("rate limited fetching commit detail"))
            }
            ApiResult::NotFound(_) | ApiResult::Conflict(_) => Err(app_err!("commit '{sha}' not found")),
            ApiResult::Failed(e, _) => Err(e),
        }
    }

    /// Collect pull request events for one repository within the window.
    ///
    /// Pulls are listed newest-first by creation time, so pagination stops as
    /// soon as a page ends before the window starts.
    pub async fn fetch_pull_requests(
        &self,
        owner: &Owner,
        repo: &str,
        window: Window,
        cancel: &CancellationToken,
    ) -> crate::Result<Vec<RawEvent>> {
        let path = format!("/repos/{owner}/{repo}/pulls?state=all&sort=created&direction=desc&per_page={PER_PAGE}");
        let mut url = self.client.url(&path);
        let mut events = Vec::new();

        loop {
            let (items, next) = match self.get_page::<PullRequestItem>(&url, cancel).await? {
                Page::Data(items, next) => (items, next),
                Page::NotFound => return Err(app_err!("repository '{owner}/{repo}' not found")),
                Page::Conflict => return Ok(events),
            };

            let page_ends_before_window = items.last().is_some_and(|pr| pr.created_at < window.start);

            for pr in items {
                if !window.contains(pr.created_at) {
                    continue;
                }

                let state = if pr.merged_at.is_some() { "merged".to_string() } else { pr.state };

                events.push(RawEvent {
                    id: event_id(&owner.name, repo, EventKind::PullRequest, &pr.number.to_string()),
                    kind: EventKind::PullRequest,
                    owner: owner.name.clone(),
                    owner_kind: owner.kind,
                    repo: repo.to_string(),
                    actor: pr.user.map_or_else(|| "unknown".to_string(), |u| u.login),
                    occurred_at: pr.created_at,
                    payload: EventPayload::PullRequest {
                        number: pr.number,
                        state,
                        title: pr.title,
                        merged_at: pr.merged_at,
                    },
                    recorded_at: Utc::now(),
                });
            }

            if page_ends_before_window {
                break;
            }

            match next {
                Some(n) => url = n,
                None => break,
            }
        }

        Ok(events)
    }

    /// Collect deployment events for one repository within the window.
    ///
    /// A repository with deployments disabled (404) yields zero events. Each
    /// deployment gets a follow-up call for its latest status; a failed status
    /// call skips that deployment.
    pub async fn fetch_deployments(
        &self,
        owner: &Owner,
        repo: &str,
        window: Window,
        cancel: &CancellationToken,
    ) -> crate::Result<Vec<RawEvent>> {
        let path = format!("/repos/{owner}/{repo}/deployments?per_page={PER_PAGE}");

        let items = match self.get_all_pages::<DeploymentItem>(self.client.url(&path), cancel).await? {
            Page::Data(items, _) => items,
            Page::NotFound | Page::Conflict => {
                log::debug!(target: LOG_TARGET, "{owner}/{repo}: no deployments");
                return Ok(Vec::new());
            }
        };

        let mut events = Vec::new();
        for deployment in items {
            if !window.contains(deployment.created_at) {
                continue;
            }

            let status = match self.fetch_deployment_status(owner, repo, deployment.id, cancel).await {
                Ok(status) => status,
                Err(e) => {
                    log::warn!(
                        target: LOG_TARGET,
                        "{owner}/{repo}: deployment {} status unavailable, skipping: {e}",
                        deployment.id
                    );
                    continue;
                }
            };

            events.push(RawEvent {
                id: event_id(&owner.name, repo, EventKind::Deploy, &deployment.id.to_string()),
                kind: EventKind::Deploy,
                owner: owner.name.clone(),
                owner_kind: owner.kind,
                repo: repo.to_string(),
                actor: deployment.creator.map_or_else(|| "unknown".to_string(), |c| c.login),
                occurred_at: deployment.created_at,
                payload: EventPayload::Deploy {
                    environment: deployment.environment,
                    status,
                    run_id: deployment.id.to_string(),
                },
                recorded_at: Utc::now(),
            });
        }

        Ok(events)
    }

    async fn fetch_deployment_status(
        &self,
        owner: &Owner,
        repo: &str,
        deployment_id: i64,
        cancel: &CancellationToken,
    ) -> crate::Result<String> {
        let url = self
            .client
            .url(&format!("/repos/{owner}/{repo}/deployments/{deployment_id}/statuses?per_page=1"));

        self.limiter.acquire(cancel).await?;
        match self.client.get(&url).await {
            ApiResult::Success(resp, rate_limit) => {
                if let Some(info) = rate_limit {
                    self.limiter.observe(info.remaining, info.reset_at).await;
                }
                let statuses: Vec<DeploymentStatus> = resp.json().await?;
                Ok(statuses.into_iter().next().map_or_else(|| "unknown".to_string(), |s| s.state))
            }
            ApiResult::RateLimited(info) => {
                self.limiter.observe(0, info.reset_at).await;
                Err(app_err!("rate limited fetching deployment status"))
            }
            ApiResult::NotFound(_) | ApiResult::Conflict(_) => Ok("unknown".to_string()),
            ApiResult::Failed(e, _) => Err(e),
        }
    }

    /// Collect all event kinds for one repository.
    pub async fn fetch_repository(
        &self,
        owner: &Owner,
        repo: &str,
        window: Window,
        cancel: &CancellationToken,
    ) -> crate::Result<RepoEvents> {
        let commits = self.fetch_commits(owner, repo, window, cancel).await?;
        let pull_requests = self.fetch_pull_requests(owner, repo, window, cancel).await?;
        let deploys = self.fetch_deployments(owner, repo, window, cancel).await?;

        let mut out = RepoEvents {
            commits: commits.len(),
            pull_requests: pull_requests.len(),
            deploys: deploys.len(),
            events: commits,
        };
        out.events.extend(pull_requests);
        out.events.extend(deploys);

        log::debug!(
            target: LOG_TARGET,
            "{owner}/{repo}: {} commits, {} pull requests, {} deploys",
            out.commits,
            out.pull_requests,
            out.deploys
        );

        Ok(out)
    }
}
