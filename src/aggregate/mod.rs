//! Rollups, time series, and rankings computed from the stored event log.
//!
//! Aggregation never touches the network; it is a pure function of what the
//! collection pipeline has already persisted.

use crate::model::{
    ActivityTotals, Granularity, MemberMetrics, Owner, OwnerMetrics, RankingEntry, RankingMetric, RepoMetrics, Scope,
    SeriesPoint, SubjectKind, TimeSeries, Window,
};
use crate::store::{Store, TotalsRow};
use std::collections::HashMap;

impl From<TotalsRow> for ActivityTotals {
    fn from(row: TotalsRow) -> Self {
        Self {
            commits: row.commits,
            pull_requests: row.pull_requests,
            merged_pull_requests: row.merged_pull_requests,
            deploys: row.deploys,
            additions: row.additions,
            deletions: row.deletions,
        }
    }
}

const fn metric_value(metric: RankingMetric, totals: &ActivityTotals) -> i64 {
    match metric {
        RankingMetric::Commits => totals.commits,
        RankingMetric::PullRequests => totals.pull_requests,
        RankingMetric::CodeChanges => totals.code_changes(),
        RankingMetric::Deploys => totals.deploys,
    }
}

/// Computes metrics from a [`Store`].
pub struct Aggregator<'a> {
    store: &'a Store,
}

impl<'a> Aggregator<'a> {
    #[must_use]
    pub const fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Owner-wide rollup over the window.
    pub fn owner_metrics(&self, owner: &Owner, window: Window) -> crate::Result<OwnerMetrics> {
        let scope = Scope::Owner { owner: owner.name.clone() };
        let totals = self.store.totals(&scope, window)?;

        Ok(OwnerMetrics {
            owner: owner.name.clone(),
            window_start: window.start,
            window_end: window.end,
            totals: totals.into(),
            active_repos: self.store.distinct_count(&scope, window, "repo")?,
            active_members: self.store.distinct_count(&scope, window, "actor")?,
            total_repos: self.store.total_repositories(&owner.name)?,
            total_members: self.store.total_members(&owner.name)?,
        })
    }

    /// Rollup for one member across all of the owner's repositories.
    pub fn member_metrics(&self, owner: &str, member: &str, window: Window) -> crate::Result<MemberMetrics> {
        let scope = Scope::Member {
            owner: owner.to_string(),
            member: member.to_string(),
        };
        let totals = self.store.totals(&scope, window)?;

        Ok(MemberMetrics {
            owner: owner.to_string(),
            member: member.to_string(),
            window_start: window.start,
            window_end: window.end,
            totals: totals.into(),
            active_repos: self.store.distinct_count(&scope, window, "repo")?,
        })
    }

    /// Rollup for one repository.
    pub fn repo_metrics(&self, owner: &str, repo: &str, window: Window) -> crate::Result<RepoMetrics> {
        let scope = Scope::Repo {
            owner: owner.to_string(),
            repo: repo.to_string(),
        };
        let totals = self.store.totals(&scope, window)?;

        Ok(RepoMetrics {
            owner: owner.to_string(),
            repo: repo.to_string(),
            window_start: window.start,
            window_end: window.end,
            totals: totals.into(),
            active_members: self.store.distinct_count(&scope, window, "actor")?,
        })
    }

    /// Per-member rollups for every member with recorded activity, ordered by
    /// member name.
    pub fn members_metrics(&self, owner: &str, window: Window) -> crate::Result<Vec<MemberMetrics>> {
        let mut grouped = self.store.grouped_totals(owner, window, "actor")?;
        grouped.sort_by(|a, b| a.0.cmp(&b.0));

        grouped
            .into_iter()
            .map(|(member, totals)| {
                let scope = Scope::Member {
                    owner: owner.to_string(),
                    member: member.clone(),
                };
                Ok(MemberMetrics {
                    owner: owner.to_string(),
                    member,
                    window_start: window.start,
                    window_end: window.end,
                    totals: totals.into(),
                    active_repos: self.store.distinct_count(&scope, window, "repo")?,
                })
            })
            .collect()
    }

    /// Per-repository rollups for every repository with recorded activity,
    /// ordered by repository name.
    pub fn repos_metrics(&self, owner: &str, window: Window) -> crate::Result<Vec<RepoMetrics>> {
        let mut grouped = self.store.grouped_totals(owner, window, "repo")?;
        grouped.sort_by(|a, b| a.0.cmp(&b.0));

        grouped
            .into_iter()
            .map(|(repo, totals)| {
                let scope = Scope::Repo {
                    owner: owner.to_string(),
                    repo: repo.clone(),
                };
                Ok(RepoMetrics {
                    owner: owner.to_string(),
                    repo,
                    window_start: window.start,
                    window_end: window.end,
                    totals: totals.into(),
                    active_members: self.store.distinct_count(&scope, window, "actor")?,
                })
            })
            .collect()
    }

    /// Gap-filled time series over the window.
    ///
    /// Every bucket intersecting the window appears exactly once, in
    /// ascending order, with zero counters when no activity occurred.
    pub fn time_series(&self, scope: &Scope, window: Window, granularity: Granularity) -> crate::Result<TimeSeries> {
        let bucket_starts = granularity.buckets(window);
        let mut by_bucket: HashMap<_, SeriesPoint> =
            bucket_starts.iter().map(|&b| (b, SeriesPoint::empty(b))).collect();

        for event in self.store.series_events(scope, window)? {
            let bucket = granularity.truncate(event.occurred_at);
            let Some(point) = by_bucket.get_mut(&bucket) else {
                continue;
            };

            match event.kind {
                crate::model::EventKind::Commit => {
                    point.commits += 1;
                    point.additions += event.additions;
                    point.deletions += event.deletions;
                }
                crate::model::EventKind::PullRequest => point.pull_requests += 1,
                crate::model::EventKind::Deploy => point.deploys += 1,
            }
        }

        let points = bucket_starts.into_iter().filter_map(|b| by_bucket.remove(&b)).collect();
        Ok(TimeSeries::new(granularity, window, points))
    }

    /// Rank members or repositories by a metric.
    ///
    /// Rows are ordered by metric value descending; ties break by subject
    /// name ascending. Subjects with a zero value still rank, since the
    /// ordering is over everything with recorded activity.
    pub fn ranking(
        &self,
        owner: &str,
        window: Window,
        subject: SubjectKind,
        metric: RankingMetric,
        limit: usize,
    ) -> crate::Result<Vec<RankingEntry>> {
        let column = match subject {
            SubjectKind::Members => "actor",
            SubjectKind::Repos => "repo",
        };

        let mut rows: Vec<(String, ActivityTotals)> = self
            .store
            .grouped_totals(owner, window, column)?
            .into_iter()
            .map(|(subject, totals)| (subject, totals.into()))
            .collect();

        rows.sort_by(|a, b| {
            metric_value(metric, &b.1)
                .cmp(&metric_value(metric, &a.1))
                .then_with(|| a.0.cmp(&b.0))
        });

        Ok(rows
            .into_iter()
            .take(limit)
            .enumerate()
            .map(|(i, (subject, totals))| RankingEntry {
                rank: i + 1,
                subject,
                value: metric_value(metric, &totals),
                totals,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EventKind, EventPayload, OwnerKind, RawEvent, event_id};
    use chrono::{DateTime, TimeZone, Utc};

    fn at(d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, d, h, 0, 0).unwrap()
    }

    fn window() -> Window {
        Window::new(at(1, 0), Utc.with_ymd_and_hms(2024, 3, 31, 23, 59, 59).unwrap())
    }

    fn event(repo: &str, actor: &str, kind: EventKind, key: &str, day: u32) -> RawEvent {
        let payload = match kind {
            EventKind::Commit => EventPayload::Commit {
                sha: key.to_string(),
                message: "change".to_string(),
                additions: 10,
                deletions: 5,
                files_changed: 2,
            },
            EventKind::PullRequest => EventPayload::PullRequest {
                number: key.parse().unwrap(),
                state: "open".to_string(),
                title: "a change".to_string(),
                merged_at: None,
            },
            EventKind::Deploy => EventPayload::Deploy {
                environment: "production".to_string(),
                status: "success".to_string(),
                run_id: key.to_string(),
            },
        };

        RawEvent {
            id: event_id("acme", repo, kind, key),
            kind,
            owner: "acme".to_string(),
            owner_kind: OwnerKind::Organization,
            repo: repo.to_string(),
            actor: actor.to_string(),
            occurred_at: at(day, 12),
            payload,
            recorded_at: at(day, 13),
        }
    }

    fn seeded_store() -> Store {
        let store = Store::open_in_memory().unwrap();
        store
            .upsert_events(&[
                event("widgets", "alice", EventKind::Commit, "a1", 5),
                event("widgets", "alice", EventKind::Commit, "a2", 5),
                event("widgets", "alice", EventKind::Commit, "a3", 5),
                event("widgets", "bob", EventKind::Deploy, "90", 5),
                event("widgets", "bob", EventKind::Deploy, "91", 5),
                event("gears", "bob", EventKind::PullRequest, "7", 10),
            ])
            .unwrap();
        store
    }

    #[test]
    fn owner_metrics_count_active_subjects() {
        let store = seeded_store();
        store.upsert_members("acme", &["alice".to_string(), "bob".to_string(), "carol".to_string()]).unwrap();
        store.upsert_repositories("acme", &["widgets".to_string(), "gears".to_string(), "idle".to_string()]).unwrap();

        let metrics = Aggregator::new(&store).owner_metrics(&Owner::org("acme"), window()).unwrap();
        assert_eq!(metrics.totals.commits, 3);
        assert_eq!(metrics.totals.pull_requests, 1);
        assert_eq!(metrics.totals.deploys, 2);
        assert_eq!(metrics.active_repos, 2);
        assert_eq!(metrics.active_members, 2);
        assert_eq!(metrics.total_repos, 3);
        assert_eq!(metrics.total_members, 3);
    }

    #[test]
    fn time_series_fills_gaps_with_zero_buckets() {
        let store = seeded_store();
        let scope = Scope::Owner { owner: "acme".to_string() };

        let series = Aggregator::new(&store).time_series(&scope, window(), Granularity::Day).unwrap();

        assert_eq!(series.points.len(), 31);
        assert_eq!(series.points[0].period_start, at(1, 0));

        let day5 = &series.points[4];
        assert_eq!(day5.commits, 3);
        assert_eq!(day5.deploys, 2);
        assert_eq!(day5.additions, 30);

        let day10 = &series.points[9];
        assert_eq!(day10.pull_requests, 1);
        assert_eq!(day10.commits, 0);

        assert!(series.points.iter().filter(|p| p.commits == 0 && p.pull_requests == 0 && p.deploys == 0).count() >= 29);
    }

    #[test]
    fn time_series_month_granularity_collapses_the_window() {
        let store = seeded_store();
        let scope = Scope::Owner { owner: "acme".to_string() };

        let series = Aggregator::new(&store).time_series(&scope, window(), Granularity::Month).unwrap();

        assert_eq!(series.points.len(), 1);
        assert_eq!(series.points[0].commits, 3);
        assert_eq!(series.points[0].pull_requests, 1);
    }

    #[test]
    fn ranking_orders_by_value_then_name() {
        let store = seeded_store();
        let agg = Aggregator::new(&store);

        let ranking = agg.ranking("acme", window(), SubjectKind::Members, RankingMetric::Commits, 10).unwrap();
        assert_eq!(ranking.len(), 2);
        assert_eq!(ranking[0].subject, "alice");
        assert_eq!(ranking[0].rank, 1);
        assert_eq!(ranking[0].value, 3);
        assert_eq!(ranking[1].subject, "bob");
        assert_eq!(ranking[1].value, 0);

        let by_deploys = agg.ranking("acme", window(), SubjectKind::Members, RankingMetric::Deploys, 10).unwrap();
        assert_eq!(by_deploys[0].subject, "bob");
        assert_eq!(by_deploys[1].subject, "alice");
    }

    #[test]
    fn ranking_respects_the_limit() {
        let store = seeded_store();
        let ranking = Aggregator::new(&store)
            .ranking("acme", window(), SubjectKind::Repos, RankingMetric::Commits, 1)
            .unwrap();
        assert_eq!(ranking.len(), 1);
        assert_eq!(ranking[0].subject, "widgets");
    }

    #[test]
    fn member_and_repo_rollups_scope_correctly() {
        let store = seeded_store();
        let agg = Aggregator::new(&store);

        let alice = agg.member_metrics("acme", "alice", window()).unwrap();
        assert_eq!(alice.totals.commits, 3);
        assert_eq!(alice.active_repos, 1);

        let widgets = agg.repo_metrics("acme", "widgets", window()).unwrap();
        assert_eq!(widgets.totals.commits, 3);
        assert_eq!(widgets.totals.deploys, 2);
        assert_eq!(widgets.active_members, 2);

        let members = agg.members_metrics("acme", window()).unwrap();
        assert_eq!(members.len(), 2);
        assert_eq!(members[0].member, "alice");

        let repos = agg.repos_metrics("acme", window()).unwrap();
        assert_eq!(repos.len(), 2);
        assert_eq!(repos[0].repo, "gears");
    }
}
