use super::{Granularity, Window};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Which slice of the event log a query covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// Everything recorded for the owner.
    Owner { owner: String },
    /// A single repository belonging to the owner.
    Repo { owner: String, repo: String },
    /// A single actor across all of the owner's repositories.
    Member { owner: String, member: String },
}

/// Counter rollup over a scope and window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ActivityTotals {
    pub commits: i64,
    pub pull_requests: i64,
    pub merged_pull_requests: i64,
    pub deploys: i64,
    pub additions: i64,
    pub deletions: i64,
}

impl ActivityTotals {
    /// Lines added plus lines deleted.
    #[must_use]
    pub const fn code_changes(&self) -> i64 {
        self.additions + self.deletions
    }
}

/// Owner-level rollup.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OwnerMetrics {
    pub owner: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub totals: ActivityTotals,
    pub active_repos: i64,
    pub active_members: i64,
    pub total_repos: i64,
    pub total_members: i64,
}

/// Per-member rollup within an owner.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemberMetrics {
    pub owner: String,
    pub member: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub totals: ActivityTotals,
    pub active_repos: i64,
}

/// Per-repository rollup within an owner.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepoMetrics {
    pub owner: String,
    pub repo: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub totals: ActivityTotals,
    pub active_members: i64,
}

/// One bucket of a gap-filled time series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SeriesPoint {
    pub period_start: DateTime<Utc>,
    pub commits: i64,
    pub pull_requests: i64,
    pub deploys: i64,
    pub additions: i64,
    pub deletions: i64,
}

impl SeriesPoint {
    #[must_use]
    pub const fn empty(period_start: DateTime<Utc>) -> Self {
        Self {
            period_start,
            commits: 0,
            pull_requests: 0,
            deploys: 0,
            additions: 0,
            deletions: 0,
        }
    }
}

/// A gap-filled time series over a window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeSeries {
    pub granularity_label: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub points: Vec<SeriesPoint>,
}

impl TimeSeries {
    #[must_use]
    pub fn new(granularity: Granularity, window: Window, points: Vec<SeriesPoint>) -> Self {
        Self {
            granularity_label: granularity.to_string(),
            window_start: window.start,
            window_end: window.end,
            points,
        }
    }
}

/// What a ranking orders its subjects by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum RankingMetric {
    Commits,
    PullRequests,
    CodeChanges,
    Deploys,
}

/// What a ranking ranks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum SubjectKind {
    Members,
    Repos,
}

/// One row of a ranking. Rows are ordered by `value` descending, with ties
/// broken by subject name ascending; `rank` is 1-based positional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankingEntry {
    pub rank: usize,
    pub subject: String,
    pub value: i64,
    pub totals: ActivityTotals,
}
