//! Shared argument types and setup logic for all commands.

use crate::collect::{Client, Fetcher, RateLimiter};
use crate::model::{Granularity, Owner, RankingMetric, SubjectKind, Window};
use crate::store::Store;
use chrono::{Months, NaiveDate, TimeZone, Utc};
use clap::{Args, ValueEnum};
use ohno::app_err;
use std::path::PathBuf;
use std::sync::Arc;

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    /// No logging output
    None,

    /// Only error messages
    Error,

    /// Warning and error messages
    Warn,

    /// Info, warning, and error messages
    Info,

    /// Debug, info, warning, and error messages
    Debug,

    /// Trace, debug, info, warning, and error messages
    Trace,
}

/// Arguments shared by every command
#[derive(Args, Debug)]
pub struct CommonArgs {
    /// GitHub personal access token
    #[arg(long, value_name = "TOKEN", env = "GITHUB_TOKEN")]
    pub github_token: Option<String>,

    /// Path to the metrics database
    #[arg(long, value_name = "PATH", env = "GH_METRICS_DB", default_value = "gh-metrics.db")]
    pub db: PathBuf,

    /// Base URL of the GitHub API
    #[arg(long, value_name = "URL", env = "GITHUB_API_URL", default_value = "https://api.github.com")]
    pub api_url: String,

    /// Set the logging level for diagnostic output
    #[arg(long, value_name = "LEVEL", default_value = "none", global = true)]
    pub log_level: LogLevel,
}

impl CommonArgs {
    /// Initialize logger based on log level
    pub fn init_logging(&self) {
        let level = match self.log_level {
            LogLevel::None => return,
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        };

        let env = env_logger::Env::default().filter_or("RUST_LOG", level);

        env_logger::Builder::from_env(env)
            .format_timestamp(None)
            .format_module_path(false)
            .format_target(matches!(self.log_level, LogLevel::Debug | LogLevel::Trace))
            .init();
    }

    pub fn open_store(&self) -> crate::Result<Arc<Store>> {
        Ok(Arc::new(Store::open(&self.db)?))
    }

    /// Build the fetch pipeline. Requires a token.
    pub fn fetcher(&self) -> crate::Result<Fetcher> {
        let token = self
            .github_token
            .as_deref()
            .ok_or_else(|| app_err!("a GitHub token is required; pass --github-token or set GITHUB_TOKEN"))?;

        let client = Client::new(token, self.api_url.trim_end_matches('/'))?;
        Ok(Fetcher::new(client, Arc::new(RateLimiter::new())))
    }
}

/// The account being measured: an organization or a user, exactly one
#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
pub struct OwnerArgs {
    /// Target a GitHub organization
    #[arg(long, value_name = "NAME")]
    pub org: Option<String>,

    /// Target a GitHub user account
    #[arg(long, value_name = "NAME")]
    pub user: Option<String>,
}

impl OwnerArgs {
    pub fn owner(&self) -> crate::Result<Owner> {
        match (&self.org, &self.user) {
            (Some(org), None) => Ok(Owner::org(org.clone())),
            (None, Some(user)) => Ok(Owner::user(user.clone())),
            _ => Err(app_err!("exactly one of --org or --user is required")),
        }
    }
}

/// The time window to operate over
#[derive(Args, Debug)]
pub struct WindowArgs {
    /// First day of the window (inclusive). Defaults to one month before the end
    #[arg(long, value_name = "YYYY-MM-DD")]
    pub since: Option<NaiveDate>,

    /// Last day of the window (inclusive). Defaults to today
    #[arg(long, value_name = "YYYY-MM-DD")]
    pub until: Option<NaiveDate>,
}

impl WindowArgs {
    /// Resolve to a concrete window. Days are inclusive on both ends: the
    /// window runs from 00:00:00 on the first day to 23:59:59 on the last.
    pub fn resolve(&self) -> crate::Result<Window> {
        let until = self.until.unwrap_or_else(|| Utc::now().date_naive());
        let since = match self.since {
            Some(since) => since,
            None => until.checked_sub_months(Months::new(1)).ok_or_else(|| app_err!("window start out of range"))?,
        };

        if since > until {
            return Err(app_err!("--since ({since}) must not be after --until ({until})"));
        }

        let start = Utc.from_utc_datetime(&since.and_hms_opt(0, 0, 0).ok_or_else(|| app_err!("invalid start day"))?);
        let end = Utc.from_utc_datetime(&until.and_hms_opt(23, 59, 59).ok_or_else(|| app_err!("invalid end day"))?);

        Ok(Window::new(start, end))
    }
}

/// Bucket width for time series output
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum GranularityArg {
    /// One bucket per calendar day
    Day,

    /// One bucket per calendar month
    Month,
}

impl From<GranularityArg> for Granularity {
    fn from(arg: GranularityArg) -> Self {
        match arg {
            GranularityArg::Day => Self::Day,
            GranularityArg::Month => Self::Month,
        }
    }
}

/// Metric to rank by
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MetricArg {
    /// Number of commits
    Commits,

    /// Number of pull requests opened
    PullRequests,

    /// Lines added plus lines deleted
    CodeChanges,

    /// Number of deployments
    Deploys,
}

impl From<MetricArg> for RankingMetric {
    fn from(arg: MetricArg) -> Self {
        match arg {
            MetricArg::Commits => Self::Commits,
            MetricArg::PullRequests => Self::PullRequests,
            MetricArg::CodeChanges => Self::CodeChanges,
            MetricArg::Deploys => Self::Deploys,
        }
    }
}

/// What a ranking ranks
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SubjectArg {
    /// Rank organization members
    Members,

    /// Rank repositories
    Repos,
}

impl From<SubjectArg> for SubjectKind {
    fn from(arg: SubjectArg) -> Self {
        match arg {
            SubjectArg::Members => Self::Members,
            SubjectArg::Repos => Self::Repos,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_resolves_inclusive_day_bounds() {
        let args = WindowArgs {
            since: Some(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()),
            until: Some(NaiveDate::from_ymd_opt(2024, 3, 31).unwrap()),
        };

        let window = args.resolve().unwrap();
        assert_eq!(window.start, Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap());
        assert_eq!(window.end, Utc.with_ymd_and_hms(2024, 3, 31, 23, 59, 59).unwrap());
    }

    #[test]
    fn window_defaults_to_the_last_month() {
        let args = WindowArgs {
            since: None,
            until: Some(NaiveDate::from_ymd_opt(2024, 3, 15).unwrap()),
        };

        let window = args.resolve().unwrap();
        assert_eq!(window.start, Utc.with_ymd_and_hms(2024, 2, 15, 0, 0, 0).unwrap());
    }

    #[test]
    fn window_rejects_inverted_bounds() {
        let args = WindowArgs {
            since: Some(NaiveDate::from_ymd_opt(2024, 4, 1).unwrap()),
            until: Some(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()),
        };

        assert!(args.resolve().is_err());
    }
}
