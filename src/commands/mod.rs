//! Command-line interface and orchestration for gh-metrics
//!
//! This module implements the CLI commands and coordinates the collection
//! pipeline, the store, and the aggregation engine. It handles argument
//! parsing and the high-level workflows.
//!
//! ## Commands
//!
//! - **collect**: Fetch commit, pull request, and deployment activity for an
//!   organization or user over a time window into the local database.
//!   Collection is resumable and rate limit aware.
//! - **show**: Rollup metrics for the owner, one repository, one member, or
//!   everyone with activity.
//! - **series**: Gap-filled activity time series by day or month.
//! - **ranking**: Members or repositories ordered by a metric.
//!
//! The `common` module provides shared argument types, logging setup, window
//! resolution, and pipeline construction.

mod collect;
mod common;
mod ranking;
mod series;
mod show;

pub use collect::{CollectArgs, process_collect};
pub use common::{CommonArgs, GranularityArg, LogLevel, MetricArg, OwnerArgs, SubjectArg, WindowArgs};
pub use ranking::{RankingArgs, process_ranking};
pub use series::{SeriesArgs, process_series};
pub use show::{ShowArgs, process_show};

use crate::Result;
use clap::builder::Styles;
use clap::builder::styling::{AnsiColor, Effects};
use clap::{Parser, Subcommand};

const CLAP_STYLES: Styles = Styles::styled()
    .header(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .usage(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .literal(AnsiColor::Cyan.on_default().effects(Effects::BOLD))
    .placeholder(AnsiColor::Cyan.on_default());

#[derive(Parser, Debug)]
#[command(name = "gh-metrics", version, author, long_about = None)]
#[command(about = "Collect and aggregate GitHub activity metrics")]
#[command(styles = CLAP_STYLES)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Collect activity for a time window into the local database
    Collect(Box<CollectArgs>),
    /// Show rollup metrics from collected activity
    Show(Box<ShowArgs>),
    /// Show a gap-filled activity time series
    Series(Box<SeriesArgs>),
    /// Rank members or repositories by a metric
    Ranking(Box<RankingArgs>),
}

/// Dispatch command-line arguments to the appropriate handler
///
/// # Errors
///
/// Returns an error if command parsing fails or if the executed command fails
pub async fn run<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    match &Cli::parse_from(args).command {
        Command::Collect(args) => process_collect(args).await,
        Command::Show(args) => process_show(args),
        Command::Series(args) => process_series(args),
        Command::Ranking(args) => process_ranking(args),
    }
}
