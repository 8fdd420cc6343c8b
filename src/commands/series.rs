//! The series command: gap-filled activity over time.

use super::common::{CommonArgs, GranularityArg, OwnerArgs, WindowArgs};
use crate::aggregate::Aggregator;
use crate::model::{Granularity, Scope};
use clap::Args;
use owo_colors::OwoColorize;

#[derive(Args, Debug)]
pub struct SeriesArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    #[command(flatten)]
    pub owner: OwnerArgs,

    #[command(flatten)]
    pub window: WindowArgs,

    /// Narrow the series to one repository
    #[arg(long, value_name = "NAME", conflicts_with = "member")]
    pub repo: Option<String>,

    /// Narrow the series to one member
    #[arg(long, value_name = "LOGIN")]
    pub member: Option<String>,

    /// Bucket width
    #[arg(long, value_name = "WIDTH", default_value = "day")]
    pub granularity: GranularityArg,

    /// Emit JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

pub fn process_series(args: &SeriesArgs) -> crate::Result<()> {
    args.common.init_logging();

    let owner = args.owner.owner()?;
    let window = args.window.resolve()?;
    let store = args.common.open_store()?;

    let scope = match (&args.repo, &args.member) {
        (Some(repo), _) => Scope::Repo {
            owner: owner.name.clone(),
            repo: repo.clone(),
        },
        (None, Some(member)) => Scope::Member {
            owner: owner.name.clone(),
            member: member.clone(),
        },
        (None, None) => Scope::Owner { owner: owner.name.clone() },
    };

    let granularity: Granularity = args.granularity.into();
    let series = Aggregator::new(&store).time_series(&scope, window, granularity)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&series)?);
        return Ok(());
    }

    let date_format = match granularity {
        Granularity::Day => "%Y-%m-%d",
        Granularity::Month => "%Y-%m",
    };

    println!("{:<10} {:>8} {:>8} {:>8} {:>10} {:>10}", "PERIOD".bold(), "COMMITS", "PRS", "DEPLOYS", "ADDED", "DELETED");
    for point in &series.points {
        println!(
            "{:<10} {:>8} {:>8} {:>8} {:>10} {:>10}",
            point.period_start.format(date_format),
            point.commits,
            point.pull_requests,
            point.deploys,
            point.additions,
            point.deletions
        );
    }

    Ok(())
}
