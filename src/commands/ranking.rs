//! The ranking command: order members or repositories by a metric.

use super::common::{CommonArgs, MetricArg, OwnerArgs, SubjectArg, WindowArgs};
use crate::aggregate::Aggregator;
use clap::Args;
use owo_colors::OwoColorize;

#[derive(Args, Debug)]
pub struct RankingArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    #[command(flatten)]
    pub owner: OwnerArgs,

    #[command(flatten)]
    pub window: WindowArgs,

    /// What to rank
    #[arg(long, value_name = "SUBJECT", default_value = "members")]
    pub of: SubjectArg,

    /// Metric to rank by
    #[arg(long, value_name = "METRIC", default_value = "commits")]
    pub by: MetricArg,

    /// Maximum number of rows
    #[arg(long, value_name = "N", default_value_t = 10)]
    pub limit: usize,

    /// Emit JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

pub fn process_ranking(args: &RankingArgs) -> crate::Result<()> {
    args.common.init_logging();

    let owner = args.owner.owner()?;
    let window = args.window.resolve()?;
    let store = args.common.open_store()?;

    let ranking = Aggregator::new(&store).ranking(&owner.name, window, args.of.into(), args.by.into(), args.limit)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&ranking)?);
        return Ok(());
    }

    println!(
        "{:>4} {:<24} {:>10} {:>8} {:>8} {:>8}",
        "RANK".bold(),
        "SUBJECT",
        "VALUE",
        "COMMITS",
        "PRS",
        "DEPLOYS"
    );
    for entry in &ranking {
        println!(
            "{:>4} {:<24} {:>10} {:>8} {:>8} {:>8}",
            entry.rank,
            entry.subject,
            entry.value.to_string().bold(),
            entry.totals.commits,
            entry.totals.pull_requests,
            entry.totals.deploys
        );
    }

    Ok(())
}
