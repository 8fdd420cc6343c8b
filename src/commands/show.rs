//! The show command: rollup metrics for an owner, repository, or member.

use super::common::{CommonArgs, OwnerArgs, WindowArgs};
use crate::aggregate::Aggregator;
use crate::model::ActivityTotals;
use clap::Args;
use owo_colors::OwoColorize;

#[derive(Args, Debug)]
pub struct ShowArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    #[command(flatten)]
    pub owner: OwnerArgs,

    #[command(flatten)]
    pub window: WindowArgs,

    /// Show metrics for one repository
    #[arg(long, value_name = "NAME", conflicts_with_all = ["member", "members", "repos"])]
    pub repo: Option<String>,

    /// Show metrics for one member
    #[arg(long, value_name = "LOGIN", conflicts_with_all = ["members", "repos"])]
    pub member: Option<String>,

    /// Show per-member metrics for everyone with activity
    #[arg(long, conflicts_with = "repos")]
    pub members: bool,

    /// Show per-repository metrics for every repository with activity
    #[arg(long)]
    pub repos: bool,

    /// Emit JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

pub fn process_show(args: &ShowArgs) -> crate::Result<()> {
    args.common.init_logging();

    let owner = args.owner.owner()?;
    let window = args.window.resolve()?;
    let store = args.common.open_store()?;
    let agg = Aggregator::new(&store);

    if let Some(repo) = &args.repo {
        let metrics = agg.repo_metrics(&owner.name, repo, window)?;
        if args.json {
            println!("{}", serde_json::to_string_pretty(&metrics)?);
        } else {
            println!("{} over {window}", format!("{owner}/{repo}").bold());
            print_totals(&metrics.totals);
            println!("  {:<22} {}", "active members", metrics.active_members);
        }
    } else if let Some(member) = &args.member {
        let metrics = agg.member_metrics(&owner.name, member, window)?;
        if args.json {
            println!("{}", serde_json::to_string_pretty(&metrics)?);
        } else {
            println!("{} in {owner} over {window}", member.bold());
            print_totals(&metrics.totals);
            println!("  {:<22} {}", "active repositories", metrics.active_repos);
        }
    } else if args.members {
        let metrics = agg.members_metrics(&owner.name, window)?;
        if args.json {
            println!("{}", serde_json::to_string_pretty(&metrics)?);
        } else {
            println!("{:<24} {:>8} {:>8} {:>8} {:>10} {:>10}", "MEMBER".bold(), "COMMITS", "PRS", "DEPLOYS", "ADDED", "DELETED");
            for m in &metrics {
                println!(
                    "{:<24} {:>8} {:>8} {:>8} {:>10} {:>10}",
                    m.member, m.totals.commits, m.totals.pull_requests, m.totals.deploys, m.totals.additions, m.totals.deletions
                );
            }
        }
    } else if args.repos {
        let metrics = agg.repos_metrics(&owner.name, window)?;
        if args.json {
            println!("{}", serde_json::to_string_pretty(&metrics)?);
        } else {
            println!("{:<24} {:>8} {:>8} {:>8} {:>10} {:>10}", "REPOSITORY".bold(), "COMMITS", "PRS", "DEPLOYS", "ADDED", "DELETED");
            for r in &metrics {
                println!(
                    "{:<24} {:>8} {:>8} {:>8} {:>10} {:>10}",
                    r.repo, r.totals.commits, r.totals.pull_requests, r.totals.deploys, r.totals.additions, r.totals.deletions
                );
            }
        }
    } else {
        let metrics = agg.owner_metrics(&owner, window)?;
        if args.json {
            println!("{}", serde_json::to_string_pretty(&metrics)?);
        } else {
            println!("{} over {window}", owner.to_string().bold());
            print_totals(&metrics.totals);
            println!("  {:<22} {} of {}", "active repositories", metrics.active_repos, metrics.total_repos);
            println!("  {:<22} {} of {}", "active members", metrics.active_members, metrics.total_members);
        }
    }

    Ok(())
}

fn print_totals(totals: &ActivityTotals) {
    println!("  {:<22} {}", "commits", totals.commits);
    println!("  {:<22} {} ({} merged)", "pull requests", totals.pull_requests, totals.merged_pull_requests);
    println!("  {:<22} {}", "deployments", totals.deploys);
    println!("  {:<22} +{} / -{}", "lines changed", totals.additions, totals.deletions);
}
