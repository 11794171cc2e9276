use crate::{
    cmd::connect_pool,
    modules::recalc::{Orchestrator, RecalcScope},
};
use anyhow::Result;
use clap::Args;

#[derive(Debug, Args)]
pub struct RecalcArgs {
    /// Recompute a single ranklist
    #[arg(long)]
    ranklist: Option<i64>,
    /// Recompute a single member; requires --ranklist
    #[arg(long)]
    user: Option<i64>,
    /// Recompute every active ranklist (the default)
    #[arg(long)]
    active_only: bool,
    /// Recompute every ranklist, inactive ones included
    #[arg(long)]
    force_all: bool,
}

pub async fn run(args: RecalcArgs) -> Result<()> {
    // Option validation happens before any database work.
    let scope = RecalcScope::from_options(args.ranklist, args.user, args.active_only, args.force_all)?;

    let pool = connect_pool().await?;
    let orchestrator = Orchestrator::new(&pool);

    match scope {
        RecalcScope::Member {
            rank_list_id,
            user_id,
        } => {
            let outcome = orchestrator.recalc_member(rank_list_id, user_id).await?;
            tracing::info!("{}", outcome.message);
        }
        RecalcScope::RankList { rank_list_id } => {
            let outcome = orchestrator.recalc_rank_list_by_id(rank_list_id).await?;
            tracing::info!("{}", outcome.message);
        }
        RecalcScope::AllActive | RecalcScope::All => {
            let active_only = scope == RecalcScope::AllActive;
            let (outcomes, summary) = orchestrator.recalc_all(active_only).await?;

            for outcome in outcomes.iter() {
                if outcome.success {
                    tracing::info!("{}", outcome.message);
                } else {
                    tracing::warn!("ranklist {}: {}", outcome.rank_list_id, outcome.message);
                }
            }
            tracing::info!(
                "{} ranklists processed: {} succeeded, {} failed",
                summary.total,
                summary.succeeded,
                summary.failed
            );
        }
    }

    Ok(())
}
