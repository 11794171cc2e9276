use crate::{
    modules::scoring::ScoreCalculator,
    types::tables::{RankList, RankListUser},
};
use anyhow::Result;
use sqlx::{postgres::Postgres, Pool};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScopeError {
    #[error("a member-scoped recalculation requires a ranklist scope")]
    MemberWithoutRankList,
    #[error("--force-all cannot be combined with an explicit ranklist or user")]
    ForceAllWithExplicitScope,
    #[error("--active-only cannot be combined with an explicit ranklist or user")]
    ActiveOnlyWithExplicitScope,
    #[error("--force-all and --active-only are mutually exclusive")]
    ForceAllWithActiveOnly,
}

#[derive(Debug, Error)]
pub enum RecalcError {
    #[error("ranklist {0} not found")]
    RankListNotFound(i64),
    #[error("user {0} is not a member of ranklist {1}")]
    UserNotOnRankList(i64, i64),
}

/// The four mutually exclusive operation modes of the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecalcScope {
    /// One member on one ranklist.
    Member { rank_list_id: i64, user_id: i64 },
    /// Every member of one ranklist.
    RankList { rank_list_id: i64 },
    /// Every member of every active ranklist.
    AllActive,
    /// Every member of every ranklist, inactive ones included.
    All,
}

impl RecalcScope {
    /// Validates the CLI option combination before any computation starts.
    pub fn from_options(
        rank_list: Option<i64>,
        user: Option<i64>,
        active_only: bool,
        force_all: bool,
    ) -> Result<RecalcScope, ScopeError> {
        if force_all && active_only {
            return Err(ScopeError::ForceAllWithActiveOnly);
        }
        if force_all && (rank_list.is_some() || user.is_some()) {
            return Err(ScopeError::ForceAllWithExplicitScope);
        }
        if active_only && (rank_list.is_some() || user.is_some()) {
            return Err(ScopeError::ActiveOnlyWithExplicitScope);
        }

        match (rank_list, user) {
            (Some(rank_list_id), Some(user_id)) => Ok(RecalcScope::Member {
                rank_list_id,
                user_id,
            }),
            (Some(rank_list_id), None) => Ok(RecalcScope::RankList { rank_list_id }),
            (None, Some(_)) => Err(ScopeError::MemberWithoutRankList),
            (None, None) => {
                if force_all {
                    Ok(RecalcScope::All)
                } else {
                    Ok(RecalcScope::AllActive)
                }
            }
        }
    }
}

/// Result of recalculating one ranklist.
#[derive(Debug)]
pub struct RecalcOutcome {
    pub rank_list_id: i64,
    pub success: bool,
    pub processed: usize,
    pub message: String,
}

/// Aggregate over a batch of ranklists.
#[derive(Debug, Default)]
pub struct RecalcSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

pub struct Orchestrator<'a> {
    pool: &'a Pool<Postgres>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(pool: &'a Pool<Postgres>) -> Self {
        Orchestrator { pool }
    }

    async fn load_rank_list(&self, rank_list_id: i64) -> Result<RankList> {
        sqlx::query_as::<_, RankList>(
            r#"
            SELECT "id", "tracker_id", "keyword", "weight_of_upsolve", "is_active", "consider_strict_attendance"
            FROM "rank_lists" WHERE "id" = $1;
            "#,
        )
        .bind(rank_list_id)
        .fetch_optional(self.pool)
        .await?
        .ok_or_else(|| RecalcError::RankListNotFound(rank_list_id).into())
    }

    async fn member_ids(&self, rank_list_id: i64) -> Result<Vec<i64>> {
        let rows: Vec<RankListUser> = sqlx::query_as(
            r#"
            SELECT "rank_list_id", "user_id", "score"
            FROM "rank_list_users" WHERE "rank_list_id" = $1;
            "#,
        )
        .bind(rank_list_id)
        .fetch_all(self.pool)
        .await?;

        Ok(rows.into_iter().map(|row| row.user_id).collect())
    }

    /// Recomputes one member's score. Unknown ids are hard errors; nothing
    /// is computed for them.
    pub async fn recalc_member(&self, rank_list_id: i64, user_id: i64) -> Result<RecalcOutcome> {
        let rank_list = self.load_rank_list(rank_list_id).await?;

        if !self.member_ids(rank_list_id).await?.contains(&user_id) {
            return Err(RecalcError::UserNotOnRankList(user_id, rank_list_id).into());
        }

        let score = ScoreCalculator::new(self.pool)
            .recompute(&rank_list, user_id)
            .await?;

        Ok(RecalcOutcome {
            rank_list_id,
            success: true,
            processed: 1,
            message: format!(
                "score of user {} on ranklist `{}` recomputed to {}",
                user_id, rank_list.keyword, score
            ),
        })
    }

    /// Looks up a ranklist by id and recomputes every member on it.
    pub async fn recalc_rank_list_by_id(&self, rank_list_id: i64) -> Result<RecalcOutcome> {
        let rank_list = self.load_rank_list(rank_list_id).await?;
        self.recalc_rank_list(&rank_list).await
    }

    /// Recomputes every member of one ranklist. A single member's failure is
    /// logged and counted, never aborts the ranklist.
    pub async fn recalc_rank_list(&self, rank_list: &RankList) -> Result<RecalcOutcome> {
        let calculator = ScoreCalculator::new(self.pool);

        if calculator.attached_event_count(rank_list.id).await? == 0 {
            return Ok(RecalcOutcome {
                rank_list_id: rank_list.id,
                success: true,
                processed: 0,
                message: format!("ranklist `{}` has no attached events", rank_list.keyword),
            });
        }

        let members = self.member_ids(rank_list.id).await?;

        let mut processed = 0usize;
        let mut failed = 0usize;
        for &user_id in members.iter() {
            match calculator.recompute(rank_list, user_id).await {
                Ok(_) => processed += 1,
                Err(e) => {
                    tracing::warn!(
                        "failed to recompute user {} on ranklist `{}`: {:?}",
                        user_id,
                        rank_list.keyword,
                        e
                    );
                    failed += 1;
                }
            }
        }

        Ok(RecalcOutcome {
            rank_list_id: rank_list.id,
            success: failed == 0,
            processed,
            message: format!(
                "ranklist `{}`: {} members recomputed, {} failed",
                rank_list.keyword, processed, failed
            ),
        })
    }

    /// Recomputes a batch of ranklists, optionally restricted to active
    /// ones, aggregating per-ranklist outcomes into a summary.
    pub async fn recalc_all(&self, active_only: bool) -> Result<(Vec<RecalcOutcome>, RecalcSummary)> {
        let rank_lists: Vec<RankList> = if active_only {
            sqlx::query_as(
                r#"
                SELECT "id", "tracker_id", "keyword", "weight_of_upsolve", "is_active", "consider_strict_attendance"
                FROM "rank_lists" WHERE "is_active" = TRUE ORDER BY "id";
                "#,
            )
            .fetch_all(self.pool)
            .await?
        } else {
            sqlx::query_as(
                r#"
                SELECT "id", "tracker_id", "keyword", "weight_of_upsolve", "is_active", "consider_strict_attendance"
                FROM "rank_lists" ORDER BY "id";
                "#,
            )
            .fetch_all(self.pool)
            .await?
        };

        let mut outcomes: Vec<RecalcOutcome> = Vec::with_capacity(rank_lists.len());
        let mut summary = RecalcSummary::default();

        for rank_list in rank_lists.iter() {
            let outcome = match self.recalc_rank_list(rank_list).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!("ranklist `{}` failed: {:?}", rank_list.keyword, e);
                    RecalcOutcome {
                        rank_list_id: rank_list.id,
                        success: false,
                        processed: 0,
                        message: format!("ranklist `{}` failed: {}", rank_list.keyword, e),
                    }
                }
            };

            summary.total += 1;
            if outcome.success {
                summary.succeeded += 1;
            } else {
                summary.failed += 1;
            }
            outcomes.push(outcome);
        }

        Ok((outcomes, summary))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_scope_resolution() {
        assert_eq!(
            RecalcScope::from_options(Some(3), Some(5), false, false),
            Ok(RecalcScope::Member {
                rank_list_id: 3,
                user_id: 5
            })
        );
        assert_eq!(
            RecalcScope::from_options(Some(3), None, false, false),
            Ok(RecalcScope::RankList { rank_list_id: 3 })
        );
        assert_eq!(
            RecalcScope::from_options(None, None, false, false),
            Ok(RecalcScope::AllActive)
        );
        assert_eq!(
            RecalcScope::from_options(None, None, true, false),
            Ok(RecalcScope::AllActive)
        );
        assert_eq!(
            RecalcScope::from_options(None, None, false, true),
            Ok(RecalcScope::All)
        );
    }

    #[test]
    fn test_incompatible_options_rejected() {
        assert_eq!(
            RecalcScope::from_options(None, Some(5), false, false),
            Err(ScopeError::MemberWithoutRankList)
        );
        assert_eq!(
            RecalcScope::from_options(Some(3), None, false, true),
            Err(ScopeError::ForceAllWithExplicitScope)
        );
        assert_eq!(
            RecalcScope::from_options(None, Some(5), false, true),
            Err(ScopeError::ForceAllWithExplicitScope)
        );
        assert_eq!(
            RecalcScope::from_options(Some(3), None, true, false),
            Err(ScopeError::ActiveOnlyWithExplicitScope)
        );
        assert_eq!(
            RecalcScope::from_options(None, None, true, true),
            Err(ScopeError::ForceAllWithActiveOnly)
        );
    }
}
