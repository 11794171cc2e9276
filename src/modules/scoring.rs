use crate::{
    modules::{judges::Stat, stats::StatStore},
    types::tables::RankList,
};
use anyhow::Result;
use sqlx::{postgres::Postgres, FromRow, Pool};
use std::collections::HashSet;

/// One attached event's inputs to the score fold.
#[derive(Debug, Clone, Copy)]
pub struct EventInput {
    /// Per-attachment weight from event_rank_lists.
    pub weight: f64,
    pub strict_attendance: bool,
    /// `None` means no stat row exists for the member, which contributes
    /// nothing; distinct from a fetched all-zero stat.
    pub stat: Option<Stat>,
    pub attended: bool,
}

/// Deterministic fold over the ranklist's attached events.
///
/// When both the ranklist and the event enforce strict attendance and the
/// member never confirmed attendance, in-contest solves are demoted to
/// upsolve credit before weighting.
pub fn compute_score(rank_list: &RankList, inputs: &[EventInput]) -> f64 {
    let mut score = 0.0;

    for input in inputs.iter() {
        let Some(stat) = input.stat else {
            continue;
        };

        let mut solves = stat.solve_count as f64;
        let mut upsolves = stat.upsolve_count as f64;

        if rank_list.consider_strict_attendance && input.strict_attendance && !input.attended {
            upsolves += solves;
            solves = 0.0;
        }

        score += input.weight * (solves + rank_list.weight_of_upsolve * upsolves);
    }

    score
}

#[derive(Debug, FromRow)]
struct AttachedEventRow {
    event_id: i64,
    strict_attendance: bool,
    weight: f64,
}

/// Loads a member's inputs from the store and replaces the stored score.
pub struct ScoreCalculator<'a> {
    pool: &'a Pool<Postgres>,
}

impl<'a> ScoreCalculator<'a> {
    pub fn new(pool: &'a Pool<Postgres>) -> Self {
        ScoreCalculator { pool }
    }

    /// The number of events attached to a ranklist.
    pub async fn attached_event_count(&self, rank_list_id: i64) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            r#"SELECT COUNT(*) FROM "event_rank_lists" WHERE "rank_list_id" = $1;"#,
        )
        .bind(rank_list_id)
        .fetch_one(self.pool)
        .await?;

        Ok(count)
    }

    /// Recomputes one member's score on one ranklist and overwrites
    /// rank_list_users.score with the result.
    pub async fn recompute(&self, rank_list: &RankList, user_id: i64) -> Result<f64> {
        let attached: Vec<AttachedEventRow> = sqlx::query_as(
            r#"
            SELECT "e"."id" AS "event_id", "e"."strict_attendance", "erl"."weight"
            FROM "event_rank_lists" AS "erl"
            JOIN "events" AS "e" ON "e"."id" = "erl"."event_id"
            WHERE "erl"."rank_list_id" = $1;
            "#,
        )
        .bind(rank_list.id)
        .fetch_all(self.pool)
        .await?;

        let event_ids: Vec<i64> = attached.iter().map(|row| row.event_id).collect();

        let stats = StatStore::new(self.pool)
            .load_for_member(&event_ids, user_id)
            .await?;

        let attendance: HashSet<i64> = sqlx::query_as::<_, (i64,)>(
            r#"
            SELECT "event_id" FROM "event_attendances"
            WHERE "event_id" = ANY($1) AND "user_id" = $2;
            "#,
        )
        .bind(event_ids.as_slice())
        .bind(user_id)
        .fetch_all(self.pool)
        .await?
        .into_iter()
        .map(|(event_id,)| event_id)
        .collect();

        let inputs: Vec<EventInput> = attached
            .iter()
            .map(|row| EventInput {
                weight: row.weight,
                strict_attendance: row.strict_attendance,
                stat: stats.get(&row.event_id).copied(),
                attended: attendance.contains(&row.event_id),
            })
            .collect();

        let score = compute_score(rank_list, &inputs);

        sqlx::query(
            r#"
            UPDATE "rank_list_users" SET "score" = $1
            WHERE "rank_list_id" = $2 AND "user_id" = $3;
            "#,
        )
        .bind(score)
        .bind(rank_list.id)
        .bind(user_id)
        .execute(self.pool)
        .await?;

        tracing::debug!(
            "score of user {} on ranklist `{}` recomputed to {}",
            user_id,
            rank_list.keyword,
            score
        );

        Ok(score)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn rank_list(weight_of_upsolve: f64, consider_strict_attendance: bool) -> RankList {
        RankList {
            id: 1,
            tracker_id: 1,
            keyword: String::from("spring-2024"),
            weight_of_upsolve,
            is_active: true,
            consider_strict_attendance,
        }
    }

    fn stat(solve_count: i32, upsolve_count: i32) -> Option<Stat> {
        Some(Stat {
            solve_count,
            upsolve_count,
            participation: true,
        })
    }

    #[test]
    fn test_weighted_aggregation() {
        let inputs = vec![
            EventInput {
                weight: 1.0,
                strict_attendance: false,
                stat: stat(2, 0),
                attended: false,
            },
            EventInput {
                weight: 2.0,
                strict_attendance: false,
                stat: stat(0, 2),
                attended: false,
            },
        ];

        // 1.0 * 2 + 2.0 * (0.5 * 2) = 4
        assert_eq!(compute_score(&rank_list(0.5, false), &inputs), 4.0);
    }

    #[test]
    fn test_strict_attendance_demotes_solves() {
        let inputs = vec![EventInput {
            weight: 1.0,
            strict_attendance: true,
            stat: stat(3, 1),
            attended: false,
        }];

        // Scored as if solve_count = 0, upsolve_count = 4.
        assert_eq!(compute_score(&rank_list(0.5, true), &inputs), 2.0);
    }

    #[test]
    fn test_strict_attendance_spared_by_confirmation() {
        let inputs = vec![EventInput {
            weight: 1.0,
            strict_attendance: true,
            stat: stat(3, 1),
            attended: true,
        }];

        assert_eq!(compute_score(&rank_list(0.5, true), &inputs), 3.5);
    }

    #[test]
    fn test_strict_attendance_ignored_when_ranklist_opts_out() {
        let inputs = vec![EventInput {
            weight: 1.0,
            strict_attendance: true,
            stat: stat(3, 1),
            attended: false,
        }];

        assert_eq!(compute_score(&rank_list(0.5, false), &inputs), 3.5);
    }

    #[test]
    fn test_absent_stat_contributes_nothing() {
        let inputs = vec![
            EventInput {
                weight: 5.0,
                strict_attendance: false,
                stat: None,
                attended: false,
            },
            EventInput {
                weight: 1.0,
                strict_attendance: false,
                stat: stat(1, 0),
                attended: false,
            },
        ];

        assert_eq!(compute_score(&rank_list(0.5, false), &inputs), 1.0);
    }

    #[test]
    fn test_recompute_is_deterministic() {
        let inputs = vec![EventInput {
            weight: 1.5,
            strict_attendance: true,
            stat: stat(4, 2),
            attended: false,
        }];
        let rank_list = rank_list(0.25, true);

        let first = compute_score(&rank_list, &inputs);
        let second = compute_score(&rank_list, &inputs);
        assert_eq!(first, second);
    }
}
