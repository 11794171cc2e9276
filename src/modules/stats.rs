use crate::{modules::judges::{Stat, StatRow}, types::tables::EventUserStat};
use anyhow::Result;
use sqlx::{postgres::Postgres, Pool};
use std::collections::HashMap;

/// Canonical store of the per-(event, user) solve facts. Adapters and the
/// push handler write exclusively through here; writes are keyed upserts, so
/// replaying the same rows leaves the table unchanged.
pub struct StatStore<'a> {
    pool: &'a Pool<Postgres>,
}

impl<'a> StatStore<'a> {
    pub fn new(pool: &'a Pool<Postgres>) -> Self {
        StatStore { pool }
    }

    pub async fn upsert_all(&self, rows: &[StatRow]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for row in rows.iter() {
            let result = sqlx::query(
                r#"
                MERGE INTO "event_user_stats"
                USING
                    (VALUES($1, $2, $3, $4, $5)) AS "stat"("event_id", "user_id", "solve_count", "upsolve_count", "participation")
                ON
                    "event_user_stats"."event_id" = "stat"."event_id"
                    AND "event_user_stats"."user_id" = "stat"."user_id"
                WHEN MATCHED THEN
                    UPDATE SET (
                        "solve_count",
                        "upsolve_count",
                        "participation"
                    ) = (
                        "stat"."solve_count",
                        "stat"."upsolve_count",
                        "stat"."participation"
                    )
                WHEN NOT MATCHED THEN
                    INSERT ("event_id", "user_id", "solve_count", "upsolve_count", "participation")
                    VALUES ("stat"."event_id", "stat"."user_id", "stat"."solve_count", "stat"."upsolve_count", "stat"."participation");
                "#,
            )
            .bind(row.event_id)
            .bind(row.user_id)
            .bind(row.stat.solve_count)
            .bind(row.stat.upsolve_count)
            .bind(row.stat.participation)
            .execute(&mut tx)
            .await;

            if let Err(e) = result {
                let message = format!(
                    "an error occurred at saving stat for event {} user {}: {:?}",
                    row.event_id, row.user_id, e
                );
                tracing::error!(message);
                tx.rollback().await?;
                anyhow::bail!(message);
            }
        }

        tx.commit().await?;
        tracing::info!("{} stat rows successfully saved", rows.len());

        Ok(())
    }

    /// Stats of one member over a set of events, keyed by event id. Events
    /// without a row are simply absent from the map.
    pub async fn load_for_member(
        &self,
        event_ids: &[i64],
        user_id: i64,
    ) -> Result<HashMap<i64, Stat>> {
        let rows: Vec<EventUserStat> = sqlx::query_as(
            r#"
            SELECT "event_id", "user_id", "solve_count", "upsolve_count", "participation"
            FROM "event_user_stats"
            WHERE "event_id" = ANY($1) AND "user_id" = $2;
            "#,
        )
        .bind(event_ids)
        .bind(user_id)
        .fetch_all(self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                (
                    row.event_id,
                    Stat {
                        solve_count: row.solve_count,
                        upsolve_count: row.upsolve_count,
                        participation: row.participation,
                    },
                )
            })
            .collect())
    }
}
