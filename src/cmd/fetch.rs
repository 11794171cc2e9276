use crate::{
    cmd::connect_pool,
    modules::{
        judges::{
            atcoder::{AtcoderClient, ContestCache},
            codeforces::CodeforcesClient,
            JudgeClient, Platform,
        },
        stats::StatStore,
    },
    types::tables::{Event, Member},
};
use anyhow::Result;
use clap::Args;
use itertools::Itertools;
use sqlx::{postgres::Postgres, Pool};
use std::collections::HashMap;
use tokio::time::Duration;

#[derive(Debug, Args)]
pub struct FetchArgs {
    /// Event id to fetch stats for; repeatable
    #[arg(long = "event")]
    events: Vec<i64>,
    /// Fetch stats for every event attached to this ranklist
    #[arg(long)]
    ranklist: Option<i64>,
    /// Delay between successive outbound requests, in milliseconds
    #[arg(long, default_value_t = 1000)]
    delay_ms: u64,
}

async fn select_events(pool: &Pool<Postgres>, args: &FetchArgs) -> Result<Vec<Event>> {
    let mut events: Vec<Event> = Vec::new();

    if let Some(rank_list_id) = args.ranklist {
        events.extend(
            sqlx::query_as::<_, Event>(
                r#"
                SELECT "e".*
                FROM "events" AS "e"
                JOIN "event_rank_lists" AS "erl" ON "erl"."event_id" = "e"."id"
                WHERE "erl"."rank_list_id" = $1;
                "#,
            )
            .bind(rank_list_id)
            .fetch_all(pool)
            .await?,
        );
    }

    if !args.events.is_empty() {
        events.extend(
            sqlx::query_as::<_, Event>(r#"SELECT * FROM "events" WHERE "id" = ANY($1);"#)
                .bind(args.events.as_slice())
                .fetch_all(pool)
                .await?,
        );
    }

    Ok(events
        .into_iter()
        .unique_by(|event| event.id)
        .collect())
}

/// Members whose scores depend on the selected events: the union of
/// rank_list_users over every ranklist the events are attached to.
async fn tracked_members(pool: &Pool<Postgres>, event_ids: &[i64]) -> Result<Vec<Member>> {
    let members: Vec<Member> = sqlx::query_as(
        r#"
        SELECT DISTINCT "u".*
        FROM "users" AS "u"
        JOIN "rank_list_users" AS "rlu" ON "rlu"."user_id" = "u"."id"
        JOIN "event_rank_lists" AS "erl" ON "erl"."rank_list_id" = "rlu"."rank_list_id"
        WHERE "erl"."event_id" = ANY($1);
        "#,
    )
    .bind(event_ids)
    .fetch_all(pool)
    .await?;

    Ok(members)
}

pub async fn run(args: FetchArgs) -> Result<()> {
    if args.events.is_empty() && args.ranklist.is_none() {
        anyhow::bail!("nothing to fetch: pass --event or --ranklist");
    }

    let pool = connect_pool().await?;

    let events = select_events(&pool, &args).await?;
    if events.is_empty() {
        anyhow::bail!("no events matched the given scope");
    }

    let event_ids: Vec<i64> = events.iter().map(|event| event.id).collect();
    let members = tracked_members(&pool, &event_ids).await?;
    tracing::info!(
        "fetching stats of {} events for {} tracked members",
        events.len(),
        members.len()
    );
    tracing::debug!(
        "tracked members: {}",
        members.iter().map(|member| member.username.as_str()).join(", ")
    );

    let delay = Duration::from_millis(args.delay_ms);
    let store = StatStore::new(&pool);

    let by_platform: HashMap<Platform, Vec<Event>> = events
        .into_iter()
        .filter_map(|event| {
            let platform = Platform::from_link(&event.event_link);
            if platform.is_none() {
                tracing::warn!(
                    "skipping event {}: unknown judge platform for `{}`",
                    event.id,
                    event.event_link
                );
            }
            platform.map(|platform| (platform, event))
        })
        .into_group_map();

    for (platform, group) in by_platform.iter() {
        match platform {
            Platform::Codeforces => {
                let client = CodeforcesClient::new(delay);
                let rows = client.fetch_event_stats(group, &members).await?;
                store.upsert_all(&rows).await?;
            }
            Platform::Atcoder => {
                let cache = ContestCache::new(Duration::from_secs(2 * 60 * 60));
                let client = AtcoderClient::new(cache, delay);
                let rows = client.fetch_event_stats(group, &members).await?;
                store.upsert_all(&rows).await?;
            }
            Platform::Vjudge => {
                tracing::info!(
                    "{} VJudge events skipped: their stats arrive via `push`",
                    group.len()
                );
            }
        }
    }

    Ok(())
}
