use crate::{
    cmd::connect_pool,
    modules::{judges::vjudge::{self, ContestPayload}, stats::StatStore},
    types::tables::{Event, Member},
};
use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use tokio::io::AsyncReadExt;

#[derive(Debug, Args)]
pub struct PushArgs {
    /// Event the payload belongs to
    #[arg(long)]
    event: i64,
    /// Path to the payload JSON; read from stdin when omitted
    #[arg(long)]
    file: Option<PathBuf>,
}

async fn read_payload(file: Option<PathBuf>) -> Result<ContestPayload> {
    let raw = match file {
        Some(path) => tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("failed to read payload from {}", path.display()))?,
        None => {
            let mut raw = String::new();
            tokio::io::stdin()
                .read_to_string(&mut raw)
                .await
                .context("failed to read payload from stdin")?;
            raw
        }
    };

    serde_json::from_str(&raw).context("payload is not a valid VJudge contest document")
}

pub async fn run(args: PushArgs) -> Result<()> {
    let pool = connect_pool().await?;

    let event: Event = sqlx::query_as(r#"SELECT * FROM "events" WHERE "id" = $1;"#)
        .bind(args.event)
        .fetch_optional(&pool)
        .await?
        .with_context(|| format!("event {} not found", args.event))?;

    let payload = read_payload(args.file).await?;

    let members: Vec<Member> = sqlx::query_as(
        r#"
        SELECT DISTINCT "u".*
        FROM "users" AS "u"
        JOIN "rank_list_users" AS "rlu" ON "rlu"."user_id" = "u"."id"
        JOIN "event_rank_lists" AS "erl" ON "erl"."rank_list_id" = "rlu"."rank_list_id"
        WHERE "erl"."event_id" = $1;
        "#,
    )
    .bind(args.event)
    .fetch_all(&pool)
    .await?;

    // The auto-update gate surfaces as a hard error with no store mutation.
    let rows = vjudge::process_push(&event, &payload, &members)?;

    if rows.is_empty() {
        tracing::warn!(
            "event {} is not attached to any ranklist; nothing to record",
            event.id
        );
        return Ok(());
    }

    StatStore::new(&pool).upsert_all(&rows).await?;
    tracing::info!(
        "recorded VJudge stats of event `{}` for {} members",
        event.title,
        rows.len()
    );

    Ok(())
}
