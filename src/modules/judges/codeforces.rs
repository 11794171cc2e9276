use crate::{
    modules::judges::{JudgeClient, JudgeError, Platform, Stat, StatRow},
    types::tables::{Event, Member},
};
use anyhow::Result;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Client, Url};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use tokio::time::{self, Duration};

static CONTEST_ID_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"contests?/(\d+)").unwrap());

#[derive(Debug, Deserialize)]
struct StandingsResponse {
    status: String,
    comment: Option<String>,
    result: Option<StandingsResult>,
}

#[derive(Debug, Deserialize)]
pub struct StandingsResult {
    pub rows: Vec<RanklistRow>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RanklistRow {
    pub party: Party,
    pub problem_results: Vec<ProblemResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Party {
    pub members: Vec<PartyMember>,
    pub participant_type: String,
}

#[derive(Debug, Deserialize)]
pub struct PartyMember {
    pub handle: String,
}

#[derive(Debug, Deserialize)]
pub struct ProblemResult {
    pub points: f64,
}

/// Extracts the numeric contest id from an event link such as
/// `https://codeforces.com/contest/1841` or `.../contests/1841`.
pub fn parse_contest_id(event_link: &str) -> Result<i64, JudgeError> {
    CONTEST_ID_PATTERN
        .captures(event_link)
        .and_then(|captures| captures.get(1))
        .and_then(|id| id.as_str().parse::<i64>().ok())
        .ok_or_else(|| JudgeError::UnresolvableLink(event_link.to_string()))
}

/// Derives per-member stats from the standings rows. Handles are keyed
/// case-insensitively; `handles` maps a lowercased handle to a user id.
///
/// A `CONTESTANT` or `OUT_OF_COMPETITION` row is the contest row, a
/// `PRACTICE` row is the upsolve row. A problem slot counts as an upsolve
/// only when it was not already solved in the contest row.
pub fn collect_stats(rows: &[RanklistRow], handles: &HashMap<String, i64>) -> HashMap<i64, Stat> {
    let mut contest_rows: HashMap<i64, &RanklistRow> = HashMap::new();
    let mut practice_rows: HashMap<i64, &RanklistRow> = HashMap::new();

    for row in rows.iter() {
        let Some(member) = row.party.members.first() else {
            continue;
        };
        let Some(&user_id) = handles.get(&member.handle.to_lowercase()) else {
            continue;
        };

        match row.party.participant_type.as_str() {
            "CONTESTANT" | "OUT_OF_COMPETITION" => {
                contest_rows.entry(user_id).or_insert(row);
            }
            "PRACTICE" => {
                practice_rows.entry(user_id).or_insert(row);
            }
            _ => {}
        }
    }

    let mut stats: HashMap<i64, Stat> = HashMap::new();
    for &user_id in handles.values() {
        let solved_slots: HashSet<usize> = contest_rows
            .get(&user_id)
            .map(|row| {
                row.problem_results
                    .iter()
                    .enumerate()
                    .filter(|(_, result)| result.points > 0.0)
                    .map(|(slot, _)| slot)
                    .collect()
            })
            .unwrap_or_default();

        let upsolve_count = practice_rows
            .get(&user_id)
            .map(|row| {
                row.problem_results
                    .iter()
                    .enumerate()
                    .filter(|(slot, result)| result.points > 0.0 && !solved_slots.contains(slot))
                    .count()
            })
            .unwrap_or(0);

        stats.insert(
            user_id,
            Stat {
                solve_count: solved_slots.len() as i32,
                upsolve_count: upsolve_count as i32,
                participation: contest_rows.contains_key(&user_id),
            },
        );
    }

    stats
}

pub struct CodeforcesClient {
    url: Url,
    client: Client,
    delay: Duration,
}

impl CodeforcesClient {
    pub fn new(delay: Duration) -> Self {
        CodeforcesClient {
            url: Url::parse("https://codeforces.com/api/contest.standings").unwrap(),
            client: Client::builder()
                .gzip(true)
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap(),
            delay,
        }
    }

    /// Fetches the standings of one contest for the given handles. Issues a
    /// single batched request with all handles joined by `;`.
    async fn fetch_standings(&self, contest_id: i64, handles: &[&str]) -> Result<StandingsResult> {
        let res = self
            .client
            .get(self.url.clone())
            .query(&[
                ("contestId", contest_id.to_string().as_str()),
                ("showUnofficial", "true"),
                ("handles", handles.join(";").as_str()),
            ])
            .send()
            .await?;

        match res.error_for_status_ref() {
            Ok(_) => {}
            Err(e) => {
                let message = format!("error response returned from Codeforces: {:?}", e);
                tracing::error!(message);
                anyhow::bail!(message)
            }
        };

        let body: StandingsResponse = res.json().await?;
        if body.status != "OK" {
            return Err(JudgeError::ApiError(
                body.comment.unwrap_or(String::from("status was not OK")),
            )
            .into());
        }

        body.result
            .ok_or_else(|| JudgeError::ApiError(String::from("OK response carried no result")).into())
    }
}

#[async_trait]
impl JudgeClient for CodeforcesClient {
    async fn fetch_event_stats(
        &self,
        events: &[Event],
        members: &[Member],
    ) -> Result<Vec<StatRow>> {
        let handles: HashMap<String, i64> = members
            .iter()
            .filter_map(|member| {
                Platform::Codeforces
                    .handle_of(member)
                    .map(|handle| (handle.to_lowercase(), member.id))
            })
            .collect();
        let handle_list: Vec<&str> = handles.keys().map(String::as_str).collect();

        let mut rows: Vec<StatRow> = Vec::new();
        for event in events.iter() {
            let contest_id = match parse_contest_id(&event.event_link) {
                Ok(id) => id,
                Err(e) => {
                    tracing::warn!("skipping event {}: {}", event.id, e);
                    continue;
                }
            };

            let stats = if handle_list.is_empty() {
                HashMap::new()
            } else {
                match self.fetch_standings(contest_id, &handle_list).await {
                    Ok(standings) => collect_stats(&standings.rows, &handles),
                    Err(e) => {
                        tracing::warn!(
                            "skipping event {}: standings fetch failed: {:?}",
                            event.id,
                            e
                        );
                        continue;
                    }
                }
            };

            // Every member gets exactly one row; members without a handle or
            // without a standings row get the zero stat.
            for member in members.iter() {
                rows.push(StatRow {
                    event_id: event.id,
                    user_id: member.id,
                    stat: stats.get(&member.id).copied().unwrap_or_default(),
                });
            }

            tracing::info!(
                "collected Codeforces stats of contest {} for {} members",
                contest_id,
                handles.len()
            );
            time::sleep(self.delay).await;
        }

        Ok(rows)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn row(handle: &str, participant_type: &str, points: &[f64]) -> RanklistRow {
        RanklistRow {
            party: Party {
                members: vec![PartyMember {
                    handle: String::from(handle),
                }],
                participant_type: String::from(participant_type),
            },
            problem_results: points.iter().map(|&points| ProblemResult { points }).collect(),
        }
    }

    #[test]
    fn test_parse_contest_id() {
        assert_eq!(
            parse_contest_id("https://codeforces.com/contest/1841").unwrap(),
            1841
        );
        assert_eq!(
            parse_contest_id("https://codeforces.com/contests/1841").unwrap(),
            1841
        );
        assert!(parse_contest_id("https://codeforces.com/gym").is_err());
    }

    #[test]
    fn test_contest_and_practice_rows_partitioned() {
        let handles = HashMap::from([(String::from("alice"), 1)]);
        let rows = vec![
            row("Alice", "CONTESTANT", &[500.0, 0.0, 0.0]),
            row("Alice", "PRACTICE", &[500.0, 750.0, 0.0]),
        ];

        let stats = collect_stats(&rows, &handles);
        // Slot 0 was solved in contest, so only slot 1 counts as an upsolve.
        assert_eq!(
            stats[&1],
            Stat {
                solve_count: 1,
                upsolve_count: 1,
                participation: true
            }
        );
    }

    #[test]
    fn test_out_of_competition_counts_as_contest() {
        let handles = HashMap::from([(String::from("bob"), 2)]);
        let rows = vec![row("bob", "OUT_OF_COMPETITION", &[0.0, 1000.0])];

        let stats = collect_stats(&rows, &handles);
        assert_eq!(
            stats[&2],
            Stat {
                solve_count: 1,
                upsolve_count: 0,
                participation: true
            }
        );
    }

    #[test]
    fn test_practice_only_is_not_participation() {
        let handles = HashMap::from([(String::from("carol"), 3)]);
        let rows = vec![row("carol", "PRACTICE", &[250.0])];

        let stats = collect_stats(&rows, &handles);
        assert_eq!(
            stats[&3],
            Stat {
                solve_count: 0,
                upsolve_count: 1,
                participation: false
            }
        );
    }

    #[test]
    fn test_unknown_handle_yields_zero_stat() {
        let handles = HashMap::from([(String::from("dave"), 4)]);
        let rows = vec![row("someone_else", "CONTESTANT", &[500.0])];

        let stats = collect_stats(&rows, &handles);
        assert_eq!(stats[&4], Stat::absent());
    }
}
