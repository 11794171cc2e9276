use crate::{
    modules::judges::{JudgeClient, JudgeError, Platform, Stat, StatRow},
    types::tables::{Event, Member},
};
use anyhow::Result;
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::time::Instant;
use tokio::time::{self, Duration};

/// Page size of the kenkoooo submissions endpoint.
pub const PAGE_SIZE: usize = 500;
/// Safety cap on the number of pages fetched for a single handle.
pub const MAX_PAGES: usize = 1000;

const CONTESTS_URL: &str = "https://kenkoooo.com/atcoder/resources/contests.json";
const SUBMISSIONS_URL: &str = "https://kenkoooo.com/atcoder/atcoder-api/v3/user/submissions";

#[derive(Debug, Clone, Deserialize)]
pub struct ContestInfo {
    pub id: String,
    pub start_epoch_second: i64,
    pub duration_second: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Submission {
    pub id: i64,
    pub epoch_second: i64,
    pub problem_id: String,
    pub contest_id: String,
    pub result: String,
}

/// In-memory cache of the AtCoder Problems contest list. The list is shared
/// by every event in a run, so a fetch failure here aborts the whole run.
pub struct ContestCache {
    url: Url,
    ttl: Duration,
    entries: Option<(Instant, HashMap<String, ContestInfo>)>,
}

impl ContestCache {
    pub fn new(ttl: Duration) -> Self {
        ContestCache {
            url: Url::parse(CONTESTS_URL).unwrap(),
            ttl,
            entries: None,
        }
    }

    /// A cache primed with fixed entries, for callers that already hold the
    /// contest list (tests substitute this for the network).
    pub fn preloaded(contests: Vec<ContestInfo>) -> Self {
        let mut cache = ContestCache::new(Duration::from_secs(2 * 60 * 60));
        cache.entries = Some((
            Instant::now(),
            contests
                .into_iter()
                .map(|contest| (contest.id.clone(), contest))
                .collect(),
        ));
        cache
    }

    /// Looks up one contest, refreshing the list when the cache is empty or
    /// older than the TTL.
    pub async fn resolve(
        &mut self,
        client: &Client,
        contest_id: &str,
    ) -> Result<Option<ContestInfo>> {
        let stale = match &self.entries {
            Some((fetched_at, _)) => fetched_at.elapsed() > self.ttl,
            None => true,
        };

        if stale {
            tracing::info!("retrieving contest list from AtCoder Problems");
            let res = client.get(self.url.clone()).send().await?;
            let contests: Vec<ContestInfo> = res.error_for_status()?.json().await?;
            tracing::info!("{} contests retrieved", contests.len());

            self.entries = Some((
                Instant::now(),
                contests
                    .into_iter()
                    .map(|contest| (contest.id.clone(), contest))
                    .collect(),
            ));
        }

        let (_, entries) = self.entries.as_ref().unwrap();
        Ok(entries.get(contest_id).cloned())
    }
}

/// Extracts the contest id from an event link such as
/// `https://atcoder.jp/contests/abc312`.
pub fn parse_contest_id(event_link: &str) -> Result<String, JudgeError> {
    let unresolvable = || JudgeError::UnresolvableLink(event_link.to_string());

    let url = Url::parse(event_link).map_err(|_| unresolvable())?;
    let segments: Vec<&str> = url
        .path_segments()
        .map(|segments| segments.filter(|segment| !segment.is_empty()).collect())
        .unwrap_or_default();

    segments
        .iter()
        .position(|&segment| segment == "contests")
        .and_then(|position| segments.get(position + 1))
        .map(|id| id.to_string())
        .ok_or_else(unresolvable)
}

/// Drains the paginated submissions endpoint through `fetch_page`, which
/// receives the `from_second` cursor. The cursor advances to the last
/// record's timestamp; since the endpoint is inclusive, overlapping records
/// are deduplicated by submission id. Fetching stops on a short page or
/// after `MAX_PAGES` pages.
pub async fn paginate_submissions<F, Fut>(mut fetch_page: F) -> Result<Vec<Submission>>
where
    F: FnMut(i64) -> Fut,
    Fut: Future<Output = Result<Vec<Submission>>>,
{
    let mut cursor: i64 = 0;
    let mut seen: HashSet<i64> = HashSet::new();
    let mut submissions: Vec<Submission> = Vec::new();

    for _ in 0..MAX_PAGES {
        let page = fetch_page(cursor).await?;
        let full_page = page.len() >= PAGE_SIZE;
        let last_epoch = page.last().map(|submission| submission.epoch_second);

        for submission in page {
            if seen.insert(submission.id) {
                submissions.push(submission);
            }
        }

        match (full_page, last_epoch) {
            (true, Some(epoch)) => cursor = epoch,
            _ => break,
        }
    }

    Ok(submissions)
}

/// Replays one member's submissions against a contest window.
///
/// An `AC` inside the window marks a solve (first occurrence per problem id);
/// any submission inside the window marks participation; an `AC` after the
/// window for a problem not already solved in-window marks an upsolve.
pub fn replay_submissions(submissions: &[Submission], start_epoch: i64, duration: i64) -> Stat {
    let end_epoch = start_epoch + duration;

    let mut ordered: Vec<&Submission> = submissions.iter().collect();
    ordered.sort_by_key(|submission| submission.epoch_second);

    let mut solved: HashSet<&str> = HashSet::new();
    let mut upsolved: HashSet<&str> = HashSet::new();
    let mut participation = false;

    for submission in ordered {
        let t = submission.epoch_second;
        if t >= start_epoch && t <= end_epoch {
            participation = true;
            if submission.result == "AC" {
                solved.insert(submission.problem_id.as_str());
            }
        } else if t > end_epoch
            && submission.result == "AC"
            && !solved.contains(submission.problem_id.as_str())
        {
            upsolved.insert(submission.problem_id.as_str());
        }
    }

    Stat {
        solve_count: solved.len() as i32,
        upsolve_count: upsolved.len() as i32,
        participation,
    }
}

pub struct AtcoderClient {
    url: Url,
    client: Client,
    cache: tokio::sync::Mutex<ContestCache>,
    delay: Duration,
}

impl AtcoderClient {
    pub fn new(cache: ContestCache, delay: Duration) -> Self {
        AtcoderClient {
            url: Url::parse(SUBMISSIONS_URL).unwrap(),
            client: Client::builder()
                .gzip(true)
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap(),
            cache: tokio::sync::Mutex::new(cache),
            delay,
        }
    }

    /// Fetches the full submission history of one handle, one page at a time.
    async fn fetch_user_submissions(&self, handle: &str) -> Result<Vec<Submission>> {
        paginate_submissions(|cursor| async move {
            time::sleep(self.delay).await;
            let from_second = cursor.to_string();
            let res = self
                .client
                .get(self.url.clone())
                .query(&[("user", handle), ("from_second", from_second.as_str())])
                .send()
                .await?;
            let page: Vec<Submission> = res.error_for_status()?.json().await?;
            Ok(page)
        })
        .await
    }
}

#[async_trait]
impl JudgeClient for AtcoderClient {
    async fn fetch_event_stats(
        &self,
        events: &[Event],
        members: &[Member],
    ) -> Result<Vec<StatRow>> {
        // Resolve every event against the shared contest list first; the
        // list is a hard dependency, an unknown contest id is a skip.
        let mut windows: Vec<(&Event, ContestInfo)> = Vec::new();
        for event in events.iter() {
            let contest_id = match parse_contest_id(&event.event_link) {
                Ok(id) => id,
                Err(e) => {
                    tracing::warn!("skipping event {}: {}", event.id, e);
                    continue;
                }
            };

            let mut cache = self.cache.lock().await;
            match cache.resolve(&self.client, &contest_id).await? {
                Some(contest) => windows.push((event, contest)),
                None => {
                    tracing::warn!(
                        "skipping event {}: contest `{}` not found in the contest list",
                        event.id,
                        contest_id
                    );
                }
            }
        }

        // One submission fetch per distinct handle, shared across events.
        let mut histories: HashMap<String, Vec<Submission>> = HashMap::new();
        let mut failed_handles: HashSet<String> = HashSet::new();
        for member in members.iter() {
            let Some(handle) = Platform::Atcoder.handle_of(member) else {
                continue;
            };
            if histories.contains_key(handle) || failed_handles.contains(handle) {
                continue;
            }

            match self.fetch_user_submissions(handle).await {
                Ok(submissions) => {
                    tracing::info!(
                        "fetched {} AtCoder submissions of `{}`",
                        submissions.len(),
                        handle
                    );
                    histories.insert(handle.to_string(), submissions);
                }
                Err(e) => {
                    tracing::warn!("skipping handle `{}`: submissions fetch failed: {:?}", handle, e);
                    failed_handles.insert(handle.to_string());
                }
            }
        }

        let mut rows: Vec<StatRow> = Vec::new();
        for (event, contest) in windows.iter() {
            for member in members.iter() {
                let stat = match Platform::Atcoder.handle_of(member) {
                    None => Stat::absent(),
                    Some(handle) => {
                        let Some(history) = histories.get(handle) else {
                            // Fetch failed for this handle; no partial stats.
                            continue;
                        };
                        let relevant: Vec<Submission> = history
                            .iter()
                            .filter(|submission| submission.contest_id == contest.id)
                            .cloned()
                            .collect();
                        replay_submissions(
                            &relevant,
                            contest.start_epoch_second,
                            contest.duration_second,
                        )
                    }
                };

                rows.push(StatRow {
                    event_id: event.id,
                    user_id: member.id,
                    stat,
                });
            }
        }

        Ok(rows)
    }
}
