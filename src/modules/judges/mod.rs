pub mod atcoder;
pub mod codeforces;
pub mod vjudge;

use crate::types::tables::{Event, Member};
use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum JudgeError {
    #[error("could not derive a contest id from event link `{0}`")]
    UnresolvableLink(String),
    #[error("judge API returned an error response: {0}")]
    ApiError(String),
    #[error("automatic score update is disabled for event {0}")]
    AutoUpdateDisabled(i64),
}

/// Per-(event, member) solve facts derived from a judge platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Stat {
    pub solve_count: i32,
    pub upsolve_count: i32,
    pub participation: bool,
}

impl Stat {
    pub fn absent() -> Self {
        Stat::default()
    }
}

/// One pending upsert into the event_user_stats store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatRow {
    pub event_id: i64,
    pub user_id: i64,
    pub stat: Stat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    Codeforces,
    Atcoder,
    Vjudge,
}

impl Platform {
    /// Derives the judge platform from the host of the event link.
    pub fn from_link(link: &str) -> Option<Platform> {
        let url = Url::parse(link).ok()?;
        let host = url.host_str()?;

        if host == "codeforces.com" || host.ends_with(".codeforces.com") {
            Some(Platform::Codeforces)
        } else if host == "atcoder.jp" || host.ends_with(".atcoder.jp") {
            Some(Platform::Atcoder)
        } else if host == "vjudge.net" || host.ends_with(".vjudge.net") {
            Some(Platform::Vjudge)
        } else {
            None
        }
    }

    /// The member's handle on this platform. A missing or blank handle is
    /// absence, not an error; it must never trigger a network call.
    pub fn handle_of<'a>(&self, member: &'a Member) -> Option<&'a str> {
        let handle = match self {
            Platform::Codeforces => member.codeforces_handle.as_deref(),
            Platform::Atcoder => member.atcoder_handle.as_deref(),
            Platform::Vjudge => member.vjudge_handle.as_deref(),
        };
        handle.map(str::trim).filter(|handle| !handle.is_empty())
    }
}

/// Common contract of the outbound judge adapters. Batched over events so
/// that an implementation can share per-handle fetches across events.
#[async_trait]
pub trait JudgeClient {
    async fn fetch_event_stats(&self, events: &[Event], members: &[Member])
        -> Result<Vec<StatRow>>;
}

#[cfg(test)]
mod test {
    use super::*;

    fn member(cf: Option<&str>, ac: Option<&str>, vj: Option<&str>) -> Member {
        Member {
            id: 1,
            username: String::from("alice"),
            codeforces_handle: cf.map(String::from),
            atcoder_handle: ac.map(String::from),
            vjudge_handle: vj.map(String::from),
        }
    }

    #[test]
    fn test_platform_from_link() {
        assert_eq!(
            Platform::from_link("https://codeforces.com/contests/1841"),
            Some(Platform::Codeforces)
        );
        assert_eq!(
            Platform::from_link("https://atcoder.jp/contests/abc312"),
            Some(Platform::Atcoder)
        );
        assert_eq!(
            Platform::from_link("https://vjudge.net/contest/577311"),
            Some(Platform::Vjudge)
        );
        assert_eq!(Platform::from_link("https://example.com/contest/1"), None);
        assert_eq!(Platform::from_link("not a url"), None);
    }

    #[test]
    fn test_blank_handle_is_absent() {
        let member = member(Some("  "), Some("tourist"), None);
        assert_eq!(Platform::Codeforces.handle_of(&member), None);
        assert_eq!(Platform::Atcoder.handle_of(&member), Some("tourist"));
        assert_eq!(Platform::Vjudge.handle_of(&member), None);
    }
}
