use chrono::{DateTime, Utc};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow)]
pub struct Event {
    pub id: i64,
    pub title: String,
    pub event_link: String,
    pub starting_at: DateTime<Utc>,
    pub ending_at: DateTime<Utc>,
    pub strict_attendance: bool,
    pub auto_update_score: bool,
    pub open_for_attendance: bool,
}

#[derive(Debug, Clone, FromRow)]
pub struct Member {
    pub id: i64,
    pub username: String,
    pub codeforces_handle: Option<String>,
    pub atcoder_handle: Option<String>,
    pub vjudge_handle: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct RankList {
    pub id: i64,
    pub tracker_id: i64,
    pub keyword: String,
    pub weight_of_upsolve: f64,
    pub is_active: bool,
    pub consider_strict_attendance: bool,
}

#[derive(Debug, Clone, FromRow)]
pub struct RankListUser {
    pub rank_list_id: i64,
    pub user_id: i64,
    pub score: f64,
}

#[derive(Debug, Clone, FromRow)]
pub struct EventUserStat {
    pub event_id: i64,
    pub user_id: i64,
    pub solve_count: i32,
    pub upsolve_count: i32,
    pub participation: bool,
}
