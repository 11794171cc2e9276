use crate::{
    modules::judges::{JudgeError, Platform, Stat, StatRow},
    types::tables::{Event, Member},
};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};

/// Inbound VJudge contest payload. Participants and submissions arrive as
/// positional JSON arrays.
#[derive(Debug, Deserialize)]
pub struct ContestPayload {
    /// Contest length in milliseconds.
    pub length: i64,
    /// participant id -> [handle, display name]
    pub participants: HashMap<String, (String, String)>,
    pub submissions: Vec<PushSubmission>,
}

/// `[participant_id, problem_index, verdict, offset_seconds]`
#[derive(Debug, Clone, Deserialize)]
pub struct PushSubmission(pub i64, pub i64, pub i64, pub i64);

impl PushSubmission {
    pub fn participant_id(&self) -> i64 {
        self.0
    }
    pub fn problem_index(&self) -> i64 {
        self.1
    }
    pub fn accepted(&self) -> bool {
        self.2 == 1
    }
    pub fn offset_seconds(&self) -> i64 {
        self.3
    }
}

/// Derives per-member stats from a contest payload. `members_by_handle` maps
/// a lowercased VJudge handle to a user id; participants without a tracked
/// handle are ignored.
pub fn classify_payload(
    payload: &ContestPayload,
    members_by_handle: &HashMap<String, i64>,
) -> HashMap<i64, Stat> {
    let length_seconds = payload.length / 1000;

    let participant_users: HashMap<i64, i64> = payload
        .participants
        .iter()
        .filter_map(|(participant_id, (handle, _))| {
            let participant_id = participant_id.parse::<i64>().ok()?;
            let user_id = members_by_handle.get(&handle.to_lowercase())?;
            Some((participant_id, *user_id))
        })
        .collect();

    let mut solved: HashMap<i64, HashSet<i64>> = HashMap::new();
    let mut participated: HashSet<i64> = HashSet::new();

    // First pass: in-contest accepts and participation.
    for submission in payload.submissions.iter() {
        let Some(&user_id) = participant_users.get(&submission.participant_id()) else {
            continue;
        };
        if submission.offset_seconds() <= length_seconds {
            participated.insert(user_id);
            if submission.accepted() {
                solved.entry(user_id).or_default().insert(submission.problem_index());
            }
        }
    }

    // Second pass: upsolves, never for a problem already solved in-contest.
    let mut upsolved: HashMap<i64, HashSet<i64>> = HashMap::new();
    for submission in payload.submissions.iter() {
        let Some(&user_id) = participant_users.get(&submission.participant_id()) else {
            continue;
        };
        if submission.accepted() && submission.offset_seconds() > length_seconds {
            let already_solved = solved
                .get(&user_id)
                .map(|problems| problems.contains(&submission.problem_index()))
                .unwrap_or(false);
            if !already_solved {
                upsolved.entry(user_id).or_default().insert(submission.problem_index());
            }
        }
    }

    let mut stats: HashMap<i64, Stat> = HashMap::new();
    for &user_id in participant_users.values() {
        stats.insert(
            user_id,
            Stat {
                solve_count: solved.get(&user_id).map(HashSet::len).unwrap_or(0) as i32,
                upsolve_count: upsolved.get(&user_id).map(HashSet::len).unwrap_or(0) as i32,
                participation: participated.contains(&user_id),
            },
        );
    }

    stats
}

/// Turns an inbound payload into stat rows for every given member.
///
/// Rejected outright, with no rows produced, when the event does not accept
/// externally-pushed updates.
pub fn process_push(
    event: &Event,
    payload: &ContestPayload,
    members: &[Member],
) -> Result<Vec<StatRow>, JudgeError> {
    if !event.auto_update_score {
        return Err(JudgeError::AutoUpdateDisabled(event.id));
    }

    let members_by_handle: HashMap<String, i64> = members
        .iter()
        .filter_map(|member| {
            Platform::Vjudge
                .handle_of(member)
                .map(|handle| (handle.to_lowercase(), member.id))
        })
        .collect();

    let stats = classify_payload(payload, &members_by_handle);

    Ok(members
        .iter()
        .map(|member| StatRow {
            event_id: event.id,
            user_id: member.id,
            stat: stats.get(&member.id).copied().unwrap_or_default(),
        })
        .collect())
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn event(auto_update_score: bool) -> Event {
        Event {
            id: 7,
            title: String::from("Weekly Contest"),
            event_link: String::from("https://vjudge.net/contest/577311"),
            starting_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            ending_at: Utc.timestamp_opt(1_700_010_800, 0).unwrap(),
            strict_attendance: false,
            auto_update_score,
            open_for_attendance: true,
        }
    }

    fn member(id: i64, handle: Option<&str>) -> Member {
        Member {
            id,
            username: format!("user{}", id),
            codeforces_handle: None,
            atcoder_handle: None,
            vjudge_handle: handle.map(String::from),
        }
    }

    fn payload(submissions: Vec<PushSubmission>) -> ContestPayload {
        ContestPayload {
            length: 7_200_000,
            participants: HashMap::from([(
                String::from("101"),
                (String::from("Alice_VJ"), String::from("Alice")),
            )]),
            submissions,
        }
    }

    #[test]
    fn test_push_rejected_when_auto_update_disabled() {
        let result = process_push(
            &event(false),
            &payload(vec![PushSubmission(101, 0, 1, 60)]),
            &[member(1, Some("alice_vj"))],
        );
        assert!(matches!(result, Err(JudgeError::AutoUpdateDisabled(7))));
    }

    #[test]
    fn test_in_contest_and_upsolve_classification() {
        // length is 7200s: offsets 60 and 7200 are in-contest, 7201 is not.
        let rows = process_push(
            &event(true),
            &payload(vec![
                PushSubmission(101, 0, 1, 60),
                PushSubmission(101, 1, 1, 7_200),
                PushSubmission(101, 2, 1, 7_201),
            ]),
            &[member(1, Some("alice_vj"))],
        )
        .unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(
            rows[0].stat,
            Stat {
                solve_count: 2,
                upsolve_count: 1,
                participation: true
            }
        );
    }

    #[test]
    fn test_upsolve_of_solved_problem_not_counted_twice() {
        let rows = process_push(
            &event(true),
            &payload(vec![
                PushSubmission(101, 0, 1, 60),
                PushSubmission(101, 0, 1, 9_000),
            ]),
            &[member(1, Some("alice_vj"))],
        )
        .unwrap();

        assert_eq!(
            rows[0].stat,
            Stat {
                solve_count: 1,
                upsolve_count: 0,
                participation: true
            }
        );
    }

    #[test]
    fn test_rejected_submission_still_counts_as_participation() {
        let rows = process_push(
            &event(true),
            &payload(vec![PushSubmission(101, 0, 0, 60)]),
            &[member(1, Some("alice_vj"))],
        )
        .unwrap();

        assert_eq!(
            rows[0].stat,
            Stat {
                solve_count: 0,
                upsolve_count: 0,
                participation: true
            }
        );
    }

    #[test]
    fn test_unmatched_member_gets_zero_row() {
        let rows = process_push(
            &event(true),
            &payload(vec![PushSubmission(101, 0, 1, 60)]),
            &[member(1, Some("alice_vj")), member(2, None)],
        )
        .unwrap();

        assert_eq!(rows.len(), 2);
        let unmatched = rows.iter().find(|row| row.user_id == 2).unwrap();
        assert_eq!(unmatched.stat, Stat::absent());
    }

    #[test]
    fn test_payload_deserializes_from_wire_shape() {
        let raw = r#"{
            "length": 7200000,
            "participants": {"101": ["Alice_VJ", "Alice"]},
            "submissions": [[101, 0, 1, 60], [101, 1, 0, 90]]
        }"#;

        let payload: ContestPayload = serde_json::from_str(raw).unwrap();
        assert_eq!(payload.length, 7_200_000);
        assert_eq!(payload.submissions.len(), 2);
        assert!(payload.submissions[0].accepted());
        assert!(!payload.submissions[1].accepted());
    }
}
