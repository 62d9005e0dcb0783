use chrono::prelude::*;
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

use crate::models::submission::{self, STATUS_PASSED};
use crate::models::user;

pub const MAX_LEADERBOARD_ENTRIES: usize = 100;
const LEVEL_BAND_POINTS: i64 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Week,
    Month,
    All,
}

impl Period {
    pub fn parse(value: &str) -> Option<Period> {
        match value {
            "week" => Some(Period::Week),
            "month" => Some(Period::Month),
            "all" => Some(Period::All),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Week => "week",
            Period::Month => "month",
            Period::All => "all",
        }
    }

    pub fn start(&self, now: NaiveDateTime) -> Option<NaiveDateTime> {
        match self {
            Period::Week => Some(now - chrono::Duration::weeks(1)),
            Period::Month => Some(now - chrono::Duration::days(30)),
            Period::All => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LeaderboardEntry {
    pub user_id: i32,
    pub name: String,
    pub total_points: i64,
    pub challenges_completed: usize,
    pub submission_count: usize,
    pub last_activity: NaiveDateTime,
    pub level: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChallengeRanking {
    pub user_id: i32,
    pub name: String,
    pub points_earned: i32,
    pub is_first_solve: bool,
    pub solved_at: NaiveDateTime,
    pub time_wall_ms: i64,
}

pub fn level_for_points(points: i64) -> i32 {
    (points / LEVEL_BAND_POINTS) as i32 + 1
}

struct UserAggregate {
    total_points: i64,
    completed: HashSet<i32>,
    submission_count: usize,
    last_activity: NaiveDateTime,
}

// Always recomputed from the ledger; staleness belongs to the cache wrapping
// the callers.
pub fn global_leaderboard(
    connection: &mut SqliteConnection,
    language: Option<&str>,
    period: Period,
) -> QueryResult<Vec<LeaderboardEntry>> {
    let since = period.start(Utc::now().naive_utc());
    let mut rows = submission::submissions_since(connection, since)?;
    if let Some(language) = language {
        rows.retain(|row| row.language == language);
    }

    let mut by_user: HashMap<i32, UserAggregate> = HashMap::new();
    for row in rows {
        let aggregate = by_user.entry(row.user_id).or_insert(UserAggregate {
            total_points: 0,
            completed: HashSet::new(),
            submission_count: 0,
            last_activity: row.submission_instant,
        });
        aggregate.total_points += i64::from(row.points_earned);
        aggregate.submission_count += 1;
        if row.status == STATUS_PASSED {
            aggregate.completed.insert(row.challenge_id);
        }
        if row.submission_instant > aggregate.last_activity {
            aggregate.last_activity = row.submission_instant;
        }
    }

    let ids: Vec<i32> = by_user.keys().copied().collect();
    let names = user::get_user_names(connection, &ids)?;

    let mut entries: Vec<LeaderboardEntry> = by_user
        .into_iter()
        .map(|(user_id, aggregate)| LeaderboardEntry {
            user_id,
            name: names.get(&user_id).cloned().unwrap_or_default(),
            total_points: aggregate.total_points,
            challenges_completed: aggregate.completed.len(),
            submission_count: aggregate.submission_count,
            last_activity: aggregate.last_activity,
            level: level_for_points(aggregate.total_points),
        })
        .collect();

    // Points descending; on ties the earlier activity ranks first.
    entries.sort_by(|a, b| {
        b.total_points
            .cmp(&a.total_points)
            .then(a.last_activity.cmp(&b.last_activity))
            .then(a.user_id.cmp(&b.user_id))
    });
    entries.truncate(MAX_LEADERBOARD_ENTRIES);
    Ok(entries)
}

// Per-challenge board: first to solve ranks first.
pub fn challenge_leaderboard(
    connection: &mut SqliteConnection,
    challenge_id: i32,
) -> QueryResult<Vec<ChallengeRanking>> {
    let passes = submission::passed_submissions_for_challenge(connection, challenge_id)?;

    let mut seen: HashSet<i32> = HashSet::new();
    let mut rankings: Vec<ChallengeRanking> = Vec::new();
    for row in passes {
        // Ordered ascending, so the first row per user is their earliest pass.
        if !seen.insert(row.user_id) {
            continue;
        }
        rankings.push(ChallengeRanking {
            user_id: row.user_id,
            name: String::new(),
            points_earned: row.points_earned,
            is_first_solve: row.is_first_solve,
            solved_at: row.submission_instant,
            time_wall_ms: row.time_wall_ms,
        });
        if rankings.len() == MAX_LEADERBOARD_ENTRIES {
            break;
        }
    }

    let ids: Vec<i32> = rankings.iter().map(|r| r.user_id).collect();
    let names = user::get_user_names(connection, &ids)?;
    for ranking in &mut rankings {
        if let Some(name) = names.get(&ranking.user_id) {
            ranking.name = name.clone();
        }
    }
    Ok(rankings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::submission::NewSubmission;
    use crate::models::user::{insert_new_user, NewUser};
    use crate::setup::run_migrations;

    fn connection() -> SqliteConnection {
        let mut conn = SqliteConnection::establish(":memory:").expect("in-memory database");
        run_migrations(&mut conn).expect("schema");
        conn
    }

    fn named_user(conn: &mut SqliteConnection, name: &str) -> i32 {
        insert_new_user(
            conn,
            NewUser {
                name,
                password: "pw",
                is_host: false,
            },
        )
        .unwrap()
        .id
    }

    fn record(
        conn: &mut SqliteConnection,
        challenge_id: i32,
        user_id: i32,
        language: &str,
        status: &str,
        points: i32,
        first: bool,
        instant: NaiveDateTime,
    ) {
        submission::insert_submission(
            conn,
            NewSubmission {
                uuid: uuid::Uuid::new_v4().to_string(),
                challenge_id,
                user_id,
                battle_id: None,
                language: language.into(),
                source_text: "print(42)".into(),
                status: status.into(),
                test_results_json: "[]".into(),
                time_wall_ms: 7,
                points_earned: points,
                is_first_solve: first,
                submission_instant: instant,
            },
        )
        .unwrap();
    }

    #[test]
    fn level_banding() {
        assert_eq!(level_for_points(0), 1);
        assert_eq!(level_for_points(499), 1);
        assert_eq!(level_for_points(500), 2);
        assert_eq!(level_for_points(1499), 3);
    }

    #[test]
    fn aggregates_points_distinct_challenges_and_counts() {
        let mut conn = connection();
        let alice = named_user(&mut conn, "alice");
        let now = Utc::now().naive_utc();

        record(&mut conn, 1, alice, "python.3", "failed", 0, false, now - chrono::Duration::minutes(30));
        record(&mut conn, 1, alice, "python.3", STATUS_PASSED, 100, true, now - chrono::Duration::minutes(20));
        // Re-solve of the same challenge: counted as a submission, not a new completion.
        record(&mut conn, 1, alice, "python.3", STATUS_PASSED, 0, false, now - chrono::Duration::minutes(10));
        record(&mut conn, 2, alice, "python.3", STATUS_PASSED, 80, false, now);

        let entries = global_leaderboard(&mut conn, None, Period::All).unwrap();
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.name, "alice");
        assert_eq!(entry.total_points, 180);
        assert_eq!(entry.challenges_completed, 2);
        assert_eq!(entry.submission_count, 4);
        assert_eq!(entry.last_activity, now);
        assert_eq!(entry.level, 1);
    }

    #[test]
    fn orders_by_points_then_earlier_activity() {
        let mut conn = connection();
        let alice = named_user(&mut conn, "alice");
        let bob = named_user(&mut conn, "bob");
        let carol = named_user(&mut conn, "carol");
        let now = Utc::now().naive_utc();

        record(&mut conn, 1, alice, "python.3", STATUS_PASSED, 100, true, now - chrono::Duration::seconds(2));
        record(&mut conn, 1, bob, "python.3", STATUS_PASSED, 80, false, now - chrono::Duration::seconds(1));
        // Carol ties alice on points but acted later.
        record(&mut conn, 2, carol, "python.3", STATUS_PASSED, 100, true, now);

        let entries = global_leaderboard(&mut conn, None, Period::All).unwrap();
        let order: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(order, vec!["alice", "carol", "bob"]);
    }

    #[test]
    fn period_filter_excludes_old_activity() {
        let mut conn = connection();
        let alice = named_user(&mut conn, "alice");
        let bob = named_user(&mut conn, "bob");
        let now = Utc::now().naive_utc();

        record(&mut conn, 1, alice, "python.3", STATUS_PASSED, 100, true, now - chrono::Duration::days(10));
        record(&mut conn, 1, bob, "python.3", STATUS_PASSED, 80, false, now);

        let weekly = global_leaderboard(&mut conn, None, Period::Week).unwrap();
        assert_eq!(weekly.len(), 1);
        assert_eq!(weekly[0].name, "bob");

        let all_time = global_leaderboard(&mut conn, None, Period::All).unwrap();
        assert_eq!(all_time.len(), 2);
        assert_eq!(all_time[0].name, "alice");
    }

    #[test]
    fn language_filter_scopes_the_board() {
        let mut conn = connection();
        let alice = named_user(&mut conn, "alice");
        let bob = named_user(&mut conn, "bob");
        let now = Utc::now().naive_utc();

        record(&mut conn, 1, alice, "python.3", STATUS_PASSED, 100, true, now);
        record(&mut conn, 2, bob, "rust.stable", STATUS_PASSED, 100, true, now);

        let rust_only = global_leaderboard(&mut conn, Some("rust.stable"), Period::All).unwrap();
        assert_eq!(rust_only.len(), 1);
        assert_eq!(rust_only[0].name, "bob");
    }

    #[test]
    fn challenge_board_ranks_earliest_pass_first_and_dedupes() {
        let mut conn = connection();
        let alice = named_user(&mut conn, "alice");
        let bob = named_user(&mut conn, "bob");
        let now = Utc::now().naive_utc();

        record(&mut conn, 1, bob, "python.3", STATUS_PASSED, 80, false, now);
        record(&mut conn, 1, alice, "python.3", STATUS_PASSED, 100, true, now - chrono::Duration::seconds(2));
        // Later re-solve must not move alice down or duplicate her.
        record(&mut conn, 1, alice, "python.3", STATUS_PASSED, 0, false, now + chrono::Duration::seconds(5));

        let board = challenge_leaderboard(&mut conn, 1).unwrap();
        assert_eq!(board.len(), 2);
        assert_eq!(board[0].name, "alice");
        assert!(board[0].is_first_solve);
        assert_eq!(board[1].name, "bob");
        assert_eq!(board[1].points_earned, 80);
    }
}
