use crate::schema::submission as submission_column;
use crate::schema::submission;
use crate::schema::submission::dsl::submission as submission_table;
use chrono::prelude::*;
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;

pub const STATUS_PASSED: &str = "passed";

// Append-only ledger: a submission is inserted fully graded and never updated.
#[derive(Queryable, Clone)]
pub struct Submission {
    pub uuid: String,
    pub challenge_id: i32,
    pub user_id: i32,
    pub battle_id: Option<i32>,
    pub language: String,
    pub source_text: String,
    pub status: String,
    pub test_results_json: String,
    pub time_wall_ms: i64,
    pub points_earned: i32,
    pub is_first_solve: bool,
    pub submission_instant: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = submission)]
pub struct NewSubmission {
    pub uuid: String,
    pub challenge_id: i32,
    pub user_id: i32,
    pub battle_id: Option<i32>,
    pub language: String,
    pub source_text: String,
    pub status: String,
    pub test_results_json: String,
    pub time_wall_ms: i64,
    pub points_earned: i32,
    pub is_first_solve: bool,
    pub submission_instant: NaiveDateTime,
}

pub fn insert_submission(
    connection: &mut SqliteConnection,
    new_submission: NewSubmission,
) -> QueryResult<()> {
    diesel::insert_into(submission_table)
        .values(new_submission)
        .execute(connection)?;
    Ok(())
}

// Earliest passing submission across all users, if any. Battle submissions
// score in their own scope and must not claim the persistent first solve.
pub fn find_passed_for(
    connection: &mut SqliteConnection,
    challenge_id: i32,
) -> QueryResult<Option<Submission>> {
    submission_table
        .filter(submission_column::challenge_id.eq(challenge_id))
        .filter(submission_column::battle_id.is_null())
        .filter(submission_column::status.eq(STATUS_PASSED))
        .order(submission_column::submission_instant.asc())
        .first::<Submission>(connection)
        .optional()
}

// Persistent-path pass check; a battle pass doesn't count against the user
// here either.
pub fn user_has_passed(
    connection: &mut SqliteConnection,
    challenge_id: i32,
    user_id: i32,
) -> QueryResult<bool> {
    let count: i64 = submission_table
        .filter(submission_column::challenge_id.eq(challenge_id))
        .filter(submission_column::user_id.eq(user_id))
        .filter(submission_column::battle_id.is_null())
        .filter(submission_column::status.eq(STATUS_PASSED))
        .count()
        .get_result(connection)?;
    Ok(count > 0)
}

pub fn passed_submissions_for_challenge(
    connection: &mut SqliteConnection,
    challenge_id: i32,
) -> QueryResult<Vec<Submission>> {
    submission_table
        .filter(submission_column::challenge_id.eq(challenge_id))
        .filter(submission_column::status.eq(STATUS_PASSED))
        .order(submission_column::submission_instant.asc())
        .load::<Submission>(connection)
}

pub fn submissions_for_challenge_since(
    connection: &mut SqliteConnection,
    challenge_id: i32,
    since: NaiveDateTime,
) -> QueryResult<Vec<Submission>> {
    submission_table
        .filter(submission_column::challenge_id.eq(challenge_id))
        .filter(submission_column::submission_instant.ge(since))
        .order(submission_column::submission_instant.desc())
        .load::<Submission>(connection)
}

pub fn submissions_since(
    connection: &mut SqliteConnection,
    since: Option<NaiveDateTime>,
) -> QueryResult<Vec<Submission>> {
    match since {
        Some(since) => submission_table
            .filter(submission_column::submission_instant.ge(since))
            .load::<Submission>(connection),
        None => submission_table.load::<Submission>(connection),
    }
}

pub fn submissions_for_battle(
    connection: &mut SqliteConnection,
    battle_id: i32,
) -> QueryResult<Vec<Submission>> {
    submission_table
        .filter(submission_column::battle_id.eq(battle_id))
        .order(submission_column::submission_instant.asc())
        .load::<Submission>(connection)
}

pub fn get_submissions_by_user(
    connection: &mut SqliteConnection,
    user_id: i32,
) -> QueryResult<Vec<Submission>> {
    submission_table
        .filter(submission_column::user_id.eq(user_id))
        .order(submission_column::submission_instant.desc())
        .load::<Submission>(connection)
}

// Host moderation: drop a user's activity for one challenge.
pub fn delete_for_user_challenge(
    connection: &mut SqliteConnection,
    challenge_id: i32,
    user_id: i32,
) -> QueryResult<usize> {
    diesel::delete(
        submission_table
            .filter(submission_column::challenge_id.eq(challenge_id))
            .filter(submission_column::user_id.eq(user_id)),
    )
    .execute(connection)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::setup::run_migrations;

    fn connection() -> SqliteConnection {
        let mut conn = SqliteConnection::establish(":memory:").expect("in-memory database");
        run_migrations(&mut conn).expect("schema");
        conn
    }

    fn graded(
        challenge_id: i32,
        user_id: i32,
        status: &str,
        points: i32,
        instant: NaiveDateTime,
    ) -> NewSubmission {
        NewSubmission {
            uuid: uuid::Uuid::new_v4().to_string(),
            challenge_id,
            user_id,
            battle_id: None,
            language: "python.3".into(),
            source_text: "print(42)".into(),
            status: status.into(),
            test_results_json: "[]".into(),
            time_wall_ms: 5,
            points_earned: points,
            is_first_solve: false,
            submission_instant: instant,
        }
    }

    #[test]
    fn find_passed_for_returns_earliest_pass() {
        let mut conn = connection();
        let t0 = Utc::now().naive_utc();
        insert_submission(&mut conn, graded(1, 10, "failed", 0, t0)).unwrap();
        assert!(find_passed_for(&mut conn, 1).unwrap().is_none());

        insert_submission(
            &mut conn,
            graded(1, 11, STATUS_PASSED, 80, t0 + chrono::Duration::seconds(10)),
        )
        .unwrap();
        insert_submission(
            &mut conn,
            graded(1, 12, STATUS_PASSED, 100, t0 + chrono::Duration::seconds(5)),
        )
        .unwrap();

        let first = find_passed_for(&mut conn, 1).unwrap().unwrap();
        assert_eq!(first.user_id, 12);
    }

    #[test]
    fn battle_passes_do_not_touch_persistent_first_solve_state() {
        let mut conn = connection();
        let now = Utc::now().naive_utc();
        let mut battle_pass = graded(1, 10, STATUS_PASSED, 200, now);
        battle_pass.battle_id = Some(7);
        insert_submission(&mut conn, battle_pass).unwrap();

        // The challenge is still unsolved on the persistent path, and the
        // battle winner isn't locked out of it.
        assert!(find_passed_for(&mut conn, 1).unwrap().is_none());
        assert!(!user_has_passed(&mut conn, 1, 10).unwrap());

        insert_submission(
            &mut conn,
            graded(1, 10, STATUS_PASSED, 100, now + chrono::Duration::seconds(1)),
        )
        .unwrap();
        assert_eq!(find_passed_for(&mut conn, 1).unwrap().unwrap().user_id, 10);
        assert!(user_has_passed(&mut conn, 1, 10).unwrap());
    }

    #[test]
    fn user_pass_check_ignores_failures_and_other_users() {
        let mut conn = connection();
        let now = Utc::now().naive_utc();
        insert_submission(&mut conn, graded(1, 10, "failed", 0, now)).unwrap();
        insert_submission(&mut conn, graded(1, 11, STATUS_PASSED, 100, now)).unwrap();
        insert_submission(&mut conn, graded(2, 10, STATUS_PASSED, 100, now)).unwrap();

        assert!(!user_has_passed(&mut conn, 1, 10).unwrap());
        assert!(user_has_passed(&mut conn, 1, 11).unwrap());
    }

    #[test]
    fn windowed_listing_is_bounded_and_most_recent_first() {
        let mut conn = connection();
        let now = Utc::now().naive_utc();
        let since = now - chrono::Duration::seconds(1800);
        insert_submission(
            &mut conn,
            graded(1, 10, "failed", 0, now - chrono::Duration::seconds(2000)),
        )
        .unwrap();
        insert_submission(
            &mut conn,
            graded(1, 11, "failed", 0, now - chrono::Duration::seconds(100)),
        )
        .unwrap();
        insert_submission(
            &mut conn,
            graded(1, 12, STATUS_PASSED, 80, now - chrono::Duration::seconds(50)),
        )
        .unwrap();

        let rows = submissions_for_challenge_since(&mut conn, 1, since).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].user_id, 12);
        assert_eq!(rows[1].user_id, 11);
    }

    #[test]
    fn moderation_delete_only_touches_one_user_and_challenge() {
        let mut conn = connection();
        let now = Utc::now().naive_utc();
        insert_submission(&mut conn, graded(1, 10, "failed", 0, now)).unwrap();
        insert_submission(&mut conn, graded(1, 10, STATUS_PASSED, 100, now)).unwrap();
        insert_submission(&mut conn, graded(1, 11, STATUS_PASSED, 80, now)).unwrap();
        insert_submission(&mut conn, graded(2, 10, STATUS_PASSED, 100, now)).unwrap();

        let removed = delete_for_user_challenge(&mut conn, 1, 10).unwrap();
        assert_eq!(removed, 2);
        assert!(user_has_passed(&mut conn, 1, 11).unwrap());
        assert!(user_has_passed(&mut conn, 2, 10).unwrap());
    }
}
