use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use serde::{Deserialize, Serialize};

use crate::schema::challenge as challenge_column;
use crate::schema::challenge;
use crate::schema::challenge::dsl::challenge as challenge_table;
use chrono::prelude::*;

#[derive(Queryable, Clone)]
pub struct Challenge {
    pub id: i32,
    pub language: String,
    pub index_num: i32,
    pub slug: String,
    pub title: String,
    pub difficulty: String,
    pub points: i32,
    pub test_cases_json: String,
    pub is_active: bool,
    pub submission_count: i32,
    pub creation_instant: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    pub input: String,
    pub expected: String,
    #[serde(default)]
    pub hidden: bool,
}

impl Challenge {
    pub fn test_cases(&self) -> Result<Vec<TestCase>, serde_json::Error> {
        serde_json::from_str(&self.test_cases_json)
    }
}

#[derive(Insertable)]
#[diesel(table_name = challenge)]
pub struct NewChallenge<'a> {
    pub language: &'a str,
    pub index_num: i32,
    pub slug: &'a str,
    pub title: &'a str,
    pub difficulty: &'a str,
    pub points: i32,
    pub test_cases_json: String,
    pub is_active: bool,
    pub creation_instant: NaiveDateTime,
}

pub fn insert_challenge(
    connection: &mut SqliteConnection,
    new_challenge: NewChallenge,
) -> QueryResult<Challenge> {
    diesel::insert_into(challenge_table)
        .values(new_challenge)
        .execute(connection)?;
    challenge_table
        .order(challenge_column::id.desc())
        .first(connection)
}

pub fn get_challenge(connection: &mut SqliteConnection, id: i32) -> QueryResult<Option<Challenge>> {
    challenge_table
        .filter(challenge_column::id.eq(id))
        .first::<Challenge>(connection)
        .optional()
}

pub fn get_challenge_by_route(
    connection: &mut SqliteConnection,
    language: &str,
    index_num: i32,
) -> QueryResult<Option<Challenge>> {
    challenge_table
        .filter(challenge_column::language.eq(language))
        .filter(challenge_column::index_num.eq(index_num))
        .first::<Challenge>(connection)
        .optional()
}

// Counters are the only mutable part of a published challenge.
pub fn increment_submission_count(
    connection: &mut SqliteConnection,
    id: i32,
) -> QueryResult<()> {
    diesel::update(challenge_table.filter(challenge_column::id.eq(id)))
        .set(challenge_column::submission_count.eq(challenge_column::submission_count + 1))
        .execute(connection)?;
    Ok(())
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

    fn two_sum(conn: &mut SqliteConnection) -> Challenge {
        insert_challenge(
            conn,
            NewChallenge {
                language: "python.3",
                index_num: 1,
                slug: "two-sum",
                title: "Two Sum",
                difficulty: "easy",
                points: 100,
                test_cases_json: serde_json::to_string(&vec![
                    TestCase {
                        input: "1 2".into(),
                        expected: "3".into(),
                        hidden: false,
                    },
                    TestCase {
                        input: "40 2".into(),
                        expected: "42".into(),
                        hidden: true,
                    },
                ])
                .unwrap(),
                is_active: true,
                creation_instant: Utc::now().naive_utc(),
            },
        )
        .unwrap()
    }

    #[test]
    fn looks_up_by_language_and_index() {
        let mut conn = connection();
        let inserted = two_sum(&mut conn);
        let found = get_challenge_by_route(&mut conn, "python.3", 1).unwrap().unwrap();
        assert_eq!(found.id, inserted.id);
        assert_eq!(found.slug, "two-sum");
        assert!(get_challenge_by_route(&mut conn, "python.3", 2)
            .unwrap()
            .is_none());
    }

    #[test]
    fn decodes_ordered_test_cases() {
        let mut conn = connection();
        let challenge = two_sum(&mut conn);
        let cases = challenge.test_cases().unwrap();
        assert_eq!(cases.len(), 2);
        assert_eq!(cases[0].input, "1 2");
        assert!(cases[1].hidden);
    }

    #[test]
    fn counter_increments() {
        let mut conn = connection();
        let challenge = two_sum(&mut conn);
        increment_submission_count(&mut conn, challenge.id).unwrap();
        increment_submission_count(&mut conn, challenge.id).unwrap();
        let reloaded = get_challenge(&mut conn, challenge.id).unwrap().unwrap();
        assert_eq!(reloaded.submission_count, 2);
    }
}
