use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

pub const BATTLE_PARTICIPATION_POINTS: i32 = 10;

#[derive(Debug, Clone, Copy, Default)]
pub struct PriorPasses {
    pub challenge_has_passed: bool,
    pub user_has_passed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreOutcome {
    pub points: i32,
    pub is_first_solve: bool,
}

// Awards for a persistent challenge. The caller must read `prior` and append
// the submission inside the same per-challenge critical section, or two
// concurrent passes can both observe an unsolved challenge.
pub fn score_challenge(challenge_points: i32, passed: bool, prior: PriorPasses) -> ScoreOutcome {
    if !passed {
        return ScoreOutcome {
            points: 0,
            is_first_solve: false,
        };
    }
    if prior.user_has_passed {
        // Re-solving is recorded but never re-awarded.
        return ScoreOutcome {
            points: 0,
            is_first_solve: false,
        };
    }
    if !prior.challenge_has_passed {
        return ScoreOutcome {
            points: challenge_points,
            is_first_solve: true,
        };
    }
    ScoreOutcome {
        points: challenge_points * 4 / 5,
        is_first_solve: false,
    }
}

// Timed battles rank passing attempts by submission order instead.
pub fn score_battle(passed: bool, passing_rank: i64) -> i32 {
    if !passed {
        return BATTLE_PARTICIPATION_POINTS;
    }
    match passing_rank {
        1 => 200,
        2 => 150,
        3 => 100,
        _ => 50,
    }
}

// One async mutex per scoring scope. Guards the check-then-append window;
// valid for a single-instance deployment only.
pub struct SubmissionLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl SubmissionLocks {
    pub fn new() -> SubmissionLocks {
        SubmissionLocks {
            locks: DashMap::new(),
        }
    }

    pub fn challenge(&self, challenge_id: i32) -> Arc<Mutex<()>> {
        self.scope(format!("challenge:{}", challenge_id))
    }

    pub fn battle(&self, battle_id: i32) -> Arc<Mutex<()>> {
        self.scope(format!("battle:{}", battle_id))
    }

    fn scope(&self, key: String) -> Arc<Mutex<()>> {
        self.locks.entry(key).or_default().clone()
    }
}

impl Default for SubmissionLocks {
    fn default() -> Self {
        SubmissionLocks::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::submission::{self, NewSubmission, STATUS_PASSED};
    use chrono::prelude::*;
    use diesel::prelude::*;
    use diesel::r2d2::ConnectionManager;
    use diesel::sqlite::SqliteConnection;
    use futures::future::join_all;

    #[test]
    fn failed_attempts_earn_nothing() {
        let outcome = score_challenge(100, false, PriorPasses::default());
        assert_eq!(
            outcome,
            ScoreOutcome {
                points: 0,
                is_first_solve: false
            }
        );
    }

    #[test]
    fn first_pass_takes_full_points() {
        let outcome = score_challenge(100, true, PriorPasses::default());
        assert_eq!(
            outcome,
            ScoreOutcome {
                points: 100,
                is_first_solve: true
            }
        );
    }

    #[test]
    fn later_passes_take_eighty_percent_floored() {
        let prior = PriorPasses {
            challenge_has_passed: true,
            user_has_passed: false,
        };
        assert_eq!(score_challenge(100, true, prior).points, 80);
        // floor(75 * 0.8) = 60, floor(99 * 0.8) = 79
        assert_eq!(score_challenge(75, true, prior).points, 60);
        assert_eq!(score_challenge(99, true, prior).points, 79);
        assert!(!score_challenge(100, true, prior).is_first_solve);
    }

    #[test]
    fn repeat_pass_by_same_user_earns_zero() {
        let prior = PriorPasses {
            challenge_has_passed: true,
            user_has_passed: true,
        };
        assert_eq!(
            score_challenge(100, true, prior),
            ScoreOutcome {
                points: 0,
                is_first_solve: false
            }
        );
    }

    #[test]
    fn battle_rank_table() {
        assert_eq!(score_battle(true, 1), 200);
        assert_eq!(score_battle(true, 2), 150);
        assert_eq!(score_battle(true, 3), 100);
        assert_eq!(score_battle(true, 4), 50);
        assert_eq!(score_battle(true, 17), 50);
        assert_eq!(score_battle(false, 1), BATTLE_PARTICIPATION_POINTS);
    }

    #[test]
    fn locks_are_shared_per_scope() {
        let locks = SubmissionLocks::new();
        let a = locks.challenge(1);
        let b = locks.challenge(1);
        let c = locks.challenge(2);
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert!(!Arc::ptr_eq(&a, &locks.battle(1)));
    }

    async fn scored_attempt(
        pool: r2d2::Pool<ConnectionManager<SqliteConnection>>,
        locks: Arc<SubmissionLocks>,
        challenge_id: i32,
        user_id: i32,
    ) -> ScoreOutcome {
        let lock = locks.challenge(challenge_id);
        let _guard = lock.lock().await;
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get().unwrap();
            conn.immediate_transaction(|conn| {
                let prior = PriorPasses {
                    challenge_has_passed: submission::find_passed_for(conn, challenge_id)?
                        .is_some(),
                    user_has_passed: submission::user_has_passed(conn, challenge_id, user_id)?,
                };
                let outcome = score_challenge(100, true, prior);
                submission::insert_submission(
                    conn,
                    NewSubmission {
                        uuid: uuid::Uuid::new_v4().to_string(),
                        challenge_id,
                        user_id,
                        battle_id: None,
                        language: "python.3".into(),
                        source_text: "print(42)".into(),
                        status: STATUS_PASSED.into(),
                        test_results_json: "[]".into(),
                        time_wall_ms: 5,
                        points_earned: outcome.points,
                        is_first_solve: outcome.is_first_solve,
                        submission_instant: Utc::now().naive_utc(),
                    },
                )?;
                Ok::<_, diesel::result::Error>(outcome)
            })
            .unwrap()
        })
        .await
        .unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_passes_elect_exactly_one_first_solver() {
        let database_path = std::env::temp_dir().join(format!(
            "kodbatalo-scoring-{}.db",
            uuid::Uuid::new_v4()
        ));
        let manager =
            ConnectionManager::<SqliteConnection>::new(database_path.to_str().unwrap());
        let pool = r2d2::Pool::builder().max_size(4).build(manager).unwrap();
        crate::setup::run_migrations(&mut pool.get().unwrap()).unwrap();

        let locks = Arc::new(SubmissionLocks::new());
        let attempts = (0..8).map(|user_id| {
            let pool = pool.clone();
            let locks = locks.clone();
            tokio::spawn(async move { scored_attempt(pool, locks, 1, user_id).await })
        });

        let outcomes: Vec<ScoreOutcome> = join_all(attempts)
            .await
            .into_iter()
            .map(|handle| handle.unwrap())
            .collect();

        let first_solves = outcomes.iter().filter(|o| o.is_first_solve).count();
        assert_eq!(first_solves, 1);
        assert_eq!(outcomes.iter().filter(|o| o.points == 100).count(), 1);
        assert_eq!(outcomes.iter().filter(|o| o.points == 80).count(), 7);

        let _ = std::fs::remove_file(&database_path);
    }
}
