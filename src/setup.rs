use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::ConnectionManager;
use diesel::sqlite::SqliteConnection;
use dotenv::dotenv;
use log::{info, warn};
use std::env;
use std::time::Duration;

use crate::grading::DEFAULT_SANDBOX_TIMEOUT_MS;
use crate::models::user;
use crate::models::user::NewUser;

pub type DbPool = r2d2::Pool<ConnectionManager<SqliteConnection>>;

pub struct Config {
    pub database_url: String,
    pub bind_address: String,
    pub sandbox_url: String,
    pub sandbox_timeout: Duration,
    pub session_secret: Option<String>,
}

impl Config {
    pub fn from_env() -> Config {
        let sandbox_timeout_ms = env::var("SANDBOX_TIMEOUT_MS")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(DEFAULT_SANDBOX_TIMEOUT_MS);
        Config {
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "kodbatalo.db".into()),
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "127.0.0.1:8080".into()),
            sandbox_url: env::var("SANDBOX_URL")
                .unwrap_or_else(|_| "http://localhost:9090".into()),
            sandbox_timeout: Duration::from_millis(sandbox_timeout_ms),
            session_secret: env::var("SESSION_SECRET").ok(),
        }
    }
}

pub fn setup_dotenv() {
    dotenv().ok();
}

pub fn establish_pool(database_url: &str) -> Result<DbPool, r2d2::Error> {
    r2d2::Pool::builder().build(ConnectionManager::new(database_url))
}

const SCHEMA_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS user (
    id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
    name TEXT NOT NULL UNIQUE,
    hashed_password TEXT NOT NULL,
    is_host BOOLEAN NOT NULL DEFAULT 0,
    creation_instant TIMESTAMP NOT NULL
);
CREATE TABLE IF NOT EXISTS challenge (
    id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
    language TEXT NOT NULL,
    index_num INTEGER NOT NULL,
    slug TEXT NOT NULL UNIQUE,
    title TEXT NOT NULL,
    difficulty TEXT NOT NULL,
    points INTEGER NOT NULL,
    test_cases_json TEXT NOT NULL,
    is_active BOOLEAN NOT NULL DEFAULT 1,
    submission_count INTEGER NOT NULL DEFAULT 0,
    creation_instant TIMESTAMP NOT NULL,
    UNIQUE (language, index_num)
);
CREATE TABLE IF NOT EXISTS submission (
    uuid TEXT PRIMARY KEY NOT NULL,
    challenge_id INTEGER NOT NULL,
    user_id INTEGER NOT NULL,
    battle_id INTEGER,
    language TEXT NOT NULL,
    source_text TEXT NOT NULL,
    status TEXT NOT NULL,
    test_results_json TEXT NOT NULL,
    time_wall_ms BIGINT NOT NULL,
    points_earned INTEGER NOT NULL,
    is_first_solve BOOLEAN NOT NULL DEFAULT 0,
    submission_instant TIMESTAMP NOT NULL
);
CREATE INDEX IF NOT EXISTS submission_challenge_status
    ON submission (challenge_id, status);
CREATE INDEX IF NOT EXISTS submission_user_instant
    ON submission (user_id, submission_instant);
CREATE INDEX IF NOT EXISTS submission_instant
    ON submission (submission_instant);
CREATE TABLE IF NOT EXISTS battle (
    id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
    name TEXT NOT NULL,
    challenge_id INTEGER NOT NULL,
    start_instant TIMESTAMP NOT NULL,
    end_instant TIMESTAMP NOT NULL,
    creation_user_id INTEGER NOT NULL,
    creation_instant TIMESTAMP NOT NULL
);
"#;

pub fn run_migrations(connection: &mut SqliteConnection) -> QueryResult<()> {
    connection.batch_execute(SCHEMA_DDL)
}

pub fn setup_host_account(connection: &mut SqliteConnection) {
    let host_user_name = "host";
    let host_user_password =
        env::var("HOST_PASSWORD").unwrap_or_else(|_| "host".into());

    match user::get_user_by_name(connection, host_user_name) {
        Ok(Some(_)) => {
            info!("Host account already present");
        }
        Ok(None) => {
            info!("Seeding host account");
            if host_user_password == "host" {
                warn!("HOST_PASSWORD not set; host account uses the default password");
            }
            user::insert_new_user(
                connection,
                NewUser {
                    name: host_user_name,
                    password: &host_user_password,
                    is_host: true,
                },
            )
            .expect("Error seeding host account");
        }
        Err(e) => panic!("Couldn't look up host account: {}", e),
    }
}
